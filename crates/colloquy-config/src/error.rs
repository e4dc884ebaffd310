// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Scenario/environment validation failure. Propagates to session creation
/// and fails it outright; a `ConfigurationError` never reaches a running
/// discussion loop.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("reading scenario file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing scenario YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid scenario: {0}")]
    Invalid(String),

    #[error("invalid environment override {var}: {reason}")]
    InvalidEnv { var: String, reason: String },
}
