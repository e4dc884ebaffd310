// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod error;
mod loader;
mod schema;

pub use error::ConfigurationError;
pub use loader::{load_scenario, load_scenario_str, EnvOverrides, DEFAULT_EVENT_LOG_MAX_SIZE};
pub use schema::{DiscussionRules, ModeratorPolicy, Phase, Scenario, SpeakingOrder};
