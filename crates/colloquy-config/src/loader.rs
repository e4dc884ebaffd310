// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use tracing::{debug, warn};

use crate::error::ConfigurationError;
use crate::schema::Scenario;

/// Default per-session event cap before auto-pruning kicks in
/// (component design §4.1). Overridable via `WE_EVENT_LOG_MAX_SIZE`.
pub const DEFAULT_EVENT_LOG_MAX_SIZE: usize = 500;

/// Environment-derived overrides layered on top of a loaded [`Scenario`].
/// Resolved by hand rather than through a config-merging crate, matching
/// the rest of this stack's own-rolled environment resolution.
#[derive(Debug, Clone, Copy)]
pub struct EnvOverrides {
    pub event_log_max_size: usize,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let event_log_max_size = match std::env::var("WE_EVENT_LOG_MAX_SIZE") {
            Ok(raw) => raw.parse::<usize>().map_err(|_| ConfigurationError::InvalidEnv {
                var: "WE_EVENT_LOG_MAX_SIZE".into(),
                reason: format!("{raw:?} is not a positive integer"),
            })?,
            Err(_) => DEFAULT_EVENT_LOG_MAX_SIZE,
        };
        Ok(Self { event_log_max_size })
    }
}

impl Default for EnvOverrides {
    fn default() -> Self {
        Self {
            event_log_max_size: DEFAULT_EVENT_LOG_MAX_SIZE,
        }
    }
}

/// Load and validate a scenario from a YAML file on disk.
pub fn load_scenario(path: &Path) -> Result<Scenario, ConfigurationError> {
    debug!(path = %path.display(), "loading scenario");
    let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_scenario_str(&text)
}

/// Parse and validate a scenario from an in-memory YAML document. Split out
/// from [`load_scenario`] so tests and the demo binary can construct
/// scenarios without touching the filesystem.
pub fn load_scenario_str(text: &str) -> Result<Scenario, ConfigurationError> {
    let scenario: Scenario = serde_yaml::from_str(text)?;
    scenario.validate()?;
    for phase in &scenario.phases {
        if let Some((_, fell_back)) = phase.resolved_speaking_order() {
            if fell_back {
                warn!(phase = %phase.id, "unknown speaking order, falling back to free");
            }
        }
    }
    Ok(scenario)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
id: debate-1
topic: "Should we ship it"
phases:
  - id: opening
    speaking_order: round-robin
rules:
  max_rounds: 3
"#;

    #[test]
    fn loads_minimal_scenario() {
        let scenario = load_scenario_str(MINIMAL).unwrap();
        assert_eq!(scenario.id, "debate-1");
        assert_eq!(scenario.rules.max_rounds, 3);
        assert_eq!(scenario.phases.len(), 1);
    }

    #[test]
    fn rejects_scenario_with_inverted_round_bounds() {
        let text = r#"
id: bad
topic: "x"
rules:
  min_rounds: 10
  max_rounds: 2
"#;
        assert!(load_scenario_str(text).is_err());
    }

    #[test]
    fn env_override_defaults_when_unset() {
        std::env::remove_var("WE_EVENT_LOG_MAX_SIZE");
        let overrides = EnvOverrides::from_env().unwrap();
        assert_eq!(overrides.event_log_max_size, DEFAULT_EVENT_LOG_MAX_SIZE);
    }
}
