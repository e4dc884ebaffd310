// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

fn default_max_rounds() -> u32 {
    10
}
fn default_min_rounds() -> u32 {
    1
}
fn default_max_speakers_per_round() -> u32 {
    5
}
fn default_speak_interval_ms() -> u64 {
    1000
}
fn default_no_progress_timeout_ms() -> u64 {
    60_000
}
fn default_max_idle_rounds() -> u32 {
    2
}
fn default_max_time_per_turn_secs() -> u64 {
    30
}
fn default_intervention_level() -> u8 {
    1
}
fn default_true() -> bool {
    true
}

/// How the next speaker is chosen within a phase.
///
/// The source scenario format carries two historical variants
/// (`round-robin | free | moderated` and, separately, `priority`); all four
/// are accepted here. A scenario naming anything else is not rejected —
/// loading falls back to [`SpeakingOrder::Free`] and logs a warning, per the
/// preserved open question on unknown speaking-order handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpeakingOrder {
    RoundRobin,
    Free,
    Moderated,
    Priority,
}

impl SpeakingOrder {
    /// Parse a scenario's speaking-order string, falling back to `Free` and
    /// reporting the fallback to the caller so it can be logged.
    pub fn parse_lenient(raw: &str) -> (Self, bool) {
        match raw {
            "round-robin" => (Self::RoundRobin, false),
            "free" => (Self::Free, false),
            "moderated" => (Self::Moderated, false),
            "priority" => (Self::Priority, false),
            _ => (Self::Free, true),
        }
    }
}

/// One phase of a scenario: its own speaking order, interrupt policy and
/// round bounds. A scenario with a single implicit phase is represented as
/// a one-element `phases` vector.
///
/// `speaking_order` is kept as a raw string on the wire (rather than a
/// strict enum) so a misconfigured scenario fails open: [`Phase::resolved_speaking_order`]
/// falls back to [`SpeakingOrder::Free`] for anything it doesn't recognise
/// instead of rejecting the whole scenario at parse time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    #[serde(default)]
    pub speaking_order: Option<String>,
    #[serde(default)]
    pub allow_interrupt: Option<bool>,
}

impl Phase {
    /// Resolve the raw `speaking_order` string, falling back to `Free` and
    /// reporting the fallback so the caller can log it.
    pub fn resolved_speaking_order(&self) -> Option<(SpeakingOrder, bool)> {
        self.speaking_order
            .as_deref()
            .map(SpeakingOrder::parse_lenient)
    }
}

/// Moderator proactivity, 0 (silent) through 3 (guiding).
///
/// - `0`: no moderator nomination.
/// - `1`: nominate only on extended starvation (`idleRounds >= 2 * coldThreshold`).
/// - `2`: nominate the least-recent speaker as soon as the session goes cold.
/// - `3`: additionally emit guiding prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeratorPolicy {
    #[serde(default = "default_intervention_level")]
    pub intervention_level: u8,
}

impl Default for ModeratorPolicy {
    fn default() -> Self {
        Self {
            intervention_level: default_intervention_level(),
        }
    }
}

/// Scheduler knobs resolved for a single session: scenario defaults
/// overridden field-by-field by a `SessionConfig`, overridden again by an
/// explicit `maxRounds` argument (see `SessionManager::create`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionRules {
    #[serde(default = "default_min_rounds")]
    pub min_rounds: u32,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_max_speakers_per_round")]
    pub max_speakers_per_round: u32,
    #[serde(default = "default_speak_interval_ms")]
    pub speak_interval_ms: u64,
    #[serde(default = "default_no_progress_timeout_ms")]
    pub no_progress_timeout_ms: u64,
    #[serde(default = "default_max_idle_rounds")]
    pub max_idle_rounds: u32,
    #[serde(default = "default_max_time_per_turn_secs")]
    pub max_time_per_turn_secs: u64,
    #[serde(default = "default_true")]
    pub use_intent_queue: bool,
    #[serde(default = "default_true")]
    pub enable_streaming: bool,
    #[serde(default)]
    pub moderator_policy: ModeratorPolicy,
    #[serde(default)]
    pub allow_interrupt: bool,
}

impl Default for DiscussionRules {
    fn default() -> Self {
        Self {
            min_rounds: default_min_rounds(),
            max_rounds: default_max_rounds(),
            max_speakers_per_round: default_max_speakers_per_round(),
            speak_interval_ms: default_speak_interval_ms(),
            no_progress_timeout_ms: default_no_progress_timeout_ms(),
            max_idle_rounds: default_max_idle_rounds(),
            max_time_per_turn_secs: default_max_time_per_turn_secs(),
            use_intent_queue: true,
            enable_streaming: true,
            moderator_policy: ModeratorPolicy::default(),
            allow_interrupt: false,
        }
    }
}

impl DiscussionRules {
    /// Apply an optional `maxRounds` override from a `SessionConfig`, the
    /// highest-priority layer in the resolution order described in
    /// component design §4.7.
    pub fn with_max_rounds_override(mut self, max_rounds: Option<u32>) -> Self {
        if let Some(v) = max_rounds {
            self.max_rounds = v;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.min_rounds > self.max_rounds {
            return Err(ConfigurationError::Invalid(format!(
                "min_rounds ({}) must not exceed max_rounds ({})",
                self.min_rounds, self.max_rounds
            )));
        }
        if self.max_speakers_per_round == 0 {
            return Err(ConfigurationError::Invalid(
                "max_speakers_per_round must be at least 1".into(),
            ));
        }
        if self.moderator_policy.intervention_level > 3 {
            return Err(ConfigurationError::Invalid(format!(
                "intervention_level must be 0..=3, got {}",
                self.moderator_policy.intervention_level
            )));
        }
        Ok(())
    }
}

/// A validated, read-only scenario description: the phases a discussion
/// moves through and the discussion rules that govern it. Once loaded, a
/// `Scenario` is immutable configuration handed to `SessionManager::create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub rules: DiscussionRules,
}

impl Scenario {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.id.trim().is_empty() {
            return Err(ConfigurationError::Invalid("scenario id is empty".into()));
        }
        self.rules.validate()
    }

    /// Resolve the speaking order and interrupt policy in effect for the
    /// given phase (or the scenario's top-level defaults if there are no
    /// phases, as is the common case for a single-phase discussion).
    pub fn speaking_order_for_phase(&self, phase_id: &str) -> SpeakingOrder {
        self.phases
            .iter()
            .find(|p| p.id == phase_id)
            .and_then(|p| p.resolved_speaking_order())
            .map(|(order, fell_back)| {
                if fell_back {
                    tracing::warn!(phase = phase_id, "unknown speaking order, falling back to free");
                }
                order
            })
            .unwrap_or(SpeakingOrder::Free)
    }

    pub fn allow_interrupt_for_phase(&self, phase_id: &str) -> bool {
        self.phases
            .iter()
            .find(|p| p.id == phase_id)
            .and_then(|p| p.allow_interrupt)
            .unwrap_or(self.rules.allow_interrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_speaking_order_falls_back_to_free() {
        let (order, fell_back) = SpeakingOrder::parse_lenient("consensus-vote");
        assert_eq!(order, SpeakingOrder::Free);
        assert!(fell_back);
    }

    #[test]
    fn known_speaking_orders_parse_without_fallback() {
        let (order, fell_back) = SpeakingOrder::parse_lenient("priority");
        assert_eq!(order, SpeakingOrder::Priority);
        assert!(!fell_back);
    }

    #[test]
    fn rules_reject_min_rounds_above_max_rounds() {
        let rules = DiscussionRules {
            min_rounds: 5,
            max_rounds: 3,
            ..Default::default()
        };
        assert!(rules.validate().is_err());
    }

    #[test]
    fn max_rounds_override_takes_priority_over_scenario_default() {
        let rules = DiscussionRules::default().with_max_rounds_override(Some(20));
        assert_eq!(rules.max_rounds, 20);
    }

    #[test]
    fn scenario_rejects_empty_id() {
        let scenario = Scenario {
            id: "  ".into(),
            topic: "test".into(),
            phases: vec![],
            rules: DiscussionRules::default(),
        };
        assert!(scenario.validate().is_err());
    }
}
