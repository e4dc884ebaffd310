// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::Utc;
pub use colloquy_config::SpeakingOrder;

use crate::event::AgentId;
use crate::moderator::SessionState;

/// Agents eligible to speak next never speak more than this many times in
/// a row under `round-robin` or `priority` order (a moderator `callAgent`
/// override is the only sanctioned exception).
pub const MAX_CONSECUTIVE_SPEAKS: u32 = 2;

/// Stateless speaker-selection policy (component design §4.4). Given a
/// session's current state and agent roster, decides who speaks next
/// according to the scenario's configured speaking order. Carries no
/// state of its own — every decision is a pure function of its inputs.
#[derive(Debug, Clone, Copy)]
pub struct RuleEngine {
    pub speaking_order: SpeakingOrder,
}

impl RuleEngine {
    pub fn new(speaking_order: SpeakingOrder) -> Self {
        Self { speaking_order }
    }

    /// Returns the agent that should speak next, or `None` when the order
    /// defers the decision elsewhere (`free` defers to the intent queue,
    /// `moderated` defers to the moderator's own nomination logic).
    pub fn select_next_speaker(&self, state: &SessionState, agents: &[AgentId]) -> Option<AgentId> {
        if agents.is_empty() {
            return None;
        }
        match self.speaking_order {
            SpeakingOrder::RoundRobin => {
                let idx = state.round_robin_index as usize % agents.len();
                Some(agents[idx].clone())
            }
            SpeakingOrder::Free => None,
            SpeakingOrder::Moderated => None,
            SpeakingOrder::Priority => self.select_by_priority(state, agents),
        }
    }

    /// Lowest `speakCounts` wins; ties broken by longest idle time (the
    /// agent least recently seen as `lastSpeakerId`).
    fn select_by_priority(&self, state: &SessionState, agents: &[AgentId]) -> Option<AgentId> {
        agents
            .iter()
            .min_by_key(|agent_id| {
                let count = state.speak_counts.get(*agent_id).copied().unwrap_or(0);
                let is_last_speaker = state.last_speaker_id.as_deref() == Some(agent_id.as_str());
                (count, is_last_speaker)
            })
            .cloned()
    }

    /// True once the current speaker has held the floor longer than the
    /// configured per-turn limit.
    pub fn check_timeout(&self, state: &SessionState, max_time_per_turn_secs: u64) -> bool {
        match (state.current_speaker_id.as_ref(), state.current_speaker_start_time) {
            (Some(_), Some(started)) => {
                let elapsed = (Utc::now() - started).num_seconds().max(0) as u64;
                elapsed > max_time_per_turn_secs
            }
            _ => false,
        }
    }

    pub fn remaining_time(&self, state: &SessionState, max_time_per_turn_secs: u64) -> Option<i64> {
        let started = state.current_speaker_start_time?;
        state.current_speaker_id.as_ref()?;
        let elapsed = (Utc::now() - started).num_seconds().max(0);
        Some((max_time_per_turn_secs as i64 - elapsed).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderator::SessionState;

    fn agents() -> Vec<AgentId> {
        vec!["a".into(), "b".into(), "c".into()]
    }

    #[test]
    fn round_robin_advances_by_index() {
        let engine = RuleEngine::new(SpeakingOrder::RoundRobin);
        let mut state = SessionState::new("s1", agents());
        state.round_robin_index = 1;
        assert_eq!(engine.select_next_speaker(&state, &agents()), Some("b".into()));
    }

    #[test]
    fn free_order_defers_to_intent_queue() {
        let engine = RuleEngine::new(SpeakingOrder::Free);
        let state = SessionState::new("s1", agents());
        assert_eq!(engine.select_next_speaker(&state, &agents()), None);
    }

    #[test]
    fn priority_picks_lowest_speak_count() {
        let engine = RuleEngine::new(SpeakingOrder::Priority);
        let mut state = SessionState::new("s1", agents());
        state.speak_counts.insert("a".into(), 5);
        state.speak_counts.insert("b".into(), 1);
        state.speak_counts.insert("c".into(), 0);
        assert_eq!(engine.select_next_speaker(&state, &agents()), Some("c".into()));
    }

    #[test]
    fn no_timeout_without_a_current_speaker() {
        let engine = RuleEngine::new(SpeakingOrder::RoundRobin);
        let state = SessionState::new("s1", agents());
        assert!(!engine.check_timeout(&state, 30));
    }
}
