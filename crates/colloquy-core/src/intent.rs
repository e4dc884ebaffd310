// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::event::AgentId;

/// Whether an intent asks to speak in turn or to interrupt the current
/// speaker. Treated as the primary field for ordering; `urgency` is kept
/// only as a legacy numeric tiebreaker (design notes §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UrgencyLevel {
    RaiseHand,
    Interrupt,
}

/// A pending request to speak (data model §3).
#[derive(Debug, Clone)]
pub struct Intent {
    pub agent_id: AgentId,
    pub urgency_level: UrgencyLevel,
    /// Legacy numeric hint, 0..=5, used only to break ties between intents
    /// of the same `urgency_level`.
    pub urgency: u8,
    pub target_agent_id: Option<AgentId>,
    pub topic: Option<String>,
    pub preview: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Intent {
    pub fn speak(agent_id: impl Into<AgentId>, urgency: u8) -> Self {
        Self {
            agent_id: agent_id.into(),
            urgency_level: UrgencyLevel::RaiseHand,
            urgency,
            target_agent_id: None,
            topic: None,
            preview: None,
            timestamp: Utc::now(),
        }
    }

    pub fn interrupt(agent_id: impl Into<AgentId>, urgency: u8) -> Self {
        Self {
            agent_id: agent_id.into(),
            urgency_level: UrgencyLevel::Interrupt,
            urgency,
            target_agent_id: None,
            topic: None,
            preview: None,
            timestamp: Utc::now(),
        }
    }
}

/// Per-session ordered list of pending intents (component design §4.3).
///
/// `submit` inserts an `Interrupt` intent at the head only when
/// interruption is currently allowed; otherwise every intent is inserted in
/// descending `urgency_level` order, ties broken first by `urgency` and
/// then by submission order (earlier submissions sort first).
#[derive(Default)]
pub struct IntentQueue {
    items: VecDeque<Intent>,
}

impl IntentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit an intent, returning its 1-based queue position.
    pub fn submit(&mut self, intent: Intent, interruption_allowed: bool) -> usize {
        if intent.urgency_level == UrgencyLevel::Interrupt && interruption_allowed {
            self.items.push_front(intent);
            return 1;
        }

        let pos = self
            .items
            .iter()
            .position(|existing| rank(existing) < rank(&intent))
            .unwrap_or(self.items.len());
        self.items.insert(pos, intent);
        pos + 1
    }

    pub fn pop(&mut self) -> Option<Intent> {
        self.items.pop_front()
    }

    pub fn list(&self) -> Vec<Intent> {
        self.items.iter().cloned().collect()
    }

    pub fn clear_agent(&mut self, agent_id: &str) {
        self.items.retain(|i| i.agent_id != agent_id);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Ordering key: higher `urgency_level`, then higher `urgency`, sorts first.
fn rank(intent: &Intent) -> (UrgencyLevel, u8) {
    (intent.urgency_level, intent.urgency)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_jumps_head_when_allowed() {
        let mut q = IntentQueue::new();
        q.submit(Intent::speak("b", 2), true);
        q.submit(Intent::interrupt("c", 4), true);
        let next = q.pop().unwrap();
        assert_eq!(next.agent_id, "c");
    }

    #[test]
    fn interrupt_is_ordered_by_urgency_when_disallowed() {
        // S2: a later interrupt submitted while interruption is disallowed
        // is inserted by descending urgency, not forced to the head.
        let mut q = IntentQueue::new();
        q.submit(Intent::speak("b", 2), false);
        q.submit(Intent::interrupt("d", 5), false);
        let items = q.list();
        assert_eq!(items[0].agent_id, "d");
        assert_eq!(items[1].agent_id, "b");
    }

    #[test]
    fn ties_broken_by_submission_order() {
        let mut q = IntentQueue::new();
        q.submit(Intent::speak("first", 3), true);
        q.submit(Intent::speak("second", 3), true);
        let items = q.list();
        assert_eq!(items[0].agent_id, "first");
        assert_eq!(items[1].agent_id, "second");
    }

    #[test]
    fn clear_agent_removes_only_its_own_intents() {
        let mut q = IntentQueue::new();
        q.submit(Intent::speak("a", 1), true);
        q.submit(Intent::speak("b", 1), true);
        q.clear_agent("a");
        let items = q.list();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].agent_id, "b");
    }
}
