// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use colloquy_model::{Message, Role};

use crate::event::{AgentId, Event, Speaker};

/// Cap on the number of retained public events before compression kicks
/// in (component design §4.8).
pub const MAX_EVENTS: usize = 50;

/// An agent's private view of a session: its immutable system prompt, the
/// bounded window of public events it has seen, and the compressed
/// summaries produced whenever that window overflows.
///
/// Owned exclusively by the agent's own task; nothing else ever mutates
/// it (concurrency model §5). Incoming events are delivered through the
/// agent's mailbox and applied one at a time via [`AgentContext::observe`].
pub struct AgentContext {
    pub agent_id: AgentId,
    pub system_prompt: String,
    events: Vec<Event>,
    memory: Vec<String>,
}

impl AgentContext {
    pub fn new(agent_id: impl Into<AgentId>, system_prompt: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            system_prompt: system_prompt.into(),
            events: Vec::new(),
            memory: Vec::new(),
        }
    }

    /// Apply an incoming event. No-op for events this agent itself spoke
    /// or that are marked transient — neither is meant to accumulate in a
    /// private context.
    pub fn observe(&mut self, event: Event) {
        if event.meta.transient {
            return;
        }
        if let Speaker::Agent(id) = &event.speaker {
            if id == &self.agent_id {
                return;
            }
        }
        self.events.push(event);
        if self.events.len() > MAX_EVENTS {
            self.compress();
        }
    }

    /// Split off the older half of `events` into a one-line summary,
    /// retaining only the newer half verbatim.
    fn compress(&mut self) {
        let split_at = self.events.len() / 2;
        let older: Vec<Event> = self.events.drain(0..split_at).collect();
        let participants: std::collections::HashSet<String> =
            older.iter().map(|e| e.speaker.to_string()).collect();
        self.memory.push(format!(
            "{} participants made {} utterances",
            participants.len(),
            older.len()
        ));
    }

    /// Assemble the message list handed to a `ModelClient`: one system
    /// message carrying accumulated memory (if any), followed by each
    /// retained event rendered as `[speaker] text`.
    pub fn build_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.events.len() + 1);
        if !self.memory.is_empty() {
            messages.push(Message::system(self.memory.join("\n")));
        }
        for event in &self.events {
            let text = event.content.as_text().unwrap_or_default();
            let rendered = format!("[{}] {}", event.speaker, text);
            let role = match &event.speaker {
                Speaker::Agent(id) if id == &self.agent_id => Role::Assistant,
                _ => Role::User,
            };
            messages.push(Message {
                role,
                content: rendered,
            });
        }
        messages
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn memory(&self) -> &[String] {
        &self.memory
    }
}
