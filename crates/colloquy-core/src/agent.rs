// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::CoreResult;
use crate::event::{AgentId, Event, SessionId};
use crate::intent::Intent;

/// An agent's momentary activity, exposed to observers via [`AgentState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Thinking,
}

/// Point-in-time status snapshot for one agent (component design §6.2).
#[derive(Debug, Clone)]
pub struct AgentState {
    pub agent_id: AgentId,
    pub status: AgentStatus,
    pub speak_count: u32,
    pub total_tokens: u64,
    pub last_active_at: Option<DateTime<Utc>>,
}

impl AgentState {
    pub fn new(agent_id: impl Into<AgentId>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status: AgentStatus::Idle,
            speak_count: 0,
            total_tokens: 0,
            last_active_at: None,
        }
    }
}

/// The content produced by a completed turn.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub content: String,
    pub tokens: Option<u32>,
}

/// A chunk of an in-progress streamed turn.
#[derive(Debug, Clone)]
pub enum ResponseChunk {
    Delta(String),
    Final(AgentReply),
}

/// A participant capability consumed by the engine (component design
/// §6.2). Implementations decide, privately, how to turn the context the
/// engine hands them (via `receiveEvent`/`AgentContext`) into a reply —
/// the engine never looks inside a turn, only at what comes out of it.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn role(&self) -> &str;
    fn stance(&self) -> Option<&str> {
        None
    }
    fn supports_streaming(&self) -> bool {
        false
    }

    async fn initialize(&self, session_id: &SessionId) -> CoreResult<()>;

    /// Deliver an event for this agent to privately incorporate. Must be
    /// non-blocking and is a no-op when the event originated from this
    /// agent itself.
    async fn receive_event(&self, event: Event);

    async fn generate_response(&self) -> CoreResult<AgentReply>;

    /// Streamed variant of [`Self::generate_response`]. The default
    /// implementation wraps the non-streaming call in a single final
    /// chunk for agents that do not support incremental delivery.
    async fn generate_response_stream(&self) -> CoreResult<Vec<ResponseChunk>> {
        let reply = self.generate_response().await?;
        Ok(vec![ResponseChunk::Final(reply)])
    }

    /// Optional capability: decide whether to proactively request the
    /// floor given recent context. Returning `None` declines.
    async fn generate_intent(&self, _recent_events: &[Event], _round: u32) -> Option<Intent> {
        None
    }

    async fn state(&self) -> AgentState;
    async fn reset(&self);
    async fn destroy(&self);
}
