// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SessionId = String;
pub type AgentId = String;

/// The sentinel speakers alongside real agents (data model §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Speaker {
    Agent(AgentId),
    Moderator,
    User,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::Agent(id) => write!(f, "{id}"),
            Speaker::Moderator => write!(f, "moderator"),
            Speaker::User => write!(f, "user"),
        }
    }
}

/// Every event kind the engine can append (data model §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Speech,
    System,
    Summary,
    OutlineGenerated,
    ModeratorDirect,
    ModeratorCall,
    RoundAdvance,
    SessionStart,
    SessionPause,
    SessionResume,
    SessionEnd,
    SessionAborted,
    AgentRaiseHand,
    AgentInterrupt,
    SpeakerTimeout,
    /// Transient-only: an agent has started producing a turn. Never
    /// appended to the log.
    AgentThinking,
    /// Transient-only: an incremental chunk of a streamed turn.
    AgentChunk,
    /// Transient-only: an agent's turn (streamed or not) has finished.
    AgentDone,
}

/// Tagged payload for an [`Event`], discriminated by [`EventType`].
///
/// Each known event type gets a typed variant with its documented fields.
/// [`EventContent::Opaque`] is the forward-compatible tail: any payload
/// read back from a store whose shape does not match a known variant's
/// strict schema is preserved verbatim as JSON rather than dropped, so a
/// future event kind round-trips through an older build of this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventContent {
    Speech {
        agent_id: AgentId,
        agent_name: String,
        message: String,
        #[serde(default)]
        tokens: Option<u32>,
        from_intent: bool,
    },
    System {
        action: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },
    Summary {
        text: String,
    },
    Opaque(serde_json::Value),
}

impl EventContent {
    pub fn system(action: impl Into<String>, message: Option<String>) -> Self {
        EventContent::System {
            action: action.into(),
            message,
            extra: serde_json::Map::new(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventContent::Speech { message, .. } => Some(message),
            EventContent::Summary { text } => Some(text),
            EventContent::System { message, .. } => message.as_deref(),
            EventContent::Opaque(_) => None,
        }
    }
}

/// Who may observe an event. Per-agent scoping exists for collaborator
/// output that should stay private to a subset of agents; everything else
/// is `Public`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Scoped { agent_ids: Vec<AgentId> },
}

impl Visibility {
    pub fn is_visible_to(&self, agent_id: &str) -> bool {
        match self {
            Visibility::Public => true,
            Visibility::Scoped { agent_ids } => agent_ids.iter().any(|a| a == agent_id),
        }
    }
}

/// Side-channel metadata that does not participate in an event's ordering
/// or identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    #[serde(default = "Visibility::public")]
    pub visibility: Visibility,
    #[serde(default)]
    pub phase_id: Option<String>,
    /// Transient events (`agent:thinking`, `agent:chunk`, `agent:done`) are
    /// published on the bus but never appended to the log.
    #[serde(default)]
    pub transient: bool,
}

impl Visibility {
    fn public() -> Self {
        Visibility::Public
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self {
            visibility: Visibility::Public,
            phase_id: None,
            transient: false,
        }
    }
}

/// The atomic unit of shared session state (data model §3). Immutable once
/// constructed; `sequence` is assigned by the `EventLog` at append time and
/// is never reused, even across pruning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub session_id: SessionId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub speaker: Speaker,
    pub content: EventContent,
    pub meta: EventMeta,
}

impl Event {
    /// Construct a new event pending a sequence number. Used internally by
    /// `EventLog::append`, which stamps `sequence` before storing it.
    pub(crate) fn new(
        session_id: SessionId,
        event_type: EventType,
        speaker: Speaker,
        content: EventContent,
        meta: EventMeta,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            session_id,
            sequence: 0,
            timestamp: Utc::now(),
            event_type,
            speaker,
            content,
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_visibility_is_visible_to_anyone() {
        let v = Visibility::Public;
        assert!(v.is_visible_to("agent-a"));
        assert!(v.is_visible_to("agent-b"));
    }

    #[test]
    fn scoped_visibility_restricts_to_listed_agents() {
        let v = Visibility::Scoped {
            agent_ids: vec!["agent-a".into()],
        };
        assert!(v.is_visible_to("agent-a"));
        assert!(!v.is_visible_to("agent-b"));
    }

    #[test]
    fn speaker_display_matches_sentinel_names() {
        assert_eq!(Speaker::Moderator.to_string(), "moderator");
        assert_eq!(Speaker::User.to_string(), "user");
        assert_eq!(Speaker::Agent("a1".into()).to_string(), "a1");
    }
}
