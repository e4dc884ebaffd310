// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The discussion coordination engine: a moderator state machine, an
//! append-only per-session event log, a turn scheduler with an intent
//! queue, and real-time fan-out to observers.

mod agent;
mod agent_context;
mod collaborators;
mod discussion_loop;
mod errors;
mod event;
mod event_bus;
mod event_log;
mod intent;
mod moderator;
mod observer;
mod rule_engine;
mod session_manager;

pub use agent::{Agent, AgentReply, AgentState, AgentStatus, ResponseChunk};
pub use agent_context::AgentContext;
pub use collaborators::{JudgeSystem, OutlineGenerator, SummaryService};
pub use discussion_loop::{DiscussionLoop, DiscussionLoopConfig, DiscussionLoopHandle};
pub use errors::{CoreError, CoreResult};
pub use event::{
    AgentId, Event, EventContent, EventMeta, EventType, SessionId, Speaker, Visibility,
};
pub use event_bus::{EventBus, Subscription};
pub use event_log::{EventLog, EventStore, InMemoryEventStore, PruneStrategy, MAX_EVENTS_PER_SESSION, MAX_LIMIT};
pub use intent::{Intent, IntentQueue, UrgencyLevel};
pub use moderator::{ModeratorAction, ModeratorController, SessionPolicy, SessionState, SessionStatus};
pub use observer::{
    ObserverCommand, ObserverHub, ObserverMessage, ObserverReply, SessionControlAction,
    WorldEventPayload, MAX_FULL_STATE_EVENTS,
};
pub use rule_engine::{RuleEngine, MAX_CONSECUTIVE_SPEAKS};
pub use session_manager::{SessionConfig, SessionManager};
