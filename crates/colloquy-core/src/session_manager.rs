// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use colloquy_config::Scenario;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::agent::Agent;
use crate::discussion_loop::{DiscussionLoop, DiscussionLoopConfig, DiscussionLoopHandle};
use crate::errors::{CoreError, CoreResult};
use crate::event::{AgentId, SessionId};
use crate::event_bus::EventBus;
use crate::event_log::EventLog;
use crate::moderator::{ModeratorController, SessionPolicy, SessionState};
use crate::rule_engine::{RuleEngine, MAX_CONSECUTIVE_SPEAKS};

/// Everything needed to compose a new session (component design §4.7).
/// `scenario` is a validated, already-loaded configuration object — the
/// loading step itself lives in `colloquy-config`, upstream of this call.
pub struct SessionConfig {
    pub topic: String,
    pub scenario: Scenario,
    pub agents: Vec<Arc<dyn Agent>>,
    pub max_rounds: Option<u32>,
    pub enable_streaming: Option<bool>,
}

struct SessionHandle {
    agents: HashMap<AgentId, Arc<dyn Agent>>,
    loop_handle: Option<DiscussionLoopHandle>,
    /// Per-agent EventBus subscription token plus the task forwarding that
    /// subscription's mailbox into `Agent::receive_event` (component design
    /// §4.7: "subscribes each agent's context to the EventBus").
    agent_feeds: Vec<(u64, JoinHandle<()>)>,
}

/// Composes, starts and tears down discussion sessions (component design
/// §4.7). Holds the process-wide `ModeratorController`/`EventLog`/
/// `EventBus` and a registry of active sessions; nothing about an
/// individual session's turn logic lives here.
pub struct SessionManager {
    moderator: Arc<ModeratorController>,
    event_log: Arc<EventLog>,
    event_bus: Arc<EventBus>,
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    /// Resolved loop configuration + agent registry for a created-but-not-
    /// yet-started session, consumed by `start`.
    pending_loop_configs: Mutex<HashMap<SessionId, (DiscussionLoopConfig, HashMap<AgentId, Arc<dyn Agent>>)>>,
}

impl SessionManager {
    pub fn new(moderator: Arc<ModeratorController>, event_log: Arc<EventLog>, event_bus: Arc<EventBus>) -> Self {
        Self {
            moderator,
            event_log,
            event_bus,
            sessions: Mutex::new(HashMap::new()),
            pending_loop_configs: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve scenario defaults, per-field overrides and the explicit
    /// `maxRounds` argument (in that priority order), register every
    /// agent, and wire the session's rule engine and moderator state.
    /// Returns the new session's id; the discussion loop is not spawned
    /// until [`Self::start`].
    pub async fn create(&self, config: SessionConfig) -> CoreResult<SessionId> {
        let rules = config
            .scenario
            .rules
            .clone()
            .with_max_rounds_override(config.max_rounds);
        rules.validate()?;

        let session_id = Uuid::new_v4().to_string();
        let agent_ids: Vec<AgentId> = config.agents.iter().map(|a| a.id().to_string()).collect();
        let phase_id = config
            .scenario
            .phases
            .first()
            .map(|p| p.id.clone())
            .unwrap_or_default();
        let speaking_order = config.scenario.speaking_order_for_phase(&phase_id);
        let allow_interrupt = config.scenario.allow_interrupt_for_phase(&phase_id);

        let rule_engine = RuleEngine::new(speaking_order);
        let policy = SessionPolicy {
            allow_interrupt,
            max_time_per_turn_secs: rules.max_time_per_turn_secs,
            cold_threshold: rules.max_idle_rounds,
            max_consecutive_speaks: MAX_CONSECUTIVE_SPEAKS,
        };
        self.moderator
            .create_session_state(session_id.clone(), agent_ids, rule_engine, policy)
            .await;

        let mut agents = HashMap::new();
        let mut agent_feeds = Vec::new();
        for agent in config.agents {
            agent.initialize(&session_id).await?;
            self.moderator.register_agent(&session_id, agent.id()).await;

            let subscription = self.event_bus.subscribe_to_session(session_id.clone())?;
            let token = subscription.token();
            let mut receiver = subscription.receiver;
            let forwarded_agent = agent.clone();
            let feed = tokio::spawn(async move {
                while let Some(event) = receiver.recv().await {
                    forwarded_agent.receive_event(event).await;
                }
            });
            agent_feeds.push((token, feed));

            agents.insert(agent.id().to_string(), agent);
        }

        let loop_config = DiscussionLoopConfig {
            max_speakers_per_round: rules.max_speakers_per_round,
            speak_interval_ms: rules.speak_interval_ms,
            max_rounds: rules.max_rounds,
            no_progress_timeout_ms: rules.no_progress_timeout_ms,
            use_intent_queue: rules.use_intent_queue,
            enable_streaming: config.enable_streaming.unwrap_or(rules.enable_streaming),
            max_time_per_turn_secs: rules.max_time_per_turn_secs,
        };

        self.sessions.lock().await.insert(
            session_id.clone(),
            SessionHandle {
                agents: agents.clone(),
                loop_handle: None,
                agent_feeds,
            },
        );
        self.pending_loop_configs
            .lock()
            .await
            .insert(session_id.clone(), (loop_config, agents));

        info!(session_id = %session_id, topic = %config.topic, "session created");
        Ok(session_id)
    }

    pub async fn start(&self, session_id: &str) -> CoreResult<()> {
        self.moderator.start_session(session_id).await?;
        let Some((loop_config, agents)) = self.pending_loop_configs.lock().await.remove(session_id) else {
            return Err(CoreError::NotFound(session_id.to_string()));
        };
        let discussion_loop = DiscussionLoop::new(
            session_id.to_string(),
            self.moderator.clone(),
            self.event_log.clone(),
            self.event_bus.clone(),
            agents,
            loop_config,
        );
        let handle = discussion_loop.spawn();
        if let Some(session) = self.sessions.lock().await.get_mut(session_id) {
            session.loop_handle = Some(handle);
        }
        Ok(())
    }

    pub async fn pause(&self, session_id: &str) -> CoreResult<()> {
        self.moderator.pause_session(session_id).await
    }

    pub async fn resume(&self, session_id: &str) -> CoreResult<()> {
        self.moderator.resume_session(session_id).await
    }

    pub async fn end(&self, session_id: &str, reason: impl Into<String>) -> CoreResult<()> {
        self.moderator.end_session(session_id, reason).await?;
        self.cancel_loop(session_id).await;
        Ok(())
    }

    pub async fn delete(&self, session_id: &str) -> CoreResult<()> {
        self.cancel_loop(session_id).await;
        if let Some(handle) = self.sessions.lock().await.remove(session_id) {
            for agent in handle.agents.values() {
                agent.destroy().await;
            }
        }
        if let Some((_, agents)) = self.pending_loop_configs.lock().await.remove(session_id) {
            for agent in agents.values() {
                agent.destroy().await;
            }
        }
        self.moderator.clear_session(session_id).await;
        Ok(())
    }

    /// Stops the discussion loop and stops forwarding events to agents for
    /// a session that is ending, without removing its `SessionHandle` —
    /// `get`/`list` still need to see an ended-but-not-deleted session.
    async fn cancel_loop(&self, session_id: &str) {
        let (loop_handle, agent_feeds) = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(session_id) {
                Some(session) => (session.loop_handle.take(), std::mem::take(&mut session.agent_feeds)),
                None => (None, Vec::new()),
            }
        };
        if let Some(handle) = loop_handle {
            handle.cancel();
            handle.join().await;
        }
        for (token, feed) in agent_feeds {
            self.event_bus.unsubscribe(token);
            feed.abort();
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionState> {
        self.moderator.get_session_state(session_id).await
    }

    pub async fn list(&self) -> Vec<SessionId> {
        self.sessions.lock().await.keys().cloned().collect()
    }
}
