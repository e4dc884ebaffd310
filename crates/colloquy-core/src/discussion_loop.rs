// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::agent::{Agent, ResponseChunk};
use crate::errors::CoreError;
use crate::event::{AgentId, EventContent, EventMeta, EventType, SessionId, Speaker};
use crate::event_bus::EventBus;
use crate::event_log::EventLog;
use crate::intent::Intent;
use crate::moderator::{ModeratorController, SessionStatus};

/// Scheduler knobs for one session's [`DiscussionLoop`] (component design
/// §4.6). Defaults match the reference configuration.
#[derive(Debug, Clone)]
pub struct DiscussionLoopConfig {
    pub max_speakers_per_round: u32,
    pub speak_interval_ms: u64,
    pub max_rounds: u32,
    pub no_progress_timeout_ms: u64,
    pub use_intent_queue: bool,
    pub enable_streaming: bool,
    /// Hard cap on a single turn. A non-cancellable model call exceeding
    /// this is abandoned rather than awaited indefinitely (component design
    /// §5); the in-progress speaker slot is then cleared the same as a
    /// `SPEAKER_TIMEOUT`.
    pub max_time_per_turn_secs: u64,
}

impl Default for DiscussionLoopConfig {
    fn default() -> Self {
        Self {
            max_speakers_per_round: 5,
            speak_interval_ms: 1000,
            max_rounds: 10,
            no_progress_timeout_ms: 60_000,
            use_intent_queue: true,
            enable_streaming: true,
            max_time_per_turn_secs: 30,
        }
    }
}

/// A handle to a spawned [`DiscussionLoop`] task. Dropping this handle does
/// not stop the loop; call [`DiscussionLoopHandle::cancel`] and await the
/// join handle to shut it down deterministically.
pub struct DiscussionLoopHandle {
    cancel_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DiscussionLoopHandle {
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// The per-session scheduler (component design §4.6): a single cooperative
/// task that repeatedly selects a speaker, drives its turn, and appends
/// the resulting SPEECH event, until the session ends.
pub struct DiscussionLoop {
    session_id: SessionId,
    moderator: Arc<ModeratorController>,
    event_log: Arc<EventLog>,
    event_bus: Arc<EventBus>,
    agents: HashMap<AgentId, Arc<dyn Agent>>,
    config: DiscussionLoopConfig,
}

impl DiscussionLoop {
    pub fn new(
        session_id: impl Into<SessionId>,
        moderator: Arc<ModeratorController>,
        event_log: Arc<EventLog>,
        event_bus: Arc<EventBus>,
        agents: HashMap<AgentId, Arc<dyn Agent>>,
        config: DiscussionLoopConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            moderator,
            event_log,
            event_bus,
            agents,
            config,
        }
    }

    /// Spawn the loop as its own task and return a handle to cancel/join
    /// it (concurrency model §5: one independent scheduler task per
    /// session).
    pub fn spawn(self) -> DiscussionLoopHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(cancel_rx));
        DiscussionLoopHandle { cancel_tx, join }
    }

    async fn run(self, mut cancel_rx: watch::Receiver<bool>) {
        let mut speakers_this_round: u32 = 0;
        let mut last_progress = Utc::now();

        loop {
            if *cancel_rx.borrow() {
                break;
            }

            let Some(state) = self.moderator.get_session_state(&self.session_id).await else {
                break;
            };

            if state.status == SessionStatus::Paused {
                if self.sleep_or_cancel(Duration::from_millis(500), &mut cancel_rx).await {
                    break;
                }
                continue;
            }
            if state.is_terminal() {
                break;
            }
            if self.moderator.should_end(&self.session_id, self.config.max_rounds).await {
                break;
            }

            let elapsed_since_progress = (Utc::now() - last_progress).num_milliseconds().max(0) as u64;
            if elapsed_since_progress > self.config.no_progress_timeout_ms {
                info!(session_id = %self.session_id, "no progress timeout reached, ending session");
                break;
            }

            if self.moderator.check_speaker_timeout(&self.session_id).await {
                self.handle_speaker_timeout(&state.current_speaker_id).await;
            }

            let mut speaker_id = None;
            let mut from_intent = false;
            if self.config.use_intent_queue {
                self.ensure_auto_intents(state.current_round).await;
                if let Some(intent) = self.moderator.process_next_intent(&self.session_id).await {
                    speaker_id = Some(intent.agent_id);
                    from_intent = true;
                }
            }
            if speaker_id.is_none() {
                speaker_id = self.moderator.select_next_speaker(&self.session_id).await;
            }

            let Some(speaker_id) = speaker_id else {
                if self
                    .sleep_or_cancel(Duration::from_millis(self.config.speak_interval_ms), &mut cancel_rx)
                    .await
                {
                    break;
                }
                continue;
            };

            let Some(agent) = self.agents.get(&speaker_id).cloned() else {
                if self
                    .sleep_or_cancel(Duration::from_millis(self.config.speak_interval_ms), &mut cancel_rx)
                    .await
                {
                    break;
                }
                continue;
            };

            if let Err(e) = self.moderator.set_current_speaker(&self.session_id, speaker_id.clone()).await {
                error!(session_id = %self.session_id, agent_id = %speaker_id, error = %e, "failed to mark current speaker, skipping turn");
                if self
                    .sleep_or_cancel(Duration::from_millis(self.config.speak_interval_ms), &mut cancel_rx)
                    .await
                {
                    break;
                }
                continue;
            }

            self.publish_transient(EventType::AgentThinking, &speaker_id, None);

            let turn_future = async {
                if self.config.enable_streaming && agent.supports_streaming() {
                    self.run_streamed_turn(&speaker_id, agent.as_ref()).await
                } else {
                    agent.generate_response().await
                }
            };
            let turn_result = match tokio::time::timeout(
                Duration::from_secs(self.config.max_time_per_turn_secs),
                turn_future,
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    error!(session_id = %self.session_id, agent_id = %speaker_id, "turn exceeded hard time cap, abandoning");
                    self.handle_speaker_timeout(&Some(speaker_id.clone())).await;
                    self.publish_transient(EventType::AgentDone, &speaker_id, None);
                    if self
                        .sleep_or_cancel(Duration::from_millis(self.config.speak_interval_ms), &mut cancel_rx)
                        .await
                    {
                        break;
                    }
                    continue;
                }
            };

            self.publish_transient(EventType::AgentDone, &speaker_id, None);

            match turn_result {
                Ok(reply) => {
                    let content = EventContent::Speech {
                        agent_id: speaker_id.clone(),
                        agent_name: agent.name().to_string(),
                        message: reply.content,
                        tokens: reply.tokens,
                        from_intent,
                    };
                    match self
                        .event_log
                        .append(&self.session_id, EventType::Speech, Speaker::Agent(speaker_id.clone()), content, EventMeta::default())
                        .await
                    {
                        Ok(event) => {
                            self.event_bus.publish(event);
                            self.moderator.record_speech(&self.session_id, &speaker_id).await;
                            last_progress = Utc::now();
                            speakers_this_round += 1;
                            if speakers_this_round >= self.config.max_speakers_per_round {
                                let _ = self.moderator.advance_round(&self.session_id).await;
                                speakers_this_round = 0;
                            }
                        }
                        Err(e) if e.is_fatal() => {
                            error!(session_id = %self.session_id, error = %e, "fatal event log error, aborting session");
                            let _ = self.moderator.abort_session(&self.session_id, e.to_string()).await;
                            break;
                        }
                        Err(e) => {
                            error!(session_id = %self.session_id, error = %e, "failed to append speech event");
                        }
                    }
                }
                Err(e) => {
                    error!(session_id = %self.session_id, agent_id = %speaker_id, error = %e, "turn failed, skipping");
                }
            }

            if self
                .sleep_or_cancel(Duration::from_millis(self.config.speak_interval_ms), &mut cancel_rx)
                .await
            {
                break;
            }
        }

        let _ = self.moderator.end_session(&self.session_id, "Discussion completed").await;
    }

    async fn run_streamed_turn(
        &self,
        speaker_id: &str,
        agent: &(dyn Agent),
    ) -> Result<crate::agent::AgentReply, CoreError> {
        let chunks = agent.generate_response_stream().await?;
        let mut accumulated = String::new();
        for chunk in chunks {
            match chunk {
                ResponseChunk::Delta(delta) => {
                    accumulated.push_str(&delta);
                    let payload = serde_json::json!({ "chunk": delta, "accumulated": accumulated });
                    self.publish_transient(EventType::AgentChunk, speaker_id, Some(payload));
                }
                ResponseChunk::Final(reply) => return Ok(reply),
            }
        }
        Ok(crate::agent::AgentReply {
            content: accumulated,
            tokens: None,
        })
    }

    async fn handle_speaker_timeout(&self, agent_id: &Option<AgentId>) {
        let Some(agent_id) = agent_id.clone() else { return };
        let mut extra = serde_json::Map::new();
        extra.insert("agent_id".into(), agent_id.clone().into());
        if let Ok(event) = self
            .event_log
            .append(
                &self.session_id,
                EventType::SpeakerTimeout,
                Speaker::Moderator,
                EventContent::System {
                    action: "SPEAKER_TIMEOUT".into(),
                    message: None,
                    extra,
                },
                EventMeta::default(),
            )
            .await
        {
            self.event_bus.publish(event);
        }
        self.moderator.clear_current_speaker(&self.session_id).await;
    }

    /// Once per round: if the intent queue is empty and no batch has run
    /// yet this round, ask every agent whether it wants the floor
    /// (invariant 10: at most one auto-intent batch per round).
    async fn ensure_auto_intents(&self, round: u32) {
        if !self.moderator.get_pending_intents(&self.session_id).await.is_empty() {
            return;
        }
        if !self.moderator.mark_auto_intents_for_round(&self.session_id, round).await {
            return;
        }
        let recent = self.event_log.get_recent(&self.session_id, 20).await.unwrap_or_default();
        let proposals = futures::future::join_all(
            self.agents
                .values()
                .map(|agent| {
                    let recent = recent.clone();
                    async move { agent.generate_intent(&recent, round).await }
                }),
        )
        .await;
        for intent in proposals.into_iter().flatten() {
            self.submit_intent(intent).await;
        }
    }

    async fn submit_intent(&self, intent: Intent) {
        let _ = self.moderator.submit_intent(&self.session_id, intent).await;
    }

    fn publish_transient(&self, event_type: EventType, agent_id: &str, payload: Option<serde_json::Value>) {
        let content = match payload {
            Some(value) => EventContent::Opaque(value),
            None => EventContent::system(format!("{event_type:?}"), None),
        };
        let mut event = crate::event::Event {
            event_id: uuid::Uuid::new_v4(),
            session_id: self.session_id.clone(),
            sequence: Utc::now().timestamp_millis().max(0) as u64,
            timestamp: Utc::now(),
            event_type,
            speaker: Speaker::Agent(agent_id.to_string()),
            content,
            meta: EventMeta {
                transient: true,
                ..Default::default()
            },
        };
        // transient sequences are wall-clock derived and opaque; never
        // compare them to a persisted Event::sequence (design notes §9).
        event.meta.transient = true;
        self.event_bus.publish(event);
    }

    /// Sleep unless cancellation fires first. Returns `true` if the loop
    /// should stop.
    async fn sleep_or_cancel(&self, duration: Duration, cancel_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = cancel_rx.changed() => *cancel_rx.borrow(),
        }
    }
}

