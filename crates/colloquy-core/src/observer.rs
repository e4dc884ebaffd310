// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collaborators::{JudgeSystem, OutlineGenerator, SummaryService};
use crate::event::{Event, EventContent, EventMeta, EventType, SessionId, Speaker};
use crate::event_bus::EventBus;
use crate::event_log::EventLog;
use crate::intent::{Intent, UrgencyLevel};
use crate::moderator::{ModeratorController, SessionStatus};

/// Maximum persisted events returned in a `full_state` snapshot (external
/// interfaces §6.3).
pub const MAX_FULL_STATE_EVENTS: usize = 200;

/// Everything an observer may receive. Transport-agnostic: framing it onto
/// a WebSocket or HTTP long-poll connection is out of scope here (external
/// interfaces §6.3).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverMessage {
    StateUpdate {
        session_id: SessionId,
        status: SessionStatus,
        current_round: u32,
        current_speaker_id: Option<String>,
        tick: u64,
    },
    FullState {
        session_id: SessionId,
        events: Vec<Event>,
    },
    WorldEvent {
        event_id: uuid::Uuid,
        session_id: SessionId,
        event_type: EventType,
        tick: u64,
        payload: WorldEventPayload,
    },
    SimulationEnded {
        session_id: SessionId,
        reason: String,
    },
    Transient {
        session_id: SessionId,
        event_type: EventType,
        agent_id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct WorldEventPayload {
    pub content: EventContent,
    pub speaker: Speaker,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub meta: EventMeta,
}

/// A request from an observer. Each variant maps to one command named in
/// external interfaces §6.3; `handle_command` always returns a structured
/// [`ObserverReply`], never a bare error.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverCommand {
    JoinSession,
    LeaveSession,
    SessionControl { action: SessionControlAction },
    SpeakRequest { agent_id: Option<String>, content: Option<String> },
    IntentSubmit { agent_id: String, interrupt: bool, urgency: u8 },
    IntentList,
    ModeratorCall { agent_id: String, reason: String },
    ModeratorRequestResponse { responder_id: String, target_id: String, topic: String },
    InterventionSet { level: u8 },
    InterventionGet,
    OutlineGenerate,
    OutlineGet,
    JudgeScore { criteria: String },
    SummaryGenerate,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionControlAction {
    Pause,
    Resume,
    End,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObserverReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ObserverReply {
    fn ok(data: impl Serialize) -> Self {
        Self {
            success: true,
            error: None,
            data: serde_json::to_value(data).ok(),
        }
    }

    fn ok_empty() -> Self {
        Self { success: true, error: None, data: None }
    }

    fn err(message: impl Into<String>) -> Self {
        Self { success: false, error: Some(message.into()), data: None }
    }
}

/// Wires the transport-agnostic observer message/command pair to the
/// engine's EventBus/EventLog/ModeratorController, plus whichever
/// collaborators (outline/judge/summary) a deployment has configured
/// (external interfaces §6.3, component design §4.9).
pub struct ObserverHub {
    moderator: Arc<ModeratorController>,
    event_log: Arc<EventLog>,
    event_bus: Arc<EventBus>,
    outline: Option<Arc<OutlineGenerator>>,
    judge: Option<Arc<JudgeSystem>>,
    summary: Option<Arc<SummaryService>>,
}

impl ObserverHub {
    pub fn new(moderator: Arc<ModeratorController>, event_log: Arc<EventLog>, event_bus: Arc<EventBus>) -> Self {
        Self {
            moderator,
            event_log,
            event_bus,
            outline: None,
            summary: None,
            judge: None,
        }
    }

    pub fn with_collaborators(
        mut self,
        outline: Arc<OutlineGenerator>,
        judge: Arc<JudgeSystem>,
        summary: Arc<SummaryService>,
    ) -> Self {
        self.outline = Some(outline);
        self.judge = Some(judge);
        self.summary = Some(summary);
        self
    }

    /// Build the on-connect messages for a new observer (external
    /// interfaces §6.3): always a `state_update`, plus a `full_state` when
    /// `request_full_state` is set.
    pub async fn connect(&self, session_id: &str, request_full_state: bool) -> Option<Vec<ObserverMessage>> {
        let state = self.moderator.get_session_state(session_id).await?;
        let tick = self.event_log.get_current_sequence(session_id).await.unwrap_or(0);
        let mut messages = vec![ObserverMessage::StateUpdate {
            session_id: session_id.to_string(),
            status: state.status,
            current_round: state.current_round,
            current_speaker_id: state.current_speaker_id.clone(),
            tick,
        }];
        if request_full_state {
            let events = self
                .event_log
                .get_recent(session_id, MAX_FULL_STATE_EVENTS.min(crate::event_log::MAX_LIMIT))
                .await
                .unwrap_or_default();
            messages.push(ObserverMessage::FullState {
                session_id: session_id.to_string(),
                events,
            });
        }
        Some(messages)
    }

    /// Translate one bus [`Event`] into the observer messages it produces:
    /// a transient message for transient events, otherwise a `world_event`
    /// immediately followed by a refreshed `state_update`, plus a
    /// `simulation_ended` when the event is a terminal SYSTEM event.
    pub async fn translate(&self, event: Event) -> Vec<ObserverMessage> {
        if event.meta.transient {
            let agent_id = match &event.speaker {
                Speaker::Agent(id) => Some(id.clone()),
                _ => None,
            };
            return vec![ObserverMessage::Transient {
                session_id: event.session_id,
                event_type: event.event_type,
                agent_id,
            }];
        }

        let mut messages = vec![ObserverMessage::WorldEvent {
            event_id: event.event_id,
            session_id: event.session_id.clone(),
            event_type: event.event_type,
            tick: event.sequence,
            payload: WorldEventPayload {
                content: event.content.clone(),
                speaker: event.speaker.clone(),
                timestamp: event.timestamp,
                meta: event.meta.clone(),
            },
        }];

        if let Some(state) = self.moderator.get_session_state(&event.session_id).await {
            messages.push(ObserverMessage::StateUpdate {
                session_id: event.session_id.clone(),
                status: state.status,
                current_round: state.current_round,
                current_speaker_id: state.current_speaker_id.clone(),
                tick: event.sequence,
            });
        }

        let is_terminal_system = matches!(
            event.event_type,
            EventType::SessionEnd | EventType::SessionAborted
        );
        if is_terminal_system {
            let reason = event.content.as_text().unwrap_or("session ended").to_string();
            messages.push(ObserverMessage::SimulationEnded {
                session_id: event.session_id,
                reason,
            });
        }

        messages
    }

    /// Execute one observer command, always returning a structured reply
    /// rather than propagating an error (external interfaces §6.3).
    pub async fn handle_command(&self, session_id: &str, command: ObserverCommand) -> ObserverReply {
        match command {
            ObserverCommand::JoinSession | ObserverCommand::LeaveSession => ObserverReply::ok_empty(),

            ObserverCommand::SessionControl { action } => {
                let result = match action {
                    SessionControlAction::Pause => self.moderator.pause_session(session_id).await,
                    SessionControlAction::Resume => self.moderator.resume_session(session_id).await,
                    SessionControlAction::End => {
                        self.moderator.end_session(session_id, "ended by observer").await
                    }
                };
                match result {
                    Ok(()) => ObserverReply::ok_empty(),
                    Err(e) => ObserverReply::err(e.to_string()),
                }
            }

            ObserverCommand::SpeakRequest { agent_id, content } => {
                if let Some(content) = content {
                    let result = self
                        .event_log
                        .append(
                            session_id,
                            EventType::Speech,
                            Speaker::User,
                            EventContent::Speech {
                                agent_id: "user".into(),
                                agent_name: "user".into(),
                                message: content,
                                tokens: None,
                                from_intent: false,
                            },
                            EventMeta::default(),
                        )
                        .await;
                    match result {
                        Ok(event) => {
                            self.event_bus.publish(event);
                            ObserverReply::ok_empty()
                        }
                        Err(e) => ObserverReply::err(e.to_string()),
                    }
                } else if let Some(agent_id) = agent_id {
                    match self.moderator.direct_speaker(session_id, agent_id).await {
                        Ok(()) => ObserverReply::ok_empty(),
                        Err(e) => ObserverReply::err(e.to_string()),
                    }
                } else {
                    ObserverReply::err("speak:request requires agentId or content")
                }
            }

            ObserverCommand::IntentSubmit { agent_id, interrupt, urgency } => {
                let intent = if interrupt {
                    Intent::interrupt(agent_id, urgency)
                } else {
                    Intent::speak(agent_id, urgency)
                };
                match self.moderator.submit_intent(session_id, intent).await {
                    Some(position) => ObserverReply::ok(serde_json::json!({ "position": position })),
                    None => ObserverReply::err("unknown session"),
                }
            }

            ObserverCommand::IntentList => {
                let intents = self.moderator.get_pending_intents(session_id).await;
                let summaries: Vec<_> = intents
                    .iter()
                    .map(|i| {
                        serde_json::json!({
                            "agentId": i.agent_id,
                            "urgency": i.urgency,
                            "interrupt": i.urgency_level == UrgencyLevel::Interrupt,
                        })
                    })
                    .collect();
                ObserverReply::ok(summaries)
            }

            ObserverCommand::ModeratorCall { agent_id, reason } => {
                match self.moderator.call_agent(session_id, agent_id, reason).await {
                    Ok(()) => ObserverReply::ok_empty(),
                    Err(e) => ObserverReply::err(e.to_string()),
                }
            }

            ObserverCommand::ModeratorRequestResponse { responder_id, target_id, topic } => {
                match self
                    .moderator
                    .request_response(session_id, responder_id, target_id, topic)
                    .await
                {
                    Ok(()) => ObserverReply::ok_empty(),
                    Err(e) => ObserverReply::err(e.to_string()),
                }
            }

            ObserverCommand::InterventionSet { level } => {
                if level > 3 {
                    return ObserverReply::err("intervention level must be 0..=3");
                }
                self.moderator.set_intervention_level(session_id, level).await;
                ObserverReply::ok_empty()
            }

            ObserverCommand::InterventionGet => match self.moderator.get_session_state(session_id).await {
                Some(state) => ObserverReply::ok(serde_json::json!({ "level": state.intervention_level })),
                None => ObserverReply::err("unknown session"),
            },

            ObserverCommand::OutlineGenerate => match &self.outline {
                Some(outline) => match outline.generate(session_id).await {
                    Ok(event) => ObserverReply::ok(event.content.as_text().unwrap_or_default()),
                    Err(e) => ObserverReply::err(e.to_string()),
                },
                None => ObserverReply::err("no outline collaborator configured"),
            },

            ObserverCommand::OutlineGet => {
                match self
                    .event_log
                    .get_by_type(session_id, EventType::OutlineGenerated, 1)
                    .await
                {
                    Ok(events) => match events.last() {
                        Some(event) => ObserverReply::ok(event.content.as_text().unwrap_or_default()),
                        None => ObserverReply::err("no outline generated yet"),
                    },
                    Err(e) => ObserverReply::err(e.to_string()),
                }
            }

            ObserverCommand::JudgeScore { criteria } => match &self.judge {
                Some(judge) => match judge.score(session_id, &criteria).await {
                    Ok(event) => ObserverReply::ok(event.content.as_text().unwrap_or_default()),
                    Err(e) => ObserverReply::err(e.to_string()),
                },
                None => ObserverReply::err("no judge collaborator configured"),
            },

            ObserverCommand::SummaryGenerate => match &self.summary {
                Some(summary) => match summary.summarize(session_id).await {
                    Ok(event) => ObserverReply::ok(event.content.as_text().unwrap_or_default()),
                    Err(e) => ObserverReply::err(e.to_string()),
                },
                None => ObserverReply::err("no summary collaborator configured"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::InMemoryEventStore;
    use crate::moderator::SessionPolicy;
    use crate::rule_engine::RuleEngine;
    use colloquy_config::SpeakingOrder;

    fn hub() -> (ObserverHub, Arc<ModeratorController>) {
        let event_log = Arc::new(EventLog::new(Arc::new(InMemoryEventStore::new())));
        let event_bus = Arc::new(EventBus::new());
        let moderator = Arc::new(ModeratorController::new(event_log.clone(), event_bus.clone()));
        let hub = ObserverHub::new(moderator.clone(), event_log, event_bus);
        (hub, moderator)
    }

    #[tokio::test]
    async fn connect_without_full_state_returns_only_state_update() {
        let (hub, moderator) = hub();
        moderator
            .create_session_state(
                "s1",
                vec!["a".into()],
                RuleEngine::new(SpeakingOrder::RoundRobin),
                SessionPolicy::default(),
            )
            .await;
        let messages = hub.connect("s1", false).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], ObserverMessage::StateUpdate { .. }));
    }

    #[tokio::test]
    async fn connect_with_full_state_adds_a_full_state_message() {
        let (hub, moderator) = hub();
        moderator
            .create_session_state(
                "s1",
                vec!["a".into()],
                RuleEngine::new(SpeakingOrder::RoundRobin),
                SessionPolicy::default(),
            )
            .await;
        let messages = hub.connect("s1", true).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[1], ObserverMessage::FullState { .. }));
    }

    #[tokio::test]
    async fn session_control_end_triggers_simulation_ended_on_translate() {
        let (hub, moderator) = hub();
        moderator
            .create_session_state(
                "s1",
                vec!["a".into()],
                RuleEngine::new(SpeakingOrder::RoundRobin),
                SessionPolicy::default(),
            )
            .await;
        moderator.start_session("s1").await.unwrap();
        let reply = hub
            .handle_command("s1", ObserverCommand::SessionControl { action: SessionControlAction::End })
            .await;
        assert!(reply.success);

        let events = hub.event_log.get_recent("s1", 10).await.unwrap();
        let end_event = events
            .into_iter()
            .find(|e| e.event_type == EventType::SessionEnd)
            .unwrap();
        let messages = hub.translate(end_event).await;
        assert!(messages
            .iter()
            .any(|m| matches!(m, ObserverMessage::SimulationEnded { .. })));
    }

    #[tokio::test]
    async fn intervention_set_rejects_out_of_range_level() {
        let (hub, moderator) = hub();
        moderator
            .create_session_state(
                "s1",
                vec!["a".into()],
                RuleEngine::new(SpeakingOrder::RoundRobin),
                SessionPolicy::default(),
            )
            .await;
        let reply = hub.handle_command("s1", ObserverCommand::InterventionSet { level: 9 }).await;
        assert!(!reply.success);
    }

    #[tokio::test]
    async fn unknown_session_join_still_replies_ok() {
        let (hub, _moderator) = hub();
        let reply = hub.handle_command("ghost", ObserverCommand::JoinSession).await;
        assert!(reply.success);
    }
}
