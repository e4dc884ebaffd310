// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::{CoreError, CoreResult};
use crate::event::{AgentId, EventContent, EventMeta, EventType, SessionId, Speaker};
use crate::event_bus::EventBus;
use crate::event_log::EventLog;
use crate::intent::{Intent, IntentQueue};
use crate::rule_engine::{RuleEngine, MAX_CONSECUTIVE_SPEAKS};

/// A session's lifecycle phase (data model §3). `Completed` and `Aborted`
/// are absorbing: once reached, no further speech may be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Aborted,
}

/// Per-session coordinator state, exclusively owned and mutated by
/// [`ModeratorController`]. External readers always receive a clone
/// (snapshot), mirroring the grounding codebase's `Shared<T>` pattern
/// (concurrency model §5) rather than holding a lock across a read.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub current_round: u32,
    pub current_speaker_id: Option<AgentId>,
    pub current_speaker_start_time: Option<DateTime<Utc>>,
    pub agent_ids: Vec<AgentId>,
    pub speak_counts: HashMap<AgentId, u32>,
    pub last_speaker_id: Option<AgentId>,
    pub consecutive_speaks: u32,
    pub idle_rounds: u32,
    pub round_robin_index: u32,
    pub phase_id: Option<String>,
    pub phase_round: u32,
    pub intervention_level: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new(session_id: impl Into<SessionId>, agent_ids: Vec<AgentId>) -> Self {
        let speak_counts = agent_ids.iter().cloned().map(|id| (id, 0)).collect();
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Pending,
            current_round: 0,
            current_speaker_id: None,
            current_speaker_start_time: None,
            agent_ids,
            speak_counts,
            last_speaker_id: None,
            consecutive_speaks: 0,
            idle_rounds: 0,
            round_robin_index: 0,
            phase_id: None,
            phase_round: 0,
            intervention_level: 1,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SessionStatus::Completed | SessionStatus::Aborted)
    }
}

/// Proactive action the moderator decides to take on a given tick, derived
/// from [`ModeratorController::evaluate_intervention`]'s health-metric
/// policy (component design §4.5).
#[derive(Debug, Clone)]
pub enum ModeratorAction {
    NominateSpeaker(AgentId),
    Warn(AgentId),
    None,
}

/// Per-session policy inputs that do not belong on `SessionState` itself
/// (they never change once a session starts) but are needed by the
/// controller's decision logic.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub allow_interrupt: bool,
    pub max_time_per_turn_secs: u64,
    pub cold_threshold: u32,
    pub max_consecutive_speaks: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            allow_interrupt: false,
            max_time_per_turn_secs: 30,
            cold_threshold: 2,
            max_consecutive_speaks: MAX_CONSECUTIVE_SPEAKS,
        }
    }
}

struct SessionSlot {
    state: SessionState,
    rule_engine: RuleEngine,
    intent_queue: IntentQueue,
    policy: SessionPolicy,
    auto_intent_rounds: HashSet<u32>,
}

/// Per-session state machine and turn dispatcher (component design §4.5).
/// Owns every `SessionState` in the process; all mutation goes through its
/// methods so ordering and lifecycle invariants hold in one place.
pub struct ModeratorController {
    event_log: Arc<EventLog>,
    event_bus: Arc<EventBus>,
    sessions: Mutex<HashMap<SessionId, SessionSlot>>,
}

impl ModeratorController {
    pub fn new(event_log: Arc<EventLog>, event_bus: Arc<EventBus>) -> Self {
        Self {
            event_log,
            event_bus,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create_session_state(
        &self,
        session_id: impl Into<SessionId>,
        agent_ids: Vec<AgentId>,
        rule_engine: RuleEngine,
        policy: SessionPolicy,
    ) {
        let session_id = session_id.into();
        let state = SessionState::new(session_id.clone(), agent_ids);
        self.sessions.lock().await.insert(
            session_id,
            SessionSlot {
                state,
                rule_engine,
                intent_queue: IntentQueue::new(),
                policy,
                auto_intent_rounds: HashSet::new(),
            },
        );
    }

    pub async fn clear_session(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
        self.event_bus.clear_session(session_id);
        let _ = self.event_log.clear(session_id).await;
    }

    pub async fn register_agent(&self, session_id: &str, agent_id: impl Into<AgentId>) {
        let agent_id = agent_id.into();
        if let Some(slot) = self.sessions.lock().await.get_mut(session_id) {
            if !slot.state.agent_ids.contains(&agent_id) {
                slot.state.agent_ids.push(agent_id.clone());
                slot.state.speak_counts.entry(agent_id).or_insert(0);
            }
        }
    }

    pub async fn get_session_state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.lock().await.get(session_id).map(|s| s.state.clone())
    }

    async fn publish_system(
        &self,
        session_id: &str,
        event_type: EventType,
        action: &str,
        message: Option<String>,
    ) -> CoreResult<()> {
        let event = self
            .event_log
            .append(
                session_id,
                event_type,
                Speaker::Moderator,
                EventContent::system(action, message),
                EventMeta::default(),
            )
            .await?;
        self.event_bus.publish(event);
        Ok(())
    }

    // -- Lifecycle -----------------------------------------------------

    pub async fn start_session(&self, session_id: &str) -> CoreResult<()> {
        let mut sessions = self.sessions.lock().await;
        let Some(slot) = sessions.get_mut(session_id) else {
            return Err(CoreError::NotFound(session_id.to_string()));
        };
        if slot.state.status != SessionStatus::Pending {
            warn!(session_id, status = ?slot.state.status, "start_session is a no-op outside pending");
            return Ok(());
        }
        slot.state.status = SessionStatus::Active;
        slot.state.started_at = Some(Utc::now());
        drop(sessions);
        self.publish_system(session_id, EventType::SessionStart, "SESSION_START", None).await
    }

    pub async fn pause_session(&self, session_id: &str) -> CoreResult<()> {
        let mut sessions = self.sessions.lock().await;
        let Some(slot) = sessions.get_mut(session_id) else {
            return Err(CoreError::NotFound(session_id.to_string()));
        };
        if slot.state.status != SessionStatus::Active {
            warn!(session_id, status = ?slot.state.status, "pause_session is a no-op outside active");
            return Ok(());
        }
        slot.state.status = SessionStatus::Paused;
        drop(sessions);
        self.publish_system(session_id, EventType::SessionPause, "SESSION_PAUSE", None).await
    }

    pub async fn resume_session(&self, session_id: &str) -> CoreResult<()> {
        let mut sessions = self.sessions.lock().await;
        let Some(slot) = sessions.get_mut(session_id) else {
            return Err(CoreError::NotFound(session_id.to_string()));
        };
        if slot.state.status != SessionStatus::Paused {
            warn!(session_id, status = ?slot.state.status, "resume_session is a no-op outside paused");
            return Ok(());
        }
        slot.state.status = SessionStatus::Active;
        drop(sessions);
        self.publish_system(session_id, EventType::SessionResume, "SESSION_RESUME", None).await
    }

    pub async fn end_session(&self, session_id: &str, reason: impl Into<String>) -> CoreResult<()> {
        let reason = reason.into();
        let mut sessions = self.sessions.lock().await;
        let Some(slot) = sessions.get_mut(session_id) else {
            return Err(CoreError::NotFound(session_id.to_string()));
        };
        if slot.state.is_terminal() {
            return Ok(());
        }
        slot.state.status = SessionStatus::Completed;
        slot.state.ended_at = Some(Utc::now());
        drop(sessions);
        self.publish_system(session_id, EventType::SessionEnd, "SESSION_END", Some(reason)).await
    }

    /// Unrecoverable path: event-log write failure or state corruption.
    /// Never called for ordinary per-agent failures, which the scheduler
    /// skips past instead.
    pub async fn abort_session(&self, session_id: &str, reason: impl Into<String>) -> CoreResult<()> {
        let reason = reason.into();
        let mut sessions = self.sessions.lock().await;
        let Some(slot) = sessions.get_mut(session_id) else {
            return Err(CoreError::NotFound(session_id.to_string()));
        };
        if slot.state.is_terminal() {
            return Ok(());
        }
        slot.state.status = SessionStatus::Aborted;
        slot.state.ended_at = Some(Utc::now());
        drop(sessions);
        self.publish_system(session_id, EventType::SessionAborted, "SESSION_ABORTED", Some(reason)).await
    }

    // -- Turn control ----------------------------------------------------

    /// Consult the `RuleEngine`, then apply the consecutive-speaks cap
    /// (component design §4.5): an otherwise-selected agent is rejected if
    /// it is the last speaker and has already hit the cap under a
    /// non-moderated order.
    pub async fn select_next_speaker(&self, session_id: &str) -> Option<AgentId> {
        let mut sessions = self.sessions.lock().await;
        let slot = sessions.get_mut(session_id)?;
        let candidate = slot
            .rule_engine
            .select_next_speaker(&slot.state, &slot.state.agent_ids)?;

        let is_moderated = matches!(slot.rule_engine.speaking_order, colloquy_config::SpeakingOrder::Moderated);
        if !is_moderated
            && slot.state.last_speaker_id.as_deref() == Some(candidate.as_str())
            && slot.state.consecutive_speaks >= slot.policy.max_consecutive_speaks
        {
            warn!(session_id, agent_id = %candidate, "rejecting speaker selection, consecutive cap reached");
            return None;
        }
        Some(candidate)
    }

    pub async fn direct_speaker(&self, session_id: &str, agent_id: impl Into<AgentId>) -> CoreResult<()> {
        let agent_id = agent_id.into();
        self.set_current_speaker(session_id, agent_id.clone()).await?;
        let event = self
            .event_log
            .append(
                session_id,
                EventType::ModeratorDirect,
                Speaker::Moderator,
                EventContent::system("DIRECT_SPEAKER", None),
                EventMeta::default(),
            )
            .await?;
        self.event_bus.publish(event);
        Ok(())
    }

    pub async fn call_agent(
        &self,
        session_id: &str,
        agent_id: impl Into<AgentId>,
        reason: impl Into<String>,
    ) -> CoreResult<()> {
        let agent_id = agent_id.into();
        self.set_current_speaker(session_id, agent_id).await?;
        let event = self
            .event_log
            .append(
                session_id,
                EventType::ModeratorCall,
                Speaker::Moderator,
                EventContent::system("CALL_AGENT", Some(reason.into())),
                EventMeta::default(),
            )
            .await?;
        self.event_bus.publish(event);
        Ok(())
    }

    pub async fn request_response(
        &self,
        session_id: &str,
        responder_id: impl Into<AgentId>,
        target_id: impl Into<AgentId>,
        topic: impl Into<String>,
    ) -> CoreResult<()> {
        let responder_id = responder_id.into();
        self.set_current_speaker(session_id, responder_id).await?;
        let mut extra = serde_json::Map::new();
        extra.insert("target_agent_id".into(), target_id.into().into());
        extra.insert("topic".into(), topic.into().into());
        let event = self
            .event_log
            .append(
                session_id,
                EventType::ModeratorDirect,
                Speaker::Moderator,
                EventContent::System {
                    action: "REQUEST_RESPONSE".into(),
                    message: None,
                    extra,
                },
                EventMeta::default(),
            )
            .await?;
        self.event_bus.publish(event);
        Ok(())
    }

    pub async fn set_current_speaker(&self, session_id: &str, agent_id: AgentId) -> CoreResult<()> {
        let mut sessions = self.sessions.lock().await;
        let slot = sessions
            .get_mut(session_id)
            .ok_or_else(|| CoreError::NotFound(session_id.to_string()))?;
        slot.state.current_speaker_id = Some(agent_id);
        slot.state.current_speaker_start_time = Some(Utc::now());
        Ok(())
    }

    /// Record a completed speech: updates speak counts, consecutive-speak
    /// tracking and clears the in-progress speaker slot.
    pub async fn record_speech(&self, session_id: &str, agent_id: &str) {
        if let Some(slot) = self.sessions.lock().await.get_mut(session_id) {
            *slot.state.speak_counts.entry(agent_id.to_string()).or_insert(0) += 1;
            if slot.state.last_speaker_id.as_deref() == Some(agent_id) {
                slot.state.consecutive_speaks += 1;
            } else {
                slot.state.consecutive_speaks = 1;
            }
            slot.state.last_speaker_id = Some(agent_id.to_string());
            slot.state.idle_rounds = 0;
            slot.state.current_speaker_id = None;
            slot.state.current_speaker_start_time = None;
            if matches!(slot.rule_engine.speaking_order, colloquy_config::SpeakingOrder::RoundRobin) {
                if let Some(idx) = slot.state.agent_ids.iter().position(|a| a == agent_id) {
                    slot.state.round_robin_index = (idx as u32 + 1) % slot.state.agent_ids.len().max(1) as u32;
                }
            }
        }
    }

    /// Clear the in-progress speaker slot without recording a speech,
    /// used after a `SPEAKER_TIMEOUT` so the next tick selects afresh.
    pub async fn clear_current_speaker(&self, session_id: &str) {
        if let Some(slot) = self.sessions.lock().await.get_mut(session_id) {
            slot.state.current_speaker_id = None;
            slot.state.current_speaker_start_time = None;
        }
    }

    pub async fn check_speaker_timeout(&self, session_id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(slot) => slot.rule_engine.check_timeout(&slot.state, slot.policy.max_time_per_turn_secs),
            None => false,
        }
    }

    pub async fn advance_round(&self, session_id: &str) -> CoreResult<()> {
        {
            let mut sessions = self.sessions.lock().await;
            let Some(slot) = sessions.get_mut(session_id) else {
                return Err(CoreError::NotFound(session_id.to_string()));
            };
            slot.state.current_round += 1;
            slot.state.phase_round += 1;
        }
        let event = self
            .event_log
            .append(
                session_id,
                EventType::RoundAdvance,
                Speaker::Moderator,
                EventContent::system("ROUND_ADVANCE", None),
                EventMeta::default(),
            )
            .await?;
        self.event_bus.publish(event);
        Ok(())
    }

    /// True once `currentRound` has exceeded the configured `maxRounds`.
    pub async fn should_end(&self, session_id: &str, max_rounds: u32) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(slot) => slot.state.current_round > max_rounds || slot.state.is_terminal(),
            None => true,
        }
    }

    pub async fn increment_idle_rounds(&self, session_id: &str) {
        if let Some(slot) = self.sessions.lock().await.get_mut(session_id) {
            slot.state.idle_rounds += 1;
        }
    }

    pub async fn set_intervention_level(&self, session_id: &str, level: u8) {
        if let Some(slot) = self.sessions.lock().await.get_mut(session_id) {
            slot.state.intervention_level = level.min(3);
        }
    }

    // -- Intent API ------------------------------------------------------

    pub async fn submit_intent(&self, session_id: &str, intent: Intent) -> Option<usize> {
        let mut sessions = self.sessions.lock().await;
        let slot = sessions.get_mut(session_id)?;
        Some(slot.intent_queue.submit(intent, slot.policy.allow_interrupt))
    }

    pub async fn get_pending_intents(&self, session_id: &str) -> Vec<Intent> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| s.intent_queue.list())
            .unwrap_or_default()
    }

    pub async fn process_next_intent(&self, session_id: &str) -> Option<Intent> {
        self.sessions.lock().await.get_mut(session_id)?.intent_queue.pop()
    }

    pub async fn clear_agent_intents(&self, session_id: &str, agent_id: &str) {
        if let Some(slot) = self.sessions.lock().await.get_mut(session_id) {
            slot.intent_queue.clear_agent(agent_id);
        }
    }

    /// Whether `ensureAutoIntents` has already run for this round; marks it
    /// run if not, so callers can rely on the return value being
    /// authoritative for the current tick (invariant 10: at most one batch
    /// of auto-intents per `(sessionId, round)`).
    pub async fn mark_auto_intents_for_round(&self, session_id: &str, round: u32) -> bool {
        if let Some(slot) = self.sessions.lock().await.get_mut(session_id) {
            slot.auto_intent_rounds.insert(round)
        } else {
            false
        }
    }

    // -- Proactive intervention -------------------------------------------

    /// Decision policy given current health metrics (component design
    /// §4.5). Does not mutate state; callers act on the returned action.
    pub async fn evaluate_intervention(&self, session_id: &str) -> ModeratorAction {
        let sessions = self.sessions.lock().await;
        let Some(slot) = sessions.get(session_id) else {
            return ModeratorAction::None;
        };
        let state = &slot.state;
        let level = state.intervention_level;

        let total: u32 = state.speak_counts.values().sum();
        let (max_agent, max_count) = state
            .speak_counts
            .iter()
            .max_by_key(|(_, c)| **c)
            .map(|(a, c)| (a.clone(), *c))
            .unwrap_or((String::new(), 0));
        let is_overheated = total > 0 && (max_count as f64 / total as f64) > 0.6 && max_count > 2;
        let is_cold = state.idle_rounds >= slot.policy.cold_threshold;

        if is_overheated && level >= 1 {
            return ModeratorAction::Warn(max_agent);
        }
        if is_cold {
            let extended_cold = state.idle_rounds >= 2 * slot.policy.cold_threshold;
            let should_nominate = (level == 1 && extended_cold) || level >= 2;
            if should_nominate {
                if let Some(agent) = least_recent_speaker(state) {
                    return ModeratorAction::NominateSpeaker(agent);
                }
            }
        } else if !slot.intent_queue.is_empty() {
            return ModeratorAction::None;
        } else if level >= 2 {
            if let Some(agent) = least_recent_speaker(state) {
                return ModeratorAction::NominateSpeaker(agent);
            }
        }
        ModeratorAction::None
    }
}

/// The agent with the lowest speak count, excluding the current last
/// speaker when a tie would otherwise re-select them.
fn least_recent_speaker(state: &SessionState) -> Option<AgentId> {
    state
        .agent_ids
        .iter()
        .filter(|a| Some(a.as_str()) != state.last_speaker_id.as_deref())
        .min_by_key(|a| state.speak_counts.get(*a).copied().unwrap_or(0))
        .cloned()
        .or_else(|| state.agent_ids.first().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::InMemoryEventStore;
    use colloquy_config::SpeakingOrder;

    fn controller() -> ModeratorController {
        let log = Arc::new(EventLog::new(Arc::new(InMemoryEventStore::new())));
        let bus = Arc::new(EventBus::new());
        ModeratorController::new(log, bus)
    }

    async fn setup(controller: &ModeratorController, agents: Vec<&str>) {
        controller
            .create_session_state(
                "s1",
                agents.into_iter().map(String::from).collect(),
                RuleEngine::new(SpeakingOrder::RoundRobin),
                SessionPolicy::default(),
            )
            .await;
    }

    #[tokio::test]
    async fn start_twice_is_a_no_op() {
        let c = controller();
        setup(&c, vec!["a", "b"]).await;
        c.start_session("s1").await.unwrap();
        c.start_session("s1").await.unwrap();
        let state = c.get_session_state("s1").await.unwrap();
        assert_eq!(state.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn pause_then_resume_preserves_round_and_speakers() {
        let c = controller();
        setup(&c, vec!["a", "b"]).await;
        c.start_session("s1").await.unwrap();
        c.record_speech("s1", "a").await;
        c.pause_session("s1").await.unwrap();
        c.resume_session("s1").await.unwrap();
        let state = c.get_session_state("s1").await.unwrap();
        assert_eq!(state.status, SessionStatus::Active);
        assert_eq!(state.last_speaker_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn terminal_session_rejects_further_end_calls_idempotently() {
        let c = controller();
        setup(&c, vec!["a"]).await;
        c.start_session("s1").await.unwrap();
        c.end_session("s1", "done").await.unwrap();
        c.end_session("s1", "done again").await.unwrap();
        let state = c.get_session_state("s1").await.unwrap();
        assert_eq!(state.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn consecutive_cap_rejects_repeat_speaker_under_round_robin() {
        let c = controller();
        setup(&c, vec!["a", "b"]).await;
        c.start_session("s1").await.unwrap();
        // force a into consecutive-speak violation territory
        if let Some(slot) = c.sessions.lock().await.get_mut("s1") {
            slot.state.last_speaker_id = Some("a".into());
            slot.state.consecutive_speaks = MAX_CONSECUTIVE_SPEAKS;
            slot.state.round_robin_index = 0;
        }
        let next = c.select_next_speaker("s1").await;
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn set_current_speaker_enables_timeout_detection() {
        // S5: once a speaker is marked current, holding the floor past
        // `maxTimePerTurn` must be detectable, and clearing it resets that.
        let c = controller();
        setup(&c, vec!["a"]).await;
        c.start_session("s1").await.unwrap();
        c.set_current_speaker("s1", "a".into()).await.unwrap();
        assert!(!c.check_speaker_timeout("s1").await);

        let max_secs = c.sessions.lock().await.get("s1").unwrap().policy.max_time_per_turn_secs;
        if let Some(slot) = c.sessions.lock().await.get_mut("s1") {
            slot.state.current_speaker_start_time =
                Some(Utc::now() - chrono::Duration::seconds(max_secs as i64 + 1));
        }
        assert!(c.check_speaker_timeout("s1").await);

        c.clear_current_speaker("s1").await;
        assert!(!c.check_speaker_timeout("s1").await);
    }

    #[tokio::test]
    async fn starvation_nominates_least_spoken_agent_at_level_two() {
        // S4: speakCounts = {A:5, B:1, C:0}, idle for >= coldThreshold.
        let c = controller();
        setup(&c, vec!["a", "b", "c"]).await;
        c.start_session("s1").await.unwrap();
        c.set_intervention_level("s1", 2).await;
        if let Some(slot) = c.sessions.lock().await.get_mut("s1") {
            slot.state.speak_counts.insert("a".into(), 5);
            slot.state.speak_counts.insert("b".into(), 1);
            slot.state.speak_counts.insert("c".into(), 0);
            slot.state.idle_rounds = 2;
        }
        match c.evaluate_intervention("s1").await {
            ModeratorAction::NominateSpeaker(agent) => assert_eq!(agent, "c"),
            other => panic!("expected nomination, got {other:?}"),
        }
    }
}
