// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::errors::{CoreError, CoreResult};
use crate::event::{Event, EventContent, EventMeta, EventType, Speaker};

/// Maximum events returned by a single read call. There is deliberately no
/// "get all" operation, to keep any one caller from pulling an unbounded
/// context into memory (component design §4.1).
pub const MAX_LIMIT: usize = 100;

/// Per-session event cap that triggers auto-pruning after an append.
pub const MAX_EVENTS_PER_SESSION: usize = 500;

/// How to shrink a session's event history.
#[derive(Debug, Clone)]
pub enum PruneStrategy {
    ByCount { keep: usize },
    ByType { keep_types: Vec<EventType> },
    BeforeSequence { seq: u64 },
    /// Retain exactly the given event ids, dropping everything else. Unlike
    /// `BeforeSequence`, this can express a keep-set that isn't a contiguous
    /// suffix of the sequence order (e.g. an old SUMMARY kept alongside only
    /// the newest half of everything after it).
    KeepIds { ids: HashSet<Uuid> },
}

/// Storage abstraction behind `EventLog`. The in-memory implementation
/// here is the reference; a persistent or remote store must preserve the
/// same per-session ordering and sequence-uniqueness contract.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: Event) -> CoreResult<Event>;
    async fn get_by_session(&self, session_id: &str, limit: usize) -> CoreResult<Vec<Event>>;
    async fn get_by_type(
        &self,
        session_id: &str,
        event_type: EventType,
        limit: usize,
    ) -> CoreResult<Vec<Event>>;
    async fn get_after_sequence(
        &self,
        session_id: &str,
        after_seq: u64,
        limit: usize,
    ) -> CoreResult<Vec<Event>>;
    async fn get_next_sequence(&self, session_id: &str) -> CoreResult<u64>;
    async fn set_sequence(&self, session_id: &str, seq: u64) -> CoreResult<()>;
    async fn clear(&self, session_id: &str) -> CoreResult<()>;
    async fn count(&self, session_id: &str) -> CoreResult<usize>;
    async fn prune(&self, session_id: &str, strategy: PruneStrategy) -> CoreResult<()>;
    /// When set, the next `append` for any session fails. Used by fatal-path
    /// tests (scenario S6) to simulate a backing-store rejection.
    async fn fail_next_append(&self, session_id: &str);
}

#[derive(Default)]
struct SessionSlot {
    events: Vec<Event>,
    next_sequence: u64,
    fail_next: bool,
}

/// The reference `EventStore`: an in-memory map of session id to its event
/// vector, guarded by one mutex per process (writes to distinct sessions
/// never block each other in spirit, though this simple implementation
/// shares a single lock; a sharded or per-session-actor store would split
/// it further without changing the trait contract).
#[derive(Default)]
pub struct InMemoryEventStore {
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, mut event: Event) -> CoreResult<Event> {
        let mut sessions = self.sessions.lock().await;
        let slot = sessions.entry(event.session_id.clone()).or_default();
        if slot.fail_next {
            slot.fail_next = false;
            return Err(CoreError::SessionCapacityError {
                session_id: event.session_id.clone(),
            });
        }
        slot.next_sequence += 1;
        event.sequence = slot.next_sequence;
        slot.events.push(event.clone());
        Ok(event)
    }

    async fn get_by_session(&self, session_id: &str, limit: usize) -> CoreResult<Vec<Event>> {
        let sessions = self.sessions.lock().await;
        let slot = sessions.get(session_id);
        Ok(slot
            .map(|s| {
                let start = s.events.len().saturating_sub(limit);
                s.events[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn get_by_type(
        &self,
        session_id: &str,
        event_type: EventType,
        limit: usize,
    ) -> CoreResult<Vec<Event>> {
        let sessions = self.sessions.lock().await;
        let slot = sessions.get(session_id);
        Ok(slot
            .map(|s| {
                let mut matched: Vec<Event> = s
                    .events
                    .iter()
                    .filter(|e| e.event_type == event_type)
                    .cloned()
                    .collect();
                let start = matched.len().saturating_sub(limit);
                matched.split_off(start)
            })
            .unwrap_or_default())
    }

    async fn get_after_sequence(
        &self,
        session_id: &str,
        after_seq: u64,
        limit: usize,
    ) -> CoreResult<Vec<Event>> {
        let sessions = self.sessions.lock().await;
        let slot = sessions.get(session_id);
        Ok(slot
            .map(|s| {
                s.events
                    .iter()
                    .filter(|e| e.sequence > after_seq)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_next_sequence(&self, session_id: &str) -> CoreResult<u64> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(session_id).map(|s| s.next_sequence).unwrap_or(0))
    }

    async fn set_sequence(&self, session_id: &str, seq: u64) -> CoreResult<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(session_id.to_string()).or_default().next_sequence = seq;
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> CoreResult<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(session_id);
        Ok(())
    }

    async fn count(&self, session_id: &str) -> CoreResult<usize> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(session_id).map(|s| s.events.len()).unwrap_or(0))
    }

    async fn prune(&self, session_id: &str, strategy: PruneStrategy) -> CoreResult<()> {
        let mut sessions = self.sessions.lock().await;
        if let Some(slot) = sessions.get_mut(session_id) {
            match strategy {
                PruneStrategy::ByCount { keep } => {
                    let start = slot.events.len().saturating_sub(keep);
                    slot.events.drain(0..start);
                }
                PruneStrategy::ByType { keep_types } => {
                    slot.events.retain(|e| keep_types.contains(&e.event_type));
                }
                PruneStrategy::BeforeSequence { seq } => {
                    slot.events.retain(|e| e.sequence >= seq);
                }
                PruneStrategy::KeepIds { ids } => {
                    slot.events.retain(|e| ids.contains(&e.event_id));
                }
            }
            slot.events.sort_by_key(|e| e.sequence);
        }
        Ok(())
    }

    async fn fail_next_append(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(session_id.to_string()).or_default().fail_next = true;
    }
}

/// Per-session, append-only, monotonically-sequenced fact store
/// (component design §4.1). Thin wrapper over a pluggable [`EventStore`]
/// that owns the read-limit validation and auto-pruning policy so every
/// store implementation gets them for free.
pub struct EventLog {
    store: Arc<dyn EventStore>,
    /// Auto-prune threshold, overridable via `WE_EVENT_LOG_MAX_SIZE`.
    max_events_per_session: usize,
}

impl EventLog {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            max_events_per_session: MAX_EVENTS_PER_SESSION,
        }
    }

    pub fn with_max_events(store: Arc<dyn EventStore>, max_events_per_session: usize) -> Self {
        Self {
            store,
            max_events_per_session,
        }
    }

    pub async fn append(
        &self,
        session_id: &str,
        event_type: EventType,
        speaker: Speaker,
        content: EventContent,
        meta: EventMeta,
    ) -> CoreResult<Event> {
        let event = Event::new(session_id.to_string(), event_type, speaker, content, meta);
        let appended = self.store.append(event).await?;
        self.auto_prune(session_id).await?;
        Ok(appended)
    }

    async fn auto_prune(&self, session_id: &str) -> CoreResult<()> {
        let count = self.store.count(session_id).await?;
        if count <= self.max_events_per_session {
            return Ok(());
        }
        // Retain every SUMMARY event unconditionally plus the most recent
        // half of everything else (component design §4.1). `Math.floor`
        // truncation plus unconditional SUMMARY retention can leave the
        // post-prune count slightly above half — preserved intentionally,
        // see design notes §9. The keep-set is pruned by exact event id
        // rather than a sequence threshold: a retained SUMMARY can have a
        // lower sequence than non-summary events that must still be
        // dropped, which no single `BeforeSequence { seq }` cut can express.
        let keep_non_summary = self.max_events_per_session / 2;
        let all = self.store.get_by_session(session_id, count).await?;
        let (summaries, rest): (Vec<Event>, Vec<Event>) = all
            .into_iter()
            .partition(|e| e.event_type == EventType::Summary);
        let rest_start = rest.len().saturating_sub(keep_non_summary);
        let ids: HashSet<Uuid> = summaries
            .iter()
            .chain(&rest[rest_start..])
            .map(|e| e.event_id)
            .collect();

        self.store.prune(session_id, PruneStrategy::KeepIds { ids }).await?;
        let after = self.store.count(session_id).await?;
        info!(session_id, before = count, after, "auto-pruned event log");
        Ok(())
    }

    pub async fn get_recent(&self, session_id: &str, limit: usize) -> CoreResult<Vec<Event>> {
        self.validate_limit(limit)?;
        self.store.get_by_session(session_id, limit).await
    }

    pub async fn get_by_type(
        &self,
        session_id: &str,
        event_type: EventType,
        limit: usize,
    ) -> CoreResult<Vec<Event>> {
        self.validate_limit(limit)?;
        self.store.get_by_type(session_id, event_type, limit).await
    }

    pub async fn get_after_sequence(
        &self,
        session_id: &str,
        after_seq: u64,
        limit: usize,
    ) -> CoreResult<Vec<Event>> {
        self.validate_limit(limit)?;
        self.store
            .get_after_sequence(session_id, after_seq, limit)
            .await
    }

    pub async fn get_current_sequence(&self, session_id: &str) -> CoreResult<u64> {
        self.store.get_next_sequence(session_id).await
    }

    pub async fn count(&self, session_id: &str) -> CoreResult<usize> {
        self.store.count(session_id).await
    }

    pub async fn clear(&self, session_id: &str) -> CoreResult<()> {
        self.store.clear(session_id).await
    }

    pub async fn prune(&self, session_id: &str, strategy: PruneStrategy) -> CoreResult<()> {
        self.store.prune(session_id, strategy).await
    }

    pub async fn fail_next_append(&self, session_id: &str) {
        self.store.fail_next_append(session_id).await
    }

    fn validate_limit(&self, limit: usize) -> CoreResult<()> {
        if limit == 0 || limit > MAX_LIMIT {
            return Err(CoreError::InvalidLimit { limit });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventContent;

    fn store() -> EventLog {
        EventLog::new(Arc::new(InMemoryEventStore::new()))
    }

    #[tokio::test]
    async fn append_assigns_gap_free_increasing_sequence() {
        let log = store();
        let e1 = log
            .append(
                "s1",
                EventType::Speech,
                Speaker::Agent("a".into()),
                EventContent::Summary { text: "1".into() },
                EventMeta::default(),
            )
            .await
            .unwrap();
        let e2 = log
            .append(
                "s1",
                EventType::Speech,
                Speaker::Agent("a".into()),
                EventContent::Summary { text: "2".into() },
                EventMeta::default(),
            )
            .await
            .unwrap();
        assert_eq!(e1.sequence, 1);
        assert_eq!(e2.sequence, 2);
    }

    #[tokio::test]
    async fn get_recent_rejects_invalid_limits() {
        let log = store();
        assert!(log.get_recent("s1", 0).await.is_err());
        assert!(log.get_recent("s1", MAX_LIMIT + 1).await.is_err());
        assert!(log.get_recent("s1", MAX_LIMIT).await.is_ok());
    }

    #[tokio::test]
    async fn auto_prune_retains_summaries_and_recent_half() {
        // S3: MAX_EVENTS_PER_SESSION=10, 9 speeches, then 1 summary (seq 10),
        // then 5 more speeches (seq 11..15). Expect exactly 6 events retained:
        // the summary plus the 5 newest speeches.
        let log = EventLog::with_max_events(Arc::new(InMemoryEventStore::new()), 10);
        for i in 0..9 {
            log.append(
                "s1",
                EventType::Speech,
                Speaker::Agent("a".into()),
                EventContent::Summary {
                    text: format!("speech {i}"),
                },
                EventMeta::default(),
            )
            .await
            .unwrap();
        }
        log.append(
            "s1",
            EventType::Summary,
            Speaker::Moderator,
            EventContent::Summary {
                text: "digest".into(),
            },
            EventMeta::default(),
        )
        .await
        .unwrap();
        for i in 0..5 {
            log.append(
                "s1",
                EventType::Speech,
                Speaker::Agent("a".into()),
                EventContent::Summary {
                    text: format!("more {i}"),
                },
                EventMeta::default(),
            )
            .await
            .unwrap();
        }

        let remaining = log.get_recent("s1", MAX_LIMIT).await.unwrap();
        assert_eq!(remaining.len(), 6);
        assert!(remaining.iter().any(|e| e.event_type == EventType::Summary));
        assert_eq!(log.get_current_sequence("s1").await.unwrap(), 15);
    }

    #[tokio::test]
    async fn auto_prune_bounds_log_when_summary_sequence_is_below_dropped_events() {
        // A SUMMARY early in the session (low sequence) must not keep every
        // later non-summary event alive: the keep-set is "this SUMMARY plus
        // the newest half of the rest", not "everything from this SUMMARY's
        // sequence onward".
        let log = EventLog::with_max_events(Arc::new(InMemoryEventStore::new()), 10);
        log.append(
            "s1",
            EventType::Summary,
            Speaker::Moderator,
            EventContent::Summary {
                text: "early digest".into(),
            },
            EventMeta::default(),
        )
        .await
        .unwrap();
        for i in 0..20 {
            log.append(
                "s1",
                EventType::Speech,
                Speaker::Agent("a".into()),
                EventContent::Summary {
                    text: format!("speech {i}"),
                },
                EventMeta::default(),
            )
            .await
            .unwrap();
        }

        let remaining = log.get_recent("s1", MAX_LIMIT).await.unwrap();
        assert_eq!(remaining.len(), 6, "summary plus newest 5 speeches, not every speech after it");
        assert!(remaining.iter().any(|e| e.event_type == EventType::Summary));
        assert!(log.count("s1").await.unwrap() <= 10 + 1);
    }

    #[tokio::test]
    async fn sequence_never_rolls_back_after_prune() {
        let log = EventLog::with_max_events(Arc::new(InMemoryEventStore::new()), 4);
        for i in 0..8 {
            log.append(
                "s1",
                EventType::Speech,
                Speaker::Agent("a".into()),
                EventContent::Summary {
                    text: format!("{i}"),
                },
                EventMeta::default(),
            )
            .await
            .unwrap();
        }
        let next = log
            .append(
                "s1",
                EventType::Speech,
                Speaker::Agent("a".into()),
                EventContent::Summary { text: "9".into() },
                EventMeta::default(),
            )
            .await
            .unwrap();
        assert_eq!(next.sequence, 9);
    }

    #[tokio::test]
    async fn fail_next_append_rejects_exactly_one_append() {
        let log = store();
        log.fail_next_append("s1").await;
        assert!(log
            .append(
                "s1",
                EventType::System,
                Speaker::Moderator,
                EventContent::system("SESSION_ABORTED", None),
                EventMeta::default(),
            )
            .await
            .is_err());
        assert!(log
            .append(
                "s1",
                EventType::System,
                Speaker::Moderator,
                EventContent::system("SESSION_ABORTED", None),
                EventMeta::default(),
            )
            .await
            .is_ok());
    }
}
