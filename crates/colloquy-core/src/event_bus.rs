// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::warn;

use crate::event::{Event, EventType, SessionId};
use crate::errors::{CoreError, CoreResult};

/// Subscriber mailbox depth. A subscriber that falls this far behind starts
/// losing transient events first (component design §5 back-pressure).
const MAILBOX_CAPACITY: usize = 256;

/// Per-emitter subscriber ceiling, guarding against runaway subscription.
const MAX_SUBSCRIBERS: usize = 100;

/// A live subscription. Each subscriber owns a bounded mailbox rather than
/// a synchronous callback, matching the engine's message-passing fan-out
/// (design notes §9): `publish` enqueues a clone of the event into every
/// matching mailbox instead of invoking subscriber code inline.
pub struct Subscription {
    pub receiver: mpsc::Receiver<Event>,
    token: u64,
    scope: SubscriptionScope,
}

impl Subscription {
    pub fn token(&self) -> u64 {
        self.token
    }
}

#[derive(Clone)]
enum SubscriptionScope {
    All,
    Type(EventType),
    Session(SessionId),
}

struct Slot {
    sender: mpsc::Sender<Event>,
    scope: SubscriptionScope,
}

/// Publish/subscribe dispatcher over [`Event`]s (component design §4.2).
///
/// Delivery within one session is in `sequence` order because `publish` is
/// only ever called by `EventLog::append`'s caller immediately after the
/// event receives its sequence number, and the bus iterates a snapshot of
/// its subscriber list so a handler that unsubscribes itself mid-delivery
/// cannot deadlock the publisher.
pub struct EventBus {
    next_token: AtomicU64,
    slots: Mutex<HashMap<u64, Slot>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe_scoped(&self, scope: SubscriptionScope) -> CoreResult<Subscription> {
        let mut slots = self.slots.lock().unwrap();
        if slots.len() >= MAX_SUBSCRIBERS {
            return Err(CoreError::Handler(format!(
                "subscriber limit of {MAX_SUBSCRIBERS} reached"
            )));
        }
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        slots.insert(
            token,
            Slot {
                sender: tx,
                scope: scope.clone(),
            },
        );
        Ok(Subscription {
            receiver: rx,
            token,
            scope,
        })
    }

    pub fn subscribe(&self) -> CoreResult<Subscription> {
        self.subscribe_scoped(SubscriptionScope::All)
    }

    pub fn subscribe_to_type(&self, event_type: EventType) -> CoreResult<Subscription> {
        self.subscribe_scoped(SubscriptionScope::Type(event_type))
    }

    pub fn subscribe_to_session(&self, session_id: impl Into<SessionId>) -> CoreResult<Subscription> {
        self.subscribe_scoped(SubscriptionScope::Session(session_id.into()))
    }

    /// Remove a subscription. Idempotent: unsubscribing an already-removed
    /// or never-registered token is a no-op, not an error.
    pub fn unsubscribe(&self, token: u64) {
        self.slots.lock().unwrap().remove(&token);
    }

    pub fn clear_session(&self, session_id: &str) {
        self.slots
            .lock()
            .unwrap()
            .retain(|_, slot| !matches!(&slot.scope, SubscriptionScope::Session(s) if s == session_id));
    }

    /// Deliver `event` to every matching subscriber. Transient events are
    /// dropped for a subscriber whose mailbox is full; persisted events
    /// that cannot be enqueued disconnect that subscriber instead of
    /// blocking the publisher (component design §5 back-pressure).
    pub fn publish(&self, event: Event) {
        let matching: Vec<(u64, mpsc::Sender<Event>)> = {
            let slots = self.slots.lock().unwrap();
            slots
                .iter()
                .filter(|(_, slot)| matches(&slot.scope, &event))
                .map(|(token, slot)| (*token, slot.sender.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (token, sender) in matching {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) if event.meta.transient => {
                    // drop transient events silently for a lagging subscriber
                }
                Err(_) => {
                    warn!(token, "subscriber mailbox stalled, disconnecting");
                    dead.push(token);
                }
            }
        }
        if !dead.is_empty() {
            let mut slots = self.slots.lock().unwrap();
            for token in dead {
                slots.remove(&token);
            }
        }
    }
}

fn matches(scope: &SubscriptionScope, event: &Event) -> bool {
    match scope {
        SubscriptionScope::All => true,
        SubscriptionScope::Type(t) => *t == event.event_type,
        SubscriptionScope::Session(s) => *s == event.session_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventContent, EventMeta, Speaker};

    fn sample_event(session_id: &str, transient: bool) -> Event {
        let mut e = Event::new(
            session_id.to_string(),
            EventType::Speech,
            Speaker::Agent("a".into()),
            EventContent::Summary { text: "hi".into() },
            EventMeta {
                transient,
                ..Default::default()
            },
        );
        e.sequence = 1;
        e
    }

    #[tokio::test]
    async fn session_subscriber_only_receives_its_session() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_to_session("s1").unwrap();
        bus.publish(sample_event("s2", false));
        bus.publish(sample_event("s1", false));
        let received = sub.receiver.recv().await.unwrap();
        assert_eq!(received.session_id, "s1");
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let sub = bus.subscribe().unwrap();
        let token = sub.token();
        bus.unsubscribe(token);
        bus.unsubscribe(token);
    }

    #[tokio::test]
    async fn type_subscriber_filters_by_event_type() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_to_type(EventType::Speech).unwrap();
        let mut other = Event::new(
            "s1".into(),
            EventType::RoundAdvance,
            Speaker::Moderator,
            EventContent::system("ROUND_ADVANCE", None),
            EventMeta::default(),
        );
        other.sequence = 1;
        bus.publish(other);
        bus.publish(sample_event("s1", false));
        let received = sub.receiver.recv().await.unwrap();
        assert_eq!(received.event_type, EventType::Speech);
    }

    #[tokio::test]
    async fn subscriber_limit_is_enforced() {
        let bus = EventBus::new();
        let mut kept = Vec::new();
        for _ in 0..MAX_SUBSCRIBERS {
            kept.push(bus.subscribe().unwrap());
        }
        assert!(bus.subscribe().is_err());
    }
}
