// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// End-to-end tests driving the real `SessionManager`/`DiscussionLoop`/
/// `EventBus` wiring together, with scripted agents standing in for model
/// calls.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use colloquy_config::{load_scenario_str, DiscussionRules, Scenario};
use colloquy_core::{
    Agent, AgentContext, AgentReply, AgentState, CoreResult, Event, EventBus, EventLog, EventType,
    InMemoryEventStore, ModeratorController, SessionConfig, SessionId, SessionManager, SessionStatus,
};
use tokio::sync::Mutex;

const DEBATE_SCENARIO: &str = r#"
id: debate-1
topic: "Should standups be written, not spoken?"
phases:
  - id: opening
    speaking_order: round-robin
rules:
  min_rounds: 1
  max_rounds: 2
  speak_interval_ms: 0
  no_progress_timeout_ms: 5000
"#;

/// An agent whose replies are drawn from a fixed script, one line per turn,
/// looping once exhausted. Stands in for a real model call in these tests.
struct ScriptedAgent {
    id: String,
    lines: Vec<String>,
    context: Mutex<AgentContext>,
    turns_taken: Mutex<u32>,
}

impl ScriptedAgent {
    fn new(id: &str, lines: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            lines: lines.iter().map(|s| s.to_string()).collect(),
            context: Mutex::new(AgentContext::new(id, format!("You are {id}."))),
            turns_taken: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.id
    }
    fn role(&self) -> &str {
        "participant"
    }

    async fn initialize(&self, _session_id: &SessionId) -> CoreResult<()> {
        Ok(())
    }

    async fn receive_event(&self, event: Event) {
        self.context.lock().await.observe(event);
    }

    async fn generate_response(&self) -> CoreResult<AgentReply> {
        let mut turns = self.turns_taken.lock().await;
        let line = &self.lines[*turns as usize % self.lines.len()];
        *turns += 1;
        Ok(AgentReply {
            content: line.clone(),
            tokens: None,
        })
    }

    async fn state(&self) -> AgentState {
        AgentState::new(self.id.clone())
    }
    async fn reset(&self) {}
    async fn destroy(&self) {}
}

fn scenario(text: &str) -> Scenario {
    load_scenario_str(text).expect("fixture scenario must parse")
}

fn wiring() -> (SessionManager, Arc<EventLog>, Arc<EventBus>) {
    let event_log = Arc::new(EventLog::new(Arc::new(InMemoryEventStore::new())));
    let event_bus = Arc::new(EventBus::new());
    let moderator = Arc::new(ModeratorController::new(event_log.clone(), event_bus.clone()));
    let manager = SessionManager::new(moderator, event_log.clone(), event_bus.clone());
    (manager, event_log, event_bus)
}

#[tokio::test]
async fn round_robin_session_runs_to_completion_and_logs_speech() {
    let (manager, event_log, _bus) = wiring();

    let alice = Arc::new(ScriptedAgent::new("alice", &["writing beats talking", "and it's searchable later"]));
    let bob = Arc::new(ScriptedAgent::new("bob", &["but it loses tone and nuance"]));

    let session_id = manager
        .create(SessionConfig {
            topic: "debate".into(),
            scenario: scenario(DEBATE_SCENARIO),
            agents: vec![alice, bob],
            max_rounds: None,
            enable_streaming: Some(false),
        })
        .await
        .expect("session creation must succeed");

    manager.start(&session_id).await.expect("session must start");

    // Poll until the session reaches a terminal state or the test times out.
    let mut waited = Duration::ZERO;
    loop {
        let state = manager.get(&session_id).await.expect("session must exist");
        if state.is_terminal() {
            break;
        }
        assert!(waited < Duration::from_secs(5), "session never completed");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }

    let state = manager.get(&session_id).await.unwrap();
    assert_eq!(state.status, SessionStatus::Completed);

    let events = event_log.get_recent(&session_id, 100).await.unwrap();
    let speeches: Vec<_> = events.iter().filter(|e| e.event_type == EventType::Speech).collect();
    assert!(!speeches.is_empty(), "round-robin debate must produce speech events");

    let session_end = events.iter().find(|e| e.event_type == EventType::SessionEnd);
    assert!(session_end.is_some(), "a completed session must log a SESSION_END event");

    manager.delete(&session_id).await.unwrap();
}

#[tokio::test]
async fn ending_a_session_early_still_stops_the_scheduler() {
    let (manager, event_log, _bus) = wiring();
    let mut rules = DiscussionRules::default();
    rules.max_rounds = 1000;

    let mut long_scenario = scenario(DEBATE_SCENARIO);
    long_scenario.rules = rules;

    let agent = Arc::new(ScriptedAgent::new("alice", &["still going"]));
    let session_id = manager
        .create(SessionConfig {
            topic: "long debate".into(),
            scenario: long_scenario,
            agents: vec![agent],
            max_rounds: None,
            enable_streaming: Some(false),
        })
        .await
        .unwrap();
    manager.start(&session_id).await.unwrap();

    // Let a couple of turns run, then end the session out from under the loop.
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.end(&session_id, "cut short for a test").await.unwrap();

    let state = manager.get(&session_id).await.unwrap();
    assert!(state.is_terminal());

    let events = event_log.get_recent(&session_id, 200).await.unwrap();
    let aborted_count = events.len();
    // Give any straggling in-flight turn a moment, then confirm the log
    // stopped growing — the scheduler task actually exited.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let events_after = event_log.get_recent(&session_id, 200).await.unwrap();
    assert_eq!(events_after.len(), aborted_count, "scheduler must stop appending after end()");

    manager.delete(&session_id).await.unwrap();
}
