// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use colloquy_model::{CompletionRequest, Message, ModelClient};

use crate::errors::CoreResult;
use crate::event::{Event, EventContent, EventMeta, EventType, Speaker};
use crate::event_bus::EventBus;
use crate::event_log::EventLog;

const OUTLINE_INSTRUCTION: &str =
    "Summarize the discussion so far as a short numbered outline of the points raised. \
     Reply with the outline text only.";

const SUMMARY_INSTRUCTION: &str =
    "Summarize the discussion so far in two or three sentences suitable for a newcomer. \
     Reply with the summary text only.";

fn judge_instruction(criteria: &str) -> String {
    format!(
        "Score the discussion so far against this criterion: \"{criteria}\". \
         Reply with a single integer from 0 to 10 followed by a one-sentence justification."
    )
}

const CONTEXT_WINDOW: usize = 50;

async fn recent_transcript(event_log: &EventLog, session_id: &str) -> CoreResult<String> {
    let events = event_log.get_recent(session_id, CONTEXT_WINDOW).await?;
    Ok(events
        .iter()
        .filter_map(|e| e.content.as_text().map(|text| format!("{}: {text}", e.speaker)))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Thin collaborator that distills the session so far into a structured
/// outline (component design §4.9). Holds no session state of its own; it
/// reads through `EventLog` and writes back through it, same as any other
/// event producer.
pub struct OutlineGenerator {
    model: Arc<dyn ModelClient>,
    event_log: Arc<EventLog>,
    event_bus: Arc<EventBus>,
}

impl OutlineGenerator {
    pub fn new(model: Arc<dyn ModelClient>, event_log: Arc<EventLog>, event_bus: Arc<EventBus>) -> Self {
        Self { model, event_log, event_bus }
    }

    pub async fn generate(&self, session_id: &str) -> CoreResult<Event> {
        let transcript = recent_transcript(&self.event_log, session_id).await?;
        let request = CompletionRequest::new(vec![
            Message::system(OUTLINE_INSTRUCTION),
            Message::user(transcript),
        ]);
        let outline = self.model.chat(request).await?;
        let event = self
            .event_log
            .append(
                session_id,
                EventType::OutlineGenerated,
                Speaker::Moderator,
                EventContent::Summary { text: outline },
                EventMeta::default(),
            )
            .await?;
        self.event_bus.publish(event.clone());
        Ok(event)
    }
}

/// Scores the session so far against a caller-supplied criterion and
/// writes the verdict back as a SYSTEM event (component design §4.9).
pub struct JudgeSystem {
    model: Arc<dyn ModelClient>,
    event_log: Arc<EventLog>,
    event_bus: Arc<EventBus>,
}

impl JudgeSystem {
    pub fn new(model: Arc<dyn ModelClient>, event_log: Arc<EventLog>, event_bus: Arc<EventBus>) -> Self {
        Self { model, event_log, event_bus }
    }

    pub async fn score(&self, session_id: &str, criteria: &str) -> CoreResult<Event> {
        let transcript = recent_transcript(&self.event_log, session_id).await?;
        let request = CompletionRequest::new(vec![
            Message::system(judge_instruction(criteria)),
            Message::user(transcript),
        ]);
        let verdict = self.model.chat(request).await?;
        let event = self
            .event_log
            .append(
                session_id,
                EventType::System,
                Speaker::Moderator,
                EventContent::system("JUDGE_SCORE", Some(verdict)),
                EventMeta::default(),
            )
            .await?;
        self.event_bus.publish(event.clone());
        Ok(event)
    }
}

/// Condenses the session so far into a short SUMMARY event (component
/// design §4.9), the same event type the auto-pruning policy in
/// [`crate::event_log::EventLog`] always retains.
pub struct SummaryService {
    model: Arc<dyn ModelClient>,
    event_log: Arc<EventLog>,
    event_bus: Arc<EventBus>,
}

impl SummaryService {
    pub fn new(model: Arc<dyn ModelClient>, event_log: Arc<EventLog>, event_bus: Arc<EventBus>) -> Self {
        Self { model, event_log, event_bus }
    }

    pub async fn summarize(&self, session_id: &str) -> CoreResult<Event> {
        let transcript = recent_transcript(&self.event_log, session_id).await?;
        let request = CompletionRequest::new(vec![
            Message::system(SUMMARY_INSTRUCTION),
            Message::user(transcript),
        ]);
        let text = self.model.chat(request).await?;
        let event = self
            .event_log
            .append(
                session_id,
                EventType::Summary,
                Speaker::Moderator,
                EventContent::Summary { text },
                EventMeta::default(),
            )
            .await?;
        self.event_bus.publish(event.clone());
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::InMemoryEventStore;
    use colloquy_model::MockModelClient;

    fn wiring() -> (Arc<EventLog>, Arc<EventBus>) {
        (
            Arc::new(EventLog::new(Arc::new(InMemoryEventStore::new()))),
            Arc::new(EventBus::new()),
        )
    }

    #[tokio::test]
    async fn outline_generator_appends_an_outline_generated_event() {
        let (log, bus) = wiring();
        log.append(
            "s1",
            EventType::Speech,
            Speaker::Agent("a".into()),
            EventContent::Speech {
                agent_id: "a".into(),
                agent_name: "A".into(),
                message: "we should consider cost first".into(),
                tokens: None,
                from_intent: false,
            },
            EventMeta::default(),
        )
        .await
        .unwrap();

        let model = Arc::new(MockModelClient::new("judge"));
        let outline = OutlineGenerator::new(model, log.clone(), bus);
        let event = outline.generate("s1").await.unwrap();
        assert_eq!(event.event_type, EventType::OutlineGenerated);
        assert_eq!(log.count("s1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn judge_system_appends_a_judge_score_system_event() {
        let (log, bus) = wiring();
        let model = Arc::new(MockModelClient::new("judge"));
        let judge = JudgeSystem::new(model, log.clone(), bus);
        let event = judge.score("s1", "persuasiveness").await.unwrap();
        assert_eq!(event.event_type, EventType::System);
        match event.content {
            EventContent::System { action, .. } => assert_eq!(action, "JUDGE_SCORE"),
            other => panic!("expected System content, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn summary_service_appends_a_summary_event() {
        let (log, bus) = wiring();
        let model = Arc::new(MockModelClient::new("summarizer"));
        let summary = SummaryService::new(model, log.clone(), bus);
        let event = summary.summarize("s1").await.unwrap();
        assert_eq!(event.event_type, EventType::Summary);
    }
}
