// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::client::{ModelClient, ModelError, ResponseStream};
use crate::{CompletionRequest, FinishReason, ResponseEvent, TokenUsage};

/// Deterministic mock client for tests and the demo binary. Echoes the last
/// user message back prefixed with its own name.
#[derive(Debug, Clone)]
pub struct MockModelClient {
    name: String,
}

impl MockModelClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for MockModelClient {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat_stream(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError> {
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::Role::User))
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "[no input]".to_string());

        let text = format!("[{}] {}", self.name, last_user);
        let events: Vec<Result<ResponseEvent, ModelError>> = vec![
            Ok(ResponseEvent::TextDelta(text.clone())),
            Ok(ResponseEvent::Done {
                text,
                finish_reason: FinishReason::Stop,
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 10,
                },
            }),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted model client. Each call to [`ModelClient::chat_stream`]
/// pops the next response off the front of the queue, letting tests pin
/// down exact agent replies without any nondeterminism.
pub struct ScriptedModelClient {
    name: String,
    scripts: Arc<Mutex<VecDeque<String>>>,
    /// The most recent request this client received, for test assertions.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedModelClient {
    pub fn new(name: impl Into<String>, scripts: Vec<String>) -> Self {
        Self {
            name: name.into(),
            scripts: Arc::new(Mutex::new(scripts.into_iter().collect())),
            last_request: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat_stream(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError> {
        *self.last_request.lock().unwrap() = Some(req);

        let text = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "[scripted responses exhausted]".to_string());

        let events: Vec<Result<ResponseEvent, ModelError>> = vec![
            Ok(ResponseEvent::TextDelta(text.clone())),
            Ok(ResponseEvent::Done {
                text,
                finish_reason: FinishReason::Stop,
                usage: TokenUsage::default(),
            }),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompletionRequest, Message};

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let client = MockModelClient::new("echo");
        let req = CompletionRequest::new(vec![
            Message::system("you are a test"),
            Message::user("hello there"),
        ]);
        let reply = client.chat(req).await.unwrap();
        assert_eq!(reply, "[echo] hello there");
    }

    #[tokio::test]
    async fn scripted_client_returns_requests_in_order() {
        let client =
            ScriptedModelClient::new("scripted", vec!["first".into(), "second".into()]);
        let first = client
            .chat(CompletionRequest::new(vec![Message::user("a")]))
            .await
            .unwrap();
        let second = client
            .chat(CompletionRequest::new(vec![Message::user("b")]))
            .await
            .unwrap();
        assert_eq!(first, "first");
        assert_eq!(second, "second");
    }

    #[tokio::test]
    async fn scripted_client_records_last_request() {
        let client = ScriptedModelClient::new("scripted", vec!["ok".into()]);
        client
            .chat(CompletionRequest::new(vec![Message::user("tracked")]))
            .await
            .unwrap();
        let last = client.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(last.messages[0].content, "tracked");
    }
}
