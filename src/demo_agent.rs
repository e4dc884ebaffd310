// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use colloquy_core::{Agent, AgentContext, AgentReply, AgentState, CoreResult, Event, SessionId};
use colloquy_model::{CompletionRequest, Message, ModelClient};
use tokio::sync::Mutex;

/// A participant backed by a single [`ModelClient`] call per turn.
///
/// Everything the engine is allowed to see about how a turn is produced —
/// what context went in, what reply came out — passes through this type;
/// anything else (prompting strategy, retries, context trimming) is this
/// type's own business, per the `Agent` trait's contract.
pub struct ModelAgent {
    id: String,
    name: String,
    role: String,
    stance: Option<String>,
    model: Arc<dyn ModelClient>,
    context: Mutex<AgentContext>,
    state: Mutex<AgentState>,
}

impl ModelAgent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
        stance: Option<String>,
        system_prompt: impl Into<String>,
        model: Arc<dyn ModelClient>,
    ) -> Self {
        let id = id.into();
        let context = AgentContext::new(id.clone(), system_prompt);
        let state = AgentState::new(id.clone());
        Self {
            id,
            name: name.into(),
            role: role.into(),
            stance,
            model,
            context: Mutex::new(context),
            state: Mutex::new(state),
        }
    }
}

#[async_trait]
impl Agent for ModelAgent {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn role(&self) -> &str {
        &self.role
    }
    fn stance(&self) -> Option<&str> {
        self.stance.as_deref()
    }

    async fn initialize(&self, _session_id: &SessionId) -> CoreResult<()> {
        Ok(())
    }

    async fn receive_event(&self, event: Event) {
        self.context.lock().await.observe(event);
    }

    async fn generate_response(&self) -> CoreResult<AgentReply> {
        let ctx = self.context.lock().await;
        let mut messages = vec![Message::system(ctx.system_prompt.clone())];
        messages.extend(ctx.build_messages());
        drop(ctx);

        let request = CompletionRequest::new(messages);
        let content = self.model.chat(request).await?;
        let mut state = self.state.lock().await;
        state.speak_count += 1;
        state.last_active_at = Some(chrono::Utc::now());
        Ok(AgentReply {
            content,
            tokens: None,
        })
    }

    async fn state(&self) -> AgentState {
        self.state.lock().await.clone()
    }

    async fn reset(&self) {
        let mut ctx = self.context.lock().await;
        *ctx = AgentContext::new(self.id.clone(), ctx.system_prompt.clone());
        *self.state.lock().await = AgentState::new(self.id.clone());
    }

    async fn destroy(&self) {}
}
