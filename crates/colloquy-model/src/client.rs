// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::{CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseEvent, ModelError>> + Send>>;

/// Everything that can go wrong invoking a model, modeled so callers can
/// decide whether to retry, back off, or surface the failure as a session
/// event without attempting a second call.
#[derive(Debug, Error, Clone)]
pub enum ModelError {
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited, retry after {retry_after_ms:?}ms")]
    RateLimit { retry_after_ms: Option<u64> },

    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("requested capability not supported by this client: {0}")]
    NotSupported(String),

    #[error("model API error: {0}")]
    ApiError(String),

    #[error("invalid request: {0}")]
    Validation(String),
}

impl ModelError {
    /// Whether retrying the same request has any chance of succeeding.
    /// [`ModelError::AuthError`] and [`ModelError::Validation`] never do —
    /// the request itself is the problem, not the moment it was sent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Timeout(_) | ModelError::RateLimit { .. })
    }
}

/// A capability a [`ModelClient`] may or may not support, used for
/// feature-detection without a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Streaming,
    Embeddings,
}

/// Abstract model-invocation surface. The discussion engine is deliberately
/// ignorant of what sits behind this trait — HTTP client, local model
/// runtime, or a test double — so long as it can turn a transcript into a
/// reply.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Human-readable identifier for logs and session metadata.
    fn name(&self) -> &str;

    /// Run a request to completion and return the final text, ignoring
    /// intermediate deltas. Default implementation drains [`Self::chat_stream`].
    async fn chat(&self, req: CompletionRequest) -> Result<String, ModelError> {
        use futures::StreamExt;
        let mut stream = self.chat_stream(req).await?;
        let mut final_text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(_) => {}
                ResponseEvent::Done { text, .. } => final_text = text,
            }
        }
        Ok(final_text)
    }

    /// Run a request, returning a stream of incremental events.
    async fn chat_stream(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError>;

    /// Embed a batch of strings into vectors, used by collaborators that
    /// cluster or rank contributions. Not all clients implement this;
    /// callers should check [`Self::has_capability`] first.
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        Err(ModelError::NotSupported("embed".into()))
    }

    /// Cheap liveness/auth check, used by configuration validation before a
    /// session starts so a bad credential fails fast rather than mid-turn.
    async fn test_connection(&self) -> Result<(), ModelError> {
        Ok(())
    }

    fn has_capability(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Streaming)
    }
}
