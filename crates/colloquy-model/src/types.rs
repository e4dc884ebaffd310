// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Who produced a message in a chat transcript handed to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single plain-text message in the context sent to [`crate::ModelClient::chat`].
///
/// This engine never sends images or tool-call payloads to a model — what an
/// agent privately reasons about is its own business; the engine only ever
/// hands a model a system prompt plus the visible transcript it is allowed
/// to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }

    /// Rough token estimate, 4 characters per token. Used only for the
    /// engine's own context-budget bookkeeping, never forwarded to a
    /// provider's billing.
    pub fn approx_tokens(&self) -> u32 {
        (self.content.len() as u32 / 4).max(1)
    }
}

/// Options governing a single completion call. Kept intentionally small —
/// the engine does not expose provider-specific tuning knobs, only the
/// handful of parameters that affect how a turn is produced.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub stream: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            max_output_tokens: None,
            stream: true,
        }
    }
}

/// A full completion request: the transcript an agent wants to speak into.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub options: ChatOptions,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            options: ChatOptions::default(),
        }
    }
}

/// Final token accounting for a completed turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Why a model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Error,
}

/// A single streamed event from a model call.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// An incremental chunk of assistant text.
    TextDelta(String),
    /// The stream has ended; carries the accumulated final text, finish
    /// reason and token usage for the turn.
    Done {
        text: String,
        finish_reason: FinishReason,
        usage: TokenUsage,
    },
}
