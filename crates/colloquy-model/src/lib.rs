// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod client;
mod mock;
mod types;

pub use client::{Capability, ModelClient, ModelError, ResponseStream};
pub use mock::{MockModelClient, ScriptedModelClient};
pub use types::{
    ChatOptions, CompletionRequest, FinishReason, Message, ResponseEvent, Role, TokenUsage,
};
