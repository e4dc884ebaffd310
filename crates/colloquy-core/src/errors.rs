// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// The engine's error taxonomy (component design §7). Each variant carries
/// its own propagation rule, documented on the variant rather than at call
/// sites: callers match on it to decide whether a session keeps running.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Scenario validation failure. Fails session creation; never reaches
    /// a running loop.
    #[error("configuration: {0}")]
    Configuration(#[from] colloquy_config::ConfigurationError),

    /// Session, agent or credential missing. The scheduler treats a
    /// missing agent as "skip and continue".
    #[error("not found: {0}")]
    NotFound(String),

    /// The model does not support a requested capability (streaming,
    /// embeddings). The scheduler degrades gracefully rather than failing
    /// the turn.
    #[error("capability unavailable: {0}")]
    Capability(String),

    /// Timeout, rate limit or 5xx from a model call, already retried by
    /// the model client. Exhausted retries surface here; the scheduler
    /// publishes a SYSTEM event and moves on without aborting the session.
    #[error("transient model failure: {0}")]
    TransientModel(#[from] colloquy_model::ModelError),

    /// Invalid credential. The session is not aborted; the next scheduler
    /// iteration simply tries the next agent.
    #[error("model authentication failed: {0}")]
    AuthModel(String),

    /// Event log write failure or state corruption. Triggers
    /// `abortSession`: the log is preserved for inspection, the session
    /// becomes read-only.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Raised by an `EventBus` subscriber. Logged with context and
    /// swallowed; delivery continues to other subscribers.
    #[error("event handler error: {0}")]
    Handler(String),

    /// A read `limit` was `<= 0` or greater than `MAX_LIMIT`. The caller's
    /// mistake, not a session-aborting condition — never fatal.
    #[error("invalid limit {limit}, must be in 1..=100")]
    InvalidLimit { limit: usize },

    /// The backing event store rejected an append. Event-log state may now
    /// be inconsistent for this session, so this is fatal and triggers
    /// `abortSession` the same as `Fatal`.
    #[error("event store rejected append for session {session_id}")]
    SessionCapacityError { session_id: String },
}

impl CoreError {
    /// Whether this error should abort the owning session outright, as
    /// opposed to being logged and skipped past.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Fatal(_) | CoreError::SessionCapacityError { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_limit_is_not_fatal() {
        assert!(!CoreError::InvalidLimit { limit: 0 }.is_fatal());
    }

    #[test]
    fn session_capacity_error_is_fatal() {
        assert!(CoreError::SessionCapacityError {
            session_id: "s1".into(),
        }
        .is_fatal());
    }
}
