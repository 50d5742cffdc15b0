//! Structured error model for the research engine.
//!
//! A single enum covers every failure mode a research session can hit:
//! cancellation, transient LLM/tool failures, command-validation rejection,
//! event-store version conflicts, planning failures, and fatal/unrecoverable
//! errors. Each variant carries a [`ErrorCategory`] so callers can decide
//! retry-vs-abort without matching on every variant individually.

/// Broad classification of a [`ResearchError`], used by callers (retry
/// helpers, orchestrators) that need to decide how to react without
/// enumerating every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Ambient cancellation; never retried, always propagated unchanged.
    Cancelled,
    /// External LLM/tool failure that may succeed on retry.
    Transient,
    /// Caller supplied an invalid command or argument; retrying with the
    /// same input will not help.
    User,
    /// Internal invariant violation or unrecoverable infrastructure error.
    System,
    /// Domain-level rejection (e.g. a command rejected by the aggregate's
    /// state machine).
    Business,
}

/// The research engine's unified error type.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    /// The ambient cancellation context was cancelled. Surfaced to the
    /// caller unchanged; whatever was persisted before cancellation stays
    /// persisted.
    #[error("research session cancelled")]
    Cancelled,

    /// An LLM chat call failed. Sub-researchers fail outright on this;
    /// supervisors continue with whatever notes they already have.
    #[error("LLM call failed: {message}")]
    LlmFailure { message: String },

    /// A tool execution failed. Tool failures never terminate an agent;
    /// they are recorded as tool output and the loop continues.
    #[error("tool '{tool}' failed: {message}")]
    ToolFailure { tool: String, message: String },

    /// A command was rejected by the research-state aggregate because the
    /// aggregate was not in a precondition status. State is never mutated
    /// when this is returned.
    #[error("command '{command}' invalid in status {status}: {reason}")]
    CommandValidation {
        command: String,
        status: String,
        reason: String,
    },

    /// `AppendEvents` observed a stored version different from the caller's
    /// `expected_version`.
    #[error("version conflict on aggregate {aggregate_id}: expected {expected}, found {found}")]
    VersionConflict {
        aggregate_id: String,
        expected: u64,
        found: u64,
    },

    /// Perspective discovery returned malformed output; callers substitute
    /// the default 3-perspective plan (Technical Expert, Practical User,
    /// Critic) and continue rather than propagating this further.
    #[error("planning failed: {reason}")]
    PlanningFailure { reason: String },

    /// Configuration failed to load or did not pass validation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed, un-parseable, or schema-violating data encountered at a
    /// serialization boundary (event payloads, wire-format blocks).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unrecoverable error: the process cannot continue (e.g. the event
    /// store is unreachable during resume).
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl ResearchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ResearchError::Cancelled => ErrorCategory::Cancelled,
            ResearchError::LlmFailure { .. } | ResearchError::ToolFailure { .. } => {
                ErrorCategory::Transient
            }
            ResearchError::CommandValidation { .. } => ErrorCategory::Business,
            ResearchError::VersionConflict { .. } => ErrorCategory::Transient,
            ResearchError::PlanningFailure { .. } => ErrorCategory::Business,
            ResearchError::Configuration(_) | ResearchError::Serialization(_) => {
                ErrorCategory::User
            }
            ResearchError::Fatal(_) => ErrorCategory::System,
        }
    }

    /// Whether a caller should consider retrying the operation that
    /// produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }

    pub fn llm(message: impl Into<String>) -> Self {
        ResearchError::LlmFailure {
            message: message.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        ResearchError::ToolFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn command_validation(
        command: impl Into<String>,
        status: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ResearchError::CommandValidation {
            command: command.into(),
            status: status.into(),
            reason: reason.into(),
        }
    }

    pub fn version_conflict(aggregate_id: impl Into<String>, expected: u64, found: u64) -> Self {
        ResearchError::VersionConflict {
            aggregate_id: aggregate_id.into(),
            expected,
            found,
        }
    }
}

impl From<rusqlite::Error> for ResearchError {
    fn from(e: rusqlite::Error) -> Self {
        ResearchError::Fatal(format!("sqlite error: {e}"))
    }
}

impl From<serde_json::Error> for ResearchError {
    fn from(e: serde_json::Error) -> Self {
        ResearchError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for ResearchError {
    fn from(e: reqwest::Error) -> Self {
        ResearchError::LlmFailure {
            message: e.to_string(),
        }
    }
}

impl From<std::io::Error> for ResearchError {
    fn from(e: std::io::Error) -> Self {
        ResearchError::Fatal(format!("io error: {e}"))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ResearchError>;

/// Exponential backoff with jitter for transient LLM/tool failures.
pub mod retry {
    use super::{ErrorCategory, ResearchError, Result};
    use rand::Rng;
    use std::future::Future;

    /// Retries `f` up to `max_attempts` times (including the first try),
    /// doubling the delay each time starting from `base_delay` and adding
    /// up to 50ms of jitter, matching the reference error handler's backoff
    /// shape. Only retries errors classified [`ErrorCategory::Transient`].
    pub async fn with_backoff<F, Fut, T>(
        max_attempts: u32,
        base_delay: std::time::Duration,
        mut f: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < max_attempts && e.category() == ErrorCategory::Transient => {
                    let jitter_ms = rand::thread_rng().gen_range(0..50);
                    let delay = base_delay * 2u32.pow(attempt - 1)
                        + std::time::Duration::from_millis(jitter_ms);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Default configuration for [`with_backoff`]: 3 attempts, 100ms base.
    pub async fn with_default_backoff<F, Fut, T>(f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_backoff(3, std::time::Duration::from_millis(100), f).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping_matches_spec_error_kinds() {
        assert_eq!(ResearchError::Cancelled.category(), ErrorCategory::Cancelled);
        assert_eq!(ResearchError::llm("x").category(), ErrorCategory::Transient);
        assert_eq!(
            ResearchError::tool("search", "x").category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            ResearchError::command_validation("Start", "searching", "bad")
                .category(),
            ErrorCategory::Business
        );
        assert_eq!(
            ResearchError::version_conflict("agg-1", 2, 3).category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            ResearchError::PlanningFailure {
                reason: "malformed".into()
            }
            .category(),
            ErrorCategory::Business
        );
        assert_eq!(
            ResearchError::Fatal("down".into()).category(),
            ErrorCategory::System
        );
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(ResearchError::llm("x").is_retryable());
        assert!(!ResearchError::Cancelled.is_retryable());
        assert!(!ResearchError::command_validation("a", "b", "c").is_retryable());
    }

    #[tokio::test]
    async fn with_backoff_retries_transient_and_gives_up_after_max_attempts() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<()> = retry::with_backoff(
            3,
            std::time::Duration::from_millis(1),
            || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(ResearchError::llm("still failing")) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_backoff_does_not_retry_non_transient_errors() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<()> = retry::with_backoff(
            3,
            std::time::Duration::from_millis(1),
            || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(ResearchError::command_validation("a", "b", "c")) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
