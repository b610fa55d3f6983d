//! Error types for block assembly.
//!
//! `RenderError` is `Clone` on purpose: a block's assembly pledge is memoized
//! and shared, so one failure must be replayable to every awaiter. Contract
//! violations (serializing before assembly settles, unbalanced element
//! open/close) are panics, not errors - they are development-time bugs, never
//! recoverable render outcomes.

use std::fmt;

use thiserror::Error;

/// Failure of an assembly attempt or one of its tasks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// A placeholder resolver settled with an error.
    #[error("placeholder resolver failed: {0}")]
    Resolver(String),

    /// A pre-assembly task (pre-task list entry or element pre-assemble hook)
    /// failed; content tasks for that walk never started.
    #[error("pre-assembly task failed: {0}")]
    PreAssembly(String),

    /// A content task (deferred element content or nested block assembly)
    /// failed.
    #[error("content task failed: {0}")]
    Content(String),
}

impl RenderError {
    pub fn resolver(message: impl fmt::Display) -> Self {
        RenderError::Resolver(message.to_string())
    }

    pub fn pre_assembly(message: impl fmt::Display) -> Self {
        RenderError::PreAssembly(message.to_string())
    }

    pub fn content(message: impl fmt::Display) -> Self {
        RenderError::Content(message.to_string())
    }
}
