//! Error types for lumenbloom operations.
//!
//! One taxonomy covers the whole compute pipeline:
//!
//! - **Config errors**: bad parameters (dimensions too small, invalid counts)
//! - **Stream faults**: malformed or short binary messages
//! - **Process faults**: worker spawn failure, startup timeout, bad response
//! - **Cancellation**: user-initiated, never surfaced as a failure state
//! - **Internal errors**: unexpected numeric conditions

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during bloom simulation.
///
/// Cancellation is deliberately a variant here rather than a separate
/// channel: a run that observes its cancel flag bails out with
/// [`Error::Canceled`], and the owning engine resets to idle without
/// recording a failure.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid parameter or input configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed, truncated, or mismatched binary message.
    #[error("binary stream fault: {0}")]
    Stream(String),

    /// Worker process spawn failure, startup timeout, or error response.
    #[error("worker process fault: {0}")]
    Process(String),

    /// Run was canceled by the caller. Not a failure.
    #[error("canceled by user")]
    Canceled,

    /// Unexpected numeric or state condition.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates an [`Error::Config`] error.
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an [`Error::Stream`] error.
    #[inline]
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Creates an [`Error::Process`] error.
    #[inline]
    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }

    /// Creates an [`Error::Internal`] error.
    #[inline]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns `true` if this is user-initiated cancellation.
    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}
