//! Shared error model for cross-crate APIs.

use thiserror::Error;

/// Unified result type used by all public interfaces in `lircd-rs`.
pub type LircdResult<T> = Result<T, LircdError>;

/// High-level error categories of the dispatcher daemon.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LircdError {
    /// Configuration is invalid for the requested operation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Runtime state does not allow this operation.
    #[error("invalid runtime state: {0}")]
    InvalidState(&'static str),

    /// A wire packet is malformed or semantically invalid.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket, fifo, or filesystem I/O failed.
    #[error("io error: {0}")]
    Io(String),
}
