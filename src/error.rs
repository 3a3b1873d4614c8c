//! Error handling types for workbridge
//!
//! A single error enum covers every failure the queue, bridge, and
//! reconciliation loop can surface to a caller. Variants line up with the
//! failure classes the queue cares about: configuration and validation
//! failures fail fast, transport failures are retried, worker-reported
//! failures are surfaced verbatim, and lifecycle failures escalate.

use std::sync::PoisonError;
use thiserror::Error;

use crate::protocol::MessageKind;

/// Substrings that mark an error message as a transient transport failure.
///
/// Matched case-insensitively against `Transport` messages.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "etimedout",
    "connection reset",
    "econnreset",
    "connection timed out",
    "host not found",
    "enotfound",
];

/// Comprehensive error type for bridge operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Missing executor, bad settings, or a broken internal contract
    #[error("configuration error: {0}")]
    Config(String),

    /// A frame (inbound or outbound) did not match its schema
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialized frame exceeds the configured maximum
    #[error("frame too large: {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    /// No response arrived before the per-request timer fired
    #[error("{kind} request timed out after {timeout_ms}ms")]
    Timeout { kind: MessageKind, timeout_ms: u64 },

    /// Pipe, socket, or worker link failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Worker answered with an explicit error frame
    #[error("worker error: {0}")]
    Worker(String),

    /// Request cancelled because the worker is being restarted
    #[error("request cancelled: worker restarting")]
    Restarting,

    /// Request cancelled because the bridge or queue shut down
    #[error("request cancelled: bridge shut down")]
    Shutdown,

    /// Bridge is crashed and no restart is in flight
    #[error("bridge crashed: {0}")]
    Crashed(String),

    /// Worker never reached the ready state
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// Operation removed from the queue before it ran
    #[error("operation cleared from queue")]
    Cleared,

    /// Too many restart attempts inside the rolling window
    #[error("restart budget exhausted: {attempts} attempts within {window_ms}ms")]
    RestartBudgetExhausted { attempts: u32, window_ms: u64 },
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Whether the queue may retry an operation that failed with this error.
    ///
    /// Only transport-level failures qualify. Semantic failures reported by
    /// the worker are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Timeout { .. } => true,
            BridgeError::Transport(message) => {
                let message = message.to_ascii_lowercase();
                TRANSIENT_MARKERS
                    .iter()
                    .any(|marker| message.contains(marker))
            }
            _ => false,
        }
    }

    /// Whether this error means the request was cancelled by bridge cleanup
    /// rather than timing out or failing on its own.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BridgeError::Restarting | BridgeError::Shutdown)
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        BridgeError::Validation(message.into())
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        BridgeError::Transport(message.into())
    }

    /// Create a worker-reported error
    pub fn worker(message: impl Into<String>) -> Self {
        BridgeError::Worker(message.into())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let marker = match error.kind() {
            ErrorKind::TimedOut => "connection timed out",
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => "connection reset",
            ErrorKind::NotFound | ErrorKind::AddrNotAvailable => "host not found",
            _ => "io failure",
        };
        BridgeError::Transport(format!("{marker}: {error}"))
    }
}

/// Helper trait to recover from poisoned std locks with logging.
pub trait LockResultExt<T> {
    /// Recover the guard from a poisoned lock.
    ///
    /// The context parameter identifies which operation triggered lock
    /// recovery.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "workbridge::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}
