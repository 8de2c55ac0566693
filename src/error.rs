//! Unified error hierarchy for the workout engine
//!
//! Structural and programming errors surface synchronously to the caller.
//! Transition misuse is recoverable and leaves the session untouched.
//! Sync failures live in their own enum and never reach the state machine.

use thiserror::Error;

use crate::models::SessionStatus;

/// Top-level error type for all engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Empty or structurally malformed segment list
    #[error("Invalid plan: {reason}")]
    InvalidPlan { reason: String },

    /// Operation called from a status that forbids it
    #[error("Cannot {operation} while session is {status}")]
    InvalidTransition {
        operation: &'static str,
        status: SessionStatus,
    },

    /// Advance requested after the final segment was completed
    #[error("No more segments: the final segment has already been completed")]
    NoMoreSegments,

    /// Mutation or freeze of an already frozen metrics recorder
    #[error("Metrics recorder for segment {ordinal} is already frozen")]
    AlreadyFrozen { ordinal: usize },

    /// Negative duration delta handed to a recorder (clock regression)
    #[error("Negative duration delta: {delta_ms}ms")]
    NegativeDuration { delta_ms: i64 },

    /// Sync path errors
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Summary hand-off to storage is no longer possible
    #[error("Summary persistence unavailable: {0}")]
    Persistence(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors on the cross-device sync path
#[derive(Debug, Error)]
pub enum SyncError {
    /// Payload could not be encoded into a frame
    #[error("Failed to encode sync frame: {0}")]
    Encode(String),

    /// Frame could not be decoded into a payload
    #[error("Failed to decode sync frame: {0}")]
    Decode(String),

    /// Peer link is unavailable
    #[error("Peer link down: {0}")]
    LinkDown(String),

    /// Outbound worker has shut down
    #[error("Sync channel closed")]
    ChannelClosed,
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Whether the caller can ignore the error and re-render current state
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidTransition { .. }
                | EngineError::NoMoreSegments
                | EngineError::Sync(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EngineError::InvalidPlan { .. }
            | EngineError::AlreadyFrozen { .. }
            | EngineError::NegativeDuration { .. } => ErrorSeverity::Critical,
            EngineError::InvalidTransition { .. } | EngineError::NoMoreSegments => {
                ErrorSeverity::Warning
            }
            EngineError::Sync(_) => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            EngineError::InvalidPlan { .. } => {
                "This workout plan can't be started. Please rebuild the plan and try again."
                    .to_string()
            }
            EngineError::InvalidTransition { .. } | EngineError::NoMoreSegments => {
                "That action isn't available right now.".to_string()
            }
            EngineError::Sync(_) => {
                "Your companion device is out of sync and will catch up when reconnected."
                    .to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Integration bug requiring immediate attention
    Critical,
    /// Error that prevents the operation
    Error,
    /// Recoverable misuse, session state unchanged
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}
