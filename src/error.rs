//! Error types for KyroStream.
//!
//! All errors in KyroStream are strongly typed using thiserror.
//! The taxonomy separates malformed input (validation), bad construction-time
//! settings (configuration), and runtime failures (execution), so callers can
//! distinguish "drop this event" from "refuse to start" from "retry later".

use thiserror::Error;

use crate::entity::{EntityClass, EntityKey, EntityStatus};
use crate::event::EventKind;
use crate::storage::StorageError;

/// Validation errors raised while normalizing or validating an event.
///
/// Every variant is a flavor of `MalformedEvent`: the event is dropped,
/// counted, and never reaches the state store.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Event entity key cannot be empty")]
    EmptyEntityKey,

    #[error("Required field '{field}' is missing for {kind} event")]
    MissingField {
        kind: EventKind,
        field: String,
    },

    #[error("Field '{field}' on {kind} event has invalid value: {reason}")]
    InvalidField {
        kind: EventKind,
        field: String,
        reason: String,
    },

    #[error("Unknown event kind '{name}'")]
    UnknownEventKind {
        name: String,
    },

    #[error("Failed to decode event: {message}")]
    Decode {
        message: String,
    },
}

/// Configuration errors. Raised by `EngineConfig::validate` before any event
/// is processed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Threshold '{name}' must be positive, got {value}")]
    NonPositiveThreshold {
        name: String,
        value: f64,
    },

    #[error("Rising threshold ({rising}) must be below the high threshold ({high})")]
    RisingAboveHigh {
        rising: u64,
        high: u64,
    },

    #[error("Keyword set cannot be empty when filtering is enabled")]
    EmptyKeywordSet,

    #[error("Keyword cannot be blank")]
    BlankKeyword,

    #[error("Window tick interval must be non-zero")]
    ZeroTickInterval,

    #[error("'{name}' must be at least 1")]
    ZeroCapacity {
        name: String,
    },

    #[error("Invalid keyword pattern: {reason}")]
    InvalidKeywordPattern {
        reason: String,
    },

    #[error("Failed to read configuration: {message}")]
    Io {
        message: String,
    },

    #[error("Failed to parse configuration: {message}")]
    Parse {
        message: String,
    },
}

/// Execution errors that occur while processing an admitted event.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Event {kind} references entity '{key}' whose lifecycle has not started")]
    UnknownEntity {
        key: EntityKey,
        kind: EventKind,
    },

    #[error("Invalid transition for '{key}': {kind} not allowed in status {status}")]
    InvalidTransition {
        key: EntityKey,
        status: EntityStatus,
        kind: EventKind,
    },

    #[error("Event {kind} addresses '{key}' as a {expected}, but it is a {found}")]
    ClassMismatch {
        key: EntityKey,
        kind: EventKind,
        expected: EntityClass,
        found: EntityClass,
    },

    #[error("Queue full on {path} (capacity {capacity})")]
    QueueFull {
        path: String,
        capacity: usize,
    },

    #[error("Channel disconnected on {path}")]
    Disconnected {
        path: String,
    },

    #[error("Runtime is shutting down; event rejected")]
    ShuttingDown,

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },
}

/// Top-level error type for KyroStream.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StreamError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl StreamError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation (malformed event) error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if resubmitting the same event may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::QueueFull { .. } | ExecutionError::Timeout { .. }
            ),
        }
    }
}

impl From<StorageError> for StreamError {
    fn from(err: StorageError) -> Self {
        Self::Execution(ExecutionError::Storage {
            message: err.to_string(),
        })
    }
}

/// Result type alias for KyroStream operations.
pub type StreamResult<T> = Result<T, StreamError>;
