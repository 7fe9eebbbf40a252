//! Error types for SWR operations
//!
//! Fetch failures are not part of this taxonomy: they are user-typed values
//! recorded in the entry's `error` field. Cancellation, ownership violations
//! and stale-result races are not errors at all.

use thiserror::Error;

/// Store layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Scope and binding lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Scope {scope} is already stopped")]
    Stopped { scope: String },

    #[error("No async runtime available: {reason}")]
    RuntimeUnavailable { reason: String },

    #[error("Cleanup hook in scope {scope} panicked: {message}")]
    HookPanicked { scope: String, message: String },
}

/// Master error type for all SWR errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SwrError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scope error: {0}")]
    Scope(#[from] ScopeError),
}

/// Result type alias for SWR operations.
pub type SwrResult<T> = Result<T, SwrError>;

// =============================================================================
// TESTS
// =============================================================================
