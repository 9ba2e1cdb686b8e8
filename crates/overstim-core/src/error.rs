//! Core error types for overstim-core.
//!
//! This module defines the error hierarchy using thiserror. No error in this
//! crate is fatal to a host: the worst outcome is "calm mode not applied this
//! cycle", recovered on the next recomputation or reapplication.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for overstim-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Schedule or override validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Settings persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A rule failed to apply or revert
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// Host-to-host messaging errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Schedule clock errors
    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration validation errors.
///
/// Raised by `ScheduleConfig::validate` before a schedule is handed to the
/// clock. The clock itself never raises these; it treats invalid data as a
/// window that is never active.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Malformed `HH:mm` time string
    #[error("Invalid time for '{field}': '{value}' is not in HH:mm format")]
    InvalidTime { field: String, value: String },

    /// Start and end of a fixed window are the same instant
    #[error("Sleep start and sleep end are both {0}; the window would be empty")]
    EmptyWindow(String),

    /// Unknown IANA timezone name
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    /// Coordinate or offset outside its allowed range
    #[error("Value for '{field}' out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Rule id that no built-in rule answers to
    #[error("Unknown rule id: {0}")]
    UnknownRule(String),

    /// Disabling this rule would leave the global selection empty
    #[error("Cannot disable '{0}', the last enabled rule; switch calm mode off instead")]
    LastEnabledRule(String),
}

/// Errors raised by a rule's `apply` or `revert`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    /// The page lacks something the rule needs (e.g. a document head)
    #[error("Page unavailable for rule '{rule}': {message}")]
    PageUnavailable { rule: String, message: String },

    /// The rule failed for another reason
    #[error("Rule '{rule}' failed: {message}")]
    Failed { rule: String, message: String },
}

/// Messaging errors between the clock host and page hosts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The counterpart host is not (or no longer) reachable
    #[error("Counterpart host disconnected")]
    Disconnected,

    /// The counterpart answered with a response of the wrong kind
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The counterpart reported a failure
    #[error("Remote error: {0}")]
    Remote(String),
}

/// Settings persistence errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read/write settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize settings TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to access data directory: {0}")]
    DataDir(String),

    #[error("Unknown settings key: {0}")]
    UnknownKey(String),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Schedule clock errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClockError {
    /// `start()` was called outside a tokio runtime
    #[error("Schedule clock requires a running tokio runtime")]
    NoRuntime,
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
