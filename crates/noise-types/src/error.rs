//! Error types for data parsing in noise-types.

use thiserror::Error;

/// Errors that can occur when parsing monitor identifiers or reading records.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Monitor identifier is empty, too long, or contains unsupported characters.
    #[error("Invalid monitor id '{0}'")]
    InvalidMonitorId(String),

    /// A required field is absent from the record.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// The datetime could not be parsed.
    #[error("Invalid datetime: {0}")]
    InvalidDatetime(String),

    /// A metric value is not a finite number.
    #[error("Invalid value for {name}: {value}")]
    InvalidMetric { name: &'static str, value: String },

    /// The reading is timestamped after the current time.
    #[error("Timestamp {0} lies in the future")]
    FutureTimestamp(i64),
}

/// Result type alias using noise-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
