//! Error types for format handling

use thiserror::Error;

/// Errors that can occur when formatting or reconciling recording data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    /// Entry line does not start with a `#<timestamp>` token
    #[error("Missing timestamp token in entry line")]
    MissingTimestamp,

    /// Leading timestamp token is not a number
    #[error("Invalid timestamp token: {0:?}")]
    InvalidTimestamp(String),

    /// Reference-clock string does not match the expected format
    #[error("Invalid reference time {value:?}: {reason}")]
    InvalidReferenceTime { value: String, reason: String },

    /// Object identifier is not a valid hex token
    #[error("Invalid object identifier: {0:?}")]
    InvalidObjectId(String),

    /// Identifier space is exhausted, no unique id can be allocated
    #[error("Object identifier space exhausted")]
    IdSpaceExhausted,
}
