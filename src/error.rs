//! Error types for setecs.

use thiserror::Error;

/// Error type for setecs operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Download error
    #[error("download error: {0}")]
    Download(#[from] reqwest::Error),

    /// Remote source answered with a status other than 200/201
    #[error("http response status is {status} for url {url}")]
    HttpStatus { status: u16, url: String },

    /// Invalid IP address
    #[error("invalid IP address: {0}")]
    InvalidIpAddress(String),

    /// Invalid CIDR pattern
    #[error("invalid CIDR pattern: {0}")]
    InvalidCidrPattern(String),

    /// Unparsable duration
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// Duration below zero
    #[error("invalid negative duration: {0}")]
    NegativeDuration(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for setecs operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reason a single source line was rejected.
///
/// Line errors are logged and counted by the loader; they never abort a load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    /// Not an address or a CIDR range
    #[error("invalid subnet: {0}")]
    InvalidSubnet(String),

    /// Range already covered by an earlier range of the same pass
    #[error("{range} is contained by {parent}")]
    Overlap { range: String, parent: String },

    /// Table line without exactly two `:`-separated fields
    #[error("expected 2 fields, got {0}")]
    FieldCount(usize),

    /// Table key is not an IP address
    #[error("invalid client address: {0}")]
    InvalidKey(String),

    /// Table value is not an IP address
    #[error("invalid substitute address: {0}")]
    InvalidSubstitute(String),
}
