//! Error types for Seedium

use thiserror::Error;

/// Main error type for Seedium
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown signature type: {0}")]
    UnknownSigType(u16),

    #[error("Unsupported algorithm")]
    UnsupportedAlgorithm,

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not enough router infos - have: {have}, need: {need}")]
    InsufficientCandidates { have: usize, need: usize },

    #[error("No bundle available")]
    NotAvailable,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Forbidden")]
    Forbidden,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type alias for Seedium
pub type Result<T> = std::result::Result<T, Error>;
