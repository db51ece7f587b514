use thiserror::Error;

/// Common error type for Aranet bridge components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid device address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Result type alias using the bridge's common Error.
pub type Result<T> = std::result::Result<T, Error>;
