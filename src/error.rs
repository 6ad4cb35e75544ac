use thiserror::Error;

/// Main error type for the rotee logger
#[derive(Debug, Error)]
pub enum RoteeError {
    // Writer lifecycle errors
    #[error("Writer is closed")]
    ClosedWriter,

    #[error("Flush failed after retry: {0}")]
    Flush(String),

    // Destination errors
    #[error("Destination folder is not writable: {0}")]
    UnwritableDestination(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for rotee operations
pub type Result<T> = std::result::Result<T, RoteeError>;
