use thiserror::Error;

/// Common error type for exporter components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to initialize tracing: {0}")]
    Tracing(String),
}

/// Result type alias using the exporter's common Error.
pub type Result<T> = std::result::Result<T, Error>;
