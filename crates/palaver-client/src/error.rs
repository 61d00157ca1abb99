use thiserror::Error;

/// Errors produced by the client layer.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server rejected the request.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Malformed payload from the server.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
