//! Error types for the SOPS Secret Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
///
/// Every variant is retryable; the control plane redrives failed
/// reconciliations through `error_policy`. Not-found conditions are handled
/// inline as no-ops and never surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Optimistic-concurrency rejection on a write
    #[error("write conflict: {0}")]
    Conflict(String),

    /// The decrypt capability failed on the ciphertext
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// Decrypt succeeded but the plaintext is not a flat key/value mapping
    #[error("decrypted payload is not a flat key/value mapping: {0}")]
    MalformedPlaintext(#[from] serde_yaml::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a decrypt error
    pub fn decrypt(msg: impl Into<String>) -> Self {
        Error::Decrypt(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Split write errors into Conflict (409) and everything else
    pub fn classify_write(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref api_err) if api_err.code == 409 => {
                Error::Conflict(api_err.message.clone())
            }
            other => Error::Kube(other),
        }
    }
}
