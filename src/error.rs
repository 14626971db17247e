use std::time::Duration;

/// Failures of the native relay connection.
///
/// These never leave the transport: they are logged where they happen and
/// turned into a boolean outcome.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connect failed: {0}")]
    Connect(#[source] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Connect(Box::new(e))
    }
}

/// Failures while discovering or using the host's chat SDK.
///
/// Each capability (send, message subscription, loading notification)
/// reports its own error; one failing never disables the others.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("module '{0}' is not loaded")]
    ModuleNotLoaded(String),

    #[error("service type '{0}' not found")]
    ServiceNotFound(String),

    #[error("capability '{0}' not found")]
    CapabilityNotFound(String),

    #[error("capability '{name}' has an unexpected shape: {detail}")]
    ShapeMismatch { name: String, detail: String },

    #[error("invoking '{name}' failed: {source}")]
    Invocation {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}
