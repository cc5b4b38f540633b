//! Error types for hdscout-core.

// ==============================================================================
// Backend Errors
// ==============================================================================

/// Structured errors from the blockchain backend layer.
///
/// Each variant captures a specific failure mode rather than collapsing
/// everything into a single `String`, which makes programmatic error
/// handling (e.g. retries on transport errors vs. logic errors) possible.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP transport: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("JSON-RPC error: code={code}, message={message}")]
    ServerError { code: i64, message: String },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("live notification stream lagged by {0} messages")]
    NotificationLag(u64),
}

// ==============================================================================
// Worker Channel Errors
// ==============================================================================

/// Failures of the FIFO channel to the derivation worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker transport: {0}")]
    Transport(String),

    #[error("worker channel closed")]
    Closed,

    #[error("worker protocol violation: {0}")]
    Protocol(String),
}

// ==============================================================================
// Derivation Errors
// ==============================================================================

/// Failures of an address derivation request. Fatal to the discovery that
/// issued it.
#[derive(Debug, thiserror::Error)]
pub enum DerivationError {
    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("malformed worker reply: {0}")]
    MalformedReply(String),

    #[error("invalid HD node: {0}")]
    InvalidNode(String),

    #[error("bip32 derivation: {0}")]
    Bip32(#[from] bitcoin::bip32::Error),

    #[error("derivation task stopped before completing: {0}")]
    Interrupted(String),
}

// ==============================================================================
// Core Errors
// ==============================================================================

/// Top-level error type for the hdscout-core crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Persisted blobs fed to a `restore` were mutually inconsistent.
    /// Recoverable by discarding the blobs and starting cold.
    #[error("inconsistent persisted state: {0}")]
    Serialization(String),
}
