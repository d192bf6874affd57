use canvas_ipc::WireError;
use serde::{Deserialize, Serialize};

/// Errors delivered to bridge callers.
///
/// The UI decides presentation: `BackendUnavailable` maps to a persistent
/// banner, `Timeout`/`Backend` to a transient notice.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum BridgeError {
    /// The backend never signalled readiness.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// The channel refused the message or is not ready.
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("timeout: {method} after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("backend error {code}: {message}")]
    Backend { code: String, message: String, retryable: bool },

    #[error("cancelled: {method}")]
    Cancelled { method: String },

    /// Raised by the circuit breaker without touching the transport.
    #[error("backend unavailable (retry after {retry_after_ms}ms)")]
    BackendUnavailable { retry_after_ms: u64 },

    #[error("{method} failed after {attempts} attempts: {last}")]
    RetriesExhausted { method: String, attempts: u32, last: Box<BridgeError> },

    #[error("codec error: {message}")]
    Codec { message: String },

    #[error("bridge disposed")]
    Disposed,
}

impl BridgeError {
    /// Returns `true` for transient failures the retry controller may repeat.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Backend { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Returns `true` for outcomes that count against backend health.
    ///
    /// A non-retryable backend error proves the backend is answering, so it
    /// does not count.
    pub fn is_backend_failure(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Backend { retryable, .. } => *retryable,
            Self::RetriesExhausted { .. } => true,
            _ => false,
        }
    }

    /// The failure behind a `RetriesExhausted` wrapper, or `self`.
    pub fn root(&self) -> &BridgeError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout { .. })
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn codec(message: impl std::fmt::Display) -> Self {
        Self::Codec { message: message.to_string() }
    }
}

impl From<WireError> for BridgeError {
    fn from(error: WireError) -> Self {
        Self::Backend { code: error.code, message: error.message, retryable: error.retryable }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
}
