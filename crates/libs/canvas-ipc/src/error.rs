use serde::{Deserialize, Serialize};

pub mod code {
    pub const NOT_IMPLEMENTED: &str = "NOT_IMPLEMENTED";
    pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
    pub const UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const BUSY: &str = "BUSY";
    pub const INTERNAL: &str = "INTERNAL";
}

/// Structured error carried in the `error` field of a response envelope.
///
/// `retryable` is set by the backend; the bridge retries only errors that
/// carry it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
#[non_exhaustive]
pub struct WireError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

impl WireError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into(), retryable: false }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Returns `true` for errors the backend marked as transient.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn not_implemented(method: impl AsRef<str>) -> Self {
        Self::new(code::NOT_IMPLEMENTED, format!("not implemented: {}", method.as_ref()))
    }

    pub fn unknown_method(method: impl AsRef<str>) -> Self {
        Self::new(code::UNKNOWN_METHOD, format!("unknown method '{}'", method.as_ref()))
    }

    pub fn invalid_params(method: impl AsRef<str>, reason: impl std::fmt::Display) -> Self {
        Self::new(
            code::INVALID_PARAMS,
            format!("invalid params for '{}': {reason}", method.as_ref()),
        )
    }

    pub fn not_found(resource: impl AsRef<str>) -> Self {
        Self::new(code::NOT_FOUND, format!("not found: {}", resource.as_ref()))
    }

    /// The backend is alive but cannot take the request right now.
    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(code::BUSY, message).with_retryable(true)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(code::INTERNAL, message)
    }
}
