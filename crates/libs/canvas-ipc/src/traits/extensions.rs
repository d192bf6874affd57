use async_trait::async_trait;
use serde_json::Value;

use crate::error::WireError;

/// Methods outside the modelled set.
///
/// An empty `impl BackendExtensions for MyBackend {}` rejects every unknown
/// method with `UNKNOWN_METHOD`.
#[async_trait]
pub trait BackendExtensions: Send + Sync {
    async fn handle_other(&self, method: &str, _params: Value) -> Result<Value, WireError> {
        Err(WireError::unknown_method(method))
    }
}
