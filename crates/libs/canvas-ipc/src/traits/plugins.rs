use async_trait::async_trait;

use crate::error::WireError;
use crate::types::PluginInfo;

/// Plugin lifecycle.
#[async_trait]
pub trait BackendPlugins: Send + Sync {
    async fn list_plugins(&self) -> Result<Vec<PluginInfo>, WireError>;

    async fn enable_plugin(&self, plugin_id: &str) -> Result<PluginInfo, WireError>;

    async fn disable_plugin(&self, plugin_id: &str) -> Result<PluginInfo, WireError>;
}
