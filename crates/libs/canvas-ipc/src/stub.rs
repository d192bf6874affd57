use async_trait::async_trait;
use serde_json::Value;

use crate::error::WireError;
use crate::traits::*;
use crate::types::*;

/// A backend that returns `NOT_IMPLEMENTED` for every method.
///
/// Useful as the starting point for a new backend and as a responsive
/// peer in bridge tests: it answers every request, just never successfully.
pub struct StubBackend;

#[async_trait]
impl BackendTemplates for StubBackend {
    async fn get_fields(&self, _template_id: Option<&str>) -> Result<Vec<FieldInfo>, WireError> {
        Err(WireError::not_implemented("getFields"))
    }

    async fn save(&self, _template_id: &str, _document: Value) -> Result<SaveReceipt, WireError> {
        Err(WireError::not_implemented("save"))
    }

    async fn list_templates(&self) -> Result<Vec<TemplateSummary>, WireError> {
        Err(WireError::not_implemented("listTemplates"))
    }

    async fn load_template(&self, _template_id: &str) -> Result<TemplateDocument, WireError> {
        Err(WireError::not_implemented("loadTemplate"))
    }

    async fn delete_template(&self, _template_id: &str) -> Result<bool, WireError> {
        Err(WireError::not_implemented("deleteTemplate"))
    }
}

#[async_trait]
impl BackendPlugins for StubBackend {
    async fn list_plugins(&self) -> Result<Vec<PluginInfo>, WireError> {
        Err(WireError::not_implemented("listPlugins"))
    }

    async fn enable_plugin(&self, _plugin_id: &str) -> Result<PluginInfo, WireError> {
        Err(WireError::not_implemented("enablePlugin"))
    }

    async fn disable_plugin(&self, _plugin_id: &str) -> Result<PluginInfo, WireError> {
        Err(WireError::not_implemented("disablePlugin"))
    }
}

#[async_trait]
impl BackendShortcuts for StubBackend {
    async fn list_shortcuts(&self) -> Result<Vec<ShortcutInfo>, WireError> {
        Err(WireError::not_implemented("listShortcuts"))
    }

    async fn set_shortcut(&self, _action: &str, _keys: &str) -> Result<ShortcutInfo, WireError> {
        Err(WireError::not_implemented("setShortcut"))
    }
}

impl BackendExtensions for StubBackend {}
