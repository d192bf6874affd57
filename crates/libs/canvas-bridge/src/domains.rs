//! Typed wrappers for the methods the editor models.

use canvas_ipc::method::{GetFieldsParams, PluginRef, SaveParams, ShortcutBinding, TemplateRef};
use canvas_ipc::{
    FieldInfo, Method, PluginInfo, SaveReceipt, ShortcutInfo, TemplateDocument, TemplateSummary,
};
use serde_json::Value;

use crate::bridge::{Bridge, CallOptions};
use crate::error::BridgeError;

impl Bridge {
    /// Round-trips `__ping__`, skipping the batch window.
    pub async fn ping(&self) -> Result<(), BridgeError> {
        self.call_method(Method::Ping, CallOptions::default().immediate()).await.map(drop)
    }

    // ── Templates ─────────────────────────────────────────────────────────────

    pub async fn get_fields(&self, template_id: Option<&str>) -> Result<Vec<FieldInfo>, BridgeError> {
        let params = GetFieldsParams { template_id: template_id.map(str::to_owned) };
        self.request(Method::GetFields(params), CallOptions::default()).await
    }

    pub async fn save(&self, template_id: &str, document: Value) -> Result<SaveReceipt, BridgeError> {
        let params = SaveParams { template_id: template_id.to_owned(), document };
        self.request(Method::Save(params), CallOptions::default()).await
    }

    pub async fn list_templates(&self) -> Result<Vec<TemplateSummary>, BridgeError> {
        self.request(Method::ListTemplates, CallOptions::default()).await
    }

    pub async fn load_template(&self, template_id: &str) -> Result<TemplateDocument, BridgeError> {
        let params = TemplateRef { template_id: template_id.to_owned() };
        self.request(Method::LoadTemplate(params), CallOptions::default()).await
    }

    pub async fn delete_template(&self, template_id: &str) -> Result<bool, BridgeError> {
        let params = TemplateRef { template_id: template_id.to_owned() };
        self.request(Method::DeleteTemplate(params), CallOptions::default()).await
    }

    // ── Plugins ───────────────────────────────────────────────────────────────

    pub async fn list_plugins(&self) -> Result<Vec<PluginInfo>, BridgeError> {
        self.request(Method::ListPlugins, CallOptions::default()).await
    }

    pub async fn enable_plugin(&self, plugin_id: &str) -> Result<PluginInfo, BridgeError> {
        let params = PluginRef { plugin_id: plugin_id.to_owned() };
        self.request(Method::EnablePlugin(params), CallOptions::default()).await
    }

    pub async fn disable_plugin(&self, plugin_id: &str) -> Result<PluginInfo, BridgeError> {
        let params = PluginRef { plugin_id: plugin_id.to_owned() };
        self.request(Method::DisablePlugin(params), CallOptions::default()).await
    }

    // ── Shortcuts ─────────────────────────────────────────────────────────────

    pub async fn list_shortcuts(&self) -> Result<Vec<ShortcutInfo>, BridgeError> {
        self.request(Method::ListShortcuts, CallOptions::default()).await
    }

    /// Rebinds `action`. Sequential, so rapid rebinds land in order.
    pub async fn set_shortcut(&self, action: &str, keys: &str) -> Result<ShortcutInfo, BridgeError> {
        let params = ShortcutBinding { action: action.to_owned(), keys: keys.to_owned() };
        self.request(Method::SetShortcut(params), CallOptions::default().sequential()).await
    }
}
