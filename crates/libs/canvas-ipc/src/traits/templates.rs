use async_trait::async_trait;
use serde_json::Value;

use crate::error::WireError;
use crate::types::*;

/// Template storage and field discovery.
#[async_trait]
pub trait BackendTemplates: Send + Sync {
    /// Fields available to the canvas, optionally scoped to one template.
    async fn get_fields(&self, template_id: Option<&str>) -> Result<Vec<FieldInfo>, WireError>;

    /// Persist a template document and return its new revision.
    async fn save(&self, template_id: &str, document: Value) -> Result<SaveReceipt, WireError>;

    async fn list_templates(&self) -> Result<Vec<TemplateSummary>, WireError>;

    async fn load_template(&self, template_id: &str) -> Result<TemplateDocument, WireError>;

    /// Returns `false` when the template did not exist.
    async fn delete_template(&self, template_id: &str) -> Result<bool, WireError>;
}
