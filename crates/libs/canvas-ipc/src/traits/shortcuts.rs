use async_trait::async_trait;

use crate::error::WireError;
use crate::types::ShortcutInfo;

/// Keyboard shortcut management.
#[async_trait]
pub trait BackendShortcuts: Send + Sync {
    async fn list_shortcuts(&self) -> Result<Vec<ShortcutInfo>, WireError>;

    /// Bind `keys` to `action`, replacing any previous binding for the action.
    async fn set_shortcut(&self, action: &str, keys: &str) -> Result<ShortcutInfo, WireError>;
}
