mod extensions;
mod plugins;
mod shortcuts;
mod templates;

pub use extensions::BackendExtensions;
pub use plugins::BackendPlugins;
pub use shortcuts::BackendShortcuts;
pub use templates::BackendTemplates;

/// Composite trait encompassing every backend service reachable through the bridge.
///
/// Automatically implemented for any type that implements all four
/// sub-traits. Use `Arc<dyn Backend>` as the primary handle type.
pub trait Backend: BackendTemplates + BackendPlugins + BackendShortcuts + BackendExtensions {}

impl<T> Backend for T where
    T: BackendTemplates + BackendPlugins + BackendShortcuts + BackendExtensions
{
}
