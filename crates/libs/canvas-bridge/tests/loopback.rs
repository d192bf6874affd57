//! End-to-end: bridge and backend server talking msgpack frames over an
//! in-memory duplex pipe.

mod support;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use canvas_bridge::{inbound_channel, Bridge, BridgeConfig, BridgeError, CallOptions, HealthStatus, StreamChannel};
use canvas_ipc::{
    Backend, BackendExtensions, BackendPlugins, BackendShortcuts, BackendTemplates, FieldInfo,
    PluginInfo, SaveReceipt, ShortcutInfo, StubBackend, TemplateDocument, TemplateSummary,
    WireError,
};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

/// In-memory backend with just enough behaviour to tell methods apart.
#[derive(Default)]
struct Workshop {
    templates: Mutex<BTreeMap<String, (u64, Value)>>,
    plugins: Mutex<BTreeMap<String, bool>>,
    shortcuts: Mutex<BTreeMap<String, String>>,
}

impl Workshop {
    fn with_plugins(ids: &[&str]) -> Self {
        let workshop = Self::default();
        {
            let mut plugins = workshop.plugins.lock().expect("plugins");
            for id in ids {
                plugins.insert((*id).to_string(), false);
            }
        }
        workshop
    }

    fn set_plugin(&self, plugin_id: &str, enabled: bool) -> Result<PluginInfo, WireError> {
        let mut plugins = self.plugins.lock().expect("plugins");
        let state = plugins.get_mut(plugin_id).ok_or_else(|| WireError::not_found(plugin_id))?;
        *state = enabled;
        Ok(PluginInfo::new(plugin_id, plugin_id.to_uppercase(), enabled))
    }
}

#[async_trait]
impl BackendTemplates for Workshop {
    async fn get_fields(&self, template_id: Option<&str>) -> Result<Vec<FieldInfo>, WireError> {
        let Some(template_id) = template_id else {
            return Ok(vec![FieldInfo::new("title", "text")]);
        };
        let templates = self.templates.lock().expect("templates");
        let (_, document) = templates.get(template_id).ok_or_else(|| WireError::not_found(template_id))?;
        Ok(document
            .as_object()
            .map(|fields| fields.keys().map(|name| FieldInfo::new(name.as_str(), "text")).collect())
            .unwrap_or_default())
    }

    async fn save(&self, template_id: &str, document: Value) -> Result<SaveReceipt, WireError> {
        let mut templates = self.templates.lock().expect("templates");
        let entry = templates.entry(template_id.to_string()).or_insert((0, Value::Null));
        entry.0 += 1;
        entry.1 = document;
        Ok(SaveReceipt::new(template_id, entry.0))
    }

    async fn list_templates(&self) -> Result<Vec<TemplateSummary>, WireError> {
        let templates = self.templates.lock().expect("templates");
        Ok(templates
            .iter()
            .map(|(id, (revision, _))| {
                let mut summary = TemplateSummary::new(id.as_str(), id.as_str());
                summary.revision = *revision;
                summary
            })
            .collect())
    }

    async fn load_template(&self, template_id: &str) -> Result<TemplateDocument, WireError> {
        let templates = self.templates.lock().expect("templates");
        let (revision, document) =
            templates.get(template_id).ok_or_else(|| WireError::not_found(template_id))?;
        let mut loaded = TemplateDocument::default();
        loaded.id = template_id.to_string();
        loaded.name = template_id.to_string();
        loaded.revision = *revision;
        loaded.document = document.clone();
        Ok(loaded)
    }

    async fn delete_template(&self, template_id: &str) -> Result<bool, WireError> {
        Ok(self.templates.lock().expect("templates").remove(template_id).is_some())
    }
}

#[async_trait]
impl BackendPlugins for Workshop {
    async fn list_plugins(&self) -> Result<Vec<PluginInfo>, WireError> {
        let plugins = self.plugins.lock().expect("plugins");
        Ok(plugins
            .iter()
            .map(|(id, enabled)| PluginInfo::new(id.as_str(), id.to_uppercase(), *enabled))
            .collect())
    }

    async fn enable_plugin(&self, plugin_id: &str) -> Result<PluginInfo, WireError> {
        self.set_plugin(plugin_id, true)
    }

    async fn disable_plugin(&self, plugin_id: &str) -> Result<PluginInfo, WireError> {
        self.set_plugin(plugin_id, false)
    }
}

#[async_trait]
impl BackendShortcuts for Workshop {
    async fn list_shortcuts(&self) -> Result<Vec<ShortcutInfo>, WireError> {
        let shortcuts = self.shortcuts.lock().expect("shortcuts");
        Ok(shortcuts.iter().map(|(action, keys)| ShortcutInfo::new(action.as_str(), keys.as_str())).collect())
    }

    async fn set_shortcut(&self, action: &str, keys: &str) -> Result<ShortcutInfo, WireError> {
        self.shortcuts.lock().expect("shortcuts").insert(action.to_string(), keys.to_string());
        Ok(ShortcutInfo::new(action, keys))
    }
}

#[async_trait]
impl BackendExtensions for Workshop {
    async fn handle_other(&self, method: &str, params: Value) -> Result<Value, WireError> {
        match method {
            "echo" => Ok(params),
            other => Err(WireError::unknown_method(other)),
        }
    }
}

struct Session {
    bridge: Bridge,
    server: JoinHandle<std::io::Result<()>>,
}

async fn connect(backend: Arc<dyn Backend>) -> Session {
    support::init_logging();
    let (ui, backend_end) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(backend_end);
    let server = tokio::spawn(canvas_ipc_server::serve(backend, server_read, server_write));

    let (ui_read, ui_write) = tokio::io::split(ui);
    let (inbound_tx, inbound_rx) = inbound_channel();
    let channel = Arc::new(StreamChannel::spawn(ui_read, ui_write, inbound_tx));

    let mut config = BridgeConfig::default();
    config.batch.window_ms = 5;
    config.health.ping_interval_ms = 0;
    let bridge = Bridge::new(config, channel, inbound_rx);
    bridge.initialize().await.expect("backend ready");
    Session { bridge, server }
}

#[tokio::test]
async fn domain_helpers_round_trip_through_the_server() {
    let session = connect(Arc::new(Workshop::with_plugins(&["grid", "rulers"]))).await;
    let bridge = &session.bridge;

    bridge.ping().await.expect("ping");

    let receipt = bridge.save("invoice", json!({"title": "Invoice", "total": 0})).await.expect("save");
    assert_eq!(receipt, SaveReceipt::new("invoice", 1));
    let receipt = bridge.save("invoice", json!({"title": "Invoice", "total": 0, "due": null})).await.expect("save");
    assert_eq!(receipt.revision, 2);

    let templates = bridge.list_templates().await.expect("list");
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].revision, 2);

    let loaded = bridge.load_template("invoice").await.expect("load");
    assert_eq!(loaded.document["title"], "Invoice");

    let fields = bridge.get_fields(Some("invoice")).await.expect("fields");
    let names: Vec<&str> = fields.iter().map(|field| field.name.as_str()).collect();
    assert_eq!(names, ["due", "title", "total"]);
    assert_eq!(bridge.get_fields(None).await.expect("global fields"), vec![FieldInfo::new("title", "text")]);

    assert!(bridge.delete_template("invoice").await.expect("delete"));
    assert!(!bridge.delete_template("invoice").await.expect("delete again"));
    match bridge.load_template("invoice").await {
        Err(BridgeError::Backend { code, .. }) => assert_eq!(code, "NOT_FOUND"),
        other => panic!("unexpected outcome {other:?}"),
    }

    assert!(bridge.enable_plugin("grid").await.expect("enable").enabled);
    let plugins = bridge.list_plugins().await.expect("plugins");
    assert_eq!(plugins, vec![PluginInfo::new("grid", "GRID", true), PluginInfo::new("rulers", "RULERS", false)]);
    assert!(!bridge.disable_plugin("grid").await.expect("disable").enabled);

    bridge.set_shortcut("save", "Ctrl+S").await.expect("bind");
    bridge.set_shortcut("save", "Ctrl+Shift+S").await.expect("rebind");
    assert_eq!(
        bridge.list_shortcuts().await.expect("shortcuts"),
        vec![ShortcutInfo::new("save", "Ctrl+Shift+S")]
    );

    assert_eq!(bridge.health().status, HealthStatus::Closed);
    bridge.dispose();
}

#[tokio::test]
async fn concurrent_calls_resolve_by_id_across_batches() {
    let session = connect(Arc::new(Workshop::default())).await;
    let bridge = &session.bridge;

    let calls: Vec<_> = (0..12)
        .map(|n| bridge.call("echo", json!({"n": n}), CallOptions::default()))
        .collect();
    for (n, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await, Ok(json!({"n": n})));
    }

    let unknown = bridge.call("frobnicate", json!({}), CallOptions::default()).await;
    match unknown {
        Err(BridgeError::Backend { code, retryable, .. }) => {
            assert_eq!(code, "UNKNOWN_METHOD");
            assert!(!retryable);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let echo = bridge.metrics(Some("echo"), None);
    assert_eq!(echo.count, 12);
    assert_eq!(echo.success_rate, 1.0);
    assert_eq!(bridge.stats().in_flight_calls, 0);
    bridge.dispose();
}

#[tokio::test]
async fn stub_backend_answers_not_implemented() {
    let session = connect(Arc::new(StubBackend)).await;
    let bridge = &session.bridge;

    match bridge.list_plugins().await {
        Err(BridgeError::Backend { code, retryable, .. }) => {
            assert_eq!(code, "NOT_IMPLEMENTED");
            assert!(!retryable);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    bridge.ping().await.expect("the server answers pings itself");

    let health = bridge.health();
    assert_eq!(health.status, HealthStatus::Closed);
    assert_eq!(health.consecutive_failures, 0);
    bridge.dispose();
}

#[tokio::test]
async fn backend_exit_closes_the_bridge() {
    let session = connect(Arc::new(Workshop::default())).await;
    let bridge = &session.bridge;
    bridge.ping().await.expect("ping");

    session.server.abort();
    for _ in 0..100 {
        if !bridge.is_ready() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!bridge.is_ready());

    let err = bridge.list_templates().await.expect_err("backend gone");
    assert!(matches!(err, BridgeError::Transport { .. }), "{err:?}");
    bridge.dispose();
}
