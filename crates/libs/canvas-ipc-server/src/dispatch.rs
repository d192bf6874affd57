use canvas_ipc::{Backend, Method, RequestEnvelope, ResponseEnvelope, WireError};
use serde::Serialize;
use serde_json::{json, Value};

/// Routes one request to the backend and wraps the outcome in a response
/// carrying the same correlation id.
pub async fn dispatch(backend: &dyn Backend, request: RequestEnvelope) -> ResponseEnvelope {
    let id = request.id;
    match route(backend, &request.method, request.params).await {
        Ok(result) => ResponseEnvelope::ok(id, result),
        Err(error) => {
            log::debug!("ipc-server: request {id} ({}) failed: {error}", request.method);
            ResponseEnvelope::err(id, error)
        }
    }
}

async fn route(backend: &dyn Backend, method: &str, params: Value) -> Result<Value, WireError> {
    match Method::parse(method, params)? {
        Method::Ping => Ok(json!("pong")),
        Method::GetFields(params) => encode(backend.get_fields(params.template_id.as_deref()).await?),
        Method::Save(params) => encode(backend.save(&params.template_id, params.document).await?),
        Method::ListTemplates => encode(backend.list_templates().await?),
        Method::LoadTemplate(params) => encode(backend.load_template(&params.template_id).await?),
        Method::DeleteTemplate(params) => {
            encode(backend.delete_template(&params.template_id).await?)
        }
        Method::ListPlugins => encode(backend.list_plugins().await?),
        Method::EnablePlugin(params) => encode(backend.enable_plugin(&params.plugin_id).await?),
        Method::DisablePlugin(params) => encode(backend.disable_plugin(&params.plugin_id).await?),
        Method::ListShortcuts => encode(backend.list_shortcuts().await?),
        Method::SetShortcut(params) => {
            encode(backend.set_shortcut(&params.action, &params.keys).await?)
        }
        Method::Other { name, params } => backend.handle_other(&name, params).await,
        other => Err(WireError::unknown_method(other.name())),
    }
}

fn encode<T: Serialize>(value: T) -> Result<Value, WireError> {
    serde_json::to_value(value).map_err(|err| WireError::internal(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use canvas_ipc::error_code as code;
    use canvas_ipc::{
        BackendExtensions, BackendPlugins, BackendShortcuts, BackendTemplates, FieldInfo,
        PluginInfo, SaveReceipt, ShortcutInfo, StubBackend, TemplateDocument, TemplateSummary,
    };

    struct FieldsOnly;

    #[async_trait]
    impl BackendTemplates for FieldsOnly {
        async fn get_fields(&self, template_id: Option<&str>) -> Result<Vec<FieldInfo>, WireError> {
            let scope = template_id.unwrap_or("global");
            Ok(vec![FieldInfo::new(format!("{scope}.title"), "text")])
        }

        async fn save(&self, template_id: &str, _document: Value) -> Result<SaveReceipt, WireError> {
            Ok(SaveReceipt::new(template_id, 2))
        }

        async fn list_templates(&self) -> Result<Vec<TemplateSummary>, WireError> {
            Ok(Vec::new())
        }

        async fn load_template(&self, template_id: &str) -> Result<TemplateDocument, WireError> {
            Err(WireError::not_found(template_id))
        }

        async fn delete_template(&self, _template_id: &str) -> Result<bool, WireError> {
            Ok(false)
        }
    }

    #[async_trait]
    impl BackendPlugins for FieldsOnly {
        async fn list_plugins(&self) -> Result<Vec<PluginInfo>, WireError> {
            Ok(Vec::new())
        }

        async fn enable_plugin(&self, plugin_id: &str) -> Result<PluginInfo, WireError> {
            Ok(PluginInfo::new(plugin_id, plugin_id, true))
        }

        async fn disable_plugin(&self, plugin_id: &str) -> Result<PluginInfo, WireError> {
            Ok(PluginInfo::new(plugin_id, plugin_id, false))
        }
    }

    #[async_trait]
    impl BackendShortcuts for FieldsOnly {
        async fn list_shortcuts(&self) -> Result<Vec<ShortcutInfo>, WireError> {
            Ok(Vec::new())
        }

        async fn set_shortcut(&self, action: &str, keys: &str) -> Result<ShortcutInfo, WireError> {
            Ok(ShortcutInfo::new(action, keys))
        }
    }

    #[async_trait]
    impl BackendExtensions for FieldsOnly {
        async fn handle_other(&self, method: &str, params: Value) -> Result<Value, WireError> {
            match method {
                "echo" => Ok(params),
                other => Err(WireError::unknown_method(other)),
            }
        }
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[tokio::test]
    async fn ping_is_answered_without_touching_the_backend() {
        init_logging();
        let response = dispatch(&StubBackend, RequestEnvelope::new(1, "__ping__", json!({}))).await;
        assert_eq!(response.id, 1);
        assert_eq!(response.into_result(), Ok(json!("pong")));
    }

    #[tokio::test]
    async fn modelled_methods_reach_their_trait_methods() {
        init_logging();
        let response = dispatch(
            &FieldsOnly,
            RequestEnvelope::new(2, "getFields", json!({"templateId": "invoice"})),
        )
        .await;
        assert_eq!(
            response.into_result(),
            Ok(json!([{"name": "invoice.title", "kind": "text", "required": false}]))
        );

        let response = dispatch(
            &FieldsOnly,
            RequestEnvelope::new(3, "setShortcut", json!({"action": "undo", "keys": "Ctrl+Z"})),
        )
        .await;
        assert_eq!(response.into_result(), Ok(json!({"action": "undo", "keys": "Ctrl+Z"})));
    }

    #[tokio::test]
    async fn errors_keep_the_correlation_id() {
        init_logging();
        let response =
            dispatch(&FieldsOnly, RequestEnvelope::new(4, "save", json!({"document": 1}))).await;
        assert_eq!(response.id, 4);
        assert_eq!(response.into_result().expect_err("bad params").code, code::INVALID_PARAMS);

        let response = dispatch(
            &FieldsOnly,
            RequestEnvelope::new(5, "loadTemplate", json!({"templateId": "gone"})),
        )
        .await;
        assert_eq!(response.into_result().expect_err("missing").code, code::NOT_FOUND);
    }

    #[tokio::test]
    async fn unmodelled_methods_go_to_the_extension_hook() {
        init_logging();
        let response =
            dispatch(&FieldsOnly, RequestEnvelope::new(6, "echo", json!({"k": "v"}))).await;
        assert_eq!(response.into_result(), Ok(json!({"k": "v"})));

        let response = dispatch(&StubBackend, RequestEnvelope::new(7, "echo", json!({}))).await;
        assert_eq!(response.into_result().expect_err("unknown").code, code::UNKNOWN_METHOD);
    }
}
