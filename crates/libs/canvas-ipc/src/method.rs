use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::WireError;
use crate::PING_METHOD;

pub mod name {
    pub const GET_FIELDS: &str = "getFields";
    pub const SAVE: &str = "save";
    pub const LIST_TEMPLATES: &str = "listTemplates";
    pub const LOAD_TEMPLATE: &str = "loadTemplate";
    pub const DELETE_TEMPLATE: &str = "deleteTemplate";
    pub const LIST_PLUGINS: &str = "listPlugins";
    pub const ENABLE_PLUGIN: &str = "enablePlugin";
    pub const DISABLE_PLUGIN: &str = "disablePlugin";
    pub const LIST_SHORTCUTS: &str = "listShortcuts";
    pub const SET_SHORTCUT: &str = "setShortcut";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GetFieldsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SaveParams {
    pub template_id: String,
    #[serde(default)]
    pub document: Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRef {
    pub template_id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PluginRef {
    pub plugin_id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutBinding {
    pub action: String,
    pub keys: String,
}

/// Methods the editor UI knows how to issue.
///
/// Methods introduced by a newer backend travel as [`Method::Other`] with
/// their params untouched.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Method {
    Ping,
    GetFields(GetFieldsParams),
    Save(SaveParams),
    ListTemplates,
    LoadTemplate(TemplateRef),
    DeleteTemplate(TemplateRef),
    ListPlugins,
    EnablePlugin(PluginRef),
    DisablePlugin(PluginRef),
    ListShortcuts,
    SetShortcut(ShortcutBinding),
    Other { name: String, params: Value },
}

impl Method {
    pub fn name(&self) -> &str {
        match self {
            Self::Ping => PING_METHOD,
            Self::GetFields(_) => name::GET_FIELDS,
            Self::Save(_) => name::SAVE,
            Self::ListTemplates => name::LIST_TEMPLATES,
            Self::LoadTemplate(_) => name::LOAD_TEMPLATE,
            Self::DeleteTemplate(_) => name::DELETE_TEMPLATE,
            Self::ListPlugins => name::LIST_PLUGINS,
            Self::EnablePlugin(_) => name::ENABLE_PLUGIN,
            Self::DisablePlugin(_) => name::DISABLE_PLUGIN,
            Self::ListShortcuts => name::LIST_SHORTCUTS,
            Self::SetShortcut(_) => name::SET_SHORTCUT,
            Self::Other { name, .. } => name.as_str(),
        }
    }

    /// Wire params for this method. Parameterless methods send an empty object.
    pub fn params(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Ping | Self::ListTemplates | Self::ListPlugins | Self::ListShortcuts => {
                Ok(json!({}))
            }
            Self::GetFields(params) => serde_json::to_value(params),
            Self::Save(params) => serde_json::to_value(params),
            Self::LoadTemplate(params) | Self::DeleteTemplate(params) => {
                serde_json::to_value(params)
            }
            Self::EnablePlugin(params) | Self::DisablePlugin(params) => {
                serde_json::to_value(params)
            }
            Self::SetShortcut(params) => serde_json::to_value(params),
            Self::Other { params, .. } => Ok(params.clone()),
        }
    }

    /// Parses a wire method. Known names with malformed params are rejected;
    /// unknown names fall back to [`Method::Other`].
    pub fn parse(method: &str, params: Value) -> Result<Self, WireError> {
        let parsed = match method {
            PING_METHOD => Self::Ping,
            name::GET_FIELDS => Self::GetFields(decode_optional(method, params)?),
            name::SAVE => Self::Save(decode(method, params)?),
            name::LIST_TEMPLATES => Self::ListTemplates,
            name::LOAD_TEMPLATE => Self::LoadTemplate(decode(method, params)?),
            name::DELETE_TEMPLATE => Self::DeleteTemplate(decode(method, params)?),
            name::LIST_PLUGINS => Self::ListPlugins,
            name::ENABLE_PLUGIN => Self::EnablePlugin(decode(method, params)?),
            name::DISABLE_PLUGIN => Self::DisablePlugin(decode(method, params)?),
            name::LIST_SHORTCUTS => Self::ListShortcuts,
            name::SET_SHORTCUT => Self::SetShortcut(decode(method, params)?),
            other => Self::Other { name: other.to_owned(), params },
        };
        Ok(parsed)
    }

    pub fn is_ping(&self) -> bool {
        matches!(self, Self::Ping)
    }
}

fn decode<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, WireError> {
    serde_json::from_value(params).map_err(|err| WireError::invalid_params(method, err))
}

fn decode_optional<T: DeserializeOwned + Default>(
    method: &str,
    params: Value,
) -> Result<T, WireError> {
    if params.is_null() {
        return Ok(T::default());
    }
    decode(method, params)
}
