use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WireError;

// ── Type aliases ──────────────────────────────────────────────────────────────

/// Correlation identifier, unique per bridge instance.
pub type RequestId = u64;

// ── Priority ──────────────────────────────────────────────────────────────────

/// Dispatch priority. Higher priorities leave the queue first.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

// ── Requests ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RequestEnvelope {
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, rename = "timeoutMs", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl RequestEnvelope {
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self { id, method: method.into(), params, priority: None, timeout_ms: None }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BatchEnvelope {
    pub batch: Vec<RequestEnvelope>,
}

/// Anything the UI side writes to the channel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Outbound {
    Batch(BatchEnvelope),
    Request(RequestEnvelope),
}

impl Outbound {
    /// Flattens the message into its requests, in send order.
    pub fn into_requests(self) -> Vec<RequestEnvelope> {
        match self {
            Self::Batch(batch) => batch.batch,
            Self::Request(request) => vec![request],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Batch(batch) => batch.batch.len(),
            Self::Request(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn request_ids(&self) -> Vec<RequestId> {
        match self {
            Self::Batch(batch) => batch.batch.iter().map(|request| request.id).collect(),
            Self::Request(request) => vec![request.id],
        }
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl ResponseEnvelope {
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self { id, result: Some(result), error: None }
    }

    pub fn err(id: RequestId, error: WireError) -> Self {
        Self { id, result: None, error: Some(error) }
    }

    /// An envelope with an error is a failure even if it also carries a result.
    pub fn into_result(self) -> Result<Value, WireError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Readiness handshake written by the backend once it can serve requests.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadySignal {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ReadySignal {
    pub fn ready() -> Self {
        Self { ready: true, version: None }
    }

    pub fn shutting_down() -> Self {
        Self { ready: false, version: None }
    }
}

/// Anything the backend writes to the channel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Inbound {
    Response(ResponseEnvelope),
    Ready(ReadySignal),
}

// ── Templates ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct FieldInfo {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub required: bool,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { name: name.into(), kind: kind.into(), required: false }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub revision: u64,
}

impl TemplateSummary {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), revision: 0 }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TemplateDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub document: Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct SaveReceipt {
    pub template_id: String,
    pub revision: u64,
}

impl SaveReceipt {
    pub fn new(template_id: impl Into<String>, revision: u64) -> Self {
        Self { template_id: template_id.into(), revision }
    }
}

// ── Plugins ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub enabled: bool,
}

impl PluginInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, enabled: bool) -> Self {
        Self { id: id.into(), name: name.into(), version: String::new(), enabled }
    }
}

// ── Shortcuts ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ShortcutInfo {
    pub action: String,
    pub keys: String,
}

impl ShortcutInfo {
    pub fn new(action: impl Into<String>, keys: impl Into<String>) -> Self {
        Self { action: action.into(), keys: keys.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_orders_low_to_critical() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!(serde_json::to_value(Priority::High).expect("encode"), json!("high"));
    }

    #[test]
    fn outbound_distinguishes_batch_from_single_request() {
        let single: Outbound =
            serde_json::from_value(json!({"id": 4, "method": "getFields", "params": {}}))
                .expect("decode single");
        assert!(matches!(single, Outbound::Request(ref request) if request.id == 4));

        let batch: Outbound = serde_json::from_value(json!({
            "batch": [
                {"id": 1, "method": "listPlugins"},
                {"id": 2, "method": "save", "params": {"templateId": "t"}, "priority": "high", "timeoutMs": 250}
            ]
        }))
        .expect("decode batch");
        assert_eq!(batch.request_ids(), vec![1, 2]);
        let requests = batch.into_requests();
        assert_eq!(requests[1].priority, Some(Priority::High));
        assert_eq!(requests[1].timeout_ms, Some(250));
        assert_eq!(requests[0].params, Value::Null);
    }

    #[test]
    fn inbound_distinguishes_response_from_ready() {
        let ready: Inbound =
            serde_json::from_value(json!({"ready": true, "version": "1.4"})).expect("decode");
        assert!(matches!(ready, Inbound::Ready(ReadySignal { ready: true, .. })));

        let response: Inbound = serde_json::from_value(json!({
            "id": 9,
            "error": {"code": "BUSY", "message": "later", "retryable": true}
        }))
        .expect("decode");
        let Inbound::Response(response) = response else {
            panic!("expected response");
        };
        let err = response.into_result().expect_err("error response");
        assert!(err.retryable);
    }

    #[test]
    fn response_without_result_or_error_is_null_success() {
        let response = ResponseEnvelope { id: 1, result: None, error: None };
        assert_eq!(response.into_result(), Ok(Value::Null));
    }
}
