//! In-flight coalescing of identical calls.
//!
//! This is not a result cache: an entry lives exactly as long as the logical
//! call it tracks, and a call issued after it resolved goes to the backend.

use std::collections::HashMap;
use std::fmt::Write as _;

use canvas_ipc::RequestId;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;

pub type CallId = u64;
pub type WaiterId = u64;
pub type Completion = oneshot::Sender<Result<Value, BridgeError>>;

/// Coalescing key: method name plus canonical JSON of the params, computed
/// once at call time.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(method: &str, params: &Value) -> Self {
        let mut key = String::with_capacity(method.len() + 32);
        key.push_str(method);
        key.push('\0');
        write_canonical(&mut key, params);
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// JSON with object keys sorted at every level.
fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (index, (key, value)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(out, value);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

/// One caller attached to a logical call.
#[derive(Debug)]
pub struct Waiter {
    pub id: WaiterId,
    pub tx: Completion,
}

/// A logical call: one or more waiters sharing a single request at a time.
#[derive(Debug)]
pub struct InFlightCall {
    pub key: Option<DedupKey>,
    pub method: String,
    pub waiters: Vec<Waiter>,
    pub current_request: Option<RequestId>,
    pub attempts: u32,
    pub token: CancellationToken,
    pub probe: bool,
}

impl InFlightCall {
    pub fn new(key: Option<DedupKey>, method: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            key,
            method: method.into(),
            waiters: Vec::new(),
            current_request: None,
            attempts: 0,
            token,
            probe: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct Deduplicator {
    by_key: HashMap<DedupKey, CallId>,
    calls: HashMap<CallId, InFlightCall>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The in-flight call currently owning `key`, if any.
    pub fn find(&self, key: &DedupKey) -> Option<CallId> {
        self.by_key.get(key).copied()
    }

    pub fn insert(&mut self, call_id: CallId, call: InFlightCall) {
        if let Some(key) = &call.key {
            self.by_key.insert(key.clone(), call_id);
        }
        self.calls.insert(call_id, call);
    }

    /// Adds a waiter to a live call. Returns `false` when the call is gone.
    pub fn attach(&mut self, call_id: CallId, waiter: Waiter) -> bool {
        match self.calls.get_mut(&call_id) {
            Some(call) => {
                call.waiters.push(waiter);
                true
            }
            None => {
                drop(waiter);
                false
            }
        }
    }

    /// Removes one waiter. Returns its completion handle and the number of
    /// waiters still attached.
    pub fn detach(&mut self, call_id: CallId, waiter_id: WaiterId) -> Option<(Completion, usize)> {
        let call = self.calls.get_mut(&call_id)?;
        let index = call.waiters.iter().position(|waiter| waiter.id == waiter_id)?;
        let waiter = call.waiters.swap_remove(index);
        Some((waiter.tx, call.waiters.len()))
    }

    pub fn get(&self, call_id: CallId) -> Option<&InFlightCall> {
        self.calls.get(&call_id)
    }

    pub fn get_mut(&mut self, call_id: CallId) -> Option<&mut InFlightCall> {
        self.calls.get_mut(&call_id)
    }

    /// Forgets a finished call so the next identical call goes to the backend.
    pub fn remove(&mut self, call_id: CallId) -> Option<InFlightCall> {
        let call = self.calls.remove(&call_id)?;
        if let Some(key) = &call.key {
            if self.by_key.get(key) == Some(&call_id) {
                self.by_key.remove(key);
            }
        }
        Some(call)
    }

    pub fn drain(&mut self) -> Vec<InFlightCall> {
        self.by_key.clear();
        self.calls.drain().map(|(_, call)| call).collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn waiter(id: WaiterId) -> (Waiter, oneshot::Receiver<Result<Value, BridgeError>>) {
        let (tx, rx) = oneshot::channel();
        (Waiter { id, tx }, rx)
    }

    #[test]
    fn key_ignores_object_key_order() {
        let a = json!({"templateId": "invoice", "options": {"deep": true, "all": [1, {"b": 2, "a": 1}]}});
        let b = json!({"options": {"all": [1, {"a": 1, "b": 2}], "deep": true}, "templateId": "invoice"});
        assert_eq!(DedupKey::new("getFields", &a), DedupKey::new("getFields", &b));
        assert_eq!(
            DedupKey::new("getFields", &a).as_str(),
            "getFields\0{\"options\":{\"all\":[1,{\"a\":1,\"b\":2}],\"deep\":true},\"templateId\":\"invoice\"}"
        );
    }

    #[test]
    fn key_distinguishes_method_and_values() {
        let params = json!({"templateId": "invoice"});
        assert_ne!(DedupKey::new("getFields", &params), DedupKey::new("loadTemplate", &params));
        assert_ne!(
            DedupKey::new("getFields", &params),
            DedupKey::new("getFields", &json!({"templateId": "receipt"}))
        );
        assert_ne!(DedupKey::new("a", &json!("1")), DedupKey::new("a", &json!(1)));
    }

    #[test]
    fn key_is_fixed_at_creation() {
        let mut params = json!({"templateId": "invoice"});
        let key = DedupKey::new("getFields", &params);
        params["templateId"] = json!("receipt");
        assert_eq!(key, DedupKey::new("getFields", &json!({"templateId": "invoice"})));
    }

    #[test]
    fn waiters_share_a_call_until_it_is_removed() {
        let mut dedup = Deduplicator::new();
        let key = DedupKey::new("getFields", &json!({}));
        dedup.insert(1, InFlightCall::new(Some(key.clone()), "getFields", CancellationToken::new()));
        assert_eq!(dedup.find(&key), Some(1));

        let (first, _rx1) = waiter(10);
        let (second, _rx2) = waiter(11);
        assert!(dedup.attach(1, first));
        assert!(dedup.attach(1, second));

        let (_, remaining) = dedup.detach(1, 10).expect("attached");
        assert_eq!(remaining, 1);
        assert!(dedup.detach(1, 10).is_none());

        let call = dedup.remove(1).expect("in flight");
        assert_eq!(call.waiters.len(), 1);
        assert_eq!(dedup.find(&key), None);
        assert_eq!(dedup.len(), 0);

        let (late, _rx3) = waiter(12);
        assert!(!dedup.attach(1, late));
    }

    #[test]
    fn uncoalesced_calls_are_never_found() {
        let mut dedup = Deduplicator::new();
        dedup.insert(7, InFlightCall::new(None, "save", CancellationToken::new()));
        assert_eq!(dedup.find(&DedupKey::new("save", &json!({}))), None);
        assert_eq!(dedup.len(), 1);
        assert_eq!(dedup.drain().len(), 1);
    }
}
