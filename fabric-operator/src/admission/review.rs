//! AdmissionReview v1 envelope and JSON-patch construction.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::errors::AdmissionError;
use super::user::UserInfo;

pub const REVIEW_API_VERSION: &str = "admission.k8s.io/v1";
pub const REVIEW_KIND: &str = "AdmissionReview";
pub const PATCH_TYPE_JSON: &str = "JSONPatch";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default = "review_api_version")]
    pub api_version: String,
    #[serde(default = "review_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

fn review_api_version() -> String {
    REVIEW_API_VERSION.to_string()
}

fn review_kind() -> String {
    REVIEW_KIND.to_string()
}

impl AdmissionReview {
    /// Wrap `response` in an envelope echoing the request's version.
    pub fn respond(&self, response: AdmissionResponse) -> Self {
        Self {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            request: None,
            response: Some(response),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default)]
    pub kind: GroupVersionKind,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub operation: Operation,
    #[serde(default)]
    pub user_info: UserInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Value>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStatus {
    pub code: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResponseStatus>,
    /// Base64 encoded JSON patch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
}

impl AdmissionResponse {
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            ..Default::default()
        }
    }

    pub fn deny(uid: impl Into<String>, err: &AdmissionError) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            status: Some(ResponseStatus {
                code: err.code(),
                reason: err.reason().to_string(),
                message: err.to_string(),
            }),
            ..Default::default()
        }
    }

    /// Attach `ops` as a base64 JSON patch. An empty patch is left off.
    pub fn with_patch(mut self, ops: Vec<Value>) -> Self {
        if ops.is_empty() {
            return self;
        }
        let encoded = serde_json::to_vec(&Value::Array(ops)).unwrap_or_default();
        self.patch = Some(STANDARD.encode(encoded));
        self.patch_type = Some(PATCH_TYPE_JSON.to_string());
        self
    }

    /// Decode the attached patch operations.
    pub fn patch_ops(&self) -> Vec<Value> {
        self.patch
            .as_deref()
            .and_then(|p| STANDARD.decode(p).ok())
            .and_then(|bytes| serde_json::from_slice::<Vec<Value>>(&bytes).ok())
            .unwrap_or_default()
    }
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// RFC 6902 operations turning `old` into `new`. Objects are walked key by
/// key; arrays and scalars are replaced whole.
pub fn json_patch(old: &Value, new: &Value) -> Vec<Value> {
    let mut ops = Vec::new();
    diff_into(&mut ops, String::new(), old, new);
    ops
}

fn diff_into(ops: &mut Vec<Value>, path: String, old: &Value, new: &Value) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => diff_objects(ops, &path, a, b),
        _ => ops.push(json!({"op": "replace", "path": path, "value": new})),
    }
}

fn diff_objects(ops: &mut Vec<Value>, path: &str, old: &Map<String, Value>, new: &Map<String, Value>) {
    for (key, old_value) in old {
        let child = format!("{}/{}", path, escape_pointer(key));
        match new.get(key) {
            Some(new_value) => diff_into(ops, child, old_value, new_value),
            None => ops.push(json!({"op": "remove", "path": child})),
        }
    }
    for (key, new_value) in new {
        if !old.contains_key(key) {
            let child = format!("{}/{}", path, escape_pointer(key));
            ops.push(json!({"op": "add", "path": child, "value": new_value}));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_adds_and_replaces_nested_fields() {
        let old = json!({"spec": {"federation": "fed1", "a/b": 1}});
        let new = json!({"spec": {"federation": "fed1", "a/b": 2, "startAt": "now"}});
        let ops = json_patch(&old, &new);
        assert_eq!(
            ops,
            vec![
                json!({"op": "replace", "path": "/spec/a~1b", "value": 2}),
                json!({"op": "add", "path": "/spec/startAt", "value": "now"}),
            ]
        );
    }

    #[test]
    fn test_patch_of_equal_documents_is_empty() {
        let doc = json!({"spec": {"members": [1, 2]}});
        assert!(json_patch(&doc, &doc).is_empty());
    }

    #[test]
    fn test_response_carries_encoded_patch() {
        let ops = vec![json!({"op": "remove", "path": "/spec/x"})];
        let resp = AdmissionResponse::allow("u1").with_patch(ops.clone());
        assert_eq!(resp.patch_type.as_deref(), Some(PATCH_TYPE_JSON));
        assert_eq!(resp.patch_ops(), ops);
        assert!(AdmissionResponse::allow("u1").with_patch(vec![]).patch.is_none());
    }

    #[test]
    fn test_request_decodes_from_review_json() {
        let review: AdmissionReview = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "abc",
                "kind": {"group": "ibp.com", "version": "v1beta1", "kind": "Vote"},
                "operation": "UPDATE",
                "userInfo": {"username": "alice", "groups": ["team"]},
                "object": {}
            }
        }))
        .unwrap();
        let req = review.request.unwrap();
        assert_eq!(req.operation, Operation::Update);
        assert_eq!(req.user_info.username, "alice");
        assert!(req.old_object.is_none());
    }
}
