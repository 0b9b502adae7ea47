use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use serde_json::{Map, Value as JsonValue, json};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Method, Request, Session, Transport};
use crate::codec::format_date;
use crate::config::DEFAULT_API_VERSION;
use crate::core::{ObjectError, Result};

const OBJECT_NOT_FOUND: i64 = 101;
const INVALID_TYPE: i64 = 111;
const CONDITION_FAILED: i64 = 305;

/// A request as received by [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<JsonValue>,
}

type Object = Map<String, JsonValue>;

#[derive(Default)]
struct BackendState {
    /// class -> objectId -> stored object
    classes: HashMap<String, BTreeMap<String, Object>>,
    /// "class/id/field" -> member object ids
    relations: HashMap<String, BTreeSet<String>>,
    /// class -> (code, message) returned for every write
    failures: HashMap<String, (i64, String)>,
    requests: Vec<RecordedRequest>,
}

/// In-process emulation of the backend REST surface.
///
/// Handles `POST /classes/{class}`, `GET|PUT|DELETE /classes/{class}/{id}`
/// and `POST /batch`, applying `__op` envelopes the way the backend does.
pub struct MemoryBackend {
    api_prefix: String,
    state: Mutex<BackendState>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            api_prefix: format!("/{}", DEFAULT_API_VERSION),
            state: Mutex::new(BackendState::default()),
        }
    }

    /// Make every create or update on `class` fail with `code`.
    pub async fn inject_failure(&self, class_name: &str, code: i64, message: &str) {
        let mut state = self.state.lock().await;
        state
            .failures
            .insert(class_name.to_string(), (code, message.to_string()));
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    /// Store an object directly, bypassing the request log. Returns its id.
    pub async fn seed(&self, class_name: &str, fields: JsonValue) -> String {
        let mut state = self.state.lock().await;
        let id = new_object_id();
        let now = format_date(&Utc::now());
        let mut object = fields.as_object().cloned().unwrap_or_default();
        object.insert("objectId".into(), JsonValue::from(id.as_str()));
        object.insert("createdAt".into(), JsonValue::from(now.as_str()));
        object.insert("updatedAt".into(), JsonValue::from(now));
        state
            .classes
            .entry(class_name.to_string())
            .or_default()
            .insert(id.clone(), object);
        id
    }

    pub async fn object(&self, class_name: &str, id: &str) -> Option<JsonValue> {
        let state = self.state.lock().await;
        state
            .classes
            .get(class_name)
            .and_then(|objects| objects.get(id))
            .cloned()
            .map(JsonValue::Object)
    }

    pub async fn object_count(&self, class_name: &str) -> usize {
        let state = self.state.lock().await;
        state.classes.get(class_name).map_or(0, BTreeMap::len)
    }

    /// Ids currently in the relation `field` of the given object.
    pub async fn relation_members(&self, class_name: &str, id: &str, field: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .relations
            .get(&relation_path(class_name, id, field))
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().await.requests.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.state.lock().await.requests.len()
    }

    fn strip_prefix<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(self.api_prefix.as_str()).unwrap_or(path)
    }

    fn batch(&self, state: &mut BackendState, body: Option<&JsonValue>) -> Result<JsonValue> {
        let requests = body
            .and_then(|b| b.get("requests"))
            .and_then(JsonValue::as_array)
            .ok_or_else(|| bad_request("batch body must carry a 'requests' array"))?;

        let mut results = Vec::with_capacity(requests.len());
        for item in requests {
            let method = parse_method(item.get("method"))?;
            let path = item
                .get("path")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| bad_request("batch item without path"))?;
            let path = self.strip_prefix(path);
            if path == "/batch" {
                return Err(bad_request("nested batch requests are not supported"));
            }
            match state.route(method, path, &[], item.get("body")) {
                Ok(success) => results.push(json!({ "success": success })),
                Err(ObjectError::Cloud { code, message, .. }) => {
                    results.push(json!({ "error": { "code": code, "error": message } }))
                }
                Err(other) => return Err(other),
            }
        }
        Ok(JsonValue::Array(results))
    }
}

#[async_trait]
impl Transport for MemoryBackend {
    async fn send(&self, request: Request, _session: &Session) -> Result<JsonValue> {
        let mut state = self.state.lock().await;
        state.requests.push(RecordedRequest {
            method: request.method,
            path: request.path.clone(),
            query: request.query.clone(),
            body: request.body.clone(),
        });
        debug!("memory backend: {} {}", request.method, request.path);

        let path = self.strip_prefix(&request.path);
        let outcome = if request.method == Method::Post && path == "/batch" {
            self.batch(&mut state, request.body.as_ref())
        } else {
            state.route(request.method, path, &request.query, request.body.as_ref())
        };
        if let Err(err) = &outcome {
            warn!("memory backend: {} {} failed: {}", request.method, request.path, err);
        }
        outcome
    }
}

impl BackendState {
    fn route(
        &mut self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&JsonValue>,
    ) -> Result<JsonValue> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let fetch_when_save = query_value(query, "fetchWhenSave") == Some("true");
        let condition = match query_value(query, "where") {
            Some(raw) => Some(serde_json::from_str::<JsonValue>(raw)?),
            None => None,
        };

        match (method, segments.as_slice()) {
            (Method::Post, ["classes", class_name]) => {
                self.create(class_name, body, fetch_when_save)
            }
            (Method::Get, ["classes", class_name, id]) => self
                .find(class_name, id)
                .cloned()
                .map(JsonValue::Object)
                .ok_or_else(not_found),
            (Method::Put, ["classes", class_name, id]) => {
                self.update(class_name, id, body, condition.as_ref(), fetch_when_save)
            }
            (Method::Delete, ["classes", class_name, id]) => {
                self.destroy(class_name, id, condition.as_ref())
            }
            _ => Err(ObjectError::Cloud {
                status: Some(404),
                code: 1,
                message: format!("Unsupported route {} {}", method, path),
            }),
        }
    }

    fn find(&self, class_name: &str, id: &str) -> Option<&Object> {
        self.classes.get(class_name).and_then(|objects| objects.get(id))
    }

    fn check_injected_failure(&self, class_name: &str) -> Result<()> {
        match self.failures.get(class_name) {
            Some((code, message)) => Err(ObjectError::Cloud {
                status: Some(400),
                code: *code,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn create(
        &mut self,
        class_name: &str,
        body: Option<&JsonValue>,
        fetch_when_save: bool,
    ) -> Result<JsonValue> {
        self.check_injected_failure(class_name)?;
        let id = new_object_id();
        let now = format_date(&Utc::now());

        let mut object = Object::new();
        self.apply_body(class_name, &id, &mut object, body)?;
        object.insert("objectId".into(), JsonValue::from(id.as_str()));
        object.insert("createdAt".into(), JsonValue::from(now.as_str()));
        object.insert("updatedAt".into(), JsonValue::from(now.as_str()));

        let response = if fetch_when_save {
            JsonValue::Object(object.clone())
        } else {
            json!({ "objectId": id, "createdAt": now })
        };
        self.classes
            .entry(class_name.to_string())
            .or_default()
            .insert(id, object);
        Ok(response)
    }

    fn update(
        &mut self,
        class_name: &str,
        id: &str,
        body: Option<&JsonValue>,
        condition: Option<&JsonValue>,
        fetch_when_save: bool,
    ) -> Result<JsonValue> {
        self.check_injected_failure(class_name)?;
        let mut object = self.find(class_name, id).cloned().ok_or_else(not_found)?;
        if let Some(condition) = condition {
            if !matches_condition(&object, condition) {
                return Err(condition_failed());
            }
        }

        self.apply_body(class_name, id, &mut object, body)?;
        let now = format_date(&Utc::now());
        object.insert("updatedAt".into(), JsonValue::from(now.as_str()));

        let response = if fetch_when_save {
            JsonValue::Object(object.clone())
        } else {
            json!({ "objectId": id, "updatedAt": now })
        };
        self.classes
            .entry(class_name.to_string())
            .or_default()
            .insert(id.to_string(), object);
        Ok(response)
    }

    fn destroy(&mut self, class_name: &str, id: &str, condition: Option<&JsonValue>) -> Result<JsonValue> {
        let object = self.find(class_name, id).ok_or_else(not_found)?;
        if let Some(condition) = condition {
            if !matches_condition(object, condition) {
                return Err(condition_failed());
            }
        }
        if let Some(objects) = self.classes.get_mut(class_name) {
            objects.remove(id);
        }
        let prefix = relation_path(class_name, id, "");
        self.relations.retain(|path, _| !path.starts_with(&prefix));
        Ok(json!({}))
    }

    fn apply_body(
        &mut self,
        class_name: &str,
        id: &str,
        object: &mut Object,
        body: Option<&JsonValue>,
    ) -> Result<()> {
        let Some(body) = body else {
            return Ok(());
        };
        let fields = body
            .as_object()
            .ok_or_else(|| bad_request("request body must be an object"))?;
        for (field, wire) in fields {
            if matches!(field.as_str(), "objectId" | "createdAt" | "updatedAt") {
                continue;
            }
            let path = relation_path(class_name, id, field);
            match self.apply_field(&path, object.get(field), wire)? {
                Some(value) => object.insert(field.clone(), value),
                None => object.remove(field),
            };
        }
        Ok(())
    }

    /// Server-side effect of one wire operation on a stored field.
    fn apply_field(
        &mut self,
        relation: &str,
        current: Option<&JsonValue>,
        wire: &JsonValue,
    ) -> Result<Option<JsonValue>> {
        let Some(op) = wire.get("__op").and_then(JsonValue::as_str) else {
            return Ok(Some(wire.clone()));
        };
        let objects = || -> Vec<JsonValue> {
            wire.get("objects")
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default()
        };

        match op {
            "Delete" => Ok(None),
            "Increment" => {
                let amount = wire.get("amount").unwrap_or(&JsonValue::Null);
                increment(current, amount).map(Some)
            }
            "Add" | "AddUnique" | "Remove" => {
                let mut list = match current {
                    None | Some(JsonValue::Null) => Vec::new(),
                    Some(JsonValue::Array(items)) => items.clone(),
                    Some(other) => {
                        return Err(invalid_type(format!("cannot apply {} to {}", op, other)));
                    }
                };
                for object in objects() {
                    match op {
                        "Add" => list.push(object),
                        "AddUnique" if !list.contains(&object) => list.push(object),
                        "Remove" => list.retain(|item| *item != object),
                        _ => {}
                    }
                }
                Ok(Some(JsonValue::Array(list)))
            }
            "AddRelation" | "RemoveRelation" => {
                let objects = objects();
                let target_class = objects
                    .first()
                    .and_then(|o| o.get("className"))
                    .cloned()
                    .or_else(|| current.and_then(|c| c.get("className")).cloned())
                    .unwrap_or(JsonValue::Null);
                let members = self.relations.entry(relation.to_string()).or_default();
                for object in &objects {
                    let Some(id) = object.get("objectId").and_then(JsonValue::as_str) else {
                        return Err(invalid_type("relation member without objectId".into()));
                    };
                    if op == "AddRelation" {
                        members.insert(id.to_string());
                    } else {
                        members.remove(id);
                    }
                }
                Ok(Some(json!({ "__type": "Relation", "className": target_class })))
            }
            "Batch" => {
                let mut value = current.cloned();
                for nested in wire.get("ops").and_then(JsonValue::as_array).into_iter().flatten() {
                    value = self.apply_field(relation, value.as_ref(), nested)?;
                }
                Ok(value)
            }
            other => Err(bad_request(&format!("unknown operation {}", other))),
        }
    }
}

fn increment(current: Option<&JsonValue>, amount: &JsonValue) -> Result<JsonValue> {
    let base = match current {
        None | Some(JsonValue::Null) => JsonValue::from(0),
        Some(value) if value.is_number() => value.clone(),
        Some(other) => return Err(invalid_type(format!("cannot increment {}", other))),
    };
    if let (Some(a), Some(b)) = (base.as_i64(), amount.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(JsonValue::from(sum));
        }
    }
    match (base.as_f64(), amount.as_f64()) {
        (Some(a), Some(b)) => Ok(json!(a + b)),
        _ => Err(invalid_type(format!("invalid increment amount {}", amount))),
    }
}

/// Evaluate a `where` document: plain values compare for equality, maps of
/// `$`-operators compare with each operator.
fn matches_condition(object: &Object, condition: &JsonValue) -> bool {
    let Some(clauses) = condition.as_object() else {
        return false;
    };
    clauses.iter().all(|(field, expected)| {
        let actual = object.get(field);
        match expected.as_object() {
            Some(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => ops
                .iter()
                .all(|(op, operand)| matches_operator(actual, op, operand)),
            _ => actual == Some(expected),
        }
    })
}

fn matches_operator(actual: Option<&JsonValue>, op: &str, operand: &JsonValue) -> bool {
    match op {
        "$ne" => actual != Some(operand),
        "$exists" => actual.is_some() == operand.as_bool().unwrap_or(true),
        "$in" => match (actual, operand.as_array()) {
            (Some(value), Some(candidates)) => candidates.contains(value),
            _ => false,
        },
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let Some(ordering) = actual.and_then(|value| compare(value, operand)) else {
                return false;
            };
            match op {
                "$gt" => ordering == Ordering::Greater,
                "$gte" => ordering != Ordering::Less,
                "$lt" => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }
        }
        _ => false,
    }
}

fn compare(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        // Date envelopes carry a sortable ISO string
        (JsonValue::Object(a), JsonValue::Object(b)) => match (a.get("iso"), b.get("iso")) {
            (Some(a), Some(b)) => compare(a, b),
            _ => None,
        },
        _ => None,
    }
}

fn parse_method(raw: Option<&JsonValue>) -> Result<Method> {
    match raw.and_then(JsonValue::as_str) {
        Some("GET") => Ok(Method::Get),
        Some("POST") => Ok(Method::Post),
        Some("PUT") => Ok(Method::Put),
        Some("DELETE") => Ok(Method::Delete),
        other => Err(bad_request(&format!("unsupported batch method {:?}", other))),
    }
}

fn query_value<'a>(query: &'a [(String, String)], key: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn relation_path(class_name: &str, id: &str, field: &str) -> String {
    format!("{}/{}/{}", class_name, id, field)
}

fn new_object_id() -> String {
    Uuid::new_v4().simple().to_string()[..24].to_string()
}

fn not_found() -> ObjectError {
    ObjectError::Cloud {
        status: Some(404),
        code: OBJECT_NOT_FOUND,
        message: "Object not found.".into(),
    }
}

fn condition_failed() -> ObjectError {
    ObjectError::Cloud {
        status: Some(400),
        code: CONDITION_FAILED,
        message: "No effect on updating/deleting a document.".into(),
    }
}

fn invalid_type(message: String) -> ObjectError {
    ObjectError::Cloud {
        status: Some(400),
        code: INVALID_TYPE,
        message,
    }
}

fn bad_request(message: &str) -> ObjectError {
    ObjectError::Cloud {
        status: Some(400),
        code: 107,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send(backend: &MemoryBackend, request: Request) -> Result<JsonValue> {
        backend.send(request, &Session::anonymous()).await
    }

    #[tokio::test]
    async fn test_create_update_fetch_delete() {
        let backend = MemoryBackend::new();
        let created = send(
            &backend,
            Request::new(Method::Post, "/classes/Post").body(json!({"title": "hi", "views": 1})),
        )
        .await
        .unwrap();
        let id = created["objectId"].as_str().unwrap().to_string();
        assert!(created.get("createdAt").is_some());

        let path = format!("/classes/Post/{}", id);
        send(
            &backend,
            Request::new(Method::Put, &path).body(json!({
                "views": {"__op": "Increment", "amount": 2},
                "tags": {"__op": "AddUnique", "objects": ["a", "a", "b"]},
            })),
        )
        .await
        .unwrap();

        let fetched = send(&backend, Request::new(Method::Get, &path)).await.unwrap();
        assert_eq!(fetched["views"], json!(3));
        assert_eq!(fetched["tags"], json!(["a", "b"]));

        send(&backend, Request::new(Method::Delete, &path)).await.unwrap();
        let err = send(&backend, Request::new(Method::Get, &path)).await.unwrap_err();
        assert_eq!(err.code(), Some(OBJECT_NOT_FOUND));
        assert_eq!(backend.request_count().await, 4);
    }

    #[tokio::test]
    async fn test_batch_reports_items_positionally() {
        let backend = MemoryBackend::new();
        backend.inject_failure("Broken", 142, "nope").await;

        let body = json!({"requests": [
            {"method": "POST", "path": "/1.1/classes/Fine", "body": {"a": 1}},
            {"method": "POST", "path": "/1.1/classes/Broken", "body": {"a": 2}},
        ]});
        let response = send(&backend, Request::new(Method::Post, "/batch").body(body))
            .await
            .unwrap();

        assert!(response[0]["success"]["objectId"].is_string());
        assert_eq!(response[1]["error"]["code"], json!(142));
        assert_eq!(backend.object_count("Fine").await, 1);
        assert_eq!(backend.object_count("Broken").await, 0);
    }

    #[tokio::test]
    async fn test_where_guard() {
        let backend = MemoryBackend::new();
        let id = backend.seed("Account", json!({"balance": 10})).await;
        let path = format!("/classes/Account/{}", id);

        let withdraw = |guard: JsonValue| {
            Request::new(Method::Put, &path)
                .query("where", guard.to_string())
                .query("fetchWhenSave", "true")
                .body(json!({"balance": {"__op": "Increment", "amount": -5}}))
        };

        let response = send(&backend, withdraw(json!({"balance": {"$gte": 5}}))).await.unwrap();
        assert_eq!(response["balance"], json!(5));

        let err = send(&backend, withdraw(json!({"balance": {"$gt": 5}}))).await.unwrap_err();
        assert_eq!(err.code(), Some(CONDITION_FAILED));
        assert_eq!(backend.object("Account", &id).await.unwrap()["balance"], json!(5));
    }

    #[tokio::test]
    async fn test_relation_operations() {
        let backend = MemoryBackend::new();
        let pointer = |id: &str| json!({"__type": "Pointer", "className": "Tag", "objectId": id});
        let created = send(
            &backend,
            Request::new(Method::Post, "/classes/Post").body(json!({
                "tags": {"__op": "Batch", "ops": [
                    {"__op": "AddRelation", "objects": [pointer("t1"), pointer("t2")]},
                    {"__op": "RemoveRelation", "objects": [pointer("t2")]},
                ]}
            })),
        )
        .await
        .unwrap();
        let id = created["objectId"].as_str().unwrap();

        assert_eq!(backend.relation_members("Post", id, "tags").await, vec!["t1"]);
        let stored = backend.object("Post", id).await.unwrap();
        assert_eq!(stored["tags"], json!({"__type": "Relation", "className": "Tag"}));
    }
}
