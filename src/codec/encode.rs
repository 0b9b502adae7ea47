use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Number, Value as JsonValue, json};
use std::collections::HashSet;

use super::{EncodeMode, format_date};
use crate::core::{FileRef, ObjectError, Result, Value};
use crate::entity::{EntityKey, EntityStore};
use crate::operation::{Operation, RelationOp};

/// Encodes values, entities and operations to wire JSON.
pub struct ValueEncoder;

impl ValueEncoder {
    /// Encode one value. `seen` holds the entities already expanded during
    /// this encode call and is what stops full expansion from looping on
    /// cyclic graphs.
    pub fn encode(
        store: &EntityStore,
        value: &Value,
        mode: EncodeMode,
        seen: &mut HashSet<EntityKey>,
    ) -> Result<JsonValue> {
        match value {
            Value::Null => Ok(JsonValue::Null),
            Value::Boolean(b) => Ok(JsonValue::Bool(*b)),
            Value::Integer(i) => Ok(JsonValue::from(*i)),
            Value::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or_else(|| ObjectError::UnencodableType(format!("non-finite float {}", f))),
            Value::Text(s) => Ok(JsonValue::String(s.clone())),
            Value::Date(date) => Ok(json!({"__type": "Date", "iso": format_date(date)})),
            Value::Bytes(bytes) => Ok(json!({"__type": "Bytes", "base64": BASE64.encode(bytes)})),
            Value::GeoPoint(point) => Ok(json!({
                "__type": "GeoPoint",
                "latitude": point.latitude(),
                "longitude": point.longitude(),
            })),
            Value::Acl(acl) => Ok(acl.to_json()),
            Value::Relation(rel) => Ok(json!({
                "__type": "Relation",
                "className": rel.target_class(),
            })),
            Value::File(file) => Self::encode_file(file),
            Value::Entity(key) => {
                let entity = store.get(*key)?;
                if mode == EncodeMode::Full && entity.has_data() && !seen.contains(key) {
                    Self::encode_full(store, *key, seen)
                } else {
                    Self::encode_pointer(store, *key)
                }
            }
            Value::Array(items) => items
                .iter()
                .map(|item| Self::encode(store, item, mode, seen))
                .collect::<Result<Vec<_>>>()
                .map(JsonValue::Array),
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, item) in map {
                    out.insert(key.clone(), Self::encode(store, item, mode, seen)?);
                }
                Ok(JsonValue::Object(out))
            }
        }
    }

    /// `{"__type":"Pointer","className":...,"objectId":...}`. Unsaved
    /// entities have no pointer form.
    pub fn encode_pointer(store: &EntityStore, key: EntityKey) -> Result<JsonValue> {
        let entity = store.get(key)?;
        let object_id = entity.id().ok_or_else(|| {
            ObjectError::UnencodableType(format!(
                "{} without id cannot be serialized as a pointer",
                entity.class_name()
            ))
        })?;
        Ok(pointer(entity.class_name(), object_id))
    }

    /// Full form of an entity with every materialized field. Marks the
    /// entity as seen before descending into its fields.
    pub fn encode_full(
        store: &EntityStore,
        key: EntityKey,
        seen: &mut HashSet<EntityKey>,
    ) -> Result<JsonValue> {
        seen.insert(key);
        let entity = store.get(key)?;

        let mut out = Map::new();
        out.insert("__type".into(), JsonValue::from("Object"));
        out.insert("className".into(), JsonValue::from(entity.class_name()));
        if let Some(id) = entity.id() {
            out.insert("objectId".into(), JsonValue::from(id));
        }
        if let Some(created_at) = entity.created_at() {
            out.insert("createdAt".into(), JsonValue::from(format_date(created_at)));
        }
        if let Some(updated_at) = entity.updated_at() {
            out.insert("updatedAt".into(), JsonValue::from(format_date(updated_at)));
        }
        for (field, value) in entity.fields() {
            out.insert(field.clone(), Self::encode(store, value, EncodeMode::Full, seen)?);
        }
        Ok(JsonValue::Object(out))
    }

    pub fn encode_operation(store: &EntityStore, op: &Operation) -> Result<JsonValue> {
        let mut seen = HashSet::new();
        match op {
            Operation::Set(value) => Self::encode(store, value, EncodeMode::Pointer, &mut seen),
            Operation::Delete => Ok(json!({"__op": "Delete"})),
            Operation::Increment(amount) => Ok(json!({
                "__op": "Increment",
                "amount": Self::encode(store, amount, EncodeMode::Pointer, &mut seen)?,
            })),
            Operation::Add(objects) | Operation::AddUnique(objects) | Operation::Remove(objects) => {
                let objects = objects
                    .iter()
                    .map(|item| Self::encode(store, item, EncodeMode::Pointer, &mut seen))
                    .collect::<Result<Vec<_>>>()?;
                Ok(json!({"__op": op.name(), "objects": objects}))
            }
            Operation::Relation(rel) => Ok(encode_relation_op(rel)),
        }
    }

    /// Request body for a save: the pending operations, not the fields.
    pub fn encode_pending(store: &EntityStore, key: EntityKey) -> Result<Map<String, JsonValue>> {
        let entity = store.get(key)?;
        let mut body = Map::new();
        for (field, op) in entity.pending() {
            body.insert(field.clone(), Self::encode_operation(store, op)?);
        }
        Ok(body)
    }

    fn encode_file(file: &FileRef) -> Result<JsonValue> {
        let id = file
            .id
            .as_deref()
            .ok_or_else(|| ObjectError::UnencodableType("Cannot serialize unsaved file".into()))?;
        let mut out = Map::new();
        out.insert("__type".into(), JsonValue::from("File"));
        out.insert("id".into(), JsonValue::from(id));
        out.insert("name".into(), JsonValue::from(file.name.as_str()));
        if let Some(url) = &file.url {
            out.insert("url".into(), JsonValue::from(url.as_str()));
        }
        Ok(JsonValue::Object(out))
    }
}

fn pointer(class_name: &str, object_id: &str) -> JsonValue {
    json!({"__type": "Pointer", "className": class_name, "objectId": object_id})
}

fn encode_relation_op(op: &RelationOp) -> JsonValue {
    let class_name = op.target_class();
    let adds: Vec<_> = op.adds().map(|(id, _)| pointer(class_name, id)).collect();
    let removes: Vec<_> = op.removes().map(|(id, _)| pointer(class_name, id)).collect();

    let add_op = json!({"__op": "AddRelation", "objects": adds});
    let remove_op = json!({"__op": "RemoveRelation", "objects": removes});
    match (op.add_count(), op.remove_count()) {
        (_, 0) => add_op,
        (0, _) => remove_op,
        _ => json!({"__op": "Batch", "ops": [add_op, remove_op]}),
    }
}
