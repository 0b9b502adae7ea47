use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

use super::parse_date;
use crate::core::{Acl, FileRef, GeoPoint, ObjectError, Relation, Result, Value};
use crate::entity::{ACL_KEY, EntityKey, EntityStore};

/// Decodes wire JSON into values, materializing entities in the store.
pub struct ValueDecoder;

impl ValueDecoder {
    /// Decode `wire`, found under `field_key`. Pointer and Object envelopes
    /// resolve to entities in `store`; unknown `__type` tags are kept as
    /// plain maps.
    pub fn decode(store: &mut EntityStore, wire: &JsonValue, field_key: &str) -> Result<Value> {
        match wire {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::Bool(b) => Ok(Value::Boolean(*b)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Integer(i)),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| ObjectError::Decode(format!("Unsupported number {}", n))),
            },
            JsonValue::String(s) => Ok(Value::Text(s.clone())),
            JsonValue::Array(items) => {
                if field_key == ACL_KEY && items.is_empty() {
                    return Ok(Value::Acl(Acl::new()));
                }
                items
                    .iter()
                    .map(|item| Self::decode(store, item, field_key))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
            JsonValue::Object(map) => {
                if field_key == ACL_KEY {
                    return Acl::from_json(wire).map(Value::Acl);
                }
                match map.get("__type").and_then(JsonValue::as_str) {
                    Some(type_tag) => Self::decode_envelope(store, type_tag, map, field_key),
                    None => Self::decode_map(store, map),
                }
            }
        }
    }

    fn decode_map(store: &mut EntityStore, map: &Map<String, JsonValue>) -> Result<Value> {
        let mut out = BTreeMap::new();
        for (key, item) in map {
            out.insert(key.clone(), Self::decode(store, item, key)?);
        }
        Ok(Value::Object(out))
    }

    fn decode_envelope(
        store: &mut EntityStore,
        type_tag: &str,
        map: &Map<String, JsonValue>,
        field_key: &str,
    ) -> Result<Value> {
        match type_tag {
            "Date" => {
                let iso = required_str(map, "iso", type_tag)?;
                parse_date(iso).map(Value::Date)
            }
            "Bytes" => {
                let data = required_str(map, "base64", type_tag)?;
                BASE64
                    .decode(data)
                    .map(Value::Bytes)
                    .map_err(|e| ObjectError::Decode(format!("Invalid base64 data: {}", e)))
            }
            "GeoPoint" => {
                let latitude = required_f64(map, "latitude", type_tag)?;
                let longitude = required_f64(map, "longitude", type_tag)?;
                GeoPoint::new(latitude, longitude).map(Value::GeoPoint)
            }
            "File" => Ok(Value::File(decode_file(map))),
            "Pointer" | "Object" => {
                let class_name = required_str(map, "className", type_tag)?;
                let key = match map.get("objectId").and_then(JsonValue::as_str) {
                    Some(id) => store.get_or_create(class_name, id)?,
                    None => store.create(class_name)?,
                };
                let has_inline_data = map
                    .keys()
                    .any(|k| !matches!(k.as_str(), "__type" | "className" | "objectId"));
                if has_inline_data {
                    Self::merge_server_data(store, key, map)?;
                }
                Ok(Value::Entity(key))
            }
            "Relation" => {
                let target = map
                    .get("className")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string);
                Ok(Value::Relation(Relation::new(None, field_key, target)))
            }
            _ => Self::decode_map(store, map),
        }
    }

    /// Merge backend data for `key`: `objectId` assigns the id, timestamps
    /// update the metadata and every other key becomes a confirmed field.
    pub fn merge_server_data(
        store: &mut EntityStore,
        key: EntityKey,
        data: &Map<String, JsonValue>,
    ) -> Result<()> {
        let mut fields = BTreeMap::new();
        let mut object_id = None;
        let mut created_at = None;
        let mut updated_at = None;

        for (field, wire) in data {
            match field.as_str() {
                "__type" | "className" => {}
                "objectId" => {
                    object_id = Some(wire.as_str().ok_or_else(|| {
                        ObjectError::Decode(format!("objectId must be a string, got {}", wire))
                    })?);
                }
                "createdAt" => created_at = Some(decode_timestamp(wire)?),
                "updatedAt" => updated_at = Some(decode_timestamp(wire)?),
                _ => {
                    fields.insert(field.clone(), Self::decode(store, wire, field)?);
                }
            }
        }

        if let Some(id) = object_id {
            store.assign_id(key, id)?;
        }
        let entity = store.get_mut(key)?;
        entity.set_timestamps(created_at, updated_at);
        entity.merge_server_fields(fields);
        Ok(())
    }

    /// Apply a successful save response: pending values become confirmed,
    /// then the response (id, timestamps, server-computed fields) is merged.
    pub fn merge_after_save(
        store: &mut EntityStore,
        key: EntityKey,
        response: &JsonValue,
    ) -> Result<()> {
        store.get_mut(key)?.commit_pending();
        match response {
            JsonValue::Object(data) => Self::merge_server_data(store, key, data),
            JsonValue::Null => Ok(()),
            other => Err(ObjectError::Decode(format!(
                "Unexpected save response: {}",
                other
            ))),
        }
    }
}

fn required_str<'a>(map: &'a Map<String, JsonValue>, field: &str, type_tag: &str) -> Result<&'a str> {
    map.get(field)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| ObjectError::Decode(format!("{} envelope missing '{}'", type_tag, field)))
}

fn required_f64(map: &Map<String, JsonValue>, field: &str, type_tag: &str) -> Result<f64> {
    map.get(field)
        .and_then(JsonValue::as_f64)
        .ok_or_else(|| ObjectError::Decode(format!("{} envelope missing '{}'", type_tag, field)))
}

fn decode_timestamp(wire: &JsonValue) -> Result<DateTime<Utc>> {
    match wire {
        JsonValue::String(iso) => parse_date(iso),
        JsonValue::Object(map) => parse_date(required_str(map, "iso", "Date")?),
        other => Err(ObjectError::Decode(format!("Invalid timestamp {}", other))),
    }
}

fn decode_file(map: &Map<String, JsonValue>) -> FileRef {
    let text = |field: &str| map.get(field).and_then(JsonValue::as_str).map(str::to_string);
    FileRef {
        id: text("objectId").or_else(|| text("id")),
        name: text("name").unwrap_or_default(),
        url: text("url"),
        mime_type: text("mime_type"),
        metadata: map
            .get("metaData")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_pointer_without_data() {
        let mut store = EntityStore::new();
        let wire = json!({"__type": "Pointer", "className": "TestObject", "objectId": "id001"});
        let value = ValueDecoder::decode(&mut store, &wire, "owner").unwrap();

        let key = value.as_entity().unwrap();
        let entity = store.get(key).unwrap();
        assert_eq!(entity.id(), Some("id001"));
        assert!(!entity.has_data());
        assert!(!entity.is_dirty());
    }

    #[test]
    fn test_decode_object_merges_inline_fields() {
        let mut store = EntityStore::new();
        let wire = json!({
            "__type": "Object",
            "className": "Author",
            "objectId": "a1",
            "name": "Ursula",
            "createdAt": "2015-06-29T01:39:35.931Z",
            "born": {"__type": "Date", "iso": "1929-10-21T00:00:00.000Z"}
        });
        let key = ValueDecoder::decode(&mut store, &wire, "author")
            .unwrap()
            .as_entity()
            .unwrap();

        let entity = store.get(key).unwrap();
        assert_eq!(entity.get("name").and_then(Value::as_str), Some("Ursula"));
        assert!(entity.get("born").and_then(Value::as_date).is_some());
        assert!(entity.created_at().is_some());
        assert!(entity.pending().is_empty());
        assert_eq!(entity.server_snapshot().len(), 2);
    }

    #[test]
    fn test_decode_typed_envelopes() {
        let mut store = EntityStore::new();

        let bytes = ValueDecoder::decode(
            &mut store,
            &json!({"__type": "Bytes", "base64": "aGVsbG8="}),
            "blob",
        )
        .unwrap();
        assert_eq!(bytes, Value::Bytes(b"hello".to_vec()));

        let point = ValueDecoder::decode(
            &mut store,
            &json!({"__type": "GeoPoint", "latitude": 39.9, "longitude": 116.4}),
            "location",
        )
        .unwrap();
        assert_eq!(point.as_geo_point().unwrap().latitude(), 39.9);

        let rel = ValueDecoder::decode(
            &mut store,
            &json!({"__type": "Relation", "className": "TestObject"}),
            "likes",
        )
        .unwrap();
        let rel = rel.as_relation().unwrap();
        assert_eq!(rel.key(), "likes");
        assert_eq!(rel.target_class(), Some("TestObject"));

        let file = ValueDecoder::decode(
            &mut store,
            &json!({"__type": "File", "objectId": "f1", "name": "a.png", "url": "https://x/a.png"}),
            "avatar",
        )
        .unwrap();
        assert!(matches!(file, Value::File(ref f) if f.id.as_deref() == Some("f1")));

        assert!(ValueDecoder::decode(&mut store, &json!({"__type": "Date"}), "d").is_err());
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let mut store = EntityStore::new();
        let wire = json!({"__type": "Polygon", "points": [1, 2]});
        let value = ValueDecoder::decode(&mut store, &wire, "shape").unwrap();

        let Value::Object(map) = value else {
            panic!("expected opaque map");
        };
        assert_eq!(map.get("__type").and_then(Value::as_str), Some("Polygon"));
        assert_eq!(map.get("points"), Some(&Value::from(vec![1, 2])));
    }

    #[test]
    fn test_acl_key_decodes_specially() {
        let mut store = EntityStore::new();
        let value = ValueDecoder::decode(&mut store, &json!({}), ACL_KEY).unwrap();
        assert!(value.as_acl().unwrap().is_empty());

        let value = ValueDecoder::decode(&mut store, &json!({"*": {"read": true}}), ACL_KEY).unwrap();
        assert!(value.as_acl().unwrap().public_read_access());

        let value = ValueDecoder::decode(&mut store, &json!({}), "other").unwrap();
        assert!(matches!(value, Value::Object(ref m) if m.is_empty()));
    }

    #[test]
    fn test_merge_after_save_assigns_id_and_clears_pending() {
        let mut store = EntityStore::new();
        let key = store.create("Post").unwrap();
        store.get_mut(key).unwrap().set("title", "hello").unwrap();

        let response = json!({"objectId": "p1", "createdAt": "2020-01-01T00:00:00.000Z"});
        ValueDecoder::merge_after_save(&mut store, key, &response).unwrap();

        let entity = store.get(key).unwrap();
        assert_eq!(entity.id(), Some("p1"));
        assert!(!entity.is_dirty());
        assert_eq!(entity.server_snapshot().get("title"), Some(&Value::from("hello")));
        assert_eq!(entity.created_at(), entity.updated_at());
        assert_eq!(store.find("Post", "p1"), Some(key));
    }
}
