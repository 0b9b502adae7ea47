use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashSet};

use crate::codec::{EncodeMode, ValueEncoder};
use crate::core::{ObjectError, Result, Value};
use crate::entity::EntityStore;

/// Constraint on the stored state of an object, sent as a `where` document.
///
/// Plain equality is written as `{"field": value}`, comparisons as
/// `{"field": {"$gt": value, ...}}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    fields: BTreeMap<String, FieldCondition>,
}

#[derive(Debug, Clone, PartialEq)]
enum FieldCondition {
    Equals(Value),
    Operators(BTreeMap<&'static str, Value>),
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equal_to(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields
            .insert(key.to_string(), FieldCondition::Equals(value.into()));
        self
    }

    pub fn not_equal_to(self, key: &str, value: impl Into<Value>) -> Self {
        self.operator(key, "$ne", value.into())
    }

    pub fn greater_than(self, key: &str, value: impl Into<Value>) -> Self {
        self.operator(key, "$gt", value.into())
    }

    pub fn greater_than_or_equal_to(self, key: &str, value: impl Into<Value>) -> Self {
        self.operator(key, "$gte", value.into())
    }

    pub fn less_than(self, key: &str, value: impl Into<Value>) -> Self {
        self.operator(key, "$lt", value.into())
    }

    pub fn less_than_or_equal_to(self, key: &str, value: impl Into<Value>) -> Self {
        self.operator(key, "$lte", value.into())
    }

    pub fn contained_in(self, key: &str, values: Vec<Value>) -> Self {
        self.operator(key, "$in", Value::Array(values))
    }

    pub fn exists(self, key: &str, flag: bool) -> Self {
        self.operator(key, "$exists", Value::Boolean(flag))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn operator(mut self, key: &str, op: &'static str, value: Value) -> Self {
        let entry = self
            .fields
            .entry(key.to_string())
            .or_insert_with(|| FieldCondition::Operators(BTreeMap::new()));
        match entry {
            FieldCondition::Operators(ops) => {
                ops.insert(op, value);
            }
            FieldCondition::Equals(_) => {
                *entry = FieldCondition::Operators(BTreeMap::from([(op, value)]));
            }
        }
        self
    }

    /// The `where` document, with values in pointer form.
    pub fn encode(&self, store: &EntityStore) -> Result<JsonValue> {
        let mut seen = HashSet::new();
        let mut out = Map::new();
        for (key, condition) in &self.fields {
            let encoded = match condition {
                FieldCondition::Equals(value) => {
                    ValueEncoder::encode(store, value, EncodeMode::Pointer, &mut seen)?
                }
                FieldCondition::Operators(ops) => {
                    let mut map = Map::new();
                    for (op, value) in ops {
                        map.insert(
                            op.to_string(),
                            ValueEncoder::encode(store, value, EncodeMode::Pointer, &mut seen)?,
                        );
                    }
                    JsonValue::Object(map)
                }
            };
            out.insert(key.clone(), encoded);
        }
        Ok(JsonValue::Object(out))
    }
}

/// Options for a single save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOption {
    /// Ask the backend to return every field of the saved object.
    pub fetch_when_save: bool,

    /// Only update when the stored object matches.
    pub where_clause: Option<Condition>,
}

impl SaveOption {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetch_when_save(mut self, flag: bool) -> Self {
        self.fetch_when_save = flag;
        self
    }

    pub fn where_clause(mut self, condition: Condition) -> Self {
        self.where_clause = Some(condition);
        self
    }

    /// Query parameters for the save request. A condition only makes sense
    /// for an update.
    pub(crate) fn query(&self, store: &EntityStore, is_new: bool) -> Result<Vec<(String, String)>> {
        let mut query = Vec::new();
        if self.fetch_when_save {
            query.push(("fetchWhenSave".to_string(), "true".to_string()));
        }
        if let Some(condition) = self.where_clause.as_ref().filter(|c| !c.is_empty()) {
            if is_new {
                return Err(ObjectError::InvalidArgument(
                    "A where condition cannot be used when creating an object".into(),
                ));
            }
            query.push(("where".to_string(), condition.encode(store)?.to_string()));
        }
        Ok(query)
    }
}
