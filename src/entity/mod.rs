//! Client-side entities and the arena that owns them.

mod store;

pub use store::EntityStore;

use chrono::{DateTime, Utc};
use log::warn;
use std::collections::BTreeMap;

use crate::core::{Acl, ObjectError, Relation, Result, Value};
use crate::operation::Operation;

/// Field keys managed by the backend.
pub const RESERVED_KEYS: [&str; 3] = ["objectId", "createdAt", "updatedAt"];

/// Field key holding the access control list.
pub const ACL_KEY: &str = "ACL";

/// Index of an entity inside an [`EntityStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(usize);

impl EntityKey {
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// An addressable object with locally tracked mutations.
///
/// `fields` always equals the pending operations applied over
/// `server_snapshot`. Pending operations are kept until a save succeeds,
/// so a failed save can be retried as is.
#[derive(Debug, Clone)]
pub struct Entity {
    key: EntityKey,
    class_name: String,
    id: Option<String>,
    fields: BTreeMap<String, Value>,
    server_snapshot: BTreeMap<String, Value>,
    pending: BTreeMap<String, Operation>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Entity {
    pub(crate) fn new(key: EntityKey, class_name: String, id: Option<String>) -> Self {
        Self {
            key,
            class_name,
            id,
            fields: BTreeMap::new(),
            server_snapshot: BTreeMap::new(),
            pending: BTreeMap::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn created_at(&self) -> Option<&DateTime<Utc>> {
        self.created_at.as_ref()
    }

    pub fn updated_at(&self) -> Option<&DateTime<Utc>> {
        self.updated_at.as_ref()
    }

    /// Not yet persisted.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// New, or carrying mutations that have not been saved.
    pub fn is_dirty(&self) -> bool {
        self.is_new() || !self.pending.is_empty()
    }

    /// Whether any field data is known locally. An entity decoded from a
    /// bare pointer has none.
    pub fn has_data(&self) -> bool {
        !self.fields.is_empty() || !self.pending.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn server_snapshot(&self) -> &BTreeMap<String, Value> {
        &self.server_snapshot
    }

    pub fn pending(&self) -> &BTreeMap<String, Operation> {
        &self.pending
    }

    pub fn pending_operation(&self, key: &str) -> Option<&Operation> {
        self.pending.get(key)
    }

    pub fn acl(&self) -> Option<&Acl> {
        self.fields.get(ACL_KEY).and_then(Value::as_acl)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.apply(key, Operation::Set(value.into()))
    }

    /// Remove the field.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.apply(key, Operation::Delete)
    }

    pub fn increment(&mut self, key: &str, amount: impl Into<Value>) -> Result<()> {
        self.apply(key, Operation::increment(amount)?)
    }

    /// Append one object, or every element when given an array.
    pub fn add_in(&mut self, key: &str, objects: impl Into<Value>) -> Result<()> {
        self.apply(key, Operation::Add(into_objects(objects.into())))
    }

    pub fn add_unique_in(&mut self, key: &str, objects: impl Into<Value>) -> Result<()> {
        self.apply(key, Operation::AddUnique(into_objects(objects.into())))
    }

    pub fn remove_in(&mut self, key: &str, objects: impl Into<Value>) -> Result<()> {
        self.apply(key, Operation::Remove(into_objects(objects.into())))
    }

    pub fn set_acl(&mut self, acl: Acl) -> Result<()> {
        self.set(ACL_KEY, Value::Acl(acl))
    }

    /// Relation handle for `key`: the existing marker, or a fresh one bound
    /// to this entity.
    pub fn relation(&self, key: &str) -> Result<Relation> {
        match self.fields.get(key) {
            Some(Value::Relation(rel)) => {
                let mut rel = rel.clone();
                rel.bind(self.key, key)?;
                Ok(rel)
            }
            None | Some(Value::Null) => Ok(Relation::new(Some(self.key), key, None)),
            Some(other) => Err(ObjectError::TypeMismatch(format!(
                "Field '{}' holds {}, not a relation",
                key,
                other.type_name()
            ))),
        }
    }

    /// Queue `op` on `key`, merging it with the pending operation and
    /// rematerializing the field. Nothing changes if the merge or the
    /// application fails.
    pub fn apply(&mut self, key: &str, op: Operation) -> Result<()> {
        if RESERVED_KEYS.contains(&key) {
            return Err(ObjectError::InvalidArgument(format!(
                "Field '{}' is reserved",
                key
            )));
        }
        if key.is_empty() {
            return Err(ObjectError::InvalidArgument("Field key cannot be empty".into()));
        }

        let merged = op.merge_with(self.pending.get(key))?;
        let value = self.materialize(key, &merged)?;

        self.pending.insert(key.to_string(), merged);
        match value {
            Some(value) => self.fields.insert(key.to_string(), value),
            None => self.fields.remove(key),
        };
        Ok(())
    }

    fn materialize(&self, key: &str, op: &Operation) -> Result<Option<Value>> {
        let mut value = op.apply_on(self.server_snapshot.get(key))?;
        if let Some(Value::Relation(rel)) = value.as_mut() {
            rel.bind(self.key, key)?;
        }
        Ok(value)
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    pub(crate) fn set_timestamps(
        &mut self,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    ) {
        if created_at.is_some() {
            self.created_at = created_at;
            if self.updated_at.is_none() {
                self.updated_at = created_at;
            }
        }
        if updated_at.is_some() {
            self.updated_at = updated_at;
        }
    }

    /// Fold the saved pending values into the snapshot and clear `pending`.
    pub(crate) fn commit_pending(&mut self) {
        for key in std::mem::take(&mut self.pending).into_keys() {
            match self.fields.get(&key) {
                Some(value) => self.server_snapshot.insert(key, value.clone()),
                None => self.server_snapshot.remove(&key),
            };
        }
    }

    /// Merge server-confirmed values. Fields with a pending operation are
    /// rematerialized on top of the new snapshot value.
    pub(crate) fn merge_server_fields(&mut self, data: BTreeMap<String, Value>) {
        for (key, mut value) in data {
            if let Value::Relation(rel) = &mut value {
                if let Err(err) = rel.bind(self.key, &key) {
                    warn!("dropping relation for field {}: {}", key, err);
                    continue;
                }
            }
            self.server_snapshot.insert(key.clone(), value.clone());

            let Some(op) = self.pending.get(&key).cloned() else {
                self.fields.insert(key, value);
                continue;
            };
            match self.materialize(&key, &op) {
                Ok(Some(materialized)) => {
                    self.fields.insert(key, materialized);
                }
                Ok(None) => {
                    self.fields.remove(&key);
                }
                Err(err) => {
                    warn!(
                        "pending {} on field {} no longer applies: {}",
                        op.name(),
                        key,
                        err
                    );
                    self.pending.remove(&key);
                    self.fields.insert(key, value);
                }
            }
        }
    }
}

fn into_objects(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}
