use std::collections::HashMap;

use super::{Entity, EntityKey};
use crate::core::{ObjectError, Result, Value};
use crate::operation::{Operation, RelationOp, RelationTarget};

/// Arena owning every entity known to the client.
///
/// Entities refer to each other through [`EntityKey`]s, so cyclic graphs
/// need no shared ownership. Persisted entities are interned by
/// `(class_name, id)`: decoding the same pointer twice yields the same key.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: Vec<Entity>,
    by_id: HashMap<(String, String), EntityKey>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new, unsaved entity.
    pub fn create(&mut self, class_name: &str) -> Result<EntityKey> {
        validate_class_name(class_name)?;
        let key = EntityKey::from_index(self.entities.len());
        self.entities
            .push(Entity::new(key, class_name.to_string(), None));
        Ok(key)
    }

    /// Look up the entity with this id, creating an empty one if unknown.
    pub fn get_or_create(&mut self, class_name: &str, id: &str) -> Result<EntityKey> {
        validate_class_name(class_name)?;
        if id.is_empty() {
            return Err(ObjectError::InvalidArgument("Object id cannot be empty".into()));
        }
        if let Some(key) = self.find(class_name, id) {
            return Ok(key);
        }
        let key = EntityKey::from_index(self.entities.len());
        self.entities.push(Entity::new(
            key,
            class_name.to_string(),
            Some(id.to_string()),
        ));
        self.by_id
            .insert((class_name.to_string(), id.to_string()), key);
        Ok(key)
    }

    pub fn find(&self, class_name: &str, id: &str) -> Option<EntityKey> {
        self.by_id
            .get(&(class_name.to_string(), id.to_string()))
            .copied()
    }

    pub fn entity(&self, key: EntityKey) -> Option<&Entity> {
        self.entities.get(key.index())
    }

    pub fn get(&self, key: EntityKey) -> Result<&Entity> {
        self.entities
            .get(key.index())
            .ok_or(ObjectError::UnknownEntity(key))
    }

    pub fn get_mut(&mut self, key: EntityKey) -> Result<&mut Entity> {
        self.entities
            .get_mut(key.index())
            .ok_or(ObjectError::UnknownEntity(key))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    /// Record the id the backend assigned.
    pub(crate) fn assign_id(&mut self, key: EntityKey, id: &str) -> Result<()> {
        let entity = self.get_mut(key)?;
        if entity.id() == Some(id) {
            return Ok(());
        }
        if let Some(existing) = entity.id() {
            return Err(ObjectError::Decode(format!(
                "Backend returned id {} for object {}",
                id, existing
            )));
        }
        entity.set_id(id.to_string());
        let class_name = entity.class_name().to_string();
        self.by_id.insert((class_name, id.to_string()), key);
        Ok(())
    }

    /// Describe a saved entity as a relation target.
    pub fn relation_target(&self, key: EntityKey) -> Result<RelationTarget> {
        let entity = self.get(key)?;
        let object_id = entity.id().ok_or_else(|| {
            ObjectError::InvalidArgument(
                "Unsaved object(s) cannot be added to or removed from a relation".into(),
            )
        })?;
        Ok(RelationTarget {
            key,
            class_name: entity.class_name().to_string(),
            object_id: object_id.to_string(),
        })
    }

    /// Queue additions to the relation `field` of `owner`.
    pub fn relation_add(&mut self, owner: EntityKey, field: &str, targets: &[EntityKey]) -> Result<()> {
        self.relation_mutate(owner, field, targets, &[])
    }

    /// Queue removals from the relation `field` of `owner`.
    pub fn relation_remove(&mut self, owner: EntityKey, field: &str, targets: &[EntityKey]) -> Result<()> {
        self.relation_mutate(owner, field, &[], targets)
    }

    fn relation_mutate(
        &mut self,
        owner: EntityKey,
        field: &str,
        adds: &[EntityKey],
        removes: &[EntityKey],
    ) -> Result<()> {
        let adds = adds
            .iter()
            .map(|key| self.relation_target(*key))
            .collect::<Result<Vec<_>>>()?;
        let removes = removes
            .iter()
            .map(|key| self.relation_target(*key))
            .collect::<Result<Vec<_>>>()?;
        let op = RelationOp::new(adds, removes)?;

        let entity = self.get_mut(owner)?;
        if let Some(Value::Relation(existing)) = entity.get(field) {
            if let Some(target) = existing.target_class() {
                if target != op.target_class() {
                    return Err(ObjectError::InvalidArgument(format!(
                        "Relation '{}' targets {}, not {}",
                        field,
                        target,
                        op.target_class()
                    )));
                }
            }
        }
        entity.apply(field, Operation::Relation(op))
    }
}

fn validate_class_name(class_name: &str) -> Result<()> {
    if class_name.is_empty() {
        return Err(ObjectError::InvalidArgument("Class name cannot be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_interning() {
        let mut store = EntityStore::new();
        let a = store.get_or_create("TestObject", "id001").unwrap();
        let b = store.get_or_create("TestObject", "id001").unwrap();
        let c = store.get_or_create("Other", "id001").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.len(), 2);
        assert!(!store.get(a).unwrap().has_data());
    }

    #[test]
    fn test_assign_id_registers_lookup() {
        let mut store = EntityStore::new();
        let key = store.create("Post").unwrap();
        assert!(store.get(key).unwrap().is_new());

        store.assign_id(key, "p1").unwrap();
        assert_eq!(store.find("Post", "p1"), Some(key));
        assert!(store.assign_id(key, "p2").is_err());
        assert!(store.create("").is_err());
    }

    #[test]
    fn test_relation_add_requires_saved_targets() {
        let mut store = EntityStore::new();
        let post = store.create("Post").unwrap();
        let unsaved = store.create("Author").unwrap();
        let saved = store.get_or_create("Author", "abc101").unwrap();

        assert!(store.relation_add(post, "authors", &[unsaved]).is_err());

        store.relation_add(post, "authors", &[saved]).unwrap();
        let rel = store.get(post).unwrap().get("authors").and_then(Value::as_relation).unwrap();
        assert_eq!(rel.target_class(), Some("Author"));
        assert_eq!(rel.owner(), Some(post));

        let book = store.get_or_create("Book", "b1").unwrap();
        assert!(store.relation_add(post, "authors", &[book]).is_err());
    }

    #[test]
    fn test_relation_add_then_remove_merges() {
        let mut store = EntityStore::new();
        let post = store.create("Post").unwrap();
        let a1 = store.get_or_create("Author", "a1").unwrap();
        let a2 = store.get_or_create("Author", "a2").unwrap();

        store.relation_add(post, "authors", &[a1]).unwrap();
        store.relation_remove(post, "authors", &[a1, a2]).unwrap();

        let Some(Operation::Relation(op)) = store.get(post).unwrap().pending_operation("authors") else {
            panic!("expected relation operation");
        };
        assert_eq!(op.adds().map(|(id, _)| id).collect::<Vec<_>>(), vec!["a1"]);
        assert_eq!(op.removes().map(|(id, _)| id).collect::<Vec<_>>(), vec!["a2"]);
    }
}
