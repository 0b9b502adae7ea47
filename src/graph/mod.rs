//! Cycle-safe traversal of entity graphs.
//!
//! Entities are compared by arena key, so a cyclic `a -> b -> c -> a`
//! graph is walked once per entity.

use std::collections::HashSet;

use crate::core::{ObjectError, Result, Value};
use crate::entity::{EntityKey, EntityStore};
use crate::operation::Operation;

/// Depth-first walk over everything reachable from `root`: field values,
/// array and map elements, and the fields of referenced entities.
///
/// `visit` is called once per entity (root included) and once per other
/// value occurrence, children before parents. Returns the set of entities
/// reached.
pub fn traverse<F>(store: &EntityStore, root: EntityKey, mut visit: F) -> Result<HashSet<EntityKey>>
where
    F: FnMut(&Value),
{
    let mut seen = HashSet::new();
    walk(store, &Value::Entity(root), &mut seen, &mut visit)?;
    Ok(seen)
}

fn walk<F>(store: &EntityStore, value: &Value, seen: &mut HashSet<EntityKey>, visit: &mut F) -> Result<()>
where
    F: FnMut(&Value),
{
    match value {
        Value::Entity(key) => {
            if !seen.insert(*key) {
                return Ok(());
            }
            for field in store.get(*key)?.fields().values() {
                walk(store, field, seen, visit)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(store, item, seen, visit)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                walk(store, item, seen, visit)?;
            }
        }
        _ => {}
    }
    visit(value);
    Ok(())
}

/// Every entity without an id reachable from `root`, excluding `root`,
/// in discovery order.
pub fn find_unsaved_children(store: &EntityStore, root: EntityKey) -> Result<Vec<EntityKey>> {
    let mut unsaved = Vec::new();
    let mut lookup_error = None;
    traverse(store, root, |value| {
        if let Value::Entity(key) = value {
            match store.get(*key) {
                Ok(entity) if entity.is_new() && *key != root => unsaved.push(*key),
                Ok(_) => {}
                Err(err) => lookup_error = Some(err),
            }
        }
    })?;
    match lookup_error {
        Some(err) => Err(err),
        None => Ok(unsaved),
    }
}

/// Entities referenced directly by `key`: through its fields and pending
/// operation payloads, looking inside arrays and maps but not inside other
/// entities.
pub fn direct_references(store: &EntityStore, key: EntityKey) -> Result<Vec<EntityKey>> {
    let entity = store.get(key)?;
    let mut refs = Vec::new();
    for value in entity.fields().values() {
        collect_refs(value, &mut refs);
    }
    for op in entity.pending().values() {
        match op {
            Operation::Set(value) => collect_refs(value, &mut refs),
            Operation::Add(objects) | Operation::AddUnique(objects) | Operation::Remove(objects) => {
                for object in objects {
                    collect_refs(object, &mut refs);
                }
            }
            Operation::Delete | Operation::Increment(_) | Operation::Relation(_) => {}
        }
    }
    Ok(refs)
}

fn collect_refs(value: &Value, refs: &mut Vec<EntityKey>) {
    match value {
        Value::Entity(key) => {
            if !refs.contains(key) {
                refs.push(*key);
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_refs(item, refs)),
        Value::Object(map) => map.values().for_each(|item| collect_refs(item, refs)),
        _ => {}
    }
}

/// Unsaved children of `roots` that can be created in one batch ahead of
/// the roots.
///
/// Fails with `UnpersistableGraph` when a child itself refers to an entity
/// without id (an unsaved grandchild, an unsaved root, or itself): that child could
/// not be encoded before the other one is saved.
pub fn unsaved_dependencies(store: &EntityStore, roots: &[EntityKey]) -> Result<Vec<EntityKey>> {
    let mut children: Vec<EntityKey> = Vec::new();
    for root in roots {
        for child in find_unsaved_children(store, *root)? {
            if !roots.contains(&child) && !children.contains(&child) {
                children.push(child);
            }
        }
    }

    for child in &children {
        for reference in direct_references(store, *child)? {
            let target = store.get(reference)?;
            if target.is_new() {
                let entity = store.get(*child)?;
                return Err(ObjectError::UnpersistableGraph(format!(
                    "unsaved {} references unsaved {}; save it explicitly first",
                    entity.class_name(),
                    target.class_name()
                )));
            }
        }
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(store: &mut EntityStore) -> (EntityKey, EntityKey, EntityKey) {
        let a = store.create("TestObject").unwrap();
        let b = store.create("TestObject").unwrap();
        let c = store.create("TestObject").unwrap();
        store.get_mut(a).unwrap().set("likes", vec![Value::Entity(b), Value::from("foo")]).unwrap();
        store.get_mut(b).unwrap().set("likes", vec![Value::Entity(c), Value::Integer(42)]).unwrap();
        store.get_mut(c).unwrap().set("likes", Value::Entity(a)).unwrap();
        (a, b, c)
    }

    #[test]
    fn test_traverse_cycle_visits_each_entity_once() {
        let mut store = EntityStore::new();
        let (a, _, c) = cycle(&mut store);

        for start in [a, c] {
            let mut entities = Vec::new();
            let seen = traverse(&store, start, |value| {
                if let Value::Entity(key) = value {
                    entities.push(*key);
                }
            })
            .unwrap();
            assert_eq!(seen.len(), 3);
            assert_eq!(entities.len(), 3);
        }
    }

    #[test]
    fn test_find_unsaved_children_excludes_root() {
        let mut store = EntityStore::new();
        let (a, b, c) = cycle(&mut store);

        let unsaved = find_unsaved_children(&store, b).unwrap();
        assert!(unsaved.contains(&a));
        assert!(unsaved.contains(&c));
        assert!(!unsaved.contains(&b));
    }

    #[test]
    fn test_direct_children_are_persistable() {
        let mut store = EntityStore::new();
        let a = store.create("TestObject").unwrap();
        let b = store.create("TestObject").unwrap();
        let c = store.create("TestObject").unwrap();
        store.get_mut(b).unwrap().set("foo", "bar").unwrap();
        store.get_mut(a).unwrap().set("mylikes", vec![Value::Entity(b), Value::from("foo")]).unwrap();
        store.get_mut(a).unwrap().set("dislikes", vec![Value::Entity(c), Value::Integer(42)]).unwrap();

        let children = unsaved_dependencies(&store, &[a]).unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.contains(&b) && children.contains(&c));
    }

    #[test]
    fn test_unsaved_grandchild_is_unpersistable() {
        let mut store = EntityStore::new();
        let a = store.create("TestObject").unwrap();
        let b = store.create("TestObject").unwrap();
        let c = store.create("TestObject").unwrap();
        store.get_mut(a).unwrap().set("likes", vec![Value::Entity(b)]).unwrap();
        store.get_mut(b).unwrap().set("likes", vec![Value::Entity(c)]).unwrap();

        assert!(matches!(
            unsaved_dependencies(&store, &[a]),
            Err(ObjectError::UnpersistableGraph(_))
        ));
    }

    #[test]
    fn test_unsaved_child_behind_saved_entity_is_collected() {
        let mut store = EntityStore::new();
        let root = store.create("Post").unwrap();
        let saved = store.get_or_create("Author", "a1").unwrap();
        let fresh = store.create("Avatar").unwrap();
        store.get_mut(saved).unwrap().set("avatar", Value::Entity(fresh)).unwrap();
        store.get_mut(root).unwrap().set("author", Value::Entity(saved)).unwrap();

        assert_eq!(unsaved_dependencies(&store, &[root]).unwrap(), vec![fresh]);
    }

    #[test]
    fn test_child_pointing_back_at_unsaved_root_is_unpersistable() {
        let mut store = EntityStore::new();
        let root = store.create("Post").unwrap();
        let child = store.create("Comment").unwrap();
        store.get_mut(root).unwrap().set("comment", Value::Entity(child)).unwrap();
        store.get_mut(child).unwrap().set("post", Value::Entity(root)).unwrap();

        assert!(matches!(
            unsaved_dependencies(&store, &[root]),
            Err(ObjectError::UnpersistableGraph(_))
        ));
    }

    #[test]
    fn test_unsaved_child_pointing_at_itself_is_unpersistable() {
        let mut store = EntityStore::new();
        let root = store.create("Post").unwrap();
        let child = store.create("Comment").unwrap();
        store.get_mut(root).unwrap().set("comment", Value::Entity(child)).unwrap();
        store.get_mut(child).unwrap().set("me", Value::Entity(child)).unwrap();

        assert!(matches!(
            unsaved_dependencies(&store, &[root]),
            Err(ObjectError::UnpersistableGraph(_))
        ));
    }
}
