//! Field-level mutation operations.
//!
//! Every mutation of an entity field is expressed as an [`Operation`]. An
//! operation can be applied to the prior materialized value of the field,
//! and merged with the operation already queued for that field so that at
//! most one operation per field is ever pending.

mod relation;

pub use relation::{RelationOp, RelationTarget};

use crate::core::{ObjectError, Relation, Result, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Replace the field value.
    Set(Value),
    /// Remove the field.
    Delete,
    /// Add a numeric amount.
    Increment(Value),
    /// Append objects to an array.
    Add(Vec<Value>),
    /// Append objects not already present.
    AddUnique(Vec<Value>),
    /// Remove every occurrence of the given objects.
    Remove(Vec<Value>),
    Relation(RelationOp),
}

impl Operation {
    /// Increment by `amount`, which must be numeric.
    pub fn increment(amount: impl Into<Value>) -> Result<Self> {
        let amount = amount.into();
        if !amount.is_numeric() {
            return Err(ObjectError::InvalidArgument(format!(
                "Increment amount must be numeric, got {}",
                amount.type_name()
            )));
        }
        Ok(Self::Increment(amount))
    }

    /// Wire name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Set(_) => "Set",
            Self::Delete => "Delete",
            Self::Increment(_) => "Increment",
            Self::Add(_) => "Add",
            Self::AddUnique(_) => "AddUnique",
            Self::Remove(_) => "Remove",
            Self::Relation(_) => "Relation",
        }
    }

    /// Compute the field value after this operation, given the prior value.
    /// `None` means the field is absent.
    pub fn apply_on(&self, prior: Option<&Value>) -> Result<Option<Value>> {
        match self {
            Self::Set(value) => Ok(Some(value.clone())),
            Self::Delete => Ok(None),
            Self::Increment(amount) => {
                let base = prior.unwrap_or(&Value::Null);
                base.add_numeric(amount).map(Some)
            }
            Self::Add(objects) => {
                let mut items = prior_array(self, prior)?;
                items.extend(objects.iter().cloned());
                Ok(Some(Value::Array(items)))
            }
            Self::AddUnique(objects) => {
                let items = prior_array(self, prior)?;
                Ok(Some(Value::Array(add_unique(items, objects))))
            }
            Self::Remove(objects) => {
                let mut items = prior_array(self, prior)?;
                items.retain(|item| !objects.contains(item));
                Ok(Some(Value::Array(items)))
            }
            Self::Relation(op) => match prior {
                None | Some(Value::Null) => Ok(Some(Value::Relation(Relation::new(
                    None,
                    "",
                    Some(op.target_class().to_string()),
                )))),
                Some(Value::Relation(existing)) => {
                    let mut rel = existing.clone();
                    rel.fill_target_class(Some(op.target_class()));
                    Ok(Some(Value::Relation(rel)))
                }
                Some(other) => Err(ObjectError::TypeMismatch(format!(
                    "Relation operation incompatible with {} value",
                    other.type_name()
                ))),
            },
        }
    }

    /// Merge this (new) operation with the operation already queued for the
    /// same field. The result behaves like applying `prev` and then `self`.
    pub fn merge_with(&self, prev: Option<&Operation>) -> Result<Operation> {
        let Some(prev) = prev else {
            return Ok(self.clone());
        };

        match (self, prev) {
            (Self::Set(value), _) => Ok(Self::Set(value.clone())),
            (Self::Delete, _) => Ok(Self::Delete),

            (Self::Increment(amount), Self::Set(value)) => {
                Ok(Self::Set(value.add_numeric(amount)?))
            }
            (Self::Increment(amount), Self::Increment(prev_amount)) => {
                Ok(Self::Increment(prev_amount.add_numeric(amount)?))
            }
            (Self::Increment(amount), Self::Delete) => Ok(Self::Set(amount.clone())),

            (Self::Add(_) | Self::AddUnique(_) | Self::Remove(_), Self::Set(value)) => {
                if !matches!(value, Value::Array(_)) {
                    return Err(ObjectError::TypeMismatch(format!(
                        "{} incompatible with previous {} value",
                        self.name(),
                        value.type_name()
                    )));
                }
                let merged = self.apply_on(Some(value))?.unwrap_or(Value::Null);
                Ok(Self::Set(merged))
            }
            (Self::Add(objects), Self::Add(prev_objects)) => {
                let mut merged = prev_objects.clone();
                merged.extend(objects.iter().cloned());
                Ok(Self::Add(merged))
            }
            (Self::AddUnique(objects), Self::AddUnique(prev_objects)) => {
                Ok(Self::AddUnique(add_unique(prev_objects.clone(), objects)))
            }
            (Self::Remove(objects), Self::Remove(prev_objects)) => {
                let mut merged = prev_objects.clone();
                merged.extend(objects.iter().cloned());
                Ok(Self::Remove(merged))
            }
            (Self::Add(_) | Self::AddUnique(_), Self::Delete) => {
                let value = self.apply_on(None)?.unwrap_or(Value::Null);
                Ok(Self::Set(value))
            }
            (Self::Remove(_), Self::Delete) => Ok(Self::Delete),

            (Self::Relation(op), Self::Relation(prev_op)) => {
                Ok(Self::Relation(op.merged_over(prev_op)?))
            }

            _ => Err(ObjectError::IncompatibleOperation(format!(
                "{} cannot follow {}",
                self.name(),
                prev.name()
            ))),
        }
    }
}

fn prior_array(op: &Operation, prior: Option<&Value>) -> Result<Vec<Value>> {
    match prior {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(other) => Err(ObjectError::TypeMismatch(format!(
            "{} incompatible with previous {} value",
            op.name(),
            other.type_name()
        ))),
    }
}

/// Append the objects not yet present. Duplicates already in `items` are
/// left alone.
fn add_unique(mut items: Vec<Value>, objects: &[Value]) -> Vec<Value> {
    for object in objects {
        if !items.contains(object) {
            items.push(object.clone());
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKey;

    fn strings(items: &[&str]) -> Vec<Value> {
        items.iter().map(|s| Value::from(*s)).collect()
    }

    fn array(items: &[&str]) -> Value {
        Value::Array(strings(items))
    }

    #[test]
    fn test_set_and_delete_apply() {
        let set = Operation::Set(Value::from("x"));
        assert_eq!(set.apply_on(Some(&Value::Integer(3))).unwrap(), Some(Value::from("x")));
        assert_eq!(Operation::Delete.apply_on(Some(&Value::Integer(3))).unwrap(), None);
    }

    #[test]
    fn test_increment_apply() {
        let op = Operation::increment(10).unwrap();
        assert_eq!(op.apply_on(Some(&Value::Integer(60))).unwrap(), Some(Value::Integer(70)));
        assert_eq!(op.apply_on(None).unwrap(), Some(Value::Integer(10)));
        assert!(matches!(
            op.apply_on(Some(&Value::from("60"))),
            Err(ObjectError::TypeMismatch(_))
        ));
        assert!(Operation::increment("ten").is_err());
    }

    #[test]
    fn test_array_apply() {
        let add = Operation::Add(strings(&["frontend"]));
        assert_eq!(add.apply_on(None).unwrap(), Some(array(&["frontend"])));
        assert_eq!(
            add.apply_on(Some(&array(&["frontend"]))).unwrap(),
            Some(array(&["frontend", "frontend"]))
        );
        assert!(matches!(
            add.apply_on(Some(&Value::Integer(1))),
            Err(ObjectError::TypeMismatch(_))
        ));

        let remove = Operation::Remove(strings(&["javascript"]));
        assert_eq!(
            remove.apply_on(Some(&array(&["frontend", "javascript", "javascript"]))).unwrap(),
            Some(array(&["frontend"]))
        );
        assert_eq!(remove.apply_on(None).unwrap(), Some(array(&[])));
    }

    #[test]
    fn test_add_unique_keeps_existing_duplicates() {
        let op = Operation::AddUnique(strings(&["a", "a"]));
        assert_eq!(op.apply_on(Some(&Value::Null)).unwrap(), Some(array(&["a"])));

        let op = Operation::AddUnique(strings(&["a"]));
        assert_eq!(op.apply_on(Some(&array(&["a", "a"]))).unwrap(), Some(array(&["a", "a"])));
    }

    #[test]
    fn test_array_membership_compares_floats_exactly() {
        let prior = Value::Array(vec![Value::Float(1e-20), Value::Float(2.5e-17)]);
        let remove = Operation::Remove(vec![Value::Float(0.0)]);
        assert_eq!(remove.apply_on(Some(&prior)).unwrap(), Some(prior.clone()));

        let add = Operation::AddUnique(vec![Value::Float(3e-20)]);
        assert_eq!(
            add.apply_on(Some(&Value::Array(vec![Value::Float(1e-20)]))).unwrap(),
            Some(Value::Array(vec![Value::Float(1e-20), Value::Float(3e-20)]))
        );

        let remove = Operation::Remove(vec![Value::Integer(2)]);
        let prior = Value::Array(vec![Value::Float(2.0), Value::Float(2.0000000000000004)]);
        assert_eq!(
            remove.apply_on(Some(&prior)).unwrap(),
            Some(Value::Array(vec![Value::Float(2.0000000000000004)]))
        );
    }

    #[test]
    fn test_add_unique_compares_entities_by_identity() {
        let a = Value::Entity(EntityKey::from_index(1));
        let b = Value::Entity(EntityKey::from_index(2));
        let op = Operation::AddUnique(vec![a.clone(), b.clone()]);
        let out = op.apply_on(Some(&Value::Array(vec![a.clone()]))).unwrap();
        assert_eq!(out, Some(Value::Array(vec![a, b])));
    }

    #[test]
    fn test_merge_with_none_is_identity() {
        let op = Operation::Add(strings(&["x"]));
        assert_eq!(op.merge_with(None).unwrap(), op);
    }

    #[test]
    fn test_increment_merges() {
        let inc = Operation::increment(5).unwrap();
        assert_eq!(
            inc.merge_with(Some(&Operation::Set(Value::Integer(60)))).unwrap(),
            Operation::Set(Value::Integer(65))
        );
        assert_eq!(
            inc.merge_with(Some(&Operation::increment(-2).unwrap())).unwrap(),
            Operation::Increment(Value::Integer(3))
        );
        assert_eq!(
            inc.merge_with(Some(&Operation::Delete)).unwrap(),
            Operation::Set(Value::Integer(5))
        );
        assert!(matches!(
            inc.merge_with(Some(&Operation::Add(strings(&["x"])))),
            Err(ObjectError::IncompatibleOperation(_))
        ));
    }

    #[test]
    fn test_array_merges() {
        let add = Operation::Add(strings(&["b"]));
        assert_eq!(
            add.merge_with(Some(&Operation::Set(array(&["a"])))).unwrap(),
            Operation::Set(array(&["a", "b"]))
        );
        assert!(matches!(
            add.merge_with(Some(&Operation::Set(Value::Integer(1)))),
            Err(ObjectError::TypeMismatch(_))
        ));
        assert_eq!(
            add.merge_with(Some(&Operation::Add(strings(&["a"])))).unwrap(),
            Operation::Add(strings(&["a", "b"]))
        );
        assert_eq!(
            add.merge_with(Some(&Operation::Delete)).unwrap(),
            Operation::Set(array(&["b"]))
        );

        let unique = Operation::AddUnique(strings(&["a", "c"]));
        assert_eq!(
            unique.merge_with(Some(&Operation::AddUnique(strings(&["a"])))).unwrap(),
            Operation::AddUnique(strings(&["a", "c"]))
        );

        let remove = Operation::Remove(strings(&["b"]));
        assert_eq!(
            remove.merge_with(Some(&Operation::Remove(strings(&["a"])))).unwrap(),
            Operation::Remove(strings(&["a", "b"]))
        );
        assert_eq!(remove.merge_with(Some(&Operation::Delete)).unwrap(), Operation::Delete);
        assert!(matches!(
            remove.merge_with(Some(&Operation::Add(strings(&["a"])))),
            Err(ObjectError::IncompatibleOperation(_))
        ));
    }

    #[test]
    fn test_set_and_delete_absorb_history() {
        let prev = Operation::Add(strings(&["a"]));
        assert_eq!(
            Operation::Set(Value::Integer(1)).merge_with(Some(&prev)).unwrap(),
            Operation::Set(Value::Integer(1))
        );
        assert_eq!(Operation::Delete.merge_with(Some(&prev)).unwrap(), Operation::Delete);
    }

    #[test]
    fn test_relation_apply_produces_marker() {
        let target = RelationTarget {
            key: EntityKey::from_index(4),
            class_name: "Author".into(),
            object_id: "abc101".into(),
        };
        let op = Operation::Relation(RelationOp::new(vec![target], vec![]).unwrap());

        let value = op.apply_on(None).unwrap().unwrap();
        let rel = value.as_relation().unwrap();
        assert_eq!(rel.target_class(), Some("Author"));

        assert!(matches!(
            op.apply_on(Some(&Value::Integer(1))),
            Err(ObjectError::TypeMismatch(_))
        ));
    }
}
