use std::collections::BTreeMap;

use crate::core::{ObjectError, Result};
use crate::entity::EntityKey;

/// A saved entity addressed by a relation operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationTarget {
    pub key: EntityKey,
    pub class_name: String,
    pub object_id: String,
}

/// Pending additions to and removals from a relation field.
///
/// Targets are keyed by object id, so the same entity never appears twice
/// and never sits in both sets: an addition always wins over a removal.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationOp {
    target_class: String,
    adds: BTreeMap<String, EntityKey>,
    removes: BTreeMap<String, EntityKey>,
}

impl RelationOp {
    pub fn new(adds: Vec<RelationTarget>, removes: Vec<RelationTarget>) -> Result<Self> {
        let target_class = match adds.first().or_else(|| removes.first()) {
            Some(target) => target.class_name.clone(),
            None => {
                return Err(ObjectError::InvalidArgument(
                    "Relation operation needs at least one object".into(),
                ));
            }
        };

        let mut op = Self {
            target_class,
            adds: BTreeMap::new(),
            removes: BTreeMap::new(),
        };
        // removals first so that additions win
        for target in removes {
            op.check_class(&target)?;
            op.adds.remove(&target.object_id);
            op.removes.insert(target.object_id, target.key);
        }
        for target in adds {
            op.check_class(&target)?;
            op.removes.remove(&target.object_id);
            op.adds.insert(target.object_id, target.key);
        }
        Ok(op)
    }

    fn check_class(&self, target: &RelationTarget) -> Result<()> {
        if target.class_name != self.target_class {
            return Err(ObjectError::InvalidArgument(format!(
                "Objects in a relation are not of same type: {} vs {}",
                target.class_name, self.target_class
            )));
        }
        Ok(())
    }

    pub fn target_class(&self) -> &str {
        &self.target_class
    }

    /// Object ids to add, with their arena keys.
    pub fn adds(&self) -> impl Iterator<Item = (&str, EntityKey)> {
        self.adds.iter().map(|(id, key)| (id.as_str(), *key))
    }

    pub fn removes(&self) -> impl Iterator<Item = (&str, EntityKey)> {
        self.removes.iter().map(|(id, key)| (id.as_str(), *key))
    }

    pub fn add_count(&self) -> usize {
        self.adds.len()
    }

    pub fn remove_count(&self) -> usize {
        self.removes.len()
    }

    /// Union of both operations; an id added by either side ends up only
    /// in the additions.
    pub(crate) fn merged_over(&self, prev: &RelationOp) -> Result<RelationOp> {
        if self.target_class != prev.target_class {
            return Err(ObjectError::IncompatibleOperation(format!(
                "Relation target class {} cannot merge with {}",
                self.target_class, prev.target_class
            )));
        }

        let mut adds = prev.adds.clone();
        adds.extend(self.adds.iter().map(|(id, key)| (id.clone(), *key)));

        let mut removes = prev.removes.clone();
        removes.extend(self.removes.iter().map(|(id, key)| (id.clone(), *key)));
        removes.retain(|id, _| !adds.contains_key(id));

        Ok(RelationOp {
            target_class: self.target_class.clone(),
            adds,
            removes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(index: usize, class_name: &str, id: &str) -> RelationTarget {
        RelationTarget {
            key: EntityKey::from_index(index),
            class_name: class_name.into(),
            object_id: id.into(),
        }
    }

    #[test]
    fn test_add_wins_within_one_operation() {
        let op = RelationOp::new(
            vec![target(0, "Author", "a1")],
            vec![target(0, "Author", "a1"), target(1, "Author", "a2")],
        )
        .unwrap();

        let adds: Vec<_> = op.adds().map(|(id, _)| id).collect();
        let removes: Vec<_> = op.removes().map(|(id, _)| id).collect();
        assert_eq!(adds, vec!["a1"]);
        assert_eq!(removes, vec!["a2"]);
    }

    #[test]
    fn test_mixed_classes_rejected() {
        let err = RelationOp::new(vec![target(0, "Author", "a1"), target(1, "Book", "b1")], vec![]);
        assert!(matches!(err, Err(ObjectError::InvalidArgument(_))));
        assert!(RelationOp::new(vec![], vec![]).is_err());
    }

    #[test]
    fn test_merge_prefers_adds() {
        let prev = RelationOp::new(vec![target(0, "Author", "a1")], vec![]).unwrap();
        let next = RelationOp::new(vec![], vec![target(0, "Author", "a1"), target(1, "Author", "a2")])
            .unwrap();

        let merged = next.merged_over(&prev).unwrap();
        assert_eq!(merged.add_count(), 1);
        assert_eq!(merged.remove_count(), 1);
        assert_eq!(merged.removes().next().unwrap().0, "a2");
    }

    #[test]
    fn test_merge_with_other_class_is_incompatible() {
        let prev = RelationOp::new(vec![target(0, "Author", "a1")], vec![]).unwrap();
        let next = RelationOp::new(vec![target(1, "Book", "b1")], vec![]).unwrap();
        assert!(matches!(
            next.merged_over(&prev),
            Err(ObjectError::IncompatibleOperation(_))
        ));
    }
}
