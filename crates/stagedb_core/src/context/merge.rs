//! Merge policies and the staged changes a context pushes to its parent.

use stagedb_store::{ObjectId, Properties, Record};
use std::collections::BTreeSet;

/// How a child's staged values combine with its parent's current values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Properties the child changed win; everything else keeps the parent's
    /// current value.
    ///
    /// Two write contexts editing different properties of one object both
    /// survive. Two editing the same property resolve to the last commit.
    #[default]
    PropertyTrumps,
    /// The child's whole snapshot replaces the parent's record.
    ObjectTrumps,
}

impl MergePolicy {
    /// Resolves the properties the parent ends up with.
    ///
    /// `parent` is the parent's current state, `staged` the child's full
    /// snapshot and `changed` the keys the child modified.
    #[must_use]
    pub fn resolve(
        &self,
        parent: &Properties,
        staged: &Properties,
        changed: &BTreeSet<String>,
    ) -> Properties {
        match self {
            Self::PropertyTrumps => {
                let mut merged = parent.clone();
                for key in changed {
                    match staged.get(key) {
                        Some(value) => {
                            merged.insert(key.clone(), value.clone());
                        }
                        None => {
                            merged.remove(key);
                        }
                    }
                }
                merged
            }
            Self::ObjectTrumps => staged.clone(),
        }
    }
}

/// One updated object pushed to the parent.
#[derive(Debug, Clone)]
pub(crate) struct StagedUpdate {
    pub(crate) record: Record,
    pub(crate) changed: BTreeSet<String>,
}

/// Everything a context pushes to its parent in one save.
#[derive(Debug, Clone, Default)]
pub(crate) struct StagedChanges {
    pub(crate) inserted: Vec<Record>,
    pub(crate) updated: Vec<StagedUpdate>,
    pub(crate) deleted: Vec<ObjectId>,
}

impl StagedChanges {
    pub(crate) fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stagedb_store::Value;

    fn props(pairs: &[(&str, i64)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), Value::Integer(*v)))
            .collect()
    }

    #[test]
    fn property_trumps_keeps_unchanged_parent_values() {
        // Parent already holds a sibling's committed bonus.
        let parent = props(&[("salary", 10), ("bonus", 5)]);
        // Child saw the old bonus but only changed salary.
        let staged = props(&[("salary", 20), ("bonus", 0)]);
        let changed = BTreeSet::from(["salary".to_owned()]);

        let merged = MergePolicy::PropertyTrumps.resolve(&parent, &staged, &changed);
        assert_eq!(merged, props(&[("salary", 20), ("bonus", 5)]));
    }

    #[test]
    fn object_trumps_takes_the_whole_snapshot() {
        let parent = props(&[("salary", 10), ("bonus", 5)]);
        let staged = props(&[("salary", 20), ("bonus", 0)]);
        let changed = BTreeSet::from(["salary".to_owned()]);

        let merged = MergePolicy::ObjectTrumps.resolve(&parent, &staged, &changed);
        assert_eq!(merged, staged);
    }

    #[test]
    fn removed_property_is_removed() {
        let parent = props(&[("salary", 10)]);
        let staged = Properties::new();
        let changed = BTreeSet::from(["salary".to_owned()]);

        let merged = MergePolicy::PropertyTrumps.resolve(&parent, &staged, &changed);
        assert!(merged.is_empty());
    }

    fn arb_props() -> impl Strategy<Value = Properties> {
        prop::collection::btree_map("[a-e]", any::<i64>().prop_map(Value::Integer), 0..5)
    }

    proptest! {
        #[test]
        fn property_trumps_is_last_commit_wins_per_property(
            parent in arb_props(),
            staged in arb_props(),
            changed in prop::collection::btree_set("[a-e]", 0..5),
        ) {
            let merged = MergePolicy::PropertyTrumps.resolve(&parent, &staged, &changed);
            for key in ["a", "b", "c", "d", "e"] {
                if changed.contains(key) {
                    prop_assert_eq!(merged.get(key), staged.get(key));
                } else {
                    prop_assert_eq!(merged.get(key), parent.get(key));
                }
            }
        }
    }
}
