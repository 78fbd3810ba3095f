use std::collections::{BTreeMap, BTreeSet};

use tidemark_value::RowId;

/// A secondary index over one (table, column): string index key to the
/// ordered set of row ids carrying that key. Null and unrepresentable
/// column values are never entered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FkIndex {
    buckets: BTreeMap<String, BTreeSet<RowId>>,
}

/// One bucket transition for one row. Ingest computes these and applies
/// only those whose key actually moved.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexUpdate {
    pub table: String,
    pub column: String,
    pub old_key: Option<String>,
    pub new_key: Option<String>,
    pub row_id: RowId,
}

impl FkIndex {
    pub fn new() -> FkIndex {
        FkIndex::default()
    }

    pub fn ids_for(&self, key: &str) -> impl Iterator<Item = &RowId> {
        self.buckets.get(key).into_iter().flatten()
    }

    pub fn contains(&self, key: &str, id: &RowId) -> bool {
        self.buckets.get(key).is_some_and(|bucket| bucket.contains(id))
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub(crate) fn insert(&mut self, key: String, id: RowId) {
        self.buckets.entry(key).or_default().insert(id);
    }

    /// Remove `id` from `key`'s bucket, deleting the bucket once empty.
    pub(crate) fn remove(&mut self, key: &str, id: &RowId) {
        if let Some(bucket) = self.buckets.get_mut(key) {
            bucket.remove(id);
            if bucket.is_empty() {
                self.buckets.remove(key);
            }
        }
    }

    pub(crate) fn apply(&mut self, update: &IndexUpdate) {
        if let Some(old_key) = &update.old_key {
            self.remove(old_key, &update.row_id);
        }
        if let Some(new_key) = &update.new_key {
            self.insert(new_key.clone(), update.row_id.clone());
        }
    }

    #[cfg(test)]
    pub(crate) fn bucket(&self, key: &str) -> Option<&BTreeSet<RowId>> {
        self.buckets.get(key)
    }
}

impl IndexUpdate {
    /// An update is worth applying only when the key moved.
    pub fn is_effective(&self) -> bool {
        self.old_key != self.new_key
    }
}
