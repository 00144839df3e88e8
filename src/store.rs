//! # Store Module
//!
//! In-memory storage of raw dimension versions, grouped into one chain per entity.
//! Chains keep the order in which versions arrived; nothing here reorders or
//! validates them.

use crate::model::{EntityId, IntervalRecord};
use std::collections::BTreeMap;

/// Raw versions grouped by entity, in arrival order within each entity
#[derive(Debug, Clone, Default)]
pub struct IntervalStore {
    chains: BTreeMap<EntityId, Vec<IntervalRecord>>,
    record_count: usize,
}

impl IntervalStore {
    /// Create a new store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single version to its entity's chain
    pub fn insert(&mut self, record: IntervalRecord) {
        self.chains
            .entry(record.entity_id.clone())
            .or_default()
            .push(record);
        self.record_count += 1;
    }

    /// Add records to the store
    pub fn add_records(&mut self, records: impl IntoIterator<Item = IntervalRecord>) {
        for record in records {
            self.insert(record);
        }
    }

    /// Get one entity's chain
    pub fn chain(&self, entity_id: &EntityId) -> Option<&[IntervalRecord]> {
        self.chains.get(entity_id).map(Vec::as_slice)
    }

    /// Iterate chains in entity id order
    pub fn chains(&self) -> impl Iterator<Item = (&EntityId, &[IntervalRecord])> {
        self.chains
            .iter()
            .map(|(entity_id, chain)| (entity_id, chain.as_slice()))
    }

    pub fn entity_count(&self) -> usize {
        self.chains.len()
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }
}

impl FromIterator<IntervalRecord> for IntervalStore {
    fn from_iter<T: IntoIterator<Item = IntervalRecord>>(iter: T) -> Self {
        let mut store = IntervalStore::new();
        store.add_records(iter);
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{agreement, sample_dimension};

    #[test]
    fn test_groups_by_entity() {
        let store: IntervalStore = sample_dimension().into_iter().collect();
        assert_eq!(store.entity_count(), 3);
        assert_eq!(store.record_count(), 10);
        assert_eq!(store.chain(&EntityId::from("101")).unwrap().len(), 5);
        assert_eq!(store.chain(&EntityId::from("102")).unwrap().len(), 4);
        assert_eq!(store.chain(&EntityId::from("103")).unwrap().len(), 1);
        assert!(store.chain(&EntityId::from("999")).is_none());
    }

    #[test]
    fn test_preserves_arrival_order() {
        let mut store = IntervalStore::new();
        store.insert(agreement(2, "7", "2015-03-01", "9999-12-31", "1", 1, "1.0"));
        store.insert(agreement(1, "7", "2015-01-01", "2015-03-01", "1", 1, "1.0"));
        let chain = store.chain(&EntityId::from("7")).unwrap();
        assert_eq!(chain[0].surrogate_id.0, 2);
        assert_eq!(chain[1].surrogate_id.0, 1);
    }

    #[test]
    fn test_empty_store() {
        let store = IntervalStore::new();
        assert!(store.is_empty());
        assert_eq!(store.chains().count(), 0);
    }
}
