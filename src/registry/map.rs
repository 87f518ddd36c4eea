//! `RegistryMap`: sub-entity key → registry record.

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;

use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshError;
use crate::registry::NeededEntity;
use crate::registry::key::SubEntityKey;
use crate::registry::record::{NeedMark, RegistryRecord, should_take_ownership};
use crate::topology::point::{EntityKey, PointId};

#[derive(Clone, Debug, Default)]
pub struct RegistryMap {
    map: HashMap<SubEntityKey, RegistryRecord>,
    empty: RegistryRecord,
}

impl RegistryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Read-only lookup; never creates.
    pub fn lookup(&self, key: &SubEntityKey) -> Option<&RegistryRecord> {
        self.map.get(key)
    }

    pub fn lookup_mut(&mut self, key: &SubEntityKey) -> Option<&mut RegistryRecord> {
        self.map.get_mut(key)
    }

    /// Record for `key`, or the shared empty record.
    pub fn lookup_or_empty(&self, key: &SubEntityKey) -> &RegistryRecord {
        self.map.get(key).unwrap_or(&self.empty)
    }

    pub fn get_or_create(&mut self, key: SubEntityKey) -> &mut RegistryRecord {
        self.map.entry(key).or_default()
    }

    pub fn insert(&mut self, key: SubEntityKey, record: RegistryRecord) -> Option<RegistryRecord> {
        self.map.insert(key, record)
    }

    pub fn remove(&mut self, key: &SubEntityKey) -> Option<RegistryRecord> {
        self.map.remove(key)
    }

    pub fn contains(&self, key: &SubEntityKey) -> bool {
        self.map.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SubEntityKey, &RegistryRecord)> {
        self.map.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SubEntityKey, &mut RegistryRecord)> {
        self.map.iter_mut()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&SubEntityKey, &mut RegistryRecord) -> bool) {
        self.map.retain(|k, v| keep(k, v));
    }

    /// Keys in ascending order, for deterministic traversals.
    pub fn sorted_keys(&self) -> Vec<SubEntityKey> {
        let mut keys: Vec<_> = self.map.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Register `element`'s interest in `key`.
    ///
    /// A missing record, or one with no placeholders, is (re)installed as owned by
    /// `element`. Otherwise ownership moves to `element` only if it wins the ownership
    /// order; placeholders are kept. The need mark is merged in every case. Returns
    /// `true` iff `element` became the owner through this call.
    pub fn insert_or_update(
        &mut self,
        element: EntityKey,
        key: SubEntityKey,
        ordinal: usize,
        needed: &NeededEntity,
        need_nodes: bool,
    ) -> bool {
        let vote = NeedMark::from_need(need_nodes);
        match self.map.entry(key) {
            Entry::Vacant(slot) => {
                let mut record = RegistryRecord::owned_by(element, ordinal, needed.new_nodes);
                record.mark = vote;
                slot.insert(record);
                true
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                let became_owner = if record.new_nodes.is_empty() {
                    let mark = record.mark;
                    *record = RegistryRecord::owned_by(element, ordinal, needed.new_nodes);
                    record.mark = mark;
                    true
                } else if should_take_ownership(element, &record.owner) {
                    record.set_owner(element, ordinal);
                    true
                } else {
                    false
                };
                record.mark = record.mark.merge(vote);
                became_owner
            }
        }
    }

    /// Hand an existing record to `element` if it wins the ownership order or the
    /// record is orphaned. Never installs; returns whether ownership changed.
    pub fn replace_element_ownership(
        &mut self,
        element: EntityKey,
        key: &SubEntityKey,
        ordinal: usize,
    ) -> bool {
        match self.map.get_mut(key) {
            Some(record) if should_take_ownership(element, &record.owner) => {
                record.set_owner(element, ordinal);
                true
            }
            _ => false,
        }
    }

    /// Total number of placeholders over all records.
    pub fn total_size(&self) -> usize {
        self.map.values().map(|r| r.new_nodes.len()).sum()
    }

    /// Approximate heap + inline footprint in bytes.
    pub fn memory_usage(&self) -> usize {
        let per_entry =
            std::mem::size_of::<SubEntityKey>() + std::mem::size_of::<RegistryRecord>();
        let slots: usize = self
            .map
            .values()
            .map(|r| 2 * r.new_nodes.len() * std::mem::size_of::<Option<PointId>>())
            .sum();
        std::mem::size_of::<Self>() + self.map.capacity() * per_entry + slots
    }
}

impl DebugInvariants for RegistryMap {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "RegistryMap");
    }

    fn validate_invariants(&self) -> Result<(), MeshError> {
        for record in self.map.values() {
            record.new_nodes.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::point::EntityRank;

    fn pid(n: u64) -> PointId {
        PointId::new(n).unwrap()
    }

    fn edge(a: u64, b: u64) -> SubEntityKey {
        let mut k = SubEntityKey::empty(EntityRank::Node);
        k.insert(pid(a)).unwrap();
        k.insert(pid(b)).unwrap();
        k
    }

    const ONE: NeededEntity = NeededEntity {
        rank: EntityRank::Edge,
        new_nodes: 1,
    };

    #[test]
    fn first_visitor_installs_and_lower_id_takes_over() {
        let mut m = RegistryMap::new();
        assert!(m.insert_or_update(EntityKey::element(pid(10)), edge(5, 6), 2, &ONE, true));
        assert!(m.insert_or_update(EntityKey::element(pid(3)), edge(6, 5), 0, &ONE, true));
        assert!(!m.insert_or_update(EntityKey::element(pid(12)), edge(5, 6), 1, &ONE, true));

        let r = m.lookup(&edge(5, 6)).unwrap();
        assert_eq!(r.owner.key(), Some(EntityKey::element(pid(3))));
        assert_eq!(r.ordinal(), Some(0));
        assert_eq!(r.new_nodes.len(), 1);
        assert_eq!(m.total_size(), 1);
    }

    #[test]
    fn marks_accumulate() {
        let mut m = RegistryMap::new();
        m.insert_or_update(EntityKey::element(pid(1)), edge(1, 2), 0, &ONE, false);
        assert_eq!(m.lookup(&edge(1, 2)).unwrap().mark, NeedMark::NotNeeded);
        m.insert_or_update(EntityKey::element(pid(2)), edge(1, 2), 0, &ONE, true);
        assert!(m.lookup(&edge(1, 2)).unwrap().mark.is_needed());
    }

    #[test]
    fn emptied_record_is_reinstalled_by_next_visitor() {
        let mut m = RegistryMap::new();
        m.insert_or_update(EntityKey::element(pid(1)), edge(1, 2), 0, &ONE, true);
        m.lookup_mut(&edge(1, 2)).unwrap().new_nodes.clear();
        assert!(m.insert_or_update(EntityKey::element(pid(9)), edge(1, 2), 3, &ONE, true));
        let r = m.lookup(&edge(1, 2)).unwrap();
        assert_eq!(r.owner.key(), Some(EntityKey::element(pid(9))));
        assert_eq!(r.new_nodes.len(), 1);
    }

    #[test]
    fn replace_ownership_never_installs() {
        let mut m = RegistryMap::new();
        assert!(!m.replace_element_ownership(EntityKey::element(pid(1)), &edge(1, 2), 0));
        assert!(m.is_empty());

        m.insert_or_update(EntityKey::element(pid(4)), edge(1, 2), 0, &ONE, true);
        m.lookup_mut(&edge(1, 2)).unwrap().owner.id = None;
        assert!(m.replace_element_ownership(EntityKey::element(pid(8)), &edge(1, 2), 1));
        assert_eq!(
            m.lookup(&edge(1, 2)).unwrap().owner.key(),
            Some(EntityKey::element(pid(8)))
        );
    }

    #[test]
    fn lookup_or_empty_does_not_create() {
        let m = RegistryMap::new();
        assert!(m.lookup_or_empty(&edge(1, 2)).new_nodes.is_empty());
        assert!(m.is_empty());
        assert!(m.memory_usage() >= std::mem::size_of::<RegistryMap>());
        m.validate_invariants().unwrap();
    }
}
