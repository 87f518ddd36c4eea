//! `SubEntityKey`: canonical name of an edge, face, or element interior.
//!
//! A sub-entity is identified by the set of its bounding node ids (or, for
//! whole-element refinement, by the element id alone), independent of which element
//! visits it or in which local order. Members are kept sorted so the derived
//! `Eq`/`Hash`/`Ord` implement set semantics.

use std::fmt;

use crate::mesh::MeshTopology;
use crate::mesh_error::MeshError;
use crate::topology::point::{EntityKey, EntityRank, PointId};

/// Maximum number of members (a quadrilateral face).
pub const SUB_ENTITY_CAPACITY: usize = 4;

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubEntityKey {
    member_rank: EntityRank,
    len: u8,
    members: [u64; SUB_ENTITY_CAPACITY],
}

impl SubEntityKey {
    /// Empty key whose members are entities of `member_rank`.
    pub fn empty(member_rank: EntityRank) -> Self {
        Self {
            member_rank,
            len: 0,
            members: [0; SUB_ENTITY_CAPACITY],
        }
    }

    /// Singleton key naming a whole element.
    pub fn of_element(element: EntityKey) -> Self {
        let mut key = Self::empty(element.rank);
        key.members[0] = element.id.get();
        key.len = 1;
        key
    }

    /// Key for the `ordinal`-th sub-entity of rank `needed` of `element`.
    pub fn build<M>(
        mesh: &M,
        element: EntityKey,
        needed: EntityRank,
        ordinal: usize,
    ) -> Result<Self, MeshError>
    where
        M: MeshTopology + ?Sized,
    {
        if needed == EntityRank::Element {
            return Ok(Self::of_element(element));
        }
        let nodes = mesh.bounding_nodes(element, needed, ordinal)?;
        let mut key = Self::empty(EntityRank::Node);
        for id in nodes {
            key.insert(id)?;
        }
        if key.is_empty() {
            return Err(MeshError::EmptySubEntity {
                element,
                rank: needed,
                ordinal,
            });
        }
        Ok(key)
    }

    /// Insert a member; duplicates are ignored.
    pub fn insert(&mut self, id: PointId) -> Result<(), MeshError> {
        let raw = id.get();
        let live = &self.members[..self.len as usize];
        let pos = match live.binary_search(&raw) {
            Ok(_) => return Ok(()),
            Err(pos) => pos,
        };
        let n = self.len as usize;
        if n == SUB_ENTITY_CAPACITY {
            return Err(MeshError::SubEntityArityExceeded {
                capacity: SUB_ENTITY_CAPACITY,
                attempted: n + 1,
            });
        }
        self.members.copy_within(pos..n, pos + 1);
        self.members[pos] = raw;
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Rank of the member entities (`Node` for edges/faces).
    pub fn member_rank(&self) -> EntityRank {
        self.member_rank
    }

    /// Members in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = PointId> + '_ {
        self.members[..self.len as usize]
            .iter()
            .filter_map(|&raw| PointId::from_wire(raw))
    }

    pub fn contains(&self, id: PointId) -> bool {
        self.members[..self.len as usize]
            .binary_search(&id.get())
            .is_ok()
    }

    /// The element named by a whole-element key.
    pub fn as_element(&self) -> Option<EntityKey> {
        if self.member_rank != EntityRank::Node && self.len == 1 {
            PointId::from_wire(self.members[0]).map(|id| EntityKey::new(self.member_rank, id))
        } else {
            None
        }
    }
}

impl fmt::Debug for SubEntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}{:?}", self.member_rank, &self.members[..self.len as usize])
    }
}

impl fmt::Display for SubEntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: u64) -> PointId {
        PointId::new(n).unwrap()
    }

    fn key(ids: &[u64]) -> SubEntityKey {
        let mut k = SubEntityKey::empty(EntityRank::Node);
        for &i in ids {
            k.insert(pid(i)).unwrap();
        }
        k
    }

    #[test]
    fn insertion_order_does_not_matter() {
        assert_eq!(key(&[3, 1, 2]), key(&[2, 3, 1]));
        assert_eq!(key(&[3, 1, 2]).iter().map(PointId::get).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn duplicates_are_ignored() {
        let k = key(&[5, 5, 6]);
        assert_eq!(k.len(), 2);
        assert!(k.contains(pid(5)));
        assert!(!k.contains(pid(7)));
    }

    #[test]
    fn fifth_member_is_rejected() {
        let mut k = key(&[1, 2, 3, 4]);
        assert_eq!(
            k.insert(pid(9)),
            Err(MeshError::SubEntityArityExceeded {
                capacity: 4,
                attempted: 5
            })
        );
        // Re-inserting an existing member at capacity is fine.
        k.insert(pid(2)).unwrap();
    }

    #[test]
    fn element_and_node_keys_differ() {
        let e = SubEntityKey::of_element(EntityKey::element(pid(7)));
        assert_ne!(e, key(&[7]));
        assert_eq!(e.as_element(), Some(EntityKey::element(pid(7))));
        assert_eq!(key(&[7]).as_element(), None);
    }
}
