//! `PointId`, `EntityRank` and `EntityKey`: strong handles for mesh entities.
//!
//! Every mesh entity (node, edge, face, element) is named by a rank and a global,
//! nonzero identifier. `PointId` wraps a `NonZeroU64` so that 0 stays reserved as an
//! invalid/sentinel value; `EntityKey` pairs it with an [`EntityRank`].
//!
//! The registry never holds mesh entities themselves, only these keys: they are
//! back-references resolved through the mesh collaborator on demand.

use std::{fmt, num::NonZeroU64};

use crate::mesh_error::MeshError;

/// Global, nonzero entity identifier.
///
/// # Memory layout
/// This type is `repr(transparent)`, meaning it has the same ABI and
/// alignment as its single field (`NonZeroU64`) and can be carried on the wire
/// exactly like a `u64`.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct PointId(NonZeroU64);

impl PointId {
    /// Creates a new `PointId` from a raw `u64` value.
    ///
    /// Returns [`MeshError::InvalidPointId`] if `raw == 0`.
    ///
    /// ```rust
    /// # use sieve_node_registry::topology::point::PointId;
    /// let p = PointId::new(1).unwrap();
    /// assert_eq!(p.get(), 1);
    /// assert!(PointId::new(0).is_err());
    /// ```
    #[inline]
    pub fn new(raw: u64) -> Result<Self, MeshError> {
        NonZeroU64::new(raw)
            .map(PointId)
            .ok_or(MeshError::InvalidPointId)
    }

    /// Decode a wire value where 0 means "no id".
    #[inline]
    pub fn from_wire(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(PointId)
    }

    /// Returns the inner `u64` value of this `PointId`.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PointId").field(&self.get()).finish()
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

#[cfg(feature = "mpi-support")]
unsafe impl mpi::datatype::Equivalence for PointId {
    type Out = <u64 as mpi::datatype::Equivalence>::Out;

    fn equivalent_datatype() -> Self::Out {
        u64::equivalent_datatype()
    }
}

/// Topological rank of a mesh entity.
///
/// The derived ordering is the one used by the ownership rule:
/// `Node < Edge < Face < Element`.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(u8)]
pub enum EntityRank {
    Node = 0,
    Edge = 1,
    Face = 2,
    Element = 3,
}

impl EntityRank {
    /// All ranks, lowest first.
    pub const ALL: [EntityRank; 4] = [
        EntityRank::Node,
        EntityRank::Edge,
        EntityRank::Face,
        EntityRank::Element,
    ];

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a wire byte.
    pub fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }
}

/// (rank, id) pair naming a mesh entity.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct EntityKey {
    pub rank: EntityRank,
    pub id: PointId,
}

impl EntityKey {
    #[inline]
    pub const fn new(rank: EntityRank, id: PointId) -> Self {
        Self { rank, id }
    }

    /// Shorthand for a node key.
    #[inline]
    pub const fn node(id: PointId) -> Self {
        Self::new(EntityRank::Node, id)
    }

    /// Shorthand for an element-rank key.
    #[inline]
    pub const fn element(id: PointId) -> Self {
        Self::new(EntityRank::Element, id)
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{}]", self.rank, self.id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{}]", self.rank, self.id)
    }
}

/// An entity paired with a process rank (send/receive lists for ghosting).
pub type EntityProc = (EntityKey, usize);

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(PointId, u64);
    assert_eq_size!(Option<PointId>, u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_zero_is_error() {
        assert_eq!(PointId::new(0), Err(MeshError::InvalidPointId));
        assert_eq!(PointId::from_wire(0), None);
    }

    #[test]
    fn debug_and_display() {
        let p = PointId::new(7).unwrap();
        assert_eq!(format!("{:?}", p), "PointId(7)");
        assert_eq!(format!("{}", p), "7");
        let k = EntityKey::element(p);
        assert_eq!(format!("{}", k), "Element[7]");
    }

    #[test]
    fn rank_order_matches_topology() {
        assert!(EntityRank::Element > EntityRank::Face);
        assert!(EntityRank::Face > EntityRank::Edge);
        assert!(EntityRank::Edge > EntityRank::Node);
        for r in EntityRank::ALL {
            assert_eq!(EntityRank::from_u8(r.as_u8()), Some(r));
        }
        assert_eq!(EntityRank::from_u8(9), None);
    }

    #[test]
    fn keys_order_by_rank_then_id() {
        let a = EntityKey::new(EntityRank::Face, PointId::new(100).unwrap());
        let b = EntityKey::new(EntityRank::Element, PointId::new(1).unwrap());
        assert!(a < b);
    }
}
