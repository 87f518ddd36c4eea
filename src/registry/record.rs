//! Per-sub-entity registry data: placeholders, need mark, owner.

use crate::mesh_error::MeshError;
use crate::topology::point::{EntityKey, EntityRank, PointId};

/// Ordered placeholder slots for the new nodes of one sub-entity.
///
/// Each slot carries a local handle (the node is materialised in the local mesh) and
/// a global id shadow (the identity sent over the wire). The two vectors always have
/// the same length, and a present handle equals its id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewNodes {
    slots: Vec<Option<PointId>>,
    ids: Vec<Option<PointId>>,
}

impl NewNodes {
    /// `n` unresolved placeholders.
    pub fn unresolved(n: usize) -> Self {
        Self {
            slots: vec![None; n],
            ids: vec![None; n],
        }
    }

    /// Placeholders whose ids are known but not yet present locally.
    pub fn from_ids(ids: impl IntoIterator<Item = PointId>) -> Self {
        let ids: Vec<_> = ids.into_iter().map(Some).collect();
        Self {
            slots: vec![None; ids.len()],
            ids,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn slots(&self) -> &[Option<PointId>] {
        &self.slots
    }

    pub fn ids(&self) -> &[Option<PointId>] {
        &self.ids
    }

    /// Every placeholder has a global id.
    pub fn all_resolved(&self) -> bool {
        self.ids.iter().all(Option::is_some)
    }

    pub fn unresolved_count(&self) -> usize {
        self.ids.iter().filter(|id| id.is_none()).count()
    }

    /// Resolved global ids, in slot order.
    pub fn resolved_ids(&self) -> impl Iterator<Item = PointId> + '_ {
        self.ids.iter().flatten().copied()
    }

    /// Bind slot `i` to a node that exists locally.
    pub fn resolve(&mut self, i: usize, node: PointId) {
        self.slots[i] = Some(node);
        self.ids[i] = Some(node);
    }

    /// Mark slot `i` as present locally (its id must already be known).
    pub fn attach(&mut self, i: usize) -> Option<PointId> {
        let id = self.ids[i]?;
        self.slots[i] = Some(id);
        Some(id)
    }

    /// Forget the local handle of every slot holding `node`, keeping the id.
    pub fn detach(&mut self, node: PointId) {
        for (slot, id) in self.slots.iter_mut().zip(&self.ids) {
            if *id == Some(node) {
                *slot = None;
            }
        }
    }

    /// Keep only the slots whose id satisfies `keep`; returns how many were dropped.
    pub fn retain_ids(&mut self, mut keep: impl FnMut(Option<PointId>) -> bool) -> usize {
        let before = self.ids.len();
        let mut i = 0;
        while i < self.ids.len() {
            if keep(self.ids[i]) {
                i += 1;
            } else {
                self.ids.remove(i);
                self.slots.remove(i);
            }
        }
        before - self.ids.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.ids.clear();
    }

    /// Check the lock-step invariant.
    pub fn validate(&self) -> Result<(), MeshError> {
        if self.slots.len() != self.ids.len() {
            return Err(MeshError::PlaceholderMismatch {
                slots: self.slots.len(),
                ids: self.ids.len(),
            });
        }
        for (i, (slot, id)) in self.slots.iter().zip(&self.ids).enumerate() {
            if slot.is_some() && slot != id {
                return Err(MeshError::UnresolvedPlaceholder {
                    key: format!("handle {slot:?} != id {id:?}"),
                    index: i,
                });
            }
        }
        Ok(())
    }
}

/// Accumulated "does this sub-entity need new nodes" vote.
///
/// `merge` is associative, commutative and idempotent with `Unknown` as identity;
/// any "needed" vote wins over "not needed".
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum NeedMark {
    #[default]
    Unknown,
    Needed,
    NotNeeded,
    /// Both votes were cast; creation proceeds.
    NeededOverridesNotNeeded,
}

impl NeedMark {
    pub fn from_need(need_nodes: bool) -> Self {
        if need_nodes {
            NeedMark::Needed
        } else {
            NeedMark::NotNeeded
        }
    }

    fn bits(self) -> u8 {
        match self {
            NeedMark::Unknown => 0b00,
            NeedMark::Needed => 0b01,
            NeedMark::NotNeeded => 0b10,
            NeedMark::NeededOverridesNotNeeded => 0b11,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => NeedMark::Unknown,
            0b01 => NeedMark::Needed,
            0b10 => NeedMark::NotNeeded,
            _ => NeedMark::NeededOverridesNotNeeded,
        }
    }

    #[must_use]
    pub fn merge(self, other: NeedMark) -> NeedMark {
        NeedMark::from_bits(self.bits() | other.bits())
    }

    /// Only an unanimous "not needed" suppresses creation.
    pub fn is_only_not_needed(self) -> bool {
        self == NeedMark::NotNeeded
    }

    pub fn is_needed(self) -> bool {
        matches!(self, NeedMark::Needed | NeedMark::NeededOverridesNotNeeded)
    }
}

/// Owning element of a record. `id == None` marks an orphaned record whose owner was
/// deleted; its rank is kept.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OwnerKey {
    pub rank: EntityRank,
    pub id: Option<PointId>,
}

impl OwnerKey {
    pub fn of(element: EntityKey) -> Self {
        Self {
            rank: element.rank,
            id: Some(element.id),
        }
    }

    pub const fn none() -> Self {
        Self {
            rank: EntityRank::Node,
            id: None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.id.is_none()
    }

    pub fn key(&self) -> Option<EntityKey> {
        self.id.map(|id| EntityKey::new(self.rank, id))
    }
}

impl Default for OwnerKey {
    fn default() -> Self {
        Self::none()
    }
}

/// Deterministic ownership order: does `candidate` take `current`'s place?
///
/// Higher-rank elements win; at equal or higher rank the lower id wins. An orphaned
/// owner is always replaced.
pub fn should_take_ownership(candidate: EntityKey, current: &OwnerKey) -> bool {
    match current.id {
        None => true,
        Some(cur_id) => {
            candidate.rank > current.rank || (candidate.id < cur_id && candidate.rank >= current.rank)
        }
    }
}

/// Everything the registry knows about one sub-entity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryRecord {
    pub new_nodes: NewNodes,
    pub mark: NeedMark,
    pub owner: OwnerKey,
    /// 1-based ordinal of the sub-entity within the owner's topology; 0 = none.
    pub sub_ordinal: u8,
}

impl RegistryRecord {
    pub fn owned_by(element: EntityKey, ordinal: usize, n_new: usize) -> Self {
        Self {
            new_nodes: NewNodes::unresolved(n_new),
            mark: NeedMark::Unknown,
            owner: OwnerKey::of(element),
            sub_ordinal: encode_ordinal(ordinal),
        }
    }

    /// Zero-based ordinal within the owner's topology.
    pub fn ordinal(&self) -> Option<usize> {
        (self.sub_ordinal > 0).then(|| self.sub_ordinal as usize - 1)
    }

    pub fn set_owner(&mut self, element: EntityKey, ordinal: usize) {
        self.owner = OwnerKey::of(element);
        self.sub_ordinal = encode_ordinal(ordinal);
    }
}

fn encode_ordinal(ordinal: usize) -> u8 {
    // Cell topologies have at most 12 sub-entities of a rank.
    u8::try_from(ordinal + 1).unwrap_or(u8::MAX)
}
