//! The parallel sub-dimensional node registry.
//!
//! During refinement every element asks for new nodes on some of its sub-entities
//! (edges, faces, its own interior). Neighbouring elements, possibly on different
//! ranks, share those sub-entities. The registry decides, identically on every rank,
//! which element owns each sub-entity, creates the new nodes exactly once on the
//! owner's rank, and distributes their ids to the ranks that hold ghosts.
//!
//! One refinement cycle walks the phases of [`RegistryState`]:
//!
//! 1. **registration**: every element registers its needs
//!    ([`NodeRegistry::register_need_new_node`]); `end_registration` creates the nodes
//!    of locally owned records;
//! 2. **check for remote**: ghost elements size the messages they will send to their
//!    owners;
//! 3. **get from remote**: the same traversal packs the messages, which are exchanged
//!    and unpacked; new nodes are ghosted to the ranks that need them.
//!
//! [`NodeRegistry::refine_cycle`] drives all phases over every element of a mesh.

pub mod buffer;
pub mod create;
pub mod fields;
pub mod key;
pub mod lifecycle;
pub mod map;
pub mod record;
pub mod register;
pub mod remote;
pub mod state;

use std::collections::BTreeMap;

pub use crate::config::NeededEntity;
pub use buffer::{BufferMode, SendBuffers};
pub use key::SubEntityKey;
pub use map::RegistryMap;
pub use record::{NeedMark, NewNodes, OwnerKey, RegistryRecord};
pub use state::RegistryState;

use crate::algs::communicator::Communicator;
use crate::algs::exchange::agree_on_failure;
use crate::config::RegistryConfig;
use crate::mesh::{GhostingId, MeshTopology, RefinementMesh};
use crate::mesh_error::MeshError;
use crate::topology::point::{EntityKey, EntityProc, EntityRank, PointId};

/// Decides whether a given sub-entity of an element wants new nodes.
pub trait MarkPolicy {
    fn need_nodes(&mut self, element: EntityKey, rank: EntityRank, ordinal: usize) -> bool;
}

impl<F> MarkPolicy for F
where
    F: FnMut(EntityKey, EntityRank, usize) -> bool,
{
    fn need_nodes(&mut self, element: EntityKey, rank: EntityRank, ordinal: usize) -> bool {
        self(element, rank, ordinal)
    }
}

/// Every sub-entity of every element is refined.
#[derive(Clone, Copy, Debug, Default)]
pub struct UniformRefinement;

impl MarkPolicy for UniformRefinement {
    fn need_nodes(&mut self, _: EntityKey, _: EntityRank, _: usize) -> bool {
        true
    }
}

/// Per-sub-entity operation applied by [`NodeRegistry::do_for_all_sub_entities`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubEntityOp {
    Register,
    CheckForRemote,
    GetFromRemote,
    ReplaceOwnership,
}

/// Counters reported by [`NodeRegistry::refine_cycle`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub nodes_created: usize,
    pub messages_sent: usize,
    pub messages_received: usize,
    pub nodes_ghosted: usize,
    /// Number of records in the registry.
    pub registry_size: usize,
    /// Placeholders over all records.
    pub placeholders: usize,
}

#[derive(Clone, Debug, Default)]
struct CycleStats {
    nodes_created: usize,
    messages_sent: usize,
    messages_received: usize,
    nodes_ghosted: usize,
}

#[derive(Debug)]
pub struct NodeRegistry {
    config: RegistryConfig,
    map: RegistryMap,
    state: RegistryState,
    buffers: SendBuffers,
    /// (new node, destination rank) collected while packing.
    pending_ghosts: Vec<EntityProc>,
    /// Received node ids not yet present locally, with their owning rank.
    received: BTreeMap<PointId, usize>,
    /// First local failure of the current collective phase.
    failure: Option<MeshError>,
    ghosting: Option<GhostingId>,
    stats: CycleStats,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl NodeRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            map: RegistryMap::new(),
            state: RegistryState::None,
            buffers: SendBuffers::default(),
            pending_ghosts: Vec::new(),
            received: BTreeMap::new(),
            failure: None,
            ghosting: None,
            stats: CycleStats::default(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn state(&self) -> RegistryState {
        self.state
    }

    pub fn map(&self) -> &RegistryMap {
        &self.map
    }

    /// Record of `key`, if registered.
    pub fn lookup(&self, key: &SubEntityKey) -> Option<&RegistryRecord> {
        self.map.lookup(key)
    }

    /// Placeholders over all records.
    pub fn total_size(&self) -> usize {
        self.map.total_size()
    }

    pub fn memory_usage(&self) -> usize {
        self.map.memory_usage()
            + self.pending_ghosts.capacity() * std::mem::size_of::<EntityProc>()
            + self.received.len() * std::mem::size_of::<(PointId, usize)>()
    }

    /// New nodes queued for ghosting in the current cycle.
    pub fn pending_ghosts(&self) -> &[EntityProc] {
        &self.pending_ghosts
    }

    pub fn summary(&self) -> CycleSummary {
        CycleSummary {
            nodes_created: self.stats.nodes_created,
            messages_sent: self.stats.messages_sent,
            messages_received: self.stats.messages_received,
            nodes_ghosted: self.stats.nodes_ghosted,
            registry_size: self.map.len(),
            placeholders: self.map.total_size(),
        }
    }

    fn latch(&mut self, err: &MeshError) {
        if self.failure.is_none() {
            self.failure = Some(err.clone());
        }
    }

    /// Apply `op` to every sub-entity of each rank in `needed` of `element`.
    pub fn do_for_all_sub_entities<M, P>(
        &mut self,
        mesh: &M,
        op: SubEntityOp,
        element: EntityKey,
        needed: &[NeededEntity],
        policy: &mut P,
    ) -> Result<(), MeshError>
    where
        M: MeshTopology + ?Sized,
        P: MarkPolicy + ?Sized,
    {
        for need in needed {
            let count = mesh.sub_entity_count(element, need.rank)?;
            for ordinal in 0..count {
                match op {
                    SubEntityOp::Register => {
                        let need_nodes = policy.need_nodes(element, need.rank, ordinal);
                        self.register_need_new_node(mesh, element, need, ordinal, need_nodes)?;
                    }
                    SubEntityOp::CheckForRemote => {
                        self.check_for_remote(mesh, element, need, ordinal)?
                    }
                    SubEntityOp::GetFromRemote => {
                        self.get_from_remote(mesh, element, need, ordinal)?
                    }
                    SubEntityOp::ReplaceOwnership => {
                        self.replace_element_ownership(mesh, element, need, ordinal)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Run one complete refinement cycle over every element of `mesh`.
    ///
    /// Collective: every rank must call it. On failure the mesh modification is rolled
    /// back, the registry enters [`RegistryState::Aborted`] and the error is returned;
    /// ranks whose peers failed get [`MeshError::CollectiveFailure`].
    pub fn refine_cycle<M, C, P>(
        &mut self,
        mesh: &mut M,
        comm: &C,
        needed: &[NeededEntity],
        policy: &mut P,
    ) -> Result<CycleSummary, MeshError>
    where
        M: RefinementMesh + ?Sized,
        C: Communicator,
        P: MarkPolicy + ?Sized,
    {
        let result = self.run_cycle(mesh, comm, needed, policy);
        if let Err(e) = &result {
            log::debug!("P[{}] refinement cycle aborted: {e}", mesh.parallel_rank());
            if mesh.in_modification() {
                mesh.modification_abort();
            }
            self.state = RegistryState::Aborted;
        }
        result
    }

    fn register_all<M, P>(
        &mut self,
        mesh: &mut M,
        elements: &[EntityKey],
        needed: &[NeededEntity],
        policy: &mut P,
    ) -> Result<(), MeshError>
    where
        M: RefinementMesh + ?Sized,
        P: MarkPolicy + ?Sized,
    {
        self.begin_registration()?;
        for &e in elements {
            self.do_for_all_sub_entities(&*mesh, SubEntityOp::Register, e, needed, policy)?;
        }
        self.end_registration(mesh)
    }

    fn run_cycle<M, C, P>(
        &mut self,
        mesh: &mut M,
        comm: &C,
        needed: &[NeededEntity],
        policy: &mut P,
    ) -> Result<CycleSummary, MeshError>
    where
        M: RefinementMesh + ?Sized,
        C: Communicator,
        P: MarkPolicy + ?Sized,
    {
        let elements = mesh.elements();

        if let Err(e) = self.register_all(mesh, &elements, needed, policy) {
            // Peers are waiting in the check-for-remote agreement.
            return agree_on_failure(comm, Err(e));
        }

        self.begin_check_for_remote(&*mesh)?;
        for &e in &elements {
            // Failures are latched and surface collectively below.
            if let Err(err) =
                self.do_for_all_sub_entities(&*mesh, SubEntityOp::CheckForRemote, e, needed, policy)
            {
                self.latch(&err);
                break;
            }
        }
        self.end_check_for_remote(&*mesh, comm)?;

        self.begin_get_from_remote()?;
        for &e in &elements {
            if let Err(err) =
                self.do_for_all_sub_entities(&*mesh, SubEntityOp::GetFromRemote, e, needed, policy)
            {
                self.latch(&err);
                break;
            }
        }
        self.end_get_from_remote(mesh, comm)?;

        mesh.modification_end()?;
        let summary = self.summary();
        log::debug!(
            "P[{}] refinement cycle done: {} created, {} sent, {} received, {} ghosted",
            mesh.parallel_rank(),
            summary.nodes_created,
            summary.messages_sent,
            summary.messages_received,
            summary.nodes_ghosted
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::mesh::{EntityFactory, InMemoryMesh};
    use crate::topology::cell_type::CellType;

    fn pid(n: u64) -> PointId {
        PointId::new(n).unwrap()
    }

    fn two_triangles() -> InMemoryMesh {
        let mut m = InMemoryMesh::serial();
        m.add_element(
            EntityKey::element(pid(1)),
            CellType::Triangle,
            &[pid(1), pid(2), pid(3)],
            0,
        )
        .unwrap();
        m.add_element(
            EntityKey::element(pid(2)),
            CellType::Triangle,
            &[pid(2), pid(4), pid(3)],
            0,
        )
        .unwrap();
        m
    }

    #[test]
    fn serial_cycle_creates_one_node_per_edge() {
        let mut mesh = two_triangles();
        let mut reg = NodeRegistry::default();
        let summary = reg
            .refine_cycle(&mut mesh, &NoComm, &[NeededEntity::edge_midpoints()], &mut UniformRefinement)
            .unwrap();
        assert_eq!(summary.nodes_created, 5);
        assert_eq!(summary.registry_size, 5);
        assert_eq!(summary.messages_sent, 0);
        assert_eq!(mesh.node_count(), 9);
        assert_eq!(reg.state(), RegistryState::EndGetFromRemote);
    }

    #[test]
    fn closure_policy_limits_refinement() {
        let mut mesh = two_triangles();
        let mut reg = NodeRegistry::default();
        // Only element 1's first edge.
        let mut policy = |e: EntityKey, _r: EntityRank, ord: usize| e.id == pid(1) && ord == 0;
        let summary = reg
            .refine_cycle(&mut mesh, &NoComm, &[NeededEntity::edge_midpoints()], &mut policy)
            .unwrap();
        assert_eq!(summary.nodes_created, 1);
    }

    #[test]
    fn failed_cycle_rolls_back_and_aborts() {
        let mut mesh = two_triangles();
        let mut reg = NodeRegistry::default();
        reg.state = RegistryState::StartRegister;
        let err = reg
            .refine_cycle(&mut mesh, &NoComm, &[NeededEntity::edge_midpoints()], &mut UniformRefinement)
            .unwrap_err();
        assert!(matches!(err, MeshError::StateViolation { .. }));
        assert_eq!(reg.state(), RegistryState::Aborted);
        assert_eq!(mesh.node_count(), 4);
        assert!(!mesh.in_modification());

        // Only `initialize` leaves the aborted state.
        assert!(reg.begin_registration().is_err());
        reg.initialize();
        reg.refine_cycle(&mut mesh, &NoComm, &[NeededEntity::edge_midpoints()], &mut UniformRefinement)
            .unwrap();
    }

    #[test]
    fn element_rank_needs_one_interior_node_each() {
        let mut mesh = two_triangles();
        let mut reg = NodeRegistry::default();
        let summary = reg
            .refine_cycle(
                &mut mesh,
                &NoComm,
                &[NeededEntity::new(EntityRank::Element, 1), NeededEntity::new(EntityRank::Face, 1)],
                &mut UniformRefinement,
            )
            .unwrap();
        // Triangles have no faces; one interior node per element.
        assert_eq!(summary.nodes_created, 2);
    }
}
