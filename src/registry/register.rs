//! Registration phase: collect needs, settle ownership, create owned nodes.

use crate::debug_invariants::DebugInvariants;
use crate::mesh::{MeshTopology, RefinementMesh};
use crate::mesh_error::MeshError;
use crate::registry::key::SubEntityKey;
use crate::registry::state::RegistryState;
use crate::registry::{NeededEntity, NodeRegistry};
use crate::topology::point::{EntityKey, EntityRank};

impl NodeRegistry {
    /// Open a registration phase. Allowed from a fresh registry or after a completed
    /// cycle.
    pub fn begin_registration(&mut self) -> Result<(), MeshError> {
        self.state
            .advance("begin_registration", RegistryState::StartRegister)?;
        self.pending_ghosts.clear();
        self.received.clear();
        self.failure = None;
        self.stats = Default::default();
        log::debug!("begin_registration: {} records carried over", self.map.len());
        Ok(())
    }

    /// Record that `element` wants `needed.new_nodes` nodes on its `ordinal`-th
    /// sub-entity of rank `needed.rank`. Returns whether `element` now owns the
    /// sub-entity.
    pub fn register_need_new_node<M>(
        &mut self,
        mesh: &M,
        element: EntityKey,
        needed: &NeededEntity,
        ordinal: usize,
        need_nodes: bool,
    ) -> Result<bool, MeshError>
    where
        M: MeshTopology + ?Sized,
    {
        self.state
            .require("register_need_new_node", RegistryState::StartRegister)?;
        if !mesh.is_valid(element) {
            return Err(MeshError::UnknownEntity(element));
        }
        let key = SubEntityKey::build(mesh, element, needed.rank, ordinal)?;
        let owner = self
            .map
            .insert_or_update(element, key, ordinal, needed, need_nodes);
        log::trace!(
            "P[{}] register {key} from {element} #{ordinal} need={need_nodes} owner={owner}",
            mesh.parallel_rank()
        );
        Ok(owner)
    }

    /// Close registration: drop unanimously unneeded records, open the mesh
    /// modification and create the nodes of locally owned records.
    pub fn end_registration<M>(&mut self, mesh: &mut M) -> Result<(), MeshError>
    where
        M: RefinementMesh + ?Sized,
    {
        self.state
            .require("end_registration", RegistryState::StartRegister)?;
        let dropped = self.remove_unmarked_sub_dim_entities(&*mesh);
        mesh.modification_begin()?;
        let created = self.create_new_nodes_in_parallel(mesh)?;
        self.map.debug_assert_invariants();
        if self.config.check_invariants {
            self.check_db(&*mesh)?;
        }
        self.state
            .advance("end_registration", RegistryState::EndRegister)?;
        log::debug!(
            "P[{}] end_registration: {} records, {} dropped as unneeded, {} nodes created",
            mesh.parallel_rank(),
            self.map.len(),
            dropped,
            created
        );
        Ok(())
    }

    /// Clear the placeholders of records every visitor marked "not needed", unless one
    /// of their nodes is still referenced by an element. Returns how many records were
    /// cleared.
    pub fn remove_unmarked_sub_dim_entities<M>(&mut self, mesh: &M) -> usize
    where
        M: MeshTopology + ?Sized,
    {
        let mut cleared = 0;
        for (_, record) in self.map.iter_mut() {
            if !record.mark.is_only_not_needed() || record.new_nodes.is_empty() {
                continue;
            }
            let in_use = record.new_nodes.resolved_ids().any(|id| {
                mesh.is_valid(EntityKey::new(EntityRank::Node, id)) && mesh.count_relations(id) > 0
            });
            if !in_use {
                record.new_nodes.clear();
                cleared += 1;
            }
        }
        cleared
    }

    /// Re-point an existing record at `element` if it wins ownership (or the record
    /// is orphaned). Used when elements are replaced during unrefinement.
    pub fn replace_element_ownership<M>(
        &mut self,
        mesh: &M,
        element: EntityKey,
        needed: &NeededEntity,
        ordinal: usize,
    ) -> Result<bool, MeshError>
    where
        M: MeshTopology + ?Sized,
    {
        let key = SubEntityKey::build(mesh, element, needed.rank, ordinal)?;
        Ok(self.map.replace_element_ownership(element, &key, ordinal))
    }
}
