//! Cleanup between cycles: forget deleted owners and nodes, drop dead records.

use std::collections::HashSet;

use crate::debug_invariants::DebugInvariants;
use crate::mesh::MeshTopology;
use crate::mesh_error::MeshError;
use crate::registry::map::RegistryMap;
use crate::registry::state::RegistryState;
use crate::registry::NodeRegistry;
use crate::topology::point::{EntityKey, PointId};

impl NodeRegistry {
    /// Forget everything and return to [`RegistryState::None`].
    pub fn initialize(&mut self) {
        self.map.clear();
        self.state = RegistryState::None;
        self.pending_ghosts.clear();
        self.received.clear();
        self.failure = None;
        self.stats = Default::default();
    }

    /// Orphan every record owned by one of `deleted` (owner id cleared, rank kept).
    /// With `resize`, orphaned records also lose their placeholders. Nothing is erased.
    pub fn clear_element_owner_data(&mut self, deleted: &HashSet<EntityKey>, resize: bool) {
        for (_, record) in self.map.iter_mut() {
            match record.owner.key() {
                Some(owner) if deleted.contains(&owner) => {
                    record.owner.id = None;
                    if resize {
                        record.new_nodes.clear();
                    }
                }
                Some(_) => {}
                None => {
                    if resize {
                        record.new_nodes.clear();
                    }
                }
            }
        }
    }

    /// Like [`clear_element_owner_data`](Self::clear_element_owner_data) for owners
    /// that no longer exist in the mesh.
    pub fn clear_element_owner_data_phase_2<M>(&mut self, mesh: &M, resize: bool)
    where
        M: MeshTopology + ?Sized,
    {
        for (_, record) in self.map.iter_mut() {
            let orphan = match record.owner.key() {
                Some(owner) if !mesh.is_valid(owner) => {
                    record.owner.id = None;
                    true
                }
                Some(_) => false,
                None => true,
            };
            if orphan && resize {
                record.new_nodes.clear();
            }
        }
    }

    /// Erase every record that references a deleted node. Records whose deleted node is
    /// in `kept_nodes` are copied to `to_save` first. Returns how many were erased.
    pub fn clean_deleted_nodes(
        &mut self,
        deleted_nodes: &HashSet<PointId>,
        kept_nodes: &HashSet<PointId>,
        to_save: &mut RegistryMap,
    ) -> usize {
        let mut not_found: HashSet<PointId> = deleted_nodes.clone();
        let mut erased = 0;
        self.map.retain(|key, record| {
            let hit = record
                .new_nodes
                .resolved_ids()
                .find(|id| deleted_nodes.contains(id));
            match hit {
                Some(node) => {
                    if kept_nodes.contains(&node) {
                        to_save.insert(*key, record.clone());
                    }
                    not_found.remove(&node);
                    erased += 1;
                    false
                }
                None => true,
            }
        });
        if !not_found.is_empty() {
            log::warn!(
                "clean_deleted_nodes: {} deleted node(s) not found in the registry",
                not_found.len()
            );
        }
        erased
    }

    /// Drop placeholder nodes that are gone: those in `nodes_to_be_deleted`, or when no
    /// set is given, those no longer valid in the mesh. Placeholders without a local
    /// node are dropped as well. Records left without nodes are erased.
    pub fn clear_dangling_nodes<M>(
        &mut self,
        mesh: &M,
        nodes_to_be_deleted: Option<&HashSet<PointId>>,
    ) -> usize
    where
        M: MeshTopology + ?Sized,
    {
        let mut dropped = 0;
        self.map.retain(|_, record| {
            dropped += record.new_nodes.retain_ids(|id| match id {
                Some(id) if mesh.is_valid(EntityKey::node(id)) => match nodes_to_be_deleted {
                    Some(set) => !set.contains(&id),
                    None => true,
                },
                _ => false,
            });
            !record.new_nodes.is_empty()
        });
        dropped
    }

    /// Erase records that are orphaned or owned by one of `elements`. Every surviving
    /// owner must still exist in the mesh.
    pub fn clear_elements_to_be_deleted<M>(
        &mut self,
        mesh: &M,
        elements: &HashSet<EntityKey>,
    ) -> Result<usize, MeshError>
    where
        M: MeshTopology + ?Sized,
    {
        let before = self.map.len();
        self.map.retain(|_, record| match record.owner.key() {
            None => false,
            Some(owner) => !elements.contains(&owner),
        });
        for (_, record) in self.map.iter() {
            if let Some(owner) = record.owner.key() {
                if !mesh.is_valid(owner) {
                    return Err(MeshError::UnknownEntity(owner));
                }
            }
        }
        Ok(before - self.map.len())
    }

    /// Consistency scan: placeholder lock-step, owners present in the mesh, and no
    /// orphaned record still waiting for nodes.
    pub fn check_db<M>(&self, mesh: &M) -> Result<(), MeshError>
    where
        M: MeshTopology + ?Sized,
    {
        self.map.validate_invariants()?;
        for (key, record) in self.map.iter() {
            match record.owner.key() {
                Some(owner) if !mesh.is_valid(owner) => {
                    return Err(MeshError::UnknownEntity(owner));
                }
                Some(_) => {}
                None => {
                    if let Some(index) = record.new_nodes.ids().iter().position(Option::is_none) {
                        return Err(MeshError::UnresolvedPlaceholder {
                            key: key.to_string(),
                            index,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
