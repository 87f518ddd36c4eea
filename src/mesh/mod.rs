//! Collaborator traits: what the registry needs from the mesh it refines.
//!
//! The registry never owns mesh entities. It names them by [`EntityKey`] and asks the
//! mesh through these traits. [`in_memory::InMemoryMesh`] is a self-contained
//! implementation used by tests and benches.

pub mod in_memory;

pub use in_memory::InMemoryMesh;

use crate::mesh_error::MeshError;
use crate::topology::cell_type::CellType;
use crate::topology::point::{EntityKey, EntityProc, EntityRank, PointId};

/// Read access to the local partition of a distributed mesh.
pub trait MeshTopology {
    /// Rank of this process.
    fn parallel_rank(&self) -> usize;
    /// Number of processes sharing the mesh.
    fn parallel_size(&self) -> usize;

    /// All locally known elements (owned and ghost), in a stable order.
    fn elements(&self) -> Vec<EntityKey>;
    fn cell_type(&self, element: EntityKey) -> Option<CellType>;
    fn element_nodes(&self, element: EntityKey) -> Option<&[PointId]>;

    /// The entity exists in the local mesh.
    fn is_valid(&self, key: EntityKey) -> bool;
    fn owner_rank(&self, key: EntityKey) -> Option<usize>;

    /// Present locally but owned elsewhere.
    fn is_ghost(&self, key: EntityKey) -> bool {
        self.owner_rank(key)
            .is_some_and(|owner| owner != self.parallel_rank())
    }

    /// Number of elements that reference `node`.
    fn count_relations(&self, node: PointId) -> usize;

    /// Bounding node ids of the `ordinal`-th sub-entity of `rank` of `element`.
    ///
    /// When `rank` equals the element's own rank (a shell refining itself) the result
    /// is every vertex of the element.
    fn bounding_nodes(
        &self,
        element: EntityKey,
        rank: EntityRank,
        ordinal: usize,
    ) -> Result<Vec<PointId>, MeshError> {
        let cell_type = self
            .cell_type(element)
            .ok_or(MeshError::UnknownEntity(element))?;
        let nodes = self
            .element_nodes(element)
            .ok_or(MeshError::UnknownEntity(element))?;
        if nodes.len() != cell_type.vertex_count() {
            return Err(MeshError::ConnectivityMismatch {
                element,
                cell_type,
                expected: cell_type.vertex_count(),
                found: nodes.len(),
            });
        }
        if rank == element.rank {
            return Ok(nodes.to_vec());
        }
        let local = cell_type
            .sub_entity_nodes(rank, ordinal)
            .ok_or(MeshError::UnsupportedSubEntity {
                cell_type,
                rank,
                ordinal,
            })?;
        Ok(local.iter().map(|&i| nodes[i]).collect())
    }

    /// How many sub-entities of `rank` the element's topology has.
    fn sub_entity_count(&self, element: EntityKey, rank: EntityRank) -> Result<usize, MeshError> {
        if rank == EntityRank::Element || rank == element.rank {
            return Ok(1);
        }
        let cell_type = self
            .cell_type(element)
            .ok_or(MeshError::UnknownEntity(element))?;
        Ok(match rank {
            EntityRank::Edge => cell_type.edge_count(),
            EntityRank::Face => cell_type.face_count(),
            EntityRank::Node | EntityRank::Element => 0,
        })
    }
}

/// Entity creation and destruction, bracketed by a modification cycle.
pub trait EntityFactory {
    fn modification_begin(&mut self) -> Result<(), MeshError>;
    fn modification_end(&mut self) -> Result<(), MeshError>;
    /// Roll back every change since `modification_begin`.
    fn modification_abort(&mut self);
    fn in_modification(&self) -> bool;

    /// Create `count` new locally owned entities with globally unique ids.
    fn create_entities(&mut self, rank: EntityRank, count: usize)
    -> Result<Vec<PointId>, MeshError>;
    /// Make an entity with a known id exist locally, owned by `owner`.
    fn declare_entity(&mut self, key: EntityKey, owner: usize) -> Result<(), MeshError>;
    /// Returns whether the entity existed.
    fn destroy_entity(&mut self, key: EntityKey) -> Result<bool, MeshError>;
}

pub type GhostingId = usize;

/// Custom ghosting: replicate chosen entities on chosen ranks.
pub trait GhostingService {
    fn create_ghosting(&mut self, name: &str) -> GhostingId;
    /// `send` lists (entity, destination rank); `receive` lists (entity, owner rank)
    /// for entities this rank expects to get.
    fn change_ghosting(
        &mut self,
        ghosting: GhostingId,
        send: &[EntityProc],
        receive: &[EntityProc],
    ) -> Result<(), MeshError>;
}

/// Named node sets. The defaults describe a mesh without parts.
pub trait PartMembership {
    fn parts(&self, _node: PointId) -> Vec<String> {
        Vec::new()
    }
    fn is_member(&self, _node: PointId, _part: &str) -> bool {
        false
    }
    fn part_members(&self, _part: &str) -> Vec<PointId> {
        Vec::new()
    }
    fn add_to_part(&mut self, _node: PointId, _part: &str) -> Result<(), MeshError> {
        Ok(())
    }
    fn remove_from_part(&mut self, _node: PointId, _part: &str) -> Result<(), MeshError> {
        Ok(())
    }
}

/// Nodal coordinate field. The defaults describe a mesh without geometry.
pub trait NodeCoordinates {
    fn coordinates(&self, _node: PointId) -> Option<[f64; 3]> {
        None
    }
    fn set_coordinates(&mut self, _node: PointId, _xyz: [f64; 3]) -> Result<(), MeshError> {
        Ok(())
    }
}

/// Everything a refinement cycle touches.
pub trait RefinementMesh:
    MeshTopology + EntityFactory + GhostingService + PartMembership + NodeCoordinates
{
}

impl<T> RefinementMesh for T where
    T: MeshTopology + EntityFactory + GhostingService + PartMembership + NodeCoordinates
{
}
