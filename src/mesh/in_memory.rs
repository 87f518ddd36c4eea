//! `InMemoryMesh`: one rank's partition of a distributed mesh, held in ordered maps.
//!
//! Elements carry a cell type, connectivity and an owning rank; nodes carry an owner,
//! optional coordinates and part names. Ids for new entities are drawn from a
//! per-rank arithmetic sequence so that ranks never collide without communicating.

use std::collections::{BTreeMap, BTreeSet};

use crate::mesh::{
    EntityFactory, GhostingId, GhostingService, MeshTopology, NodeCoordinates, PartMembership,
};
use crate::mesh_error::MeshError;
use crate::topology::cell_type::CellType;
use crate::topology::point::{EntityKey, EntityProc, EntityRank, PointId};

#[derive(Clone, Debug)]
struct ElementEntry {
    cell: CellType,
    nodes: Vec<PointId>,
    owner: usize,
}

#[derive(Clone, Debug, Default)]
struct NodeEntry {
    owner: usize,
    coords: Option<[f64; 3]>,
    parts: BTreeSet<String>,
}

#[derive(Clone, Debug)]
struct Snapshot {
    elements: BTreeMap<EntityKey, ElementEntry>,
    nodes: BTreeMap<PointId, NodeEntry>,
    next_serial: u64,
}

/// A ghosting change as applied to this rank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GhostingChange {
    pub ghosting: GhostingId,
    pub send: Vec<EntityProc>,
    pub receive: Vec<EntityProc>,
}

#[derive(Clone, Debug)]
pub struct InMemoryMesh {
    rank: usize,
    size: usize,
    elements: BTreeMap<EntityKey, ElementEntry>,
    nodes: BTreeMap<PointId, NodeEntry>,
    id_base: u64,
    next_serial: u64,
    snapshot: Option<Box<Snapshot>>,
    ghostings: Vec<String>,
    ghosting_log: Vec<GhostingChange>,
}

impl InMemoryMesh {
    /// Default first id handed out for new entities.
    pub const DEFAULT_ID_BASE: u64 = 1_000_000;

    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size: size.max(1),
            elements: BTreeMap::new(),
            nodes: BTreeMap::new(),
            id_base: Self::DEFAULT_ID_BASE,
            next_serial: 0,
            snapshot: None,
            ghostings: Vec::new(),
            ghosting_log: Vec::new(),
        }
    }

    /// Serial mesh (rank 0 of 1).
    pub fn serial() -> Self {
        Self::new(0, 1)
    }

    /// New ids start at `base` (clamped to at least 1).
    pub fn with_id_base(mut self, base: u64) -> Self {
        self.id_base = base.max(1);
        self
    }

    /// Add or update a node.
    pub fn add_node(&mut self, id: PointId, owner: usize, coords: Option<[f64; 3]>) {
        let entry = self.nodes.entry(id).or_default();
        entry.owner = owner;
        if coords.is_some() {
            entry.coords = coords;
        }
    }

    /// Add an element. Missing nodes are created with the element's owner.
    pub fn add_element(
        &mut self,
        key: EntityKey,
        cell: CellType,
        nodes: &[PointId],
        owner: usize,
    ) -> Result<(), MeshError> {
        if key.rank == EntityRank::Node {
            return Err(MeshError::UnsupportedSubEntity {
                cell_type: cell,
                rank: key.rank,
                ordinal: 0,
            });
        }
        if nodes.len() != cell.vertex_count() {
            return Err(MeshError::ConnectivityMismatch {
                element: key,
                cell_type: cell,
                expected: cell.vertex_count(),
                found: nodes.len(),
            });
        }
        if self.elements.contains_key(&key) {
            return Err(MeshError::DuplicateEntity(key));
        }
        for &n in nodes {
            self.nodes.entry(n).or_insert_with(|| NodeEntry {
                owner,
                ..NodeEntry::default()
            });
        }
        self.elements.insert(
            key,
            ElementEntry {
                cell,
                nodes: nodes.to_vec(),
                owner,
            },
        );
        Ok(())
    }

    /// Drop an element outright (no modification bracket needed).
    pub fn remove_element(&mut self, key: EntityKey) -> bool {
        self.elements.remove(&key).is_some()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = PointId> + '_ {
        self.nodes.keys().copied()
    }

    /// Every ghosting change applied so far, oldest first.
    pub fn ghosting_log(&self) -> &[GhostingChange] {
        &self.ghosting_log
    }

    fn require_modification(&self, op: &'static str) -> Result<(), MeshError> {
        if self.snapshot.is_some() {
            Ok(())
        } else {
            Err(MeshError::NotInModification(op))
        }
    }

    fn next_id(&mut self) -> PointId {
        loop {
            let raw = self.id_base + self.next_serial * self.size as u64 + self.rank as u64;
            self.next_serial += 1;
            if let Some(id) = PointId::from_wire(raw) {
                if !self.nodes.contains_key(&id) {
                    return id;
                }
            }
        }
    }
}

impl MeshTopology for InMemoryMesh {
    fn parallel_rank(&self) -> usize {
        self.rank
    }

    fn parallel_size(&self) -> usize {
        self.size
    }

    fn elements(&self) -> Vec<EntityKey> {
        self.elements.keys().copied().collect()
    }

    fn cell_type(&self, element: EntityKey) -> Option<CellType> {
        self.elements.get(&element).map(|e| e.cell)
    }

    fn element_nodes(&self, element: EntityKey) -> Option<&[PointId]> {
        self.elements.get(&element).map(|e| e.nodes.as_slice())
    }

    fn is_valid(&self, key: EntityKey) -> bool {
        match key.rank {
            EntityRank::Node => self.nodes.contains_key(&key.id),
            _ => self.elements.contains_key(&key),
        }
    }

    fn owner_rank(&self, key: EntityKey) -> Option<usize> {
        match key.rank {
            EntityRank::Node => self.nodes.get(&key.id).map(|n| n.owner),
            _ => self.elements.get(&key).map(|e| e.owner),
        }
    }

    fn count_relations(&self, node: PointId) -> usize {
        self.elements
            .values()
            .filter(|e| e.nodes.contains(&node))
            .count()
    }
}

impl EntityFactory for InMemoryMesh {
    fn modification_begin(&mut self) -> Result<(), MeshError> {
        if self.snapshot.is_none() {
            self.snapshot = Some(Box::new(Snapshot {
                elements: self.elements.clone(),
                nodes: self.nodes.clone(),
                next_serial: self.next_serial,
            }));
        }
        Ok(())
    }

    fn modification_end(&mut self) -> Result<(), MeshError> {
        self.require_modification("modification_end")?;
        self.snapshot = None;
        Ok(())
    }

    fn modification_abort(&mut self) {
        if let Some(snap) = self.snapshot.take() {
            let Snapshot {
                elements,
                nodes,
                next_serial,
            } = *snap;
            self.elements = elements;
            self.nodes = nodes;
            self.next_serial = next_serial;
        }
    }

    fn in_modification(&self) -> bool {
        self.snapshot.is_some()
    }

    fn create_entities(
        &mut self,
        rank: EntityRank,
        count: usize,
    ) -> Result<Vec<PointId>, MeshError> {
        self.require_modification("create_entities")?;
        if rank != EntityRank::Node {
            return Err(MeshError::UnsupportedSubEntity {
                cell_type: CellType::Vertex,
                rank,
                ordinal: 0,
            });
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let id = self.next_id();
            self.nodes.insert(
                id,
                NodeEntry {
                    owner: self.rank,
                    ..NodeEntry::default()
                },
            );
            out.push(id);
        }
        Ok(out)
    }

    fn declare_entity(&mut self, key: EntityKey, owner: usize) -> Result<(), MeshError> {
        self.require_modification("declare_entity")?;
        if key.rank != EntityRank::Node {
            return Err(MeshError::UnsupportedSubEntity {
                cell_type: CellType::Vertex,
                rank: key.rank,
                ordinal: 0,
            });
        }
        if self.nodes.contains_key(&key.id) {
            return Err(MeshError::DuplicateEntity(key));
        }
        self.nodes.insert(
            key.id,
            NodeEntry {
                owner,
                ..NodeEntry::default()
            },
        );
        Ok(())
    }

    fn destroy_entity(&mut self, key: EntityKey) -> Result<bool, MeshError> {
        self.require_modification("destroy_entity")?;
        Ok(match key.rank {
            EntityRank::Node => self.nodes.remove(&key.id).is_some(),
            _ => self.elements.remove(&key).is_some(),
        })
    }
}

impl GhostingService for InMemoryMesh {
    fn create_ghosting(&mut self, name: &str) -> GhostingId {
        match self.ghostings.iter().position(|g| g == name) {
            Some(id) => id,
            None => {
                self.ghostings.push(name.to_owned());
                self.ghostings.len() - 1
            }
        }
    }

    fn change_ghosting(
        &mut self,
        ghosting: GhostingId,
        send: &[EntityProc],
        receive: &[EntityProc],
    ) -> Result<(), MeshError> {
        for &(key, owner) in receive {
            if key.rank != EntityRank::Node {
                return Err(MeshError::UnknownEntity(key));
            }
            self.nodes.entry(key.id).or_insert_with(|| NodeEntry {
                owner,
                ..NodeEntry::default()
            });
        }
        self.ghosting_log.push(GhostingChange {
            ghosting,
            send: send.to_vec(),
            receive: receive.to_vec(),
        });
        Ok(())
    }
}

impl PartMembership for InMemoryMesh {
    fn parts(&self, node: PointId) -> Vec<String> {
        self.nodes
            .get(&node)
            .map(|n| n.parts.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn is_member(&self, node: PointId, part: &str) -> bool {
        self.nodes.get(&node).is_some_and(|n| n.parts.contains(part))
    }

    fn part_members(&self, part: &str) -> Vec<PointId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.parts.contains(part))
            .map(|(&id, _)| id)
            .collect()
    }

    fn add_to_part(&mut self, node: PointId, part: &str) -> Result<(), MeshError> {
        let entry = self
            .nodes
            .get_mut(&node)
            .ok_or(MeshError::UnknownEntity(EntityKey::node(node)))?;
        entry.parts.insert(part.to_owned());
        Ok(())
    }

    fn remove_from_part(&mut self, node: PointId, part: &str) -> Result<(), MeshError> {
        if let Some(entry) = self.nodes.get_mut(&node) {
            entry.parts.remove(part);
        }
        Ok(())
    }
}

impl NodeCoordinates for InMemoryMesh {
    fn coordinates(&self, node: PointId) -> Option<[f64; 3]> {
        self.nodes.get(&node).and_then(|n| n.coords)
    }

    fn set_coordinates(&mut self, node: PointId, xyz: [f64; 3]) -> Result<(), MeshError> {
        let entry = self
            .nodes
            .get_mut(&node)
            .ok_or(MeshError::UnknownEntity(EntityKey::node(node)))?;
        entry.coords = Some(xyz);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: u64) -> PointId {
        PointId::new(n).unwrap()
    }

    fn quad_mesh() -> InMemoryMesh {
        let mut m = InMemoryMesh::serial();
        m.add_element(
            EntityKey::element(pid(1)),
            CellType::Quadrilateral,
            &[pid(1), pid(2), pid(3), pid(4)],
            0,
        )
        .unwrap();
        m
    }

    #[test]
    fn bounding_nodes_follow_tables() {
        let m = quad_mesh();
        let e = EntityKey::element(pid(1));
        assert_eq!(
            m.bounding_nodes(e, EntityRank::Edge, 3).unwrap(),
            vec![pid(4), pid(1)]
        );
        assert_eq!(m.bounding_nodes(e, EntityRank::Element, 0).unwrap().len(), 4);
        assert!(matches!(
            m.bounding_nodes(e, EntityRank::Face, 0),
            Err(MeshError::UnsupportedSubEntity { .. })
        ));
        assert_eq!(m.sub_entity_count(e, EntityRank::Face).unwrap(), 0);
        assert_eq!(m.sub_entity_count(e, EntityRank::Edge).unwrap(), 4);
    }

    #[test]
    fn bad_connectivity_is_rejected() {
        let mut m = InMemoryMesh::serial();
        let err = m
            .add_element(EntityKey::element(pid(1)), CellType::Triangle, &[pid(1)], 0)
            .unwrap_err();
        assert!(matches!(err, MeshError::ConnectivityMismatch { expected: 3, .. }));
    }

    #[test]
    fn creation_needs_a_modification_bracket() {
        let mut m = quad_mesh();
        assert_eq!(
            m.create_entities(EntityRank::Node, 1),
            Err(MeshError::NotInModification("create_entities"))
        );
        m.modification_begin().unwrap();
        let ids = m.create_entities(EntityRank::Node, 2).unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        m.modification_end().unwrap();
        assert_eq!(m.node_count(), 6);
    }

    #[test]
    fn abort_rolls_back() {
        let mut m = quad_mesh();
        m.modification_begin().unwrap();
        let ids = m.create_entities(EntityRank::Node, 1).unwrap();
        m.modification_abort();
        assert!(!m.is_valid(EntityKey::node(ids[0])));
        assert!(!m.in_modification());
    }

    #[test]
    fn ranks_draw_disjoint_ids() {
        let mut a = InMemoryMesh::new(0, 2);
        let mut b = InMemoryMesh::new(1, 2);
        a.modification_begin().unwrap();
        b.modification_begin().unwrap();
        let ia = a.create_entities(EntityRank::Node, 3).unwrap();
        let ib = b.create_entities(EntityRank::Node, 3).unwrap();
        assert!(ia.iter().all(|x| !ib.contains(x)));
    }

    #[test]
    fn ghosting_declares_received_nodes() {
        let mut m = quad_mesh();
        let g = m.create_ghosting("new_nodes");
        assert_eq!(m.create_ghosting("new_nodes"), g);
        m.change_ghosting(g, &[], &[(EntityKey::node(pid(77)), 3)])
            .unwrap();
        assert_eq!(m.owner_rank(EntityKey::node(pid(77))), Some(3));
        assert!(m.is_ghost(EntityKey::node(pid(77))));
        assert_eq!(m.ghosting_log().len(), 1);
    }

    #[test]
    fn parts_and_relations() {
        let mut m = quad_mesh();
        m.add_to_part(pid(1), "wall").unwrap();
        assert!(m.is_member(pid(1), "wall"));
        assert_eq!(m.part_members("wall"), vec![pid(1)]);
        m.remove_from_part(pid(1), "wall").unwrap();
        assert!(m.parts(pid(1)).is_empty());
        assert_eq!(m.count_relations(pid(2)), 1);
        assert_eq!(m.count_relations(pid(99)), 0);
    }
}
