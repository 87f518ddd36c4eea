//! Node creation for locally owned sub-entities and resolution of received ids.

use crate::mesh::{MeshTopology, RefinementMesh};
use crate::mesh_error::MeshError;
use crate::registry::NodeRegistry;
use crate::registry::key::SubEntityKey;
use crate::topology::point::{EntityKey, EntityRank};

impl NodeRegistry {
    /// Placeholders in records owned by a local, non-ghost element.
    pub fn local_size<M>(&self, mesh: &M) -> Result<usize, MeshError>
    where
        M: MeshTopology + ?Sized,
    {
        let mut n = 0;
        for (_, record) in self.map.iter() {
            let Some(owner) = record.owner.key() else {
                continue;
            };
            if !mesh.is_valid(owner) {
                return Err(MeshError::UnknownEntity(owner));
            }
            if !mesh.is_ghost(owner) {
                n += record.new_nodes.len();
            }
        }
        Ok(n)
    }

    /// Locally owned records with at least one unresolved placeholder, in key order.
    fn owned_unresolved<M>(&self, mesh: &M) -> Result<Vec<(SubEntityKey, usize)>, MeshError>
    where
        M: MeshTopology + ?Sized,
    {
        let mut out = Vec::new();
        for key in self.map.sorted_keys() {
            let record = self.map.lookup_or_empty(&key);
            let Some(owner) = record.owner.key() else {
                continue;
            };
            if !mesh.is_valid(owner) {
                return Err(MeshError::UnknownEntity(owner));
            }
            let unresolved = record.new_nodes.unresolved_count();
            if unresolved > 0 && !mesh.is_ghost(owner) {
                out.push((key, unresolved));
            }
        }
        Ok(out)
    }

    /// Create the nodes of every locally owned record that still lacks them.
    ///
    /// Already resolved placeholders are left alone, so running this twice creates
    /// nothing the second time. Returns the number of nodes created.
    pub fn create_new_nodes_in_parallel<M>(&mut self, mesh: &mut M) -> Result<usize, MeshError>
    where
        M: RefinementMesh + ?Sized,
    {
        let todo = self.owned_unresolved(&*mesh)?;
        let requested: usize = todo.iter().map(|&(_, n)| n).sum();
        log::debug!(
            "P[{}] create_new_nodes_in_parallel: {} local placeholders, {} to create",
            mesh.parallel_rank(),
            self.local_size(&*mesh)?,
            requested
        );

        let new_ids = if requested > 0 {
            mesh.create_entities(EntityRank::Node, requested)?
        } else {
            Vec::new()
        };
        if new_ids.len() != requested {
            return Err(MeshError::NodeCountMismatch {
                requested,
                returned: new_ids.len(),
            });
        }

        let mut fresh = new_ids.iter().copied();
        for (key, _) in &todo {
            let Some(record) = self.map.lookup_mut(key) else {
                continue;
            };
            for i in 0..record.new_nodes.len() {
                if record.new_nodes.ids()[i].is_none() {
                    if let Some(id) = fresh.next() {
                        record.new_nodes.resolve(i, id);
                    }
                }
            }
        }

        if let Some(part) = self.config.new_nodes_part.clone() {
            // Ghosts keep their membership; their owners reset it.
            let me = mesh.parallel_rank();
            for old in mesh.part_members(&part) {
                if mesh.owner_rank(EntityKey::node(old)) == Some(me) {
                    mesh.remove_from_part(old, &part)?;
                }
            }
            for &id in &new_ids {
                mesh.add_to_part(id, &part)?;
            }
        }
        self.stats.nodes_created += requested;
        Ok(requested)
    }

    /// Bind every known node id to its local entity. Ids that are still missing are
    /// an error under custom ghosting and are declared locally otherwise.
    pub fn set_all_received_node_data<M>(&mut self, mesh: &mut M) -> Result<(), MeshError>
    where
        M: RefinementMesh + ?Sized,
    {
        let me = mesh.parallel_rank();
        for key in self.map.sorted_keys() {
            let Some(record) = self.map.lookup_mut(&key) else {
                continue;
            };
            for i in 0..record.new_nodes.len() {
                let Some(id) = record.new_nodes.ids()[i] else {
                    continue;
                };
                if record.new_nodes.slots()[i].is_some() {
                    continue;
                }
                let node = EntityKey::node(id);
                if !mesh.is_valid(node) {
                    if self.config.use_custom_ghosting {
                        return Err(MeshError::GhostedNodeMissing(id));
                    }
                    let owner = self.received.get(&id).copied().unwrap_or(me);
                    mesh.declare_entity(node, owner)?;
                }
                record.new_nodes.attach(i);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::mesh::{EntityFactory, InMemoryMesh, PartMembership};
    use crate::registry::NeededEntity;
    use crate::registry::record::NewNodes;
    use crate::topology::cell_type::CellType;
    use crate::topology::point::PointId;

    fn pid(n: u64) -> PointId {
        PointId::new(n).unwrap()
    }

    fn tri_mesh() -> InMemoryMesh {
        let mut m = InMemoryMesh::serial().with_id_base(100);
        m.add_element(
            EntityKey::element(pid(1)),
            CellType::Triangle,
            &[pid(1), pid(2), pid(3)],
            0,
        )
        .unwrap();
        m
    }

    fn registered(m: &InMemoryMesh, cfg: RegistryConfig) -> NodeRegistry {
        let mut reg = NodeRegistry::new(cfg);
        reg.begin_registration().unwrap();
        for ord in 0..3 {
            reg.register_need_new_node(
                m,
                EntityKey::element(pid(1)),
                &NeededEntity::edge_midpoints(),
                ord,
                true,
            )
            .unwrap();
        }
        reg
    }

    #[test]
    fn second_creation_pass_creates_nothing() {
        let mut m = tri_mesh();
        let mut reg = registered(&m, RegistryConfig::default());
        m.modification_begin().unwrap();
        assert_eq!(reg.local_size(&m).unwrap(), 3);
        assert_eq!(reg.create_new_nodes_in_parallel(&mut m).unwrap(), 3);
        let ids: Vec<_> = reg.map().iter().flat_map(|(_, r)| r.new_nodes.resolved_ids()).collect();
        assert_eq!(reg.create_new_nodes_in_parallel(&mut m).unwrap(), 0);
        let again: Vec<_> = reg.map().iter().flat_map(|(_, r)| r.new_nodes.resolved_ids()).collect();
        assert_eq!(ids, again);
        assert_eq!(m.node_count(), 6);
    }

    #[test]
    fn new_nodes_part_tracks_latest_cycle() {
        let mut m = tri_mesh();
        let cfg = RegistryConfig {
            new_nodes_part: Some("new".into()),
            ..RegistryConfig::default()
        };
        let mut reg = registered(&m, cfg);
        m.modification_begin().unwrap();
        m.add_to_part(pid(1), "new").unwrap();
        reg.create_new_nodes_in_parallel(&mut m).unwrap();
        let members = m.part_members("new");
        assert_eq!(members.len(), 3);
        assert!(!members.contains(&pid(1)));
    }

    #[test]
    fn new_nodes_part_keeps_ghost_members() {
        let mut m = tri_mesh();
        m.add_node(pid(50), 1, None);
        let cfg = RegistryConfig {
            new_nodes_part: Some("new".into()),
            ..RegistryConfig::default()
        };
        let mut reg = registered(&m, cfg);
        m.modification_begin().unwrap();
        m.add_to_part(pid(50), "new").unwrap();
        m.add_to_part(pid(1), "new").unwrap();
        reg.create_new_nodes_in_parallel(&mut m).unwrap();
        let members = m.part_members("new");
        assert_eq!(members.len(), 4);
        assert!(members.contains(&pid(50)));
        assert!(!members.contains(&pid(1)));
    }

    #[test]
    fn creation_outside_modification_fails() {
        let mut m = tri_mesh();
        let mut reg = registered(&m, RegistryConfig::default());
        assert_eq!(
            reg.create_new_nodes_in_parallel(&mut m),
            Err(MeshError::NotInModification("create_entities"))
        );
    }

    #[test]
    fn missing_owner_is_reported() {
        let mut m = tri_mesh();
        let reg = registered(&m, RegistryConfig::default());
        m.remove_element(EntityKey::element(pid(1)));
        assert_eq!(
            reg.local_size(&m),
            Err(MeshError::UnknownEntity(EntityKey::element(pid(1))))
        );
    }

    #[test]
    fn received_ids_are_declared_without_custom_ghosting() {
        let mut m = tri_mesh();
        let cfg = RegistryConfig {
            use_custom_ghosting: false,
            ..RegistryConfig::default()
        };
        let mut reg = NodeRegistry::new(cfg);
        let key = SubEntityKey::build(&m, EntityKey::element(pid(1)), EntityRank::Edge, 0).unwrap();
        reg.map.get_or_create(key).new_nodes = NewNodes::from_ids([pid(555)]);
        reg.received.insert(pid(555), 4);
        m.modification_begin().unwrap();
        reg.set_all_received_node_data(&mut m).unwrap();
        assert_eq!(m.owner_rank(EntityKey::node(pid(555))), Some(4));
        assert_eq!(reg.lookup(&key).unwrap().new_nodes.slots()[0], Some(pid(555)));
    }

    #[test]
    fn missing_ghost_is_an_error_with_custom_ghosting() {
        let mut m = tri_mesh();
        let mut reg = NodeRegistry::default();
        let key = SubEntityKey::build(&m, EntityKey::element(pid(1)), EntityRank::Edge, 0).unwrap();
        reg.map.get_or_create(key).new_nodes = NewNodes::from_ids([pid(555)]);
        assert_eq!(
            reg.set_all_received_node_data(&mut m),
            Err(MeshError::GhostedNodeMissing(pid(555)))
        );
    }
}
