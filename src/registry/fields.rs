//! Field and part data for new nodes: centroid coordinates and part inheritance.

use std::collections::BTreeSet;

use crate::mesh::{MeshTopology, RefinementMesh};
use crate::mesh_error::MeshError;
use crate::registry::key::SubEntityKey;
use crate::registry::record::RegistryRecord;
use crate::registry::{NeededEntity, NodeRegistry};
use crate::topology::point::{EntityKey, PointId};

impl NodeRegistry {
    /// Place every single new node at the average of the nodes bounding its
    /// sub-entity. Returns how many nodes were moved.
    pub fn make_centroid<M>(&self, mesh: &mut M) -> Result<usize, MeshError>
    where
        M: RefinementMesh + ?Sized,
    {
        let mut moved = 0;
        for key in self.map.sorted_keys() {
            let record = self.map.lookup_or_empty(&key);
            if set_centroid(mesh, &key, record)? {
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// [`make_centroid`](Self::make_centroid) for one sub-entity of `element`.
    pub fn make_centroid_coords<M>(
        &self,
        mesh: &mut M,
        element: EntityKey,
        needed: &NeededEntity,
        ordinal: usize,
    ) -> Result<bool, MeshError>
    where
        M: RefinementMesh + ?Sized,
    {
        let key = SubEntityKey::build(&*mesh, element, needed.rank, ordinal)?;
        match self.map.lookup(&key) {
            Some(record) => set_centroid(mesh, &key, record),
            None if self.config.allow_empty_sub_dims => Ok(false),
            None => Err(MeshError::MissingRecord {
                element,
                rank: needed.rank,
                ordinal,
            }),
        }
    }

    /// Put each locally owned new node into every part that contains all nodes
    /// bounding its sub-entity. Returns the number of memberships added.
    pub fn add_to_existing_parts<M>(&self, mesh: &mut M) -> Result<usize, MeshError>
    where
        M: RefinementMesh + ?Sized,
    {
        let me = mesh.parallel_rank();
        let mut added = 0;
        for key in self.map.sorted_keys() {
            let record = self.map.lookup_or_empty(&key);
            let owned: Vec<PointId> = record
                .new_nodes
                .slots()
                .iter()
                .flatten()
                .copied()
                .filter(|&n| mesh.owner_rank(EntityKey::node(n)) == Some(me))
                .collect();
            if owned.is_empty() {
                continue;
            }
            let Some(bounding) = bounding_nodes(&*mesh, &key) else {
                continue;
            };
            let mut common: Option<BTreeSet<String>> = None;
            for n in &bounding {
                let parts: BTreeSet<String> = mesh.parts(*n).into_iter().collect();
                common = Some(match common {
                    None => parts,
                    Some(acc) => acc.intersection(&parts).cloned().collect(),
                });
            }
            let mut common = common.unwrap_or_default();
            if let Some(new_part) = &self.config.new_nodes_part {
                common.remove(new_part);
            }
            for node in owned {
                for part in &common {
                    if !mesh.is_member(node, part) {
                        mesh.add_to_part(node, part)?;
                        added += 1;
                    }
                }
            }
        }
        Ok(added)
    }
}

/// Nodes bounding `key`: its members, or the element's nodes for whole-element keys.
fn bounding_nodes<M>(mesh: &M, key: &SubEntityKey) -> Option<Vec<PointId>>
where
    M: MeshTopology + ?Sized,
{
    match key.as_element() {
        Some(element) => mesh.element_nodes(element).map(<[PointId]>::to_vec),
        None => Some(key.iter().collect()),
    }
}

fn set_centroid<M>(mesh: &mut M, key: &SubEntityKey, record: &RegistryRecord) -> Result<bool, MeshError>
where
    M: RefinementMesh + ?Sized,
{
    let [Some(node)] = record.new_nodes.slots() else {
        return Ok(false);
    };
    let Some(bounding) = bounding_nodes(&*mesh, key) else {
        return Ok(false);
    };
    let mut sum = [0.0; 3];
    for n in &bounding {
        let Some(xyz) = mesh.coordinates(*n) else {
            return Ok(false);
        };
        for (s, x) in sum.iter_mut().zip(xyz) {
            *s += x;
        }
    }
    let inv = 1.0 / bounding.len() as f64;
    mesh.set_coordinates(*node, sum.map(|s| s * inv))?;
    Ok(true)
}
