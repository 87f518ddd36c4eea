#![allow(dead_code)]
use sieve_node_registry::prelude::*;

pub fn pid(u: u64) -> PointId {
    PointId::new(u).unwrap()
}

pub fn elem(u: u64) -> EntityKey {
    EntityKey::element(pid(u))
}

/// Triangles 1 = [1,2,3] and 2 = [2,4,3] sharing edge {2,3}, owned by
/// `owners.0` and `owners.1`, seen from `rank` of `size`.
pub fn two_triangles(rank: usize, size: usize, owners: (usize, usize)) -> InMemoryMesh {
    let mut m = InMemoryMesh::new(rank, size);
    let coords = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
    for (i, [x, y]) in coords.into_iter().enumerate() {
        let id = pid(i as u64 + 1);
        let owner = if id == pid(1) { owners.0 } else if id == pid(4) { owners.1 } else { owners.0.min(owners.1) };
        m.add_node(id, owner, Some([x, y, 0.0]));
    }
    m.add_element(elem(1), CellType::Triangle, &[pid(1), pid(2), pid(3)], owners.0)
        .unwrap();
    m.add_element(elem(2), CellType::Triangle, &[pid(2), pid(4), pid(3)], owners.1)
        .unwrap();
    m
}

/// A `nx` by `ny` grid of unit quads on one rank. Node `(i, j)` has id
/// `1 + i + j * (nx + 1)`, element `(i, j)` has id `1 + i + j * nx`.
pub fn quad_grid(nx: u64, ny: u64) -> InMemoryMesh {
    let mut m = InMemoryMesh::serial();
    let node = |i: u64, j: u64| pid(1 + i + j * (nx + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            m.add_node(node(i, j), 0, Some([i as f64, j as f64, 0.0]));
        }
    }
    for j in 0..ny {
        for i in 0..nx {
            m.add_element(
                elem(1 + i + j * nx),
                CellType::Quadrilateral,
                &[node(i, j), node(i + 1, j), node(i + 1, j + 1), node(i, j + 1)],
                0,
            )
            .unwrap();
        }
    }
    m
}

/// Edge key of the `ord`-th edge of element `e`.
pub fn edge_key(mesh: &InMemoryMesh, e: u64, ord: usize) -> SubEntityKey {
    SubEntityKey::build(mesh, elem(e), EntityRank::Edge, ord).unwrap()
}

/// (key, resolved ids) of every record, in key order.
pub fn identities(reg: &NodeRegistry) -> Vec<(SubEntityKey, Vec<PointId>)> {
    reg.map()
        .sorted_keys()
        .into_iter()
        .map(|k| {
            let ids = reg.lookup(&k).unwrap().new_nodes.resolved_ids().collect();
            (k, ids)
        })
        .collect()
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
