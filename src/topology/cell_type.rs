//! Cell type metadata and sub-entity lookup tables.
//!
//! Local vertex ordinals follow the usual exodus/shards conventions: for each cell type,
//! `edge_nodes(i)` and `face_nodes(i)` list the local vertex indices that bound the
//! `i`-th edge or face. Face orderings are outward-oriented; the registry only needs the
//! vertex *sets*, so orientation is informational.

use crate::topology::point::EntityRank;

/// Common cell types for mesh elements.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum CellType {
    /// 0D vertex.
    Vertex,
    /// 1D segment/edge.
    Segment,
    /// 2D simplex (triangle).
    Triangle,
    /// 2D tensor-product cell (quad).
    Quadrilateral,
    /// 3D simplex (tet).
    Tetrahedron,
    /// 3D tensor-product cell (hex).
    Hexahedron,
    /// 3D wedge/prism.
    Prism,
    /// 3D pyramid.
    Pyramid,
}

impl Default for CellType {
    fn default() -> Self {
        CellType::Vertex
    }
}

const SEGMENT_EDGES: [&[usize]; 1] = [&[0, 1]];
const TRIANGLE_EDGES: [&[usize]; 3] = [&[0, 1], &[1, 2], &[2, 0]];
const QUAD_EDGES: [&[usize]; 4] = [&[0, 1], &[1, 2], &[2, 3], &[3, 0]];
const TET_EDGES: [&[usize]; 6] = [&[0, 1], &[1, 2], &[2, 0], &[0, 3], &[1, 3], &[2, 3]];
const TET_FACES: [&[usize]; 4] = [&[0, 1, 3], &[1, 2, 3], &[0, 3, 2], &[0, 2, 1]];
const HEX_EDGES: [&[usize]; 12] = [
    &[0, 1],
    &[1, 2],
    &[2, 3],
    &[3, 0],
    &[4, 5],
    &[5, 6],
    &[6, 7],
    &[7, 4],
    &[0, 4],
    &[1, 5],
    &[2, 6],
    &[3, 7],
];
const HEX_FACES: [&[usize]; 6] = [
    &[0, 1, 5, 4],
    &[1, 2, 6, 5],
    &[2, 3, 7, 6],
    &[0, 4, 7, 3],
    &[0, 3, 2, 1],
    &[4, 5, 6, 7],
];
const PRISM_EDGES: [&[usize]; 9] = [
    &[0, 1],
    &[1, 2],
    &[2, 0],
    &[3, 4],
    &[4, 5],
    &[5, 3],
    &[0, 3],
    &[1, 4],
    &[2, 5],
];
const PRISM_FACES: [&[usize]; 5] = [
    &[0, 1, 4, 3],
    &[1, 2, 5, 4],
    &[0, 3, 5, 2],
    &[0, 2, 1],
    &[3, 4, 5],
];
const PYRAMID_EDGES: [&[usize]; 8] = [
    &[0, 1],
    &[1, 2],
    &[2, 3],
    &[3, 0],
    &[0, 4],
    &[1, 4],
    &[2, 4],
    &[3, 4],
];
const PYRAMID_FACES: [&[usize]; 5] = [
    &[0, 1, 4],
    &[1, 2, 4],
    &[2, 3, 4],
    &[0, 4, 3],
    &[0, 3, 2, 1],
];

impl CellType {
    /// Returns the topological dimension of the cell.
    pub fn dimension(self) -> u8 {
        match self {
            CellType::Vertex => 0,
            CellType::Segment => 1,
            CellType::Triangle | CellType::Quadrilateral => 2,
            CellType::Tetrahedron | CellType::Hexahedron | CellType::Prism | CellType::Pyramid => 3,
        }
    }

    /// Number of vertices in the cell's connectivity.
    pub fn vertex_count(self) -> usize {
        match self {
            CellType::Vertex => 1,
            CellType::Segment => 2,
            CellType::Triangle => 3,
            CellType::Quadrilateral | CellType::Tetrahedron => 4,
            CellType::Pyramid => 5,
            CellType::Prism => 6,
            CellType::Hexahedron => 8,
        }
    }

    fn edge_table(self) -> &'static [&'static [usize]] {
        match self {
            CellType::Vertex => &[],
            CellType::Segment => &SEGMENT_EDGES,
            CellType::Triangle => &TRIANGLE_EDGES,
            CellType::Quadrilateral => &QUAD_EDGES,
            CellType::Tetrahedron => &TET_EDGES,
            CellType::Hexahedron => &HEX_EDGES,
            CellType::Prism => &PRISM_EDGES,
            CellType::Pyramid => &PYRAMID_EDGES,
        }
    }

    /// Faces exist only for 3D cells; a 2D cell's sides are its edges.
    fn face_table(self) -> &'static [&'static [usize]] {
        match self {
            CellType::Tetrahedron => &TET_FACES,
            CellType::Hexahedron => &HEX_FACES,
            CellType::Prism => &PRISM_FACES,
            CellType::Pyramid => &PYRAMID_FACES,
            _ => &[],
        }
    }

    pub fn edge_count(self) -> usize {
        self.edge_table().len()
    }

    pub fn face_count(self) -> usize {
        self.face_table().len()
    }

    /// Local vertex ordinals of the `ordinal`-th edge.
    pub fn edge_nodes(self, ordinal: usize) -> Option<&'static [usize]> {
        self.edge_table().get(ordinal).copied()
    }

    /// Local vertex ordinals of the `ordinal`-th face.
    pub fn face_nodes(self, ordinal: usize) -> Option<&'static [usize]> {
        self.face_table().get(ordinal).copied()
    }

    /// Local vertex ordinals of the `ordinal`-th sub-entity of `rank`, for the ranks that
    /// have a lookup table (edges and faces).
    pub fn sub_entity_nodes(self, rank: EntityRank, ordinal: usize) -> Option<&'static [usize]> {
        match rank {
            EntityRank::Edge => self.edge_nodes(ordinal),
            EntityRank::Face => self.face_nodes(ordinal),
            EntityRank::Node | EntityRank::Element => None,
        }
    }
}
