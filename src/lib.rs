#![cfg_attr(docsrs, feature(doc_cfg))]
//! # sieve-node-registry
//!
//! A registry of the new nodes created on the sub-dimensional entities (edges, faces,
//! element interiors) of a distributed mesh during refinement.
//!
//! Elements that share an edge or face, on the same rank or on different ranks, all
//! ask for nodes on it. The registry names each sub-entity by the sorted set of its
//! bounding node ids ([`registry::SubEntityKey`]), elects one owning element with a
//! rule every rank evaluates identically, creates the nodes once on the owner's rank
//! and ships their ids to the ranks that hold ghosts of the sharing elements.
//!
//! ## Features
//! - Canonical sub-entity keys and deterministic ownership
//! - Two-pass (size, then pack) message assembly with an explicit little-endian wire
//!   format
//! - Pluggable communication backends (serial, threads, MPI)
//! - Collective failure agreement: a failing rank never leaves its peers blocked
//! - Cleanup helpers for coarsening and element deletion between cycles
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! sieve-node-registry = "0.3"
//! # features = ["mpi-support"]
//! ```
//!
//! ```
//! use sieve_node_registry::prelude::*;
//!
//! let mut mesh = InMemoryMesh::serial();
//! let [a, b, c] = [1, 2, 3].map(|i| PointId::new(i).unwrap());
//! mesh.add_element(EntityKey::element(PointId::new(10).unwrap()), CellType::Triangle, &[a, b, c], 0)
//!     .unwrap();
//!
//! let mut registry = NodeRegistry::default();
//! let summary = registry
//!     .refine_cycle(&mut mesh, &NoComm, &[NeededEntity::edge_midpoints()], &mut UniformRefinement)
//!     .unwrap();
//! assert_eq!(summary.nodes_created, 3);
//! ```

pub mod algs;
pub mod config;
pub mod debug_invariants;
pub mod mesh;
pub mod mesh_error;
pub mod registry;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::config::{NeededEntity, RegistryConfig};
    pub use crate::mesh::{
        EntityFactory, GhostingService, InMemoryMesh, MeshTopology, NodeCoordinates,
        PartMembership, RefinementMesh,
    };
    pub use crate::mesh_error::MeshError;
    pub use crate::registry::{
        CycleSummary, MarkPolicy, NodeRegistry, RegistryState, SubEntityKey, UniformRefinement,
    };
    pub use crate::topology::cell_type::CellType;
    pub use crate::topology::point::{EntityKey, EntityProc, EntityRank, PointId};
}
