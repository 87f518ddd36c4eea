//! Top-level module for mesh topology vocabulary.
//!
//! This module provides the identity types shared by every other subsystem
//! (`PointId`, `EntityRank`, `EntityKey`) and the per-cell-type lookup tables that
//! say which local vertices bound each edge and face.

pub mod cell_type;
pub mod point;

pub use cell_type::CellType;
pub use point::{EntityKey, EntityProc, EntityRank, PointId};
