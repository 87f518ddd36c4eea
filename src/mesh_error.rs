//! MeshError: unified error type for the node registry public APIs.
//!
//! Every fallible operation in this crate returns `Result<_, MeshError>`. Variants
//! fall into three groups:
//! - contract violations (state machine misuse, bad topology requests, broken
//!   ownership invariants), which abort the current refinement cycle;
//! - communication failures, surfaced identically on every rank through a
//!   collective failure reduction;
//! - wire decoding errors for reconciliation messages.
//!
//! Expected absence (no record for a sub-entity, an unresolved placeholder) is never
//! an error; those APIs return `Option`.

use crate::registry::state::RegistryState;
use crate::topology::cell_type::CellType;
use crate::topology::point::{EntityKey, EntityRank, PointId};
use thiserror::Error;

/// Unified error type for node registry operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// Attempted to construct a PointId with a zero value (invalid).
    #[error("PointId must be non-zero (0 is reserved as invalid/sentinel)")]
    InvalidPointId,

    /// A registry operation was called outside its protocol phase.
    #[error("registry state violation in `{op}`: expected {expected:?}, found {found:?}")]
    StateViolation {
        op: &'static str,
        expected: RegistryState,
        found: RegistryState,
    },

    /// More distinct members than a sub-entity key can hold.
    #[error("sub-entity key overflow: capacity {capacity}, attempted to insert member #{attempted}")]
    SubEntityArityExceeded { capacity: usize, attempted: usize },

    /// A sub-entity key was built with no members.
    #[error("sub-entity key for element {element} ({rank:?} #{ordinal}) is empty")]
    EmptySubEntity {
        element: EntityKey,
        rank: EntityRank,
        ordinal: usize,
    },

    /// The cell topology has no sub-entity of this rank/ordinal.
    #[error("cell type {cell_type:?} has no {rank:?} sub-entity with ordinal {ordinal}")]
    UnsupportedSubEntity {
        cell_type: CellType,
        rank: EntityRank,
        ordinal: usize,
    },

    /// Element connectivity does not match its cell type.
    #[error("element {element} of type {cell_type:?} expects {expected} nodes, found {found}")]
    ConnectivityMismatch {
        element: EntityKey,
        cell_type: CellType,
        expected: usize,
        found: usize,
    },

    /// The entity is not known to (or no longer valid in) the local mesh.
    #[error("entity {0} is not valid in the local mesh")]
    UnknownEntity(EntityKey),

    /// The entity already exists and cannot be declared again.
    #[error("entity {0} already exists in the local mesh")]
    DuplicateEntity(EntityKey),

    /// A ghost element references a sub-entity that was never registered.
    #[error("no registry record for {rank:?} #{ordinal} of element {element}")]
    MissingRecord {
        element: EntityKey,
        rank: EntityRank,
        ordinal: usize,
    },

    /// The deterministic ownership rule was violated somewhere upstream.
    #[error("ownership invariant broken: owner {owner} vs non-owner {non_owner}")]
    OwnershipInvariant {
        owner: EntityKey,
        non_owner: EntityKey,
    },

    /// Placeholder slots and their id shadow fell out of lock-step.
    #[error("placeholder mismatch: {slots} slots vs {ids} ids")]
    PlaceholderMismatch { slots: usize, ids: usize },

    /// A placeholder that must be resolved at this point is not.
    #[error("unresolved placeholder #{index} on sub-entity {key}")]
    UnresolvedPlaceholder { key: String, index: usize },

    /// The entity factory returned the wrong number of new entities.
    #[error("requested {requested} new entities, got {returned}")]
    NodeCountMismatch { requested: usize, returned: usize },

    /// Entity creation or destruction outside a modification bracket.
    #[error("mesh is not inside a modification bracket (`{0}`)")]
    NotInModification(&'static str),

    /// A node delivered by ghosting is missing from the local mesh.
    #[error("ghosted node {0} is missing from the local mesh")]
    GhostedNodeMissing(PointId),

    /// Packing wrote more bytes to a destination than the sizing pass counted.
    #[error("send buffer overflow for rank {dest}: sized {sized} bytes, packing {packed}")]
    BufferOverflow {
        dest: usize,
        sized: usize,
        packed: usize,
    },

    /// Received or packed buffer length disagrees with the announced size.
    #[error("buffer size mismatch with rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },

    /// Point-to-point communication failure.
    #[error("communication error with rank {neighbor}: {message}")]
    CommError { neighbor: usize, message: String },

    /// A wire message carried an unknown layout version.
    #[error("wire version mismatch: expected {expected}, found {found}")]
    WireVersion { expected: u16, found: u16 },

    /// A wire message ended before the announced payload.
    #[error("truncated wire message: needed {needed} bytes, {remaining} remaining")]
    WireTruncated { needed: usize, remaining: usize },

    /// A wire message carried an out-of-range field.
    #[error("malformed wire message: {0}")]
    WireMalformed(String),

    /// One or more ranks failed during a collective phase.
    #[error("collective failure: {failed_ranks} rank(s) reported an error")]
    CollectiveFailure { failed_ranks: u64 },

    /// The communication backend could not be initialised.
    #[error("communicator initialization failed: {0}")]
    CommInit(String),
}
