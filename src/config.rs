//! Registry configuration and per-rank refinement requests.

use serde::{Deserialize, Serialize};

use crate::algs::communicator::CommTag;
use crate::topology::point::EntityRank;

/// Knobs for a [`NodeRegistry`](crate::registry::NodeRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Ship new nodes to ghosting ranks through a dedicated ghosting.
    /// When off, received ids are declared locally instead.
    pub use_custom_ghosting: bool,
    pub ghosting_name: String,
    /// Part that collects the nodes created in the latest cycle.
    pub new_nodes_part: Option<String>,
    /// Run `check_db` at phase boundaries.
    pub check_invariants: bool,
    /// Centroid and part propagation skip sub-entities without a record instead of
    /// failing.
    pub allow_empty_sub_dims: bool,
    /// First of the two message tags used by reconciliation.
    pub base_tag: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            use_custom_ghosting: true,
            ghosting_name: "new_nodes".to_owned(),
            new_nodes_part: None,
            check_invariants: false,
            allow_empty_sub_dims: true,
            base_tag: 0x4E52,
        }
    }
}

impl RegistryConfig {
    /// Tag for the size stage of the reconciliation exchange.
    pub fn size_tag(&self) -> CommTag {
        CommTag::new(self.base_tag)
    }

    /// Tag for the payload stage.
    pub fn data_tag(&self) -> CommTag {
        CommTag::new(self.base_tag).offset(1)
    }
}

/// "Sub-entities of `rank` each need `new_nodes` new nodes."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NeededEntity {
    pub rank: EntityRank,
    pub new_nodes: usize,
}

impl NeededEntity {
    pub const fn new(rank: EntityRank, new_nodes: usize) -> Self {
        Self { rank, new_nodes }
    }

    /// One midpoint node per edge.
    pub const fn edge_midpoints() -> Self {
        Self::new(EntityRank::Edge, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = RegistryConfig::default();
        assert!(cfg.use_custom_ghosting);
        assert_eq!(cfg.ghosting_name, "new_nodes");
        assert_eq!(cfg.data_tag().as_u16(), cfg.size_tag().as_u16() + 1);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: RegistryConfig =
            serde_json::from_str(r#"{ "new_nodes_part": "refined", "base_tag": 7 }"#).unwrap();
        assert_eq!(cfg.new_nodes_part.as_deref(), Some("refined"));
        assert_eq!(cfg.base_tag, 7);
        assert!(cfg.allow_empty_sub_dims);

        let back = serde_json::to_string(&cfg).unwrap();
        let again: RegistryConfig = serde_json::from_str(&back).unwrap();
        assert_eq!(again, cfg);
    }
}
