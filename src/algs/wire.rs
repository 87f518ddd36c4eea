//! Fixed, versioned, little-endian wire types for node reconciliation messages.
//!
//! A reconciliation buffer is a concatenation of messages. Each message is one
//! [`WireNeedHdr`] followed by `n_nodes` [`WireNode`] records.

use bytemuck::{Pod, Zeroable};
use bytes::BufMut;
use std::mem::size_of;

use crate::mesh_error::MeshError;
use crate::topology::point::{EntityKey, EntityRank, PointId};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

// All multi-byte integers in these structs are little-endian on the wire.
// They are stored pre-LE with `.to_le()` and decoded with `.from_le()`.

/// Byte count announced before a payload.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// Header of one "I hold a ghost of your element, here are the nodes of its
/// sub-entity" message.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireNeedHdr {
    pub version_le: u16,
    pub needed_rank: u8,
    pub elem_rank: u8,
    pub ordinal_le: u32,
    pub elem_id_le: u64,
    pub n_nodes_le: u32,
    pub reserved_le: u32, // keep zero
}

impl WireNeedHdr {
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn ordinal(&self) -> u32 {
        u32::from_le(self.ordinal_le)
    }
    pub fn elem_id(&self) -> u64 {
        u64::from_le(self.elem_id_le)
    }
    pub fn n_nodes(&self) -> usize {
        u32::from_le(self.n_nodes_le) as usize
    }
}

/// One node id with the rank that owns it.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireNode {
    pub id_le: u64,
    pub owner_le: u32,
    pub reserved_le: u32,
}

impl WireNode {
    pub fn new(id: PointId, owner: usize) -> Self {
        Self {
            id_le: id.get().to_le(),
            owner_le: (owner as u32).to_le(),
            reserved_le: 0,
        }
    }
    pub fn id(&self) -> u64 {
        u64::from_le(self.id_le)
    }
    pub fn owner(&self) -> usize {
        u32::from_le(self.owner_le) as usize
    }
}

static_assertions::const_assert_eq!(size_of::<WireCount>(), 4);
static_assertions::const_assert_eq!(size_of::<WireNeedHdr>(), 24);
static_assertions::const_assert_eq!(size_of::<WireNode>(), 16);

/// Decoded reconciliation message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NeedMessage {
    pub needed_rank: EntityRank,
    /// Zero-based sub-entity ordinal within `element`'s topology.
    pub ordinal: usize,
    pub element: EntityKey,
    /// `(node id, owning rank)` in placeholder order.
    pub nodes: Vec<(PointId, usize)>,
}

impl NeedMessage {
    /// Encoded size of a message carrying `n_nodes` nodes.
    pub const fn encoded_len(n_nodes: usize) -> usize {
        size_of::<WireNeedHdr>() + n_nodes * size_of::<WireNode>()
    }

    pub fn len_on_wire(&self) -> usize {
        Self::encoded_len(self.nodes.len())
    }

    pub fn encode_into<B: BufMut>(&self, out: &mut B) {
        let hdr = WireNeedHdr {
            version_le: WIRE_VERSION.to_le(),
            needed_rank: self.needed_rank.as_u8(),
            elem_rank: self.element.rank.as_u8(),
            ordinal_le: (self.ordinal as u32).to_le(),
            elem_id_le: self.element.id.get().to_le(),
            n_nodes_le: (self.nodes.len() as u32).to_le(),
            reserved_le: 0,
        };
        out.put_slice(bytemuck::bytes_of(&hdr));
        for &(id, owner) in &self.nodes {
            out.put_slice(bytemuck::bytes_of(&WireNode::new(id, owner)));
        }
    }
}

/// Decode a buffer of back-to-back messages.
pub fn decode_messages(mut buf: &[u8]) -> Result<Vec<NeedMessage>, MeshError> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        let hdr: WireNeedHdr = take(&mut buf)?;
        if hdr.version() != WIRE_VERSION {
            return Err(MeshError::WireVersion {
                expected: WIRE_VERSION,
                found: hdr.version(),
            });
        }
        let needed_rank = EntityRank::from_u8(hdr.needed_rank)
            .ok_or_else(|| MeshError::WireMalformed(format!("rank byte {}", hdr.needed_rank)))?;
        let elem_rank = EntityRank::from_u8(hdr.elem_rank)
            .ok_or_else(|| MeshError::WireMalformed(format!("rank byte {}", hdr.elem_rank)))?;
        let elem_id = PointId::from_wire(hdr.elem_id())
            .ok_or_else(|| MeshError::WireMalformed("element id 0".into()))?;

        let n = hdr.n_nodes();
        let needed = n * size_of::<WireNode>();
        if buf.len() < needed {
            return Err(MeshError::WireTruncated {
                needed,
                remaining: buf.len(),
            });
        }
        let mut nodes = Vec::with_capacity(n);
        for _ in 0..n {
            let rec: WireNode = take(&mut buf)?;
            let id = PointId::from_wire(rec.id())
                .ok_or_else(|| MeshError::WireMalformed("node id 0".into()))?;
            nodes.push((id, rec.owner()));
        }
        out.push(NeedMessage {
            needed_rank,
            ordinal: hdr.ordinal() as usize,
            element: EntityKey::new(elem_rank, elem_id),
            nodes,
        });
    }
    Ok(out)
}

fn take<T: Pod>(buf: &mut &[u8]) -> Result<T, MeshError> {
    let n = size_of::<T>();
    if buf.len() < n {
        return Err(MeshError::WireTruncated {
            needed: n,
            remaining: buf.len(),
        });
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(bytemuck::pod_read_unaligned(head))
}
