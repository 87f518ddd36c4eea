//! Two-pass send buffers: count bytes per destination, then pack into exact-size
//! buffers.

use bytes::{Bytes, BytesMut};

use crate::algs::wire::NeedMessage;
use crate::mesh_error::MeshError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferMode {
    Sizing,
    Packing,
}

#[derive(Debug)]
pub struct SendBuffers {
    mode: BufferMode,
    sizes: Vec<usize>,
    bufs: Vec<BytesMut>,
    messages: usize,
}

impl Default for SendBuffers {
    fn default() -> Self {
        Self::sizing(0)
    }
}

impl SendBuffers {
    /// Fresh sizing pass over `n_ranks` destinations.
    pub fn sizing(n_ranks: usize) -> Self {
        Self {
            mode: BufferMode::Sizing,
            sizes: vec![0; n_ranks],
            bufs: Vec::new(),
            messages: 0,
        }
    }

    pub fn is_packing(&self) -> bool {
        self.mode == BufferMode::Packing
    }

    /// Bytes counted for `dest` by the sizing pass.
    pub fn sized_bytes(&self, dest: usize) -> usize {
        self.sizes.get(dest).copied().unwrap_or(0)
    }

    /// Messages pushed in the current pass.
    pub fn messages(&self) -> usize {
        self.messages
    }

    /// Count (sizing) or write (packing) one message for `dest`.
    pub fn push(&mut self, dest: usize, msg: &NeedMessage) -> Result<(), MeshError> {
        if dest >= self.sizes.len() {
            return Err(MeshError::CommError {
                neighbor: dest,
                message: format!("destination outside communicator of size {}", self.sizes.len()),
            });
        }
        let len = msg.len_on_wire();
        match self.mode {
            BufferMode::Sizing => self.sizes[dest] += len,
            BufferMode::Packing => {
                let buf = &mut self.bufs[dest];
                if buf.len() + len > self.sizes[dest] {
                    return Err(MeshError::BufferOverflow {
                        dest,
                        sized: self.sizes[dest],
                        packed: buf.len() + len,
                    });
                }
                msg.encode_into(buf);
            }
        }
        self.messages += 1;
        Ok(())
    }

    /// End the sizing pass and allocate exact capacities.
    pub fn allocate(&mut self) {
        self.bufs = self.sizes.iter().map(|&n| BytesMut::with_capacity(n)).collect();
        self.mode = BufferMode::Packing;
        self.messages = 0;
    }

    /// Hand out the packed buffers; every buffer must be filled to its sized length.
    pub fn finish(&mut self) -> Result<Vec<Bytes>, MeshError> {
        if !self.is_packing() {
            return Err(MeshError::BufferSizeMismatch {
                neighbor: 0,
                expected: self.sizes.iter().sum(),
                got: 0,
            });
        }
        let bufs = std::mem::take(&mut self.bufs);
        let mut out = Vec::with_capacity(bufs.len());
        for (dest, buf) in bufs.into_iter().enumerate() {
            if buf.len() != self.sizes[dest] {
                return Err(MeshError::BufferSizeMismatch {
                    neighbor: dest,
                    expected: self.sizes[dest],
                    got: buf.len(),
                });
            }
            out.push(buf.freeze());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::point::{EntityKey, EntityRank, PointId};

    fn msg(n_nodes: usize) -> NeedMessage {
        NeedMessage {
            needed_rank: EntityRank::Edge,
            ordinal: 0,
            element: EntityKey::element(PointId::new(4).unwrap()),
            nodes: (1..=n_nodes as u64)
                .map(|i| (PointId::new(i).unwrap(), 0))
                .collect(),
        }
    }

    #[test]
    fn sized_then_packed_exactly() {
        let mut sb = SendBuffers::sizing(2);
        sb.push(1, &msg(1)).unwrap();
        sb.push(1, &msg(2)).unwrap();
        assert_eq!(sb.sized_bytes(1), NeedMessage::encoded_len(1) + NeedMessage::encoded_len(2));
        sb.allocate();
        sb.push(1, &msg(1)).unwrap();
        sb.push(1, &msg(2)).unwrap();
        let out = sb.finish().unwrap();
        assert!(out[0].is_empty());
        assert_eq!(out[1].len(), sb.sized_bytes(1));
    }

    #[test]
    fn packing_more_than_sized_overflows() {
        let mut sb = SendBuffers::sizing(1);
        sb.push(0, &msg(1)).unwrap();
        sb.allocate();
        assert!(matches!(
            sb.push(0, &msg(2)),
            Err(MeshError::BufferOverflow { dest: 0, .. })
        ));
    }

    #[test]
    fn underfilled_buffer_is_reported() {
        let mut sb = SendBuffers::sizing(1);
        sb.push(0, &msg(1)).unwrap();
        sb.allocate();
        assert!(matches!(
            sb.finish(),
            Err(MeshError::BufferSizeMismatch { neighbor: 0, got: 0, .. })
        ));
    }

    #[test]
    fn out_of_range_destination() {
        let mut sb = SendBuffers::sizing(1);
        assert!(matches!(
            sb.push(3, &msg(0)),
            Err(MeshError::CommError { neighbor: 3, .. })
        ));
    }
}
