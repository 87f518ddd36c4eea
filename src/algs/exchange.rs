//! Sparse all-to-all byte exchange and collective failure agreement.
//!
//! Stage 1 exchanges a [`WireCount`] with every peer, stage 2 moves the payloads.
//! Every send/receive handle is drained before returning, even if an error occurs.

use bytes::Bytes;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice, cast_slice_mut};
use crate::mesh_error::MeshError;

/// Send `send[p]` to every rank `p` and return what every rank sent here, indexed by
/// source rank. The buffer addressed to this rank is delivered locally.
///
/// Both tags must be distinct from any tag concurrently in flight. Payloads from
/// peers whose size header was unreadable are not drained.
pub fn all_to_all<C>(
    comm: &C,
    size_tag: CommTag,
    data_tag: CommTag,
    mut send: Vec<Bytes>,
) -> Result<Vec<Vec<u8>>, MeshError>
where
    C: Communicator,
{
    let (me, size) = (comm.rank(), comm.size());
    send.resize(size, Bytes::new());
    let mut recv = vec![Vec::new(); size];
    recv[me] = send[me].to_vec();
    if size == 1 {
        return Ok(recv);
    }
    let peers: Vec<usize> = (0..size).filter(|&p| p != me).collect();

    // 1) sizes
    let mut size_recvs = Vec::with_capacity(peers.len());
    for &p in &peers {
        let mut cnt = WireCount::new(0);
        let h = comm.irecv(
            p,
            size_tag.as_u16(),
            cast_slice_mut(std::slice::from_mut(&mut cnt)),
        );
        size_recvs.push((p, h));
    }
    let mut pending_sends = Vec::with_capacity(2 * peers.len());
    for &p in &peers {
        let cnt = WireCount::new(send[p].len());
        pending_sends.push(comm.isend(p, size_tag.as_u16(), cast_slice(std::slice::from_ref(&cnt))));
    }

    let mut incoming = vec![0usize; size];
    let mut maybe_err = None;
    for (p, h) in size_recvs {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                let mut cnt = WireCount::new(0);
                cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(&data);
                incoming[p] = cnt.get();
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MeshError::CommError {
                    neighbor: p,
                    message: format!(
                        "expected {} bytes for size header, got {}",
                        std::mem::size_of::<WireCount>(),
                        data.len()
                    ),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshError::CommError {
                    neighbor: p,
                    message: format!("failed to receive size from rank {p}"),
                });
            }
            _ => {}
        }
    }

    // 2) payloads; a peer that announced zero bytes sends nothing. Announced payloads
    // are received even after a size error so none is left queued under `data_tag`.
    let mut data_recvs = Vec::new();
    for &p in &peers {
        if incoming[p] > 0 {
            let mut scratch = vec![0u8; incoming[p]];
            data_recvs.push((p, comm.irecv(p, data_tag.as_u16(), &mut scratch)));
        }
    }
    for &p in &peers {
        if !send[p].is_empty() {
            pending_sends.push(comm.isend(p, data_tag.as_u16(), &send[p]));
        }
    }
    for (p, h) in data_recvs {
        match h.wait() {
            Some(data) if data.len() == incoming[p] => {
                if maybe_err.is_none() {
                    recv[p] = data;
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MeshError::BufferSizeMismatch {
                    neighbor: p,
                    expected: incoming[p],
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshError::CommError {
                    neighbor: p,
                    message: format!("failed to receive payload from rank {p}"),
                });
            }
            _ => {}
        }
    }

    // 3) always drain all send handles before returning
    for s in pending_sends {
        let _ = s.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(recv),
    }
}

/// Agree on success across all ranks.
///
/// Every rank contributes 1 if `local` is an error. A rank with a local error gets it
/// back; a healthy rank whose peers failed gets [`MeshError::CollectiveFailure`].
pub fn agree_on_failure<C, T>(comm: &C, local: Result<T, MeshError>) -> Result<T, MeshError>
where
    C: Communicator,
{
    let mut flag = [u64::from(local.is_err())];
    comm.allreduce_sum(&mut flag)?;
    match local {
        Err(e) => Err(e),
        Ok(_) if flag[0] > 0 => Err(MeshError::CollectiveFailure {
            failed_ranks: flag[0],
        }),
        ok => ok,
    }
}
