//! Remote reconciliation: ghost elements tell the owners of their elements which nodes
//! the registry created for shared sub-entities.
//!
//! The traversal runs twice with the same callback. The first ("check for remote")
//! only counts bytes per destination, the second ("get from remote") packs the
//! messages into exactly sized buffers. The buffers are exchanged and every received
//! message is applied with [`NodeRegistry::create_node_and_connect`].

use itertools::Itertools;

use crate::algs::communicator::Communicator;
use crate::algs::exchange::{agree_on_failure, all_to_all};
use crate::algs::wire::{NeedMessage, decode_messages};
use crate::debug_invariants::DebugInvariants;
use crate::mesh::{MeshTopology, RefinementMesh};
use crate::mesh_error::MeshError;
use crate::registry::buffer::SendBuffers;
use crate::registry::key::SubEntityKey;
use crate::registry::record::NewNodes;
use crate::registry::state::RegistryState;
use crate::registry::{NeededEntity, NodeRegistry};
use crate::topology::point::{EntityKey, EntityProc};

impl NodeRegistry {
    pub fn begin_check_for_remote<M>(&mut self, mesh: &M) -> Result<(), MeshError>
    where
        M: MeshTopology + ?Sized,
    {
        self.state
            .advance("begin_check_for_remote", RegistryState::StartCheckForRemote)?;
        self.buffers = SendBuffers::sizing(mesh.parallel_size());
        self.failure = None;
        Ok(())
    }

    /// Sizing-pass callback for one sub-entity of `element`.
    pub fn check_for_remote<M>(
        &mut self,
        mesh: &M,
        element: EntityKey,
        needed: &NeededEntity,
        ordinal: usize,
    ) -> Result<(), MeshError>
    where
        M: MeshTopology + ?Sized,
    {
        let res = self
            .state
            .require("check_for_remote", RegistryState::StartCheckForRemote)
            .and_then(|_| self.queue_for_owner(mesh, element, needed, ordinal));
        if let Err(e) = &res {
            self.latch(e);
        }
        res
    }

    /// Agree across ranks that sizing succeeded, then switch the buffers to packing.
    pub fn end_check_for_remote<M, C>(&mut self, mesh: &M, comm: &C) -> Result<(), MeshError>
    where
        M: MeshTopology + ?Sized,
        C: Communicator,
    {
        self.state
            .require("end_check_for_remote", RegistryState::StartCheckForRemote)?;
        let local = match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        };
        if let Err(e) = agree_on_failure(comm, local) {
            self.state = RegistryState::Aborted;
            return Err(e);
        }
        log::debug!(
            "P[{}] end_check_for_remote: {} messages sized",
            mesh.parallel_rank(),
            self.buffers.messages()
        );
        self.buffers.allocate();
        self.state
            .advance("end_check_for_remote", RegistryState::EndCheckForRemote)
    }

    pub fn begin_get_from_remote(&mut self) -> Result<(), MeshError> {
        self.state
            .advance("begin_get_from_remote", RegistryState::StartGetFromRemote)?;
        self.pending_ghosts.clear();
        self.failure = None;
        Ok(())
    }

    /// Packing-pass callback; must mirror the sizing pass exactly.
    pub fn get_from_remote<M>(
        &mut self,
        mesh: &M,
        element: EntityKey,
        needed: &NeededEntity,
        ordinal: usize,
    ) -> Result<(), MeshError>
    where
        M: MeshTopology + ?Sized,
    {
        let res = self
            .state
            .require("get_from_remote", RegistryState::StartGetFromRemote)
            .and_then(|_| self.queue_for_owner(mesh, element, needed, ordinal));
        if let Err(e) = &res {
            self.latch(e);
        }
        res
    }

    /// Exchange the packed buffers, apply what arrived, agree on the outcome and ghost
    /// the new nodes.
    pub fn end_get_from_remote<M, C>(&mut self, mesh: &mut M, comm: &C) -> Result<(), MeshError>
    where
        M: RefinementMesh + ?Sized,
        C: Communicator,
    {
        self.state
            .require("end_get_from_remote", RegistryState::StartGetFromRemote)?;
        let me = mesh.parallel_rank();

        // Every rank takes part in the exchange, failed or not.
        let send = match self.failure.clone() {
            Some(_) => Vec::new(),
            None => match self.buffers.finish() {
                Ok(bufs) => bufs,
                Err(e) => {
                    self.latch(&e);
                    Vec::new()
                }
            },
        };
        self.stats.messages_sent = self.buffers.messages();
        let recv: Vec<Vec<u8>> =
            match all_to_all(comm, self.config.size_tag(), self.config.data_tag(), send) {
                Ok(r) => r,
                Err(e) => {
                    self.latch(&e);
                    Vec::new()
                }
            };

        if self.failure.is_none() {
            if let Err(e) = self.unpack(&*mesh, recv) {
                self.latch(&e);
            }
        }

        let local = match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        };
        if let Err(e) = agree_on_failure(comm, local) {
            self.state = RegistryState::Aborted;
            return Err(e);
        }

        self.ghost_new_nodes(mesh)?;
        self.set_all_received_node_data(mesh)?;
        self.map.debug_assert_invariants();
        if self.config.check_invariants {
            self.check_db(&*mesh)?;
        }
        self.state
            .advance("end_get_from_remote", RegistryState::EndGetFromRemote)?;
        log::debug!(
            "P[{me}] end_get_from_remote: {} sent, {} received, {} ghosted",
            self.stats.messages_sent,
            self.stats.messages_received,
            self.stats.nodes_ghosted
        );
        Ok(())
    }

    /// Apply a received message: the sender holds a ghost of `msg.element`, which this
    /// rank owns, and reports the ids of the nodes on the shared sub-entity.
    pub fn create_node_and_connect<M>(
        &mut self,
        mesh: &M,
        msg: &NeedMessage,
        from_rank: usize,
    ) -> Result<(), MeshError>
    where
        M: MeshTopology + ?Sized,
    {
        if !mesh.is_valid(msg.element) {
            return Err(MeshError::UnknownEntity(msg.element));
        }
        let key = SubEntityKey::build(mesh, msg.element, msg.needed_rank, msg.ordinal)?;
        if let Some(owner) = self.map.lookup(&key).and_then(|r| r.owner.key()) {
            if owner.rank == msg.element.rank && owner.id >= msg.element.id {
                return Err(MeshError::OwnershipInvariant {
                    owner,
                    non_owner: msg.element,
                });
            }
        }

        let mut new_nodes = NewNodes::from_ids(msg.nodes.iter().map(|&(id, _)| id));
        for (i, &(id, owner)) in msg.nodes.iter().enumerate() {
            if mesh.is_valid(EntityKey::node(id)) {
                new_nodes.attach(i);
            } else {
                self.received.insert(id, owner);
            }
        }
        let record = self.map.get_or_create(key);
        record.new_nodes = new_nodes;
        log::trace!(
            "P[{}] unpacked {key} from P[{from_rank}]: {} node(s), owner {:?}",
            mesh.parallel_rank(),
            msg.nodes.len(),
            record.owner.key()
        );
        Ok(())
    }

    /// Shared body of both traversal passes.
    fn queue_for_owner<M>(
        &mut self,
        mesh: &M,
        element: EntityKey,
        needed: &NeededEntity,
        ordinal: usize,
    ) -> Result<(), MeshError>
    where
        M: MeshTopology + ?Sized,
    {
        if !mesh.is_ghost(element) {
            return Ok(());
        }
        let key = SubEntityKey::build(mesh, element, needed.rank, ordinal)?;
        let record = self.map.lookup(&key).ok_or(MeshError::MissingRecord {
            element,
            rank: needed.rank,
            ordinal,
        })?;
        let Some(owner) = record.owner.key() else {
            return Ok(());
        };
        if element.id < owner.id && element.rank > owner.rank {
            return Err(MeshError::OwnershipInvariant {
                owner,
                non_owner: element,
            });
        }
        if record.new_nodes.is_empty() || !mesh.is_valid(owner) || mesh.is_ghost(owner) {
            return Ok(());
        }
        if let Some(index) = record.new_nodes.ids().iter().position(Option::is_none) {
            return Err(MeshError::UnresolvedPlaceholder {
                key: key.to_string(),
                index,
            });
        }

        let me = mesh.parallel_rank();
        let dest = mesh
            .owner_rank(element)
            .ok_or(MeshError::UnknownEntity(element))?;
        let nodes: Vec<_> = record
            .new_nodes
            .resolved_ids()
            .map(|id| (id, mesh.owner_rank(EntityKey::node(id)).unwrap_or(me)))
            .collect();
        let msg = NeedMessage {
            needed_rank: needed.rank,
            ordinal,
            element,
            nodes,
        };
        self.buffers.push(dest, &msg)?;
        if self.buffers.is_packing() {
            for &(id, owner) in &msg.nodes {
                if owner == me {
                    self.pending_ghosts.push((EntityKey::node(id), dest));
                }
            }
        }
        Ok(())
    }

    fn unpack<M>(&mut self, mesh: &M, recv: Vec<Vec<u8>>) -> Result<(), MeshError>
    where
        M: MeshTopology + ?Sized,
    {
        let me = mesh.parallel_rank();
        for (from, bytes) in recv.into_iter().enumerate() {
            if from == me || bytes.is_empty() {
                continue;
            }
            for msg in decode_messages(&bytes)? {
                self.create_node_and_connect(mesh, &msg, from)?;
                self.stats.messages_received += 1;
            }
        }
        Ok(())
    }

    fn ghost_new_nodes<M>(&mut self, mesh: &mut M) -> Result<(), MeshError>
    where
        M: RefinementMesh + ?Sized,
    {
        let send: Vec<EntityProc> = std::mem::take(&mut self.pending_ghosts)
            .into_iter()
            .sorted_unstable()
            .dedup()
            .collect();
        self.stats.nodes_ghosted = send.len();
        if self.config.use_custom_ghosting {
            let ghosting = match self.ghosting {
                Some(g) => g,
                None => {
                    let g = mesh.create_ghosting(&self.config.ghosting_name);
                    self.ghosting = Some(g);
                    g
                }
            };
            let receive: Vec<EntityProc> = self
                .received
                .iter()
                .map(|(&id, &owner)| (EntityKey::node(id), owner))
                .collect();
            mesh.change_ghosting(ghosting, &send, &receive)?;
        }
        self.pending_ghosts = send;
        Ok(())
    }
}
