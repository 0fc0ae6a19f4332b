//! In-memory transport adapter for testing

use crate::ports::Transport;
use parking_lot::RwLock;
use pbft_types::ReplicaId;

/// One recorded send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Unicast { to: ReplicaId, data: Vec<u8> },
    Multicast { data: Vec<u8>, ignored: Vec<ReplicaId> },
    Reply { client_id: String, data: Vec<u8> },
}

/// Records every send instead of delivering it.
pub struct InMemoryTransport {
    replicas: Vec<ReplicaId>,
    sent: RwLock<Vec<Sent>>,
}

impl InMemoryTransport {
    /// Transport for a group of replicas `0..count`
    pub fn new(count: usize) -> Self {
        Self {
            replicas: (0..count as ReplicaId).collect(),
            sent: RwLock::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.read().clone()
    }

    /// Remove and return everything recorded so far
    pub fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.write())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().len()
    }
}

impl Transport for InMemoryTransport {
    fn known_replica_ids(&self) -> Vec<ReplicaId> {
        self.replicas.clone()
    }

    fn count_known_replicas(&self) -> usize {
        self.replicas.len()
    }

    fn send_message(&self, replica_id: ReplicaId, data: Vec<u8>) -> Result<(), String> {
        if !self.replicas.contains(&replica_id) {
            return Err(format!("unknown replica {replica_id}"));
        }
        self.sent.write().push(Sent::Unicast {
            to: replica_id,
            data,
        });
        Ok(())
    }

    fn multicast(&self, data: Vec<u8>, ignored: &[ReplicaId]) -> Result<(), String> {
        self.sent.write().push(Sent::Multicast {
            data,
            ignored: ignored.to_vec(),
        });
        Ok(())
    }

    fn send_reply(&self, client_id: &str, data: Vec<u8>) -> Result<(), String> {
        self.sent.write().push(Sent::Reply {
            client_id: client_id.to_string(),
            data,
        });
        Ok(())
    }
}
