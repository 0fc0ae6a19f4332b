//! # Simulated Cluster
//!
//! Four replicas and one client wired through an in-process message queue.
//! Nothing is delivered until the test asks: [`Cluster::deliver_all`] drains
//! the queue (FIFO or shuffled), [`Cluster::advance`] moves the shared clock
//! and fires timeouts. Crashed replicas neither receive nor send.

use anyhow::{bail, Context, Result};
use parking_lot::{Mutex, RwLock};
use pbft_client::{
    Client, ClientConfig, ClientDependencies, ClientError, ClientResult, ClientTicket,
    ClientTransport, RequestEncoder,
};
use pbft_replica::adapters::{
    decode_message, decode_reply, BincodeEncoder, ManualClock, Sha256Digester,
};
use pbft_replica::{
    Encoder, Replica, ReplicaApi, ReplicaConfig, ReplicaDependencies, StateMachine, TimeSource,
    Transport,
};
use pbft_telemetry::{init_logging, TelemetryConfig};
use pbft_types::{Digest, ReplicaId, Request};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// `add(a, b)`
pub type Add = (i64, i64);

pub const CLIENT_ID: &str = "client-0";

/// Upper bound on deliveries per drain; a livelocked cluster fails the test
/// instead of hanging it.
const MAX_DELIVERIES: usize = 1_000_000;

/// Install logging once per test process. Output is printed only when
/// `PBFT_TEST_LOG` is set.
pub fn init_test_logging() {
    let config = TelemetryConfig {
        console_output: std::env::var("PBFT_TEST_LOG").is_ok(),
        ..TelemetryConfig::from_env()
    };
    // Every cluster after the first finds the subscriber installed
    let _ = init_logging(&config);
}

// =============================================================================
// State machine
// =============================================================================

/// Stateless addition service
#[derive(Debug, Default)]
pub struct Adder;

impl StateMachine for Adder {
    type Operation = Add;
    type Output = i64;

    fn compute(&self, operation: &Add) -> i64 {
        operation.0 + operation.1
    }

    fn state_digest(&self) -> Digest {
        Digest::new(b"adder".to_vec())
    }
}

// =============================================================================
// Network
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Replica(ReplicaId),
    Client(String),
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: Option<ReplicaId>,
    pub to: Destination,
    pub data: Vec<u8>,
}

/// Shared message queue
#[derive(Default)]
pub struct Network {
    queue: Mutex<VecDeque<Envelope>>,
    crashed: RwLock<HashSet<ReplicaId>>,
    replica_count: usize,
    delivered: AtomicUsize,
}

impl Network {
    pub fn new(replica_count: usize) -> Self {
        Self {
            replica_count,
            ..Self::default()
        }
    }

    fn push(&self, from: Option<ReplicaId>, to: Destination, data: Vec<u8>) {
        if from.map_or(false, |id| self.is_crashed(id)) {
            return;
        }
        self.queue.lock().push_back(Envelope { from, to, data });
    }

    pub fn is_crashed(&self, id: ReplicaId) -> bool {
        self.crashed.read().contains(&id)
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }

    fn replica_ids(&self) -> impl Iterator<Item = ReplicaId> {
        0..self.replica_count as ReplicaId
    }
}

/// A replica's view of the network
pub struct ClusterTransport {
    id: ReplicaId,
    network: Arc<Network>,
}

impl Transport for ClusterTransport {
    fn known_replica_ids(&self) -> Vec<ReplicaId> {
        self.network.replica_ids().collect()
    }

    fn send_message(&self, replica_id: ReplicaId, data: Vec<u8>) -> Result<(), String> {
        if replica_id as usize >= self.network.replica_count {
            return Err(format!("unknown replica {replica_id}"));
        }
        self.network
            .push(Some(self.id), Destination::Replica(replica_id), data);
        Ok(())
    }

    fn multicast(&self, data: Vec<u8>, ignored: &[ReplicaId]) -> Result<(), String> {
        for id in self.network.replica_ids().filter(|id| !ignored.contains(id)) {
            self.network
                .push(Some(self.id), Destination::Replica(id), data.clone());
        }
        Ok(())
    }

    fn send_reply(&self, client_id: &str, data: Vec<u8>) -> Result<(), String> {
        self.network
            .push(Some(self.id), Destination::Client(client_id.to_string()), data);
        Ok(())
    }
}

/// The client's view of the network
pub struct ClientNet {
    network: Arc<Network>,
}

impl ClientTransport for ClientNet {
    fn count_known_replicas(&self) -> usize {
        self.network.replica_count
    }

    fn send_request(&self, replica_id: ReplicaId, data: Vec<u8>) -> Result<(), String> {
        self.network
            .push(None, Destination::Replica(replica_id), data);
        Ok(())
    }

    fn multicast_request(&self, data: Vec<u8>) -> Result<(), String> {
        for id in self.network.replica_ids() {
            self.network.push(None, Destination::Replica(id), data.clone());
        }
        Ok(())
    }
}

/// Encodes client requests in the replicas' wire format
pub struct WireRequestEncoder(BincodeEncoder<Add, i64>);

impl RequestEncoder<Add> for WireRequestEncoder {
    fn encode_request(&self, request: &Request<Add>) -> ClientResult<Vec<u8>> {
        self.0
            .encode_request(request)
            .map_err(|e| ClientError::Encode(e.to_string()))
    }
}

/// Adapts the replicas' manual clock to the client's port
pub struct ClientClock(ManualClock);

impl pbft_client::TimeSource for ClientClock {
    fn now_ms(&self) -> u64 {
        self.0.now_ms()
    }
}

// =============================================================================
// Cluster
// =============================================================================

pub type ClusterReplica =
    Replica<Adder, Sha256Digester, BincodeEncoder<Add, i64>, ClusterTransport>;
pub type ClusterClient = Client<Add, i64, WireRequestEncoder, ClientNet>;

/// Delivery order of queued messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Fifo,
    Shuffled,
}

pub struct Cluster {
    pub replicas: Vec<Arc<ClusterReplica>>,
    pub client: Arc<ClusterClient>,
    pub network: Arc<Network>,
    pub clock: ManualClock,
    delivery: Delivery,
    rng: Mutex<StdRng>,
}

impl Cluster {
    /// Four replicas tolerating one fault, default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(ReplicaConfig::default(), Delivery::Fifo, 0)
    }

    pub fn shuffled(seed: u64) -> Result<Self> {
        Self::with_config(ReplicaConfig::default(), Delivery::Shuffled, seed)
    }

    /// Build a cluster where every replica uses `base` with its own id.
    pub fn with_config(base: ReplicaConfig, delivery: Delivery, seed: u64) -> Result<Self> {
        init_test_logging();
        let count = base.replica_count();
        let network = Arc::new(Network::new(count));
        let clock = ManualClock::new(0);

        let replicas = (0..count as ReplicaId)
            .map(|id| -> Result<Arc<ClusterReplica>> {
                let config = ReplicaConfig {
                    replica_id: id,
                    ..base.clone()
                };
                let replica = Replica::new(ReplicaDependencies {
                    state_machine: Arc::new(Adder),
                    digester: Arc::new(Sha256Digester),
                    encoder: Arc::new(BincodeEncoder::new()),
                    transport: Arc::new(ClusterTransport {
                        id,
                        network: Arc::clone(&network),
                    }),
                    config,
                })
                .with_context(|| format!("creating replica {id}"))?
                .with_time_source(Box::new(clock.clone()));
                Ok(Arc::new(replica))
            })
            .collect::<Result<Vec<_>>>()?;

        let client = Client::new(ClientDependencies {
            encoder: Arc::new(WireRequestEncoder(BincodeEncoder::new())),
            transport: Arc::new(ClientNet {
                network: Arc::clone(&network),
            }),
            config: ClientConfig {
                client_id: CLIENT_ID.to_string(),
                tolerance: base.tolerance,
                timeout_ms: base.request_timeout_ms,
            },
        })
        .context("creating client")?
        .with_time_source(Box::new(ClientClock(clock.clone())));

        Ok(Self {
            replicas,
            client: Arc::new(client),
            network,
            clock,
            delivery,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    pub fn replica(&self, id: ReplicaId) -> &ClusterReplica {
        &self.replicas[id as usize]
    }

    pub fn live_replicas(&self) -> impl Iterator<Item = &Arc<ClusterReplica>> {
        self.replicas
            .iter()
            .filter(|r| !self.network.is_crashed(r.replica_id()))
    }

    /// Stop delivering to and from `id`.
    pub fn crash(&self, id: ReplicaId) {
        self.network.crashed.write().insert(id);
    }

    /// Submit `add(a, b)` through the client.
    pub fn submit(&self, a: i64, b: i64) -> Result<Arc<ClientTicket<Add, i64>>> {
        Ok(self.client.send_request((a, b))?)
    }

    /// Send an already answered request to every replica again, bypassing
    /// the client's bookkeeping.
    pub fn rebroadcast(&self, request: &Request<Add>) -> Result<()> {
        let data = BincodeEncoder::<Add, i64>::new().encode_request(request)?;
        for id in self.network.replica_ids() {
            self.network
                .push(None, Destination::Replica(id), data.clone());
        }
        Ok(())
    }

    /// Results the live replicas cached for `request`.
    pub fn cached_results(&self, request: &Request<Add>) -> Vec<i64> {
        let key = request.key();
        self.live_replicas()
            .filter_map(|r| r.log().get_ticket_from_cache(&key))
            .filter_map(|t| t.result())
            .collect()
    }

    /// Deliver messages until the queue is empty.
    pub fn deliver_all(&self) -> Result<usize> {
        let mut count = 0;
        while let Some(envelope) = self.next_envelope() {
            self.deliver(envelope)?;
            count += 1;
            if count > MAX_DELIVERIES {
                bail!("cluster did not quiesce after {MAX_DELIVERIES} deliveries");
            }
        }
        Ok(count)
    }

    /// Deliver messages from `threads` threads at once until the queue is
    /// empty and no thread is mid-delivery.
    pub fn deliver_parallel(&self, threads: usize) -> Result<()> {
        let busy = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            let workers: Vec<_> = (0..threads)
                .map(|_| {
                    scope.spawn(|| -> Result<()> {
                        loop {
                            let next = {
                                let mut queue = self.network.queue.lock();
                                let next = queue.pop_front();
                                if next.is_some() {
                                    busy.fetch_add(1, Ordering::SeqCst);
                                } else if busy.load(Ordering::SeqCst) == 0 {
                                    return Ok(());
                                }
                                next
                            };
                            match next {
                                Some(envelope) => {
                                    let result = self.deliver(envelope);
                                    busy.fetch_sub(1, Ordering::SeqCst);
                                    result?;
                                }
                                None => std::thread::yield_now(),
                            }
                        }
                    })
                })
                .collect();

            for worker in workers {
                match worker.join() {
                    Ok(result) => result?,
                    Err(_) => bail!("delivery thread panicked"),
                }
            }
            Ok(())
        })
    }

    /// Move the clock and fire every live replica's and the client's timers.
    pub fn advance(&self, by: Duration) -> Result<()> {
        self.clock.advance(by);
        for replica in self.live_replicas() {
            replica.poll_timeouts()?;
        }
        self.client.poll_timeouts()?;
        Ok(())
    }

    /// Alternate delivery and one request timeout of clock until `done`.
    pub fn run_until<F>(&self, max_rounds: usize, done: F) -> Result<()>
    where
        F: Fn(&Self) -> bool,
    {
        let timeout = Duration::from_millis(self.replica(0).config().request_timeout_ms);
        for _ in 0..max_rounds {
            self.deliver_all()?;
            if done(self) {
                return Ok(());
            }
            self.advance(timeout)?;
        }
        self.deliver_all()?;
        if done(self) {
            Ok(())
        } else {
            bail!("condition not reached within {max_rounds} rounds")
        }
    }

    fn next_envelope(&self) -> Option<Envelope> {
        let mut queue = self.network.queue.lock();
        match self.delivery {
            Delivery::Fifo => queue.pop_front(),
            Delivery::Shuffled => {
                if queue.is_empty() {
                    return None;
                }
                let index = self.rng.lock().gen_range(0..queue.len());
                queue.swap_remove_back(index)
            }
        }
    }

    fn deliver(&self, envelope: Envelope) -> Result<()> {
        self.network.delivered.fetch_add(1, Ordering::Relaxed);
        match envelope.to {
            Destination::Replica(id) => {
                if self.network.is_crashed(id) {
                    return Ok(());
                }
                let message = decode_message::<Add>(&envelope.data)?;
                self.replica(id).handle(message)?;
            }
            Destination::Client(client_id) => {
                if client_id == CLIENT_ID {
                    let reply = decode_reply::<i64>(&envelope.data)?;
                    self.client.recv_reply(reply);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_starts_in_view_zero() {
        let cluster = Cluster::new().unwrap();
        assert_eq!(cluster.replicas.len(), 4);
        assert!(cluster.replicas.iter().all(|r| r.view() == 0));
        assert!(cluster.replica(0).is_primary());
    }

    #[test]
    fn test_crashed_replica_sends_nothing() {
        let cluster = Cluster::new().unwrap();
        cluster.crash(0);
        cluster.submit(1, 2).unwrap();
        // Request to the crashed primary is dropped on delivery
        assert_eq!(cluster.deliver_all().unwrap(), 1);
        assert_eq!(cluster.network.pending(), 0);
    }
}
