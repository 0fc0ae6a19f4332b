//! Request dispatch, retry and reply collection.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::ports::{ClientTransport, RequestEncoder, SystemTimeSource, TimeSource};
use crate::ticket::ClientTicket;
use dashmap::DashMap;
use pbft_types::{primary_of, ReplicaId, Reply, Request};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Dependencies for Client
pub struct ClientDependencies<E, T> {
    pub encoder: Arc<E>,
    pub transport: Arc<T>,
    pub config: ClientConfig,
}

/// PBFT client
pub struct Client<O, R, E, T> {
    config: ClientConfig,
    encoder: Arc<E>,
    transport: Arc<T>,
    /// Primary as last inferred from reply views
    primary: AtomicU32,
    next_timestamp: AtomicU64,
    tickets: DashMap<u64, Arc<ClientTicket<O, R>>>,
    time_source: Box<dyn TimeSource>,
}

impl<O, R, E, T> Client<O, R, E, T>
where
    R: Clone + PartialEq,
    E: RequestEncoder<O>,
    T: ClientTransport,
{
    pub fn new(deps: ClientDependencies<E, T>) -> ClientResult<Self> {
        deps.config.validate()?;
        Ok(Self {
            config: deps.config,
            encoder: deps.encoder,
            transport: deps.transport,
            primary: AtomicU32::new(0),
            next_timestamp: AtomicU64::new(0),
            tickets: DashMap::new(),
            time_source: Box::new(SystemTimeSource),
        })
    }

    /// Set custom time source (for testing)
    pub fn with_time_source(mut self, time_source: Box<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn tolerance(&self) -> usize {
        self.config.tolerance
    }

    pub fn primary(&self) -> ReplicaId {
        self.primary.load(Ordering::Acquire)
    }

    /// Requests still waiting for `f + 1` matching replies
    pub fn pending(&self) -> usize {
        self.tickets.len()
    }

    /// Send `operation` to the current primary.
    ///
    /// Timestamps increase by one per request, starting at 0.
    pub fn send_request(&self, operation: O) -> ClientResult<Arc<ClientTicket<O, R>>> {
        let timestamp = self.next_timestamp.fetch_add(1, Ordering::AcqRel);
        let request = Request::new(operation, timestamp, self.config.client_id.clone());
        let data = self.encoder.encode_request(&request)?;

        // Registered before sending so an immediate reply finds it
        let ticket = Arc::new(ClientTicket::new(request, self.time_source.now_ms()));
        self.tickets.insert(timestamp, Arc::clone(&ticket));

        let primary = self.primary();
        if let Err(reason) = self.transport.send_request(primary, data) {
            self.tickets.remove(&timestamp);
            return Err(ClientError::Send {
                target: primary,
                reason,
            });
        }

        debug!(
            client = %self.config.client_id,
            timestamp = timestamp,
            primary = primary,
            "Sent request"
        );
        Ok(ticket)
    }

    /// Re-broadcast the ticket's request to every replica if it has waited
    /// longer than the client timeout. Returns whether it was re-sent.
    pub fn check_timeout(&self, ticket: &ClientTicket<O, R>) -> ClientResult<bool> {
        if ticket.is_done() {
            return Ok(false);
        }
        let now = self.time_source.now_ms();
        if now.saturating_sub(ticket.dispatch_ms()) < self.config.timeout_ms {
            return Ok(false);
        }

        ticket.update_dispatch(now);
        let data = self.encoder.encode_request(ticket.request())?;
        self.transport
            .multicast_request(data)
            .map_err(ClientError::Multicast)?;

        info!(
            client = %self.config.client_id,
            timestamp = ticket.timestamp(),
            "Request timed out, multicasting to all replicas"
        );
        Ok(true)
    }

    /// Check every pending ticket. Returns how many were re-sent.
    pub fn poll_timeouts(&self) -> ClientResult<usize> {
        let pending: Vec<_> = self.tickets.iter().map(|e| Arc::clone(e.value())).collect();
        let mut resent = 0;
        for ticket in pending {
            if self.check_timeout(&ticket)? {
                resent += 1;
            }
        }
        Ok(resent)
    }

    /// Tally a reply. Returns the ticket it belongs to, if still pending.
    ///
    /// The reply's view also updates which replica is taken as primary.
    pub fn recv_reply(&self, reply: Reply<R>) -> Option<Arc<ClientTicket<O, R>>> {
        if reply.client_id != self.config.client_id {
            return None;
        }
        let ticket = self
            .tickets
            .get(&reply.timestamp)
            .map(|t| Arc::clone(t.value()))?;

        let replicas = self.transport.count_known_replicas();
        self.primary
            .store(primary_of(reply.view, replicas), Ordering::Release);

        if ticket.recv_result(reply.replica_id, reply.result, self.config.tolerance) {
            self.tickets.remove(&reply.timestamp);
            debug!(
                client = %self.config.client_id,
                timestamp = reply.timestamp,
                "Request settled"
            );
        }
        Some(ticket)
    }
}
