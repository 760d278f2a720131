//! Connection registry and per-party fan-out.
//!
//! A connection is registered under at most one customer party and at most
//! one driver party. Publishing never waits on a consumer: each connection
//! owns a bounded buffer and an event that does not fit is dropped.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::notify::events::Event;
use crate::observability::metrics::Metrics;

pub type ConnectionId = Uuid;

/// Customer and driver identifiers live in separate namespaces, so an account
/// that is both registers twice without collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartyId {
    Customer(Uuid),
    Driver(Uuid),
}

struct Connection {
    tx: mpsc::Sender<Event>,
    customer: Option<Uuid>,
    driver: Option<Uuid>,
}

pub struct Fabric {
    connections: DashMap<ConnectionId, Connection>,
    parties: DashMap<PartyId, HashSet<ConnectionId>>,
    buffer_size: usize,
    metrics: Metrics,
}

impl Fabric {
    pub fn new(buffer_size: usize, metrics: Metrics) -> Self {
        Self {
            connections: DashMap::new(),
            parties: DashMap::new(),
            buffer_size: buffer_size.max(1),
            metrics,
        }
    }

    /// Opens a connection with no party associations yet.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            Connection {
                tx,
                customer: None,
                driver: None,
            },
        );
        self.metrics.live_connections.inc();
        info!(connection_id = %id, "realtime connection opened");
        (id, rx)
    }

    /// Associates `connection` with `party`, replacing any earlier party of the
    /// same namespace. Returns false if the connection is unknown.
    pub fn register(&self, connection: ConnectionId, party: PartyId) -> bool {
        let Some(mut conn) = self.connections.get_mut(&connection) else {
            return false;
        };

        let (slot, new_id) = match party {
            PartyId::Customer(id) => (&mut conn.customer, id),
            PartyId::Driver(id) => (&mut conn.driver, id),
        };

        if *slot == Some(new_id) {
            return true;
        }

        if let Some(previous) = slot.replace(new_id) {
            let previous = match party {
                PartyId::Customer(_) => PartyId::Customer(previous),
                PartyId::Driver(_) => PartyId::Driver(previous),
            };
            self.detach(previous, connection);
        }

        self.parties.entry(party).or_default().insert(connection);
        debug!(connection_id = %connection, party = ?party, "connection joined party");
        true
    }

    /// Handles a client `join` control message.
    pub fn join(&self, connection: ConnectionId, customer: Option<Uuid>, driver: Option<Uuid>) {
        if let Some(id) = customer {
            self.register(connection, PartyId::Customer(id));
        }
        if let Some(id) = driver {
            self.register(connection, PartyId::Driver(id));
        }
    }

    /// Drops every association of `connection`. No-op if already gone.
    pub fn unregister(&self, connection: ConnectionId) {
        let Some((_, conn)) = self.connections.remove(&connection) else {
            return;
        };

        if let Some(id) = conn.customer {
            self.detach(PartyId::Customer(id), connection);
        }
        if let Some(id) = conn.driver {
            self.detach(PartyId::Driver(id), connection);
        }

        self.metrics.live_connections.dec();
        info!(connection_id = %connection, "realtime connection closed");
    }

    /// Hands `event` to every connection of `party` and returns how many took it.
    /// Delivery problems are logged and never reported to the caller.
    pub fn publish(&self, party: PartyId, event: &Event) -> usize {
        let targets: Vec<ConnectionId> = match self.parties.get(&party) {
            Some(set) => set.iter().copied().collect(),
            None => {
                debug!(party = ?party, event = event.name(), "no live connection for party");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut closed = Vec::new();

        for id in targets {
            let Some(conn) = self.connections.get(&id) else {
                continue;
            };
            match conn.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.metrics.notifications_dropped_total.inc();
                    warn!(connection_id = %id, event = event.name(), "connection buffer full; event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    self.metrics.notifications_dropped_total.inc();
                    closed.push(id);
                }
            }
        }

        for id in closed {
            self.unregister(id);
        }

        self.metrics
            .notifications_published_total
            .with_label_values(&[event.name()])
            .inc_by(delivered as u64);

        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn detach(&self, party: PartyId, connection: ConnectionId) {
        if let Some(mut set) = self.parties.get_mut(&party) {
            set.remove(&connection);
        }
        self.parties.remove_if(&party, |_, set| set.is_empty());
    }
}
