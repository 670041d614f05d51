//! Live connection table for the relay server
//!
//! This module owns the set of connected clients:
//! - Identity assignment for new connections
//! - Capacity enforcement
//! - Per-connection outbound queues used for fan-out
//!
//! Only the transport layer adds or removes entries. The relay reads the table
//! through the [`ConnectionRegistry`] capability.

use crate::relay::ConnectionRegistry;
use log::{debug, info};
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::{PeerId, ServerPacket};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Length of generated connection identities
pub const ID_LENGTH: usize = 20;

/// Packets queued for one connection before further fan-out to it is dropped
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// A live connection and the queue feeding its socket writer
#[derive(Debug)]
pub struct Connection {
    /// Identity assigned by the server, never reused while live
    pub id: PeerId,
    /// Remote address of the client
    pub addr: SocketAddr,
    /// When the connection was registered
    pub connected_at: Instant,
    sender: mpsc::Sender<ServerPacket>,
}

impl Connection {
    pub fn new(id: PeerId, addr: SocketAddr, sender: mpsc::Sender<ServerPacket>) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            sender,
        }
    }

    /// Queues a packet for this connection's writer
    ///
    /// Returns false when the writer has gone away or its queue is full.
    /// Delivery is best-effort, so callers only use the result for accounting.
    pub fn send(&self, packet: ServerPacket) -> bool {
        match self.sender.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue for {} is full, dropping packet", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Outbound queue for {} is closed", self.id);
                false
            }
        }
    }
}

/// Manages all connected clients
pub struct ClientManager {
    /// Connected clients indexed by their identity
    clients: HashMap<PeerId, Connection>,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
        }
    }

    /// Attempts to register a new connection
    ///
    /// Returns the assigned identity, or None if the server is at capacity.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::Sender<ServerPacket>,
    ) -> Option<PeerId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let id = self.generate_id();
        info!("Client {} connected from {}", id, addr);
        self.clients
            .insert(id.clone(), Connection::new(id.clone(), addr, sender));

        Some(id)
    }

    /// Removes a connection, returning true only the first time
    pub fn remove_client(&mut self, id: &PeerId) -> bool {
        if let Some(client) = self.clients.remove(id) {
            info!(
                "Client {} disconnected after {:.1}s",
                client.id,
                client.connected_at.elapsed().as_secs_f32()
            );
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: &PeerId) -> Option<&Connection> {
        self.clients.get(id)
    }

    /// Returns all live identities
    pub fn ids(&self) -> Vec<PeerId> {
        self.clients.keys().cloned().collect()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn generate_id(&self) -> PeerId {
        let mut rng = rand::thread_rng();
        loop {
            let candidate: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(ID_LENGTH)
                .map(char::from)
                .collect();
            let id = PeerId::new(candidate);
            if !self.clients.contains_key(&id) {
                return id;
            }
        }
    }
}

impl ConnectionRegistry for ClientManager {
    fn for_each_other<'a>(
        &'a self,
        excluding: Option<&'a PeerId>,
    ) -> Box<dyn Iterator<Item = &'a PeerId> + 'a> {
        Box::new(
            self.clients
                .keys()
                .filter(move |id| Some(*id) != excluding),
        )
    }

    fn contains(&self, id: &PeerId) -> bool {
        self.clients.contains_key(id)
    }

    fn send_to(&self, id: &PeerId, packet: ServerPacket) -> bool {
        match self.clients.get(id) {
            Some(client) => client.send(packet),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(5);
        assert_eq!(manager.max_clients(), 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_add_client() {
        let mut manager = ClientManager::new(2);
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);

        let id = manager.add_client(test_addr(), tx).unwrap();
        assert_eq!(id.as_str().len(), ID_LENGTH);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get(&id).unwrap().addr, test_addr());
    }

    #[test]
    fn test_identities_are_unique() {
        let mut manager = ClientManager::new(64);
        let mut receivers = Vec::new();

        for _ in 0..64 {
            let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
            receivers.push(rx);
            manager.add_client(test_addr(), tx).unwrap();
        }

        let mut ids = manager.ids();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);
        let (tx1, _rx1) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let (tx2, _rx2) = mpsc::channel(OUTBOUND_QUEUE_SIZE);

        assert!(manager.add_client(test_addr(), tx1).is_some());
        assert!(manager.add_client(test_addr2(), tx2).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_client_only_once() {
        let mut manager = ClientManager::new(2);
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let id = manager.add_client(test_addr(), tx).unwrap();

        assert!(manager.remove_client(&id));
        assert!(!manager.remove_client(&id));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_remove_nonexistent_client() {
        let mut manager = ClientManager::new(2);
        assert!(!manager.remove_client(&PeerId::from("missing")));
    }

    #[test]
    fn test_for_each_other_excludes_source() {
        let mut manager = ClientManager::new(3);
        let (tx1, _rx1) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let (tx2, _rx2) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let (tx3, _rx3) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let a = manager.add_client(test_addr(), tx1).unwrap();
        let b = manager.add_client(test_addr(), tx2).unwrap();
        let c = manager.add_client(test_addr2(), tx3).unwrap();

        let mut others: Vec<PeerId> = manager.for_each_other(Some(&a)).cloned().collect();
        others.sort();
        let mut expected = vec![b, c];
        expected.sort();
        assert_eq!(others, expected);

        assert_eq!(manager.for_each_other(None).count(), 3);
    }

    #[test]
    fn test_send_to_closed_queue() {
        let mut manager = ClientManager::new(2);
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let id = manager.add_client(test_addr(), tx).unwrap();
        drop(rx);

        assert!(!manager.send_to(&id, ServerPacket::UserDisconnected(PeerId::from("x"))));
        assert!(!manager.send_to(&PeerId::from("missing"), ServerPacket::UserDisconnected(PeerId::from("x"))));
    }

    #[test]
    fn test_send_to_full_queue_drops_packets() {
        let mut manager = ClientManager::new(2);
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let id = manager.add_client(test_addr(), tx).unwrap();
        let packet = ServerPacket::UserDisconnected(PeerId::from("x"));

        let accepted = (0..OUTBOUND_QUEUE_SIZE * 4)
            .filter(|_| manager.send_to(&id, packet.clone()))
            .count();
        assert_eq!(accepted, OUTBOUND_QUEUE_SIZE);

        // Draining one slot lets the next packet through
        assert_eq!(rx.try_recv().unwrap(), packet);
        assert!(manager.send_to(&id, packet.clone()));
        assert!(!manager.send_to(&id, packet));
    }

    #[test]
    fn test_broadcast_except_counts_deliveries() {
        let mut manager = ClientManager::new(3);
        let (tx1, mut rx1) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let (tx2, mut rx2) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let a = manager.add_client(test_addr(), tx1).unwrap();
        let _b = manager.add_client(test_addr2(), tx2).unwrap();

        let packet = ServerPacket::UserDisconnected(PeerId::from("z"));
        assert_eq!(manager.broadcast_except(Some(&a), &packet), 1);

        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), packet);
    }
}
