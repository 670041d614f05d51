//! Presence relay: tags position updates with their source and fans them out

use log::{debug, warn};
use shared::{ClientPacket, Coordinates, PeerId, PeerLocation, ServerPacket};

/// Read access to the live connection set, plus delivery
///
/// The relay never adds or removes connections through this trait.
pub trait ConnectionRegistry {
    /// Iterates live identities, skipping `excluding` when given
    fn for_each_other<'a>(
        &'a self,
        excluding: Option<&'a PeerId>,
    ) -> Box<dyn Iterator<Item = &'a PeerId> + 'a>;

    fn contains(&self, id: &PeerId) -> bool;

    /// Queues a packet for one connection, returning whether it was accepted
    fn send_to(&self, id: &PeerId, packet: ServerPacket) -> bool;

    /// Sends `packet` to every live connection except `excluding`
    ///
    /// Returns how many connections accepted the packet.
    fn broadcast_except(&self, excluding: Option<&PeerId>, packet: &ServerPacket) -> usize {
        self.for_each_other(excluding)
            .filter(|id| self.send_to(id, packet.clone()))
            .count()
    }
}

/// Stateless fan-out of position updates and disconnect notices
#[derive(Debug, Default, Clone, Copy)]
pub struct PresenceRelay;

impl PresenceRelay {
    pub fn new() -> Self {
        Self
    }

    /// Dispatches a decoded client packet from `source`
    pub fn on_packet<R: ConnectionRegistry>(
        &self,
        registry: &R,
        source: &PeerId,
        packet: ClientPacket,
        seq: Option<u64>,
    ) -> usize {
        match packet {
            ClientPacket::SendLocation(coords) => {
                self.on_position_update(registry, source, coords, seq)
            }
        }
    }

    /// Relays a position to every connection except its originator
    ///
    /// The outbound id always comes from the connection, never the payload.
    /// Updates from unknown sources or with invalid coordinates are dropped.
    pub fn on_position_update<R: ConnectionRegistry>(
        &self,
        registry: &R,
        source: &PeerId,
        coords: Coordinates,
        seq: Option<u64>,
    ) -> usize {
        if !registry.contains(source) {
            warn!("Dropping update from unregistered connection {}", source);
            return 0;
        }

        if let Err(e) = coords.validate() {
            warn!("Dropping update from {}: {}", source, e);
            return 0;
        }

        let packet = ServerPacket::ReceiveLocation(PeerLocation::new(source.clone(), coords, seq));
        let delivered = registry.broadcast_except(Some(source), &packet);

        debug!(
            "Relayed ({:.6}, {:.6}) from {} to {} peers",
            coords.latitude, coords.longitude, source, delivered
        );
        delivered
    }

    /// Announces a lost connection to everyone still connected
    ///
    /// Called after the connection has left the registry.
    pub fn on_disconnect<R: ConnectionRegistry>(&self, registry: &R, id: &PeerId) -> usize {
        let packet = ServerPacket::UserDisconnected(id.clone());
        let delivered = registry.broadcast_except(None, &packet);
        debug!("Announced departure of {} to {} peers", id, delivered);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_manager::{ClientManager, OUTBOUND_QUEUE_SIZE};
    use assert_approx_eq::assert_approx_eq;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    type Inbox = mpsc::Receiver<ServerPacket>;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn join(manager: &mut ClientManager) -> (PeerId, Inbox) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let id = manager.add_client(test_addr(), tx).unwrap();
        (id, rx)
    }

    fn drain(inbox: &mut Inbox) -> Vec<ServerPacket> {
        let mut packets = Vec::new();
        while let Ok(packet) = inbox.try_recv() {
            packets.push(packet);
        }
        packets
    }

    #[test]
    fn test_update_reaches_everyone_but_source() {
        let mut manager = ClientManager::new(8);
        let (a, mut inbox_a) = join(&mut manager);
        let (_b, mut inbox_b) = join(&mut manager);
        let (_c, mut inbox_c) = join(&mut manager);
        let relay = PresenceRelay::new();

        let delivered = relay.on_position_update(&manager, &a, Coordinates::new(10.0, 20.0), None);
        assert_eq!(delivered, 2);

        assert!(drain(&mut inbox_a).is_empty());
        for inbox in [&mut inbox_b, &mut inbox_c] {
            let packets = drain(inbox);
            assert_eq!(packets.len(), 1);
            match &packets[0] {
                ServerPacket::ReceiveLocation(location) => {
                    assert_eq!(location.id, a);
                    assert_approx_eq!(location.latitude, 10.0);
                    assert_approx_eq!(location.longitude, 20.0);
                }
                other => panic!("Unexpected packet {:?}", other),
            }
        }
    }

    #[test]
    fn test_update_with_single_connection_goes_nowhere() {
        let mut manager = ClientManager::new(8);
        let (a, mut inbox_a) = join(&mut manager);

        let delivered = PresenceRelay.on_position_update(&manager, &a, Coordinates::new(1.0, 1.0), None);
        assert_eq!(delivered, 0);
        assert!(drain(&mut inbox_a).is_empty());
    }

    #[test]
    fn test_invalid_coordinates_are_dropped() {
        let mut manager = ClientManager::new(8);
        let (a, _inbox_a) = join(&mut manager);
        let (_b, mut inbox_b) = join(&mut manager);

        let relay = PresenceRelay::new();
        assert_eq!(relay.on_position_update(&manager, &a, Coordinates::new(91.0, 0.0), None), 0);
        assert_eq!(relay.on_position_update(&manager, &a, Coordinates::new(f64::NAN, 0.0), None), 0);
        assert!(drain(&mut inbox_b).is_empty());
    }

    #[test]
    fn test_unregistered_source_is_dropped() {
        let mut manager = ClientManager::new(8);
        let (_b, mut inbox_b) = join(&mut manager);

        let ghost = PeerId::from("ghost");
        assert_eq!(
            PresenceRelay.on_position_update(&manager, &ghost, Coordinates::new(1.0, 2.0), None),
            0
        );
        assert!(drain(&mut inbox_b).is_empty());
    }

    #[test]
    fn test_per_source_order_and_seq_are_preserved() {
        let mut manager = ClientManager::new(8);
        let (a, _inbox_a) = join(&mut manager);
        let (_b, mut inbox_b) = join(&mut manager);
        let relay = PresenceRelay::new();

        for step in 1..=5u64 {
            let packet = ClientPacket::SendLocation(Coordinates::new(step as f64, 0.0));
            relay.on_packet(&manager, &a, packet, Some(step));
        }

        let seqs: Vec<u64> = drain(&mut inbox_b)
            .into_iter()
            .map(|packet| match packet {
                ServerPacket::ReceiveLocation(location) => {
                    assert_approx_eq!(location.latitude, location.seq.unwrap() as f64);
                    location.seq.unwrap()
                }
                other => panic!("Unexpected packet {:?}", other),
            })
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_disconnect_is_announced_to_all_remaining() {
        let mut manager = ClientManager::new(8);
        let (a, _inbox_a) = join(&mut manager);
        let (_b, mut inbox_b) = join(&mut manager);
        let (_c, mut inbox_c) = join(&mut manager);

        assert!(manager.remove_client(&a));
        let delivered = PresenceRelay.on_disconnect(&manager, &a);
        assert_eq!(delivered, 2);

        for inbox in [&mut inbox_b, &mut inbox_c] {
            assert_eq!(drain(inbox), vec![ServerPacket::UserDisconnected(a.clone())]);
        }
    }

    /// Registry double that records deliveries without channels
    struct RecordingRegistry {
        ids: Vec<PeerId>,
        sent: std::cell::RefCell<Vec<(PeerId, ServerPacket)>>,
    }

    impl ConnectionRegistry for RecordingRegistry {
        fn for_each_other<'a>(
            &'a self,
            excluding: Option<&'a PeerId>,
        ) -> Box<dyn Iterator<Item = &'a PeerId> + 'a> {
            Box::new(self.ids.iter().filter(move |id| Some(*id) != excluding))
        }

        fn contains(&self, id: &PeerId) -> bool {
            self.ids.contains(id)
        }

        fn send_to(&self, id: &PeerId, packet: ServerPacket) -> bool {
            self.sent.borrow_mut().push((id.clone(), packet));
            true
        }
    }

    #[test]
    fn test_relay_depends_only_on_registry_capability() {
        let registry = RecordingRegistry {
            ids: vec![PeerId::from("a"), PeerId::from("b")],
            sent: Default::default(),
        };

        PresenceRelay.on_position_update(&registry, &PeerId::from("a"), Coordinates::new(5.0, 6.0), None);

        let sent = registry.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, PeerId::from("b"));
    }
}
