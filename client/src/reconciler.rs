//! Client-side reconciliation of relayed presence events into marker state
//!
//! The reconciler owns a map from peer identity to [`PeerRecord`] and is the
//! only code allowed to create, move or delete those records. Every record
//! holds exactly one live marker; the marker is released on the map before the
//! record is dropped.
//!
//! The local client's own position never enters the peer map. It is tracked
//! separately and drawn with its own marker.

use crate::geolocation::LocationError;
use crate::markers::{MarkerLabel, MarkerLayer};
use log::{debug, error, info, warn};
use shared::{ClientPacket, Coordinates, PeerId, PeerLocation, ServerPacket};
use std::collections::HashMap;

/// How updates for the same peer are ordered against each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderingPolicy {
    /// Whatever arrived last is shown
    #[default]
    LastArrivalWins,
    /// Updates whose `seq` is not newer than the last applied one are ignored
    DropStale,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    pub ordering: OrderingPolicy,
    /// Recentre the view on every applied peer update
    pub follow_updates: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            ordering: OrderingPolicy::LastArrivalWins,
            follow_updates: true,
        }
    }
}

/// Last known state of one remote peer
#[derive(Debug)]
pub struct PeerRecord<M> {
    pub id: PeerId,
    pub latitude: f64,
    pub longitude: f64,
    pub marker: M,
    last_seq: Option<u64>,
}

impl<M> PeerRecord<M> {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }
}

#[derive(Debug)]
struct LocalRecord<M> {
    coords: Coordinates,
    marker: M,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Created,
    Moved,
    /// Dropped by `OrderingPolicy::DropStale`
    Stale,
    /// The update carried our own identity
    IgnoredSelf,
}

pub struct PeerStateReconciler<L: MarkerLayer> {
    layer: L,
    config: ReconcilerConfig,
    local_id: Option<PeerId>,
    local: Option<LocalRecord<L::Marker>>,
    peers: HashMap<PeerId, PeerRecord<L::Marker>>,
}

impl<L: MarkerLayer> PeerStateReconciler<L> {
    pub fn new(layer: L, config: ReconcilerConfig) -> Self {
        Self {
            layer,
            config,
            local_id: None,
            local: None,
            peers: HashMap::new(),
        }
    }

    /// Applies any event received from the relay
    pub fn apply(&mut self, packet: ServerPacket) {
        match packet {
            ServerPacket::Connected { id } => self.set_local_id(id),
            ServerPacket::ReceiveLocation(location) => {
                self.on_receive_update(location);
            }
            ServerPacket::UserDisconnected(id) => {
                self.on_receive_disconnect(&id);
            }
        }
    }

    /// Records the identity the relay assigned to this client
    pub fn set_local_id(&mut self, id: PeerId) {
        info!("Relay assigned us id {}", id);
        // Keep self out of the peer map even if an update raced the id
        self.remove_peer(&id);
        self.local_id = Some(id);
    }

    pub fn local_id(&self) -> Option<&PeerId> {
        self.local_id.as_ref()
    }

    pub fn on_receive_update(&mut self, location: PeerLocation) -> UpdateOutcome {
        if self.local_id.as_ref() == Some(&location.id) {
            debug!("Ignoring relayed copy of our own position");
            return UpdateOutcome::IgnoredSelf;
        }

        let coords = location.coordinates();
        let outcome = match self.peers.get_mut(&location.id) {
            Some(record) => {
                if self.config.ordering == OrderingPolicy::DropStale
                    && is_stale(record.last_seq, location.seq)
                {
                    debug!(
                        "Dropping stale update {:?} for {} (last applied {:?})",
                        location.seq, location.id, record.last_seq
                    );
                    return UpdateOutcome::Stale;
                }

                record.latitude = coords.latitude;
                record.longitude = coords.longitude;
                if location.seq.is_some() {
                    record.last_seq = location.seq;
                }
                self.layer.move_marker(&mut record.marker, coords);
                UpdateOutcome::Moved
            }
            None => {
                let label = MarkerLabel::Peer(location.id.clone());
                let marker = self.layer.create_marker(&label, coords);
                info!("Peer {} appeared", location.id);
                self.peers.insert(
                    location.id.clone(),
                    PeerRecord {
                        id: location.id,
                        latitude: coords.latitude,
                        longitude: coords.longitude,
                        marker,
                        last_seq: location.seq,
                    },
                );
                UpdateOutcome::Created
            }
        };

        if self.config.follow_updates {
            self.layer.set_view(coords);
        }

        outcome
    }

    /// Removes a peer and releases its marker; unknown ids are a no-op
    pub fn on_receive_disconnect(&mut self, id: &PeerId) -> bool {
        let removed = self.remove_peer(id);
        if removed {
            info!("Peer {} left", id);
        } else {
            debug!("Disconnect for unknown peer {}", id);
        }
        removed
    }

    /// Moves our own marker and returns the update to send to the relay
    pub fn on_local_position_change(&mut self, coords: Coordinates) -> ClientPacket {
        match &mut self.local {
            Some(local) => {
                local.coords = coords;
                self.layer.move_marker(&mut local.marker, coords);
            }
            None => {
                let marker = self.layer.create_marker(&MarkerLabel::Local, coords);
                self.local = Some(LocalRecord { coords, marker });
            }
        }

        ClientPacket::SendLocation(coords)
    }

    /// Location failures are only reported; the source keeps polling on its own
    pub fn on_location_error(&self, err: &LocationError) {
        warn!("Location unavailable: {}", err);
    }

    /// Centres the view on our own marker, if we have a position yet
    pub fn focus_local(&mut self) -> Option<Coordinates> {
        match &self.local {
            Some(local) => {
                let coords = local.coords;
                self.layer.set_view(coords);
                Some(coords)
            }
            None => {
                error!("Current location not yet available.");
                None
            }
        }
    }

    /// Releases every marker, peers and our own
    pub fn clear(&mut self) {
        for (_, record) in self.peers.drain() {
            self.layer.remove_marker(record.marker);
        }
        if let Some(local) = self.local.take() {
            self.layer.remove_marker(local.marker);
        }
    }

    pub fn peer(&self, id: &PeerId) -> Option<&PeerRecord<L::Marker>> {
        self.peers.get(id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord<L::Marker>> {
        self.peers.values()
    }

    pub fn local_position(&self) -> Option<Coordinates> {
        self.local.as_ref().map(|local| local.coords)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }

    fn remove_peer(&mut self, id: &PeerId) -> bool {
        match self.peers.remove(id) {
            Some(record) => {
                self.layer.remove_marker(record.marker);
                true
            }
            None => false,
        }
    }
}

fn is_stale(last: Option<u64>, incoming: Option<u64>) -> bool {
    match (last, incoming) {
        (Some(last), Some(incoming)) => incoming <= last,
        _ => false,
    }
}
