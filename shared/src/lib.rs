use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
pub const WS_PATH: &str = "/ws";
pub const MAX_LATITUDE: f64 = 90.0;
pub const MAX_LONGITUDE: f64 = 180.0;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode packet: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode packet: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("coordinates out of range: ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
}

/// Opaque connection identity assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Rejects non-finite values and anything outside the WGS84 degree ranges.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let lat_ok = self.latitude.is_finite() && self.latitude.abs() <= MAX_LATITUDE;
        let lon_ok = self.longitude.is_finite() && self.longitude.abs() <= MAX_LONGITUDE;

        if lat_ok && lon_ok {
            Ok(())
        } else {
            Err(ProtocolError::InvalidCoordinates {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

/// A relayed position, tagged with the identity of the connection it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerLocation {
    pub id: PeerId,
    pub latitude: f64,
    pub longitude: f64,
    /// Per-source arrival counter stamped by the server transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl PeerLocation {
    pub fn new(id: PeerId, coords: Coordinates, seq: Option<u64>) -> Self {
        Self {
            id,
            latitude: coords.latitude,
            longitude: coords.longitude,
            seq,
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// Events a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientPacket {
    SendLocation(Coordinates),
}

/// Events the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerPacket {
    Connected { id: PeerId },
    ReceiveLocation(PeerLocation),
    UserDisconnected(PeerId),
}

pub fn encode<T: Serialize>(packet: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(packet).map_err(ProtocolError::Encode)
}

pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}
