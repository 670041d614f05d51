use log::{debug, info};
use shared::{Coordinates, PeerId};
use std::fmt;

/// What a marker stands for on the map
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarkerLabel {
    Local,
    Peer(PeerId),
}

impl fmt::Display for MarkerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerLabel::Local => f.write_str("you"),
            MarkerLabel::Peer(id) => write!(f, "peer {}", id),
        }
    }
}

/// A map surface that can place, move and remove markers
///
/// Markers are handles owned by the caller; `remove_marker` consumes the
/// handle so a released marker cannot be moved again.
pub trait MarkerLayer {
    type Marker;

    fn create_marker(&mut self, label: &MarkerLabel, coords: Coordinates) -> Self::Marker;
    fn move_marker(&mut self, marker: &mut Self::Marker, coords: Coordinates);
    fn remove_marker(&mut self, marker: Self::Marker);
    fn set_view(&mut self, coords: Coordinates);
}

#[derive(Debug)]
pub struct LoggedMarker {
    pub handle: u64,
    pub label: MarkerLabel,
    pub position: Coordinates,
}

/// Headless map surface that logs every marker operation
#[derive(Debug, Default)]
pub struct LoggingMarkerLayer {
    next_handle: u64,
    live: usize,
    view: Option<Coordinates>,
}

impl LoggingMarkerLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Markers created and not yet removed
    pub fn live_markers(&self) -> usize {
        self.live
    }

    pub fn view(&self) -> Option<Coordinates> {
        self.view
    }
}

impl MarkerLayer for LoggingMarkerLayer {
    type Marker = LoggedMarker;

    fn create_marker(&mut self, label: &MarkerLabel, coords: Coordinates) -> LoggedMarker {
        self.next_handle += 1;
        self.live += 1;
        info!(
            "Marker #{} for {} placed at ({:.6}, {:.6})",
            self.next_handle, label, coords.latitude, coords.longitude
        );
        LoggedMarker {
            handle: self.next_handle,
            label: label.clone(),
            position: coords,
        }
    }

    fn move_marker(&mut self, marker: &mut LoggedMarker, coords: Coordinates) {
        debug!(
            "Marker #{} for {} moved to ({:.6}, {:.6})",
            marker.handle, marker.label, coords.latitude, coords.longitude
        );
        marker.position = coords;
    }

    fn remove_marker(&mut self, marker: LoggedMarker) {
        self.live = self.live.saturating_sub(1);
        info!("Marker #{} for {} removed", marker.handle, marker.label);
    }

    fn set_view(&mut self, coords: Coordinates) {
        self.view = Some(coords);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_layer_tracks_live_markers() {
        let mut layer = LoggingMarkerLayer::new();
        let label = MarkerLabel::Peer(PeerId::from("a"));

        let mut first = layer.create_marker(&label, Coordinates::new(1.0, 2.0));
        let second = layer.create_marker(&MarkerLabel::Local, Coordinates::new(3.0, 4.0));
        assert_eq!(layer.live_markers(), 2);
        assert_ne!(first.handle, second.handle);

        layer.move_marker(&mut first, Coordinates::new(5.0, 6.0));
        assert_eq!(first.position, Coordinates::new(5.0, 6.0));
        assert_eq!(layer.live_markers(), 2);

        layer.remove_marker(first);
        layer.remove_marker(second);
        assert_eq!(layer.live_markers(), 0);
    }

    #[test]
    fn test_set_view() {
        let mut layer = LoggingMarkerLayer::new();
        assert!(layer.view().is_none());
        layer.set_view(Coordinates::new(7.0, 8.0));
        assert_eq!(layer.view(), Some(Coordinates::new(7.0, 8.0)));
    }

    #[test]
    fn test_label_display() {
        assert_eq!(MarkerLabel::Local.to_string(), "you");
        assert_eq!(MarkerLabel::Peer(PeerId::from("xyz")).to_string(), "peer xyz");
    }
}
