use crate::geolocation::{GeolocationOptions, GeolocationSource};
use crate::markers::MarkerLayer;
use crate::reconciler::PeerStateReconciler;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ServerPacket, WS_PATH};
use std::future::Future;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Builds the WebSocket URL for a `host:port` server address
pub fn ws_url(server: &str) -> String {
    if server.starts_with("ws://") || server.starts_with("wss://") {
        server.to_string()
    } else {
        format!("ws://{}{}", server, WS_PATH)
    }
}

pub struct Client<L: MarkerLayer> {
    url: String,
    reconciler: PeerStateReconciler<L>,
    connected: bool,
}

impl<L: MarkerLayer> Client<L> {
    pub fn new(server: &str, reconciler: PeerStateReconciler<L>) -> Self {
        Client {
            url: ws_url(server),
            reconciler,
            connected: false,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn reconciler(&self) -> &PeerStateReconciler<L> {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut PeerStateReconciler<L> {
        &mut self.reconciler
    }

    fn handle_frame(&mut self, text: &str) {
        match shared::decode::<ServerPacket>(text) {
            Ok(packet) => self.reconciler.apply(packet),
            Err(e) => warn!("Ignoring undecodable message from relay: {}", e),
        }
    }

    /// Runs until the relay closes the connection or `shutdown` completes
    ///
    /// Relay messages and local readings are handled one at a time on this
    /// task, so reconciler updates never interleave.
    pub async fn run<G, S>(
        &mut self,
        source: G,
        options: GeolocationOptions,
        shutdown: S,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        G: GeolocationSource,
        S: Future<Output = ()>,
    {
        info!("Connecting to {}...", self.url);
        let (ws, _) = connect_async(self.url.as_str()).await?;
        self.connected = true;
        info!("Connected to {}", self.url);

        let (mut sink, mut stream) = ws.split();
        let mut readings = source.watch_position(options);
        let mut source_open = true;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Relay closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Connection error: {}", e);
                        break;
                    }
                },

                reading = readings.recv(), if source_open => match reading {
                    Some(Ok(coords)) => {
                        let packet = self.reconciler.on_local_position_change(coords);
                        let text = shared::encode(&packet)?;
                        sink.send(Message::Text(text.into())).await?;
                    }
                    Some(Err(e)) => self.reconciler.on_location_error(&e),
                    None => {
                        info!("Location source finished");
                        source_open = false;
                    }
                },

                _ = &mut shutdown => {
                    info!("Disconnecting...");
                    break;
                }
            }
        }

        self.connected = false;
        if let Err(e) = sink.close().await {
            debug!("Failed to close connection to {}: {}", self.url, e);
        }
        info!("Disconnected with {} peers on the map", self.reconciler.len());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::LoggingMarkerLayer;
    use crate::reconciler::ReconcilerConfig;
    use shared::PeerId;
    use tokio_test::assert_err;

    fn test_client() -> Client<LoggingMarkerLayer> {
        let reconciler = PeerStateReconciler::new(LoggingMarkerLayer::new(), ReconcilerConfig::default());
        Client::new("127.0.0.1:3000", reconciler)
    }

    #[test]
    fn test_ws_url() {
        assert_eq!(ws_url("127.0.0.1:3000"), "ws://127.0.0.1:3000/ws");
        assert_eq!(ws_url("ws://example.com/ws"), "ws://example.com/ws");
        assert_eq!(ws_url("wss://example.com/ws"), "wss://example.com/ws");
    }

    #[test]
    fn test_new_client_is_disconnected() {
        let client = test_client();
        assert!(!client.is_connected());
        assert_eq!(client.url(), "ws://127.0.0.1:3000/ws");
        assert!(client.reconciler().is_empty());
    }

    #[test]
    fn test_handle_frame_applies_packets() {
        let mut client = test_client();

        client.handle_frame(r#"{"event":"connected","data":{"id":"me"}}"#);
        client.handle_frame(r#"{"event":"receive-location","data":{"id":"a","latitude":1.0,"longitude":2.0}}"#);
        assert_eq!(client.reconciler().local_id(), Some(&PeerId::from("me")));
        assert_eq!(client.reconciler().len(), 1);
        assert_eq!(client.reconciler().layer().live_markers(), 1);

        client.handle_frame(r#"{"event":"user-disconnected","data":"a"}"#);
        assert!(client.reconciler().is_empty());
        assert_eq!(client.reconciler().layer().live_markers(), 0);
    }

    #[test]
    fn test_handle_frame_ignores_garbage() {
        let mut client = test_client();
        client.handle_frame("{");
        client.handle_frame(r#"{"event":"teleport","data":{}}"#);
        assert!(client.reconciler().is_empty());
    }

    #[tokio::test]
    async fn test_run_fails_without_server() {
        let mut client = Client::new(
            "127.0.0.1:1",
            PeerStateReconciler::new(LoggingMarkerLayer::new(), ReconcilerConfig::default()),
        );
        let track = crate::geolocation::ScriptedTrack::new(Vec::new(), std::time::Duration::from_millis(1));

        assert_err!(
            client
                .run(track, GeolocationOptions::default(), std::future::pending())
                .await
        );
        assert!(!client.is_connected());
    }
}
