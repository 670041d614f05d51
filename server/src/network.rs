//! Server network layer: HTTP entry point, WebSocket transport and the event loop

use crate::client_manager::{ClientManager, OUTBOUND_QUEUE_SIZE};
use crate::relay::{ConnectionRegistry, PresenceRelay};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientPacket, PeerId, ServerPacket, WS_PATH};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Connect {
        addr: SocketAddr,
        sender: mpsc::Sender<ServerPacket>,
        reply: oneshot::Sender<Option<PeerId>>,
    },
    PacketReceived {
        id: PeerId,
        packet: ClientPacket,
        seq: u64,
    },
    Disconnected {
        id: PeerId,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub max_clients: usize,
    /// How often the server pings each connection
    pub ping_interval: Duration,
    /// Extra silence tolerated after a ping before the connection is dropped
    pub ping_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: format!("127.0.0.1:{}", shared::DEFAULT_PORT),
            max_clients: 256,
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(20),
        }
    }
}

/// Stops a running [`Server`] from another task
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server loop already stopped");
        }
    }
}

/// State handed to every HTTP handler
#[derive(Clone)]
struct ConnectionContext {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    ping_interval: Duration,
    ping_timeout: Duration,
}

/// Relay server owning the connection table and the single event loop
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    config: ServerConfig,
    clients: ClientManager,
    relay: PresenceRelay,
    http_task: Option<JoinHandle<()>>,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        if config.ping_interval.is_zero() {
            return Err("ping interval must be greater than zero".into());
        }

        let listener = TcpListener::bind(&config.addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            clients: ClientManager::new(config.max_clients),
            relay: PresenceRelay::new(),
            config,
            http_task: None,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Spawns the HTTP task serving the page and upgrading WebSocket requests
    fn spawn_http_listener(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = self
            .listener
            .take()
            .ok_or("server listener already consumed")?;

        let context = ConnectionContext {
            server_tx: self.server_tx.clone(),
            ping_interval: self.config.ping_interval,
            ping_timeout: self.config.ping_timeout,
        };

        let router = Router::new()
            .route("/", get(index_handler))
            .route(WS_PATH, get(ws_handler))
            .with_state(context);

        self.http_task = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            {
                error!("HTTP listener failed: {}", e);
            }
        }));

        Ok(())
    }

    fn handle_connect(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::Sender<ServerPacket>,
        reply: oneshot::Sender<Option<PeerId>>,
    ) {
        let id = self.clients.add_client(addr, sender);

        match &id {
            Some(id) => {
                self.clients
                    .send_to(id, ServerPacket::Connected { id: id.clone() });
            }
            None => warn!(
                "Rejecting connection from {}: server full ({} clients)",
                addr,
                self.clients.max_clients()
            ),
        }

        if let Err(Some(id)) = reply.send(id) {
            // The connection task vanished before it learned its id; nothing was
            // announced for it, so it leaves silently.
            self.clients.remove_client(&id);
        }
    }

    fn handle_packet(&mut self, id: &PeerId, packet: ClientPacket, seq: u64) {
        self.relay.on_packet(&self.clients, id, packet, Some(seq));
    }

    fn handle_disconnect(&mut self, id: &PeerId) {
        if self.clients.remove_client(id) {
            self.relay.on_disconnect(&self.clients, id);
        }
    }

    /// Main server loop: handles one message at a time until shutdown
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.spawn_http_listener()?;

        info!("Server started successfully");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::Connect {
                    addr,
                    sender,
                    reply,
                } => self.handle_connect(addr, sender, reply),
                ServerMessage::PacketReceived { id, packet, seq } => {
                    self.handle_packet(&id, packet, seq)
                }
                ServerMessage::Disconnected { id } => self.handle_disconnect(&id),
                ServerMessage::Shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        if let Some(task) = self.http_task.take() {
            task.abort();
        }

        Ok(())
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(context): State<ConnectionContext>,
) -> impl IntoResponse {
    debug!("Upgrade request from {}", addr);
    ws.on_upgrade(move |socket| handle_socket(socket, addr, context))
}

/// Per-connection task: registers, then pumps frames in both directions
async fn handle_socket(mut socket: WebSocket, addr: SocketAddr, context: ConnectionContext) {
    let (tx, mut rx) = mpsc::channel::<ServerPacket>(OUTBOUND_QUEUE_SIZE);
    let (reply_tx, reply_rx) = oneshot::channel();

    if context
        .server_tx
        .send(ServerMessage::Connect {
            addr,
            sender: tx,
            reply: reply_tx,
        })
        .is_err()
    {
        return;
    }

    let id = match reply_rx.await {
        Ok(Some(id)) => id,
        _ => {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let ping_interval = context.ping_interval;
    let writer_id = id.clone();

    let writer = tokio::spawn(async move {
        let mut heartbeat = interval(ping_interval);
        // The first tick fires immediately
        heartbeat.tick().await;

        loop {
            tokio::select! {
                packet = rx.recv() => {
                    let Some(packet) = packet else { break };
                    match shared::encode(&packet) {
                        Ok(text) => {
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => error!("Failed to encode packet: {}", e),
                    }
                }
                _ = heartbeat.tick() => {
                    if sink.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = sink.close().await {
            debug!("Failed to close socket for {}: {}", writer_id, e);
        }
    });

    let idle_limit = context.ping_interval + context.ping_timeout;
    let mut seq = 0u64;

    loop {
        let frame = match timeout(idle_limit, stream.next()).await {
            Ok(frame) => frame,
            Err(_) => {
                warn!("Client {} timed out after {:?} of silence", id, idle_limit);
                break;
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => match shared::decode::<ClientPacket>(text.as_str()) {
                Ok(packet) => {
                    seq += 1;
                    if context
                        .server_tx
                        .send(ServerMessage::PacketReceived {
                            id: id.clone(),
                            packet,
                            seq,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => warn!("Dropping malformed packet from {}: {}", id, e),
            },
            Some(Ok(Message::Binary(_))) => warn!("Ignoring binary frame from {}", id),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!("WebSocket error from {}: {}", id, e);
                break;
            }
        }
    }

    if context
        .server_tx
        .send(ServerMessage::Disconnected { id: id.clone() })
        .is_err()
    {
        // Loop is gone, so nobody will drop our queue sender
        writer.abort();
    }
}
