//! # Location Relay Server Library
//!
//! This library provides the server half of the location-sharing relay. Clients
//! report their position over a WebSocket; the server tags each report with the
//! sender's connection identity and rebroadcasts it to every other connected
//! client. When a connection is lost, the remaining clients are told to drop
//! that peer.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! Each WebSocket connection runs in its own task, but those tasks only read and
//! write frames. Everything that touches the connection table is funnelled
//! through one channel into a single loop, so connect, update and disconnect
//! handlers run to completion one at a time.
//!
//! ### Stateless Relay
//! The relay keeps no positions. It reads the live connection set to fan out
//! and forgets each update as soon as it is queued. Reconciling the stream into
//! a consistent view of peers is the client's job.
//!
//! ### Ordering
//! Frames from one connection are handled in the order they were read, and each
//! recipient's outbound queue is drained in order, so every peer sees a given
//! source's updates in the order that source sent them. Updates from different
//! sources may interleave.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! - Identity assignment and capacity limits
//! - Per-connection outbound queues
//! - The `ConnectionRegistry` implementation used for fan-out
//!
//! ### Relay Module (`relay`)
//! - `PresenceRelay`: position fan-out and disconnect notices
//! - Coordinate validation before anything is relayed
//!
//! ### Network Module (`network`)
//! - HTTP entry point serving the browser page at `/`
//! - WebSocket upgrade at `/ws`, frame decoding and heartbeats
//! - The main event loop and shutdown handle
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut server = Server::new(ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod network;
pub mod relay;
