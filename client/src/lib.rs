//! # Location Relay Client Library
//!
//! This library provides the client half of the location-sharing relay. It
//! reports the device position to the relay and folds the relay's stream of
//! peer events into a consistent set of map markers.
//!
//! ## Architecture Overview
//!
//! ### Reconciliation
//! The relay sends three kinds of events: our own identity, a peer's new
//! position, and a peer's departure. The reconciler keeps one record per peer,
//! creating it on the first position, moving its marker on every later one and
//! releasing the marker when the peer leaves. Our own identity never enters
//! the peer map.
//!
//! ### Ordering
//! The relay preserves each source's order but interleaves different sources.
//! By default the last update to arrive for a peer wins. The relay also stamps
//! a per-source sequence number, and `OrderingPolicy::DropStale` uses it to
//! ignore anything older than what is already shown.
//!
//! ### Event Loop
//! Relay frames and local position readings are two independent sources
//! multiplexed onto one task, so handlers run to completion one at a time.
//!
//! ## Module Organization
//!
//! ### Reconciler Module (`reconciler`)
//! - Peer records and their markers
//! - Local marker tracking and outbound position updates
//! - Ordering policy
//!
//! ### Markers Module (`markers`)
//! - The `MarkerLayer` map surface abstraction
//! - A headless surface that logs marker operations
//!
//! ### Geolocation Module (`geolocation`)
//! - Position source trait and watch options
//! - A simulated random walk and a scripted track replay
//!
//! ### Network Module (`network`)
//! - WebSocket connection to the relay
//! - The client event loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::geolocation::{GeolocationOptions, RandomWalk};
//! use client::markers::LoggingMarkerLayer;
//! use client::network::Client;
//! use client::reconciler::{PeerStateReconciler, ReconcilerConfig};
//! use shared::Coordinates;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let reconciler = PeerStateReconciler::new(LoggingMarkerLayer::new(), ReconcilerConfig::default());
//!     let mut client = Client::new("127.0.0.1:3000", reconciler);
//!
//!     let source = RandomWalk::new(Coordinates::new(51.5, -0.12), 5.0, Duration::from_secs(1));
//!     let shutdown = async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     };
//!
//!     client.run(source, GeolocationOptions::default(), shutdown).await?;
//!     Ok(())
//! }
//! ```

pub mod geolocation;
pub mod markers;
pub mod network;
pub mod reconciler;
