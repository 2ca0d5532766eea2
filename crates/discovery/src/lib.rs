//! Tincmesh Discovery
//!
//! Gossip-style host distribution inside the mesh. Each node serves its
//! known `(name, version)` headers and host files over a fixed in-VPN port,
//! and polls every peer it learns about from the daemon's subnet events.
//! Convergence relies on monotone per-node versions, not on consensus.

pub mod client;
pub mod server;
pub mod service;
pub mod ssd;

pub use client::Client;
pub use server::{router, DiscoveryState, DISCOVERY_PORT};
pub use service::Discovery;
pub use ssd::{Entity, Ssd};
