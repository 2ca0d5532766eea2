//! Tincmesh Boot
//!
//! First-contact bootstrap for new nodes. Unlike discovery, the boot
//! exchange runs over the public internet before the VPN exists, so every
//! payload is sealed with the shared-token cipher: a joiner posts its own
//! host file and receives the full host directory of the network in a
//! single round trip.

pub mod client;
pub mod envelope;
pub mod server;

pub use client::JoinClient;
pub use envelope::{Blob, Envelope, HostArchive};
pub use server::{boot_router, serve, BootState, TlsPaths};
