//! Tincmesh Common Library
//!
//! Shared types and utilities for the tincmesh platform: error types,
//! canonical node names, the token crypter used by the boot exchange, and
//! the tinc configuration codec.

pub mod conf;
pub mod crypto;
pub mod error;
pub mod names;

// Re-export commonly used types
pub use conf::{HostConfig, MainConfig};
pub use crypto::TokenCipher;
pub use error::{Error, Result};
pub use names::canonical;

/// Tincmesh version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
