//! Tinc configuration codec
//!
//! Tinc config files are line-oriented `Key = Value` documents with `#`
//! comments and verbatim PEM blobs (`-----BEGIN X-----` .. `-----END ..`).
//! Parsing goes through an explicit intermediate form ([`RawConfig`]) driven
//! by hand-written per-type conversions; there is no reflection and no
//! dynamic typing.

mod raw;
mod types;

pub use raw::RawConfig;
pub use types::{read_node_config, HostConfig, MainConfig, HOSTS_DIR, MAIN_FILE};
