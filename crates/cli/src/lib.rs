//! Tincmesh CLI library
//!
//! The runtime wiring behind the `tincmesh` binary: argument surface,
//! first-start bootstrap, and the glue holding the daemon, discovery, and
//! boot services under one cancellation root.

pub mod bootstrap;
pub mod netinfo;
pub mod run;

use std::path::PathBuf;

use clap::Parser;

/// Bootstrap and operate a full-mesh tinc overlay
#[derive(Debug, Parser)]
#[command(name = "tincmesh", version, about)]
pub struct Cli {
    /// Node name. If not set, the hostname with a random suffix is used
    #[arg(short, long)]
    pub name: Option<String>,

    /// Routable host[:port] advertised to new clients. If not set, every
    /// non-loopback IP is advertised
    #[arg(short, long)]
    pub advertise: Vec<String>,

    /// Tinc listen port for a fresh node. Random in 30000-40000 if not set
    #[arg(long)]
    pub tinc_port: Option<u16>,

    /// Device name. Defaults to the last 5 symbols of the node name
    #[arg(long)]
    pub device: Option<String>,

    /// Boot service binding port
    #[arg(short, long, default_value_t = 8655)]
    pub port: u16,

    /// Boot service binding host
    #[arg(long, default_value = "")]
    pub host: String,

    /// Boot token. A random string is generated and printed if not set
    #[arg(short, long)]
    pub token: Option<String>,

    /// Enable TLS for the boot service
    #[arg(long)]
    pub tls: bool,

    /// TLS certificate
    #[arg(long, default_value = "server.crt")]
    pub cert: PathBuf,

    /// TLS key
    #[arg(long, default_value = "server.key")]
    pub key: PathBuf,

    /// VPN IP for a fresh node. Random in 172.16.0.0/12 if not set
    #[arg(long)]
    pub ip: Option<String>,

    /// Base directory, created if missing
    #[arg(short, long, default_value = "vpn")]
    pub dir: PathBuf,

    /// tincd binary location
    #[arg(long, default_value = "tincd")]
    pub tincd: String,

    /// Boot URLs of peers to join
    #[arg(short, long)]
    pub join: Vec<String>,

    /// Join retry interval, seconds
    #[arg(long = "join-retry", value_name = "SECONDS", default_value_t = 15)]
    pub join_retry: u64,

    /// Interval between discovery polls, seconds
    #[arg(long = "discovery-interval", value_name = "SECONDS", default_value_t = 5)]
    pub discovery_interval: u64,

    /// Open the needed ports with ufw
    #[arg(long)]
    pub ufw: bool,
}

impl Cli {
    pub fn config_dir(&self) -> PathBuf {
        self.dir.join("config")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.join("run")
    }

    pub fn ssd_file(&self) -> PathBuf {
        self.work_dir().join("discovery.json")
    }

    pub fn clock_file(&self) -> PathBuf {
        self.work_dir().join("clock")
    }
}
