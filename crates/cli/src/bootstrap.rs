//! First-start bootstrap
//!
//! Generates the node identity and initial configuration when the config
//! directory holds none, and maintains the process-start clock whose tick
//! becomes the self entity version. Randomness comes in through the caller
//! so nothing here touches process-global state.

use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;

use tincmesh_common::conf::{HostConfig, MainConfig, HOSTS_DIR, MAIN_FILE};
use tincmesh_common::names::canonical;
use tincmesh_common::Result;
use tincmesh_daemon::DaemonConfig;

use crate::netinfo::routable_addresses;
use crate::Cli;

/// RSA key size for generated nodes
const KEY_BITS: u32 = 4096;

/// Read, increment, and write back the start clock. A missing or malformed
/// clock restarts from zero, so the first tick is 1.
pub fn next_tick(clock_file: &Path) -> Result<i64> {
    let stored = match std::fs::read_to_string(clock_file) {
        Ok(data) => data.trim().parse::<i64>().unwrap_or(0),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
        Err(err) => return Err(err.into()),
    };
    let tick = stored + 1;
    std::fs::write(clock_file, tick.to_string())?;
    Ok(tick)
}

/// Resolved identity of a fresh node
pub struct NodePlan {
    pub name: String,
    pub port: u16,
    pub interface: String,
    pub subnet: String,
    pub address: Vec<String>,
}

impl NodePlan {
    /// Resolve every identity field, falling back to generated values
    pub fn resolve(cli: &Cli, rng: &mut impl Rng) -> Self {
        let name = resolve_name(cli, rng);
        let device = match &cli.device {
            Some(device) => device.clone(),
            None if name.len() <= 5 => name.clone(),
            None => name[name.len() - 5..].to_string(),
        };
        Self {
            port: cli.tinc_port.unwrap_or_else(|| rng.gen_range(30000..40000)),
            interface: format!("tun{}", device.to_uppercase()),
            subnet: format!("{}/32", resolve_ip(cli, rng)),
            address: advertised_addresses(cli),
            name,
        }
    }
}

/// Write the initial main config and self host file, then generate keys
pub async fn create_config(plan: &NodePlan, config: &DaemonConfig) -> Result<()> {
    let main = MainConfig {
        name: plan.name.clone(),
        port: plan.port,
        local_discovery: true,
        interface: plan.interface.clone(),
        connect_to: Vec::new(),
    };
    main.save(config.config_dir.join(MAIN_FILE))?;

    let host = HostConfig {
        subnet: plan.subnet.clone(),
        address: plan.address.clone(),
        port: plan.port,
        public_key: String::new(),
    };
    host.save(config.config_dir.join(HOSTS_DIR).join(&plan.name))?;

    info!(name = %plan.name, subnet = %plan.subnet, "generating node keys");
    config.keygen(KEY_BITS).await
}

/// `--advertise` entries as `host port` pairs, or every routable local IP
pub fn advertised_addresses(cli: &Cli) -> Vec<String> {
    if cli.advertise.is_empty() {
        return routable_addresses();
    }
    cli.advertise
        .iter()
        .map(|addr| match split_host_port(addr) {
            Some((host, port)) => format!("{host} {port}"),
            None => addr.clone(),
        })
        .collect()
}

/// Host parts of the advertised endpoints, for printed join URLs
pub fn advertised_hosts(cli: &Cli) -> Vec<String> {
    advertised_addresses(cli)
        .iter()
        .map(|pair| {
            pair.split_whitespace()
                .next()
                .unwrap_or(pair.as_str())
                .to_string()
        })
        .collect()
}

fn resolve_name(cli: &Cli, rng: &mut impl Rng) -> String {
    if let Some(name) = &cli.name {
        return canonical(name);
    }
    let host = nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix: String = (0..5)
        .map(|_| rng.sample(Alphanumeric) as char)
        .collect::<String>()
        .to_lowercase();
    canonical(&format!("{host}{suffix}"))
}

fn resolve_ip(cli: &Cli, rng: &mut impl Rng) -> String {
    if let Some(ip) = &cli.ip {
        return ip.clone();
    }
    format!(
        "172.{}.{}.{}",
        16 + rng.gen_range(0..15),
        rng.gen_range(0..255),
        1 + rng.gen_range(0..254)
    )
}

fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("tincmesh").chain(args.iter().copied()))
    }

    #[test]
    fn test_clock_counts_process_starts() {
        let dir = tempfile::tempdir().unwrap();
        let clock = dir.path().join("clock");

        assert_eq!(next_tick(&clock).unwrap(), 1);
        assert_eq!(std::fs::read_to_string(&clock).unwrap(), "1");
        assert_eq!(next_tick(&clock).unwrap(), 2);
        assert_eq!(std::fs::read_to_string(&clock).unwrap(), "2");
    }

    #[test]
    fn test_clock_recovers_from_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let clock = dir.path().join("clock");
        std::fs::write(&clock, "soup").unwrap();
        assert_eq!(next_tick(&clock).unwrap(), 1);
    }

    #[test]
    fn test_plan_uses_explicit_values() {
        let cli = cli(&[
            "--name",
            "Node-One",
            "--tinc-port",
            "31999",
            "--ip",
            "172.20.1.9",
            "--advertise",
            "vpn.example.org:655",
        ]);
        let plan = NodePlan::resolve(&cli, &mut rand::thread_rng());

        assert_eq!(plan.name, "nodeone");
        assert_eq!(plan.port, 31999);
        assert_eq!(plan.subnet, "172.20.1.9/32");
        assert_eq!(plan.interface, "tunDEONE");
        assert_eq!(plan.address, vec!["vpn.example.org 655"]);
    }

    #[test]
    fn test_plan_generated_values_in_range() {
        let cli = cli(&["--name", "gen"]);
        let plan = NodePlan::resolve(&cli, &mut rand::thread_rng());

        assert!((30000..40000).contains(&plan.port));
        let octets: Vec<u32> = plan
            .subnet
            .trim_end_matches("/32")
            .split('.')
            .map(|octet| octet.parse().unwrap())
            .collect();
        assert_eq!(octets[0], 172);
        assert!((16..31).contains(&octets[1]));
        assert!(octets[3] >= 1);
        assert_eq!(plan.interface, "tunGEN");
    }

    #[test]
    fn test_generated_name_is_canonical() {
        let cli = cli(&[]);
        let plan = NodePlan::resolve(&cli, &mut rand::thread_rng());
        assert!(tincmesh_common::names::is_canonical(&plan.name));
    }

    #[test]
    fn test_advertise_without_port_kept_as_host() {
        let cli = cli(&["--advertise", "vpn.example.org"]);
        assert_eq!(advertised_addresses(&cli), vec!["vpn.example.org"]);
        assert_eq!(advertised_hosts(&cli), vec!["vpn.example.org"]);
    }
}
