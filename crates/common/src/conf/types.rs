//! Typed tinc configuration structures

use std::path::Path;

use crate::error::{Error, Result};

use super::RawConfig;

/// Main config file name inside the config directory
pub const MAIN_FILE: &str = "tinc.conf";
/// Host-file directory name inside the config directory
pub const HOSTS_DIR: &str = "hosts";

/// Per-node main configuration (`tinc.conf`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainConfig {
    pub name: String,
    pub port: u16,
    pub local_discovery: bool,
    pub interface: String,
    pub connect_to: Vec<String>,
}

impl MainConfig {
    pub fn parse(input: &str) -> Result<Self> {
        let raw = RawConfig::parse(input)?;
        Ok(Self {
            name: raw.get("Name").unwrap_or_default().to_string(),
            port: parse_port(raw.get("Port"))?,
            local_discovery: parse_bool(raw.get("LocalDiscovery"))?,
            interface: raw.get("Interface").unwrap_or_default().to_string(),
            connect_to: raw
                .get_all("ConnectTo")
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }

    pub fn to_raw(&self) -> RawConfig {
        let mut raw = RawConfig::default();
        if !self.name.is_empty() {
            raw.push_value("Name", self.name.clone());
        }
        if self.port != 0 {
            raw.push_value("Port", self.port.to_string());
        }
        if self.local_discovery {
            raw.push_value("LocalDiscovery", "yes");
        }
        if !self.interface.is_empty() {
            raw.push_value("Interface", self.interface.clone());
        }
        for peer in &self.connect_to {
            raw.push_value("ConnectTo", peer.clone());
        }
        raw
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_raw().emit())?;
        Ok(())
    }
}

/// Public descriptor of one node (a file under `hosts/`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfig {
    pub subnet: String,
    /// `<host> [<port>]` pairs advertised to peers outside the mesh
    pub address: Vec<String>,
    pub port: u16,
    /// PEM block, verbatim
    pub public_key: String,
}

impl HostConfig {
    pub fn parse(input: &str) -> Result<Self> {
        let raw = RawConfig::parse(input)?;
        Ok(Self {
            subnet: raw.get("Subnet").unwrap_or_default().to_string(),
            address: raw
                .get_all("Address")
                .into_iter()
                .map(str::to_string)
                .collect(),
            port: parse_port(raw.get("Port"))?,
            public_key: raw.blob("RSA PUBLIC KEY").unwrap_or_default().to_string(),
        })
    }

    pub fn to_raw(&self) -> RawConfig {
        let mut raw = RawConfig::default();
        if !self.subnet.is_empty() {
            raw.push_value("Subnet", self.subnet.clone());
        }
        for addr in &self.address {
            raw.push_value("Address", addr.clone());
        }
        if self.port != 0 {
            raw.push_value("Port", self.port.to_string());
        }
        if !self.public_key.is_empty() {
            raw.push_blob("RSA PUBLIC KEY", self.public_key.clone());
        }
        raw
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_raw().emit())?;
        Ok(())
    }

    /// In-mesh IP of the node: the subnet with its `/mask` suffix stripped
    pub fn ip(&self) -> &str {
        self.subnet.split('/').next().unwrap_or("").trim()
    }
}

/// Read `tinc.conf` and the node's own host file from a config directory
pub fn read_node_config(config_dir: impl AsRef<Path>) -> Result<(MainConfig, HostConfig)> {
    let dir = config_dir.as_ref();
    let main = MainConfig::load(dir.join(MAIN_FILE))?;
    if main.name.is_empty() {
        return Err(Error::ConfigInvalid("node name not set".to_string()));
    }
    let host = HostConfig::load(dir.join(HOSTS_DIR).join(&main.name))?;
    Ok((main, host))
}

fn parse_port(value: Option<&str>) -> Result<u16> {
    match value {
        None => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| Error::ConfigInvalid(format!("invalid port: {v}"))),
    }
}

fn parse_bool(value: Option<&str>) -> Result<bool> {
    match value {
        None => Ok(false),
        Some("yes") => Ok(true),
        Some("no") => Ok(false),
        Some(v) => Err(Error::ConfigInvalid(format!("invalid boolean: {v}"))),
    }
}
