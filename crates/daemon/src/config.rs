//! Daemon configuration and config-directory operations
//!
//! [`DaemonConfig`] owns the tinc config directory. Every mutation of the
//! host directory or the main config goes through it, serialized by a
//! single config lock, so concurrent services never interleave writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::process::Command;
use tracing::debug;

use tincmesh_common::conf::{read_node_config, MainConfig, HOSTS_DIR, MAIN_FILE};
use tincmesh_common::names::{canonical, is_canonical};
use tincmesh_common::{Error, Result};

use crate::events::EventBus;

/// Interval between restart attempts of the supervised process
pub const DEFAULT_RESTART_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for spawning daemons
pub struct DaemonConfig {
    /// tincd binary
    pub binary: String,
    /// Additional tincd arguments
    pub args: Vec<String>,
    pub pid_file: PathBuf,
    pub config_dir: PathBuf,
    pub restart_interval: Duration,

    events: EventBus,
    config_lock: RwLock<()>,
}

impl DaemonConfig {
    /// Default daemon configuration rooted at a config directory
    pub fn default_in(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            binary: "tincd".to_string(),
            args: Vec::new(),
            pid_file: config_dir.join("pid.run"),
            config_dir,
            restart_interval: DEFAULT_RESTART_INTERVAL,
            events: EventBus::default(),
            config_lock: RwLock::new(()),
        }
    }

    /// Event subscriber lists propagated to spawned daemons
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Location of host definition files
    pub fn hosts_dir(&self) -> PathBuf {
        self.config_dir.join(HOSTS_DIR)
    }

    /// Main config of the self node
    pub fn main(&self) -> Result<MainConfig> {
        MainConfig::load(self.config_dir.join(MAIN_FILE))
    }

    /// Whether the directory holds a usable node configuration: main config
    /// and self host file readable, interface set, subnet-derived IP set.
    pub fn configured(&self) -> bool {
        match read_node_config(&self.config_dir) {
            Ok((main, host)) => !main.interface.is_empty() && !host.ip().is_empty(),
            Err(_) => false,
        }
    }

    /// Run the binary with its key-generation flag; blocks until it exits.
    pub async fn keygen(&self, bits: u32) -> Result<()> {
        let status = Command::new(&self.binary)
            .args(self.build_args(&["-K".to_string(), bits.to_string()]))
            .stdin(std::process::Stdio::null())
            .status()
            .await?;
        if !status.success() {
            return Err(Error::Daemon(format!("key generation failed: {status}")));
        }
        Ok(())
    }

    /// Names of every known host
    pub fn host_names(&self) -> Result<Vec<String>> {
        let _guard = self.config_lock.read();
        self.scan_names()
    }

    /// Name and content of every known host
    pub fn hosts(&self) -> Result<HashMap<String, Vec<u8>>> {
        let _guard = self.config_lock.read();
        let mut out = HashMap::new();
        for name in self.scan_names()? {
            out.insert(
                name.clone(),
                std::fs::read(self.hosts_dir().join(&name))?,
            );
        }
        Ok(out)
    }

    /// Content of one host file
    pub fn host(&self, name: &str) -> Result<Vec<u8>> {
        let _guard = self.config_lock.read();
        if !is_canonical(name) {
            return Err(Error::NameInvalid(name.to_string()));
        }
        Ok(std::fs::read(self.hosts_dir().join(name))?)
    }

    /// Save a host file and dial it: adds a `ConnectTo` for the name unless
    /// one already exists. The only legal mutator of the host directory.
    pub fn add_host(&self, name: &str, content: &[u8]) -> Result<()> {
        let _guard = self.config_lock.write();
        if !is_canonical(name) {
            return Err(Error::NameInvalid(name.to_string()));
        }
        std::fs::write(self.hosts_dir().join(name), content)?;

        let mut main = self.main()?;
        if main.connect_to.iter().any(|peer| peer == name) {
            return Ok(());
        }
        main.connect_to.push(name.to_string());
        main.save(self.config_dir.join(MAIN_FILE))?;
        debug!(host = name, "added ConnectTo entry");
        Ok(())
    }

    /// Rebuild `ConnectTo` from the host directory contents
    pub fn index_hosts(&self) -> Result<()> {
        let _guard = self.config_lock.write();
        let names = self.scan_names()?;
        let mut main = self.main()?;
        main.connect_to = names;
        main.save(self.config_dir.join(MAIN_FILE))?;
        Ok(())
    }

    /// Full tincd argument list: fixed flags, then per-call extras, then
    /// user-supplied extras.
    pub(crate) fn build_args(&self, extra: &[String]) -> Vec<String> {
        let mut args = vec![
            "-D".to_string(),
            "-d".to_string(),
            "-d".to_string(),
            "-d".to_string(),
            "-d".to_string(),
            "--pidfile".to_string(),
            self.pid_file.display().to_string(),
            "-c".to_string(),
            self.config_dir.display().to_string(),
        ];
        args.extend_from_slice(extra);
        args.extend(self.args.iter().cloned());
        args
    }

    fn scan_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.hosts_dir())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if canonical(&name) != name {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

/// Create the config directory skeleton (config dir plus hosts dir)
pub fn create_layout(config_dir: impl AsRef<Path>) -> Result<()> {
    std::fs::create_dir_all(config_dir.as_ref().join(HOSTS_DIR))?;
    Ok(())
}
