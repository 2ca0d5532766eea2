//! Daemon supervisor
//!
//! A spawned [`Daemon`] keeps the tincd child running until stopped:
//! `Init -> Pending -> Running -> Restarting -> (Pending | Stopped)`. Both output
//! streams of the child are scanned line by line through the log-event
//! parser, and the resulting events are published on the daemon's own bus
//! (a snapshot of the config's subscribers taken at spawn time).

use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tincmesh_common::conf::{read_node_config, HostConfig, MainConfig};
use tincmesh_common::{Error, Result};

use crate::config::DaemonConfig;
use crate::events::{Configuration, EventBus};
use crate::network;
use crate::parser::{parse_line, LogEvent};

/// Daemon lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Init,
    Pending,
    Running,
    Restarting,
    Stopped,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Status::Init => "initializing",
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Restarting => "restarting",
            Status::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

struct DaemonInner {
    name: String,
    ip: String,
    interface: String,
    main: MainConfig,
    self_host: HostConfig,
    binary: String,
    args: Vec<String>,
    restart_interval: std::time::Duration,
    events: EventBus,
    status: Mutex<Status>,
    child_pid: Mutex<Option<i32>>,
}

impl DaemonInner {
    fn set_status(&self, status: Status) {
        info!(daemon = %self.name, %status, "daemon status");
        *self.status.lock() = status;
    }

    fn configuration(&self) -> Configuration {
        Configuration {
            ip: self.ip.clone(),
            interface: self.interface.clone(),
            self_host: self.self_host.clone(),
            main: self.main.clone(),
        }
    }

    async fn handle_line(&self, line: &str) {
        match parse_line(line) {
            Some(LogEvent::SubnetAdded(ev)) => self.events.subnet_added.emit(&ev),
            Some(LogEvent::SubnetRemoved(ev)) => self.events.subnet_removed.emit(&ev),
            Some(LogEvent::Ready) => {
                self.events.ready.emit(&());
                match network::configure(&self.interface, &self.ip).await {
                    Ok(()) => self.events.configured.emit(&self.configuration()),
                    Err(err) => warn!(daemon = %self.name, %err, "network setup failed"),
                }
                self.set_status(Status::Running);
            }
            None => {}
        }
    }
}

/// A supervised tincd instance. Restarts the child on every failure until
/// [`stop`](Daemon::stop) is called. A stopped daemon cannot be restarted;
/// spawn a new one from the same config instead.
pub struct Daemon {
    inner: Arc<DaemonInner>,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

impl DaemonConfig {
    /// Validate the node configuration, snapshot it together with the event
    /// subscribers, and launch the supervisor task. Returns immediately.
    pub fn spawn(&self, parent: &CancellationToken) -> Result<Daemon> {
        let (main, self_host) = read_node_config(&self.config_dir)?;
        if main.interface.is_empty() {
            return Err(Error::NotConfigured(
                "device name not defined in main config".to_string(),
            ));
        }
        let ip = self_host.ip().to_string();
        if ip.is_empty() {
            return Err(Error::NotConfigured(
                "subnet not defined in host file".to_string(),
            ));
        }

        let inner = Arc::new(DaemonInner {
            name: main.name.clone(),
            ip,
            interface: main.interface.clone(),
            main,
            self_host,
            binary: self.binary.clone(),
            args: self.build_args(&[]),
            restart_interval: self.restart_interval,
            events: self.events().snapshot(),
            status: Mutex::new(Status::Init),
            child_pid: Mutex::new(None),
        });

        let cancel = parent.child_token();
        let (done_tx, done_rx) = watch::channel(false);
        tokio::spawn(run_loop(inner.clone(), cancel.clone(), done_tx));

        Ok(Daemon {
            inner,
            cancel,
            done: done_rx,
        })
    }
}

impl Daemon {
    /// Events published by this daemon instance
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn main(&self) -> &MainConfig {
        &self.inner.main
    }

    pub fn self_host(&self) -> &HostConfig {
        &self.inner.self_host
    }

    pub fn status(&self) -> Status {
        *self.inner.status.lock()
    }

    /// Ask the running child to re-read its configuration (SIGHUP). No-op
    /// when no child is alive.
    pub fn reload(&self) {
        let pid = *self.inner.child_pid.lock();
        if let Some(pid) = pid {
            debug!(daemon = %self.inner.name, pid, "reloading tinc daemon");
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid),
                nix::sys::signal::Signal::SIGHUP,
            );
        }
    }

    /// Cancel the supervisor, kill the child, and wait until the scanner has
    /// drained and the loop reached its terminal state.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.wait().await;
    }

    /// Wait for the supervisor loop to finish
    pub async fn wait(&self) {
        let mut done = self.done.clone();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }
}

async fn run_loop(inner: Arc<DaemonInner>, cancel: CancellationToken, done: watch::Sender<bool>) {
    loop {
        inner.set_status(Status::Pending);
        if let Err(err) = run_once(&inner, &cancel).await {
            warn!(daemon = %inner.name, %err, "daemon run failed");
        }
        inner.set_status(Status::Restarting);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(inner.restart_interval) => {}
        }
    }
    inner.set_status(Status::Stopped);
    let _ = done.send(true);
}

/// One supervised run of the child. Always publishes `stopped` on the way
/// out, whatever the exit path.
async fn run_once(inner: &Arc<DaemonInner>, cancel: &CancellationToken) -> Result<()> {
    let result = launch_and_wait(inner, cancel).await;
    inner.events.stopped.emit(&inner.configuration());
    result
}

async fn launch_and_wait(inner: &Arc<DaemonInner>, cancel: &CancellationToken) -> Result<()> {
    let mut cmd = Command::new(&inner.binary);
    cmd.args(&inner.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;
    let pid = child.id().map(|pid| pid as i32);
    *inner.child_pid.lock() = pid;

    let mut scanners = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        scanners.push(tokio::spawn(scan_stream(inner.clone(), stdout)));
    }
    if let Some(stderr) = child.stderr.take() {
        scanners.push(tokio::spawn(scan_stream(inner.clone(), stderr)));
    }

    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };
    let status = match status {
        Some(status) => status,
        None => {
            if let Some(pid) = pid {
                // the child runs in its own process group; take down any
                // helpers it forked as well
                let _ = nix::sys::signal::killpg(
                    nix::unistd::Pid::from_raw(pid),
                    nix::sys::signal::Signal::SIGKILL,
                );
            }
            child.wait().await
        }
    };

    *inner.child_pid.lock() = None;
    for scanner in scanners {
        let _ = scanner.await;
    }

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(Error::Daemon(format!("service exited: {status}"))),
        Err(err) => Err(err.into()),
    }
}

async fn scan_stream(inner: Arc<DaemonInner>, stream: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => inner.handle_line(&line).await,
            Ok(None) => break,
            Err(err) => {
                warn!(daemon = %inner.name, %err, "failed to read daemon output");
                break;
            }
        }
    }
}
