//! Per-peer discovery pollers
//!
//! One requester task per watched peer address. A cycle pulls the peer's
//! header list, fetches every host file that would merge, and commits each
//! merge by writing the host file before the new version becomes visible.
//! Any reader that observes a version is therefore guaranteed the on-disk
//! file is at least that fresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tincmesh_common::{Error, Result};
use tincmesh_daemon::DaemonConfig;

use crate::ssd::{Entity, Ssd};

/// Timeout of every discovery HTTP request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

struct Requester {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct ClientInner {
    ssd: Arc<Ssd>,
    config: Arc<DaemonConfig>,
    interval: Duration,
    root: CancellationToken,
    requesters: Mutex<HashMap<String, Requester>>,
}

/// Discovery poll client: a watch/forget registry of per-peer requesters
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(
        ssd: Arc<Ssd>,
        config: Arc<DaemonConfig>,
        interval: Duration,
        root: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                ssd,
                config,
                interval,
                root,
                requesters: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start polling an address. Idempotent: returns false when the address
    /// is already watched.
    pub fn watch(&self, address: String) -> bool {
        let mut requesters = self.inner.requesters.lock();
        if requesters.contains_key(&address) {
            return false;
        }

        let cancel = self.inner.root.child_token();
        let task = tokio::spawn(poll_loop(
            address.clone(),
            self.inner.ssd.clone(),
            self.inner.config.clone(),
            self.inner.interval,
            cancel.clone(),
        ));
        requesters.insert(address, Requester { cancel, task });
        true
    }

    /// Cancel the requester for an address and wait for its task to finish
    pub async fn forget(&self, address: &str) {
        let requester = self.inner.requesters.lock().remove(address);
        if let Some(requester) = requester {
            requester.cancel.cancel();
            let _ = requester.task.await;
        }
    }

    /// Cancel and join every requester
    pub async fn close(&self) {
        let requesters: Vec<_> = {
            let mut map = self.inner.requesters.lock();
            map.drain().collect()
        };
        for (_, requester) in &requesters {
            requester.cancel.cancel();
        }
        for (_, requester) in requesters {
            let _ = requester.task.await;
        }
    }
}

async fn poll_loop(
    address: String,
    ssd: Arc<Ssd>,
    config: Arc<DaemonConfig>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let http = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
        Ok(http) => http,
        Err(err) => {
            warn!(%address, %err, "failed to build discovery HTTP client");
            return;
        }
    };

    loop {
        if let Err(err) = poll_cycle(&http, &address, &ssd, &config).await {
            debug!(%address, %err, "discovery poll failed");
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// One poll cycle; strictly sequential per peer
async fn poll_cycle(
    http: &reqwest::Client,
    address: &str,
    ssd: &Ssd,
    config: &DaemonConfig,
) -> Result<()> {
    let entities = fetch_headers(http, address).await?;

    let mut changed = false;
    for entity in entities {
        if !ssd.can_be_merged(&entity) {
            continue;
        }

        let (remote, content) = match fetch_host(http, address, &entity.name).await {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(%address, host = %entity.name, %err, "failed to fetch host content");
                continue;
            }
        };
        info!(host = %remote.name, version = remote.version, %address, "discovered node");

        let name = remote.name.clone();
        let merged = ssd.replace_if_newer_with(remote, || match config.add_host(&name, &content) {
            Ok(()) => true,
            Err(err) => {
                warn!(host = %name, %err, "failed to save host file");
                false
            }
        });
        changed = changed || merged;
    }

    if changed {
        ssd.save()?;
    }
    Ok(())
}

async fn fetch_headers(http: &reqwest::Client, address: &str) -> Result<Vec<Entity>> {
    let response = http
        .get(format!("http://{address}/hosts"))
        .send()
        .await
        .map_err(|err| Error::Http(format!("fetch headers: {err}")))?;
    if !response.status().is_success() {
        return Err(Error::Http(format!(
            "headers returned unexpected status code {}",
            response.status()
        )));
    }
    response
        .json()
        .await
        .map_err(|err| Error::Http(format!("decode headers: {err}")))
}

async fn fetch_host(
    http: &reqwest::Client,
    address: &str,
    name: &str,
) -> Result<(Entity, Vec<u8>)> {
    let response = http
        .get(format!("http://{address}/host/{name}?after=-1"))
        .send()
        .await
        .map_err(|err| Error::Http(format!("fetch host: {err}")))?;
    if !response.status().is_success() {
        return Err(Error::Http(format!(
            "host returned unexpected status code {}",
            response.status()
        )));
    }

    let header = |key: &str| {
        response
            .headers()
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let name = header("x-name")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::Http("empty name header".to_string()))?;
    let version = header("x-version")
        .and_then(|version| version.parse().ok())
        .ok_or_else(|| Error::Http("malformed version header".to_string()))?;

    let content = response
        .bytes()
        .await
        .map_err(|err| Error::Http(format!("read host content: {err}")))?;

    Ok((Entity { name, version }, content.to_vec()))
}
