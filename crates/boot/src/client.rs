//! Join client
//!
//! Posts this node's sealed host file to a peer's boot endpoint and imports
//! the archive that comes back. Retries forever until it succeeds or the
//! runtime shuts down.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tincmesh_common::names::is_canonical;
use tincmesh_common::{Error, Result, TokenCipher};
use tincmesh_daemon::DaemonConfig;

use crate::envelope::{Envelope, HostArchive};

/// Timeout of one boot exchange request
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

type ExchangedHook = Arc<dyn Fn(&str) + Send + Sync>;
type CompleteHook = Arc<dyn Fn() + Send + Sync>;

/// One joiner bound to a single boot URL
pub struct JoinClient {
    url: String,
    config: Arc<DaemonConfig>,
    cipher: Arc<TokenCipher>,
    http: reqwest::Client,
    name: Mutex<Option<String>>,
    exchanged: Option<ExchangedHook>,
    complete: Option<CompleteHook>,
}

impl JoinClient {
    pub fn new(url: impl Into<String>, config: Arc<DaemonConfig>, cipher: Arc<TokenCipher>) -> Self {
        Self {
            url: url.into(),
            config,
            cipher,
            http: reqwest::Client::builder()
                .timeout(EXCHANGE_TIMEOUT)
                .build()
                .unwrap_or_default(),
            name: Mutex::new(None),
            exchanged: None,
            complete: None,
        }
    }

    /// Hook invoked once per imported archive entry
    pub fn on_exchanged(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.exchanged = Some(Arc::new(hook));
        self
    }

    /// Hook invoked once after a full successful exchange
    pub fn on_complete(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Arc::new(hook));
        self
    }

    /// Exchange until success, retrying every `retry`, or until cancelled
    pub async fn run(&self, cancel: CancellationToken, retry: Duration) {
        loop {
            match self.exchange().await {
                Ok(()) => {
                    info!(url = %self.url, "join complete");
                    return;
                }
                Err(err) => warn!(url = %self.url, %err, "failed join"),
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(retry) => {}
            }
        }
    }

    /// One boot exchange round trip
    pub async fn exchange(&self) -> Result<()> {
        let name = self.read_name()?;
        let self_content = std::fs::read(self.config.hosts_dir().join(&name))?;

        let sealed = Envelope {
            name: name.clone(),
            config: self_content,
        }
        .seal(&self.cipher)?;

        let response = self
            .http
            .post(&self.url)
            .body(sealed)
            .send()
            .await
            .map_err(|err| Error::Http(format!("execute request: {err}")))?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "unexpected status code: {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| Error::Http(format!("read response: {err}")))?;
        let archive: HostArchive = serde_json::from_slice(&self.cipher.open(&body)?)?;

        for (peer, content) in archive {
            if !is_canonical(&peer) {
                warn!(entry = %peer, "malformed archive entry");
                continue;
            }
            if peer == name {
                // our own descriptor came back with the archive
                continue;
            }
            self.config.add_host(&peer, &content.0)?;
            if let Some(hook) = &self.exchanged {
                hook(&peer);
            }
        }
        if let Some(hook) = &self.complete {
            hook();
        }
        Ok(())
    }

    fn read_name(&self) -> Result<String> {
        let mut cached = self.name.lock();
        if let Some(name) = cached.as_ref() {
            return Ok(name.clone());
        }
        let main = self.config.main()?;
        if main.name.is_empty() {
            return Err(Error::ConfigInvalid("node name not set".to_string()));
        }
        *cached = Some(main.name.clone());
        Ok(main.name)
    }
}
