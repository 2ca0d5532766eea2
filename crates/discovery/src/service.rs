//! Event-driven discovery service
//!
//! Listens to daemon lifecycle events: `configured` starts the gossip
//! server on the mesh IP, `stopped` shuts it down, and the subnet events
//! open and close per-peer pollers. Event handlers stay non-blocking; any
//! waiting is done in spawned tasks or in [`Discovery::close`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tincmesh_daemon::{Configuration, DaemonConfig, EventBus};

use crate::client::Client;
use crate::server::{router, DiscoveryState, DISCOVERY_PORT};
use crate::ssd::Ssd;

struct ServerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct ServiceInner {
    ssd: Arc<Ssd>,
    config: Arc<DaemonConfig>,
    client: Client,
    server: Mutex<Option<ServerHandle>>,
    root: CancellationToken,
}

/// The discovery side of a node: gossip server plus peer pollers, driven
/// entirely by daemon events.
pub struct Discovery {
    inner: Arc<ServiceInner>,
}

impl Discovery {
    pub fn new(
        ssd: Arc<Ssd>,
        config: Arc<DaemonConfig>,
        interval: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let root = parent.child_token();
        let client = Client::new(ssd.clone(), config.clone(), interval, root.child_token());
        Self {
            inner: Arc::new(ServiceInner {
                ssd,
                config,
                client,
                server: Mutex::new(None),
                root,
            }),
        }
    }

    /// Register this service on a daemon event bus
    pub fn subscribe(&self, events: &EventBus) {
        let inner = self.inner.clone();
        events
            .configured
            .subscribe(move |configuration| inner.start_server(configuration));

        let inner = self.inner.clone();
        events.stopped.subscribe(move |_| inner.stop_server());

        let inner = self.inner.clone();
        events.subnet_added.subscribe(move |event| {
            let address = peer_address(&event.peer.subnet);
            if inner.client.watch(address) {
                info!(subnet = %event.peer.subnet, "watching subnet");
            }
        });

        let inner = self.inner.clone();
        events.subnet_removed.subscribe(move |event| {
            info!(subnet = %event.peer.subnet, "forgetting subnet");
            let address = peer_address(&event.peer.subnet);
            let client = inner.client.clone();
            tokio::spawn(async move { client.forget(&address).await });
        });
    }

    /// Direct access to the poll client
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Shut down the gossip server and every poller
    pub async fn close(&self) {
        let server = self.inner.server.lock().take();
        if let Some(server) = server {
            server.cancel.cancel();
            let _ = server.task.await;
        }
        self.inner.client.close().await;
    }
}

impl ServiceInner {
    fn start_server(&self, configuration: &Configuration) {
        self.stop_server();

        let address = format!("{}:{}", configuration.ip, DISCOVERY_PORT);
        let state = DiscoveryState {
            ssd: self.ssd.clone(),
            config: self.config.clone(),
        };
        let cancel = self.root.child_token();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            let listener = match TcpListener::bind(&address).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!(%address, %err, "discovery server failed to bind");
                    return;
                }
            };
            info!(%address, "discovery service started");
            if let Err(err) = axum::serve(listener, router(state))
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                warn!(%err, "discovery server stopped");
            }
        });

        *self.server.lock() = Some(ServerHandle { cancel, task });
    }

    fn stop_server(&self) {
        if let Some(server) = self.server.lock().take() {
            server.cancel.cancel();
            tokio::spawn(async move {
                let _ = server.task.await;
            });
        }
    }
}

/// Discovery address of a peer, derived from its announced subnet
fn peer_address(subnet: &str) -> String {
    let ip = subnet.split('/').next().unwrap_or("").trim();
    format!("{ip}:{DISCOVERY_PORT}")
}
