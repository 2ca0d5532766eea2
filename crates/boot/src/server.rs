//! Boot server
//!
//! Accepts a sealed envelope on any path, persists the joiner's host file,
//! and replies with the sealed archive of every known host. Runs on the
//! public side of the node, optionally behind TLS.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use tincmesh_common::names::is_canonical;
use tincmesh_common::{Result, TokenCipher};
use tincmesh_daemon::DaemonConfig;

use crate::envelope::{Blob, Envelope, HostArchive};

/// Upper bound on the sealed envelope size
pub const MAX_ENVELOPE: usize = 8192;

type JoinedHook = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Shared state of the boot endpoint
#[derive(Clone)]
pub struct BootState {
    config: Arc<DaemonConfig>,
    cipher: Arc<TokenCipher>,
    joined: Option<JoinedHook>,
}

impl BootState {
    pub fn new(config: Arc<DaemonConfig>, cipher: Arc<TokenCipher>) -> Self {
        Self {
            config,
            cipher,
            joined: None,
        }
    }

    /// Hook invoked for every accepted join, after the response is handed
    /// to the transport
    pub fn on_joined(mut self, hook: impl Fn(Envelope) + Send + Sync + 'static) -> Self {
        self.joined = Some(Arc::new(hook));
        self
    }
}

/// Build the boot router; every path is the join endpoint
pub fn boot_router(state: BootState) -> Router {
    Router::new()
        .fallback(join)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn join(State(state): State<BootState>, request: Request) -> Response {
    let payload = match axum::body::to_bytes(request.into_body(), MAX_ENVELOPE).await {
        Ok(payload) => payload,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    let envelope = match Envelope::open(&state.cipher, &payload) {
        Ok(envelope) => envelope,
        Err(err) => return (StatusCode::UNAUTHORIZED, err.to_string()).into_response(),
    };

    if !is_canonical(&envelope.name) {
        return (StatusCode::UNPROCESSABLE_ENTITY, "invalid node name").into_response();
    }

    if let Err(err) = state.config.add_host(&envelope.name, &envelope.config) {
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }

    let archive: HostArchive = match state.config.hosts() {
        Ok(hosts) => hosts
            .into_iter()
            .map(|(name, content)| (name, Blob(content)))
            .collect(),
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };

    let sealed = match serde_json::to_vec(&archive)
        .map_err(tincmesh_common::Error::from)
        .and_then(|plain| state.cipher.seal(&plain))
    {
        Ok(sealed) => sealed,
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };

    info!(node = %envelope.name, "node joined over boot exchange");
    if let Some(hook) = state.joined.clone() {
        tokio::spawn(async move { hook(envelope) });
    }

    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        sealed,
    )
        .into_response()
}

/// TLS material for the boot endpoint
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Serve the boot router until the token is cancelled. With [`TlsPaths`]
/// the endpoint speaks HTTPS, plain HTTP otherwise.
pub async fn serve(
    router: Router,
    addr: SocketAddr,
    tls: Option<TlsPaths>,
    cancel: CancellationToken,
) -> Result<()> {
    match tls {
        None => {
            let listener = TcpListener::bind(addr).await?;
            info!(%addr, "boot service started");
            axum::serve(listener, router)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await?;
        }
        Some(tls) => {
            let rustls = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;
            let handle = axum_server::Handle::new();
            {
                let handle = handle.clone();
                tokio::spawn(async move {
                    cancel.cancelled().await;
                    handle.graceful_shutdown(Some(Duration::from_secs(5)));
                });
            }
            info!(%addr, "boot service started (tls)");
            axum_server::bind_rustls(addr, rustls)
                .handle(handle)
                .serve(router.into_make_service())
                .await?;
        }
    }
    Ok(())
}
