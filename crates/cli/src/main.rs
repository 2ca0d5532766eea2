//! tincmesh entrypoint

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tincmesh_cli::{run, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    tracing::info!("tincmesh v{}", env!("CARGO_PKG_VERSION"));

    run::run(cli).await
}
