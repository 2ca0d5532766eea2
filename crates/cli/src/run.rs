//! Runtime wiring
//!
//! Builds the whole node out of its parts: config bootstrap, SSD seeding,
//! the supervised daemon, the discovery service, and the boot exchange,
//! all owned by a single cancellation root tied to process signals.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tincmesh_boot::{boot_router, serve, BootState, JoinClient, TlsPaths};
use tincmesh_common::conf::read_node_config;
use tincmesh_common::TokenCipher;
use tincmesh_daemon::config::create_layout;
use tincmesh_daemon::{Daemon, DaemonConfig};
use tincmesh_discovery::{Discovery, Entity, Ssd, DISCOVERY_PORT};

use crate::bootstrap::{self, NodePlan};
use crate::Cli;

/// Run the node until a shutdown signal arrives
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut rng = rand::thread_rng();

    std::fs::create_dir_all(cli.work_dir()).context("create work dir")?;
    create_layout(cli.config_dir()).context("create config dir")?;

    let tick = bootstrap::next_tick(&cli.clock_file()).context("count clock tick")?;

    let mut daemon_config = DaemonConfig::default_in(cli.config_dir());
    daemon_config.binary = cli.tincd.clone();
    daemon_config.pid_file = cli.work_dir().join("pid.run");
    let daemon_config = Arc::new(daemon_config);

    let ssd = Arc::new(Ssd::new(cli.ssd_file()));
    ssd.read().context("read discovery state")?;

    // pick up hosts the discovery state missed while we were down
    for host in daemon_config.host_names().context("read hosts")? {
        ssd.replace_if_newer(Entity::new(host, 0));
    }

    let root = CancellationToken::new();
    spawn_signal_handler(root.clone());

    if !daemon_config.configured() {
        info!("configuration not exists or invalid, creating a new one");
        let plan = NodePlan::resolve(&cli, &mut rng);
        bootstrap::create_config(&plan, &daemon_config)
            .await
            .context("create config")?;
    } else {
        info!("using existing configuration");
    }

    let (main, _self_host) =
        read_node_config(&daemon_config.config_dir).context("read generated config")?;

    // the self entity advances at every process start
    ssd.replace(Entity::new(main.name.clone(), tick));
    if let Err(err) = ssd.save() {
        warn!(%err, "failed to save discovery state, continuing in memory");
    }

    daemon_config.index_hosts().context("index hosts")?;

    let discovery = Discovery::new(
        ssd.clone(),
        daemon_config.clone(),
        Duration::from_secs(cli.discovery_interval),
        &root,
    );
    discovery.subscribe(daemon_config.events());

    if cli.ufw {
        subscribe_firewall(&cli, daemon_config.events());
    }

    let daemon = Arc::new(daemon_config.spawn(&root).context("spawn daemon")?);

    let token = cli.token.clone().unwrap_or_else(|| {
        (0..64)
            .map(|_| rng.sample(Alphanumeric) as char)
            .collect::<String>()
    });
    print_join_commands(&cli, &token);
    let cipher = Arc::new(TokenCipher::new(&token));

    // joiners for every peer we were pointed at
    let mut join_tasks = Vec::new();
    for url in &cli.join {
        let client = join_client(url, &daemon_config, &cipher, &ssd, &daemon);
        let cancel = root.child_token();
        let retry = Duration::from_secs(cli.join_retry);
        join_tasks.push(tokio::spawn(
            async move { client.run(cancel, retry).await },
        ));
    }

    // our own boot endpoint
    let state = boot_state(&daemon_config, &cipher, &ssd, &daemon);
    let boot_addr: SocketAddr = boot_address(&cli).context("parse boot address")?;
    let tls = cli.tls.then(|| TlsPaths {
        cert: cli.cert.clone(),
        key: cli.key.clone(),
    });
    let boot_server = tokio::spawn(serve(
        boot_router(state),
        boot_addr,
        tls,
        root.child_token(),
    ));

    tokio::select! {
        _ = root.cancelled() => {}
        result = boot_server => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(%err, "boot service failed"),
                Err(err) => error!(%err, "boot service panicked"),
            }
        }
    }

    info!("shutting down");
    root.cancel();
    daemon.stop().await;
    discovery.close().await;
    for task in join_tasks {
        let _ = task.await;
    }
    Ok(())
}

fn spawn_signal_handler(root: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut terminate =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(signal) => signal,
                    Err(err) => {
                        error!(%err, "failed to install SIGTERM handler");
                        let _ = ctrl_c.await;
                        root.cancel();
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        let _ = ctrl_c.await;

        info!("received shutdown signal");
        root.cancel();
    });
}

fn join_client(
    url: &str,
    config: &Arc<DaemonConfig>,
    cipher: &Arc<TokenCipher>,
    ssd: &Arc<Ssd>,
    daemon: &Arc<Daemon>,
) -> JoinClient {
    let exchanged_ssd = ssd.clone();
    let exchanged_url = url.to_string();
    let complete_daemon = daemon.clone();
    JoinClient::new(url, config.clone(), cipher.clone())
        .on_exchanged(move |name| {
            if exchanged_ssd.replace_if_newer(Entity::new(name, 0)) {
                info!(node = name, url = %exchanged_url, "got new node");
            }
            if let Err(err) = exchanged_ssd.save() {
                warn!(%err, "failed to save discovery state after exchange");
            }
        })
        .on_complete(move || complete_daemon.reload())
}

fn boot_state(
    config: &Arc<DaemonConfig>,
    cipher: &Arc<TokenCipher>,
    ssd: &Arc<Ssd>,
    daemon: &Arc<Daemon>,
) -> BootState {
    let ssd = ssd.clone();
    let daemon = daemon.clone();
    BootState::new(config.clone(), cipher.clone()).on_joined(move |envelope| {
        if ssd.replace_if_newer(Entity::new(envelope.name.clone(), 0)) {
            daemon.reload();
        }
        if let Err(err) = ssd.save() {
            warn!(%err, "failed to save discovery state after join");
        }
    })
}

fn boot_address(cli: &Cli) -> anyhow::Result<SocketAddr> {
    let host = if cli.host.is_empty() {
        "0.0.0.0"
    } else {
        cli.host.as_str()
    };
    Ok(format!("{host}:{}", cli.port).parse()?)
}

fn print_join_commands(cli: &Cli, token: &str) {
    let proto = if cli.tls { "https" } else { "http" };
    let exe = std::env::args()
        .next()
        .unwrap_or_else(|| "tincmesh".to_string());

    println!("Use one of these commands to join the network:");
    println!();
    for host in bootstrap::advertised_hosts(cli) {
        println!(
            "  {exe} --token {token} --join {proto}://{host}:{}",
            cli.port
        );
    }
}

fn subscribe_firewall(cli: &Cli, events: &tincmesh_daemon::EventBus) {
    let boot_port = cli.port;
    events.configured.subscribe(move |configuration| {
        let vpn_port = configuration.main.port;
        let interface = configuration.interface.clone();
        tokio::spawn(async move {
            allow(&[&format!("{vpn_port}/udp")]).await;
            allow(&[
                "from", "any", "to", "any", "port",
                &boot_port.to_string(),
                "proto", "tcp",
            ])
            .await;
            allow(&[
                "in", "on", &interface, "to", "any", "port",
                &DISCOVERY_PORT.to_string(),
                "proto", "tcp",
            ])
            .await;
        });
    });
}

async fn allow(rule: &[&str]) {
    let mut args = vec!["allow"];
    args.extend_from_slice(rule);
    let rule = args.join(" ");
    match tokio::process::Command::new("ufw").args(&args).status().await {
        Ok(status) if status.success() => info!(rule = %rule, "opened firewall rule"),
        Ok(status) => warn!(rule = %rule, %status, "firewall rule failed"),
        Err(err) => warn!(rule = %rule, %err, "failed to run ufw"),
    }
}
