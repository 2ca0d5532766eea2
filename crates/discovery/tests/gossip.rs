//! Gossip merge tests: a real discovery server polled by a real client

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use tincmesh_common::conf::{MainConfig, HOSTS_DIR, MAIN_FILE};
use tincmesh_daemon::DaemonConfig;
use tincmesh_discovery::{router, Client, DiscoveryState, Entity, Ssd};

struct Node {
    _dir: tempfile::TempDir,
    config: Arc<DaemonConfig>,
    ssd: Arc<Ssd>,
}

fn node(name: &str) -> Node {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join(HOSTS_DIR)).unwrap();
    MainConfig {
        name: name.to_string(),
        interface: format!("tun{}", name.to_uppercase()),
        ..Default::default()
    }
    .save(dir.path().join(MAIN_FILE))
    .unwrap();

    let config = Arc::new(DaemonConfig::default_in(dir.path()));
    let ssd = Arc::new(Ssd::new(dir.path().join("discovery.json")));
    Node {
        _dir: dir,
        config,
        ssd,
    }
}

async fn serve(node: &Node) -> (String, CancellationToken) {
    let state = DiscoveryState {
        ssd: node.ssd.clone(),
        config: node.config.clone(),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
    });
    (address, cancel)
}

#[tokio::test]
async fn poller_merges_newer_host_and_persists_bytes() {
    let served_bytes = b"Subnet = 172.16.9.1/32\nPort = 30123\n";

    // node A serves one host at version 7
    let a = node("nodea");
    a.config.add_host("nodea", served_bytes).unwrap();
    a.ssd.replace(Entity::new("nodea", 7));
    let (address, server_cancel) = serve(&a).await;

    // node B polls A
    let b = node("nodeb");
    let root = CancellationToken::new();
    let client = Client::new(
        b.ssd.clone(),
        b.config.clone(),
        Duration::from_millis(50),
        root.child_token(),
    );
    assert!(client.watch(address.clone()));
    assert!(!client.watch(address.clone()), "watch is idempotent");

    timeout(Duration::from_secs(5), async {
        while b.ssd.get_if_newer("nodea", 6).is_none() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("merge within deadline");

    // version published implies the file is on disk with the served bytes
    assert_eq!(b.ssd.get_if_newer("nodea", -1).unwrap().version, 7);
    assert_eq!(b.config.host("nodea").unwrap(), served_bytes);
    // merged host is dialed
    assert_eq!(b.config.main().unwrap().connect_to, vec!["nodea"]);
    // the cycle ended with a save
    assert!(b.ssd.path().exists());

    client.close().await;
    server_cancel.cancel();
}

#[tokio::test]
async fn stale_versions_are_not_refetched() {
    let a = node("nodea");
    a.config.add_host("nodea", b"Subnet = 172.16.9.1/32\n").unwrap();
    a.ssd.replace(Entity::new("nodea", 3));
    let (address, server_cancel) = serve(&a).await;

    let b = node("nodeb");
    // B already holds a newer record than A serves
    b.ssd.replace(Entity::new("nodea", 9));

    let root = CancellationToken::new();
    let client = Client::new(
        b.ssd.clone(),
        b.config.clone(),
        Duration::from_millis(50),
        root.child_token(),
    );
    client.watch(address);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(b.ssd.get_if_newer("nodea", -1).unwrap().version, 9);
    // no file was written for the stale record
    assert!(b.config.host("nodea").is_err());

    client.close().await;
    server_cancel.cancel();
}

#[tokio::test]
async fn host_route_respects_after_parameter() {
    let a = node("nodea");
    a.config.add_host("nodea", b"Subnet = 172.16.9.1/32\n").unwrap();
    a.ssd.replace(Entity::new("nodea", 5));
    let (address, server_cancel) = serve(&a).await;

    let http = reqwest::Client::new();
    let ok = http
        .get(format!("http://{address}/host/nodea?after=-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    assert_eq!(ok.headers()["x-name"], "nodea");
    assert_eq!(ok.headers()["x-version"], "5");

    let stale = http
        .get(format!("http://{address}/host/nodea?after=5"))
        .send()
        .await
        .unwrap();
    assert_eq!(stale.status(), 404);

    let missing = http
        .get(format!("http://{address}/host/ghost?after=-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    server_cancel.cancel();
}

#[tokio::test]
async fn forget_stops_the_requester() {
    let a = node("nodea");
    a.ssd.replace(Entity::new("nodea", 1));
    let (address, server_cancel) = serve(&a).await;

    let b = node("nodeb");
    let root = CancellationToken::new();
    let client = Client::new(
        b.ssd.clone(),
        b.config.clone(),
        Duration::from_millis(50),
        root.child_token(),
    );
    client.watch(address.clone());
    timeout(Duration::from_secs(5), client.forget(&address))
        .await
        .expect("forget joins the requester");

    // a forgotten address can be watched again
    assert!(client.watch(address));
    client.close().await;
    server_cancel.cancel();
}
