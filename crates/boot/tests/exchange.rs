//! End-to-end boot exchange over a real HTTP server

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use tincmesh_boot::{boot_router, BootState, Envelope, JoinClient};
use tincmesh_common::conf::{MainConfig, HOSTS_DIR, MAIN_FILE};
use tincmesh_common::TokenCipher;
use tincmesh_daemon::DaemonConfig;

fn node(name: &str) -> (tempfile::TempDir, Arc<DaemonConfig>) {
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
    (dir, config)
}

async fn serve(state: BootState) -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, boot_router(state))
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
    });
    (url, cancel)
}

#[tokio::test]
async fn join_exchanges_host_files_both_ways() {
    let a_host_file = b"Subnet = 172.16.0.1/32\nPort = 30001\n";
    let b_host_file = b"Subnet = 172.16.0.2/32\nPort = 30002\n";

    let (_a_dir, a_config) = node("nodea");
    a_config.add_host("nodea", a_host_file).unwrap();

    let (_b_dir, b_config) = node("nodeb");
    b_config.add_host("nodeb", b_host_file).unwrap();

    let cipher = Arc::new(TokenCipher::new("T"));
    let joined = Arc::new(AtomicUsize::new(0));
    let state = {
        let joined = joined.clone();
        BootState::new(a_config.clone(), cipher.clone())
            .on_joined(move |_| {
                joined.fetch_add(1, Ordering::SeqCst);
            })
    };
    let (url, cancel) = serve(state).await;

    let exchanged = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let completed = Arc::new(AtomicUsize::new(0));
    let client = {
        let exchanged = exchanged.clone();
        let completed = completed.clone();
        JoinClient::new(url.as_str(), b_config.clone(), cipher.clone())
            .on_exchanged(move |name| exchanged.lock().push(name.to_string()))
            .on_complete(move || {
                completed.fetch_add(1, Ordering::SeqCst);
            })
    };
    client.exchange().await.unwrap();

    // B now holds A's host file byte for byte, and dials it
    assert_eq!(b_config.host("nodea").unwrap(), a_host_file);
    assert!(b_config
        .main()
        .unwrap()
        .connect_to
        .contains(&"nodea".to_string()));
    // A persisted B's envelope
    assert_eq!(a_config.host("nodeb").unwrap(), b_host_file);

    assert_eq!(*exchanged.lock(), vec!["nodea".to_string()]);
    assert_eq!(completed.load(Ordering::SeqCst), 1);

    // the joined hook fires shortly after the response
    tokio::time::timeout(Duration::from_secs(2), async {
        while joined.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("joined hook fired");

    cancel.cancel();
}

#[tokio::test]
async fn wrong_token_is_unauthorized_and_persists_nothing() {
    let (_a_dir, a_config) = node("nodea");
    a_config.add_host("nodea", b"Subnet = 172.16.0.1/32\n").unwrap();

    let state = BootState::new(a_config.clone(), Arc::new(TokenCipher::new("T1")));
    let (url, cancel) = serve(state).await;

    let sealed = Envelope {
        name: "intruder".to_string(),
        config: b"Subnet = 10.0.0.99/32\n".to_vec(),
    }
    .seal(&TokenCipher::new("T2"))
    .unwrap();

    let response = reqwest::Client::new()
        .post(&url)
        .body(sealed)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert!(a_config.host("intruder").is_err());

    cancel.cancel();
}

#[tokio::test]
async fn malformed_name_is_unprocessable() {
    let (_a_dir, a_config) = node("nodea");
    a_config.add_host("nodea", b"Subnet = 172.16.0.1/32\n").unwrap();

    let cipher = Arc::new(TokenCipher::new("T"));
    let state = BootState::new(a_config.clone(), cipher.clone());
    let (url, cancel) = serve(state).await;

    let sealed = Envelope {
        name: "Not-Canonical".to_string(),
        config: b"x".to_vec(),
    }
    .seal(&cipher)
    .unwrap();

    let response = reqwest::Client::new()
        .post(&url)
        .body(sealed)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);

    cancel.cancel();
}

#[tokio::test]
async fn oversized_payload_is_bad_request() {
    let (_a_dir, a_config) = node("nodea");
    let state = BootState::new(a_config, Arc::new(TokenCipher::new("T")));
    let (url, cancel) = serve(state).await;

    let response = reqwest::Client::new()
        .post(&url)
        .body(vec![0u8; 16 * 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    cancel.cancel();
}

#[tokio::test]
async fn join_retries_until_server_appears() {
    let (_b_dir, b_config) = node("nodeb");
    b_config.add_host("nodeb", b"Subnet = 172.16.0.2/32\n").unwrap();

    let cipher = Arc::new(TokenCipher::new("T"));
    // nothing is listening here
    let client = JoinClient::new("http://127.0.0.1:9/", b_config, cipher);

    let cancel = CancellationToken::new();
    let runner = tokio::spawn({
        let cancel = cancel.clone();
        async move { client.run(cancel, Duration::from_millis(50)).await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!runner.is_finished(), "client keeps retrying");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .expect("join loop exits on cancellation")
        .unwrap();
}
