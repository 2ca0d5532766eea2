//! Platform shim for post-Ready network setup
//!
//! tincd creates the tun interface but leaves addressing to its hooks; the
//! supervisor performs the equivalent of `tinc-up` here.

use tracing::warn;

use tincmesh_common::Result;

/// Assign the node's /32 address and bring the interface up.
///
/// Address assignment tolerates failure (the address survives restarts of
/// the supervised process, so `ip addr add` reports it as already present);
/// failing to bring the link up is an error.
pub async fn configure(interface: &str, ip: &str) -> Result<()> {
    if let Err(err) = set_address(interface, ip).await {
        warn!(interface, ip, %err, "address assignment failed");
    }
    link_up(interface).await
}

#[cfg(target_os = "linux")]
pub async fn set_address(interface: &str, ip: &str) -> Result<()> {
    run_checked(
        "ip",
        &["addr", "add", &format!("{ip}/32"), "dev", interface],
    )
    .await
}

#[cfg(target_os = "linux")]
pub async fn link_up(interface: &str) -> Result<()> {
    run_checked("ip", &["link", "set", "dev", interface, "up"]).await
}

#[cfg(not(target_os = "linux"))]
pub async fn set_address(interface: &str, _ip: &str) -> Result<()> {
    warn!(interface, "address assignment not supported on this platform");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub async fn link_up(interface: &str) -> Result<()> {
    warn!(interface, "link setup not supported on this platform");
    Ok(())
}

#[cfg(target_os = "linux")]
async fn run_checked(program: &str, args: &[&str]) -> Result<()> {
    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await?;
    if !status.success() {
        return Err(tincmesh_common::Error::Daemon(format!(
            "{program} {} failed: {status}",
            args.join(" ")
        )));
    }
    Ok(())
}
