//! Interface address enumeration
//!
//! Fallback for `--advertise`: every address a remote joiner could possibly
//! dial, i.e. anything that is not loopback, link-local, multicast, or
//! unspecified.

use std::net::IpAddr;

use tracing::warn;

/// Addresses of all local interfaces usable as advertised endpoints
pub fn routable_addresses() -> Vec<String> {
    let addrs = match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => addrs,
        Err(err) => {
            warn!(%err, "failed to enumerate interface addresses");
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for ifaddr in addrs {
        let Some(storage) = ifaddr.address else {
            continue;
        };
        let ip: IpAddr = if let Some(v4) = storage.as_sockaddr_in() {
            IpAddr::V4(v4.ip())
        } else if let Some(v6) = storage.as_sockaddr_in6() {
            IpAddr::V6(v6.ip())
        } else {
            continue;
        };
        if is_routable(&ip) {
            out.push(ip.to_string());
        }
    }
    out
}

fn is_routable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !v4.is_loopback()
                && !v4.is_link_local()
                && !v4.is_multicast()
                && !v4.is_unspecified()
                && !v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !v6.is_loopback() && !v6.is_multicast() && !v6.is_unspecified() && !link_local
        }
    }
}
