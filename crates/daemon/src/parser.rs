//! Log-event parser
//!
//! Classifies single tincd log lines into lifecycle events. tincd at debug
//! level logs subnet propagation like:
//!
//! `Sending ADD_SUBNET to everyone (BROADCAST): 10 3f17d1ce node 10.155.0.0/16#10`
//!
//! The parser is stateless; lines that match none of the patterns are
//! ignored.

use once_cell::sync::Lazy;
use regex::Regex;

static ADD_SUBNET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"ADD_SUBNET\s+from\s+(\S+)\s+\((\S+)\s+port\s+(\d+)\):\s+\d+\s+\w+\s+(\S+)\s+([^#]+)")
        .expect("valid pattern")
});

static DEL_SUBNET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"DEL_SUBNET\s+[^:]+:\s+\d+\s+\w+\s+(\S+)\s+([^#]+)").expect("valid pattern")
});

static READY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Ready$").expect("valid pattern"));

/// Node that forwarded the announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertiser {
    pub node: String,
    pub host: String,
    pub port: String,
}

/// Node the announcement is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub node: String,
    pub subnet: String,
}

/// A peer subnet became reachable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetAdded {
    pub advertising: Advertiser,
    pub peer: Peer,
}

/// A peer subnet went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetRemoved {
    pub peer: Peer,
}

/// Event extracted from one log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    SubnetAdded(SubnetAdded),
    SubnetRemoved(SubnetRemoved),
    Ready,
}

/// Classify one log line. Returns `None` for lines carrying no event.
pub fn parse_line(line: &str) -> Option<LogEvent> {
    if let Some(caps) = ADD_SUBNET.captures(line) {
        return Some(LogEvent::SubnetAdded(SubnetAdded {
            advertising: Advertiser {
                node: caps[1].to_string(),
                host: caps[2].to_string(),
                port: caps[3].to_string(),
            },
            peer: Peer {
                node: caps[4].to_string(),
                subnet: caps[5].trim().to_string(),
            },
        }));
    }
    if let Some(caps) = DEL_SUBNET.captures(line) {
        return Some(LogEvent::SubnetRemoved(SubnetRemoved {
            peer: Peer {
                node: caps[1].to_string(),
                subnet: caps[2].trim().to_string(),
            },
        }));
    }
    if READY.is_match(line) {
        return Some(LogEvent::Ready);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_subnet() {
        let line = "Got ADD_SUBNET from gateway (203.0.113.9 port 655): 10 3f17d1ce nodeb 172.16.4.2/32#10";
        match parse_line(line) {
            Some(LogEvent::SubnetAdded(ev)) => {
                assert_eq!(ev.advertising.node, "gateway");
                assert_eq!(ev.advertising.host, "203.0.113.9");
                assert_eq!(ev.advertising.port, "655");
                assert_eq!(ev.peer.node, "nodeb");
                assert_eq!(ev.peer.subnet, "172.16.4.2/32");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_del_subnet() {
        let line =
            "Sending DEL_SUBNET to everyone (BROADCAST): 11 3f17d1ce nodeb 172.16.4.2/32#10";
        match parse_line(line) {
            Some(LogEvent::SubnetRemoved(ev)) => {
                assert_eq!(ev.peer.node, "nodeb");
                assert_eq!(ev.peer.subnet, "172.16.4.2/32");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_mac_subnet_captured_up_to_weight() {
        let line =
            "Sending DEL_SUBNET to everyone (BROADCAST): 11 3f17d1ce peer005 6e:6a:5e:26:39:d2#10";
        match parse_line(line) {
            Some(LogEvent::SubnetRemoved(ev)) => {
                assert_eq!(ev.peer.subnet, "6e:6a:5e:26:39:d2");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_ready() {
        assert_eq!(parse_line("Ready"), Some(LogEvent::Ready));
        assert_eq!(parse_line("Ready to roll"), None);
        assert_eq!(parse_line(" Ready"), None);
    }

    #[test]
    fn test_noise_ignored() {
        assert_eq!(parse_line("Connection from 10.0.0.4 port 42012"), None);
        assert_eq!(parse_line(""), None);
    }
}
