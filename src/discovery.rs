//! Tunnel discovery from the OS link table.
//!
//! [`Discovery`] is the trait the scheduler depends on; [`LinkTableDiscovery`]
//! is the concrete adapter that shells out to `ip -d addr show` and parses
//! GRE interface blocks.

use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};
use std::process::Stdio;
use tokio::process::Command;

use crate::model::TunnelDescriptor;

/// Abstraction over "what tunnels currently exist on this host", so the
/// scheduler never depends on the shell-out mechanics.
#[async_trait::async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<TunnelDescriptor>, DiscoveryError>;
}

#[derive(Debug)]
pub enum DiscoveryError {
    SpawnFailed(String),
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::SpawnFailed(e) => write!(f, "failed to run ip addr show: {e}"),
        }
    }
}

impl std::error::Error for DiscoveryError {}

/// Parses `ip -d addr show` output into [`TunnelDescriptor`]s.
///
/// Interfaces are matched against `iface_regex`, which must contain exactly
/// one capture group yielding the tunnel id (e.g. `^gre-ir-(\d+)$`). Blocks
/// that don't match the regex, or that are missing a `link/gre ... peer ...`
/// or `inet a.b.c.d/nn` line, are skipped rather than treated as fatal —
/// discovery degrades to "fewer tunnels observed this round", never crashes
/// the scheduler.
pub struct LinkTableDiscovery {
    iface_regex: Regex,
}

impl LinkTableDiscovery {
    pub fn new(iface_regex: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            iface_regex: Regex::new(iface_regex)?,
        })
    }
}

#[async_trait::async_trait]
impl Discovery for LinkTableDiscovery {
    async fn discover(&self) -> Result<Vec<TunnelDescriptor>, DiscoveryError> {
        let out = run_ip_addr_show().await?;
        Ok(parse_link_table(&out, &self.iface_regex))
    }
}

async fn run_ip_addr_show() -> Result<String, DiscoveryError> {
    let output = Command::new("ip")
        .args(["-d", "addr", "show"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| DiscoveryError::SpawnFailed(e.to_string()))?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_link_table(out: &str, iface_regex: &Regex) -> Vec<TunnelDescriptor> {
    let iface_line = Regex::new(r"^\d+:\s+([^\s:@]+)@").unwrap();
    let peer_line = Regex::new(r"link/gre\s+(\S+)\s+peer\s+(\S+)").unwrap();
    let inet_line = Regex::new(r"\s+inet\s+(\d+\.\d+\.\d+\.\d+)/(\d+)").unwrap();

    let mut tunnels = Vec::new();
    for block in out.split("\n\n") {
        let Some(iface_caps) = iface_line.captures(block) else {
            continue;
        };
        let iface = iface_caps.get(1).unwrap().as_str();
        let Some(id_caps) = iface_regex.captures(iface) else {
            continue;
        };
        let Some(tid) = id_caps
            .get(1)
            .and_then(|m| m.as_str().parse::<u32>().ok())
        else {
            continue;
        };

        let Some(peer_caps) = peer_line.captures(block) else {
            continue;
        };
        let Some(inet_caps) = inet_line.captures(block) else {
            continue;
        };

        let peer_public = peer_caps.get(2).unwrap().as_str().to_string();
        let local_private = inet_caps.get(1).unwrap().as_str().to_string();
        let Ok(mask) = inet_caps.get(2).unwrap().as_str().parse::<u8>() else {
            continue;
        };

        let Some(peer_private) = other_host_in_30(&local_private, mask) else {
            continue;
        };

        tunnels.push(TunnelDescriptor {
            id: tid,
            iface_local: iface.to_string(),
            iface_remote: format!("gre-kh-{tid}"),
            peer_public,
            local_private,
            peer_private,
        });
    }
    tunnels
}

/// Given one host's address and prefix length on a point-to-point-ish /30
/// (or similar small subnet), return the other host's address.
///
/// Mirrors the Python reference's `other_host_in_30`: for a true /30 there
/// are exactly two usable hosts, so this returns whichever one isn't
/// `cidr_ip`. For other prefix lengths it falls back to the first usable
/// host that differs from `cidr_ip`.
fn other_host_in_30(cidr_ip: &str, mask: u8) -> Option<String> {
    let ip: Ipv4Addr = cidr_ip.parse().ok()?;
    let net = ipnetwork::Ipv4Network::new(ip, mask).ok()?;
    let hosts: Vec<Ipv4Addr> = net.iter().collect();
    let usable: Vec<Ipv4Addr> = if hosts.len() > 2 {
        hosts[1..hosts.len() - 1].to_vec()
    } else {
        hosts
    };
    if usable.len() == 2 {
        return Some(if usable[0] == ip {
            usable[1].to_string()
        } else {
            usable[0].to_string()
        });
    }
    usable
        .into_iter()
        .find(|h| *h != ip)
        .map(|h| IpAddr::V4(h).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN group default qlen 1000
    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00
    inet 127.0.0.1/8 scope host lo
       valid_lft forever preferred_lft forever

7: gre-ir-7@NONE: <POINTOPOINT,NOARP,UP,LOWER_UP> mtu 1476 qdisc noqueue state UNKNOWN group default qlen 1000
    link/gre 10.0.0.1 peer 203.0.113.5
    inet 10.10.7.1/30 scope global gre-ir-7
       valid_lft forever preferred_lft forever

9: eth0@NONE: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue state UP group default qlen 1000
    link/ether 02:42:ac:11:00:02 brd ff:ff:ff:ff:ff:ff
    inet 172.17.0.2/16 brd 172.17.255.255 scope global eth0
       valid_lft forever preferred_lft forever
";

    #[test]
    fn parses_gre_block_and_skips_others() {
        let re = Regex::new(r"^gre-ir-(\d+)$").unwrap();
        let tunnels = parse_link_table(SAMPLE, &re);
        assert_eq!(tunnels.len(), 1);
        let t = &tunnels[0];
        assert_eq!(t.id, 7);
        assert_eq!(t.iface_local, "gre-ir-7");
        assert_eq!(t.iface_remote, "gre-kh-7");
        assert_eq!(t.peer_public, "203.0.113.5");
        assert_eq!(t.local_private, "10.10.7.1");
        assert_eq!(t.peer_private, "10.10.7.2");
    }

    #[test]
    fn no_matching_interfaces_yields_empty() {
        let re = Regex::new(r"^gre-ir-(\d+)$").unwrap();
        let tunnels = parse_link_table("1: lo: <LOOPBACK>\n    link/loopback\n", &re);
        assert!(tunnels.is_empty());
    }

    #[test]
    fn other_host_in_30_flips_correctly() {
        assert_eq!(
            other_host_in_30("10.10.7.1", 30).as_deref(),
            Some("10.10.7.2")
        );
        assert_eq!(
            other_host_in_30("10.10.7.2", 30).as_deref(),
            Some("10.10.7.1")
        );
    }
}
