//! Outer/inner packet-loss measurement.
//!
//! [`Prober`] issues a `ping` toward a public address (the outer path) and
//! the tunnel's private peer address (the encapsulated path) and parses the
//! reported packet loss. A spawn failure or unparseable output is treated as
//! 100% loss rather than propagated — from the classifier's point of view a
//! ping we can't interpret is indistinguishable from one that got no
//! replies.

use std::process::Stdio;

use regex::Regex;
use tokio::process::Command;
use tokio::time::Duration;

/// Loss measurement for one tunnel's outer and inner paths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossPair {
    pub public_loss: f64,
    pub gre_loss: f64,
}

#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, public_ip: &str, gre_ip: &str) -> LossPair;
}

/// Shells out to the system `ping` binary for both measurements, run
/// concurrently.
pub struct PingProber {
    pub count: u32,
    pub timeout_sec: u64,
}

#[async_trait::async_trait]
impl Prober for PingProber {
    async fn probe(&self, public_ip: &str, gre_ip: &str) -> LossPair {
        let (public_loss, gre_loss) = tokio::join!(
            ping_loss_percent(public_ip, self.count, self.timeout_sec),
            ping_loss_percent(gre_ip, self.count, self.timeout_sec),
        );
        LossPair {
            public_loss,
            gre_loss,
        }
    }
}

/// Runs `ping -c <count> -W <timeout_sec> <ip>` and extracts the reported
/// packet loss percentage. Returns 100.0 if the process can't be spawned, is
/// killed by the overall timeout, or its output doesn't contain a
/// recognizable "N% packet loss" line.
async fn ping_loss_percent(ip: &str, count: u32, timeout_sec: u64) -> f64 {
    let spawn = Command::new("ping")
        .args(["-c", &count.to_string(), "-W", &timeout_sec.to_string(), ip])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    // Give the whole call a little headroom over ping's own -W timeout in
    // case it doesn't honor it for every probe.
    let overall_timeout = Duration::from_secs(timeout_sec * u64::from(count) + timeout_sec + 2);
    let output = match tokio::time::timeout(overall_timeout, spawn).await {
        Ok(Ok(o)) => o,
        Ok(Err(_)) | Err(_) => return 100.0,
    };

    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    parse_loss_percent(&combined).unwrap_or(100.0)
}

fn parse_loss_percent(text: &str) -> Option<f64> {
    let re = Regex::new(r"([0-9]+(?:\.[0-9]+)?)%\s*packet loss").ok()?;
    let caps = re.captures(text)?;
    caps.get(1)?.as_str().parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_ping_summary() {
        let out = "\
PING 10.10.7.2 (10.10.7.2) 56(84) bytes of data.
64 bytes from 10.10.7.2: icmp_seq=1 ttl=64 time=0.5 ms

--- 10.10.7.2 ping statistics ---
5 packets transmitted, 4 received, 20% packet loss, time 4005ms
rtt min/avg/max/mdev = 0.4/0.5/0.6/0.1 ms
";
        assert_eq!(parse_loss_percent(out), Some(20.0));
    }

    #[test]
    fn parses_total_loss() {
        let out = "\
--- 10.10.7.2 ping statistics ---
5 packets transmitted, 0 received, 100% packet loss, time 4016ms
";
        assert_eq!(parse_loss_percent(out), Some(100.0));
    }

    #[test]
    fn unparseable_output_yields_none() {
        assert_eq!(parse_loss_percent("ping: unknown host"), None);
    }
}
