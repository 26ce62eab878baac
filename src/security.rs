//! HMAC request signing/verification and CIDR-based source allow-listing.
//!
//! Every Agent RPC request carries an `x-ts` (unix seconds) and `x-sig`
//! header. The signature covers `ASCII(x-ts) || "." || raw_body`, keyed by
//! the shared secret configured for both Coordinator and Agent.

use std::net::IpAddr;

use hmac::{Hmac, Mac};
use ipnetwork::IpNetwork;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA256 signature over `ts.as_bytes() || b"." || body`.
pub fn hmac_sign(secret: &str, body: &[u8], ts: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(body);
    hex_encode(&mac.finalize().into_bytes())
}

/// Verify a request signature and timestamp freshness.
///
/// Returns `false` if `ts` doesn't parse as an integer, if it falls outside
/// `max_skew_sec` of the current time, or if the signature doesn't match —
/// all three are folded into one boolean so the caller can't leak which
/// check failed via response timing or content.
pub fn hmac_verify(secret: &str, body: &[u8], ts: &str, sig: &str, max_skew_sec: i64) -> bool {
    let Ok(t) = ts.parse::<i64>() else {
        return false;
    };
    let now = crate::state::now_unix() as i64;
    if (now - t).abs() > max_skew_sec {
        return false;
    }
    let expected = hmac_sign(secret, body, ts);
    constant_time_eq(expected.as_bytes(), sig.as_bytes())
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
///
/// Always iterates over the full length of `expected` regardless of
/// `provided` length, so an attacker cannot determine the signature length
/// from response times.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for i in 0..expected.len() {
        let p = if i < provided.len() { provided[i] } else { 0xff };
        diff |= expected[i] ^ p;
    }
    diff == 0
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Returns true if `addr` falls within any of `cidrs`. An empty `cidrs` list
/// allows every address — callers should treat that as "allow-list
/// disabled", not "deny all".
pub fn cidr_allowed(addr: IpAddr, cidrs: &[String]) -> bool {
    if cidrs.is_empty() {
        return true;
    }
    cidrs.iter().any(|c| {
        c.parse::<IpNetwork>()
            .map(|net| net.contains(addr))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let secret = "shared-secret";
        let body = br#"{"command_id":"abc","iface":"gre-ir-7"}"#;
        let ts = crate::state::now_unix().to_string();
        let sig = hmac_sign(secret, body, &ts);
        assert!(hmac_verify(secret, body, &ts, &sig, 30));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let body = b"payload";
        let ts = crate::state::now_unix().to_string();
        let sig = hmac_sign("secret-a", body, &ts);
        assert!(!hmac_verify("secret-b", body, &ts, &sig, 30));
    }

    #[test]
    fn verify_rejects_stale_timestamp() {
        let secret = "shared-secret";
        let body = b"payload";
        let ts = (crate::state::now_unix() as i64 - 120).to_string();
        let sig = hmac_sign(secret, body, &ts);
        assert!(!hmac_verify(secret, body, &ts, &sig, 30));
    }

    #[test]
    fn verify_rejects_malformed_timestamp() {
        assert!(!hmac_verify("secret", b"payload", "not-a-number", "deadbeef", 30));
    }

    #[test]
    fn cidr_allowed_matches_within_block() {
        let cidrs = vec!["10.0.0.0/8".to_string(), "192.168.1.0/24".to_string()];
        assert!(cidr_allowed("10.1.2.3".parse().unwrap(), &cidrs));
        assert!(cidr_allowed("192.168.1.5".parse().unwrap(), &cidrs));
        assert!(!cidr_allowed("203.0.113.5".parse().unwrap(), &cidrs));
    }

    #[test]
    fn cidr_allowed_empty_list_allows_all() {
        assert!(cidr_allowed("203.0.113.5".parse().unwrap(), &[]));
    }
}
