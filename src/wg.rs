use crate::exec::{self, ExecError};
use crate::model::{PeerRecord, TunnelSnapshot};
use log::warn;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_INTERFACE: &str = "wg0";

/// Allowed-address range used when an add-peer request carries none.
pub const DEFAULT_ALLOWED_IPS: &str = "10.8.0.0/24";

const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
#[error("failed to {op} peer {public_key}")]
pub struct MutationError {
    pub op: &'static str,
    pub public_key: String,
    #[source]
    pub source: ExecError,
}

/// Minimal state for the heartbeat path: link state plus peer count.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimpleStatus {
    pub running: bool,
    pub peer_count: usize,
}

/// Simple read mode: same tool output as [`snapshot`], only two fields
/// extracted.
pub async fn simple_status(interface: &str) -> SimpleStatus {
    let running = interface_up(interface).await;
    let peer_count = match exec::run("wg", &["show", interface], TOOL_TIMEOUT).await {
        Ok(raw) => parse_status(&raw).peers.len(),
        Err(_) => 0,
    };
    SimpleStatus {
        running,
        peer_count,
    }
}

/// Detailed read mode: full snapshot with per-peer records. Tool failure or
/// a missing interface degrades to a down snapshot with zero peers.
pub async fn snapshot(interface: &str) -> TunnelSnapshot {
    let interface_up = interface_up(interface).await;
    let raw = match exec::run("wg", &["show", interface], TOOL_TIMEOUT).await {
        Ok(raw) => raw,
        Err(_) => return TunnelSnapshot::down(),
    };
    let parsed = parse_status(&raw);
    TunnelSnapshot {
        interface_up,
        listening_port: parsed.listening_port,
        peer_count: parsed.peers.len(),
        most_recent_handshake_age: most_recent_age(&parsed.peers),
        peers: parsed.peers,
        raw_text: raw,
    }
}

/// Link state from `ip link show`. The tunnel link layer does not always
/// report a conventional UP: point-to-point interfaces commonly sit in
/// state UNKNOWN, so UP, UNKNOWN, and a LOWER_UP carrier flag all count.
pub async fn interface_up(interface: &str) -> bool {
    match exec::run("ip", &["link", "show", interface], TOOL_TIMEOUT).await {
        Ok(raw) => link_is_up(&raw),
        Err(_) => false,
    }
}

pub async fn add_peer(
    interface: &str,
    public_key: &str,
    allowed_ips: Option<&str>,
) -> Result<(), MutationError> {
    exec::run("wg", &add_peer_args(interface, public_key, allowed_ips), TOOL_TIMEOUT)
        .await
        .map_err(|source| MutationError {
            op: "add",
            public_key: public_key.to_string(),
            source,
        })?;
    save_config(interface).await;
    Ok(())
}

pub async fn remove_peer(interface: &str, public_key: &str) -> Result<(), MutationError> {
    exec::run("wg", &remove_peer_args(interface, public_key), TOOL_TIMEOUT)
        .await
        .map_err(|source| MutationError {
            op: "remove",
            public_key: public_key.to_string(),
            source,
        })?;
    save_config(interface).await;
    Ok(())
}

fn add_peer_args<'a>(
    interface: &'a str,
    public_key: &'a str,
    allowed_ips: Option<&'a str>,
) -> [&'a str; 6] {
    [
        "set",
        interface,
        "peer",
        public_key,
        "allowed-ips",
        allowed_ips.unwrap_or(DEFAULT_ALLOWED_IPS),
    ]
}

fn remove_peer_args<'a>(interface: &'a str, public_key: &'a str) -> [&'a str; 5] {
    ["set", interface, "peer", public_key, "remove"]
}

/// Persist the running configuration. The live interface change already
/// succeeded by the time this runs, so a failed save is logged and dropped.
async fn save_config(interface: &str) {
    if let Err(err) = exec::run("wg-quick", &["save", interface], TOOL_TIMEOUT).await {
        warn!("config save failed for {interface} (live change kept): {err}");
    }
}

pub struct ParsedStatus {
    pub listening_port: Option<u16>,
    pub peers: Vec<PeerRecord>,
}

/// Parse the line-oriented status output. A `peer:` line opens a record;
/// indented field lines attribute to the current record; anything
/// unrecognized is ignored so new fields fail closed.
pub fn parse_status(raw: &str) -> ParsedStatus {
    let mut listening_port = None;
    let mut peers: Vec<PeerRecord> = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if let Some(key) = line.strip_prefix("peer:") {
            let key = key.trim();
            if !key.is_empty() {
                peers.push(PeerRecord {
                    public_key: key.to_string(),
                    ..PeerRecord::default()
                });
            }
            continue;
        }
        let Some(current) = peers.last_mut() else {
            if let Some(port) = line.strip_prefix("listening port:") {
                listening_port = port.trim().parse().ok();
            }
            continue;
        };
        if let Some(endpoint) = line.strip_prefix("endpoint:") {
            current.endpoint = Some(endpoint.trim().to_string());
        } else if let Some(allowed) = line.strip_prefix("allowed ips:") {
            current.allowed_ips = Some(allowed.trim().to_string());
        } else if let Some(phrase) = line.strip_prefix("latest handshake:") {
            current.handshake_age = parse_handshake_age(phrase);
        } else if let Some(transfer) = line.strip_prefix("transfer:") {
            let (received, sent) = parse_transfer(transfer);
            current.bytes_received = received;
            current.bytes_sent = sent;
        }
    }

    ParsedStatus {
        listening_port,
        peers,
    }
}

/// Minimum handshake age across peers that report one.
pub fn most_recent_age(peers: &[PeerRecord]) -> Option<Duration> {
    peers.iter().filter_map(|peer| peer.handshake_age).min()
}

pub fn link_is_up(raw: &str) -> bool {
    raw.contains("state UP") || raw.contains("state UNKNOWN") || raw.contains("LOWER_UP")
}

/// Convert the tool's relative handshake phrase ("2 minutes, 10 seconds
/// ago") to a duration. Each unit component may be absent; a phrase with no
/// recognized unit ("Never") yields None. Resolution is whatever the tool
/// chose to print, so treat the result as approximate.
pub fn parse_handshake_age(phrase: &str) -> Option<Duration> {
    static UNITS: OnceLock<Regex> = OnceLock::new();
    let units = UNITS.get_or_init(|| {
        Regex::new(r"(\d+)\s+(day|hour|minute|second)").expect("handshake unit pattern")
    });

    let mut total: Option<u64> = None;
    for capture in units.captures_iter(phrase) {
        let value: u64 = capture[1].parse().ok()?;
        let scale = match &capture[2] {
            "day" => 86_400,
            "hour" => 3_600,
            "minute" => 60,
            _ => 1,
        };
        total = Some(total.unwrap_or(0) + value * scale);
    }
    total.map(Duration::from_secs)
}

/// Extract the two humanized byte quantities from a `transfer:` line.
pub fn parse_transfer(line: &str) -> (Option<u64>, Option<u64>) {
    static TRANSFER: OnceLock<Regex> = OnceLock::new();
    let transfer = TRANSFER.get_or_init(|| {
        Regex::new(r"([\d.]+)\s+(B|KiB|MiB|GiB|TiB)\s+received,\s+([\d.]+)\s+(B|KiB|MiB|GiB|TiB)\s+sent")
            .expect("transfer pattern")
    });

    match transfer.captures(line) {
        Some(capture) => (
            humanized_bytes(&capture[1], &capture[2]),
            humanized_bytes(&capture[3], &capture[4]),
        ),
        None => (None, None),
    }
}

fn humanized_bytes(value: &str, unit: &str) -> Option<u64> {
    let value: f64 = value.parse().ok()?;
    let scale: f64 = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * scale).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_PEER_OUTPUT: &str = "\
interface: wg0
  public key: SERVERKEYAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=
  private key: (hidden)
  listening port: 51820

peer: PEERONEAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=
  endpoint: 203.0.113.4:51820
  allowed ips: 10.8.0.2/32
  latest handshake: 2 minutes, 10 seconds ago
  transfer: 1.21 KiB received, 6.37 MiB sent

peer: PEERTWOAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=
  allowed ips: 10.8.0.3/32
";

    #[test]
    fn parses_every_peer_block_without_cross_contamination() {
        let parsed = parse_status(TWO_PEER_OUTPUT);
        assert_eq!(parsed.listening_port, Some(51820));
        assert_eq!(parsed.peers.len(), 2);

        let first = &parsed.peers[0];
        assert_eq!(
            first.public_key,
            "PEERONEAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
        );
        assert_eq!(first.endpoint.as_deref(), Some("203.0.113.4:51820"));
        assert_eq!(first.allowed_ips.as_deref(), Some("10.8.0.2/32"));
        assert_eq!(first.handshake_age, Some(Duration::from_secs(130)));

        let second = &parsed.peers[1];
        assert_eq!(
            second.public_key,
            "PEERTWOAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
        );
        assert_eq!(second.endpoint, None);
        assert_eq!(second.allowed_ips.as_deref(), Some("10.8.0.3/32"));
        assert_eq!(second.handshake_age, None);
        assert_eq!(second.bytes_received, None);
    }

    #[test]
    fn peer_without_handshake_is_still_a_valid_record() {
        let parsed = parse_status("peer: NEWKEY=\n  allowed ips: 10.8.0.9/32\n");
        assert_eq!(parsed.peers.len(), 1);
        assert_eq!(parsed.peers[0].handshake_age, None);
    }

    #[test]
    fn empty_output_yields_zero_peers() {
        let parsed = parse_status("");
        assert!(parsed.peers.is_empty());
        assert_eq!(parsed.listening_port, None);
    }

    #[test]
    fn unknown_lines_are_ignored() {
        let raw = "peer: KEY=\n  preshared key: (hidden)\n  fancy new field: 7\n";
        let parsed = parse_status(raw);
        assert_eq!(parsed.peers.len(), 1);
        assert_eq!(parsed.peers[0], PeerRecord {
            public_key: "KEY=".to_string(),
            ..PeerRecord::default()
        });
    }

    #[test]
    fn transfer_quantities_convert_to_bytes() {
        let (received, sent) = parse_transfer(" 1.21 KiB received, 6.37 MiB sent");
        assert_eq!(received, Some(1239));
        assert_eq!(sent, Some(6_679_429));

        let (received, sent) = parse_transfer(" 92 B received, 180 B sent");
        assert_eq!(received, Some(92));
        assert_eq!(sent, Some(180));
    }

    #[test]
    fn malformed_transfer_line_degrades_to_none() {
        assert_eq!(parse_transfer("garbage"), (None, None));
    }

    #[test]
    fn handshake_phrases_convert_to_durations() {
        assert_eq!(
            parse_handshake_age(" 2 minutes, 10 seconds ago"),
            Some(Duration::from_secs(130))
        );
        assert_eq!(
            parse_handshake_age(" 45 seconds ago"),
            Some(Duration::from_secs(45))
        );
        assert_eq!(
            parse_handshake_age(" 1 minute ago"),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            parse_handshake_age(" 1 hour, 2 minutes ago"),
            Some(Duration::from_secs(3720))
        );
        assert_eq!(parse_handshake_age(" Never"), None);
    }

    #[test]
    fn most_recent_age_is_minimum_across_peers() {
        let peers = vec![
            PeerRecord {
                public_key: "a".into(),
                handshake_age: Some(Duration::from_secs(300)),
                ..PeerRecord::default()
            },
            PeerRecord {
                public_key: "b".into(),
                handshake_age: Some(Duration::from_secs(12)),
                ..PeerRecord::default()
            },
            PeerRecord {
                public_key: "c".into(),
                ..PeerRecord::default()
            },
        ];
        assert_eq!(most_recent_age(&peers), Some(Duration::from_secs(12)));
        assert_eq!(most_recent_age(&peers[2..]), None);
    }

    #[test]
    fn add_peer_passes_exact_key_and_range() {
        assert_eq!(
            add_peer_args("wg0", "ABC123=", Some("10.0.0.5/32")),
            ["set", "wg0", "peer", "ABC123=", "allowed-ips", "10.0.0.5/32"]
        );
    }

    #[test]
    fn add_peer_falls_back_to_default_range() {
        assert_eq!(
            add_peer_args("wg0", "ABC123=", None),
            ["set", "wg0", "peer", "ABC123=", "allowed-ips", DEFAULT_ALLOWED_IPS]
        );
    }

    #[test]
    fn remove_peer_passes_exact_key() {
        assert_eq!(
            remove_peer_args("wg0", "ABC123="),
            ["set", "wg0", "peer", "ABC123=", "remove"]
        );
    }

    #[test]
    fn link_state_up_indicators() {
        let up = "4: wg0: <POINTOPOINT,NOARP,UP,LOWER_UP> mtu 1420 qdisc noqueue state UNKNOWN";
        assert!(link_is_up(up));
        assert!(link_is_up("2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> state UP mode DEFAULT"));
        // UNKNOWN alone counts, as does a bare carrier flag.
        assert!(link_is_up("4: wg0: <POINTOPOINT,NOARP> state UNKNOWN"));
        assert!(link_is_up("4: wg0: <POINTOPOINT,LOWER_UP> state DORMANT"));
        assert!(!link_is_up("4: wg0: <POINTOPOINT,NOARP> state DOWN mode DEFAULT"));
    }
}
