use serde::{Deserialize, Serialize, Serializer};
use std::time::Duration;

/// Point-in-time extraction of tunnel interface state. Recomputed on every
/// poll, never persisted.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelSnapshot {
    pub interface_up: bool,
    pub listening_port: Option<u16>,
    pub peer_count: usize,
    #[serde(rename = "latestHandshakeAgeSecs", serialize_with = "secs_opt")]
    pub most_recent_handshake_age: Option<Duration>,
    pub peers: Vec<PeerRecord>,
    #[serde(skip)]
    pub raw_text: String,
}

impl TunnelSnapshot {
    pub fn down() -> Self {
        Self {
            interface_up: false,
            listening_port: None,
            peer_count: 0,
            most_recent_handshake_age: None,
            peers: Vec::new(),
            raw_text: String::new(),
        }
    }
}

/// One configured remote endpoint as reported by the tunnel tool. Identity
/// within a snapshot is the public key; records are not stable across polls.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: Option<String>,
    #[serde(rename = "handshakeAgeSecs", serialize_with = "secs_opt")]
    pub handshake_age: Option<Duration>,
    pub bytes_received: Option<u64>,
    pub bytes_sent: Option<u64>,
}

/// Host metrics, all best-effort percentages in [0, 100].
#[derive(Clone, Copy, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub load_percent: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthVerdict {
    pub status: HealthStatus,
    pub reason: String,
}

/// Heartbeat payload, built fresh each cycle and discarded after the single
/// send attempt.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatReport {
    pub server_id: String,
    pub wg_running: bool,
    pub load: f64,
    pub active_peers: usize,
    pub metrics: ReportMetrics,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetrics {
    pub cpu_usage: f64,
    pub ram_usage: f64,
    pub system_load: f64,
}

impl From<ResourceSample> for ReportMetrics {
    fn from(sample: ResourceSample) -> Self {
        Self {
            cpu_usage: sample.cpu_percent,
            ram_usage: sample.ram_percent,
            system_load: sample.load_percent,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct HeartbeatAck {
    #[serde(default)]
    pub success: bool,
}

/// Inbound instruction from the backend command channel, consumed once.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerCommand {
    AddPeer {
        #[serde(rename = "publicKey")]
        public_key: String,
        #[serde(rename = "allowedIPs", default)]
        allowed_ips: Option<String>,
    },
    RemovePeer {
        #[serde(rename = "publicKey")]
        public_key: String,
    },
}

/// Acknowledgment frame sent back over the command channel.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandAck {
    PeerAdded {
        success: bool,
        #[serde(rename = "publicKey")]
        public_key: String,
    },
    PeerRemoved {
        success: bool,
        #[serde(rename = "publicKey")]
        public_key: String,
    },
}

fn secs_opt<S>(age: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match age {
        Some(age) => serializer.serialize_some(&age.as_secs()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_peer_command_decodes_wire_shape() {
        let frame = r#"{"type":"add_peer","publicKey":"abc=","allowedIPs":"10.8.0.5/32"}"#;
        let cmd: PeerCommand = serde_json::from_str(frame).expect("decode add_peer");
        assert_eq!(
            cmd,
            PeerCommand::AddPeer {
                public_key: "abc=".to_string(),
                allowed_ips: Some("10.8.0.5/32".to_string()),
            }
        );
    }

    #[test]
    fn add_peer_command_allows_missing_range() {
        let frame = r#"{"type":"add_peer","publicKey":"abc="}"#;
        let cmd: PeerCommand = serde_json::from_str(frame).expect("decode add_peer");
        assert_eq!(
            cmd,
            PeerCommand::AddPeer {
                public_key: "abc=".to_string(),
                allowed_ips: None,
            }
        );
    }

    #[test]
    fn unknown_command_type_is_an_error() {
        let frame = r#"{"type":"rotate_keys","publicKey":"abc="}"#;
        assert!(serde_json::from_str::<PeerCommand>(frame).is_err());
    }

    #[test]
    fn ack_serializes_wire_shape() {
        let ack = CommandAck::PeerAdded {
            success: true,
            public_key: "abc=".to_string(),
        };
        let json = serde_json::to_value(&ack).expect("encode ack");
        assert_eq!(json["type"], "peer_added");
        assert_eq!(json["success"], true);
        assert_eq!(json["publicKey"], "abc=");
    }

    #[test]
    fn heartbeat_report_uses_backend_field_names() {
        let report = HeartbeatReport {
            server_id: "srv-1".to_string(),
            wg_running: true,
            load: 12.5,
            active_peers: 3,
            metrics: ReportMetrics {
                cpu_usage: 40.0,
                ram_usage: 55.0,
                system_load: 12.5,
            },
        };
        let json = serde_json::to_value(&report).expect("encode report");
        assert_eq!(json["serverId"], "srv-1");
        assert_eq!(json["wgRunning"], true);
        assert_eq!(json["activePeers"], 3);
        assert_eq!(json["metrics"]["cpuUsage"], 40.0);
        assert_eq!(json["metrics"]["systemLoad"], 12.5);
    }

    #[test]
    fn snapshot_serializes_handshake_age_as_seconds() {
        let mut snapshot = TunnelSnapshot::down();
        snapshot.interface_up = true;
        snapshot.most_recent_handshake_age = Some(Duration::from_secs(90));
        let json = serde_json::to_value(&snapshot).expect("encode snapshot");
        assert_eq!(json["latestHandshakeAgeSecs"], 90);
        assert_eq!(json["interfaceUp"], true);
        assert!(json.get("rawText").is_none());
    }
}
