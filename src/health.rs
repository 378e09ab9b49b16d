use crate::model::{HealthStatus, HealthVerdict, TunnelSnapshot};
use std::time::Duration;

/// Handshake older than this marks the tunnel degraded.
const STALE_HANDSHAKE: Duration = Duration::from_secs(120);

/// Map a snapshot to a verdict. The rules form an ordered decision list and
/// the order is part of the contract: total loss of connectivity outranks
/// staleness, staleness outranks partial health.
pub fn classify(snapshot: &TunnelSnapshot) -> HealthVerdict {
    if !snapshot.interface_up {
        return HealthVerdict {
            status: HealthStatus::Down,
            reason: "tunnel interface is down".to_string(),
        };
    }
    if snapshot.peer_count == 0 {
        return HealthVerdict {
            status: HealthStatus::Down,
            reason: "no peers connected".to_string(),
        };
    }
    let Some(age) = snapshot.most_recent_handshake_age else {
        return HealthVerdict {
            status: HealthStatus::Degraded,
            reason: "no handshake detected".to_string(),
        };
    };
    if age > STALE_HANDSHAKE {
        return HealthVerdict {
            status: HealthStatus::Degraded,
            reason: format!("last handshake {} ago", humanize(age)),
        };
    }
    HealthVerdict {
        status: HealthStatus::Healthy,
        reason: format!("{} peer(s) connected", snapshot.peer_count),
    }
}

fn humanize(age: Duration) -> String {
    let secs = age.as_secs();
    if secs < 60 {
        return format!("{secs}s");
    }
    let minutes = secs / 60;
    let rest = secs % 60;
    if rest == 0 {
        format!("{minutes}m")
    } else {
        format!("{minutes}m {rest}s")
    }
}
