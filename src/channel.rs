use crate::model::{CommandAck, PeerCommand};
use crate::wg;
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Build the connection address from the configured endpoint and the
/// server's identity.
pub fn command_endpoint(base: &str, server_id: &str, api_key: Option<&str>) -> String {
    let mut url = format!("{}?serverId={}", base.trim_end_matches('/'), server_id);
    if let Some(key) = api_key {
        url.push_str("&apiKey=");
        url.push_str(key);
    }
    url
}

/// Own the command connection for the life of the process: connect, serve,
/// and on any disconnect wait a fixed delay and try again. No backoff
/// ceiling, no give-up condition.
pub async fn run_channel(endpoint: String, interface: String) {
    loop {
        info!("command channel connecting");
        match connect_and_serve(&endpoint, &interface).await {
            Ok(()) => info!(
                "command channel closed, reconnecting in {}s",
                RECONNECT_DELAY.as_secs()
            ),
            Err(err) => warn!(
                "command channel error: {err:#}, reconnecting in {}s",
                RECONNECT_DELAY.as_secs()
            ),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// One connection attempt: decode inbound frames, dispatch commands, and
/// acknowledge each over the same connection.
async fn connect_and_serve(endpoint: &str, interface: &str) -> Result<()> {
    let (stream, _response) = connect_async(endpoint).await?;
    info!("command channel connected");
    let (mut sink, mut stream) = stream.split();

    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => {
                let command = match serde_json::from_str::<PeerCommand>(&text) {
                    Ok(command) => command,
                    Err(_) => {
                        warn!("ignoring unrecognized command frame");
                        continue;
                    }
                };
                let ack = dispatch(command, interface).await;
                sink.send(Message::Text(serde_json::to_string(&ack)?)).await?;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

async fn dispatch(command: PeerCommand, interface: &str) -> CommandAck {
    match command {
        PeerCommand::AddPeer {
            public_key,
            allowed_ips,
        } => {
            let success = match wg::add_peer(interface, &public_key, allowed_ips.as_deref()).await
            {
                Ok(()) => {
                    info!("peer added: {public_key}");
                    true
                }
                Err(err) => {
                    warn!("{:#}", anyhow::Error::new(err));
                    false
                }
            };
            CommandAck::PeerAdded {
                success,
                public_key,
            }
        }
        PeerCommand::RemovePeer { public_key } => {
            let success = match wg::remove_peer(interface, &public_key).await {
                Ok(()) => {
                    info!("peer removed: {public_key}");
                    true
                }
                Err(err) => {
                    warn!("{:#}", anyhow::Error::new(err));
                    false
                }
            };
            CommandAck::PeerRemoved {
                success,
                public_key,
            }
        }
    }
}
