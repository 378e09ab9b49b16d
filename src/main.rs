mod channel;
mod config;
mod exec;
mod health;
mod heartbeat;
mod http;
mod metrics;
mod model;
mod wg;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use config::{default_config_path, load_config, AgentConfig, FileConfig};
use heartbeat::BackendClient;
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "wg-sentry", about = "WireGuard tunnel monitoring and control agent")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, env = "WG_SENTRY_INTERFACE")]
    interface: Option<String>,
    #[arg(long, env = "WG_SENTRY_BACKEND_URL")]
    backend_url: Option<String>,
    #[arg(long, env = "WG_SENTRY_SERVER_ID")]
    server_id: Option<String>,
    #[arg(long, env = "WG_SENTRY_API_KEY")]
    api_key: Option<String>,
    #[arg(long, env = "WG_SENTRY_COMMAND_URL")]
    command_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitoring agent.
    Agent {
        /// Heartbeat period in seconds.
        #[arg(long)]
        heartbeat_interval: Option<u64>,
        /// Port for the local read-only status endpoints.
        #[arg(long)]
        http_port: Option<u16>,
    },
    /// Print the detailed tunnel snapshot.
    Status,
    /// Print the health verdict.
    Health,
    /// Print the per-peer records.
    Peers,
    /// Attach a peer to the tunnel.
    AddPeer {
        public_key: String,
        #[arg(long)]
        allowed_ips: Option<String>,
    },
    /// Detach a peer from the tunnel.
    RemovePeer { public_key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let file = load_config(
        args.config
            .clone()
            .unwrap_or_else(default_config_path)
            .as_path(),
    )?;
    let interface = args
        .interface
        .clone()
        .or_else(|| file.interface.clone())
        .unwrap_or_else(|| wg::DEFAULT_INTERFACE.to_string());

    match &args.command {
        Command::Agent {
            heartbeat_interval,
            http_port,
        } => {
            let cfg =
                resolve_agent_config(&args, file, interface, *heartbeat_interval, *http_port)?;
            run_agent(cfg).await
        }
        Command::Status => {
            let snapshot = wg::snapshot(&interface).await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Command::Health => {
            let snapshot = wg::snapshot(&interface).await;
            let verdict = health::classify(&snapshot);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
        Command::Peers => {
            let snapshot = wg::snapshot(&interface).await;
            println!("{}", serde_json::to_string_pretty(&snapshot.peers)?);
            Ok(())
        }
        Command::AddPeer {
            public_key,
            allowed_ips,
        } => {
            wg::add_peer(&interface, public_key, allowed_ips.as_deref()).await?;
            println!("peer added: {public_key}");
            Ok(())
        }
        Command::RemovePeer { public_key } => {
            wg::remove_peer(&interface, public_key).await?;
            println!("peer removed: {public_key}");
            Ok(())
        }
    }
}

fn resolve_agent_config(
    args: &Args,
    file: FileConfig,
    interface: String,
    heartbeat_interval: Option<u64>,
    http_port: Option<u16>,
) -> Result<AgentConfig> {
    let backend_url = args
        .backend_url
        .clone()
        .or(file.backend_url)
        .ok_or_else(|| anyhow!("no backend URL configured"))?;
    let server_id = args
        .server_id
        .clone()
        .or(file.server_id)
        .ok_or_else(|| anyhow!("no server identity configured"))?;
    let heartbeat_interval = heartbeat_interval.or(file.heartbeat_interval).unwrap_or(30);
    if heartbeat_interval == 0 {
        return Err(anyhow!("heartbeat_interval must be > 0"));
    }
    Ok(AgentConfig {
        backend_url,
        server_id,
        api_key: args.api_key.clone().or(file.api_key),
        command_url: args.command_url.clone().or(file.command_url),
        interface,
        heartbeat_period: Duration::from_secs(heartbeat_interval),
        http_port: http_port.or(file.http_port),
    })
}

async fn run_agent(cfg: AgentConfig) -> Result<()> {
    info!(
        "agent starting for server {} on interface {}",
        cfg.server_id, cfg.interface
    );
    let client = BackendClient::new(&cfg.backend_url, cfg.api_key.clone())?;

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(heartbeat::run_reporter(
        client,
        cfg.server_id.clone(),
        cfg.interface.clone(),
        cfg.heartbeat_period,
    )));

    if let Some(base) = cfg.command_url.as_deref() {
        let endpoint = channel::command_endpoint(base, &cfg.server_id, cfg.api_key.as_deref());
        tasks.push(tokio::spawn(channel::run_channel(
            endpoint,
            cfg.interface.clone(),
        )));
    } else {
        info!("no command endpoint configured, remote peer mutation disabled");
    }

    if let Some(port) = cfg.http_port {
        let state = http::ApiState {
            interface: cfg.interface.clone(),
        };
        tasks.push(tokio::spawn(async move {
            if let Err(err) = http::serve(port, state).await {
                error!("status server failed: {err:#}");
            }
        }));
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping agent");
    // Dropping the command channel task closes its connection before exit.
    for task in tasks {
        task.abort();
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            return;
        }
    }

    let _ = tokio::signal::ctrl_c().await;
}
