//! mts - MTS client
//!
//! Logs in to an MTS server, keeps the session alive and relays OPL traffic.

use clap::Parser;
use mts_client::{Client, ClientConfig, ClientState, InboundEvent};
use mts_protocol::OplPayload;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mts")]
#[command(about = "Client for the MTS message transport")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "MTS_CONFIG")]
    config: Option<PathBuf>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Room to send OPL messages to once logged in
    #[arg(long)]
    opl_room: Option<String>,

    /// OPL body, hex encoded
    #[arg(long, requires = "opl_room", default_value = "")]
    opl_data: String,

    /// Number of OPL messages to send
    #[arg(long, default_value_t = 1)]
    opl_count: u32,

    /// Seconds between OPL messages
    #[arg(long, default_value_t = 1)]
    opl_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match ClientConfig::load_from(cli.config.as_deref()) {
        Ok(c) => {
            if let Some(ref path) = cli.config {
                tracing::info!("Loaded config from {}", path.display());
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.load_secrets() {
        tracing::error!("Failed to load secrets: {}", e);
        return Err(e.into());
    }

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if let Err(e) = config.validate() {
        tracing::error!("Configuration error: {}", e);
        return Err(e.into());
    }

    let opl = match cli.opl_room {
        Some(room) => Some(OplPayload::new(room, hex::decode(cli.opl_data.trim())?)),
        None => None,
    };

    tracing::info!("Starting mts client");
    tracing::info!("  Server: {}:{}", config.server.host, config.server.port);
    tracing::info!("  User: {}", config.credentials.username);
    tracing::info!(
        "  TLS: {}",
        if config.tls.enabled { "enabled" } else { "disabled" }
    );
    if config.reconnect.enabled {
        tracing::info!(
            "  Reconnect: enabled ({}ms..{}ms)",
            config.reconnect.initial_delay_ms,
            config.reconnect.max_delay_ms
        );
    } else {
        tracing::info!("  Reconnect: disabled");
    }

    let (client, mut signals) = Client::from_config(config)?;
    let mut events = client.subscribe_events();
    let handle = client.start()?;

    let shutdown_client = client.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping client...");
        shutdown_client.shutdown();
    });

    tokio::spawn(async move {
        while let Some(error) = signals.errors.recv().await {
            tracing::warn!("Client error: {}", error);
        }
    });

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Dropped {} inbound events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if !signals.boot.await.unwrap_or(false) {
        let _ = handle.await;
        tracing::error!("Login failed, client {}", client.state());
        return Err("login failed".into());
    }

    if let Some(opl) = opl {
        for i in 0..cli.opl_count {
            if i > 0 {
                tokio::time::sleep(Duration::from_secs(cli.opl_interval_secs)).await;
            }
            if client.ready().await.is_err() {
                break;
            }
            match client.send_opl(&opl).await {
                Ok(()) => tracing::info!("Sent OPL to room {} ({}/{})", opl.room_id, i + 1, cli.opl_count),
                Err(e) => tracing::warn!("OPL send failed: {}", e),
            }
        }
    }

    handle.await?;

    if client.state() == ClientState::Failed {
        return Err("client stopped after an unrecoverable error".into());
    }
    tracing::info!("Client stopped");
    Ok(())
}

fn log_event(event: &InboundEvent) {
    match event {
        InboundEvent::Opl(envelope) => match event.opl() {
            Some(Ok(opl)) => tracing::info!(
                "OPL room={} bytes={} rpc_id={}",
                opl.room_id,
                opl.data.len(),
                envelope.rpc_id
            ),
            _ => tracing::warn!("Undecodable OPL body (rpc_id={})", envelope.rpc_id),
        },
        InboundEvent::ServerError(envelope) => match event.error() {
            Some(Ok(error)) => tracing::warn!("Server error on route {}: {}", envelope.route, error),
            _ => tracing::warn!("Server error on route {}", envelope.route),
        },
        InboundEvent::Reply(envelope) => {
            tracing::debug!("Uncorrelated reply route={} rpc_id={}", envelope.route, envelope.rpc_id)
        }
        InboundEvent::UnexpectedLoginResponse(envelope) => {
            tracing::debug!("Ignored LoginResponse rpc_id={}", envelope.rpc_id)
        }
    }
}
