use anyhow::Context;
use cadence_server::{build_router, build_state, spawn_maintenance, Config};
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "cadence-server")]
#[command(about = "Tracker synchronization backend with quota-aware scheduling")]
struct Cli {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Database URL (overrides config)
    #[arg(long, env = "CADENCE_DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,cadence_server=debug,cadence_core=debug",
                )
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env().context("loading configuration")?;
    if let Some(port) = cli.port {
        config.server_port = port;
    }
    if let Some(host) = cli.host {
        config.server_host = host;
    }
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("invalid server address")?;
    let drain_interval = config.drain_interval;
    let transport = config.transport;

    let state = build_state(config).await?;
    spawn_maintenance(state.clone(), drain_interval);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, transport = transport.as_str(), "cadence server listening");

    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}
