use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gridgate::api::{AppState, ProxyConfig, create_router};
use gridgate::service::{Catalog, DockerManager};

#[derive(Parser, Debug)]
#[command(name = "gridgate")]
#[command(about = "Session-oriented reverse proxy for the WebDriver protocol")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "GRIDGATE_PORT", default_value = "4444")]
    port: u16,

    /// Address to bind to
    #[arg(short, long, env = "GRIDGATE_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Host name placed in rewritten Location headers
    #[arg(long, env = "GRIDGATE_HOSTNAME", default_value = "localhost")]
    hostname: String,

    /// Browser catalog file
    #[arg(
        long,
        env = "GRIDGATE_BROWSERS",
        value_name = "PATH",
        default_value = "browsers.json"
    )]
    browsers: PathBuf,

    /// Advertised session capacity
    #[arg(long, env = "GRIDGATE_LIMIT", default_value = "5")]
    limit: usize,

    /// Idle seconds before a session is deleted
    #[arg(long, env = "GRIDGATE_SESSION_TIMEOUT", default_value = "60")]
    session_timeout: u64,

    /// Seconds allowed per session-creation attempt
    #[arg(long, env = "GRIDGATE_ATTEMPT_TIMEOUT", default_value = "30")]
    session_attempt_timeout: u64,

    /// Seconds allowed for the DELETE issued on idle timeout
    #[arg(long, env = "GRIDGATE_DELETE_TIMEOUT", default_value = "10")]
    session_delete_timeout: u64,

    /// Seconds to wait for a started container to begin listening
    #[arg(long, env = "GRIDGATE_STARTUP_TIMEOUT", default_value = "30")]
    startup_timeout: u64,

    /// Container runtime binary (auto-detected when omitted)
    #[arg(long, env = "GRIDGATE_CONTAINER_BINARY")]
    container_binary: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, env = "GRIDGATE_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "gridgate=debug,tower_http=debug"
    } else {
        "gridgate=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let catalog = Catalog::load(&cli.browsers)
        .with_context(|| format!("loading browser catalog {}", cli.browsers.display()))?;

    let startup_timeout = Duration::from_secs(cli.startup_timeout);
    let manager = match cli.container_binary {
        Some(binary) => DockerManager::with_binary(binary, catalog, startup_timeout),
        None => DockerManager::new(catalog, startup_timeout),
    };

    let config = ProxyConfig {
        hostname: cli.hostname,
        session_timeout: Duration::from_secs(cli.session_timeout),
        session_attempt_timeout: Duration::from_secs(cli.session_attempt_timeout),
        session_delete_timeout: Duration::from_secs(cli.session_delete_timeout),
        limit: cli.limit,
    };
    let state = AppState::new(Arc::new(manager), config);

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", cli.bind, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    state.set_local_addr(listener.local_addr()?);

    info!("listening on {addr}");
    let router = create_router(state);
    axum::serve(listener, router)
        .await
        .context("serving HTTP")?;

    Ok(())
}
