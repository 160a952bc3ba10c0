//! Binary entry point for the far-memory pool server.
#![forbid(unsafe_code)]

#[path = "server/config.rs"]
mod config;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use farmem::MemoryServer;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::ServerConfig;

#[derive(Parser, Debug)]
#[command(
    name = "farmem-server",
    version,
    about = "Remote memory pool for farmem clients"
)]
struct Cli {
    #[arg(long, env = "FARMEM_LISTEN", help = "Address to listen on (host:port)")]
    listen: Option<String>,

    #[arg(long, help = "Path to a TOML config file")]
    config: Option<PathBuf>,

    #[arg(long, env = "FARMEM_LOG", help = "Log filter, e.g. info or farmem=debug")]
    log: Option<String>,

    #[arg(long, help = "Refuse writes beyond this many payload bytes")]
    capacity_bytes: Option<usize>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = ServerConfig::load(cli.config.clone())?;
    init_logging(cli.log.as_deref().or(config.log_filter()));
    if let Some(path) = config.path() {
        info!(path = %path.display(), "server.config");
    }

    let listen = cli.listen.as_deref().unwrap_or(config.listen()).to_string();
    let server = Arc::new(match cli.capacity_bytes.or(config.capacity_bytes()) {
        Some(capacity) => MemoryServer::with_capacity(capacity),
        None => MemoryServer::new(),
    });
    let listener = TcpListener::bind(listen.as_str()).await?;

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "server.signal");
        }
    };
    Arc::clone(&server).serve_until(listener, shutdown).await?;

    let stats = server.stats();
    info!(
        fetches = stats.fetches,
        not_found = stats.not_found,
        write_backs = stats.write_backs,
        stale_write_backs = stats.stale_write_backs,
        errors = stats.errors,
        records = stats.records,
        bytes = stats.bytes,
        "server.stats"
    );
    Ok(())
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
