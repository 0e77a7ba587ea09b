mod backends;
mod error;
mod http;
mod orchestrator;
mod wire;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use pearl_core::GatewayConfig;
use pearl_core::config::{expand_env_vars, expand_home};
use pearl_store::{RequestLog, Store, TranscriptLog};

use crate::http::AppState;
use crate::orchestrator::Orchestrator;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "pearl", about = "Memory-augmented, intelligently-routed chat completion gateway")]
struct Cli {
    /// Path to a YAML config file; built-in defaults apply for anything it omits.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway.
    Serve,

    /// List memories for an agent.
    Memories {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        search: Option<String>,
    },

    /// Show store statistics.
    Stats,

    /// Delete expired memories.
    Prune,
}

fn init_tracing(verbose: bool, level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    let raw = match path {
        Some(p) => std::fs::read_to_string(p).with_context(|| format!("failed to read config at {}", p.display()))?,
        None => "{}\n".to_string(),
    };
    let expanded = expand_env_vars(&raw).context("failed to expand ${VAR} expressions in config")?;
    GatewayConfig::load_from_yaml(&expanded).context("failed to parse config YAML")
}

fn open_store(config: &GatewayConfig) -> Result<Store> {
    let path = expand_home(&config.memory.store_path);
    Store::open(Path::new(&path)).with_context(|| format!("failed to open memory store at {path}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(cli.verbose, &config.logging.level);

    match &cli.command {
        Commands::Serve => cmd_serve(config).await,
        Commands::Memories { agent, limit, search } => cmd_memories(config, agent, *limit, search.as_deref()),
        Commands::Stats => cmd_stats(config),
        Commands::Prune => cmd_prune(config),
    }
}

fn pidfile_path(config: &GatewayConfig) -> PathBuf {
    let store_path = expand_home(&config.memory.store_path);
    Path::new(&store_path)
        .parent()
        .map(|p| p.join("pearl-serve.pid"))
        .unwrap_or_else(|| PathBuf::from("pearl-serve.pid"))
}

/// Advisory pidfile for observability; coexists with another instance rather
/// than refusing to start, since the store's own `busy_timeout` handles actual
/// write contention.
fn acquire_pidfile(config: &GatewayConfig) -> Option<PathBuf> {
    let path = pidfile_path(config);
    if let Ok(content) = std::fs::read_to_string(&path)
        && let Ok(pid) = content.trim().parse::<u32>()
    {
        if is_process_alive(pid) {
            tracing::warn!(pid, "another pearl serve is running; coexisting with the store's busy_timeout");
        } else {
            tracing::info!(pid, "cleaned up stale pidfile");
            let _ = std::fs::remove_file(&path);
        }
    }
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::write(&path, std::process::id().to_string()).ok()?;
    Some(path)
}

fn release_pidfile(path: &Path) {
    let _ = std::fs::remove_file(path);
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    false
}

async fn cmd_serve(config: GatewayConfig) -> Result<()> {
    let pidfile = acquire_pidfile(&config);
    let store = Arc::new(open_store(&config)?);

    let transcript_dir = expand_home(&config.persistence.transcript_dir);
    let transcript = Arc::new(TranscriptLog::new(transcript_dir));

    let request_log_path = expand_home(&config.persistence.request_log_path);
    let request_log = Arc::new(
        RequestLog::open(&request_log_path)
            .with_context(|| format!("failed to open request log at {request_log_path}"))?,
    );

    let credentials_path = expand_home(&config.persistence.credentials_path);
    let registry = Arc::new(backends::build_registry(&config, Path::new(&credentials_path)));
    let embedder = backends::build_embedder(&config);

    let bind_addr = config.server.bind_addr.clone();
    let orchestrator = Orchestrator::new(config, store, registry, embedder, transcript, request_log);

    let state = AppState {
        orchestrator: orchestrator.clone(),
        started_at: Instant::now(),
        version: VERSION,
    };
    let app = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(bind_addr, "pearl gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server exited with an error")?;

    orchestrator.shutdown().await;
    if let Some(path) = pidfile {
        release_pidfile(&path);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining extraction queue");
}

fn cmd_memories(config: GatewayConfig, agent: &str, limit: Option<u32>, search: Option<&str>) -> Result<()> {
    let store = open_store(&config)?;
    let filter = pearl_store::QueryFilter {
        agent_id: Some(agent.to_string()),
        content_substring: search.map(str::to_string),
        limit,
        ..Default::default()
    };
    let memories = store.query(&filter)?;
    if memories.is_empty() {
        println!("(no memories found for agent '{agent}')");
        return Ok(());
    }
    for memory in &memories {
        println!(
            "{}  [{}]  {}",
            memory.id,
            memory.memory_type.as_str(),
            memory.content
        );
    }
    println!("{} memories", memories.len());
    Ok(())
}

fn cmd_stats(config: GatewayConfig) -> Result<()> {
    let store = open_store(&config)?;
    let stats = store.get_stats()?;
    println!("total_memories: {}", stats.total_memories);
    println!("agents:         {}", stats.agents);
    println!("with_embedding: {}", stats.with_embedding);
    println!(
        "db_size:        {:.2}MB",
        stats.db_size_bytes as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}

fn cmd_prune(config: GatewayConfig) -> Result<()> {
    let store = open_store(&config)?;
    let removed = store.prune_expired(pearl_core::time::now_unix_secs())?;
    println!("pruned {removed} expired memories");
    Ok(())
}
