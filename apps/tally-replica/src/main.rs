//! # Tally Replica
//!
//! Runs one replica of the view counter as an HTTP service, or a local
//! two-replica demo.
//!
//! ```text
//! tally-replica serve --replica-id replica-1 --listen 127.0.0.1:8081 \
//!     --peer replica-2=http://127.0.0.1:8082 --database replica-1.db
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use colored::*;
use tally_store::{EntryStore, SqliteStore};
use tally_sync::{
    api, HttpTransport, MemoryTransport, PeerAddress, PeerConfig, Replica, ReplicaConfig,
    TallyError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tally-replica")]
#[command(about = "Replicated G-Counter view counter")]
#[command(version)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the sync and view-count API for one replica
    Serve(ReplicaArgs),
    /// Print the effective configuration as TOML
    Config(ReplicaArgs),
    /// Two in-memory replicas count views, sync, and converge
    Demo,
}

#[derive(Args, Clone)]
struct ReplicaArgs {
    /// TOML configuration file; flags override its values
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[arg(long)]
    replica_id: Option<String>,

    /// Address to bind, e.g. 0.0.0.0:8080
    #[arg(long)]
    listen: Option<String>,

    /// Peer as `url` or `id=url`; repeatable
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// SQLite database file
    #[arg(long)]
    database: Option<PathBuf>,

    /// Keep state in memory only
    #[arg(long, conflicts_with = "database")]
    in_memory: bool,

    /// Do not push after each increment
    #[arg(long)]
    no_push: bool,

    /// Disable the background pull sweep
    #[arg(long)]
    no_periodic_sync: bool,
}

impl ReplicaArgs {
    fn resolve(&self) -> Result<ReplicaConfig, TallyError> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    TallyError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                ReplicaConfig::from_toml(&text)?
            }
            None => ReplicaConfig::default(),
        };

        if let Some(id) = &self.replica_id {
            config.replica_id = id.clone();
        }
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if !self.peers.is_empty() {
            config.peers = self
                .peers
                .iter()
                .map(|p| p.parse::<PeerConfig>())
                .collect::<Result<_, _>>()?;
        }
        if let Some(database) = &self.database {
            config.database = Some(database.clone());
        }
        if self.in_memory {
            config.database = None;
        }
        if self.no_push {
            config.push_enabled = false;
        }
        if self.no_periodic_sync {
            config.periodic_sync_enabled = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ─── Serve ─────────────────────────────────────────────────────────────────

async fn run_serve(args: ReplicaArgs) -> Result<(), BoxError> {
    let config = args.resolve()?;

    let backend: Arc<dyn EntryStore> = match &config.database {
        Some(path) => Arc::new(SqliteStore::open(path)?),
        None => {
            warn!("no database configured, state is kept in an in-memory SQLite database");
            Arc::new(SqliteStore::open_in_memory()?)
        }
    };
    let transport = Arc::new(HttpTransport::new(config.peer_timeout())?);
    let replica = Arc::new(Replica::new(config.clone(), backend, transport)?);

    banner(&config);

    let scheduler = replica.start_scheduler();
    let listener = tokio::net::TcpListener::bind(config.listen_addr.as_str()).await?;
    info!(replica = %replica.id(), addr = %config.listen_addr, "listening");

    axum::serve(listener, api::router(replica.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!(replica = %replica.id(), "shutting down");
    scheduler.shutdown().await;
    Ok(())
}

fn banner(config: &ReplicaConfig) {
    println!(
        "\n  {} {}",
        "▶".bright_cyan().bold(),
        format!("tally replica {}", config.replica_id).bright_white().bold()
    );
    println!("    listen   {}", config.listen_addr);
    match &config.database {
        Some(path) => println!("    storage  {}", path.display()),
        None => println!("    storage  {}", "sqlite (in memory)".yellow()),
    }
    if config.peers.is_empty() {
        println!("    peers    {}", "none".dimmed());
    }
    for peer in &config.peers {
        println!("    peer     {} {}", peer.id.as_str().bright_green(), peer.address);
    }
    println!(
        "    push {}  periodic sync {}\n",
        on_off(config.push_enabled),
        on_off(config.periodic_sync_enabled)
    );
}

fn on_off(enabled: bool) -> ColoredString {
    if enabled {
        "on".bright_green()
    } else {
        "off".bright_red()
    }
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo() -> Result<(), BoxError> {
    let net = Arc::new(MemoryTransport::new());
    let make = |id: &str, peer: &str| -> Result<Replica<MemoryTransport>, TallyError> {
        let config = ReplicaConfig::builder(id)
            .peer(PeerConfig::new(peer, format!("mem://{peer}")))
            .push_enabled(false)
            .build();
        Replica::in_memory(config, net.clone())
    };
    let a = make("replica-a", "replica-b")?;
    let b = make("replica-b", "replica-a")?;
    net.attach(PeerAddress::new("mem://replica-a"), Arc::downgrade(&a.handler()));
    net.attach(PeerAddress::new("mem://replica-b"), Arc::downgrade(&b.handler()));

    println!("\n  {}", "Phase 1: independent views".bright_white().bold());
    for _ in 0..30 {
        a.views().record_view(1).await?;
    }
    for _ in 0..20 {
        b.views().record_view(1).await?;
    }
    println!("    replica-a  {}", a.views().breakdown(1)?);
    println!("    replica-b  {}", b.views().breakdown(1)?);

    println!("\n  {}", "Phase 2: pull and merge".bright_white().bold());
    let total_a = a.views().total_views(1).await?;
    let total_b = b.views().total_views(1).await?;
    println!("    replica-a  {}", a.views().breakdown(1)?);
    println!("    replica-b  {}", b.views().breakdown(1)?);

    if total_a == total_b {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            format!("converged at {total_a} views").bright_green().bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            format!("diverged: {total_a} vs {total_b}").bright_red().bold()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Config(args) => {
            print!("{}", args.resolve()?.to_toml()?);
            Ok(())
        }
        Commands::Demo => run_demo().await,
    }
}
