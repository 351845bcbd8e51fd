//! xorcas CLI - blob store node and offline maintenance commands
//!
//! `serve` runs the HTTP node. The other commands open the same on-disk
//! stores directly; while a server holds the digest lock they fail with
//! "Store is locked" instead of touching its files.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use xorcas::model::parse_prefix;
use xorcas::{Config, Coordinator, Hash, Server, ServerOptions};

#[derive(Parser)]
#[command(name = "xorcas")]
#[command(about = "A content-addressed blob store with XOR digests")]
#[command(version)]
struct Cli {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the blobs (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory holding the digest layers (overrides the config file)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP node
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        listen: Option<SocketAddr>,
        /// Peer base URL (repeatable)
        #[arg(long = "peer")]
        peers: Vec<String>,
        /// fsync blobs and directories before publishing
        #[arg(long)]
        with_fsync: bool,
        /// Expose debug endpoints
        #[arg(long)]
        debug: bool,
        /// Push new uploads to every peer
        #[arg(long)]
        replicate: bool,
    },

    // === Blob Commands ===
    /// Store a file (or stdin) and print its hash
    Put {
        /// File to store; `-` or nothing reads stdin
        file: Option<PathBuf>,
    },

    /// Write a blob to stdout or a file
    Get {
        /// Blob hash (64 hex chars)
        hash: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check whether a blob is stored
    Has {
        /// Blob hash (64 hex chars)
        hash: String,
    },

    /// List stored hashes under a prefix
    List {
        /// Hex prefix
        #[arg(short, long, default_value = "")]
        prefix: String,
        /// Number of prefix bits to match (0 lists everything)
        #[arg(short, long, default_value = "0")]
        bits: u32,
    },

    // === Integrity Commands ===
    /// Check a hash's digest bucket against the blobs on disk
    Verify {
        /// Blob hash (64 hex chars)
        hash: String,
    },

    /// Show the digest bucket a hash falls into
    Digest {
        /// Blob hash (64 hex chars)
        hash: String,
    },

    // === Peer Commands ===
    /// Send a stored blob to a peer
    Push {
        /// Peer base URL
        peer: String,
        /// Blob hash (64 hex chars)
        hash: String,
    },

    /// Fetch a blob from a peer and store it
    Pull {
        /// Peer base URL
        peer: String,
        /// Blob hash (64 hex chars)
        hash: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(io::stderr)
        .init();

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }

    match cli.command {
        Commands::Serve {
            listen,
            peers,
            with_fsync,
            debug,
            replicate,
        } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            if !peers.is_empty() {
                config.peers = peers;
            }
            config.fsync |= with_fsync;
            config.debug |= debug;
            config.replicate_uploads |= replicate;
            serve(config)?;
        }

        Commands::Put { file } => {
            let coordinator = open(&config)?;
            let outcome = match file {
                Some(path) if path.as_os_str() != "-" => {
                    let file = File::open(&path)
                        .with_context(|| format!("opening {}", path.display()))?;
                    coordinator.put(file)?
                }
                _ => coordinator.put(io::stdin().lock())?,
            };
            coordinator.flush()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "hash": outcome.hash,
                    "new": outcome.newly_written
                }),
            )?;
        }

        Commands::Get { hash, output: path } => {
            let coordinator = open(&config)?;
            let hash = parse_hash(&hash)?;
            let mut blob = coordinator
                .get(&hash)?
                .ok_or_else(|| anyhow::anyhow!("Blob not found: {}", hash))?;
            match path {
                Some(path) => {
                    let mut out = File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    let bytes = io::copy(&mut blob, &mut out)?;
                    output(
                        &cli.format,
                        &serde_json::json!({
                            "hash": hash,
                            "path": path.display().to_string(),
                            "bytes": bytes
                        }),
                    )?;
                }
                None => {
                    let mut stdout = io::stdout().lock();
                    io::copy(&mut blob, &mut stdout)?;
                    stdout.flush()?;
                }
            }
        }

        Commands::Has { hash } => {
            let coordinator = open(&config)?;
            let hash = parse_hash(&hash)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "hash": hash,
                    "present": coordinator.has(&hash)?
                }),
            )?;
        }

        Commands::List { prefix, bits } => {
            let coordinator = open(&config)?;
            let prefix = parse_prefix(&prefix)?;
            let hashes = coordinator.list(&prefix, bits)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "count": hashes.len(),
                    "hashes": hashes
                }),
            )?;
        }

        Commands::Verify { hash } => {
            let coordinator = open(&config)?;
            let hash = parse_hash(&hash)?;
            let outcome = coordinator.verify(&hash)?;
            coordinator.flush()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "hash": hash,
                    "outcome": outcome
                }),
            )?;
        }

        Commands::Digest { hash } => {
            let coordinator = open(&config)?;
            let hash = parse_hash(&hash)?;
            let depth = coordinator.depth();
            output(
                &cli.format,
                &serde_json::json!({
                    "hash": hash,
                    "depth": depth,
                    "prefix": format!("{:x}", hash.prefix_bits(depth)),
                    "digest": coordinator.digest_leaf(&hash)?
                }),
            )?;
        }

        Commands::Push { peer, hash } => {
            let coordinator = open(&config)?;
            let hash = parse_hash(&hash)?;
            let outcome = coordinator.push(&peer, &hash)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "hash": hash,
                    "peer": peer,
                    "outcome": outcome
                }),
            )?;
        }

        Commands::Pull { peer, hash } => {
            let coordinator = open(&config)?;
            let hash = parse_hash(&hash)?;
            let outcome = coordinator.pull(&peer, &hash)?;
            coordinator.flush()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "hash": outcome.hash,
                    "peer": peer,
                    "new": outcome.newly_written
                }),
            )?;
        }
    }

    Ok(())
}

fn open(config: &Config) -> anyhow::Result<Coordinator> {
    Coordinator::open(config).with_context(|| {
        format!(
            "opening store at {} (digest at {})",
            config.data_dir.display(),
            config.cache_dir.display()
        )
    })
}

fn serve(config: Config) -> anyhow::Result<()> {
    let coordinator = Arc::new(open(&config)?);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let server = Server::new(coordinator.clone(), ServerOptions::from(&config));
    runtime.block_on(server.serve(shutdown_signal()))?;

    coordinator.flush()?;
    tracing::info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn parse_hash(text: &str) -> anyhow::Result<Hash> {
    Hash::from_hex(text).map_err(|_| anyhow::anyhow!("Invalid hash: {}", text))
}

fn output(format: &OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::Text => serde_json::to_string_pretty(value)?,
    };
    println!("{}", text);
    Ok(())
}
