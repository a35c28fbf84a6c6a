//! Memory Lifecycle CLI
//!
//! Command-line interface for lifecycle inspection and maintenance.
//! Results are printed as JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memory_lifecycle::classification::StaticClassifier;
use memory_lifecycle::search::SearchCandidate;
use memory_lifecycle::{
    Classification, EngineConfig, LifecycleEngine, MemoryId, SqliteStore, SystemClock,
};

#[derive(Parser)]
#[command(name = "memory-lifecycle")]
#[command(about = "Memory decay and lifecycle engine")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(
        long,
        env = "MEMORY_LIFECYCLE_DB",
        default_value = "~/.local/share/memory-lifecycle/memories.db"
    )]
    db_path: String,

    /// Configuration file (TOML)
    #[arg(long, env = "MEMORY_LIFECYCLE_CONFIG")]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a new memory
    Capture {
        /// Content of the episode
        content: String,
        /// Memory ID (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        /// Importance label (1-5); configured default when omitted
        #[arg(short, long)]
        importance: Option<u8>,
        /// Stability label (1-5); configured default when omitted
        #[arg(short, long)]
        stability: Option<u8>,
    },
    /// Get a memory by ID
    Get { id: String },
    /// Record an access (read or search hit)
    Access { id: String },
    /// Show the current decay breakdown for a memory
    Score { id: String },
    /// Rank search candidates from a JSON file (`[{"id": ..., "similarity": ...}]`)
    Rank {
        /// Candidate file, `-` for stdin
        #[arg(default_value = "-")]
        input: String,
    },
    /// Run maintenance once
    Maintain,
    /// Run the background maintenance worker until Ctrl-C
    Serve,
    /// Population statistics
    Stats,
    /// Health report
    Health,
    /// Prometheus metrics
    Metrics,
    /// Validate and print the effective configuration
    CheckConfig,
}

#[derive(Deserialize)]
struct CandidateInput {
    id: MemoryId,
    similarity: f64,
}

fn init_logging(json: bool) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with((!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
        }))
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .init();
}

fn load_config(explicit: Option<&str>) -> Result<EngineConfig> {
    if let Some(path) = explicit {
        let path = PathBuf::from(shellexpand::tilde(path).to_string());
        return EngineConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()));
    }

    match EngineConfig::default_path() {
        Some(path) if path.exists() => EngineConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        _ => Ok(EngineConfig::default()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        Ok(std::io::read_to_string(std::io::stdin())?)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("failed to read {}", input))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = load_config(cli.config.as_deref())?;
    if let Commands::CheckConfig = cli.command {
        return print_json(&config);
    }

    // Expand ~ in path
    let db_path = shellexpand::tilde(&cli.db_path).to_string();
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path))?;

    let (importance, stability) = match &cli.command {
        Commands::Capture {
            importance,
            stability,
            ..
        } => (*importance, *stability),
        _ => (None, None),
    };
    let labels = Classification::new(
        importance.unwrap_or(config.classification.default_importance),
        stability.unwrap_or(config.classification.default_stability),
    )
    .map_err(anyhow::Error::msg)?;

    let engine = LifecycleEngine::new(
        config,
        Arc::new(store.clone()),
        Arc::new(StaticClassifier::new(labels)),
        Arc::new(SystemClock),
    )?;

    match cli.command {
        Commands::Capture { content, id, .. } => {
            let id = id.unwrap_or_else(|| store.allocate_id());
            let captured = engine.capture(id, &content).await?;
            print_json(&captured)?;
        }

        Commands::Get { id } => print_json(&engine.get(&id)?)?,

        Commands::Access { id } => print_json(&engine.record_access(&id)?)?,

        Commands::Score { id } => print_json(&engine.score(&id)?)?,

        Commands::Rank { input } => {
            let raw = read_input(&input)?;
            let inputs: Vec<CandidateInput> =
                serde_json::from_str(&raw).context("invalid candidate list")?;
            let candidates = inputs
                .into_iter()
                .map(|c| Ok(SearchCandidate::new(engine.get(&c.id)?, c.similarity)))
                .collect::<memory_lifecycle::Result<Vec<_>>>()?;
            print_json(&engine.rank(candidates))?;
        }

        Commands::Maintain => {
            let engine = Arc::new(engine);
            let report = tokio::task::spawn_blocking(move || engine.run_maintenance()).await?;
            print_json(&report)?;
        }

        Commands::Serve => {
            let worker = engine.start_worker();
            tracing::info!(db_path = %db_path, "Serving maintenance, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            worker.stop().await?;
        }

        Commands::Stats => print_json(&engine.refresh_gauges()?)?,

        Commands::Health => print_json(&engine.health()?)?,

        Commands::Metrics => {
            engine.refresh_gauges()?;
            print!("{}", engine.render_metrics());
        }

        Commands::CheckConfig => print_json(engine.config())?,
    }

    Ok(())
}
