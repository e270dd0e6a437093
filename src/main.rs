//! DerivateX - learned-behaviour engine CLI
//!
//! Usage:
//!   derivatex grow
//!   derivatex trees
//!   derivatex approve 12 --description "oversized quantity" --automated
//!   derivatex flags 12
//!   derivatex verify --json '{"buying_party": "AMBT33", ...}'

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use derivatex_backend::models::Snapshot;
use derivatex_backend::storage::NodeUpdate;
use derivatex_backend::{Database, EngineConfig, LearnedBehaviour};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Learned-behaviour anomaly detection over derivative trade records
#[derive(Parser, Debug)]
#[command(name = "derivatex")]
#[command(about = "Grow, review and apply learned-behaviour decision trees")]
struct Cli {
    /// Optional TOML config file
    #[arg(short, long, env = "DERIVATEX_CONFIG")]
    config: Option<PathBuf>,

    /// Override the database path from the config
    #[arg(long)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the forest manager and persist the kept trees
    Grow,

    /// List every tree root
    Trees,

    /// Show one node
    Node { id: i64 },

    /// Approve a tree for live verification
    Approve {
        id: i64,

        #[arg(short, long)]
        description: Option<String>,

        /// Mark the tree as applying its suggestion automatically
        #[arg(long)]
        automated: bool,
    },

    /// Recent records flagged by a tree
    Flags { tree_id: i64 },

    /// Check a candidate record against all approved trees
    Verify {
        /// Candidate snapshot as JSON
        #[arg(long)]
        json: String,
    },

    /// Audit actions attributed to a tree
    Actions { tree_id: i64 },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(path) = cli.db_path {
        config.database_path = path;
    }

    let db = Database::open(&config.database_path)
        .with_context(|| format!("Failed to open database: {}", config.database_path))?;
    let service = LearnedBehaviour::new(db, config);

    match cli.command {
        Commands::Grow => {
            let report = service.grow_trees().context("Forest run failed")?;
            info!(kept = report.kept_tree_ids.len(), "🌲 grow finished");
            print_json(&report)?;
        }
        Commands::Trees => print_json(&service.index_trees()?)?,
        Commands::Node { id } => print_json(&service.get_node(id)?)?,
        Commands::Approve {
            id,
            description,
            automated,
        } => {
            let update = NodeUpdate {
                description,
                approved: Some(true),
                automated: automated.then_some(true),
                ..Default::default()
            };
            print_json(&service.update_node(id, &update)?)?;
        }
        Commands::Flags { tree_id } => print_json(&service.get_flags(tree_id)?)?,
        Commands::Verify { json } => {
            let candidate: Snapshot =
                serde_json::from_str(&json).context("Failed to parse candidate snapshot")?;
            print_json(&service.verify_derivative(&candidate)?)?;
        }
        Commands::Actions { tree_id } => print_json(&service.index_node_actions(tree_id)?)?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize tracing; logs go to stderr so stdout stays JSON
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "derivatex_backend=info,derivatex=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
