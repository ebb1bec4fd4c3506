use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use causegraph_common::{IngestConfig, Neo4jConfig, VehicleIdentity};
use causegraph_graph::{
    migrate::migrate, GraphClient, GraphStore, MemoryGraph, Neo4jStore, Pipeline,
};
use causegraph_ingest::{render_summary, TableReader};

#[derive(Parser)]
#[command(
    name = "causegraph-ingest",
    about = "Load topic-labelled aviation accident records into a Neo4j property graph"
)]
struct Cli {
    /// Enriched accident table (CSV with a header row)
    #[arg(long, short)]
    input: PathBuf,

    #[arg(long, env = "NEO4J_URI", default_value = "bolt://localhost:7687")]
    neo4j_uri: String,

    #[arg(long, env = "NEO4J_USER", default_value = "neo4j")]
    neo4j_user: String,

    #[arg(long, env = "NEO4J_PASSWORD", hide_env_values = true)]
    neo4j_password: Option<String>,

    /// Keep existing graph data instead of wiping it first
    #[arg(long)]
    no_reset: bool,

    /// Don't create constraints and indexes
    #[arg(long)]
    skip_migrate: bool,

    /// Load into an in-memory graph and report counts; no database needed
    #[arg(long)]
    dry_run: bool,

    /// Apply each upsert step on its own instead of one transaction per row
    #[arg(long)]
    no_transactions: bool,

    /// Vehicle identity: "serial" merges vehicles sharing a serial number,
    /// "accident" keeps every vehicle scoped to its accident
    #[arg(long, default_value = "serial")]
    vehicle_identity: VehicleIdentity,

    /// Upper bound on each store call
    #[arg(long, default_value_t = 30)]
    store_timeout_secs: u64,

    /// Attempts per store call before a row is given up on
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("causegraph=info"));
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Causegraph ingest starting...");

    let config = IngestConfig {
        reset_before_run: !cli.no_reset,
        row_transactions: !cli.no_transactions,
        vehicle_identity: cli.vehicle_identity,
        store_timeout: Duration::from_secs(cli.store_timeout_secs),
        max_attempts: cli.max_attempts,
        ..IngestConfig::default()
    };

    let mut table = TableReader::open(&cli.input)?;

    let store: Arc<dyn GraphStore> = if cli.dry_run {
        info!("Dry run: loading into an in-memory graph");
        Arc::new(MemoryGraph::new())
    } else {
        let password = cli
            .neo4j_password
            .clone()
            .context("NEO4J_PASSWORD is required unless --dry-run is set")?;
        let neo4j = Neo4jConfig {
            uri: cli.neo4j_uri.clone(),
            user: cli.neo4j_user.clone(),
            password,
        };
        neo4j.log_redacted();

        let client = GraphClient::from_config(&neo4j)
            .await
            .context("Failed to connect to Neo4j")?;
        if cli.skip_migrate {
            info!("Skipping schema migrations");
        } else {
            migrate(&client).await.context("Schema migration failed")?;
        }
        Arc::new(Neo4jStore::new(client))
    };

    let pipeline = Pipeline::new(store.clone(), config);

    let stop = pipeline.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current row");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let result = pipeline.run(table.by_ref()).await;

    let counts = match store.counts().await {
        Ok(counts) => Some(counts),
        Err(e) => {
            warn!(error = %e, "Could not read graph counts");
            None
        }
    };

    let unreadable = table.unreadable();
    match result {
        Ok(summary) => {
            println!("{}", render_summary(&summary, unreadable, counts.as_ref()));
            info!("Accident data loaded");
            Ok(())
        }
        Err(halted) => {
            eprintln!("{}", render_summary(&halted.summary, unreadable, counts.as_ref()));
            Err(halted.into())
        }
    }
}
