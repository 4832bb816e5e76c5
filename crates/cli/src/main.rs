//! `ragwatch`: keep a workspace vector index in sync and report its status.
//!
//! Logs go to stderr; stdout only carries JSON (status results and the tool descriptor).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use ragwatch_chunker::Chunker;
use ragwatch_indexer::{
    default_store_path, ChunkEmbedPipeline, IndexStatusTool, IndexerConfig, IndexingService,
    ServiceState, WorkspaceRoot, STATE_DIR_NAME,
};
use ragwatch_protocol::{serialize_json, serialize_json_pretty};
use ragwatch_vector_store::{HashEmbedder, JsonVectorIndex};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Interval};

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Parser, Debug)]
#[command(name = "ragwatch", version, about = "Incremental workspace indexer for RAG")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index the workspace, then keep watching it until Ctrl-C
    Run {
        #[command(flatten)]
        workspace: WorkspaceArgs,

        /// Log the status JSON every N seconds (0 disables)
        #[arg(long, value_name = "SECS", default_value_t = 0)]
        status_interval_secs: u64,
    },

    /// Run the initial scan and print the `get-index-status` result
    Status {
        #[command(flatten)]
        workspace: WorkspaceArgs,

        /// Give up waiting for the initial scan after this many seconds
        #[arg(long, value_name = "SECS", default_value_t = 300)]
        timeout_secs: u64,
    },

    /// Print the `get-index-status` tool descriptor
    ToolSchema,
}

#[derive(Args, Debug)]
struct WorkspaceArgs {
    /// Workspace root
    #[arg(long, value_name = "DIR", default_value = ".")]
    root: PathBuf,

    /// TOML config; defaults to `<root>/.ragwatch/config.toml` when that file exists
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            workspace,
            status_interval_secs,
        } => run(&workspace, status_interval_secs).await,
        Command::Status {
            workspace,
            timeout_secs,
        } => status(&workspace, Duration::from_secs(timeout_secs)).await,
        Command::ToolSchema => {
            println!("{}", serialize_json_pretty(&IndexStatusTool::descriptor())?);
            Ok(())
        }
    }
}

async fn run(args: &WorkspaceArgs, status_interval_secs: u64) -> Result<()> {
    let (service, tool) = start_service(args)?;
    let reporter = service.status_reporter();
    let mut ticker = (status_interval_secs > 0)
        .then(|| time::interval(Duration::from_secs(status_interval_secs)));

    let stopped = reporter.wait_until(|s| s.state == ServiceState::Stopping);
    tokio::pin!(stopped);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("listen for Ctrl-C")?;
                info!("Shutdown requested");
                break;
            }
            _ = &mut stopped => {
                warn!("Indexing service stopped on its own");
                break;
            }
            () = tick(&mut ticker) => {
                let status = tool.execute(&Value::Null).await?;
                info!("Index status: {}", serialize_json(&status)?);
            }
        }
    }

    let exit = service.shutdown().await?;
    info!(
        "ragwatch stopped after {} file(s), {} failed",
        exit.snapshot.processed_files_count, exit.snapshot.failed_files_count
    );
    if let Some(cause) = exit.fatal_error {
        anyhow::bail!("indexing service failed: {cause}");
    }
    Ok(())
}

async fn status(args: &WorkspaceArgs, timeout: Duration) -> Result<()> {
    let (service, tool) = start_service(args)?;
    let reporter = service.status_reporter();

    let settled = time::timeout(
        timeout,
        reporter.wait_until(|s| s.initial_scan_complete || s.state == ServiceState::Stopping),
    )
    .await;
    if settled.is_err() {
        warn!("Initial scan still running after {}s", timeout.as_secs());
    }

    // Read before shutdown closes the store.
    let result = tool.execute(&Value::Null).await?;
    println!("{}", serialize_json_pretty(&result)?);

    service.shutdown().await?;
    Ok(())
}

fn start_service(args: &WorkspaceArgs) -> Result<(IndexingService, IndexStatusTool)> {
    let root = WorkspaceRoot::new(&args.root)
        .with_context(|| format!("open workspace {}", args.root.display()))?;
    let config = load_config(args.config.as_deref(), root.path())?;
    info!("Indexing workspace {}", root.path().display());

    let store = Arc::new(JsonVectorIndex::from_config(
        &config.store,
        &default_store_path(root.path()),
    ));
    let processor = Arc::new(ChunkEmbedPipeline::new(
        Chunker::new(config.chunker.clone()),
        Arc::new(HashEmbedder::new(config.store.dimension)),
    ));

    let service = IndexingService::start(root, config, store.clone(), processor)
        .context("start indexing service")?;
    let tool = IndexStatusTool::new(store, Some(service.status_reporter()));
    Ok((service, tool))
}

fn load_config(explicit: Option<&Path>, root: &Path) -> Result<IndexerConfig> {
    let path = explicit.map(Path::to_path_buf).or_else(|| {
        let candidate = root.join(STATE_DIR_NAME).join(CONFIG_FILE_NAME);
        candidate.is_file().then_some(candidate)
    });

    let mut config = match path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            IndexerConfig::load(&path)
                .with_context(|| format!("load config {}", path.display()))?
        }
        None => IndexerConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
