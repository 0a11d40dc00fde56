use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use feedpipe::config::Config;
use feedpipe::dispatch::{
    partition_feeds, DispatchOptions, DispatchSummary, Dispatcher, PipelineContext, TracingRecorder,
};
use feedpipe::feed::{Fetcher, HttpSource, LinkDiscovery, Processor, ThreadRandom};
use feedpipe::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "feedpipe", version, about = "Fetch, parse and deduplicate RSS/Atom feeds")]
struct Args {
    /// Config file (defaults to ~/.config/feedpipe/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides the config file)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Number of concurrent workers (overrides the config file)
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Ignore cache validators and process every document
    #[arg(long)]
    force: bool,

    /// Debug logging and per-entry diagnostics
    #[arg(long)]
    verbose: bool,

    /// Run everything on one task
    #[arg(long)]
    single_threaded: bool,

    /// Fetch every feed in the database
    #[arg(long, conflicts_with = "feed_ids")]
    all: bool,

    /// Feed ids to fetch
    #[arg(value_name = "FEED_ID", required_unless_present = "all")]
    feed_ids: Vec<i64>,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Create the database's parent directory, user-only on Unix
fn ensure_parent_dir(db_path: &Path) -> Result<()> {
    let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return Ok(());
    };
    if dir.exists() {
        return Ok(());
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory '{}'", dir.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(
                path = %dir.display(),
                error = %e,
                "Failed to set directory permissions to 0700"
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::config_dir()?.join("config.toml"),
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;
    if let Some(db) = args.db {
        config.database = Some(db);
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.validate().context("Invalid configuration")?;

    let db_path = config.database_path()?;
    ensure_parent_dir(&db_path)?;
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = Database::open(db_path_str)
        .await
        .with_context(|| format!("Failed to open database '{}'", db_path.display()))?;

    let feed_ids = if args.all {
        db.get_all_feed_ids().await.context("Failed to list feeds")?
    } else {
        args.feed_ids
    };

    let source = HttpSource::new(config.max_feed_bytes).context("Failed to build HTTP client")?;
    let discovery_client = reqwest::Client::builder()
        .user_agent(config.fetcher_config(false).user_agent)
        .build()
        .context("Failed to build discovery client")?;

    let ctx = PipelineContext {
        db: db.clone(),
        fetcher: Fetcher::new(
            db.clone(),
            Arc::new(source),
            Arc::new(ThreadRandom),
            config.fetcher_config(args.force),
        ),
        processor: Processor::new(
            db.clone(),
            Arc::new(LinkDiscovery::new(discovery_client)),
            config.processor_config(args.verbose),
        ),
        recorder: Arc::new(TracingRecorder),
    };

    let options = DispatchOptions {
        force: args.force,
        verbose: args.verbose,
        single_threaded: args.single_threaded,
    };
    let mut dispatcher = Dispatcher::new(ctx, options, config.workers);
    dispatcher.add_jobs(partition_feeds(&feed_ids, dispatcher.workers()));

    let reports = dispatcher.run_jobs().await;
    let summary = DispatchSummary::from_reports(&reports);

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
    );
    Ok(())
}
