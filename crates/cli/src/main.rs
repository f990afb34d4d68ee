use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunebridge_core::orchestrator::CollectionStatus;
use tunebridge_core::{
    build_provider, load_config, validate_config, Config, MatchCache, Matcher, SanitizedConfig,
    Selection, SqliteMatchCache, SyncOrchestrator, SyncReport,
};

/// Migrate a music library between streaming catalogs.
#[derive(Debug, Parser)]
#[command(name = "tunebridge", version)]
struct Cli {
    /// Configuration file
    #[arg(
        long,
        global = true,
        env = "TUNEBRIDGE_CONFIG",
        default_value = "config.toml"
    )]
    config: PathBuf,

    /// Compute and report changes without writing to the destination
    #[arg(long, global = true)]
    dry_run: bool,

    /// Remove destination items that are not in the source
    #[arg(long, global = true)]
    mirror: bool,

    /// Write the run report as JSON
    #[arg(long, global = true, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, Args)]
struct SelectionArgs {
    /// Leave playlists out
    #[arg(long)]
    no_playlists: bool,
    /// Leave favorite tracks out
    #[arg(long)]
    no_favorites: bool,
    /// Leave saved albums out
    #[arg(long)]
    no_albums: bool,
    /// Leave followed artists out
    #[arg(long)]
    no_artists: bool,
}

impl From<SelectionArgs> for Selection {
    fn from(args: SelectionArgs) -> Self {
        Selection {
            playlists: !args.no_playlists,
            favorites: !args.no_favorites,
            albums: !args.no_albums,
            artists: !args.no_artists,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sync the whole library from source to destination
    Sync {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Sync one playlist by ID or share URI
    Playlist { uri: String },
    /// Sync favorite tracks
    Favorites,
    /// Sync saved albums
    Albums,
    /// Sync followed artists
    Artists,
    /// Export the source library to a backup file
    Export {
        file: PathBuf,
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Import a backup file into the destination
    Import {
        file: PathBuf,
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Inspect or reset the match cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Print the effective configuration with secrets redacted
    Config,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum CacheAction {
    Stats,
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    info!("Loading configuration from {:?}", cli.config);
    let mut config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    if cli.dry_run {
        config.sync.dry_run = true;
    }
    if cli.mirror {
        config.sync.mirror = true;
    }
    validate_config(&config).context("Configuration validation failed")?;

    let report = match cli.command {
        Command::Config => {
            let sanitized = SanitizedConfig::from(&config);
            println!("{}", serde_json::to_string_pretty(&sanitized)?);
            return Ok(ExitCode::SUCCESS);
        }
        Command::Cache { action } => {
            cache_command(&config, action)?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Export { file, selection } => {
            let orchestrator = build_orchestrator(&config)?;
            orchestrator
                .export_to_backup(&file, selection.into())
                .await
                .context("Export failed")?;
            println!("Backup written to {}", file.display());
            return Ok(ExitCode::SUCCESS);
        }
        Command::Import { file, selection } => {
            build_orchestrator(&config)?
                .import_from_backup(&file, selection.into())
                .await
                .context("Import failed")?
        }
        Command::Sync { selection } => {
            build_orchestrator(&config)?
                .sync_all(selection.into())
                .await?
        }
        Command::Playlist { uri } => build_orchestrator(&config)?.sync_playlist(&uri).await?,
        Command::Favorites => build_orchestrator(&config)?.sync_favorites().await?,
        Command::Albums => build_orchestrator(&config)?.sync_albums().await?,
        Command::Artists => build_orchestrator(&config)?.sync_artists().await?,
    };

    print_summary(&report);
    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {:?}", path))?;
        info!("Report written to {:?}", path);
    }

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn open_cache(config: &Config) -> Result<SqliteMatchCache> {
    SqliteMatchCache::open(&config.cache.path, config.cache.flush_every)
        .with_context(|| format!("Failed to open match cache at {:?}", config.cache.path))
}

fn cache_command(config: &Config, action: CacheAction) -> Result<()> {
    let cache = open_cache(config)?;
    match action {
        CacheAction::Stats => {
            let stats = cache.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        CacheAction::Clear => {
            cache.clear()?;
            info!("Cleared match cache at {:?}", config.cache.path);
        }
    }
    Ok(())
}

fn build_orchestrator(config: &Config) -> Result<SyncOrchestrator> {
    let cache: Arc<dyn MatchCache> = Arc::new(open_cache(config)?);
    info!("Match cache: {} entries", cache.stats()?.entries);

    let matcher = Matcher::new(config.matcher.clone(), cache)
        .with_overrides(config.overrides.clone());
    let mut orchestrator = SyncOrchestrator::new(Arc::new(matcher), config.sync.clone());

    if let Some(source) = &config.source {
        let provider = build_provider(source).context("Failed to create source provider")?;
        info!("Source: {}", provider.name());
        orchestrator = orchestrator.with_source(provider);
    }
    if let Some(destination) = &config.destination {
        let provider =
            build_provider(destination).context("Failed to create destination provider")?;
        info!("Destination: {}", provider.name());
        orchestrator = orchestrator.with_destination(provider);
    }

    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current collection");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    Ok(orchestrator)
}

fn print_summary(report: &SyncReport) {
    for collection in &report.collections {
        let status = match &collection.status {
            CollectionStatus::Synced if report.dry_run => "planned".to_string(),
            CollectionStatus::Synced => "synced".to_string(),
            CollectionStatus::Failed { stage, reason } => {
                format!("FAILED while {}: {}", stage, reason)
            }
            CollectionStatus::Skipped { reason } => format!("skipped ({})", reason),
        };
        println!(
            "{} '{}': {} | {}/{} matched, +{} -{}{}",
            collection.kind,
            collection.name,
            status,
            collection.matched,
            collection.total,
            collection.added,
            collection.removed,
            if collection.rebuilt { " (rebuilt)" } else { "" }
        );
        for item in &collection.unmatched {
            println!("    unmatched: {}", item.name);
        }
        for item in &collection.errored {
            println!("    errored:   {} ({})", item.name, item.reason);
        }
        for item in &collection.skipped {
            println!("    skipped:   {} ({})", item.name, item.reason);
        }
    }
    println!(
        "Total: {} matched, {} unmatched, {} errored, {} skipped",
        report.total_matched(),
        report.total_unmatched(),
        report.total_errored(),
        report.total_skipped()
    );
}
