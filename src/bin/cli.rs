//! Comment relay CLI
//!
//! Local execution entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use comment_relay::{
    error::Result,
    models::{Config, SinkKind},
    pipeline::MonitorLoop,
    services::GraphApiClient,
    storage::{self, LocalFileSink, StateStore},
    utils::{logfile::TeeWriter, preview},
};
use tokio_util::sync::CancellationToken;

/// Relay new comments on a Facebook post to files and spreadsheets
#[derive(Parser, Debug)]
#[command(
    name = "comment-relay",
    version,
    about = "Post comment monitor and relay"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the post until Ctrl-C
    Run,

    /// Run a single cycle, flush everything buffered and exit
    Once,

    /// Validate configuration
    Validate,

    /// Show persisted state
    Info,
}

/// Initialize logging; `RUST_LOG` wins over the given level.
///
/// With a log file, every line also goes there; if it cannot be opened the
/// process keeps logging to stderr only.
fn init_logging(level: &str, file: Option<&Path>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format_timestamp_secs();

    if let Some(path) = file {
        match TeeWriter::stderr_and_file(path) {
            Ok(writer) => {
                builder.target(env_logger::Target::Pipe(Box::new(writer)));
            }
            Err(e) => {
                builder.init();
                log::warn!("Cannot open log file {}: {}", path.display(), e);
                return;
            }
        }
    }
    builder.init();
}

/// Read the config file (missing or broken means defaults), then the environment.
fn load_config(cli: &Cli) -> Result<Config> {
    let loaded = Config::load(&cli.config);
    let level = if cli.verbose {
        "debug"
    } else {
        loaded
            .as_ref()
            .map(|c| c.logging.level.as_str())
            .unwrap_or("info")
    };
    let log_file = loaded.as_ref().ok().and_then(|c| c.logging.file.as_deref());
    init_logging(level, log_file);

    let mut config = loaded.unwrap_or_else(|e| {
        log::warn!(
            "Config load failed from {}: {}. Using defaults.",
            cli.config.display(),
            e
        );
        Config::default()
    });
    config.apply_env()?;
    Ok(config)
}

async fn start_monitor(config: Arc<Config>, shutdown: CancellationToken) -> Result<MonitorLoop> {
    config.validate()?;
    let source = Arc::new(GraphApiClient::from_config(&config.source)?);
    let sinks = storage::build_sinks(&config)?;
    MonitorLoop::start(config, source, sinks, shutdown).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(load_config(&cli)?);

    log::info!("comment-relay {} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run => {
            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("Ctrl-C received, stopping after the current step");
                    signal.cancel();
                }
            });

            let mut monitor = start_monitor(Arc::clone(&config), shutdown).await?;
            monitor.run().await?;
            log::info!("Monitor stopped, {} event(s) pending", monitor.pending());
        }

        Command::Once => {
            let mut monitor = start_monitor(Arc::clone(&config), CancellationToken::new()).await?;
            let tick = monitor.tick().await;
            monitor.finish().await?;

            let report = tick?;
            log::info!(
                "Cycle complete: {} new comment(s), post changed: {}, {} event(s) still pending",
                report.new_comments,
                report.post_changed,
                monitor.pending()
            );
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Monitoring post {}", config.post_key());
            log::info!(
                "✓ Sinks: {}",
                config
                    .sinks
                    .iter()
                    .map(SinkKind::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            log::info!("All validations passed!");
        }

        Command::Info => {
            let store = StateStore::new(config.state_path());
            log::info!("State file: {}", store.path().display());

            let state = store.load().await?;

            log::info!("Seen comments: {}", state.seen_comment_ids.len());
            log::info!("Pending events: {}", state.pending.len());
            match state.last_flush {
                Some(at) => log::info!("Last flush: {}", at.to_rfc3339()),
                None => log::info!("Last flush: never"),
            }
            match &state.last_post_content {
                Some(content) => log::info!("Post baseline: {}", preview(content, 60)),
                None => log::info!("Post baseline: not recorded yet"),
            }

            if config.sinks.contains(&SinkKind::Local) {
                let local = LocalFileSink::new(&config.output.dir);
                if let Some(snapshot) = local.load_post_snapshot(&config.post_key()).await? {
                    log::info!(
                        "Last post change saved at {}",
                        snapshot.detected_at.to_rfc3339()
                    );
                }
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
