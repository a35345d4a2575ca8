//! Stratum CLI
//!
//! Operational commands over one configured event database and cache.
//!
//! ```text
//! stratum [--config stratum.yaml] [--database sqlite://events.db] <command>
//!
//!   migrate           create event store tables
//!   stats             stream count, or one stream's header
//!   verify            check version contiguity of streams
//!   replay            re-dispatch stored events (Ctrl-C cancels)
//!   validate-replay   report what a replay would cover
//!   cleanup           archive events past the retention window
//!   cache-health      probe every cache tier
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stratum::cache::HealthStatus;
use stratum::events::{LoggingDispatcher, ReplayOptions, ReplayState};
use stratum::{AppConfig, AppContext};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Stratum - tiered cache and event store operations
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "STRATUM_CONFIG")]
    config: Option<PathBuf>,

    /// Event database URL (overrides the configuration file)
    #[arg(long, env = "DATABASE_URL")]
    database: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create event store tables
    Migrate,

    /// Show stream count, or one stream's header
    Stats {
        /// Stream to describe
        #[arg(long)]
        stream: Option<String>,
    },

    /// Check that stream versions are contiguous
    Verify {
        /// Streams to check
        #[arg(required = true)]
        streams: Vec<String>,
    },

    /// Re-dispatch stored events
    Replay(ReplayArgs),

    /// Report what a replay would cover without running it
    ValidateReplay(ReplayArgs),

    /// Archive events older than the retention window
    Cleanup {
        /// Retention in days (configuration value when omitted)
        #[arg(long)]
        retention_days: Option<u32>,
    },

    /// Probe every cache tier
    CacheHealth,
}

#[derive(ClapArgs, Debug)]
struct ReplayArgs {
    /// Only these streams (repeatable)
    #[arg(long = "stream")]
    streams: Vec<String>,

    /// Only these event names (repeatable)
    #[arg(long = "type")]
    event_types: Vec<String>,

    #[arg(long)]
    from_version: Option<u64>,

    #[arg(long)]
    to_version: Option<u64>,

    /// RFC 3339 lower bound on storage time
    #[arg(long)]
    from_date: Option<DateTime<Utc>>,

    /// RFC 3339 upper bound on storage time
    #[arg(long)]
    to_date: Option<DateTime<Utc>>,

    #[arg(long, default_value = "1000")]
    batch_size: usize,

    /// Dispatch up to N events concurrently
    #[arg(long)]
    parallel: Option<usize>,

    /// Abort on the first dispatch failure
    #[arg(long)]
    stop_on_error: bool,

    /// Count and page events without dispatching
    #[arg(long)]
    dry_run: bool,
}

impl ReplayArgs {
    fn to_options(&self) -> ReplayOptions {
        let mut options = ReplayOptions {
            from_version: self.from_version,
            to_version: self.to_version,
            from_date: self.from_date,
            to_date: self.to_date,
            event_types: self.event_types.clone(),
            stream_ids: self.streams.clone(),
            batch_size: self.batch_size,
            continue_on_error: !self.stop_on_error,
            dry_run: self.dry_run,
            ..Default::default()
        };
        if let Some(max_parallel) = self.parallel {
            options = options.in_parallel(max_parallel);
        }
        options
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => AppConfig::from_yaml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(url) = &args.database {
        config.database_url = url.clone();
    }

    info!(
        database = %config.database_url,
        cache_provider = %config.cache.provider,
        "Starting Stratum"
    );

    let ctx = AppContext::open(config, Arc::new(LoggingDispatcher))
        .await
        .context("assembling application context")?;

    match args.command {
        Command::Migrate => {
            // Tables are created when the store opens
            info!(tables = ?ctx.events.tables(), "Event store schema is up to date");
        }
        Command::Stats { stream: Some(stream_id) } => {
            match ctx.events.get_stream(&stream_id).await? {
                Some(stream) => print_json(&stream)?,
                None => bail!("stream {} does not exist", stream_id),
            }
        }
        Command::Stats { stream: None } => {
            let streams = ctx.events.stream_count().await?;
            print_json(&serde_json::json!({
                "streams": streams,
                "cache": ctx.cache.get_stats(None),
            }))?;
        }
        Command::Verify { streams } => {
            let mut failures = 0;
            for stream_id in &streams {
                match ctx.events.verify_stream(stream_id).await {
                    Ok(version) => info!(stream_id = %stream_id, version, "Stream verified"),
                    Err(e) => {
                        warn!(stream_id = %stream_id, error = %e, "Stream verification failed");
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                bail!("{} of {} streams failed verification", failures, streams.len());
            }
        }
        Command::Replay(replay) => {
            let engine = ctx.replay.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    engine.cancel_replay();
                }
            });

            let result = ctx.replay.replay_events(replay.to_options()).await?;
            print_json(&result)?;
            if result.state != ReplayState::Completed {
                bail!("replay {} ended {}", result.replay_id, result.state);
            }
        }
        Command::ValidateReplay(replay) => {
            let validation = ctx.replay.validate_replay(&replay.to_options()).await?;
            print_json(&validation)?;
            if !validation.valid {
                bail!("replay options are invalid");
            }
        }
        Command::Cleanup { retention_days } => {
            let removed = ctx.events.cleanup(retention_days).await?;
            info!(events = removed, "Cleanup complete");
        }
        Command::CacheHealth => {
            let report = ctx.cache.health_check().await;
            print_json(&report)?;
            if report.status == HealthStatus::Unhealthy {
                bail!("cache is unhealthy");
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("sqlx=warn".parse().unwrap_or_else(|_| level.into()));

    // Logs go to stderr so command output stays machine-readable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
