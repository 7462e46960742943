//! # Storefront Sync CLI (`sfsync`)
//!
//! Runs store → channel syncs once, on a schedule, or as a service with a
//! health endpoint.
//!
//! ## Usage
//!
//! ```bash
//! sfsync [--config ./sfsync.toml] [--log-level info] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sfsync sync <mode>` | One sync run (`full`, `inventory`, `products`, `orders`) |
//! | `sfsync sync <mode> --interval 300` | Same, repeated, with the health endpoint |
//! | `sfsync serve` | Scheduled sync using `sync.interval_secs`, plus `/health` |
//! | `sfsync check` | Validate configuration and show resolved modes |
//! | `sfsync tracking <order> <number>` | Push tracking details to the channel |
//!
//! Every command takes `--dry-run`, which needs no credentials and makes no
//! network calls. Secrets come from the environment (`SHOPIFY_TOKEN`,
//! `TIKTOK_SECRET`, `OPENAI_API_KEY`, ...), see [`storefront_sync::config`].
//!
//! Logs go to stderr (`RUST_LOG` overrides `--log-level`); results are
//! printed on stdout. The exit code is non-zero only when startup fails.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use storefront_sync::config::{self, Config};
use storefront_sync::models::SyncResult;
use storefront_sync::scheduler;
use storefront_sync::server::{self, HealthState};
use storefront_sync::sync::{SyncEngine, SyncMode};

/// Storefront Sync: keep a TikTok Shop channel in step with a Shopify store.
#[derive(Parser)]
#[command(
    name = "sfsync",
    about = "Sync inventory, AI-optimized listings, and orders from a store to a marketplace channel",
    version
)]
struct Cli {
    /// Path to a TOML configuration file. Optional; environment variables
    /// override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync once, or repeatedly with `--interval`.
    Sync {
        /// What to sync.
        #[arg(value_enum)]
        mode: SyncMode,

        /// Simulate: no credentials needed, no network calls.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of products to sync.
        #[arg(long)]
        limit: Option<usize>,

        /// Repeat every N seconds and serve the health endpoint.
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Run the scheduled sync and the health endpoint until Ctrl-C.
    Serve {
        /// Simulate: no credentials needed, no network calls.
        #[arg(long)]
        dry_run: bool,

        /// Seconds between runs (default: `sync.interval_secs`).
        #[arg(long)]
        interval: Option<u64>,

        /// What each run syncs.
        #[arg(long, value_enum, default_value = "full")]
        mode: SyncMode,
    },

    /// Validate configuration and print the resolved modes. No network calls.
    Check {
        /// Check as for a dry run (store credentials not required).
        #[arg(long)]
        dry_run: bool,
    },

    /// Push shipment tracking for a channel order.
    Tracking {
        /// Channel order id.
        order_id: String,

        /// Carrier tracking number.
        tracking_number: String,

        /// Tracking page URL.
        #[arg(long)]
        url: Option<String>,

        /// Carrier name.
        #[arg(long)]
        carrier: Option<String>,

        /// Simulate: no credentials needed, no network calls.
        #[arg(long)]
        dry_run: bool,
    },
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Load, overlay the environment, and validate.
fn load_validated(path: Option<&PathBuf>, dry_run: bool) -> anyhow::Result<Config> {
    let mut cfg = config::load_config(path.map(|p| p.as_path()))?;
    cfg.validate(dry_run)?;
    if !dry_run && !cfg.ai.is_enabled() {
        warn!("OPENAI_API_KEY is not set; listings will use the fallback transform");
    }
    Ok(cfg)
}

fn print_result(name: &str, result: &SyncResult) {
    println!(
        "  {}: {} success, {} failed, {} total",
        name, result.success_count, result.failed_count, result.total_count
    );
    if let Some(ref e) = result.error {
        println!("    error: {}", e);
    }
}

async fn run_with_health(
    cfg: &Config,
    engine: &mut SyncEngine,
    mode: SyncMode,
    limit: Option<usize>,
    every: Duration,
) {
    let health = Arc::new(HealthState::new(engine.ai_configured()));

    let bind = cfg.server.bind.clone();
    let server_health = health.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_health_server(&bind, server_health).await {
            error!("Health endpoint stopped: {:#}", e);
        }
    });

    let runs = scheduler::run_scheduled(engine, mode, limit, every, health).await;
    println!("scheduler stopped");
    println!("  runs: {}", runs);
    println!("ok");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Sync {
            mode,
            dry_run,
            limit,
            interval,
        } => {
            let cfg = load_validated(cli.config.as_ref(), dry_run)?;
            let mut engine = SyncEngine::from_config(&cfg, dry_run)
                .context("Failed to initialize sync engine")?;

            if let Some(secs) = interval {
                run_with_health(&cfg, &mut engine, mode, limit, Duration::from_secs(secs)).await;
                return Ok(());
            }

            let results = engine.run_mode(mode, limit).await;
            if dry_run {
                println!("sync {} (dry-run)", mode);
            } else {
                println!("sync {}", mode);
            }
            for (name, result) in &results {
                print_result(name, result);
            }
            if results.iter().all(|(_, r)| r.is_clean()) {
                println!("ok");
            } else {
                println!("completed with failures");
            }
        }
        Commands::Serve {
            dry_run,
            interval,
            mode,
        } => {
            let cfg = load_validated(cli.config.as_ref(), dry_run)?;
            let mut engine = SyncEngine::from_config(&cfg, dry_run)
                .context("Failed to initialize sync engine")?;
            let every = Duration::from_secs(interval.unwrap_or(cfg.sync.interval_secs));
            run_with_health(&cfg, &mut engine, mode, None, every).await;
        }
        Commands::Check { dry_run } => {
            let cfg = load_validated(cli.config.as_ref(), dry_run)?;
            let engine = SyncEngine::from_config(&cfg, dry_run)
                .context("Failed to initialize sync engine")?;

            println!("config ok");
            if cfg.store.domain.is_empty() {
                println!("  store: (not configured)");
            } else {
                println!("  store: {} (api {})", cfg.store.domain, cfg.store.api_version);
            }
            println!("  channel: {}", engine.channel_mode().as_str());
            println!("  ai: {}", engine.ai_provider());
            println!("  batch size: {}", cfg.sync.batch_size);
            println!(
                "  retries: {} (backoff {})",
                cfg.sync.max_retries, cfg.sync.retry_backoff
            );
            println!("  interval: {}s", cfg.sync.interval_secs);
            println!("ok");
        }
        Commands::Tracking {
            order_id,
            tracking_number,
            url,
            carrier,
            dry_run,
        } => {
            let cfg = load_validated(cli.config.as_ref(), dry_run)?;
            let engine = SyncEngine::from_config(&cfg, dry_run)
                .context("Failed to initialize sync engine")?;

            let updated = engine
                .update_order_tracking(
                    &order_id,
                    &tracking_number,
                    url.as_deref(),
                    carrier.as_deref(),
                )
                .await;
            println!("tracking {}", order_id);
            println!("  number: {}", tracking_number);
            if updated {
                println!("ok");
            } else {
                println!("failed");
            }
        }
    }

    Ok(())
}
