//! spindle-demo: runs a small node graph on a chosen executor strategy.
//!
//! A heartbeat timer publishes a counter, a subscription logs it, and a
//! client calls a squaring service once before the main spin starts. The
//! context is shut down after `--duration-ms`.
//!
//! # Usage
//!
//! ```bash
//! # Single-threaded (default)
//! spindle-demo
//!
//! # Multi-threaded with four workers for two seconds
//! spindle-demo --kind multi_threaded --threads 4 --duration-ms 2000
//!
//! # From a TOML file, printing metrics at the end
//! spindle-demo --config spindle.toml --metrics
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use spindle_core::{Context, Node};
use spindle_executor::{create_executor, spin_executor_until_future_complete, ExecutorConfig, ExecutorOptions};

/// Run a demo node graph on a spindle executor.
#[derive(Parser, Debug)]
#[command(name = "spindle-demo", version, about)]
struct Cli {
    /// TOML config file. `SPINDLE_*` environment variables still override it.
    #[arg(long, env = "SPINDLE_CONFIG")]
    config: Option<PathBuf>,

    /// Executor strategy: single_threaded, multi_threaded, static_single_threaded, events.
    #[arg(long)]
    kind: Option<String>,

    /// Worker threads (multi_threaded only; 0 = available parallelism).
    #[arg(long)]
    threads: Option<usize>,

    /// How long to spin before shutting the context down.
    #[arg(long, env = "SPINDLE_DEMO_DURATION_MS", default_value_t = 1000)]
    duration_ms: u64,

    /// Heartbeat timer period.
    #[arg(long, env = "SPINDLE_DEMO_PERIOD_MS", default_value_t = 100)]
    period_ms: u64,

    /// Print executor metrics as JSON on exit.
    #[arg(long)]
    metrics: bool,
}

impl Cli {
    fn executor_config(&self) -> anyhow::Result<ExecutorConfig> {
        let mut config = match &self.config {
            Some(path) => ExecutorConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => {
                let mut config = ExecutorConfig::default();
                config.apply_env_overrides()?;
                config
            }
        };
        if let Some(kind) = &self.kind {
            config.kind = kind.parse()?;
        }
        if let Some(threads) = self.threads {
            config.number_of_threads = threads;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting spindle-demo");
    let config = cli.executor_config()?;

    let context = Context::new();
    let node = Node::with_context("demo", Arc::clone(&context))?;

    let publisher = node.create_publisher::<u64>("heartbeat");
    let beats = AtomicU64::new(0);
    let _timer = node.create_timer(Duration::from_millis(cli.period_ms), None, move || {
        let beat = beats.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = publisher.publish(beat) {
            tracing::warn!(error = %e, "heartbeat not published");
        }
    })?;
    let _listener = node.create_subscription::<u64, _>("heartbeat", 10, None, |beat| {
        tracing::info!(beat, "heartbeat received");
    })?;
    let _service = node.create_service::<u64, u64, _>("square", None, |x| x * x)?;
    let client = node.create_client::<u64, u64>("square", None)?;

    let executor = create_executor(ExecutorOptions::with_context(Arc::clone(&context)).config(config));
    executor.add_node(&node, true)?;
    tracing::info!(kind = %executor.kind(), "executor ready");

    let response = client.async_send_request(12)?;
    let code = spin_executor_until_future_complete(&*executor, response, Some(Duration::from_secs(1)))?;
    match code.into_success() {
        Some(Ok(squared)) => tracing::info!(squared, "square(12) answered"),
        Some(Err(_)) => tracing::warn!("square request canceled"),
        None => tracing::warn!("square request did not complete"),
    }

    let duration = Duration::from_millis(cli.duration_ms);
    std::thread::scope(|s| {
        let context = Arc::clone(&context);
        s.spawn(move || {
            std::thread::sleep(duration);
            context.shutdown("demo duration elapsed");
        });
        executor.spin()
    })?;

    tracing::info!(reason = ?context.shutdown_reason(), "spin finished");
    if cli.metrics {
        println!("{}", serde_json::to_string_pretty(&executor.metrics())?);
    }
    Ok(())
}
