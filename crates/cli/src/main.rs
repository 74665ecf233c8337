//! Event Batch CLI - size and time bounded event batching
//!
//! This binary drives an event batcher with simulated producers and a
//! simulated uploader, printing each published batch and a final summary.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eventbatch_batcher::{BatcherStats, EventBatcher, FlushTrigger, FnUploader};
use eventbatch_core::config::Config;
use eventbatch_core::{Batch, Error, Event};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "eventbatch")]
#[command(about = "Size- and time-bounded event batching")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed simulated producers through a batcher until they finish or Ctrl+C
    Run {
        /// Number of concurrent producers
        #[arg(long, default_value_t = 4)]
        producers: u64,

        /// Events submitted by each producer
        #[arg(long, default_value_t = 1000)]
        events: u64,

        /// Reject every K-th batch in the simulated uploader
        #[arg(long, value_name = "K")]
        fail_every: Option<u64>,

        /// Pause between submissions of one producer, in milliseconds
        #[arg(long, default_value_t = 1)]
        interval_ms: u64,

        /// Print the final statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    match cli.command {
        Some(Commands::Run {
            producers,
            events,
            fail_every,
            interval_ms,
            json,
        }) => {
            let options = RunOptions {
                producers,
                events,
                fail_every,
                interval: Duration::from_millis(interval_ms),
                json,
            };
            run(cli.config.as_deref(), options).await
        }
        Some(Commands::Config) => print_config(cli.config.as_deref()),
        None => {
            println!("Run 'eventbatch run' to start a simulated batching session, or --help for more options");
            Ok(())
        }
    }
}

/// Initialize logging system
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "eventbatch_batcher={level},eventbatch_core={level},{}={level}",
            env!("CARGO_PKG_NAME")
        ))
        .init();

    Ok(())
}

struct RunOptions {
    producers: u64,
    events: u64,
    fail_every: Option<u64>,
    interval: Duration,
    json: bool,
}

/// Whether the simulated uploader rejects the batch with this sequence number
fn should_reject(sequence: u64, fail_every: Option<u64>) -> bool {
    matches!(fail_every, Some(k) if k > 0 && sequence % k == 0)
}

fn simulated_upload(batch: &Batch, fail_every: Option<u64>) -> eventbatch_core::Result<()> {
    if should_reject(batch.sequence(), fail_every) {
        return Err(Error::Other(anyhow::anyhow!(
            "simulated rejection of batch #{}",
            batch.sequence()
        )));
    }
    debug!("Uploaded batch #{} ({} events)", batch.sequence(), batch.len());
    Ok(())
}

/// Producers draw ids from disjoint ranges of `events` each
///
/// Returns the size of the whole id span, which must fit in a `u64`.
fn check_id_space(producers: u64, events: u64) -> Result<u64> {
    producers.checked_mul(events).with_context(|| {
        format!("{producers} producers x {events} events exceeds the event id range")
    })
}

async fn run(config_path: Option<&Path>, options: RunOptions) -> Result<()> {
    check_id_space(options.producers, options.events)?;
    let config = Config::load(config_path).context("Failed to load configuration")?;
    info!(
        "Starting batcher (batch_size: {}, max_delay: {:?}) with {} producers",
        config.batcher.batch_size,
        config.batcher.max_delay(),
        options.producers
    );

    let fail_every = options.fail_every;
    let uploader = FnUploader::new(move |batch: Batch| async move {
        simulated_upload(&batch, fail_every)
    });
    let batcher = EventBatcher::new(config.batcher, uploader)?;

    let mut reports = batcher.subscribe();
    let reporter = tokio::spawn(async move {
        while let Some(batch) = reports.recv().await {
            let ids = batch.ids();
            info!(
                "Batch #{}: {} events (ids {}..={})",
                batch.sequence(),
                batch.len(),
                ids.first().copied().unwrap_or_default(),
                ids.last().copied().unwrap_or_default()
            );
        }
        reports.missed()
    });

    let producers: Vec<_> = (0..options.producers)
        .map(|producer| {
            let queue = batcher.submitter();
            let events = options.events;
            let interval = options.interval;
            tokio::spawn(async move {
                let mut submitted = 0u64;
                for seq in 0..events {
                    let id = producer * events + seq;
                    let event = Event::new(id, format!("producer {producer} event {seq}"));
                    if let Err(e) = queue.submit(event).await {
                        if e.is_rejection() {
                            debug!("Producer {producer} stopped: {e}");
                        } else {
                            warn!("Producer {producer} failed: {e}");
                        }
                        break;
                    }
                    submitted += 1;
                    if !interval.is_zero() {
                        tokio::time::sleep(interval).await;
                    }
                }
                submitted
            })
        })
        .collect();

    tokio::select! {
        results = futures::future::join_all(producers) => {
            let submitted: u64 = results.into_iter().filter_map(|r| r.ok()).sum();
            info!("Producers finished, {} events submitted", submitted);
        }
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
            Err(e) => error!("Error setting up signal handler: {e}"),
        },
    }

    let close_result = batcher.close().await;
    let missed = reporter.await.unwrap_or_default();
    if missed > 0 {
        warn!("Report printer fell behind and missed {} batches", missed);
    }

    print_stats(&batcher.stats(), options.json)?;
    close_result.context("Batcher did not shut down cleanly")?;
    Ok(())
}

fn print_stats(stats: &BatcherStats, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }

    println!("Events accepted:    {}", stats.events_accepted());
    println!("Batches flushed:    {}", stats.batches_flushed());
    println!("Events flushed:     {}", stats.events_flushed());
    for trigger in [
        FlushTrigger::Size,
        FlushTrigger::Deadline,
        FlushTrigger::Manual,
        FlushTrigger::Shutdown,
    ] {
        println!(
            "  {:<16} {}",
            format!("{trigger} flushes:"),
            stats.flushes_by(trigger)
        );
    }
    println!("Upload failures:    {}", stats.upload_failures());
    println!("Events lost:        {}", stats.events_lost());
    println!("Unobserved reports: {}", stats.reports_unobserved());
    Ok(())
}

fn print_config(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path).context("Failed to load configuration")?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}
