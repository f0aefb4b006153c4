mod args;
mod jobs;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::Parser;
use leasehold_core::config::{MonitorConfig, QueueConfig, SchedulerConfig, WorkerConfig};
use leasehold_core::impls::{InMemoryStore, RedisStore};
use leasehold_core::ports::Store;
use leasehold_core::{App, AppBuilder};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::{Args, ClockArgs, Command, DemoArgs, EnqueueArgs, JobKind, StoreArgs, WorkerArgs};
use crate::jobs::{Flaky, Greet};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "ctrl-c handler failed");
            }
            cancel.cancel();
        });
    }

    match run(args, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("leasehold failed: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if debug {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    }
}

async fn run(args: Args, cancel: CancellationToken) -> Result<()> {
    match args.command {
        Command::Enqueue(enqueue) => run_enqueue(&args.store, enqueue).await,
        Command::Worker(worker) => run_worker(&args.store, worker, cancel).await,
        Command::Clock(clock) => run_clock(&args.store, clock, cancel).await,
        Command::Status => run_status(&args.store).await,
        Command::Demo(demo) => run_demo(&args.store, demo, cancel).await,
    }
}

fn build_app(queue: &str, store: Arc<dyn Store>, flaky_failures: u32) -> Result<App> {
    let builder = AppBuilder::new().queue(QueueConfig::new(queue));
    let app = jobs::register(builder, flaky_failures)
        .context("registering job types")?
        .build(store)
        .context("building app")?;
    Ok(app)
}

async fn connect(store: &StoreArgs, pool_size: usize) -> Result<Arc<dyn Store>> {
    let redis = RedisStore::connect(&store.redis_url, pool_size)
        .await
        .context("connecting to redis")?;
    Ok(Arc::new(redis))
}

async fn run_enqueue(store_args: &StoreArgs, args: EnqueueArgs) -> Result<()> {
    let store = connect(store_args, 1).await?;
    let app = build_app(&store_args.queue, store, 0)?;
    let queue = app.queue();

    let id = match (args.kind, args.delay_ms) {
        (JobKind::Greet, None) => queue.enqueue(&Greet { name: args.name }).await,
        (JobKind::Flaky, None) => queue.enqueue(&Flaky::new(args.name)).await,
        (kind, Some(delay_ms)) => {
            let at = activation_time(queue.clock().now(), delay_ms)?;
            match kind {
                JobKind::Greet => queue.schedule(&Greet { name: args.name }, at).await,
                JobKind::Flaky => queue.schedule(&Flaky::new(args.name), at).await,
            }
        }
    }
    .context("enqueueing job")?;

    println!("{id}");
    Ok(())
}

/// `now` plus `delay_ms`, refusing delays past the representable range.
fn activation_time(now: DateTime<Utc>, delay_ms: u64) -> Result<DateTime<Utc>> {
    i64::try_from(delay_ms)
        .ok()
        .and_then(chrono::Duration::try_milliseconds)
        .and_then(|delay| now.checked_add_signed(delay))
        .ok_or_else(|| anyhow!("--delay-ms {delay_ms} is too large"))
}

async fn run_worker(
    store_args: &StoreArgs,
    args: WorkerArgs,
    cancel: CancellationToken,
) -> Result<()> {
    let store = connect(store_args, args.max_concurrent_jobs).await?;
    let app = build_app(&store_args.queue, store, args.flaky_failures)?;
    let config = WorkerConfig::new(args.max_concurrent_jobs, args.polling_interval());
    app.worker_pool(config)
        .context("configuring worker pool")?
        .run(cancel)
        .await;
    Ok(())
}

async fn run_clock(
    store_args: &StoreArgs,
    args: ClockArgs,
    cancel: CancellationToken,
) -> Result<()> {
    let store = connect(store_args, 2).await?;
    let app = build_app(&store_args.queue, store, 0)?;
    let clock = app
        .clock_process(
            MonitorConfig::new(
                Duration::from_millis(args.monitor_interval_ms),
                args.max_retry_attempts,
            ),
            SchedulerConfig::new(Duration::from_millis(args.scheduler_interval_ms)),
        )
        .context("configuring clock process")?;
    clock.run(cancel).await;
    Ok(())
}

async fn run_status(store_args: &StoreArgs) -> Result<()> {
    let store = connect(store_args, 1).await?;
    let app = build_app(&store_args.queue, store, 0)?;
    let counts = app.queue().counts().await.context("reading queue counts")?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

/// Everything in one process over an in-memory store.
async fn run_demo(store_args: &StoreArgs, args: DemoArgs, cancel: CancellationToken) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let app = build_app(&store_args.queue, store, 2)?;
    let queue = Arc::clone(app.queue());

    for i in 0..args.jobs {
        queue
            .enqueue(&Greet {
                name: format!("guest-{i}"),
            })
            .await?;
    }
    let later = queue.clock().now() + chrono::Duration::seconds(2);
    queue
        .schedule(
            &Greet {
                name: "latecomer".to_string(),
            },
            later,
        )
        .await?;
    queue.enqueue(&Flaky::new("flaky")).await?;

    let workers = app
        .worker_pool(WorkerConfig::new(
            args.max_concurrent_jobs,
            Duration::from_millis(200),
        ))?
        .spawn();
    let clock = app
        .clock_process(
            MonitorConfig::new(Duration::from_millis(500), 5),
            SchedulerConfig::new(Duration::from_millis(250)),
        )?
        .spawn();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout_secs);
    loop {
        let counts = queue.counts().await?;
        if counts.is_idle() {
            info!("queue drained");
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(?counts, "demo timed out before the queue drained");
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    workers.shutdown_and_join().await;
    clock.shutdown_and_join().await;
    println!("{}", serde_json::to_string_pretty(&queue.counts().await?)?);
    Ok(())
}
