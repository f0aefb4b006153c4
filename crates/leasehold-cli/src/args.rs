use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "leasehold")]
#[command(version)]
#[command(about = "Reliable background-job queue: producer, worker and clock roles")]
#[command(propagate_version = true)]
pub struct Args {
    /// Human-readable logs (JSON otherwise). RUST_LOG still applies.
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StoreArgs {
    #[arg(
        long,
        global = true,
        env = "LEASEHOLD_REDIS_URL",
        default_value = "redis://127.0.0.1:6379/"
    )]
    pub redis_url: String,

    /// Queue name; prefix of every store key.
    #[arg(long, global = true, env = "LEASEHOLD_QUEUE", default_value = "default")]
    pub queue: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Enqueue one job (producer role)
    Enqueue(EnqueueArgs),

    /// Run a worker pool until interrupted (worker role)
    Worker(WorkerArgs),

    /// Run the monitor and scheduler until interrupted (clock role)
    Clock(ClockArgs),

    /// Print pending / delayed / processing counts as JSON
    Status,

    /// Run producer, workers and clock in one process on an in-memory store
    Demo(DemoArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Greet,
    Flaky,
}

#[derive(ClapArgs, Debug)]
pub struct EnqueueArgs {
    #[arg(value_enum)]
    pub kind: JobKind,

    /// Name passed to the job.
    #[arg(long, default_value = "world")]
    pub name: String,

    /// Hold the job in the delayed set for this many milliseconds.
    #[arg(long)]
    pub delay_ms: Option<u64>,
}

#[derive(ClapArgs, Debug)]
pub struct WorkerArgs {
    /// Execution slots (and store connections).
    #[arg(long, default_value_t = 4)]
    pub max_concurrent_jobs: usize,

    #[arg(long, default_value_t = 1000)]
    pub polling_interval_ms: u64,

    /// How many times `flaky` jobs fail in this process before succeeding.
    #[arg(long, default_value_t = 2)]
    pub flaky_failures: u32,
}

impl WorkerArgs {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

#[derive(ClapArgs, Debug)]
pub struct ClockArgs {
    #[arg(long, default_value_t = 5000)]
    pub monitor_interval_ms: u64,

    #[arg(long, default_value_t = 5)]
    pub max_retry_attempts: u32,

    #[arg(long, default_value_t = 1000)]
    pub scheduler_interval_ms: u64,
}

#[derive(ClapArgs, Debug)]
pub struct DemoArgs {
    #[arg(long, default_value_t = 5)]
    pub jobs: usize,

    #[arg(long, default_value_t = 2)]
    pub max_concurrent_jobs: usize,

    /// Give up waiting for the queue to drain after this many seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}
