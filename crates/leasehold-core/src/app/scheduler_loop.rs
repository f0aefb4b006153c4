//! Scheduler - 遅延ジョブの起動
//!
//! tick ごとに `Queue::promote_due(now)` を呼ぶだけ。
//! Scheduler が動いていなければ遅延ジョブは pending に出てこない。

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::queue::Queue;
use crate::config::SchedulerConfig;
use crate::domain::QueueError;

pub struct Scheduler {
    queue: Arc<Queue>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(queue: Arc<Queue>, config: SchedulerConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self { queue, config })
    }

    /// Promote everything due now. Returns how many jobs became pending.
    pub async fn tick(&self) -> Result<usize, QueueError> {
        let now = self.queue.clock().now();
        self.queue.promote_due(now).await
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            queue = %self.queue.name(),
            interval_ms = self.config.interval.as_millis() as u64,
            "scheduler started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.tick().await {
                error!(queue = %self.queue.name(), error = %e, "scheduler tick failed");
            }
        }
        info!(queue = %self.queue.name(), "scheduler stopped");
    }
}
