//! Monitor - 期限切れリースの回収
//!
//! # フロー（tick ごと）
//! 1. `Queue::expired_leases(now)` で processing を走査
//! 2. 見つけたものだけ `Queue::requeue` に渡す（acknowledge が先なら何もしない）
//! 3. retry 上限に達したものは捨てる（dead-letter 構造は持たない）
//!
//! 1 件の失敗で tick は止めない。Monitor が動いていなければ放棄されたリースは
//! 回収されない。論理的に 1 つだけ動かす前提。

use std::sync::Arc;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::queue::{Queue, RequeueOutcome};
use crate::config::MonitorConfig;
use crate::domain::QueueError;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorReport {
    pub expired: usize,
    pub requeued: usize,
    pub dropped: usize,
    pub failed: usize,
}

pub struct Monitor {
    queue: Arc<Queue>,
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(queue: Arc<Queue>, config: MonitorConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self { queue, config })
    }

    /// One scan. Fails only if processing itself cannot be read.
    pub async fn tick(&self) -> Result<MonitorReport, QueueError> {
        let now = self.queue.clock().now();
        let expired = self.queue.expired_leases(now).await?;

        let mut report = MonitorReport {
            expired: expired.len(),
            ..MonitorReport::default()
        };
        for member in &expired {
            match self
                .queue
                .requeue(member, self.config.max_retry_attempts)
                .await
            {
                Ok(RequeueOutcome::Requeued) => report.requeued += 1,
                Ok(RequeueOutcome::Dropped) => report.dropped += 1,
                Ok(RequeueOutcome::Missing) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(queue = %self.queue.name(), job = %member, error = %e, "requeue failed");
                }
            }
        }
        Ok(report)
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            queue = %self.queue.name(),
            interval_ms = self.config.interval.as_millis() as u64,
            max_retry_attempts = self.config.max_retry_attempts,
            "monitor started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.tick().await {
                Ok(report) if report.expired > 0 => debug!(
                    queue = %self.queue.name(),
                    expired = report.expired,
                    requeued = report.requeued,
                    dropped = report.dropped,
                    failed = report.failed,
                    "monitor tick"
                ),
                Ok(_) => {}
                Err(e) => error!(queue = %self.queue.name(), error = %e, "monitor tick failed"),
            }
        }
        info!(queue = %self.queue.name(), "monitor stopped");
    }
}
