//! ClockProcess - Monitor と Scheduler を 1 つのプロセスで回す
//!
//! 2 つのループは同じ CancellationToken を共有する。

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::monitor_loop::Monitor;
use super::queue::Queue;
use super::scheduler_loop::Scheduler;
use crate::config::{MonitorConfig, SchedulerConfig};
use crate::domain::QueueError;

pub struct ClockProcess {
    monitor: Monitor,
    scheduler: Scheduler,
}

impl ClockProcess {
    pub fn new(
        queue: Arc<Queue>,
        monitor: MonitorConfig,
        scheduler: SchedulerConfig,
    ) -> Result<Self, QueueError> {
        Ok(Self {
            monitor: Monitor::new(Arc::clone(&queue), monitor)?,
            scheduler: Scheduler::new(queue, scheduler)?,
        })
    }

    /// Run both loops until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tokio::join!(
            self.monitor.run(cancel.clone()),
            self.scheduler.run(cancel),
        );
    }

    pub fn spawn(self) -> ClockHandle {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(self.run(cancel.clone()));
        ClockHandle { cancel, join }
    }
}

pub struct ClockHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ClockHandle {
    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            error!(error = %e, "clock task failed");
        }
    }
}
