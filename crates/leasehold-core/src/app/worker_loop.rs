//! WorkerPool - ジョブ実行ループ
//!
//! # フロー（スロットごと）
//! 1. Idle: `Queue::dequeue(0)` を 1 回だけ試す
//! 2. Leased → Running: ジョブを別タスクで実行（panic もここで止まる）
//! 3. 成功なら acknowledge、失敗なら何もしない（リース切れで Monitor が拾う）
//! 4. Idle に戻る
//!
//! 空きスロットが無ければ dequeue しない。スロット数 == 同時実行数。
//!
//! # シャットダウン
//! - CancellationToken が cancel されたら新しい dequeue をしない
//! - 実行中のジョブは最後まで走らせる
//! - 全スロットが抜けたら `run` が返る

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{LeasedJob, Queue};
use crate::config::WorkerConfig;
use crate::domain::{ErrorKind, QueueError, SlotState};

pub struct WorkerPool {
    queue: Arc<Queue>,
    config: WorkerConfig,
    slots: Arc<[AtomicU8]>,
}

impl WorkerPool {
    pub fn new(queue: Arc<Queue>, config: WorkerConfig) -> Result<Self, QueueError> {
        config.validate()?;
        let slots = (0..config.max_concurrent_jobs)
            .map(|_| AtomicU8::new(SlotState::Idle as u8))
            .collect();
        Ok(Self {
            queue,
            config,
            slots,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        snapshot(&self.slots)
    }

    /// Run on a background task with a fresh cancellation token.
    pub fn spawn(self) -> WorkerPoolHandle {
        let cancel = CancellationToken::new();
        let slots = Arc::clone(&self.slots);
        let join = tokio::spawn(self.run(cancel.clone()));
        WorkerPoolHandle {
            cancel,
            slots,
            join,
        }
    }

    /// Drive every slot until `cancel` fires and in-flight jobs are done.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            queue = %self.queue.name(),
            slots = self.config.max_concurrent_jobs,
            "worker pool started"
        );

        let mut set = JoinSet::new();
        for slot in 0..self.config.max_concurrent_jobs {
            let worker = Slot {
                index: slot,
                queue: Arc::clone(&self.queue),
                slots: Arc::clone(&self.slots),
                polling_interval: self.config.average_polling_interval,
            };
            set.spawn(worker.run(cancel.clone()));
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(queue = %self.queue.name(), error = %e, "worker slot aborted");
            }
        }
        info!(queue = %self.queue.name(), "worker pool stopped");
    }
}

/// Handle to a spawned [`WorkerPool`].
pub struct WorkerPoolHandle {
    cancel: CancellationToken,
    slots: Arc<[AtomicU8]>,
    join: JoinHandle<()>,
}

impl WorkerPoolHandle {
    /// Stop taking new jobs. Running jobs are not interrupted.
    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Request shutdown and wait until every slot is idle and stopped.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            error!(error = %e, "worker pool task failed");
        }
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        snapshot(&self.slots)
    }

    pub fn busy_slots(&self) -> usize {
        self.slot_states().into_iter().filter(|s| s.is_busy()).count()
    }
}

fn snapshot(slots: &[AtomicU8]) -> Vec<SlotState> {
    slots
        .iter()
        .map(|s| SlotState::from_u8(s.load(Ordering::SeqCst)))
        .collect()
}

struct Slot {
    index: usize,
    queue: Arc<Queue>,
    slots: Arc<[AtomicU8]>,
    polling_interval: Duration,
}

impl Slot {
    fn set_state(&self, state: SlotState) {
        if let Some(cell) = self.slots.get(self.index) {
            cell.store(state as u8, Ordering::SeqCst);
        }
    }

    async fn run(self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            self.set_state(SlotState::Idle);

            match self.queue.dequeue(Duration::ZERO).await {
                Ok(leased) => {
                    self.set_state(SlotState::Leased);
                    self.execute(leased).await;
                }
                Err(e) => {
                    match e.kind() {
                        ErrorKind::Transient => {}
                        ErrorKind::Permanent => {
                            debug!(slot = self.index, error = %e, "dequeue discarded an envelope")
                        }
                        ErrorKind::Infrastructure => {
                            error!(slot = self.index, error = %e, "dequeue failed")
                        }
                    }
                    if !self.idle(&cancel).await {
                        break;
                    }
                }
            }
        }
        self.set_state(SlotState::Idle);
    }

    async fn execute(&self, leased: LeasedJob) {
        let LeasedJob { envelope, job } = leased;
        let id = envelope.id;
        self.set_state(SlotState::Running);

        let started = Instant::now();
        let result = tokio::spawn(async move { job.execute().await }).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(())) => match self.queue.acknowledge(&id).await {
                Ok(()) => debug!(slot = self.index, job = %id, elapsed_ms, "job completed"),
                Err(e) => error!(slot = self.index, job = %id, error = %e, "acknowledge failed"),
            },
            Ok(Err(e)) => warn!(
                slot = self.index,
                job = %id,
                type_tag = %envelope.type_tag,
                retry_count = envelope.retry_count,
                elapsed_ms,
                error = %e,
                "job failed; left for lease expiry"
            ),
            Err(e) => warn!(
                slot = self.index,
                job = %id,
                type_tag = %envelope.type_tag,
                error = %e,
                "job panicked; left for lease expiry"
            ),
        }
    }

    /// Sleep one jittered polling interval. `false` if cancelled meanwhile.
    async fn idle(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(jittered(self.polling_interval)) => true,
        }
    }
}

/// `base` scaled by a random factor in [0.5, 1.5).
fn jittered(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let factor: f64 = rand::thread_rng().gen_range(0.5..1.5);
    base.mul_f64(factor)
}
