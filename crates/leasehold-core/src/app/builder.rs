//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - ports（Store / Clock / IdGenerator）の差し替え

use std::sync::Arc;

use super::clock_process::ClockProcess;
use super::monitor_loop::Monitor;
use super::queue::Queue;
use super::scheduler_loop::Scheduler;
use super::worker_loop::WorkerPool;
use crate::config::{MonitorConfig, QueueConfig, SchedulerConfig, WorkerConfig};
use crate::domain::QueueError;
use crate::ports::{Clock, IdGenerator, Store, SystemClock, UlidGenerator};
use crate::typed::{CodecError, Job, JobRegistry, RegistryError};

/// AppBuilder はジョブ型を登録し、Queue とループを組み立てる
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .queue(QueueConfig::new("mail"))
///     .register::<SendEmail>()?
///     .expect_jobs(&["SendEmail"])
///     .build(store)?;
///
/// app.worker_pool(WorkerConfig::default())?.spawn();
/// ```
///
/// # Fail-fast 設計
/// - expect_jobs() で期待される type_tag を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct AppBuilder {
    registry: JobRegistry,
    expected_jobs: Option<Vec<String>>,
    queue: QueueConfig,
    clock: Arc<dyn Clock>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing job types: {0:?}. These jobs were expected but not registered.")]
    MissingJobTypes(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: JobRegistry::new(),
            expected_jobs: None,
            queue: QueueConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Job 型を登録（`J::type_tag()` で引けるようになる）
    pub fn register<J: Job>(mut self) -> Result<Self, RegistryError> {
        self.registry.register::<J>()?;
        Ok(self)
    }

    /// クロージャを factory として登録（状態を注入したいとき）
    pub fn register_factory<F>(
        mut self,
        type_tag: impl Into<String>,
        factory: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(&[u8]) -> Result<Box<dyn Job>, CodecError> + Send + Sync + 'static,
    {
        self.registry.register_factory(type_tag, factory)?;
        Ok(self)
    }

    /// 期待される type_tag のリストを設定
    pub fn expect_jobs(mut self, type_tags: &[&str]) -> Self {
        self.expected_jobs = Some(type_tags.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn queue(mut self, config: QueueConfig) -> Self {
        self.queue = config;
        self
    }

    /// Replace the clock (tests pass a `ManualClock`). Job ids take their
    /// timestamp from the same clock.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// AppBuilder を構築して App を生成
    ///
    /// # 検証
    /// - expect_jobs() で設定された type_tag が全て登録されているか
    /// - QueueConfig が有効か
    pub fn build(self, store: Arc<dyn Store>) -> Result<App, BuildError> {
        if let Some(expected) = &self.expected_jobs {
            let missing: Vec<String> = expected
                .iter()
                .filter(|tag| !self.registry.contains(tag))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingJobTypes(missing));
            }
        }

        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&self.clock)));
        let queue = Queue::new(
            &self.queue,
            store,
            Arc::new(self.registry),
            self.clock,
            ids,
        )?;
        Ok(App {
            queue: Arc::new(queue),
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// App は組み立て済みの Queue と、そこからループを作る入口
#[derive(Clone)]
pub struct App {
    queue: Arc<Queue>,
}

impl App {
    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn worker_pool(&self, config: WorkerConfig) -> Result<WorkerPool, QueueError> {
        WorkerPool::new(Arc::clone(&self.queue), config)
    }

    pub fn monitor(&self, config: MonitorConfig) -> Result<Monitor, QueueError> {
        Monitor::new(Arc::clone(&self.queue), config)
    }

    pub fn scheduler(&self, config: SchedulerConfig) -> Result<Scheduler, QueueError> {
        Scheduler::new(Arc::clone(&self.queue), config)
    }

    pub fn clock_process(
        &self,
        monitor: MonitorConfig,
        scheduler: SchedulerConfig,
    ) -> Result<ClockProcess, QueueError> {
        ClockProcess::new(Arc::clone(&self.queue), monitor, scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStore;
    use crate::typed::{BoxError, decode_json, encode_json};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Resize {
        width: u32,
    }

    #[async_trait]
    impl Job for Resize {
        fn encode(&self) -> Result<Vec<u8>, CodecError> {
            encode_json(self)
        }

        fn decode(payload: &[u8]) -> Result<Self, CodecError> {
            decode_json(payload)
        }

        async fn execute(&self) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn store() -> Arc<dyn Store> {
        Arc::new(InMemoryStore::new())
    }

    #[test]
    fn test_build_success() {
        let app = AppBuilder::new()
            .register::<Resize>()
            .unwrap()
            .expect_jobs(&["Resize"])
            .build(store());
        assert!(app.is_ok());
    }

    #[test]
    fn test_build_missing_job_types() {
        let app = AppBuilder::new()
            .register::<Resize>()
            .unwrap()
            .expect_jobs(&["Resize", "Archive"])
            .build(store());
        assert!(matches!(
            app,
            Err(BuildError::MissingJobTypes(missing)) if missing == vec!["Archive".to_string()]
        ));
    }

    #[test]
    fn test_build_no_expect_jobs() {
        let app = AppBuilder::new().register::<Resize>().unwrap().build(store());
        assert!(app.is_ok());
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let err = AppBuilder::new()
            .register::<Resize>()
            .unwrap()
            .register::<Resize>()
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::AlreadyRegistered(tag) if tag == "Resize"));
    }

    #[test]
    fn test_invalid_queue_config_fails_build() {
        let app = AppBuilder::new()
            .queue(QueueConfig::new(""))
            .build(store());
        assert!(matches!(
            app,
            Err(BuildError::Queue(QueueError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn test_factory_counts_as_registered() {
        let app = AppBuilder::new()
            .register_factory("resize.v2", |payload: &[u8]| {
                Ok(Box::new(Resize::decode(payload)?) as Box<dyn Job>)
            })
            .unwrap()
            .expect_jobs(&["resize.v2"])
            .build(store());
        assert!(app.is_ok());
    }

    #[test]
    fn test_app_rejects_zero_slot_worker_pool() {
        let app = AppBuilder::new().build(store()).unwrap();
        assert!(app.worker_pool(WorkerConfig::new(0, std::time::Duration::from_secs(1))).is_err());
        assert!(app.worker_pool(WorkerConfig::default()).is_ok());
    }
}
