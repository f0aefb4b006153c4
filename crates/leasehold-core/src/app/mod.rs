//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてキューの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: ジョブ型の登録とワイヤリング
//! - **Queue**: enqueue / schedule / dequeue / acknowledge と clock 側の操作
//! - **WorkerPool**: ジョブ実行ループ（dequeue→execute→acknowledge）
//! - **Monitor**: 期限切れリースの回収
//! - **Scheduler**: 遅延ジョブの起動
//! - **ClockProcess**: Monitor + Scheduler

pub mod builder;
pub mod clock_process;
pub mod monitor_loop;
pub mod queue;
pub mod scheduler_loop;
pub mod status;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::clock_process::{ClockHandle, ClockProcess};
pub use self::monitor_loop::{Monitor, MonitorReport};
pub use self::queue::{LeasedJob, Queue, RequeueOutcome};
pub use self::scheduler_loop::Scheduler;
pub use self::status::QueueCounts;
pub use self::worker_loop::{WorkerPool, WorkerPoolHandle};
