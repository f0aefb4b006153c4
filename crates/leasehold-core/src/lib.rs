//! leasehold-core
//!
//! Reliable background-job queue: at-least-once delivery over an atomic
//! backing store, with leases, retries and delayed activation.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope, state, errors）
//! - **ports**: 抽象化レイヤー（Store, Clock, IdGenerator）
//! - **typed**: 型付き Job API（Job trait, JobRegistry, EnvelopeCodec）
//! - **app**: アプリケーションロジック（builder, queue, worker_loop, monitor_loop, scheduler_loop）
//! - **impls**: 実装（InMemoryStore, RedisStore, Pool）
//! - **config**: 各ロールの設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use crate::app::{App, AppBuilder, BuildError, Queue};
pub use crate::domain::{Envelope, JobId, QueueError};
pub use crate::typed::{BoxError, Job};
