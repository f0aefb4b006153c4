//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: 開発・テスト用の Store
//! - **RedisStore**: 本番用の Store（feature = "redis"）
//! - **Pool**: 接続ハンドルの有限プール

pub mod memory_store;
pub mod pool;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use self::memory_store::InMemoryStore;
pub use self::pool::{Pool, PoolError, Pooled};
#[cfg(feature = "redis")]
pub use self::redis_store::RedisStore;
