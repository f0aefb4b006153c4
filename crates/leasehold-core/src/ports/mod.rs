//! Ports - 抽象化レイヤー
//!
//! 外部システム（バッキングストア、時計、ID 生成）へのインターフェースです。
//!
//! # 設計原則
//! - バッキングストアが唯一の正本（source of truth）
//! - コアはキューの状態をメモリに持たない
//! - 構造間の移動はすべてストアの 1 回のアトミック操作

pub mod clock;
pub mod id_generator;
pub mod store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::store::{RecordWrite, Store, StoreError};
