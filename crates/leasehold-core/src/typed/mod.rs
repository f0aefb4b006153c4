//! Typed - Job trait と型付きレジストリ
//!
//! # 二層構造
//! - **表層（Typed）**: `Job` trait - アプリが実装する
//! - **内部（Dyn）**: `DynFactory` trait - object-safe, type erasure

pub mod codec;
pub mod job;
pub mod registry;

pub use self::codec::{CodecError, DecodeError, EnvelopeCodec, decode_json, encode_json};
pub use self::job::{BoxError, DEFAULT_TIME_TO_LIVE, Job};
pub use self::registry::{DynFactory, JobRegistry, RegistryError};
