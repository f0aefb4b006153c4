//! Errors - エラー型と分類

use thiserror::Error;

use crate::config::ConfigError;
use crate::ports::StoreError;
use crate::typed::CodecError;

/// ErrorKind は運用上の分類
///
/// - Transient: 一時的なもの（待てば解消する、例: QueueEmpty）
/// - Permanent: 恒久的なもの（リトライしても無意味）
/// - Infrastructure: ストア障害（呼び出し側でバックオフして再試行）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Errors surfaced by the queue engine.
///
/// `job` fields carry the store member as written (normally `job-<ulid>`),
/// so a malformed member can still be reported.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("queue empty")]
    QueueEmpty,

    #[error("unknown job type '{type_tag}' for {job}")]
    UnknownJobType { job: String, type_tag: String },

    #[error("failed to decode {job}: {source}")]
    DecodeFailed {
        job: String,
        #[source]
        source: CodecError,
    },

    #[error("failed to encode job: {0}")]
    EncodingFailed(#[source] CodecError),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::StoreUnavailable(_) => ErrorKind::Infrastructure,
            QueueError::QueueEmpty => ErrorKind::Transient,
            QueueError::UnknownJobType { .. }
            | QueueError::DecodeFailed { .. }
            | QueueError::EncodingFailed(_)
            | QueueError::InvalidConfig(_) => ErrorKind::Permanent,
        }
    }

    /// Decode-side failures: the envelope has already been discarded.
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            QueueError::UnknownJobType { .. } | QueueError::DecodeFailed { .. }
        )
    }
}
