//! EnvelopeCodec - Job と Envelope の相互変換
//!
//! # フロー
//! - encode: Job::encode() で payload を得て、type_tag / time_to_live と一緒に Envelope に詰める
//! - decode: type_tag で JobRegistry を引き、登録された factory に payload を渡す
//!
//! コアは payload の中身を一切見ません。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::job::Job;
use super::registry::JobRegistry;
use crate::domain::{Envelope, JobId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("decoding failed: {0}")]
    DecodingFailed(String),
}

/// Why an envelope could not be turned back into a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("no job registered for type '{0}'")]
    UnknownJobType(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[source] CodecError),
}

/// serde_json helper for `Job::encode`.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::EncodingFailed(e.to_string()))
}

/// serde_json helper for `Job::decode`.
pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(payload).map_err(|e| CodecError::DecodingFailed(e.to_string()))
}

#[derive(Clone)]
pub struct EnvelopeCodec {
    registry: Arc<JobRegistry>,
}

impl EnvelopeCodec {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Wrap a job. Needs no registry: producers may enqueue types they never run.
    pub fn encode<J: Job>(
        job: &J,
        id: JobId,
        created_at: DateTime<Utc>,
    ) -> Result<Envelope, CodecError> {
        let payload = job.encode()?;
        Ok(Envelope::new(
            id,
            J::type_tag(),
            payload,
            created_at,
            job.time_to_live(),
        ))
    }

    pub fn decode(&self, envelope: &Envelope) -> Result<Box<dyn Job>, DecodeError> {
        let factory = self
            .registry
            .factory(&envelope.type_tag)
            .ok_or_else(|| DecodeError::UnknownJobType(envelope.type_tag.clone()))?;
        factory
            .build(&envelope.payload)
            .map_err(DecodeError::InvalidPayload)
    }

    /// Serialize the envelope record written under `<queue>:envelope:<id>`.
    pub fn to_record(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        encode_json(envelope)
    }

    pub fn from_record(bytes: &[u8]) -> Result<Envelope, CodecError> {
        decode_json(bytes)
    }
}
