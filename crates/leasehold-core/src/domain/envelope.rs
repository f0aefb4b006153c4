//! Envelope - the transport record stored in the backing structures.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// Envelope wraps one job for storage.
///
/// The payload is opaque: only the registered job type knows how to read it.
/// `lease_deadline` lives under its own store key (it changes on every
/// dequeue), so it is never part of the serialized record; `Queue` fills it
/// in when reading an envelope back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: JobId,
    pub type_tag: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    /// Lease length recorded at encode time, in milliseconds.
    pub time_to_live_ms: u64,
    #[serde(skip)]
    pub lease_deadline: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn new(
        id: JobId,
        type_tag: impl Into<String>,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
        time_to_live: Duration,
    ) -> Self {
        Self {
            id,
            type_tag: type_tag.into(),
            payload,
            created_at,
            scheduled_at: None,
            retry_count: 0,
            time_to_live_ms: u64::try_from(time_to_live.as_millis()).unwrap_or(u64::MAX),
            lease_deadline: None,
        }
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn time_to_live(&self) -> Duration {
        Duration::from_millis(self.time_to_live_ms)
    }

    /// Deadline of a lease that starts at `leased_at`.
    pub fn lease_deadline_from(&self, leased_at: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = chrono::Duration::milliseconds(
            i64::try_from(self.time_to_live_ms).unwrap_or(i64::MAX),
        );
        leased_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
