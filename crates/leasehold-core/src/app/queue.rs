//! Queue - 信頼性キューのエンジン
//!
//! # 構造（キュー名 `<q>` ごと）
//! - `<q>:pending`     list        実行待ち（FIFO）
//! - `<q>:delayed`     sorted set  起動時刻待ち（score = 起動時刻 ms）
//! - `<q>:processing`  list        リース中
//! - `<q>:envelope:<id>`           Envelope レコード（JSON）
//! - `<q>:lease:<id>`              リース期限（ms）
//!
//! # 原則
//! - 構造間の移動は必ず Store の 1 呼び出し（pop_push / move_member / zpop_due）
//! - レコードは「構造に入る前に書き、構造から消えた後に消す」
//! - リース期限が無い processing メンバーは、初めて見つけた時点から time_to_live を数える
//! - リースは processing にいる間しか書かない（ack 済みのメンバーに残さない）

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

use super::status::QueueCounts;
use crate::config::QueueConfig;
use crate::domain::{Envelope, JobId, Location, QueueError};
use crate::ports::{Clock, IdGenerator, RecordWrite, Store};
use crate::typed::{CodecError, DecodeError, EnvelopeCodec, Job, JobRegistry};

/// Store keys of one queue.
#[derive(Debug, Clone)]
struct Keys {
    name: String,
    pending: String,
    delayed: String,
    processing: String,
}

impl Keys {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pending: format!("{name}:pending"),
            delayed: format!("{name}:delayed"),
            processing: format!("{name}:processing"),
        }
    }

    fn envelope(&self, member: &str) -> String {
        format!("{}:envelope:{member}", self.name)
    }

    fn lease(&self, member: &str) -> String {
        format!("{}:lease:{member}", self.name)
    }
}

/// What `requeue_expired` did with one processing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Back at the pending tail with `retry_count + 1`.
    Requeued,
    /// Retry limit reached (or the record was unreadable); gone for good.
    Dropped,
    /// No longer in processing; acknowledged or handled elsewhere.
    Missing,
}

impl RequeueOutcome {
    pub fn is_requeued(self) -> bool {
        matches!(self, RequeueOutcome::Requeued)
    }
}

/// A dequeued job together with the envelope it came from.
pub struct LeasedJob {
    pub envelope: Envelope,
    pub job: Box<dyn Job>,
}

impl LeasedJob {
    pub fn id(&self) -> JobId {
        self.envelope.id
    }
}

impl fmt::Debug for LeasedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeasedJob")
            .field("envelope", &self.envelope)
            .finish_non_exhaustive()
    }
}

/// The queue engine. Holds no authoritative state of its own: every call
/// reads or moves entries in the store, so any number of `Queue` values
/// (in any number of processes) may share one queue name.
pub struct Queue {
    keys: Keys,
    store: Arc<dyn Store>,
    codec: EnvelopeCodec,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    poll_step: Duration,
}

impl Queue {
    pub fn new(
        config: &QueueConfig,
        store: Arc<dyn Store>,
        registry: Arc<JobRegistry>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self {
            keys: Keys::new(&config.name),
            store,
            codec: EnvelopeCodec::new(registry),
            clock,
            ids,
            poll_step: config.poll_step,
        })
    }

    pub fn name(&self) -> &str {
        &self.keys.name
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn registry(&self) -> &JobRegistry {
        self.codec.registry()
    }

    // =========================================================================
    // Producer
    // =========================================================================

    /// Append a job to the pending tail.
    pub async fn enqueue<J: Job>(&self, job: &J) -> Result<JobId, QueueError> {
        let envelope = self.wrap(job)?;
        self.enqueue_envelope(envelope).await
    }

    /// Append a pre-built envelope to the pending tail.
    ///
    /// Any `scheduled_at` on the envelope is kept as a record but ignored for
    /// placement; use [`Queue::schedule`] for delayed work.
    pub async fn enqueue_envelope(&self, envelope: Envelope) -> Result<JobId, QueueError> {
        let id = envelope.id;
        let member = id.to_string();
        self.write_record(&member, &envelope).await?;
        self.store
            .push_back(&self.keys.pending, &member)
            .await
            .map_err(|e| self.store_failure("enqueue", e))?;
        debug!(queue = %self.keys.name, job = %id, type_tag = %envelope.type_tag, "enqueued");
        Ok(id)
    }

    /// Hold a job in delayed until `at`. A time that is not in the future
    /// enqueues immediately.
    pub async fn schedule<J: Job>(&self, job: &J, at: DateTime<Utc>) -> Result<JobId, QueueError> {
        if at <= self.clock.now() {
            return self.enqueue(job).await;
        }
        let envelope = self.wrap(job)?.scheduled_for(at);
        let id = envelope.id;
        let member = id.to_string();
        self.write_record(&member, &envelope).await?;
        self.store
            .zadd(&self.keys.delayed, at.timestamp_millis(), &member)
            .await
            .map_err(|e| self.store_failure("schedule", e))?;
        debug!(queue = %self.keys.name, job = %id, %at, "scheduled");
        Ok(id)
    }

    fn wrap<J: Job>(&self, job: &J) -> Result<Envelope, QueueError> {
        EnvelopeCodec::encode(job, self.ids.generate_job_id(), self.clock.now())
            .map_err(QueueError::EncodingFailed)
    }

    async fn write_record(&self, member: &str, envelope: &Envelope) -> Result<(), QueueError> {
        let record = EnvelopeCodec::to_record(envelope).map_err(QueueError::EncodingFailed)?;
        self.store
            .set(&self.keys.envelope(member), &record)
            .await
            .map_err(|e| self.store_failure("write envelope", e))?;
        Ok(())
    }

    // =========================================================================
    // Worker
    // =========================================================================

    /// Lease the head of pending.
    ///
    /// Polls every `poll_step` until `timeout` passes; `Duration::ZERO`
    /// makes exactly one attempt, and a timeout too large to represent
    /// (`Duration::MAX`) waits until an entry arrives. The envelope is
    /// discarded (and the error returned) when it cannot be decoded.
    pub async fn dequeue(&self, timeout: Duration) -> Result<LeasedJob, QueueError> {
        let give_up = tokio::time::Instant::now().checked_add(timeout);
        loop {
            let popped = self
                .store
                .pop_push(&self.keys.pending, &self.keys.processing)
                .await
                .map_err(|e| self.store_failure("dequeue", e))?;
            if let Some(member) = popped {
                return self.lease(member).await;
            }

            let step = match give_up {
                Some(give_up) => {
                    let now = tokio::time::Instant::now();
                    if now >= give_up {
                        trace!(queue = %self.keys.name, "queue empty");
                        return Err(QueueError::QueueEmpty);
                    }
                    self.poll_step.min(give_up - now)
                }
                None => self.poll_step,
            };
            tokio::time::sleep(step).await;
        }
    }

    async fn lease(&self, member: String) -> Result<LeasedJob, QueueError> {
        let mut envelope = match self.read_record(&member).await? {
            Ok(envelope) => envelope,
            Err(source) => {
                self.discard(&member).await?;
                warn!(queue = %self.keys.name, job = %member, error = %source, "unreadable envelope discarded");
                return Err(QueueError::DecodeFailed { job: member, source });
            }
        };

        let job = match self.codec.decode(&envelope) {
            Ok(job) => job,
            Err(DecodeError::UnknownJobType(type_tag)) => {
                self.discard(&member).await?;
                warn!(queue = %self.keys.name, job = %member, %type_tag, "no job registered for type; envelope discarded");
                return Err(QueueError::UnknownJobType { job: member, type_tag });
            }
            Err(DecodeError::InvalidPayload(source)) => {
                self.discard(&member).await?;
                warn!(queue = %self.keys.name, job = %member, error = %source, "undecodable payload; envelope discarded");
                return Err(QueueError::DecodeFailed { job: member, source });
            }
        };

        let deadline = envelope.lease_deadline_from(self.clock.now());
        self.write_lease(&member, deadline).await?;
        envelope.lease_deadline = Some(deadline);

        debug!(
            queue = %self.keys.name,
            job = %member,
            type_tag = %envelope.type_tag,
            retry_count = envelope.retry_count,
            lease_deadline = %deadline,
            "dequeued"
        );
        Ok(LeasedJob { envelope, job })
    }

    /// Finish a job: it leaves processing and its records are deleted.
    /// Acknowledging an id that is not in processing does nothing.
    pub async fn acknowledge(&self, id: &JobId) -> Result<(), QueueError> {
        let member = id.to_string();
        let removed = self
            .store
            .remove(&self.keys.processing, &member)
            .await
            .map_err(|e| self.store_failure("acknowledge", e))?;
        if removed {
            self.delete_records(&member).await?;
            debug!(queue = %self.keys.name, job = %member, "acknowledged");
        } else {
            trace!(queue = %self.keys.name, job = %member, "acknowledge: not in processing");
        }
        Ok(())
    }

    // =========================================================================
    // Clock side
    // =========================================================================

    /// Put an expired lease back on the pending tail, or drop it once its
    /// `retry_count` has reached `max_retry_attempts`.
    ///
    /// Returns `true` only when the entry was requeued. An id that is no
    /// longer in processing is left alone.
    pub async fn requeue_expired(
        &self,
        id: &JobId,
        max_retry_attempts: u32,
    ) -> Result<bool, QueueError> {
        let outcome = self.requeue(&id.to_string(), max_retry_attempts).await?;
        Ok(outcome.is_requeued())
    }

    /// Like [`Queue::requeue_expired`] but tells a drop apart from a miss.
    pub async fn requeue(
        &self,
        member: &str,
        max_retry_attempts: u32,
    ) -> Result<RequeueOutcome, QueueError> {
        let mut envelope = match self.read_record(member).await? {
            Ok(envelope) => envelope,
            Err(source) => {
                let removed = self.discard(member).await?;
                if !removed {
                    return Ok(RequeueOutcome::Missing);
                }
                warn!(queue = %self.keys.name, job = %member, error = %source, "unreadable envelope dropped");
                return Ok(RequeueOutcome::Dropped);
            }
        };

        if envelope.retry_count >= max_retry_attempts {
            if !self.discard(member).await? {
                return Ok(RequeueOutcome::Missing);
            }
            warn!(
                queue = %self.keys.name,
                job = %member,
                type_tag = %envelope.type_tag,
                retry_count = envelope.retry_count,
                "retry attempts exhausted; job dropped"
            );
            return Ok(RequeueOutcome::Dropped);
        }

        envelope.retry_count += 1;
        let record = EnvelopeCodec::to_record(&envelope).map_err(QueueError::EncodingFailed)?;
        let envelope_key = self.keys.envelope(member);
        let lease_key = self.keys.lease(member);

        // リース削除も同じ 1 手。失敗時は期限切れのリースが残る
        let moved = self
            .store
            .move_member(
                &self.keys.processing,
                &self.keys.pending,
                member,
                Some(RecordWrite {
                    key: &envelope_key,
                    value: &record,
                }),
                &[lease_key.as_str()],
            )
            .await
            .map_err(|e| self.store_failure("requeue", e))?;

        if !moved {
            return Ok(RequeueOutcome::Missing);
        }
        info!(
            queue = %self.keys.name,
            job = %member,
            type_tag = %envelope.type_tag,
            retry_count = envelope.retry_count,
            "lease expired; job requeued"
        );
        Ok(RequeueOutcome::Requeued)
    }

    /// Processing entries whose lease deadline is at or before `now`.
    ///
    /// An entry without a lease (its dequeuer stopped between the move and
    /// writing the lease) gets one starting at `now` and is not reported on
    /// this call. An entry without an envelope record is reported so the
    /// requeue step can drop it.
    pub async fn expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<String>, QueueError> {
        let members = self
            .store
            .list(&self.keys.processing)
            .await
            .map_err(|e| self.store_failure("scan processing", e))?;

        let mut expired = Vec::new();
        for member in members {
            match self.read_lease(&member).await? {
                Some(deadline) => {
                    if deadline <= now {
                        expired.push(member);
                    }
                }
                None => match self.read_record(&member).await? {
                    Ok(envelope) => {
                        let deadline = envelope.lease_deadline_from(now);
                        if self.write_lease(&member, deadline).await? {
                            debug!(queue = %self.keys.name, job = %member, lease_deadline = %deadline, "stamped missing lease");
                        }
                    }
                    Err(_) => expired.push(member),
                },
            }
        }
        Ok(expired)
    }

    /// Move every delayed entry due at `now` to the pending tail, earliest
    /// first. Returns how many moved.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let promoted = self
            .store
            .zpop_due(&self.keys.delayed, now.timestamp_millis(), &self.keys.pending)
            .await
            .map_err(|e| self.store_failure("promote", e))?;
        if !promoted.is_empty() {
            debug!(queue = %self.keys.name, count = promoted.len(), "promoted delayed jobs");
        }
        Ok(promoted.len())
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub async fn pending_ids(&self) -> Result<Vec<JobId>, QueueError> {
        let members = self
            .store
            .list(&self.keys.pending)
            .await
            .map_err(|e| self.store_failure("list pending", e))?;
        Ok(parse_members(members))
    }

    /// Delayed ids, earliest activation first.
    pub async fn delayed_ids(&self) -> Result<Vec<JobId>, QueueError> {
        let entries = self
            .store
            .zlist(&self.keys.delayed)
            .await
            .map_err(|e| self.store_failure("list delayed", e))?;
        Ok(parse_members(entries.into_iter().map(|(member, _)| member)))
    }

    pub async fn processing_ids(&self) -> Result<Vec<JobId>, QueueError> {
        let members = self
            .store
            .list(&self.keys.processing)
            .await
            .map_err(|e| self.store_failure("list processing", e))?;
        Ok(parse_members(members))
    }

    /// The stored envelope, with `lease_deadline` filled in while leased.
    pub async fn envelope(&self, id: &JobId) -> Result<Option<Envelope>, QueueError> {
        let member = id.to_string();
        match self.read_record(&member).await? {
            Ok(mut envelope) => {
                envelope.lease_deadline = self.read_lease(&member).await?;
                Ok(Some(envelope))
            }
            Err(_) => Ok(None),
        }
    }

    pub async fn lease_deadline(&self, id: &JobId) -> Result<Option<DateTime<Utc>>, QueueError> {
        self.read_lease(&id.to_string()).await
    }

    /// Which structure holds `id` right now.
    pub async fn locate(&self, id: &JobId) -> Result<Option<Location>, QueueError> {
        if self.processing_ids().await?.contains(id) {
            return Ok(Some(Location::Processing));
        }
        if self.pending_ids().await?.contains(id) {
            return Ok(Some(Location::Pending));
        }
        if self.delayed_ids().await?.contains(id) {
            return Ok(Some(Location::Delayed));
        }
        Ok(None)
    }

    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let pending = self
            .store
            .list(&self.keys.pending)
            .await
            .map_err(|e| self.store_failure("count", e))?;
        let delayed = self
            .store
            .zlist(&self.keys.delayed)
            .await
            .map_err(|e| self.store_failure("count", e))?;
        let processing = self
            .store
            .list(&self.keys.processing)
            .await
            .map_err(|e| self.store_failure("count", e))?;
        Ok(QueueCounts {
            pending: pending.len(),
            delayed: delayed.len(),
            processing: processing.len(),
        })
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Outer error: the store failed. Inner error: the record is missing or
    /// unreadable.
    async fn read_record(&self, member: &str) -> Result<Result<Envelope, CodecError>, QueueError> {
        let bytes = self
            .store
            .get(&self.keys.envelope(member))
            .await
            .map_err(|e| self.store_failure("read envelope", e))?;
        Ok(match bytes {
            Some(bytes) => EnvelopeCodec::from_record(&bytes),
            None => Err(CodecError::DecodingFailed("envelope record missing".to_string())),
        })
    }

    async fn read_lease(&self, member: &str) -> Result<Option<DateTime<Utc>>, QueueError> {
        let bytes = self
            .store
            .get(&self.keys.lease(member))
            .await
            .map_err(|e| self.store_failure("read lease", e))?;
        Ok(bytes.as_deref().and_then(parse_millis))
    }

    /// Written only while `member` is in processing. Returns whether it was.
    async fn write_lease(&self, member: &str, deadline: DateTime<Utc>) -> Result<bool, QueueError> {
        let key = self.keys.lease(member);
        let value = deadline.timestamp_millis().to_string();
        self.store
            .set_if_listed(
                &self.keys.processing,
                member,
                RecordWrite {
                    key: &key,
                    value: value.as_bytes(),
                },
            )
            .await
            .map_err(|e| self.store_failure("write lease", e))
    }

    /// Remove `member` from processing; delete its records only if it was there.
    async fn discard(&self, member: &str) -> Result<bool, QueueError> {
        let removed = self
            .store
            .remove(&self.keys.processing, member)
            .await
            .map_err(|e| self.store_failure("discard", e))?;
        if removed {
            self.delete_records(member).await?;
        }
        Ok(removed)
    }

    async fn delete_records(&self, member: &str) -> Result<(), QueueError> {
        self.store
            .delete(&self.keys.envelope(member))
            .await
            .map_err(|e| self.store_failure("delete envelope", e))?;
        self.store
            .delete(&self.keys.lease(member))
            .await
            .map_err(|e| self.store_failure("delete lease", e))?;
        Ok(())
    }

    fn store_failure(&self, op: &'static str, err: crate::ports::StoreError) -> QueueError {
        error!(queue = %self.keys.name, op, error = %err, "store call failed");
        QueueError::StoreUnavailable(err)
    }
}

fn parse_members(members: impl IntoIterator<Item = String>) -> Vec<JobId> {
    members
        .into_iter()
        .filter_map(|member| match member.parse::<JobId>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(member = %member, "ignoring malformed queue member");
                None
            }
        })
        .collect()
}

fn parse_millis(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let ms: i64 = std::str::from_utf8(bytes).ok()?.trim().parse().ok()?;
    DateTime::<Utc>::from_timestamp_millis(ms)
}
