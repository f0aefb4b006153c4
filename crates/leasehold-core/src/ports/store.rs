//! Store port - the backing atomic store (Redis or in-memory).
//!
//! Every method is one atomic step against the store. The queue engine
//! expresses each structural move (pending -> processing, processing ->
//! pending, delayed -> pending) as exactly one of these calls, so a crash
//! between two calls can never leave an envelope in two structures or in
//! the middle of a move.
//!
//! Lists are FIFO (push to tail, pop from head). Sorted sets order by score,
//! ties broken by member.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The store was reached but rejected the command.
    #[error("command failed: {0}")]
    Command(String),
}

/// A record write applied together with a move or a membership check.
#[derive(Debug, Clone, Copy)]
pub struct RecordWrite<'a> {
    pub key: &'a str,
    pub value: &'a [u8],
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Append `member` to the tail of `list`.
    async fn push_back(&self, list: &str, member: &str) -> Result<(), StoreError>;

    /// Pop the head of `src` and append it to the tail of `dst`.
    async fn pop_push(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError>;

    /// Remove one occurrence of `member` from `list`. Returns whether it was present.
    async fn remove(&self, list: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove `member` from `src` and, only if it was present, apply `record`,
    /// delete every key in `delete` and append `member` to the tail of `dst`.
    ///
    /// Nothing is written when `member` is absent from `src`.
    async fn move_member(
        &self,
        src: &str,
        dst: &str,
        member: &str,
        record: Option<RecordWrite<'_>>,
        delete: &[&str],
    ) -> Result<bool, StoreError>;

    /// Snapshot of `list`, head first.
    async fn list(&self, list: &str) -> Result<Vec<String>, StoreError>;

    /// Insert `member` into `set` with `score` (updates the score if present).
    async fn zadd(&self, set: &str, score: i64, member: &str) -> Result<(), StoreError>;

    /// Remove every member of `set` with score <= `max_score` and append them,
    /// ascending by score, to the tail of `dst`. Returns the moved members.
    async fn zpop_due(
        &self,
        set: &str,
        max_score: i64,
        dst: &str,
    ) -> Result<Vec<String>, StoreError>;

    /// Snapshot of `set`, lowest score first.
    async fn zlist(&self, set: &str) -> Result<Vec<(String, i64)>, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Write `record` only while `member` is in `list`. Returns whether it was written.
    async fn set_if_listed(
        &self,
        list: &str,
        member: &str,
        record: RecordWrite<'_>,
    ) -> Result<bool, StoreError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}
