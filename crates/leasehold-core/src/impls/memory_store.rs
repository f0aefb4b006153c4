//! InMemoryStore - 開発・テスト用のバッキングストア
//!
//! # 実装詳細
//! - 状態全体を 1 つの tokio Mutex で保護
//! - 各メソッドは 1 回のロック内で完結するので、それ自体がアトミック
//! - ロックを跨いで await しない
//!
//! Lists are `VecDeque`s; sorted sets are a `BTreeSet<(score, member)>` plus a
//! member -> score index, which gives the same tie-break (by member) as Redis.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::ports::{RecordWrite, Store, StoreError};

#[derive(Default)]
struct SortedSet {
    by_score: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
}

impl SortedSet {
    fn insert(&mut self, score: i64, member: &str) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.by_score.remove(&(old, member.to_string()));
        }
        self.by_score.insert((score, member.to_string()));
    }

    fn pop_until(&mut self, max_score: i64) -> Vec<String> {
        let mut due = Vec::new();
        while let Some((score, _)) = self.by_score.first() {
            if *score > max_score {
                break;
            }
            if let Some((_, member)) = self.by_score.pop_first() {
                self.scores.remove(&member);
                due.push(member);
            }
        }
        due
    }
}

#[derive(Default)]
struct State {
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, SortedSet>,
    records: HashMap<String, Vec<u8>>,
}

impl State {
    fn remove_from_list(&mut self, list: &str, member: &str) -> bool {
        let Some(entries) = self.lists.get_mut(list) else {
            return false;
        };
        match entries.iter().position(|m| m == member) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    fn push_back(&mut self, list: &str, member: String) {
        self.lists.entry(list.to_string()).or_default().push_back(member);
    }
}

/// In-process store. Every primitive holds the single lock for its whole
/// duration, which is what makes each call atomic.
pub struct InMemoryStore {
    state: Mutex<State>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) the connection: while unavailable every
    /// call fails with `StoreError::Connection`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connection("in-memory store marked unavailable".into()))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn push_back(&self, list: &str, member: &str) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.push_back(list, member.to_string());
        Ok(())
    }

    async fn pop_push(&self, src: &str, dst: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let Some(member) = state.lists.get_mut(src).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        state.push_back(dst, member.clone());
        Ok(Some(member))
    }

    async fn remove(&self, list: &str, member: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(state.remove_from_list(list, member))
    }

    async fn move_member(
        &self,
        src: &str,
        dst: &str,
        member: &str,
        record: Option<RecordWrite<'_>>,
        delete: &[&str],
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        if !state.remove_from_list(src, member) {
            return Ok(false);
        }
        if let Some(record) = record {
            state
                .records
                .insert(record.key.to_string(), record.value.to_vec());
        }
        for key in delete {
            state.records.remove(*key);
        }
        state.push_back(dst, member.to_string());
        Ok(true)
    }

    async fn list(&self, list: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .lists
            .get(list)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn zadd(&self, set: &str, score: i64, member: &str) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.sets.entry(set.to_string()).or_default().insert(score, member);
        Ok(())
    }

    async fn zpop_due(
        &self,
        set: &str,
        max_score: i64,
        dst: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let due = match state.sets.get_mut(set) {
            Some(entries) => entries.pop_until(max_score),
            None => return Ok(Vec::new()),
        };
        for member in &due {
            state.push_back(dst, member.clone());
        }
        Ok(due)
    }

    async fn zlist(&self, set: &str) -> Result<Vec<(String, i64)>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(set)
            .map(|entries| {
                entries
                    .by_score
                    .iter()
                    .map(|(score, member)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.records.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.records.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn set_if_listed(
        &self,
        list: &str,
        member: &str,
        record: RecordWrite<'_>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let listed = state
            .lists
            .get(list)
            .is_some_and(|entries| entries.iter().any(|m| m == member));
        if listed {
            state
                .records
                .insert(record.key.to_string(), record.value.to_vec());
        }
        Ok(listed)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(state.records.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn lists_are_fifo() {
        let store = InMemoryStore::new();
        store.push_back("q", "a").await.unwrap();
        store.push_back("q", "b").await.unwrap();
        store.push_back("q", "c").await.unwrap();

        assert_eq!(store.list("q").await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.pop_push("q", "p").await.unwrap(), Some("a".to_string()));
        assert_eq!(store.list("q").await.unwrap(), vec!["b", "c"]);
        assert_eq!(store.list("p").await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn pop_push_on_empty_list_is_none() {
        let store = InMemoryStore::new();
        assert_eq!(store.pop_push("missing", "p").await.unwrap(), None);
        assert!(store.list("p").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_reports_presence() {
        let store = InMemoryStore::new();
        store.push_back("q", "a").await.unwrap();
        assert!(store.remove("q", "a").await.unwrap());
        assert!(!store.remove("q", "a").await.unwrap());
    }

    #[tokio::test]
    async fn move_member_writes_nothing_when_absent() {
        let store = InMemoryStore::new();
        let moved = store
            .move_member(
                "src",
                "dst",
                "a",
                Some(RecordWrite {
                    key: "rec",
                    value: b"v",
                }),
                &[],
            )
            .await
            .unwrap();

        assert!(!moved);
        assert!(store.get("rec").await.unwrap().is_none());
        assert!(store.list("dst").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn move_member_applies_record_and_appends() {
        let store = InMemoryStore::new();
        store.push_back("dst", "z").await.unwrap();
        store.push_back("src", "a").await.unwrap();

        let moved = store
            .move_member(
                "src",
                "dst",
                "a",
                Some(RecordWrite {
                    key: "rec",
                    value: b"v",
                }),
                &[],
            )
            .await
            .unwrap();

        assert!(moved);
        assert_eq!(store.get("rec").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.list("dst").await.unwrap(), vec!["z", "a"]);
        assert!(store.list("src").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn move_member_deletes_keys_in_the_same_step() {
        let store = InMemoryStore::new();
        store.push_back("src", "a").await.unwrap();
        store.set("lease", b"1").await.unwrap();

        assert!(store.move_member("src", "dst", "a", None, &["lease"]).await.unwrap());
        assert!(store.get("lease").await.unwrap().is_none());

        store.set("lease", b"2").await.unwrap();
        assert!(!store.move_member("src", "dst", "a", None, &["lease"]).await.unwrap());
        assert_eq!(store.get("lease").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn set_if_listed_writes_only_for_members() {
        let store = InMemoryStore::new();
        store.push_back("p", "a").await.unwrap();
        let write = RecordWrite {
            key: "lease",
            value: b"1",
        };

        assert!(!store.set_if_listed("p", "b", write).await.unwrap());
        assert!(store.get("lease").await.unwrap().is_none());
        assert!(store.set_if_listed("p", "a", write).await.unwrap());
        assert_eq!(store.get("lease").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn zpop_due_moves_in_score_order() {
        let store = InMemoryStore::new();
        store.zadd("d", 30, "c").await.unwrap();
        store.zadd("d", 10, "a").await.unwrap();
        store.zadd("d", 20, "b").await.unwrap();
        store.zadd("d", 40, "later").await.unwrap();

        let moved = store.zpop_due("d", 30, "p").await.unwrap();

        assert_eq!(moved, vec!["a", "b", "c"]);
        assert_eq!(store.list("p").await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            store.zlist("d").await.unwrap(),
            vec![("later".to_string(), 40)]
        );
    }

    #[tokio::test]
    async fn zadd_updates_existing_score() {
        let store = InMemoryStore::new();
        store.zadd("d", 10, "a").await.unwrap();
        store.zadd("d", 50, "a").await.unwrap();

        assert_eq!(store.zlist("d").await.unwrap(), vec![("a".to_string(), 50)]);
        assert!(store.zpop_due("d", 10, "p").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn records_round_trip_and_delete() {
        let store = InMemoryStore::new();
        store.set("k", b"v1").await.unwrap();
        store.set("k", b"v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v2".to_vec()));
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryStore::new();
        store.set_available(false);

        assert!(matches!(
            store.push_back("q", "a").await,
            Err(StoreError::Connection(_))
        ));
        assert!(matches!(store.get("k").await, Err(StoreError::Connection(_))));

        store.set_available(true);
        assert!(store.push_back("q", "a").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pop_push_hands_out_each_member_once() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..50 {
            store.push_back("q", &i.to_string()).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(m) = store.pop_push("q", "p").await.unwrap() {
                    got.push(m);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 50);
        assert_eq!(store.list("p").await.unwrap().len(), 50);
    }
}
