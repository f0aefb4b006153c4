//! Pool - 接続ハンドルの有限プール
//!
//! - Semaphore で同時利用数を制限（permit 数 == 空きハンドル数）
//! - acquire() はガードを返し、Drop でハンドルを返却する（エラー経路でも必ず返る）
//! - サイズ 1 のプールはストア呼び出しの直列化と同じ

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("pool must hold at least one handle")]
    Empty,

    #[error("pool closed")]
    Closed,
}

pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    permits: Semaphore,
}

impl<T> Pool<T> {
    pub fn new(handles: Vec<T>) -> Result<Self, PoolError> {
        if handles.is_empty() {
            return Err(PoolError::Empty);
        }
        let size = handles.len();
        Ok(Self {
            idle: Mutex::new(handles),
            permits: Semaphore::new(size),
        })
    }

    /// Handles not currently checked out.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free handle.
    pub async fn acquire(&self) -> Result<Pooled<'_, T>, PoolError> {
        let permit = self.permits.acquire().await.map_err(|_| PoolError::Closed)?;
        let handle = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or(PoolError::Closed)?;
        Ok(Pooled {
            pool: self,
            handle: Some(handle),
            _permit: permit,
        })
    }
}

/// A checked-out handle. Returned to the pool on drop.
pub struct Pooled<'a, T> {
    pool: &'a Pool<T>,
    handle: Option<T>,
    // drop 順: handle を戻してから permit を解放する
    _permit: SemaphorePermit<'a>,
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // handle は Drop まで常に Some
        self.handle.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.handle.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }
    }
}
