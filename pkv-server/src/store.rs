//! # In-Memory Store
//!
//! Purpose: Hold string and list values for the server simulator and provide
//! the list operations a reliable work queue relies on, including a blocking
//! pop that waits for a push.
//!
//! ## Design Principles
//! 1. **Single Lock**: One mutex guards the keyspace; every operation is a
//!    short critical section, which keeps multi-key moves atomic.
//! 2. **Wake on Push**: Pushes notify all blocked poppers, which re-check
//!    their source under the lock.
//! 3. **Redis Semantics**: Empty lists disappear; operations against a key of
//!    the wrong kind fail with `WRONGTYPE`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
}

#[derive(Debug, Clone)]
enum Entry {
    String(Bytes),
    List(VecDeque<Bytes>),
}

/// Shared keyspace.
#[derive(Debug, Default)]
pub struct Store {
    data: Mutex<HashMap<Bytes, Entry>>,
    pushed: Notify,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Bytes, Entry>> {
        self.data.lock().expect("store mutex poisoned")
    }

    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        match self.lock().get(key) {
            Some(Entry::String(value)) => Ok(Some(value.clone())),
            Some(Entry::List(_)) => Err(StoreError::WrongType),
            None => Ok(None),
        }
    }

    /// Overwrites the key whatever its previous kind.
    pub fn set(&self, key: Bytes, value: Bytes) {
        self.lock().insert(key, Entry::String(value));
    }

    /// Removes keys of any kind; returns how many existed.
    pub fn del(&self, keys: &[Bytes]) -> i64 {
        let mut data = self.lock();
        keys.iter().filter(|key| data.remove(key.as_ref()).is_some()).count() as i64
    }

    /// Prepends values one by one; the last value ends up at the head.
    pub fn lpush(&self, key: Bytes, values: &[Bytes]) -> StoreResult<i64> {
        self.push(key, values, true)
    }

    pub fn rpush(&self, key: Bytes, values: &[Bytes]) -> StoreResult<i64> {
        self.push(key, values, false)
    }

    fn push(&self, key: Bytes, values: &[Bytes], head: bool) -> StoreResult<i64> {
        let len = {
            let mut data = self.lock();
            let entry = data
                .entry(key)
                .or_insert_with(|| Entry::List(VecDeque::new()));
            let list = match entry {
                Entry::List(list) => list,
                Entry::String(_) => return Err(StoreError::WrongType),
            };
            for value in values {
                if head {
                    list.push_front(value.clone());
                } else {
                    list.push_back(value.clone());
                }
            }
            list.len() as i64
        };
        self.pushed.notify_waiters();
        Ok(len)
    }

    /// Removes up to `count` occurrences of `value`: from the head when
    /// positive, from the tail when negative, all of them when zero.
    pub fn lrem(&self, key: &[u8], count: i64, value: &[u8]) -> StoreResult<i64> {
        let mut data = self.lock();
        let list = match data.get_mut(key) {
            Some(Entry::List(list)) => list,
            Some(Entry::String(_)) => return Err(StoreError::WrongType),
            None => return Ok(0),
        };

        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
        let mut removed = 0usize;
        if count >= 0 {
            let mut idx = 0;
            while idx < list.len() && removed < limit {
                if list[idx] == value {
                    list.remove(idx);
                    removed += 1;
                } else {
                    idx += 1;
                }
            }
        } else {
            let mut idx = list.len();
            while idx > 0 && removed < limit {
                idx -= 1;
                if list[idx] == value {
                    list.remove(idx);
                    removed += 1;
                }
            }
        }

        if list.is_empty() {
            data.remove(key);
        }
        Ok(removed as i64)
    }

    pub fn llen(&self, key: &[u8]) -> StoreResult<i64> {
        match self.lock().get(key) {
            Some(Entry::List(list)) => Ok(list.len() as i64),
            Some(Entry::String(_)) => Err(StoreError::WrongType),
            None => Ok(0),
        }
    }

    /// Elements between `start` and `stop` inclusive; negative indexes count
    /// from the tail.
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> StoreResult<Vec<Bytes>> {
        let data = self.lock();
        let list = match data.get(key) {
            Some(Entry::List(list)) => list,
            Some(Entry::String(_)) => return Err(StoreError::WrongType),
            None => return Ok(Vec::new()),
        };

        let len = list.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        Ok(list
            .range(start as usize..=stop as usize)
            .cloned()
            .collect())
    }

    /// Atomically moves the tail of `source` to the head of `destination`.
    pub fn rpoplpush(&self, source: &[u8], destination: &[u8]) -> StoreResult<Option<Bytes>> {
        let value = {
            let mut data = self.lock();
            if let Some(Entry::String(_)) = data.get(destination) {
                return Err(StoreError::WrongType);
            }
            let value = match data.get_mut(source) {
                Some(Entry::List(list)) => list.pop_back(),
                Some(Entry::String(_)) => return Err(StoreError::WrongType),
                None => return Ok(None),
            };
            let value = match value {
                Some(value) => value,
                None => return Ok(None),
            };
            if let Some(Entry::List(list)) = data.get(source) {
                if list.is_empty() {
                    data.remove(source);
                }
            }

            let entry = data
                .entry(Bytes::copy_from_slice(destination))
                .or_insert_with(|| Entry::List(VecDeque::new()));
            if let Entry::List(list) = entry {
                list.push_front(value.clone());
            }
            value
        };
        self.pushed.notify_waiters();
        Ok(Some(value))
    }

    /// Blocking variant of [`Store::rpoplpush`]. `None` as timeout waits
    /// forever; returns `Ok(None)` once the timeout expires.
    pub async fn brpoplpush(
        &self,
        source: &[u8],
        destination: &[u8],
        timeout: Option<Duration>,
    ) -> StoreResult<Option<Bytes>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            // Register before checking so a push in between is not missed.
            notified.as_mut().enable();

            if let Some(value) = self.rpoplpush(source, destination)? {
                return Ok(Some(value));
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }
}
