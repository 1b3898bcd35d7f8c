// Copyright 2025 DataStax Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use error_stack::report;
use tokio::sync::Semaphore;

use crate::error::{RepositoryError, Result};

#[derive(Debug)]
struct LockEntry {
    semaphore: Arc<Semaphore>,
    /// Holders plus waiters. The entry is removed when this reaches zero.
    waiters: usize,
}

/// Reference-counted per-key mutual exclusion.
///
/// Serializes read-modify-write sequences against the same logical record
/// (e.g. one step-execution row) without serializing unrelated keys. The
/// entry for a key is created on first [`lock`](KeyedLock::lock) and removed
/// once the last holder or waiter has [`unlock`](KeyedLock::unlock)ed, so
/// the map does not grow with the number of keys ever seen.
#[derive(Debug, Default)]
pub struct KeyedLock {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, LockEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquire the lock for `key`, waiting if another task holds it.
    pub async fn lock(&self, key: &str) -> Result<()> {
        let semaphore = {
            let mut entries = self.entries();
            let entry = entries.entry(key.to_string()).or_insert_with(|| LockEntry {
                semaphore: Arc::new(Semaphore::new(1)),
                waiters: 0,
            });
            entry.waiters += 1;
            entry.semaphore.clone()
        };
        let acquired = semaphore.acquire().await;
        match acquired {
            Ok(permit) => {
                permit.forget();
                Ok(())
            }
            Err(_) => Err(report!(RepositoryError::Internal)
                .attach_printable(format!("lock entry for key '{key}' was closed"))),
        }
    }

    /// Release the lock for `key`. Unlocking a key that is not locked is a
    /// programming error and fails loudly.
    pub fn unlock(&self, key: &str) -> Result<()> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| report!(RepositoryError::LockNotHeld { key: key.to_string() }))?;
        entry.waiters -= 1;
        if entry.waiters == 0 {
            entries.remove(key);
        } else {
            entry.semaphore.add_permits(1);
        }
        Ok(())
    }

    /// Number of keys currently locked or waited on.
    pub fn held_keys(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_unlock_without_lock_is_an_error() {
        let lock = KeyedLock::new();
        let err = lock.unlock("step-1").unwrap_err();
        assert!(matches!(
            err.current_context(),
            RepositoryError::LockNotHeld { .. }
        ));
    }

    #[tokio::test]
    async fn test_entry_is_removed_when_released() {
        let lock = KeyedLock::new();
        lock.lock("step-1").await.unwrap();
        assert_eq!(lock.held_keys(), 1);
        lock.unlock("step-1").unwrap();
        assert_eq!(lock.held_keys(), 0);
        // Unlocking again is an error, not a no-op.
        assert!(lock.unlock("step-1").is_err());
    }

    #[tokio::test]
    async fn test_unrelated_keys_do_not_contend() {
        let lock = KeyedLock::new();
        lock.lock("a").await.unwrap();
        timeout(Duration::from_millis(50), lock.lock("b"))
            .await
            .expect("unrelated key must not block")
            .unwrap();
        lock.unlock("a").unwrap();
        lock.unlock("b").unwrap();
    }

    #[tokio::test]
    async fn test_same_key_serializes() {
        let lock = Arc::new(KeyedLock::new());
        let in_section = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let in_section = in_section.clone();
            handles.push(tokio::spawn(async move {
                lock.lock("step-1").await.unwrap();
                assert_eq!(in_section.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                in_section.fetch_sub(1, Ordering::SeqCst);
                lock.unlock("step-1").unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(lock.held_keys(), 0);
    }
}
