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

//! Skip and retry classification for chunk processing.
//!
//! Classification is a closed predicate over [`BatchError`] variants, not
//! runtime type inspection: a policy is configured with a plain `Fn` that
//! says which errors it covers.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use batchflow_core::{BatchError, Result};
use error_stack::{report, Report};

/// Decides whether a classified item failure may be skipped.
pub trait SkipPolicy: Send + Sync {
    /// `skip_count` is the step's running total of skips. Returns
    /// `Ok(true)` to skip, `Ok(false)` for errors the policy does not
    /// cover, and `Err(SkipLimitExceeded)` once the limit is consumed.
    fn should_skip(&self, error: &Report<BatchError>, skip_count: u64) -> Result<bool>;
}

/// Skips errors matching a predicate until the configured limit is reached;
/// the failure that crosses the limit escalates the step.
pub struct LimitCheckingSkipPolicy {
    skip_limit: u64,
    skippable: Box<dyn Fn(&BatchError) -> bool + Send + Sync>,
}

impl LimitCheckingSkipPolicy {
    pub fn new(
        skip_limit: u64,
        skippable: impl Fn(&BatchError) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            skip_limit,
            skippable: Box::new(skippable),
        }
    }
}

impl SkipPolicy for LimitCheckingSkipPolicy {
    fn should_skip(&self, error: &Report<BatchError>, skip_count: u64) -> Result<bool> {
        if !(self.skippable)(error.current_context()) {
            return Ok(false);
        }
        if skip_count < self.skip_limit {
            Ok(true)
        } else {
            Err(report!(BatchError::SkipLimitExceeded {
                limit: self.skip_limit as usize,
            }))
        }
    }
}

/// Bounded retry for item failures.
pub struct SimpleRetryPolicy {
    max_attempts: usize,
    retryable: Box<dyn Fn(&BatchError) -> bool + Send + Sync>,
}

impl SimpleRetryPolicy {
    pub fn new(
        max_attempts: usize,
        retryable: impl Fn(&BatchError) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_attempts,
            retryable: Box::new(retryable),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn can_retry(&self, error: &Report<BatchError>) -> bool {
        (self.retryable)(error.current_context())
    }
}

/// Identity-keyed attempt counts for failing items, with a hard capacity.
///
/// The capacity guards against unbounded growth when item identity is
/// broken (e.g. an item that hashes differently on every read): exceeding
/// it is an error, not an eviction.
pub struct RetryContextCache<K> {
    capacity: usize,
    attempts: Mutex<HashMap<K, usize>>,
}

impl<K: Eq + Hash + Clone> RetryContextCache<K> {
    pub const DEFAULT_CAPACITY: usize = 4096;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn attempts(&self) -> std::sync::MutexGuard<'_, HashMap<K, usize>> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a failure for `key` and return the total attempt count.
    pub fn register_failure(&self, key: &K) -> Result<usize> {
        let mut attempts = self.attempts();
        if !attempts.contains_key(key) && attempts.len() >= self.capacity {
            return Err(report!(BatchError::RetryCacheOverflow {
                capacity: self.capacity,
            }));
        }
        let count = attempts.entry(key.clone()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    /// Forget a key after success or exhaustion.
    pub fn remove(&self, key: &K) {
        self.attempts().remove(key);
    }

    pub fn len(&self) -> usize {
        self.attempts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_error() -> Report<BatchError> {
        report!(BatchError::Item("bad record".into()))
    }

    #[test]
    fn test_skip_policy_respects_limit() {
        let policy = LimitCheckingSkipPolicy::new(2, |e| matches!(e, BatchError::Item(_)));
        assert!(policy.should_skip(&item_error(), 0).unwrap());
        assert!(policy.should_skip(&item_error(), 1).unwrap());
        let err = policy.should_skip(&item_error(), 2).unwrap_err();
        assert!(matches!(
            err.current_context(),
            BatchError::SkipLimitExceeded { limit: 2 }
        ));
    }

    #[test]
    fn test_skip_policy_ignores_unclassified_errors() {
        let policy = LimitCheckingSkipPolicy::new(2, |e| matches!(e, BatchError::Item(_)));
        let fatal = report!(BatchError::Tasklet("fatal".into()));
        assert!(!policy.should_skip(&fatal, 0).unwrap());
    }

    #[test]
    fn test_retry_cache_counts_per_key() {
        let cache: RetryContextCache<String> = RetryContextCache::new(8);
        assert_eq!(cache.register_failure(&"a".to_string()).unwrap(), 1);
        assert_eq!(cache.register_failure(&"a".to_string()).unwrap(), 2);
        assert_eq!(cache.register_failure(&"b".to_string()).unwrap(), 1);
        cache.remove(&"a".to_string());
        assert_eq!(cache.register_failure(&"a".to_string()).unwrap(), 1);
    }

    #[test]
    fn test_retry_cache_capacity_is_a_hard_limit() {
        let cache: RetryContextCache<u32> = RetryContextCache::new(2);
        cache.register_failure(&1).unwrap();
        cache.register_failure(&2).unwrap();
        // Existing keys keep counting
        cache.register_failure(&1).unwrap();
        let err = cache.register_failure(&3).unwrap_err();
        assert!(matches!(
            err.current_context(),
            BatchError::RetryCacheOverflow { capacity: 2 }
        ));
    }
}
