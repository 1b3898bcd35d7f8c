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

//! Bounded hand-off queue between a repeat driver and its worker tasks.
//!
//! Protocol: the driver calls [`expect`](ThrottleResultQueue::expect) before
//! submitting each unit of work and [`take`](ThrottleResultQueue::take) to
//! collect each outcome; workers call [`put`](ThrottleResultQueue::put)
//! exactly once per expected unit. `expect` applies backpressure: it blocks
//! while the number of in-flight units (expected and not yet `put`) equals
//! the throttle limit. The expectation count (expected and not yet taken)
//! only changes under the queue's own lock and must be zero, with the queue
//! empty, at the end of a batch.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use batchflow_core::{BatchError, Result};
use error_stack::report;
use tokio::sync::{Notify, Semaphore};

use crate::context::RepeatContext;
use crate::status::RepeatStatus;

/// Outcome of one unit of work. A worker's error is carried here as data
/// and re-raised on the driver only after being drained — never thrown on
/// the worker task.
#[derive(Debug)]
pub struct ResultHolder {
    pub context: Arc<RepeatContext>,
    pub result: Result<RepeatStatus>,
}

impl ResultHolder {
    fn is_continuable(&self) -> bool {
        matches!(self.result, Ok(RepeatStatus::Continuable))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    holders: VecDeque<ResultHolder>,
    expected: usize,
}

/// Expectation-counted result queue with a throttle limit.
#[derive(Debug)]
pub struct ThrottleResultQueue {
    /// Permits for in-flight work; acquired by `expect`, released by `put`.
    in_flight: Semaphore,
    state: Mutex<QueueState>,
    available: Notify,
}

impl ThrottleResultQueue {
    pub fn new(throttle_limit: usize) -> Self {
        Self {
            in_flight: Semaphore::new(throttle_limit),
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Declare that one unit of work is about to be submitted. Blocks while
    /// the throttle limit of in-flight units is reached.
    pub async fn expect(&self) -> Result<()> {
        let permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| report!(BatchError::ResultQueueProtocol("queue closed during expect")))?;
        permit.forget();
        self.lock().expected += 1;
        Ok(())
    }

    /// Deposit a completed unit's outcome. Continuable results are inserted
    /// ahead of finished/errored ones (stable within each class) so the
    /// driver can keep iterating as soon as any worker reports more work.
    pub fn put(&self, holder: ResultHolder) -> Result<()> {
        {
            let mut state = self.lock();
            if state.expected == 0 {
                return Err(report!(BatchError::ResultQueueProtocol(
                    "put without a matching expect"
                )));
            }
            if holder.is_continuable() {
                let insert_at = state
                    .holders
                    .iter()
                    .position(|h| !h.is_continuable())
                    .unwrap_or(state.holders.len());
                state.holders.insert(insert_at, holder);
            } else {
                state.holders.push_back(holder);
            }
        }
        // The unit is no longer in flight; let another submission through.
        self.in_flight.add_permits(1);
        self.available.notify_one();
        Ok(())
    }

    /// Collect one outcome, blocking until a worker has deposited one.
    pub async fn take(&self) -> Result<ResultHolder> {
        loop {
            {
                let mut state = self.lock();
                if state.expected == 0 {
                    return Err(report!(BatchError::ResultQueueProtocol(
                        "take while not expecting any results"
                    )));
                }
                if let Some(holder) = state.holders.pop_front() {
                    state.expected -= 1;
                    return Ok(holder);
                }
            }
            // notify_one stores a permit if nobody is waiting yet, so a put
            // racing between the check above and this await is not lost.
            self.available.notified().await;
        }
    }

    /// True while there are submitted-but-not-collected units.
    pub fn is_expecting(&self) -> bool {
        self.lock().expected > 0
    }

    pub fn is_empty(&self) -> bool {
        self.lock().holders.is_empty()
    }

    /// End-of-batch post-condition: nothing expected, nothing queued.
    pub fn verify_drained(&self) -> Result<()> {
        let state = self.lock();
        if state.expected != 0 || !state.holders.is_empty() {
            return Err(report!(BatchError::ResultQueueProtocol(
                "result queue not empty at end of batch"
            )));
        }
        Ok(())
    }
}
