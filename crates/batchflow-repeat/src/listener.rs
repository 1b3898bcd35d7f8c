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

use batchflow_core::BatchError;
use error_stack::Report;

use crate::context::RepeatContext;
use crate::status::RepeatStatus;

/// Observer for repeat loop lifecycle events. All methods default to no-ops.
///
/// `open` and `before` run on the driving task (a `before` listener may veto
/// further iterations by marking the context complete); `after` and
/// `on_error` run on the driving task as results are collected, which for
/// the concurrent template is when a result is taken from the queue, not
/// when the worker finishes. `close` runs once per batch, in reverse
/// registration order, even when the batch fails.
pub trait RepeatListener: Send + Sync {
    fn open(&self, _context: &RepeatContext) {}

    fn before(&self, _context: &RepeatContext) {}

    fn after(&self, _context: &RepeatContext, _result: &RepeatStatus) {}

    fn on_error(&self, _context: &RepeatContext, _error: &Report<BatchError>) {}

    fn close(&self, _context: &RepeatContext) {}
}
