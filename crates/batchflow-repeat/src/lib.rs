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

//! The repeat engine: drives a callback repeatedly under a completion
//! policy, either inline ([`RepeatTemplate`]) or fanned out across a
//! throttled worker pool ([`ConcurrentRepeatTemplate`] +
//! [`ThrottleResultQueue`]).
//!
//! Exceptions thrown by callbacks are accumulated and replayed through an
//! [`ExceptionHandler`] after the loop, never propagated mid-iteration, so
//! listeners always observe every result and no worker outcome is lost.

pub mod concurrent;
pub mod context;
pub mod exception;
pub mod listener;
pub mod policy;
pub mod result_queue;
pub mod status;
pub mod template;

pub use concurrent::{ConcurrentRepeatTemplate, DEFAULT_THROTTLE_LIMIT};
pub use context::RepeatContext;
pub use exception::{DefaultExceptionHandler, ExceptionHandler, SimpleLimitExceptionHandler};
pub use listener::RepeatListener;
pub use policy::{
    CompletionPolicy, CompositeCompletionPolicy, DefaultResultCompletionPolicy,
    SimpleCompletionPolicy,
};
pub use result_queue::{ResultHolder, ThrottleResultQueue};
pub use status::RepeatStatus;
pub use template::{RepeatCallback, RepeatTemplate};
