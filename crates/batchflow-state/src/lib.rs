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

//! Persistence boundary for the batchflow engine.
//!
//! The engine only talks to storage through the [`JobRepository`] trait. The
//! in-memory implementation here is sufficient for single-process execution
//! and for tests; it still enforces the full contract — restart eligibility,
//! optimistic-concurrency version checks, per-key serialization of
//! read-modify-write sequences — so the engine behaves the same against a
//! durable backend.

pub mod error;
pub mod in_memory;
pub mod keyed_lock;
pub mod repository;

pub use error::{RepositoryError, Result};
pub use in_memory::InMemoryJobRepository;
pub use keyed_lock::KeyedLock;
pub use repository::JobRepository;
