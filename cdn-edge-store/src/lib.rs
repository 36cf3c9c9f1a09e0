// Copyright 2024 The CDN Edge Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Object-store adapters (hot S3-compatible + cold Glacier) and the circuit
//! breaker + retry machinery every remote call in this workspace goes through.

pub mod circuit_breaker;
pub mod glacier_store;
pub mod object_store;
pub mod retry;
pub mod s3_store;

pub use circuit_breaker::{Admission, BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use glacier_store::{ColdStore, GlacierStore, GlacierStoreConfig, JobDescription, RetrievalTier};
pub use object_store::{DeleteOutcome, ObjectBody, ObjectStore, PutOutcome};
pub use retry::{ExponentialBackoff, RetryResult, Retrier};
pub use s3_store::{S3Store, S3StoreConfig};
