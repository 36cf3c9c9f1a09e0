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

//! Redis-backed result cache and rate limiter sharing one key/value adapter.

pub mod backend;
pub mod rate_limiter;
pub mod result_cache;

pub use backend::{InMemoryBackend, KvBackend, RedisBackend};
pub use rate_limiter::{derive_key, RateLimitOutcome, RateLimiter, RateLimiterConfig};
pub use result_cache::{ResultCache, DEFAULT_TTL};
