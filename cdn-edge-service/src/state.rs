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

//! Shared application state threaded through every handler via axum's
//! `State` extractor. Cheap to clone: every field is already an `Arc` (or,
//! for config, an `ArcSwap`-backed handle), matching the teacher's own
//! `Arc<StoreManager>`-style shared-state pattern.

use std::sync::Arc;

use cdn_edge_archive::ArchiveRegistry;
use cdn_edge_cache::{RateLimiter, ResultCache};
use cdn_edge_config::ConfigHandle;
use cdn_edge_store::{ColdStore, ObjectStore};
use cdn_edge_util::{HealthStatusIndicator, Metrics};
use cdn_edge_worker::WorkerPool;

use crate::stats::StatsService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigHandle>,
    pub hot_store: Arc<dyn ObjectStore>,
    pub cold_store: Arc<dyn ColdStore>,
    pub cache: Arc<ResultCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub worker_pool: Arc<WorkerPool>,
    pub archive: Arc<ArchiveRegistry>,
    pub metrics: Arc<Metrics>,
    pub stats: Arc<StatsService>,
    pub http_client: reqwest::Client,
}

impl AppState {
    /// Assembles the per-dependency health map served at `GET /health`.
    pub async fn health_map(&self) -> Vec<cdn_edge_util::HealthStatus> {
        let hot = self.hot_store.check_health().await;
        let cold = self.cold_store.check_health().await;
        let cache = self.cache.check_health().await;
        let rate_limiter = self.rate_limiter.check_health().await;
        vec![hot, cold, cache, rate_limiter]
    }
}
