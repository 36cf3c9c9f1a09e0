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

//! Process lifecycle: component assembly and graceful shutdown, per
//! `spec.md` §4.11/§5.
//!
//! Startup order: object-store adapters (with circuit breakers) → result
//! cache + rate limiter (sharing one Redis-backed adapter) → worker pool →
//! cold-archive registry (with its own dedicated download pool) → HTTP
//! client. Config loading/validation and the config file-watcher, and the
//! axum server bind, are the caller's responsibility (`build_state` takes an
//! already-validated [`AppConfig`]).
//!
//! Shutdown order, exactly as `spec.md` §4.11/§5 states: C10 (stop accepting
//! connections, handled by `axum::Server::with_graceful_shutdown` before this
//! module runs) → C7 (flush partial batch — a no-op here, since batch
//! upload/delete are direct concurrent fan-out rather than a standing
//! processor, `DESIGN.md`) → C6 (cancel + drain the worker pool) → C5/C2/C1
//! (the cache, breakers, and store adapters need no explicit close; they
//! drop with their `Arc`s).

use std::sync::Arc;
use std::time::Duration;

use cdn_edge_archive::ArchiveRegistry;
use cdn_edge_cache::{KvBackend, RateLimiter, RateLimiterConfig, RedisBackend, ResultCache};
use cdn_edge_config::{AppConfig, ConfigHandle};
use cdn_edge_error::{make_err, Code, Error};
use cdn_edge_store::{
    CircuitBreaker, CircuitBreakerConfig, ColdStore, GlacierStore, GlacierStoreConfig, ObjectStore, S3Store,
    S3StoreConfig,
};
use cdn_edge_util::Metrics;
use cdn_edge_worker::{WorkerPool, WorkerPoolConfig};

use crate::state::AppState;
use crate::stats::StatsService;

/// AWS Glacier's convention for "the account tied to the supplied
/// credentials" — operators never need to supply their own account id.
const GLACIER_OWNER_ACCOUNT: &str = "-";

const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Paths the rate limiter never throttles.
const RATE_LIMIT_EXEMPT_PREFIXES: &[&str] = &["/health", "/metrics", "/ws"];

fn minio_url(config: &AppConfig) -> String {
    let scheme = if config.minio.use_ssl { "https" } else { "http" };
    format!("{scheme}://{}", config.minio.endpoint)
}

/// Assembles every long-lived component into one [`AppState`], wiring each
/// store's circuit breaker before anything calls through it.
pub async fn build_state(config: AppConfig) -> Result<AppState, Error> {
    let metrics = Arc::new(Metrics::new());
    let minio_url = minio_url(&config);

    let hot_breaker = CircuitBreaker::new("minio", CircuitBreakerConfig::default());
    let hot_store: Arc<dyn ObjectStore> = Arc::new(
        S3Store::new(
            "minio",
            S3StoreConfig {
                endpoint: minio_url.clone(),
                region: config.aws.region.clone(),
                access_key_id: config.minio.root_user.clone(),
                secret_access_key: config.minio.root_password.clone(),
                session_token: None,
                use_path_style: true,
                public_base_url: minio_url,
                max_retries: config.worker.max_retries,
                retry_delay: config.worker.retry_delay,
            },
            hot_breaker,
        )
        .await,
    );

    let cold_breaker = CircuitBreaker::new("glacier", CircuitBreakerConfig::default());
    let cold_store: Arc<dyn ColdStore> = Arc::new(
        GlacierStore::new(
            "glacier",
            GlacierStoreConfig {
                region: config.aws.region.clone(),
                access_key_id: config.aws.access_key_id.clone(),
                secret_access_key: config.aws.secret_access_key.clone(),
                session_token: config.aws.session_token.clone(),
                account_id: GLACIER_OWNER_ACCOUNT.to_string(),
                max_retries: config.worker.max_retries,
                retry_delay: config.worker.retry_delay,
            },
            cold_breaker,
        )
        .await,
    );

    // The result cache and rate limiter share one Redis-backed adapter
    // (`spec.md` §4.5: "backed by a remote key/value store accessed through a
    // storage adapter so it can also serve as the backing store for the rate
    // limiter").
    let kv_backend: Arc<dyn KvBackend> = Arc::new(RedisBackend::new(config.redis.url.clone()));
    let cache = Arc::new(ResultCache::new(kv_backend.clone(), metrics.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(
        kv_backend,
        RateLimiterConfig {
            global_limit: config.rate_limit.global_limit,
            global_window: config.rate_limit.global_window,
            upload_limit: config.rate_limit.upload_limit,
            upload_window: config.rate_limit.upload_window,
            exempt_prefixes: RATE_LIMIT_EXEMPT_PREFIXES.iter().map(|s| s.to_string()).collect(),
        },
    ));

    let worker_pool = WorkerPool::start(
        WorkerPoolConfig {
            workers: config.worker.pool_size,
            queue_size: config.worker.queue_size,
            max_retries: config.worker.max_retries,
            retry_delay: config.worker.retry_delay,
        },
        metrics.clone(),
    );

    let download_pool = WorkerPool::start(
        WorkerPoolConfig {
            workers: cdn_edge_archive::DOWNLOAD_POOL_SIZE,
            queue_size: config.worker.queue_size,
            max_retries: config.worker.max_retries,
            retry_delay: config.worker.retry_delay,
        },
        metrics.clone(),
    );
    let archive = Arc::new(ArchiveRegistry::new(download_pool, cold_store.clone(), hot_store.clone()));

    let http_client = reqwest::Client::builder()
        .timeout(HTTP_CLIENT_TIMEOUT)
        .build()
        .map_err(|e| make_err!(Code::Internal, "failed to build HTTP client: {e}"))?;

    Ok(AppState {
        config: Arc::new(ConfigHandle::new(config)),
        hot_store,
        cold_store,
        cache,
        rate_limiter,
        worker_pool,
        archive,
        metrics,
        stats: Arc::new(StatsService::new()),
        http_client,
    })
}

/// Runs the axum server until a shutdown signal arrives, then drains
/// in-flight work in the order `spec.md` §4.11/§5 specifies.
pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> Result<(), Error> {
    let app = crate::router::build(state.clone());
    tracing::info!(%addr, "cdn-edge listening");

    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| make_err!(Code::Internal, "server error: {e}"))?;

    shutdown(&state).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::warn!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight work");
}

/// C10 has already stopped accepting new connections by the time this runs
/// (`axum::Server::with_graceful_shutdown`). C7 has no standing processor to
/// flush (`DESIGN.md`). C6 gets an explicit drain; C5/C2/C1 close implicitly
/// when their `Arc`s drop at the end of `main`.
async fn shutdown(state: &AppState) -> Result<(), Error> {
    if let Err(err) = state.worker_pool.shutdown().await {
        tracing::warn!(%err, "worker pool did not drain cleanly within its deadline");
    }
    Ok(())
}
