//! Content-addressed result cache (C5): a TTL map from resize fingerprint to
//! transformed bytes, per `spec.md` §4.5. Consistency is deliberately weak —
//! never consulted on the write path, never invalidated synchronously on
//! overwrite — matching the spec's note that this is fine given
//! content-addressed object naming on upload.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cdn_edge_error::{Error, ResultExt};
use cdn_edge_util::{HealthStatus, HealthStatusIndicator, Metrics};

use crate::backend::KvBackend;

/// Matches the original project's `SetResizedImage` TTL (`service/cache.go`).
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct ResultCache {
    backend: Arc<dyn KvBackend>,
    metrics: Arc<Metrics>,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn KvBackend>, metrics: Arc<Metrics>) -> Self {
        ResultCache { backend, metrics }
    }

    #[tracing::instrument(skip(self), fields(fingerprint))]
    pub async fn get(&self, fingerprint: &str) -> Result<Option<Bytes>, Error> {
        let found = self
            .backend
            .get(fingerprint)
            .await
            .err_tip(|| format!("result cache get {fingerprint}"))?;
        match found {
            Some(bytes) => {
                self.metrics.cache_hits_total.inc();
                Ok(Some(Bytes::from(bytes)))
            }
            None => {
                self.metrics.cache_misses_total.inc();
                Ok(None)
            }
        }
    }

    pub async fn set(&self, fingerprint: &str, bytes: Bytes, ttl: Duration) -> Result<(), Error> {
        self.backend
            .set(fingerprint, bytes.to_vec(), ttl)
            .await
            .err_tip(|| format!("result cache set {fingerprint}"))
    }

    pub async fn delete(&self, fingerprint: &str) -> Result<(), Error> {
        self.backend
            .delete(fingerprint)
            .await
            .err_tip(|| format!("result cache delete {fingerprint}"))
    }

    /// Administrative-only: drops every cached entry.
    pub async fn flush_all(&self) -> Result<(), Error> {
        self.backend.flush_all().await.err_tip(|| "result cache flush-all")
    }
}

#[async_trait::async_trait]
impl HealthStatusIndicator for ResultCache {
    fn component_name(&self) -> &str {
        "result-cache"
    }

    async fn check_health(&self) -> HealthStatus {
        match self.backend.get("__health_check__").await {
            Ok(_) => HealthStatus::ok("result-cache"),
            Err(err) => HealthStatus::unhealthy("result-cache", err.messages_joined()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use pretty_assertions::assert_eq;

    fn cache() -> ResultCache {
        ResultCache::new(Arc::new(InMemoryBackend::new()), Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn miss_then_hit_after_set() {
        let cache = cache();
        assert_eq!(cache.get("resize:img:a.jpg:100:100").await.unwrap(), None);
        cache
            .set("resize:img:a.jpg:100:100", Bytes::from_static(b"bytes"), DEFAULT_TTL)
            .await
            .unwrap();
        assert_eq!(
            cache.get("resize:img:a.jpg:100:100").await.unwrap(),
            Some(Bytes::from_static(b"bytes"))
        );
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = cache();
        cache
            .set("k", Bytes::from_static(b"v"), DEFAULT_TTL)
            .await
            .unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn flush_all_clears_every_entry() {
        let cache = cache();
        cache.set("a", Bytes::from_static(b"1"), DEFAULT_TTL).await.unwrap();
        cache.set("b", Bytes::from_static(b"2"), DEFAULT_TTL).await.unwrap();
        cache.flush_all().await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.get("b").await.unwrap(), None);
    }
}
