use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use cdn_edge_error::Error;
use cdn_edge_util::{HealthStatusIndicator, ObjectKey};

/// Bytes read back from a store, with the metadata the pipeline needs to build
/// an HTTP response (`Content-Type`, and `Content-Length` via `body.len()`).
pub struct ObjectBody {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Outcome of a `put_object` call: the server-reported size and a public URL
/// synthesized from the store's configured base URL.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub size: u64,
    pub url: String,
}

/// Per-item outcome of a `delete_many` call — a batch of deletes never aborts
/// on a single missing key, so each key gets its own result.
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub key: String,
    pub success: bool,
    pub error: Option<String>,
}

/// The capability set every backing object store (hot or cold) exposes to the
/// request pipeline. All implementations route remote calls through a circuit
/// breaker; callers never see a raw transport error, only `cdn_edge_error::Error`.
#[async_trait]
pub trait ObjectStore: HealthStatusIndicator + Unpin {
    async fn bucket_exists(self: Pin<&Self>, bucket: &str) -> Result<bool, Error>;

    async fn list_buckets(self: Pin<&Self>) -> Result<Vec<String>, Error>;

    async fn create_bucket(self: Pin<&Self>, bucket: &str) -> Result<(), Error>;

    async fn remove_bucket(self: Pin<&Self>, bucket: &str) -> Result<(), Error>;

    async fn get_object(self: Pin<&Self>, key: &ObjectKey) -> Result<ObjectBody, Error>;

    async fn put_object(
        self: Pin<&Self>,
        key: &ObjectKey,
        body: Bytes,
        content_type: &str,
    ) -> Result<PutOutcome, Error>;

    async fn remove_object(self: Pin<&Self>, key: &ObjectKey) -> Result<(), Error>;

    async fn delete_many(self: Pin<&Self>, bucket: &str, keys: &[String]) -> Result<Vec<DeleteOutcome>, Error>;
}
