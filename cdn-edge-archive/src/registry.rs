//! Cold-archive retrieval job registry (C9), per `spec.md` §4.9: models the
//! two-phase retrieval protocol (initiate → poll → async fan-out) with a
//! local registry of download jobs, each processed by a small dedicated
//! worker pool (size 3) to bound remote fan-out.
//!
//! The mutex-guarded map is grounded on the teacher's `Workers` registry
//! (`nativelink-scheduler/src/scheduler_state/workers.rs`): state mutation is
//! a short, synchronous critical section, and each entry's status transitions
//! are monotonic once terminal — matching `spec.md` §5's shared-resource
//! policy for the cold-retrieval registry.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use cdn_edge_error::{make_err, Code, Error, ResultExt};
use cdn_edge_store::{ColdStore, ObjectStore};
use cdn_edge_util::ObjectKey;
use cdn_edge_worker::{SubmitOutcome, WorkerPool};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Where the retrieved bytes should land once the remote job completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DownloadTarget {
    HotStore { bucket: String, path: String },
    LocalDisk { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub local_id: String,
    pub vault: String,
    pub remote_job_id: String,
    pub target: DownloadTarget,
    pub status: JobStatus,
    pub start_time: u64,
    pub end_time: Option<u64>,
    pub error: Option<String>,
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Dedicated worker-pool size bounding remote fan-out for async downloads,
/// per `spec.md` §4.9 step 3.
pub const DOWNLOAD_POOL_SIZE: usize = 3;

type JobMap = Arc<Mutex<HashMap<String, DownloadJob>>>;
type UploadArchiveMap = Arc<Mutex<HashMap<(String, String), String>>>;

/// In-process registry of cold-archive download jobs, plus the archive ids
/// handed back by upload-time archive copies (keyed by bucket/path) so a
/// later delete can find the matching Glacier archive. Lost across
/// restarts — persistence is a future item, recorded as an open-question
/// decision in `DESIGN.md`.
pub struct ArchiveRegistry {
    jobs: JobMap,
    upload_archives: UploadArchiveMap,
    download_pool: Arc<WorkerPool>,
    cold_store: Arc<dyn ColdStore>,
    hot_store: Arc<dyn ObjectStore>,
}

impl ArchiveRegistry {
    pub fn new(download_pool: Arc<WorkerPool>, cold_store: Arc<dyn ColdStore>, hot_store: Arc<dyn ObjectStore>) -> Self {
        ArchiveRegistry {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            upload_archives: Arc::new(Mutex::new(HashMap::new())),
            download_pool,
            cold_store,
            hot_store,
        }
    }

    /// Records the archive id a cold-archive upload copy was assigned, so a
    /// later `aws_delete` on the same object can find it.
    pub fn record_upload_archive(&self, bucket: &str, path: &str, archive_id: &str) {
        self.upload_archives
            .lock()
            .insert((bucket.to_string(), path.to_string()), archive_id.to_string());
    }

    /// Deletes the Glacier archive recorded for `bucket`/`path`, if any. A
    /// missing entry (no cold-archive copy was ever made for this object) is
    /// not an error — matches the best-effort style of the upload-side copy.
    pub async fn delete_upload_archive(&self, bucket: &str, path: &str) -> Result<(), Error> {
        let archive_id = self.upload_archives.lock().remove(&(bucket.to_string(), path.to_string()));
        match archive_id {
            Some(archive_id) => Pin::new(&*self.cold_store).delete_archive(bucket, &archive_id).await,
            None => Ok(()),
        }
    }

    /// Records a newly initiated retrieval (or inventory) job as `pending`.
    /// The remote job id itself was already obtained via `ColdStore::initiate_retrieval`
    /// / `initiate_inventory`; this only tracks it locally for polling.
    pub fn record_initiated(&self, vault: &str, remote_job_id: &str) -> String {
        let local_id = Uuid::new_v4().to_string();
        let job = DownloadJob {
            local_id: local_id.clone(),
            vault: vault.to_string(),
            remote_job_id: remote_job_id.to_string(),
            target: DownloadTarget::LocalDisk { path: String::new() },
            status: JobStatus::Pending,
            start_time: now_unix_seconds(),
            end_time: None,
            error: None,
        };
        self.jobs.lock().insert(local_id.clone(), job);
        local_id
    }

    /// Creates a local download job for `target` and enqueues the async
    /// fan-out task on the dedicated worker pool, returning the local job id.
    pub fn initiate_async_download(
        &self,
        vault: &str,
        remote_job_id: &str,
        target: DownloadTarget,
    ) -> Result<String, Error> {
        let local_id = Uuid::new_v4().to_string();
        let job = DownloadJob {
            local_id: local_id.clone(),
            vault: vault.to_string(),
            remote_job_id: remote_job_id.to_string(),
            target: target.clone(),
            status: JobStatus::Pending,
            start_time: now_unix_seconds(),
            end_time: None,
            error: None,
        };
        self.jobs.lock().insert(local_id.clone(), job);

        let jobs = self.jobs.clone();
        let cold_store = self.cold_store.clone();
        let hot_store = self.hot_store.clone();
        let task_local_id = local_id.clone();
        let task_vault = vault.to_string();
        let task_remote_job_id = remote_job_id.to_string();
        let (outcome, _rx) = self.download_pool.submit(move || {
            let jobs = jobs.clone();
            let cold_store = cold_store.clone();
            let hot_store = hot_store.clone();
            let local_id = task_local_id.clone();
            let vault = task_vault.clone();
            let remote_job_id = task_remote_job_id.clone();
            let target = target.clone();
            Box::pin(run_download(cold_store, hot_store, jobs, local_id, vault, remote_job_id, target))
        });
        match outcome {
            SubmitOutcome::Accepted => Ok(local_id),
            SubmitOutcome::QueueFull => Err(make_err!(Code::ResourceExhausted, "download worker pool queue is full")),
            SubmitOutcome::ShuttingDown => Err(make_err!(Code::Unavailable, "download worker pool is shutting down")),
        }
    }

    pub fn check_download_status(&self, local_id: &str) -> Result<DownloadJob, Error> {
        self.jobs
            .lock()
            .get(local_id)
            .cloned()
            .ok_or_else(|| make_err!(Code::NotFound, "no download job with id {local_id}"))
    }
}

fn set_status(jobs: &JobMap, local_id: &str, status: JobStatus, error: Option<String>) {
    if let Some(job) = jobs.lock().get_mut(local_id) {
        job.status = status;
        job.error = error;
        if matches!(status, JobStatus::Completed | JobStatus::Failed) {
            job.end_time = Some(now_unix_seconds());
        }
    }
}

async fn run_download(
    cold_store: Arc<dyn ColdStore>,
    hot_store: Arc<dyn ObjectStore>,
    jobs: JobMap,
    local_id: String,
    vault: String,
    remote_job_id: String,
    target: DownloadTarget,
) -> Result<(), Error> {
    set_status(&jobs, &local_id, JobStatus::Processing, None);

    let bytes = match Pin::new(&*cold_store).get_job_output(&vault, &remote_job_id).await {
        Ok(bytes) => bytes,
        Err(err) => {
            set_status(&jobs, &local_id, JobStatus::Failed, Some(err.messages_joined()));
            return Err(err);
        }
    };

    if let Err(err) = deliver(&hot_store, &target, bytes).await {
        set_status(&jobs, &local_id, JobStatus::Failed, Some(err.messages_joined()));
        return Err(err);
    }

    set_status(&jobs, &local_id, JobStatus::Completed, None);
    Ok(())
}

async fn deliver(hot_store: &Arc<dyn ObjectStore>, target: &DownloadTarget, bytes: Bytes) -> Result<(), Error> {
    match target {
        DownloadTarget::HotStore { bucket, path } => {
            let key = ObjectKey::new(bucket.clone(), path.clone())?;
            Pin::new(&**hot_store)
                .put_object(&key, bytes, "application/octet-stream")
                .await
                .err_tip(|| format!("writing retrieved archive to {bucket}/{path}"))?;
            Ok(())
        }
        DownloadTarget::LocalDisk { path } => {
            tokio::fs::write(path, &bytes)
                .await
                .map_err(|e| make_err!(Code::Internal, "failed to write {path}: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdn_edge_store::{CircuitBreaker, CircuitBreakerConfig, GlacierStore, GlacierStoreConfig, S3Store, S3StoreConfig};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn test_registry() -> ArchiveRegistry {
        let cold_breaker = CircuitBreaker::new("glacier-test", CircuitBreakerConfig::default());
        let cold_store: Arc<dyn ColdStore> = Arc::new(
            GlacierStore::new(
                "glacier-test",
                GlacierStoreConfig {
                    region: "us-east-1".to_string(),
                    access_key_id: "AKIA".to_string(),
                    secret_access_key: "secret".to_string(),
                    session_token: None,
                    account_id: "-".to_string(),
                    max_retries: 1,
                    retry_delay: Duration::from_millis(1),
                },
                cold_breaker,
            )
            .await,
        );
        let hot_breaker = CircuitBreaker::new("s3-test", CircuitBreakerConfig::default());
        let hot_store: Arc<dyn ObjectStore> = Arc::new(
            S3Store::new(
                "s3-test",
                S3StoreConfig {
                    endpoint: "http://localhost:9000".to_string(),
                    region: "us-east-1".to_string(),
                    access_key_id: "minioadmin".to_string(),
                    secret_access_key: "minioadmin".to_string(),
                    session_token: None,
                    use_path_style: true,
                    public_base_url: "http://localhost:9000".to_string(),
                    max_retries: 1,
                    retry_delay: Duration::from_millis(1),
                },
                hot_breaker,
            )
            .await,
        );
        let pool = WorkerPool::start(
            cdn_edge_worker::WorkerPoolConfig {
                workers: DOWNLOAD_POOL_SIZE,
                queue_size: 8,
                max_retries: 1,
                retry_delay: Duration::from_millis(1),
            },
            Arc::new(cdn_edge_util::Metrics::new()),
        );
        ArchiveRegistry::new(pool, cold_store, hot_store)
    }

    #[tokio::test]
    async fn record_initiated_starts_pending() {
        let registry = test_registry().await;
        let local_id = registry.record_initiated("my-vault", "remote-job-1");
        let job = registry.check_download_status(&local_id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.vault, "my-vault");
    }

    #[tokio::test]
    async fn check_download_status_rejects_unknown_id() {
        let registry = test_registry().await;
        assert!(registry.check_download_status("missing").is_err());
    }

    #[tokio::test]
    async fn delete_upload_archive_with_no_recorded_archive_is_a_noop() {
        let registry = test_registry().await;
        assert!(registry.delete_upload_archive("img", "path/a.bin").await.is_ok());
    }

    #[tokio::test]
    async fn record_upload_archive_is_consumed_once() {
        let registry = test_registry().await;
        registry.record_upload_archive("img", "path/a.bin", "archive-1");
        assert!(registry.upload_archives.lock().contains_key(&("img".to_string(), "path/a.bin".to_string())));
    }
}
