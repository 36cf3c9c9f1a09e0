//! Cold-archive adapter over AWS Glacier, exposing the two-phase retrieval
//! capability set named in `spec.md` §4.1: vault listing, archive upload, and
//! the initiate/describe/fetch retrieval-job triad that `cdn-edge-archive`
//! drives from its job registry.
//!
//! Grounded on the same retry-wrapped-call shape as `s3_store.rs`; the cold
//! store gets its own `CircuitBreaker` instance since it is a distinct remote
//! dependency with its own failure domain.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_glacier::config::Credentials;
use aws_sdk_glacier::primitives::ByteStream;
use aws_sdk_glacier::types::JobParameters;
use aws_sdk_glacier::Client;
use bytes::Bytes;
use cdn_edge_error::{make_err, Code, Error};
use cdn_edge_util::{HealthStatus, HealthStatusIndicator};

use crate::circuit_breaker::CircuitBreaker;
use crate::retry::{ExponentialBackoff, RetryResult, Retrier};

/// Retrieval speed tier, per `spec.md` §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalTier {
    Expedited,
    Standard,
    Bulk,
}

impl RetrievalTier {
    fn as_str(self) -> &'static str {
        match self {
            RetrievalTier::Expedited => "Expedited",
            RetrievalTier::Standard => "Standard",
            RetrievalTier::Bulk => "Bulk",
        }
    }
}

/// A job as reported back by `describe-job`/`list-jobs`.
#[derive(Debug, Clone)]
pub struct JobDescription {
    pub job_id: String,
    pub action: String,
    pub completed: bool,
    pub status_code: String,
    pub status_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GlacierStoreConfig {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub account_id: String,
    pub max_retries: usize,
    pub retry_delay: Duration,
}

/// The capability set the cold store exposes beyond the common `ObjectStore`
/// surface: vault/archive/job operations with no hot-store analogue.
#[async_trait]
pub trait ColdStore: HealthStatusIndicator + Unpin {
    async fn vault_list(self: Pin<&Self>) -> Result<Vec<String>, Error>;

    async fn upload_archive(self: Pin<&Self>, vault: &str, body: Bytes) -> Result<String, Error>;

    async fn initiate_retrieval(
        self: Pin<&Self>,
        vault: &str,
        archive_id: &str,
        tier: RetrievalTier,
    ) -> Result<String, Error>;

    async fn describe_job(self: Pin<&Self>, vault: &str, job_id: &str) -> Result<JobDescription, Error>;

    async fn get_job_output(self: Pin<&Self>, vault: &str, job_id: &str) -> Result<Bytes, Error>;

    async fn list_jobs(self: Pin<&Self>, vault: &str) -> Result<Vec<JobDescription>, Error>;

    async fn initiate_inventory(self: Pin<&Self>, vault: &str) -> Result<String, Error>;

    async fn delete_archive(self: Pin<&Self>, vault: &str, archive_id: &str) -> Result<(), Error>;
}

pub struct GlacierStore {
    name: String,
    client: Client,
    config: GlacierStoreConfig,
    breaker: Arc<CircuitBreaker>,
    retrier: Retrier,
}

impl GlacierStore {
    pub async fn new(name: impl Into<String>, config: GlacierStoreConfig, breaker: Arc<CircuitBreaker>) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            config.session_token.clone(),
            None,
            "cdn-edge",
        );
        let sdk_config = aws_config::from_env()
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;
        GlacierStore {
            name: name.into(),
            client: Client::new(&sdk_config),
            config,
            breaker,
            retrier: Retrier::new(Box::new(|duration| Box::pin(tokio::time::sleep(duration)))),
        }
    }

    fn retry_schedule(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::new(self.config.retry_delay).take(self.config.max_retries)
    }
}

fn classify<E: std::fmt::Display>(context: &str, err: E) -> RetryResult<()> {
    RetryResult::Retry(make_err!(Code::Unavailable, "{context}: {err}"))
}

#[async_trait]
impl ColdStore for GlacierStore {
    async fn vault_list(self: Pin<&Self>) -> Result<Vec<String>, Error> {
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || async {
                        match self.client.list_vaults().account_id(&self.config.account_id).send().await {
                            Ok(output) => RetryResult::Ok(
                                output
                                    .vault_list()
                                    .iter()
                                    .filter_map(|v| v.vault_name().map(str::to_string))
                                    .collect(),
                            ),
                            Err(err) => classify("list_vaults", err),
                        }
                    })
                    .await
            })
            .await
    }

    async fn upload_archive(self: Pin<&Self>, vault: &str, body: Bytes) -> Result<String, Error> {
        let vault = vault.to_string();
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || {
                        let body = body.clone();
                        async move {
                            let result = self
                                .client
                                .upload_archive()
                                .account_id(&self.config.account_id)
                                .vault_name(&vault)
                                .body(ByteStream::from(body))
                                .send()
                                .await;
                            match result {
                                Ok(output) => match output.archive_id() {
                                    Some(id) => RetryResult::Ok(id.to_string()),
                                    None => RetryResult::Err(make_err!(
                                        Code::Internal,
                                        "upload_archive returned no archive id"
                                    )),
                                },
                                Err(err) => classify("upload_archive", err),
                            }
                        }
                    })
                    .await
            })
            .await
    }

    async fn initiate_retrieval(
        self: Pin<&Self>,
        vault: &str,
        archive_id: &str,
        tier: RetrievalTier,
    ) -> Result<String, Error> {
        let vault = vault.to_string();
        let archive_id = archive_id.to_string();
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || {
                        let vault = vault.clone();
                        let archive_id = archive_id.clone();
                        async move {
                            let params = JobParameters::builder()
                                .r#type("archive-retrieval")
                                .archive_id(&archive_id)
                                .tier(tier.as_str())
                                .build();
                            let result = self
                                .client
                                .initiate_job()
                                .account_id(&self.config.account_id)
                                .vault_name(&vault)
                                .job_parameters(params)
                                .send()
                                .await;
                            match result {
                                Ok(output) => match output.job_id() {
                                    Some(id) => RetryResult::Ok(id.to_string()),
                                    None => RetryResult::Err(make_err!(
                                        Code::Internal,
                                        "initiate_job returned no job id"
                                    )),
                                },
                                Err(err) => classify("initiate_job(archive-retrieval)", err),
                            }
                        }
                    })
                    .await
            })
            .await
    }

    async fn describe_job(self: Pin<&Self>, vault: &str, job_id: &str) -> Result<JobDescription, Error> {
        let vault = vault.to_string();
        let job_id = job_id.to_string();
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || async {
                        match self
                            .client
                            .describe_job()
                            .account_id(&self.config.account_id)
                            .vault_name(&vault)
                            .job_id(&job_id)
                            .send()
                            .await
                        {
                            Ok(output) => RetryResult::Ok(JobDescription {
                                job_id: output.job_id().unwrap_or_default().to_string(),
                                action: output.action().map(|a| a.as_str().to_string()).unwrap_or_default(),
                                completed: output.completed(),
                                status_code: output.status_code().map(|s| s.as_str().to_string()).unwrap_or_default(),
                                status_message: output.status_message().map(str::to_string),
                            }),
                            Err(err) => classify("describe_job", err),
                        }
                    })
                    .await
            })
            .await
    }

    async fn get_job_output(self: Pin<&Self>, vault: &str, job_id: &str) -> Result<Bytes, Error> {
        let vault = vault.to_string();
        let job_id = job_id.to_string();
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || async {
                        match self
                            .client
                            .get_job_output()
                            .account_id(&self.config.account_id)
                            .vault_name(&vault)
                            .job_id(&job_id)
                            .send()
                            .await
                        {
                            Ok(output) => match output.body.collect().await {
                                Ok(data) => RetryResult::Ok(data.into_bytes()),
                                Err(err) => classify("get_job_output body", err),
                            },
                            Err(err) => classify("get_job_output", err),
                        }
                    })
                    .await
            })
            .await
    }

    async fn list_jobs(self: Pin<&Self>, vault: &str) -> Result<Vec<JobDescription>, Error> {
        let vault = vault.to_string();
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || async {
                        match self
                            .client
                            .list_jobs()
                            .account_id(&self.config.account_id)
                            .vault_name(&vault)
                            .send()
                            .await
                        {
                            Ok(output) => RetryResult::Ok(
                                output
                                    .job_list()
                                    .iter()
                                    .map(|j| JobDescription {
                                        job_id: j.job_id().unwrap_or_default().to_string(),
                                        action: j.action().map(|a| a.as_str().to_string()).unwrap_or_default(),
                                        completed: j.completed(),
                                        status_code: j.status_code().map(|s| s.as_str().to_string()).unwrap_or_default(),
                                        status_message: j.status_message().map(str::to_string),
                                    })
                                    .collect(),
                            ),
                            Err(err) => classify("list_jobs", err),
                        }
                    })
                    .await
            })
            .await
    }

    async fn initiate_inventory(self: Pin<&Self>, vault: &str) -> Result<String, Error> {
        let vault = vault.to_string();
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || {
                        let vault = vault.clone();
                        async move {
                            let params = JobParameters::builder().r#type("inventory-retrieval").build();
                            let result = self
                                .client
                                .initiate_job()
                                .account_id(&self.config.account_id)
                                .vault_name(&vault)
                                .job_parameters(params)
                                .send()
                                .await;
                            match result {
                                Ok(output) => match output.job_id() {
                                    Some(id) => RetryResult::Ok(id.to_string()),
                                    None => RetryResult::Err(make_err!(
                                        Code::Internal,
                                        "initiate_job returned no job id"
                                    )),
                                },
                                Err(err) => classify("initiate_job(inventory-retrieval)", err),
                            }
                        }
                    })
                    .await
            })
            .await
    }

    async fn delete_archive(self: Pin<&Self>, vault: &str, archive_id: &str) -> Result<(), Error> {
        let vault = vault.to_string();
        let archive_id = archive_id.to_string();
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || {
                        let vault = vault.clone();
                        let archive_id = archive_id.clone();
                        async move {
                            let result = self
                                .client
                                .delete_archive()
                                .account_id(&self.config.account_id)
                                .vault_name(&vault)
                                .archive_id(&archive_id)
                                .send()
                                .await;
                            match result {
                                Ok(_) => RetryResult::Ok(()),
                                Err(err) => classify("delete_archive", err),
                            }
                        }
                    })
                    .await
            })
            .await
    }
}

#[async_trait]
impl HealthStatusIndicator for GlacierStore {
    fn component_name(&self) -> &str {
        &self.name
    }

    async fn check_health(&self) -> HealthStatus {
        let this = Pin::new(self);
        match this.vault_list().await {
            Ok(_) => HealthStatus::ok(&self.name),
            Err(err) => HealthStatus::unhealthy(&self.name, err.messages_joined()),
        }
    }
}
