//! Hot-store adapter backed by an S3-compatible endpoint (AWS S3 or MinIO).
//!
//! Every remote call is wrapped in the circuit breaker and retried with
//! exponential backoff, following the same shape as the teacher's `S3Store`
//! (`cas/store/s3_store.rs`): classify the error once, decide whether it is
//! retryable, and only then hand it to the retrier.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use cdn_edge_error::{make_err, Code, Error, ResultExt};
use cdn_edge_util::{HealthStatus, HealthStatusIndicator, ObjectKey};

use crate::circuit_breaker::CircuitBreaker;
use crate::object_store::{DeleteOutcome, ObjectBody, ObjectStore, PutOutcome};
use crate::retry::{ExponentialBackoff, RetryResult, Retrier};

#[derive(Debug, Clone)]
pub struct S3StoreConfig {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub use_path_style: bool,
    pub public_base_url: String,
    pub max_retries: usize,
    pub retry_delay: Duration,
}

pub struct S3Store {
    name: String,
    client: Client,
    config: S3StoreConfig,
    breaker: Arc<CircuitBreaker>,
    retrier: Retrier,
}

impl S3Store {
    pub async fn new(name: impl Into<String>, config: S3StoreConfig, breaker: Arc<CircuitBreaker>) -> Self {
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
            .endpoint_url(config.endpoint.clone())
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.use_path_style)
            .build();
        S3Store {
            name: name.into(),
            client: Client::from_conf(s3_config),
            config,
            breaker,
            retrier: Retrier::new(Box::new(|duration| Box::pin(tokio::time::sleep(duration)))),
        }
    }

    fn retry_schedule(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::new(self.config.retry_delay).take(self.config.max_retries)
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/{}/{}", self.config.public_base_url.trim_end_matches('/'), bucket, path)
    }
}

/// Classifies an S3 SDK error as retryable or terminal, collapsing the
/// per-operation error enums the AWS SDK generates into one decision.
fn classify<E: std::fmt::Display>(context: &str, err: E, retryable: bool) -> RetryResult<()> {
    if retryable {
        RetryResult::Retry(make_err!(Code::Unavailable, "{context}: {err}"))
    } else {
        RetryResult::Err(make_err!(Code::Unknown, "{context}: {err}"))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn bucket_exists(self: Pin<&Self>, bucket: &str) -> Result<bool, Error> {
        let bucket = bucket.to_string();
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || async {
                        match self.client.head_bucket().bucket(&bucket).send().await {
                            Ok(_) => RetryResult::Ok(true),
                            Err(err) => {
                                if err.as_service_error().map(|e| e.is_not_found()).unwrap_or(false) {
                                    RetryResult::Ok(false)
                                } else {
                                    classify("head_bucket", err, true)
                                }
                            }
                        }
                    })
                    .await
            })
            .await
    }

    async fn list_buckets(self: Pin<&Self>) -> Result<Vec<String>, Error> {
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || async {
                        match self.client.list_buckets().send().await {
                            Ok(output) => RetryResult::Ok(
                                output
                                    .buckets()
                                    .iter()
                                    .filter_map(|b| b.name().map(str::to_string))
                                    .collect(),
                            ),
                            Err(err) => classify("list_buckets", err, true),
                        }
                    })
                    .await
            })
            .await
    }

    async fn create_bucket(self: Pin<&Self>, bucket: &str) -> Result<(), Error> {
        let bucket = bucket.to_string();
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || async {
                        match self.client.create_bucket().bucket(&bucket).send().await {
                            Ok(_) => RetryResult::Ok(()),
                            Err(err) => {
                                if err.as_service_error().map(|e| e.is_bucket_already_exists()).unwrap_or(false) {
                                    RetryResult::Err(make_err!(
                                        Code::AlreadyExists,
                                        "bucket {bucket} already exists"
                                    ))
                                } else {
                                    classify("create_bucket", err, true)
                                }
                            }
                        }
                    })
                    .await
            })
            .await
    }

    async fn remove_bucket(self: Pin<&Self>, bucket: &str) -> Result<(), Error> {
        let bucket = bucket.to_string();
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || async {
                        match self.client.delete_bucket().bucket(&bucket).send().await {
                            Ok(_) => RetryResult::Ok(()),
                            Err(err) => classify("delete_bucket", err, true),
                        }
                    })
                    .await
            })
            .await
    }

    async fn get_object(self: Pin<&Self>, key: &ObjectKey) -> Result<ObjectBody, Error> {
        let bucket = key.bucket.clone();
        let path = key.path.clone();
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || async {
                        match self.client.get_object().bucket(&bucket).key(&path).send().await {
                            Ok(output) => {
                                let content_type =
                                    output.content_type().unwrap_or("application/octet-stream").to_string();
                                match output.body.collect().await {
                                    Ok(data) => RetryResult::Ok(ObjectBody {
                                        bytes: data.into_bytes(),
                                        content_type,
                                    }),
                                    Err(err) => classify("get_object body", err, true),
                                }
                            }
                            Err(err) => {
                                if err.as_service_error().map(|e| e.is_no_such_key()).unwrap_or(false) {
                                    RetryResult::Err(make_err!(
                                        Code::NotFound,
                                        "object not found: {bucket}/{path}"
                                    ))
                                } else {
                                    classify("get_object", err, true)
                                }
                            }
                        }
                    })
                    .await
            })
            .await
    }

    async fn put_object(
        self: Pin<&Self>,
        key: &ObjectKey,
        body: Bytes,
        content_type: &str,
    ) -> Result<PutOutcome, Error> {
        let bucket = key.bucket.clone();
        let path = key.path.clone();
        let content_type = content_type.to_string();
        let size = body.len() as u64;
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || {
                        let body = body.clone();
                        let content_type = content_type.clone();
                        async move {
                            let result = self
                                .client
                                .put_object()
                                .bucket(&bucket)
                                .key(&path)
                                .body(ByteStream::from(body))
                                .content_type(&content_type)
                                .send()
                                .await;
                            match result {
                                Ok(_) => RetryResult::Ok(()),
                                Err(err) => classify("put_object", err, true),
                            }
                        }
                    })
                    .await
            })
            .await
            .map(|()| PutOutcome {
                size,
                url: self.public_url(&key.bucket, &key.path),
            })
    }

    async fn remove_object(self: Pin<&Self>, key: &ObjectKey) -> Result<(), Error> {
        let bucket = key.bucket.clone();
        let path = key.path.clone();
        self.breaker
            .call(|| async {
                self.retrier
                    .retry(self.retry_schedule(), || async {
                        match self.client.delete_object().bucket(&bucket).key(&path).send().await {
                            Ok(_) => RetryResult::Ok(()),
                            Err(err) => classify("delete_object", err, true),
                        }
                    })
                    .await
            })
            .await
    }

    async fn delete_many(self: Pin<&Self>, bucket: &str, keys: &[String]) -> Result<Vec<DeleteOutcome>, Error> {
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let object_key = match ObjectKey::new(bucket, key.clone()) {
                Ok(k) => k,
                Err(err) => {
                    outcomes.push(DeleteOutcome {
                        key: key.clone(),
                        success: false,
                        error: Some(err.messages_joined()),
                    });
                    continue;
                }
            };
            match self.remove_object(Pin::new(&*self), &object_key).await {
                Ok(()) => outcomes.push(DeleteOutcome {
                    key: key.clone(),
                    success: true,
                    error: None,
                }),
                Err(err) => outcomes.push(DeleteOutcome {
                    key: key.clone(),
                    success: false,
                    error: Some(err.messages_joined()),
                }),
            }
        }
        Ok(outcomes)
    }
}

#[async_trait]
impl HealthStatusIndicator for S3Store {
    fn component_name(&self) -> &str {
        &self.name
    }

    async fn check_health(&self) -> HealthStatus {
        let this = Pin::new(self);
        match this.list_buckets().await {
            Ok(_) => HealthStatus::ok(&self.name),
            Err(err) => HealthStatus::unhealthy(&self.name, err.messages_joined()),
        }
    }
}
