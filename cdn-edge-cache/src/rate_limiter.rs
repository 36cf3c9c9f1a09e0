//! Sliding-window rate limiter (C8), two tiers per `spec.md` §4.8: a global
//! limit applied to every non-exempt path, and a tighter per-operation limit
//! for upload/delete. Implemented as a fixed-window counter (`INCR` + `EXPIRE`
//! on first increment) over the same backing store the result cache uses —
//! a single long-lived counter per window is enough to approximate the
//! sliding window at the precision the spec asks for.

use std::sync::Arc;
use std::time::Duration;

use cdn_edge_error::{make_err, Code, Error, ResultExt};
use cdn_edge_util::{HealthStatus, HealthStatusIndicator};

use crate::backend::KvBackend;

const MAX_KEY_LEN: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub retry_after: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub global_limit: u32,
    pub global_window: Duration,
    pub upload_limit: u32,
    pub upload_window: Duration,
    /// Path prefixes exempt from the global tier (health, metrics).
    pub exempt_prefixes: Vec<String>,
}

pub struct RateLimiter {
    backend: Arc<dyn KvBackend>,
    config: RateLimiterConfig,
}

/// Builds the `<address>[:<credential>]` identity key, then sanitizes it to
/// the alphanumerics/hyphen/underscore/dot alphabet the backing store allows,
/// truncated to `MAX_KEY_LEN`.
pub fn derive_key(address: &str, credential: Option<&str>) -> String {
    let raw = match credential {
        Some(credential) if !credential.is_empty() => format!("{address}:{credential}"),
        _ => address.to_string(),
    };
    sanitize_key(&raw)
}

fn sanitize_key(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect();
    sanitized.chars().take(MAX_KEY_LEN).collect()
}

impl RateLimiter {
    pub fn new(backend: Arc<dyn KvBackend>, config: RateLimiterConfig) -> Self {
        RateLimiter { backend, config }
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.config.exempt_prefixes.iter().any(|prefix| path.starts_with(prefix))
    }

    pub async fn check_global(&self, address: &str, credential: Option<&str>) -> Result<RateLimitOutcome, Error> {
        self.check(
            &format!("ratelimit:global:{}", derive_key(address, credential)),
            self.config.global_limit,
            self.config.global_window,
        )
        .await
    }

    pub async fn check_upload(&self, address: &str, credential: Option<&str>) -> Result<RateLimitOutcome, Error> {
        self.check(
            &format!("ratelimit:upload:{}", derive_key(address, credential)),
            self.config.upload_limit,
            self.config.upload_window,
        )
        .await
    }

    async fn check(&self, key: &str, limit: u32, window: Duration) -> Result<RateLimitOutcome, Error> {
        error_if_invalid_limit(limit)?;
        let count = self
            .backend
            .incr_with_expiry(key, window)
            .await
            .err_tip(|| format!("rate limit check {key}"))?;
        if count > u64::from(limit) {
            Ok(RateLimitOutcome {
                allowed: false,
                retry_after: window,
            })
        } else {
            Ok(RateLimitOutcome {
                allowed: true,
                retry_after: Duration::ZERO,
            })
        }
    }
}

fn error_if_invalid_limit(limit: u32) -> Result<(), Error> {
    if limit == 0 {
        return Err(make_err!(Code::InvalidArgument, "rate limit must be greater than zero"));
    }
    Ok(())
}

#[async_trait::async_trait]
impl HealthStatusIndicator for RateLimiter {
    fn component_name(&self) -> &str {
        "rate-limiter"
    }

    async fn check_health(&self) -> HealthStatus {
        HealthStatus::ok("rate-limiter")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use pretty_assertions::assert_eq;

    fn limiter(global_limit: u32, upload_limit: u32) -> RateLimiter {
        RateLimiter::new(
            Arc::new(InMemoryBackend::new()),
            RateLimiterConfig {
                global_limit,
                global_window: Duration::from_secs(60),
                upload_limit,
                upload_window: Duration::from_secs(60),
                exempt_prefixes: vec!["/health".to_string(), "/metrics".to_string()],
            },
        )
    }

    #[test]
    fn sanitizes_disallowed_characters() {
        assert_eq!(sanitize_key("1.2.3.4:token with spaces"), "1.2.3.4:token_with_spaces");
    }

    #[test]
    fn truncates_to_max_length() {
        let long = "a".repeat(600);
        assert_eq!(sanitize_key(&long).len(), MAX_KEY_LEN);
    }

    #[tokio::test]
    async fn allows_requests_under_the_limit() {
        let limiter = limiter(2, 1);
        assert!(limiter.check_global("1.2.3.4", None).await.unwrap().allowed);
        assert!(limiter.check_global("1.2.3.4", None).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn rejects_once_the_limit_is_exceeded() {
        let limiter = limiter(1, 1);
        assert!(limiter.check_global("1.2.3.4", None).await.unwrap().allowed);
        let outcome = limiter.check_global("1.2.3.4", None).await.unwrap();
        assert!(!outcome.allowed);
        assert_eq!(outcome.retry_after, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn credentialed_and_anonymous_keys_are_independent() {
        let limiter = limiter(1, 1);
        assert!(limiter.check_global("1.2.3.4", Some("tok-a")).await.unwrap().allowed);
        assert!(limiter.check_global("1.2.3.4", Some("tok-b")).await.unwrap().allowed);
    }

    #[test]
    fn exempts_health_and_metrics_paths() {
        let limiter = limiter(1, 1);
        assert!(limiter.is_exempt("/health"));
        assert!(limiter.is_exempt("/metrics"));
        assert!(!limiter.is_exempt("/upload"));
    }
}
