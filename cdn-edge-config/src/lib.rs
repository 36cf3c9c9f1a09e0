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

//! Environment-derived configuration, published as an immutable snapshot.
//!
//! The configuration is never mutated in place. `ConfigHandle::watch` spawns a task
//! that re-parses the environment file on change and swaps in a brand new `Arc`,
//! so a reader that grabbed a snapshot at the start of a request never observes a
//! half-applied reload.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use cdn_edge_error::{make_err, Code, Error, ResultExt};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Top level application settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSection {
    pub name: String,
    pub port: u16,
    pub public_url: String,
    /// Shared bearer credential compared in constant time against `Authorization` headers.
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinioSection {
    pub endpoint: String,
    pub root_user: String,
    pub root_password: String,
    pub use_ssl: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsSection {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSection {
    pub url: String,
}

/// Worker pool / batch processor tuning. Defaults match the values the source
/// project shipped with (`WORKER_*` environment variables).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSection {
    pub pool_size: usize,
    pub queue_size: usize,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub batch_size: usize,
    pub flush_timeout: Duration,
    pub max_concurrent: usize,
}

impl Default for WorkerSection {
    fn default() -> Self {
        WorkerSection {
            pool_size: 5,
            queue_size: 10,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            batch_size: 10,
            flush_timeout: Duration::from_millis(5000),
            max_concurrent: 5,
        }
    }
}

/// Feature kill-switches (`DISABLE_GET` / `DISABLE_UPLOAD` / `DISABLE_DELETE`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSection {
    pub disable_get: bool,
    pub disable_upload: bool,
    pub disable_delete: bool,
    pub validate_file: bool,
}

/// Rate limit settings (`RATE_LIMIT`, `UPLOAD_RATE_LIMIT`), `"<n>/<window>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSection {
    pub global_limit: u32,
    pub global_window: Duration,
    pub upload_limit: u32,
    pub upload_window: Duration,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        RateLimitSection {
            global_limit: 100,
            global_window: Duration::from_secs(60),
            upload_limit: 20,
            upload_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app: AppSection,
    pub minio: MinioSection,
    pub aws: AwsSection,
    pub redis: RedisSection,
    pub worker: WorkerSection,
    pub features: FeatureSection,
    pub rate_limit: RateLimitSection,
    pub max_file_size: u64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn must_env(key: &str) -> Result<String, Error> {
    env::var(key).map_err(|_| make_err!(Code::InvalidArgument, "missing required environment variable {key}"))
}

fn env_as_int_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_as_bool_or(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

/// Parses a `"<count>/<window>"` style rate-limit spec, e.g. `"2/min"` or `"100/1m"`.
fn parse_rate_spec(spec: &str, default: (u32, Duration)) -> (u32, Duration) {
    let Some((count_str, window_str)) = spec.split_once('/') else {
        return default;
    };
    let Ok(count) = count_str.trim().parse::<u32>() else {
        return default;
    };
    let window_str = window_str.trim();
    let window = match window_str {
        "min" | "m" => Duration::from_secs(60),
        "sec" | "s" => Duration::from_secs(1),
        "hour" | "h" => Duration::from_secs(3600),
        other => humantime::parse_duration(other).unwrap_or(default.1),
    };
    (count, window)
}

impl AppConfig {
    /// Loads configuration from the current process environment.
    pub fn from_env() -> Result<Self, Error> {
        let app = AppSection {
            name: env_or("APP_NAME", "cdn-edge"),
            port: env_as_int_or("APP_PORT", 9090),
            public_url: env_or("APP_URL", "http://localhost:9090"),
            token: must_env("TOKEN")?,
        };
        let minio = MinioSection {
            endpoint: must_env("MINIO_ENDPOINT")?,
            root_user: must_env("MINIO_ROOT_USER")?,
            root_password: must_env("MINIO_ROOT_PASSWORD")?,
            use_ssl: env_as_bool_or("MINIO_USE_SSL", false),
        };
        let aws = AwsSection {
            access_key_id: must_env("AWS_ACCESS_KEY_ID")?,
            secret_access_key: must_env("AWS_SECRET_ACCESS_KEY")?,
            session_token: env::var("AWS_SESSION_TOKEN").ok(),
            region: must_env("AWS_REGION")?,
            bucket: env::var("AWS_BUCKET").ok(),
        };
        let redis = RedisSection {
            url: must_env("REDIS_URL")?,
        };
        let worker = WorkerSection {
            pool_size: env_as_int_or("WORKER_POOL_SIZE", 5),
            queue_size: env_as_int_or("WORKER_QUEUE_SIZE", 10),
            max_retries: env_as_int_or("WORKER_MAX_RETRIES", 3),
            retry_delay: Duration::from_millis(env_as_int_or("WORKER_RETRY_DELAY_MS", 1000)),
            batch_size: env_as_int_or("WORKER_BATCH_SIZE", 10),
            flush_timeout: Duration::from_millis(env_as_int_or("WORKER_FLUSH_TIMEOUT_MS", 5000)),
            max_concurrent: env_as_int_or("WORKER_MAX_CONCURRENT", 5),
        };
        let features = FeatureSection {
            disable_get: env_as_bool_or("DISABLE_GET", false),
            disable_upload: env_as_bool_or("DISABLE_UPLOAD", false),
            disable_delete: env_as_bool_or("DISABLE_DELETE", false),
            validate_file: env_as_bool_or("VALIDATE_FILE", true),
        };
        let default_rate = RateLimitSection::default();
        let (global_limit, global_window) = env::var("RATE_LIMIT")
            .ok()
            .map(|s| parse_rate_spec(&s, (default_rate.global_limit, default_rate.global_window)))
            .unwrap_or((default_rate.global_limit, default_rate.global_window));
        let (upload_limit, upload_window) = env::var("UPLOAD_RATE_LIMIT")
            .ok()
            .map(|s| parse_rate_spec(&s, (default_rate.upload_limit, default_rate.upload_window)))
            .unwrap_or((default_rate.upload_limit, default_rate.upload_window));

        Ok(AppConfig {
            app,
            minio,
            aws,
            redis,
            worker,
            features,
            rate_limit: RateLimitSection {
                global_limit,
                global_window,
                upload_limit,
                upload_window,
            },
            max_file_size: env_as_int_or("MAX_FILE_SIZE", 100 * 1024 * 1024u64),
        })
    }

    /// Rejects an unusable configuration before the server binds to a port.
    pub fn validate(&self) -> Result<(), Error> {
        let mut problems = Vec::new();
        if self.app.port == 0 {
            problems.push("invalid port number".to_string());
        }
        if self.app.token.is_empty() {
            problems.push("token is required".to_string());
        }
        if self.minio.endpoint.is_empty() {
            problems.push("MinIO endpoint is required".to_string());
        }
        if self.aws.access_key_id.is_empty() {
            problems.push("AWS access key ID is required".to_string());
        }
        if self.aws.region.is_empty() {
            problems.push("AWS region is required".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(make_err!(
                Code::InvalidArgument,
                "configuration validation failed: {}",
                problems.join(", ")
            ))
        }
    }
}

/// Holds the current configuration snapshot and republishes it on file change.
///
/// Readers call [`ConfigHandle::load`] once at the start of a request and hold that
/// `Arc` for the request's duration; they never see a reload happen mid-request.
pub struct ConfigHandle {
    current: Arc<ArcSwap<AppConfig>>,
}

impl ConfigHandle {
    pub fn new(initial: AppConfig) -> Self {
        ConfigHandle {
            current: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    pub fn load(&self) -> Arc<AppConfig> {
        self.current.load_full()
    }

    /// Spawns a task that watches `env_path` and reloads from the process
    /// environment (after re-sourcing the file) whenever it changes.
    ///
    /// In-flight operations are not interrupted: they are holding an `Arc` obtained
    /// before the swap and will keep using those values until they finish.
    pub fn watch(&self, env_path: impl AsRef<Path>) -> Result<(), Error> {
        let env_path: PathBuf = env_path.as_ref().to_path_buf();
        let current = self.current.clone();
        let (tx, mut rx) = mpsc::channel(16);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                let _ = tx.blocking_send(());
            }
        })
        .map_err(|e| make_err!(Code::Internal, "failed to start config watcher: {e}"))?;
        watcher
            .watch(&env_path, RecursiveMode::NonRecursive)
            .err_tip(|| format!("failed to watch {}", env_path.display()))?;

        tokio::spawn(async move {
            // Keep the watcher alive for the lifetime of the task.
            let _watcher = watcher;
            while rx.recv().await.is_some() {
                match reload_dotenv(&env_path).and_then(|()| AppConfig::from_env()) {
                    Ok(new_config) => {
                        if new_config.validate().is_ok() {
                            current.store(Arc::new(new_config));
                            tracing::info!("configuration reloaded");
                        } else {
                            tracing::warn!("reloaded configuration failed validation, keeping previous snapshot");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%err, "failed to reload configuration");
                    }
                }
            }
        });
        Ok(())
    }
}

fn reload_dotenv(path: &Path) -> Result<(), Error> {
    let contents = std::fs::read_to_string(path).err_tip(|| format!("reading {}", path.display()))?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = shellexpand::env(value.trim()).unwrap_or_default().into_owned();
            env::set_var(key.trim(), value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_rate_spec_with_minute_window() {
        let (count, window) = parse_rate_spec("2/min", (100, Duration::from_secs(60)));
        assert_eq!(count, 2);
        assert_eq!(window, Duration::from_secs(60));
    }

    #[test]
    fn falls_back_to_default_on_garbage_input() {
        let default = (7, Duration::from_secs(42));
        assert_eq!(parse_rate_spec("garbage", default), default);
    }

    #[test]
    fn validate_flags_missing_token() {
        let mut config = sample_config();
        config.app.token.clear();
        let err = config.validate().unwrap_err();
        assert!(err.messages_joined().contains("token is required"));
    }

    fn sample_config() -> AppConfig {
        AppConfig {
            app: AppSection {
                name: "cdn-edge".into(),
                port: 9090,
                public_url: "http://localhost:9090".into(),
                token: "secret".into(),
            },
            minio: MinioSection {
                endpoint: "http://localhost:9000".into(),
                root_user: "minioadmin".into(),
                root_password: "minioadmin".into(),
                use_ssl: false,
            },
            aws: AwsSection {
                access_key_id: "AKIA".into(),
                secret_access_key: "secret".into(),
                session_token: None,
                region: "us-east-1".into(),
                bucket: None,
            },
            redis: RedisSection {
                url: "redis://localhost:6379".into(),
            },
            worker: WorkerSection::default(),
            features: FeatureSection::default(),
            rate_limit: RateLimitSection::default(),
            max_file_size: 100 * 1024 * 1024,
        }
    }
}
