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

//! Cold-archive retrieval routes under `/aws/glacier/...`, per `spec.md` §6
//! and the two-phase protocol in §4.9: initiate → poll → optional async
//! fan-out to a hot-store or local-disk target.

use std::collections::HashMap;
use std::pin::Pin;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use cdn_edge_archive::DownloadTarget;
use cdn_edge_error::{make_err, Code};
use cdn_edge_store::RetrievalTier;
use serde::Deserialize;
use serde_json::json;

use crate::envelope::{ApiError, Envelope};
use crate::state::AppState;

fn parse_tier(raw: Option<&String>) -> RetrievalTier {
    match raw.map(|s| s.as_str()) {
        Some("Expedited") | Some("expedited") => RetrievalTier::Expedited,
        Some("Bulk") | Some("bulk") => RetrievalTier::Bulk,
        _ => RetrievalTier::Standard,
    }
}

pub async fn initiate_retrieval(
    State(state): State<AppState>,
    Path((vault, archive)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let tier = parse_tier(params.get("tier"));
    let remote_job_id = Pin::new(&*state.cold_store)
        .initiate_retrieval(&vault, &archive, tier)
        .await
        .map_err(ApiError)?;
    let local_id = state.archive.record_initiated(&vault, &remote_job_id);
    Ok(Envelope::ok(
        "retrieval initiated",
        json!({ "localJobId": local_id, "remoteJobId": remote_job_id }),
    ))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path((vault, job_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let job = Pin::new(&*state.cold_store)
        .describe_job(&vault, &job_id)
        .await
        .map_err(ApiError)?;
    Ok(Envelope::ok(
        "job status",
        json!({
            "jobId": job.job_id,
            "action": job.action,
            "completed": job.completed,
            "statusCode": job.status_code,
            "statusMessage": job.status_message,
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncDownloadRequest {
    #[serde(rename = "type")]
    pub target_type: String,
    pub target_bucket: Option<String>,
    pub target_path: String,
}

fn resolve_target(request: AsyncDownloadRequest) -> Result<DownloadTarget, ApiError> {
    match request.target_type.as_str() {
        "minio" | "aws" | "hot_store" => {
            let bucket = request
                .target_bucket
                .ok_or_else(|| ApiError(make_err!(Code::InvalidArgument, "targetBucket is required for hot-store targets")))?;
            Ok(DownloadTarget::HotStore {
                bucket,
                path: request.target_path,
            })
        }
        "local" | "local_disk" => Ok(DownloadTarget::LocalDisk {
            path: request.target_path,
        }),
        other => Err(ApiError(make_err!(Code::InvalidArgument, "unknown download target type {other}"))),
    }
}

pub async fn async_download(
    State(state): State<AppState>,
    Path((vault, job_id)): Path<(String, String)>,
    axum::Json(request): axum::Json<AsyncDownloadRequest>,
) -> Result<Response, ApiError> {
    let target = resolve_target(request)?;
    let local_id = state
        .archive
        .initiate_async_download(&vault, &job_id, target)
        .map_err(ApiError)?;
    Ok(Envelope::ok("async download started", json!({ "downloadJobId": local_id })))
}

pub async fn download_status(
    State(state): State<AppState>,
    Path(download_job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job = state.archive.check_download_status(&download_job_id).map_err(ApiError)?;
    Ok(Envelope::ok(
        "download status",
        json!({
            "downloadJobId": job.local_id,
            "vault": job.vault,
            "remoteJobId": job.remote_job_id,
            "status": job.status,
            "startTime": job.start_time,
            "endTime": job.end_time,
            "error": job.error,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_known_tiers_case_insensitively() {
        assert_eq!(parse_tier(Some(&"expedited".to_string())), RetrievalTier::Expedited);
        assert_eq!(parse_tier(Some(&"Bulk".to_string())), RetrievalTier::Bulk);
    }

    #[test]
    fn defaults_to_standard_tier() {
        assert_eq!(parse_tier(None), RetrievalTier::Standard);
        assert_eq!(parse_tier(Some(&"garbage".to_string())), RetrievalTier::Standard);
    }

    #[test]
    fn resolves_hot_store_target_requires_bucket() {
        let request = AsyncDownloadRequest {
            target_type: "minio".to_string(),
            target_bucket: None,
            target_path: "a.bin".to_string(),
        };
        assert!(resolve_target(request).is_err());
    }

    #[test]
    fn resolves_local_disk_target() {
        let request = AsyncDownloadRequest {
            target_type: "local".to_string(),
            target_bucket: None,
            target_path: "/tmp/glacier_downloads/a.bin".to_string(),
        };
        assert!(matches!(resolve_target(request).unwrap(), DownloadTarget::LocalDisk { .. }));
    }

    #[test]
    fn deserializes_camel_case_request_body() {
        let request: AsyncDownloadRequest =
            serde_json::from_str(r#"{"type":"minio","targetBucket":"img","targetPath":"restored/a.bin"}"#).unwrap();
        assert_eq!(request.target_type, "minio");
        assert_eq!(request.target_bucket.as_deref(), Some("img"));
        assert_eq!(request.target_path, "restored/a.bin");
    }
}
