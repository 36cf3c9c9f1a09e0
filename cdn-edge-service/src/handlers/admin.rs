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

//! Bucket administration under `/aws/...` and `/minio/...`, per `spec.md`
//! §6. Both prefixes are names for the same backing hot store (an S3-
//! compatible endpoint serves MinIO and AWS S3 alike); `router.rs` registers
//! this module's handlers under both literal prefixes rather than a dynamic
//! `:store` segment, since the bucket-fetch route also owns the top-level
//! `/:bucket/*key` namespace and a dynamic store segment would collide with it.

use std::pin::Pin;

use axum::extract::{Multipart, Path, State};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use cdn_edge_error::{make_err, Code};
use cdn_edge_util::ObjectKey;
use serde_json::json;

use crate::envelope::{ApiError, Envelope};
use crate::state::AppState;

pub async fn bucket_list(State(state): State<AppState>) -> Result<Response, ApiError> {
    let buckets = Pin::new(&*state.hot_store).list_buckets().await.map_err(ApiError)?;
    Ok(Envelope::ok("bucket list", json!({ "buckets": buckets })))
}

pub async fn bucket_exists(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Response, ApiError> {
    let exists = Pin::new(&*state.hot_store).bucket_exists(&bucket).await.map_err(ApiError)?;
    Ok(Envelope::ok("bucket existence", json!({ "bucket": bucket, "exists": exists })))
}

pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Response, ApiError> {
    Pin::new(&*state.hot_store).create_bucket(&bucket).await.map_err(ApiError)?;
    Ok(Envelope::ok("bucket created", json!({ "bucket": bucket })))
}

pub async fn remove_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Response, ApiError> {
    Pin::new(&*state.hot_store).remove_bucket(&bucket).await.map_err(ApiError)?;
    Ok(Envelope::ok("bucket removed", json!({ "bucket": bucket })))
}

pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let key = ObjectKey::new(bucket, path).map_err(ApiError)?;
    let object = Pin::new(&*state.hot_store).get_object(&key).await.map_err(ApiError)?;
    Ok((
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, object.content_type)],
        object.bytes,
    )
        .into_response())
}

pub async fn put_object(
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let key = ObjectKey::new(bucket, path).map_err(ApiError)?;
    let mut body: Option<Bytes> = None;
    let mut content_type = "application/octet-stream".to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(make_err!(Code::InvalidArgument, "invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            if let Some(mime) = field.content_type() {
                content_type = mime.to_string();
            }
            body = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError(make_err!(Code::InvalidArgument, "failed to read file field: {e}")))?,
            );
        }
    }
    let body = body.ok_or_else(|| ApiError(make_err!(Code::InvalidArgument, "missing \"file\" field")))?;
    let outcome = Pin::new(&*state.hot_store)
        .put_object(&key, body, &content_type)
        .await
        .map_err(ApiError)?;
    Ok(Envelope::ok(
        "object stored",
        json!({ "bucket": key.bucket, "path": key.path, "size": outcome.size, "url": outcome.url }),
    ))
}

pub async fn remove_object(
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let key = ObjectKey::new(bucket, path).map_err(ApiError)?;
    Pin::new(&*state.hot_store).remove_object(&key).await.map_err(ApiError)?;
    Ok(Envelope::ok("object removed", json!({ "bucket": key.bucket, "path": key.path })))
}
