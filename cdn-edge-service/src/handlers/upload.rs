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

//! `POST /upload`, `POST /upload-url`, `POST /batch/upload`, `DELETE
//! /batch/delete`, per `spec.md` §6, grounded on the original's
//! `commonUpload`/`UploadImageWithUrl` (`handler/image.go`).

use std::pin::Pin;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::response::Response;
use bytes::Bytes;
use cdn_edge_error::{make_err, Code, Error};
use cdn_edge_store::DeleteOutcome;
use cdn_edge_transform::{transform, TransformDescriptor};
use cdn_edge_util::ObjectKey;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;

use crate::dimensions::DimensionSource;
use crate::envelope::{ApiError, Envelope};
use crate::state::AppState;

/// `service.RandomName(10)` in the original: 10 lowercase hex characters.
fn random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut hex = String::with_capacity(len);
    while hex.len() < len {
        let byte: u8 = rng.gen();
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(len);
    hex
}

fn parse_bool_field(value: Option<&String>) -> bool {
    matches!(value.map(String::as_str), Some("true") | Some("1"))
}

fn extension_of(filename: &str) -> Option<&str> {
    filename.rsplit_once('.').map(|(_, ext)| ext)
}

fn is_image_extension(filename: &str) -> bool {
    const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff"];
    extension_of(filename)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Best-effort: if the bucket does not already exist, create it. A
/// concurrent creator racing us is not an error, matching the original's
/// auto-create-on-upload behavior.
async fn ensure_bucket_exists(state: &AppState, bucket: &str) -> Result<(), Error> {
    if Pin::new(&*state.hot_store).bucket_exists(bucket).await? {
        return Ok(());
    }
    match Pin::new(&*state.hot_store).create_bucket(bucket).await {
        Ok(()) | Err(Error { code: Code::AlreadyExists, .. }) => Ok(()),
        Err(err) => Err(err),
    }
}

struct IncomingFile {
    filename: String,
    content_type: String,
    bytes: Bytes,
}

struct UploadForm {
    bucket: String,
    path: String,
    aws_upload: bool,
    width: Option<String>,
    height: Option<String>,
    file: IncomingFile,
}

async fn parse_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut bucket = None;
    let mut path = None;
    let mut aws_upload = None;
    let mut width = None;
    let mut height = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(make_err!(Code::InvalidArgument, "invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload.bin").to_string();
                let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError(make_err!(Code::InvalidArgument, "failed to read file field: {e}")))?;
                file = Some(IncomingFile {
                    filename,
                    content_type,
                    bytes,
                });
            }
            "bucket" => bucket = Some(field.text().await.unwrap_or_default()),
            "path" => path = Some(field.text().await.unwrap_or_default()),
            "aws_upload" => aws_upload = Some(field.text().await.unwrap_or_default()),
            "width" => width = Some(field.text().await.unwrap_or_default()),
            "height" => height = Some(field.text().await.unwrap_or_default()),
            _ => {}
        }
    }

    Ok(UploadForm {
        bucket: bucket.ok_or_else(|| ApiError(make_err!(Code::InvalidArgument, "missing \"bucket\" field")))?,
        path: path.ok_or_else(|| ApiError(make_err!(Code::InvalidArgument, "missing \"path\" field")))?,
        aws_upload: parse_bool_field(aws_upload.as_ref()),
        width,
        height,
        file: file.ok_or_else(|| ApiError(make_err!(Code::InvalidArgument, "missing \"file\" field")))?,
    })
}

/// Archives a best-effort copy of `body` to the cold store's vault named
/// after `bucket`, run on the worker pool so it never delays the response.
/// The archive id Glacier assigns is recorded against `bucket`/`path` so a
/// later `aws_delete` can find and remove it.
fn spawn_cold_archive_copy(state: &AppState, bucket: String, path: String, body: Bytes) {
    let cold_store = state.cold_store.clone();
    let archive = state.archive.clone();
    state.worker_pool.submit(move || {
        let cold_store = cold_store.clone();
        let archive = archive.clone();
        let bucket = bucket.clone();
        let path = path.clone();
        let body = body.clone();
        Box::pin(async move {
            let archive_id = Pin::new(&*cold_store).upload_archive(&bucket, body).await?;
            archive.record_upload_archive(&bucket, &path, &archive_id);
            Ok(())
        })
    });
}

/// Best-effort removal of the cold-archive copy recorded for `bucket`/`path`,
/// run on the worker pool so it never delays the response, mirroring
/// `spawn_cold_archive_copy`.
fn spawn_cold_archive_delete(state: &AppState, bucket: String, path: String) {
    let archive = state.archive.clone();
    state.worker_pool.submit(move || {
        let archive = archive.clone();
        let bucket = bucket.clone();
        let path = path.clone();
        Box::pin(async move { archive.delete_upload_archive(&bucket, &path).await })
    });
}

pub async fn upload(State(state): State<AppState>, multipart: Multipart) -> Result<Response, ApiError> {
    let form = parse_upload_form(multipart).await?;
    state.stats.begin_upload();
    let result = do_upload(&state, form).await;
    state.stats.end_upload(result.as_ref().map(|(_, size)| *size).unwrap_or(0));
    match result {
        Ok((envelope, _)) => Ok(envelope),
        Err(err) => {
            state.stats.record_error(err.messages_joined());
            Err(ApiError(err))
        }
    }
}

async fn do_upload(state: &AppState, form: UploadForm) -> Result<(Response, u64), Error> {
    cdn_edge_transform::validate_header(
        &cdn_edge_transform::FileMeta {
            filename: form.file.filename.clone(),
            declared_mime: form.file.content_type.clone(),
            size: form.file.bytes.len() as u64,
        },
        state.config.load().max_file_size,
    )?;
    cdn_edge_transform::validate_content(&form.file.filename, &form.file.bytes, state.config.load().max_file_size)?;

    ensure_bucket_exists(state, &form.bucket).await?;

    let extension = extension_of(&form.file.filename).unwrap_or("bin").to_ascii_lowercase();
    let random_name = format!("{}.{extension}", random_hex(10));
    let object_path = format!("{}/{random_name}", form.path.trim_matches('/'));
    let key = ObjectKey::new(form.bucket.clone(), object_path)?;

    let mut body = form.file.bytes.clone();
    if (form.width.is_some() || form.height.is_some()) && is_image_extension(&form.file.filename) {
        let mut fields = std::collections::HashMap::new();
        if let Some(w) = &form.width {
            fields.insert("width".to_string(), w.clone());
        }
        if let Some(h) = &form.height {
            fields.insert("height".to_string(), h.clone());
        }
        let descriptor: TransformDescriptor = DimensionSource::FormFields(&fields).resolve();
        body = Bytes::from(transform(&body, descriptor, Some(&state.metrics))?);
    }

    let outcome = Pin::new(&*state.hot_store)
        .put_object(&key, body.clone(), &form.file.content_type)
        .await?;

    if form.aws_upload {
        spawn_cold_archive_copy(state, key.bucket.clone(), key.path.clone(), body.clone());
    }

    let response = Envelope::ok(
        "uploaded",
        json!({ "bucket": key.bucket, "path": key.path, "size": outcome.size, "url": outcome.url }),
    );
    Ok((response, outcome.size))
}

#[derive(Debug, Deserialize)]
pub struct UploadUrlRequest {
    pub bucket: String,
    pub path: String,
    pub url: String,
    #[serde(default)]
    pub aws_upload: bool,
}

/// Extensions inferred from a fetched MIME type when the URL itself carries
/// no usable suffix, per `spec.md` §6's "MIME→extension table or URL suffix".
const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/bmp", "bmp"),
    ("image/tiff", "tiff"),
    ("application/pdf", "pdf"),
];

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    MIME_EXTENSIONS.iter().find(|(m, _)| *m == mime).map(|(_, ext)| *ext)
}

pub async fn upload_url(
    State(state): State<AppState>,
    axum::Json(request): axum::Json<UploadUrlRequest>,
) -> Result<Response, ApiError> {
    state.stats.begin_upload();
    let result = do_upload_url(&state, request).await;
    state.stats.end_upload(result.as_ref().map(|(_, size)| *size).unwrap_or(0));
    match result {
        Ok((envelope, _)) => Ok(envelope),
        Err(err) => {
            state.stats.record_error(err.messages_joined());
            Err(ApiError(err))
        }
    }
}

async fn do_upload_url(state: &AppState, request: UploadUrlRequest) -> Result<(Response, u64), Error> {
    let fetched = state
        .http_client
        .get(&request.url)
        .send()
        .await
        .map_err(|e| make_err!(Code::Unavailable, "failed to fetch {}: {e}", request.url))?;
    let declared_mime = fetched
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = fetched
        .bytes()
        .await
        .map_err(|e| make_err!(Code::Unavailable, "failed to read body of {}: {e}", request.url))?;

    ensure_bucket_exists(state, &request.bucket).await?;

    let extension = extension_for_mime(&declared_mime)
        .map(str::to_string)
        .or_else(|| request.url.rsplit('.').next().map(|ext| ext.to_ascii_lowercase()))
        .unwrap_or_else(|| "bin".to_string());
    let object_path = format!("{}/{}.{extension}", request.path.trim_matches('/'), random_hex(10));
    let key = ObjectKey::new(request.bucket.clone(), object_path)?;

    let outcome = Pin::new(&*state.hot_store)
        .put_object(&key, bytes.clone(), &declared_mime)
        .await?;

    if request.aws_upload {
        spawn_cold_archive_copy(state, key.bucket.clone(), key.path.clone(), bytes.clone());
    }

    let response = Envelope::ok(
        "uploaded from url",
        json!({ "bucket": key.bucket, "path": key.path, "size": outcome.size, "url": outcome.url }),
    );
    Ok((response, outcome.size))
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteRequest {
    pub bucket: String,
    pub files: Vec<String>,
    #[serde(default)]
    pub aws_delete: bool,
}

/// `DELETE /batch/delete` — per `spec.md` §8 scenario 6, one missing key
/// never aborts the rest of the batch; `ObjectStore::delete_many` already
/// reports exactly this way. `aws_delete` additionally removes the
/// cold-archive copy recorded for each file, matching the original's
/// `DeleteImageWithAws` (`handler/image.go`).
pub async fn batch_delete(
    State(state): State<AppState>,
    axum::Json(request): axum::Json<BatchDeleteRequest>,
) -> Result<Response, ApiError> {
    let outcomes: Vec<DeleteOutcome> = Pin::new(&*state.hot_store)
        .delete_many(&request.bucket, &request.files)
        .await
        .map_err(ApiError)?;

    if request.aws_delete {
        for file in &request.files {
            spawn_cold_archive_delete(&state, request.bucket.clone(), file.clone());
        }
    }

    Ok(Envelope::ok(
        "batch delete",
        json!({
            "items": outcomes.iter().map(|o| json!({
                "key": o.key,
                "success": o.success,
                "error": o.error,
            })).collect::<Vec<_>>(),
        }),
    ))
}

struct BatchUploadForm {
    bucket: String,
    path: String,
    aws_upload: bool,
    files: Vec<IncomingFile>,
}

async fn parse_batch_upload_form(mut multipart: Multipart) -> Result<BatchUploadForm, ApiError> {
    let mut bucket = None;
    let mut path = None;
    let mut aws_upload = None;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(make_err!(Code::InvalidArgument, "invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" => {
                let filename = field.file_name().unwrap_or("upload.bin").to_string();
                let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError(make_err!(Code::InvalidArgument, "failed to read \"files\" field: {e}")))?;
                files.push(IncomingFile {
                    filename,
                    content_type,
                    bytes,
                });
            }
            "bucket" => bucket = Some(field.text().await.unwrap_or_default()),
            "path" => path = Some(field.text().await.unwrap_or_default()),
            "aws_upload" => aws_upload = Some(field.text().await.unwrap_or_default()),
            _ => {}
        }
    }

    if files.is_empty() {
        return Err(ApiError(make_err!(Code::InvalidArgument, "missing \"files\" field")));
    }

    Ok(BatchUploadForm {
        bucket: bucket.ok_or_else(|| ApiError(make_err!(Code::InvalidArgument, "missing \"bucket\" field")))?,
        path: path.ok_or_else(|| ApiError(make_err!(Code::InvalidArgument, "missing \"path\" field")))?,
        aws_upload: parse_bool_field(aws_upload.as_ref()),
        files,
    })
}

/// Stores a single batch-uploaded file under `bucket`/`path`, returning the
/// same `{bucket, path, size, url}` shape `do_upload`/`do_upload_url` return.
async fn store_batch_file(
    state: &AppState,
    bucket: &str,
    path: &str,
    aws_upload: bool,
    file: IncomingFile,
) -> Result<serde_json::Value, Error> {
    ensure_bucket_exists(state, bucket).await?;

    let extension = extension_of(&file.filename).unwrap_or("bin").to_ascii_lowercase();
    let object_path = format!("{}/{}.{extension}", path.trim_matches('/'), random_hex(10));
    let key = ObjectKey::new(bucket.to_string(), object_path)?;

    let outcome = Pin::new(&*state.hot_store).put_object(&key, file.bytes.clone(), &file.content_type).await?;

    if aws_upload {
        spawn_cold_archive_copy(state, key.bucket.clone(), key.path.clone(), file.bytes);
    }

    Ok(json!({ "bucket": key.bucket, "path": key.path, "size": outcome.size, "url": outcome.url }))
}

/// `POST /batch/upload` — multipart, many `files` parts sharing one
/// `bucket`/`path`/`aws_upload`, per `spec.md` §6. Each file is stored
/// independently so one failure cannot abort the rest, per `spec.md` §5's
/// ordering guarantees.
pub async fn batch_upload(State(state): State<AppState>, multipart: Multipart) -> Result<Response, ApiError> {
    let form = parse_batch_upload_form(multipart).await?;
    let state = Arc::new(state);
    let bucket = Arc::new(form.bucket);
    let path = Arc::new(form.path);
    let aws_upload = form.aws_upload;
    let tasks = form.files.into_iter().map(|file| {
        let state = state.clone();
        let bucket = bucket.clone();
        let path = path.clone();
        async move {
            match store_batch_file(&state, &bucket, &path, aws_upload, file).await {
                Ok(mut item) => {
                    item["success"] = json!(true);
                    item
                }
                Err(err) => json!({ "success": false, "error": err.messages_joined() }),
            }
        }
    });
    let items = futures::future::join_all(tasks).await;
    Ok(Envelope::ok("batch upload", json!({ "items": items })))
}

/// Swapped in for the upload/batch/delete routes when `DISABLE_UPLOAD` /
/// `DISABLE_DELETE` is set (`router.rs`).
pub async fn disabled() -> Response {
    crate::envelope::feature_disabled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn batch_delete_request_deserializes_spec_shape() {
        let request: BatchDeleteRequest =
            serde_json::from_str(r#"{"bucket":"img","files":["a.bin","b.bin"],"aws_delete":false}"#).unwrap();
        assert_eq!(request.bucket, "img");
        assert_eq!(request.files, vec!["a.bin".to_string(), "b.bin".to_string()]);
        assert!(!request.aws_delete);
    }

    #[test]
    fn batch_delete_request_defaults_aws_delete_to_false() {
        let request: BatchDeleteRequest = serde_json::from_str(r#"{"bucket":"img","files":["a.bin"]}"#).unwrap();
        assert!(!request.aws_delete);
    }

    #[test]
    fn random_hex_produces_requested_length() {
        assert_eq!(random_hex(10).len(), 10);
    }
}
