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

//! `GET /{bucket}/{key...}`, `DELETE /{bucket}/{key...}`, `POST /resize`, per
//! `spec.md` §6, grounded on the original's `GetImage`/`GetImageWidthHeight`
//! (`controller/handler.go`).

use std::collections::HashMap;
use std::pin::Pin;

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use cdn_edge_error::{make_err, Code, Error};
use cdn_edge_transform::{guess_mime, probe_dimensions, transform, TransformDescriptor};
use cdn_edge_util::ObjectKey;
use serde_json::json;

use crate::dimensions::DimensionSource;
use crate::envelope::{ApiError, Envelope};
use crate::state::AppState;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff"];
const NOTFOUND_ASSET: &[u8] = include_bytes!("../../assets/notfound.png");

const EXTENSION_MIME: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("tiff", "image/tiff"),
];

fn extension_of(path: &str) -> Option<&str> {
    path.rsplit_once('.').map(|(_, ext)| ext)
}

fn is_image_extension(path: &str) -> bool {
    extension_of(path)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn content_type_for_path(path: &str) -> &'static str {
    let Some(raw_ext) = extension_of(path) else {
        return "application/octet-stream";
    };
    let ext = raw_ext.to_ascii_lowercase();
    EXTENSION_MIME
        .iter()
        .find(|(e, _)| *e == ext.as_str())
        .map(|(_, mime)| *mime)
        .unwrap_or("application/octet-stream")
}

/// Strips leading `w:{n}/` / `h:{n}/` prefix segments, in either order, off a
/// wildcard-captured key, per `spec.md` §6.
fn strip_dimension_prefixes(raw_key: &str) -> (Option<String>, Option<String>, String) {
    let mut width = None;
    let mut height = None;
    let mut rest = raw_key;
    loop {
        if width.is_none() {
            if let Some(tail) = rest.strip_prefix("w:") {
                if let Some(idx) = tail.find('/') {
                    width = Some(tail[..idx].to_string());
                    rest = &tail[idx + 1..];
                    continue;
                }
            }
        }
        if height.is_none() {
            if let Some(tail) = rest.strip_prefix("h:") {
                if let Some(idx) = tail.find('/') {
                    height = Some(tail[..idx].to_string());
                    rest = &tail[idx + 1..];
                    continue;
                }
            }
        }
        break;
    }
    (width, height, rest.to_string())
}

fn object_response(bytes: Bytes, content_type: &str, dims: Option<(u32, u32)>) -> Response {
    let mut response = (StatusCode::OK, bytes).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(axum::http::header::CONTENT_TYPE, value);
    }
    if let Some((width, height)) = dims {
        if let Ok(value) = HeaderValue::from_str(&width.to_string()) {
            headers.insert("width", value);
        }
        if let Ok(value) = HeaderValue::from_str(&height.to_string()) {
            headers.insert("height", value);
        }
    }
    response
}

/// `spec.md` §7: the read path falls back to a static placeholder on a
/// missing bucket/object rather than a JSON error, matching the original's
/// `c.SendFile("./notfound.png")`.
fn notfound_response() -> Response {
    let mut response = (StatusCode::OK, Bytes::from_static(NOTFOUND_ASSET)).into_response();
    response
        .headers_mut()
        .insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    response
}

pub async fn get_object(State(state): State<AppState>, Path((bucket, raw_key)): Path<(String, String)>) -> Response {
    let (width_str, height_str, key_path) = strip_dimension_prefixes(&raw_key);
    let descriptor = DimensionSource::PathParams {
        width: width_str.as_deref(),
        height: height_str.as_deref(),
    }
    .resolve();

    match fetch_and_maybe_transform(&state, &bucket, &key_path, descriptor).await {
        Ok(response) => response,
        Err(err) if err.code == Code::NotFound => notfound_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

async fn fetch_and_maybe_transform(
    state: &AppState,
    bucket: &str,
    path: &str,
    descriptor: TransformDescriptor,
) -> Result<Response, Error> {
    let key = ObjectKey::new(bucket, path)?;
    let wants_transform = (descriptor.width.is_some() || descriptor.height.is_some()) && is_image_extension(&key.path);

    if !wants_transform {
        let object = Pin::new(&*state.hot_store).get_object(&key).await?;
        return Ok(object_response(object.bytes, &object.content_type, None));
    }

    let fingerprint = key.resize_fingerprint(descriptor.width.unwrap_or(0), descriptor.height.unwrap_or(0));
    if let Some(cached) = state.cache.get(&fingerprint).await? {
        let dims = probe_dimensions(&cached);
        return Ok(object_response(cached, content_type_for_path(&key.path), dims));
    }

    let object = Pin::new(&*state.hot_store).get_object(&key).await?;
    let transformed = transform(&object.bytes, descriptor, Some(&state.metrics))?;
    let dims = probe_dimensions(&transformed);
    let body = Bytes::from(transformed);
    let response = object_response(body.clone(), content_type_for_path(&key.path), dims);

    // Cache writes following a transform are best-effort and must not block
    // the response to the client (`spec.md` §5).
    let cache = state.cache.clone();
    state.worker_pool.submit(move || {
        let cache = cache.clone();
        let fingerprint = fingerprint.clone();
        let body = body.clone();
        Box::pin(async move { cache.set(&fingerprint, body, cdn_edge_cache::DEFAULT_TTL).await })
    });

    Ok(response)
}

pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, raw_key)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let key = ObjectKey::new(bucket, raw_key).map_err(ApiError)?;
    Pin::new(&*state.hot_store).remove_object(&key).await.map_err(ApiError)?;
    Ok(Envelope::ok(
        "object removed",
        json!({ "bucket": key.bucket, "path": key.path }),
    ))
}

/// `POST /resize` — a one-off resize that never touches a store. Unauthenticated
/// per `spec.md` §6.
pub async fn resize(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response, ApiError> {
    let mut file_bytes: Option<Bytes> = None;
    let mut fields: HashMap<String, String> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(make_err!(Code::InvalidArgument, "invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError(make_err!(Code::InvalidArgument, "failed to read file field: {e}")))?;
            file_bytes = Some(bytes);
        } else {
            let value = field.text().await.unwrap_or_default();
            fields.insert(name, value);
        }
    }

    let bytes = file_bytes.ok_or_else(|| ApiError(make_err!(Code::InvalidArgument, "missing \"file\" field")))?;
    let descriptor = DimensionSource::FormFields(&fields).resolve();
    let resized = transform(&bytes, descriptor, Some(&state.metrics)).map_err(ApiError)?;
    let dims = probe_dimensions(&resized);
    let content_type = guess_mime(&bytes).unwrap_or("application/octet-stream");
    Ok(object_response(Bytes::from(resized), content_type, dims))
}

/// Swapped in for `get_object`/`delete_object` when `DISABLE_GET` /
/// `DISABLE_DELETE` is set (`router.rs`).
pub async fn disabled() -> Response {
    crate::envelope::feature_disabled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_both_prefixes_in_order() {
        let (w, h, rest) = strip_dimension_prefixes("w:300/h:200/a/b.jpg");
        assert_eq!(w.as_deref(), Some("300"));
        assert_eq!(h.as_deref(), Some("200"));
        assert_eq!(rest, "a/b.jpg");
    }

    #[test]
    fn strips_prefixes_given_in_reverse_order() {
        let (w, h, rest) = strip_dimension_prefixes("h:200/w:300/a.jpg");
        assert_eq!(w.as_deref(), Some("300"));
        assert_eq!(h.as_deref(), Some("200"));
        assert_eq!(rest, "a.jpg");
    }

    #[test]
    fn leaves_plain_keys_untouched() {
        let (w, h, rest) = strip_dimension_prefixes("a/b/c.jpg");
        assert_eq!(w, None);
        assert_eq!(h, None);
        assert_eq!(rest, "a/b/c.jpg");
    }

    #[test]
    fn recognizes_image_extensions_case_insensitively() {
        assert!(is_image_extension("a/B.JPG"));
        assert!(!is_image_extension("a/doc.pdf"));
        assert!(!is_image_extension("a/no-extension"));
    }

    #[test]
    fn maps_known_extensions_to_content_type() {
        assert_eq!(content_type_for_path("a.png"), "image/png");
        assert_eq!(content_type_for_path("a.unknown"), "application/octet-stream");
    }
}
