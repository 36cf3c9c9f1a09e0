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

//! The `{success, message, data}` JSON envelope every non-binary response
//! uses, and the `Error` → HTTP status mapping from `spec.md` §7.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cdn_edge_error::{Code, Error};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Serialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    pub data: Value,
}

impl Envelope {
    pub fn ok(message: impl Into<String>, data: Value) -> Response {
        (
            StatusCode::OK,
            Json(Envelope {
                success: true,
                message: message.into(),
                data,
            }),
        )
            .into_response()
    }

    pub fn ok_with_status(status: StatusCode, message: impl Into<String>, data: Value) -> Response {
        (
            status,
            Json(Envelope {
                success: true,
                message: message.into(),
                data,
            }),
        )
            .into_response()
    }
}

/// Maps a `cdn_edge_error::Error` to an HTTP status + envelope body, per the
/// taxonomy in `spec.md` §7. `cancelled` is handled by the caller (no
/// response is written), never reaching this function.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match err.code {
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::AlreadyExists => StatusCode::BAD_REQUEST,
            Code::Unauthenticated => StatusCode::BAD_REQUEST, // preserved from source, spec.md §9 Q1
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Code::Cancelled => StatusCode::INTERNAL_SERVER_ERROR, // unreachable: see module doc
            Code::Internal | Code::Unknown | Code::Ok => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut data = json!({});
        if status == StatusCode::TOO_MANY_REQUESTS {
            data = json!({ "wait": "60s" });
        }
        (
            status,
            Json(Envelope {
                success: false,
                message: err.messages_joined(),
                data,
            }),
        )
            .into_response()
    }
}

/// `spec.md` §6's `DISABLE_GET`/`DISABLE_UPLOAD`/`DISABLE_DELETE` kill
/// switches swap the real route for this response at router build time,
/// rather than branching on a config flag inside every handler.
pub fn feature_disabled() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(Envelope {
            success: false,
            message: "this feature is disabled".to_string(),
            data: json!({}),
        }),
    )
        .into_response()
}

/// Like [`ApiError`] but carries an explicit `Retry-After` hint for a
/// rate-limited response (`spec.md` §8 scenario 3: `data.wait = "1m0s"`).
pub struct RateLimitedError {
    pub retry_after: std::time::Duration,
}

impl IntoResponse for RateLimitedError {
    fn into_response(self) -> Response {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(Envelope {
                success: false,
                message: "rate limit exceeded".to_string(),
                data: json!({ "wait": format_duration(self.retry_after) }),
            }),
        )
            .into_response()
    }
}

/// Formats a `Duration` the way Go's `time.Duration.String()` would for the
/// whole-minute/whole-second windows this service uses (`"1m0s"`, `"30s"`).
fn format_duration(d: std::time::Duration) -> String {
    let total_secs = d.as_secs();
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn formats_whole_minute_window() {
        assert_eq!(format_duration(std::time::Duration::from_secs(60)), "1m0s");
    }

    #[test]
    fn formats_sub_minute_window() {
        assert_eq!(format_duration(std::time::Duration::from_secs(30)), "30s");
    }
}
