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

//! Bearer-token authentication, per `spec.md` §6: the `Authorization: Bearer
//! <tok>` header is compared in constant time against the configured token.
//! A missing or mismatched credential maps to `Code::Unauthenticated`, which
//! the envelope layer renders as HTTP 400 (preserved from source, §9 Q1).

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use cdn_edge_error::{make_err, Code};

use crate::envelope::ApiError;
use crate::state::AppState;

/// Constant-time over the bytes actually compared; the length check itself
/// is not hidden, matching the common constant-time-compare idiom.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Middleware enforcing the bearer token on routes marked "yes" in the
/// `spec.md` §6 auth column. Exempt routes are simply not wrapped by this
/// layer in the router.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next<Body>,
) -> Result<Response, ApiError> {
    let token = &state.config.load().app.token;
    match extract_bearer(request.headers()) {
        Some(presented) if constant_time_eq(presented.as_bytes(), token.as_bytes()) => Ok(next.run(request).await),
        _ => Err(ApiError(make_err!(Code::Unauthenticated, "missing or invalid bearer token"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn equal_byte_strings_compare_equal() {
        assert!(constant_time_eq(b"secret", b"secret"));
    }

    #[test]
    fn different_lengths_compare_unequal() {
        assert!(!constant_time_eq(b"secret", b"secret2"));
    }

    #[test]
    fn different_bytes_compare_unequal() {
        assert!(!constant_time_eq(b"secret", b"secreT"));
    }

    #[test]
    fn extracts_token_from_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("abc123"));
    }

    #[test]
    fn missing_header_yields_none() {
        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }
}
