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

//! Two-tier rate limiting (C8) applied as request middleware, per `spec.md`
//! §4.8/§6: a tighter limit on the upload-shaped routes, a looser global
//! limit everywhere else, `/health` and `/metrics` exempt.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::extract_bearer;
use crate::envelope::RateLimitedError;
use crate::state::AppState;

const UPLOAD_SHAPED_PATHS: &[&str] = &["/upload", "/upload-url", "/batch/upload", "/batch/delete"];

pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next<Body>,
) -> Result<Response, RateLimitedError> {
    let path = request.uri().path().to_string();
    if state.rate_limiter.is_exempt(&path) {
        return Ok(next.run(request).await);
    }

    let credential = extract_bearer(request.headers());
    let address = addr.ip().to_string();
    let outcome = if UPLOAD_SHAPED_PATHS.contains(&path.as_str()) {
        state.rate_limiter.check_upload(&address, credential).await
    } else {
        state.rate_limiter.check_global(&address, credential).await
    };

    match outcome {
        Ok(outcome) if outcome.allowed => Ok(next.run(request).await),
        Ok(outcome) => Err(RateLimitedError { retry_after: outcome.retry_after }),
        // A backend outage here must not take the whole service down with it;
        // the circuit breaker on the backing store is what actually guards
        // against a wedged Redis, so we fail open rather than fail closed.
        Err(err) => {
            tracing::warn!(%err, "rate limiter backend error, allowing request");
            Ok(next.run(request).await)
        }
    }
}
