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

//! `GET /health`, `GET /metrics`, `GET /ws` — none of these require a
//! bearer token (`spec.md` §6).

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::envelope::Envelope;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Response {
    let statuses = state.health_map().await;
    let all_healthy = statuses.iter().all(|s| s.healthy);
    let data: serde_json::Map<String, serde_json::Value> = statuses
        .into_iter()
        .map(|s| {
            (
                s.component,
                json!({ "healthy": s.healthy, "message": s.message }),
            )
        })
        .collect();
    let status = if all_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    Envelope::ok_with_status(status, "health", serde_json::Value::Object(data))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
        .into_response()
}
