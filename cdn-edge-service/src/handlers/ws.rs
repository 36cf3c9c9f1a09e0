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

//! `GET /ws` — pushes a monitoring-stats snapshot every 5 seconds, grounded
//! on the original's `webSocketHandler.HandleWebSocket` (`handler/websocket.go`).

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;

use crate::state::AppState;
use crate::stats::WS_PUSH_INTERVAL;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| push_stats_loop(socket, state))
}

async fn push_stats_loop(mut socket: WebSocket, state: AppState) {
    loop {
        let snapshot = state.stats.snapshot(&state.metrics);
        let payload = match serde_json::to_string(&snapshot) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(%err, "failed to serialize stats snapshot");
                continue;
            }
        };
        if socket.send(Message::Text(payload)).await.is_err() {
            break;
        }
        tokio::time::sleep(WS_PUSH_INTERVAL).await;
    }
}
