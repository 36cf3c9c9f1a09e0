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

//! Route assembly, per `spec.md` §6's external-interface table.
//!
//! `/aws/...` and `/minio/...` are registered as two literal prefixes over
//! the same admin handlers rather than a dynamic `:store` segment — a
//! dynamic first segment there would collide with the top-level
//! `/:bucket/*key` object route (`handlers::admin`'s module doc has the
//! detail). Admin bucket-level and object-level routes are further split by
//! an `object` literal segment (`/aws/:bucket/object/*path`) so bucket
//! create/remove (no trailing segment) and object get/put/remove (wildcard
//! tail) never need a method-only distinction.
//!
//! `DISABLE_GET`/`DISABLE_UPLOAD`/`DISABLE_DELETE` (`spec.md` §6) are applied
//! by swapping in [`handlers::object::disabled`]/[`handlers::upload::disabled`]
//! at route-registration time rather than branching inside each handler —
//! axum panics on registering the same method+path twice, so the choice is
//! made once, here, per flag.
//!
//! Middleware order follows §4.10 exactly: `TraceLayer` → bearer-auth →
//! rate-limit → handler. Since a later `.route_layer`/`.layer` call always
//! wraps *outside* an earlier one, rate-limiting is attached to `public` and
//! `protected` individually (innermost) before `protected` gets its
//! auth `route_layer` (outermost for those routes) — attaching rate-limit
//! once on the merged router would run it before auth instead of after.
//!
//! Served with [`axum::Router::into_make_service_with_connect_info`] so the
//! rate limiter can read the caller's address.

use std::time::Duration;

use axum::middleware;
use axum::routing::{delete, get, post, MethodRouter};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, glacier, health, object, upload, ws};
use crate::state::AppState;
use crate::{auth, rate_limit};

/// `spec.md` §9 Open Question #3: the source's `BodyLimit` and
/// `ReadBufferSize` settings disagreed; we carry the larger of the two
/// forward rather than the more restrictive one.
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn admin_routes_under(prefix: &str) -> Router<AppState> {
    Router::new()
        .route(&format!("{prefix}/bucket-list"), get(admin::bucket_list))
        .route(&format!("{prefix}/:bucket/exists"), get(admin::bucket_exists))
        .route(
            &format!("{prefix}/:bucket"),
            post(admin::create_bucket).delete(admin::remove_bucket),
        )
        .route(
            &format!("{prefix}/:bucket/object/*path"),
            get(admin::get_object).post(admin::put_object).delete(admin::remove_object),
        )
}

fn glacier_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/aws/glacier/:vault/initiate-retrieval/:archive",
            post(glacier::initiate_retrieval),
        )
        .route("/aws/glacier/:vault/jobs/:job_id/status", get(glacier::job_status))
        .route(
            "/aws/glacier/:vault/jobs/:job_id/async-download",
            post(glacier::async_download),
        )
        .route(
            "/aws/glacier/downloads/:download_job_id/status",
            get(glacier::download_status),
        )
}

pub fn build(state: AppState) -> Router {
    let features = state.config.load().features;

    let get_object_route: MethodRouter<AppState> = if features.disable_get {
        get(object::disabled)
    } else {
        get(object::get_object)
    };
    let delete_object_route: MethodRouter<AppState> = if features.disable_delete {
        delete(object::disabled)
    } else {
        delete(object::delete_object)
    };
    let upload_route: MethodRouter<AppState> = if features.disable_upload {
        post(upload::disabled)
    } else {
        post(upload::upload)
    };
    let upload_url_route: MethodRouter<AppState> = if features.disable_upload {
        post(upload::disabled)
    } else {
        post(upload::upload_url)
    };
    let batch_upload_route: MethodRouter<AppState> = if features.disable_upload {
        post(upload::disabled)
    } else {
        post(upload::batch_upload)
    };
    let batch_delete_route: MethodRouter<AppState> = if features.disable_delete {
        delete(upload::disabled)
    } else {
        delete(upload::batch_delete)
    };

    let public = Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/ws", get(ws::ws_handler))
        .route("/resize", post(object::resize))
        .route("/:bucket/*key", get_object_route)
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit::rate_limit));

    let protected = Router::new()
        .route("/upload", upload_route)
        .route("/upload-url", upload_url_route)
        .route("/batch/upload", batch_upload_route)
        .route("/batch/delete", batch_delete_route)
        .route("/:bucket/*key", delete_object_route)
        .merge(admin_routes_under("/aws"))
        .merge(admin_routes_under("/minio"))
        .merge(glacier_routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit::rate_limit))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer));

    public
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                .layer(tower_http::timeout::TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .with_state(state)
}
