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

//! The HTTP-fronted request pipeline (C10) and process lifecycle (C11), per
//! `spec.md` §4.10/§4.11.

pub mod auth;
pub mod dimensions;
pub mod envelope;
pub mod handlers;
pub mod lifecycle;
pub mod rate_limit;
pub mod router;
pub mod state;
pub mod stats;

pub use state::AppState;
