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

//! Entry point: parses CLI args, loads and validates configuration, and runs
//! the service to completion. Per `spec.md` §4.11, everything past config
//! validation lives in `cdn_edge_service::lifecycle`; this binary is a thin
//! shell around it.

use std::path::PathBuf;
use std::process::ExitCode;

use cdn_edge_config::AppConfig;
use clap::Parser;

/// cdn-edge: an HTTP-fronted media CDN edge service.
#[derive(Parser, Debug)]
#[command(name = "cdn-edge", version)]
struct Args {
    /// Path to the `.env`-style file to load on startup and watch for reloads,
    /// matching the original project's `godotenv.Load()` default.
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(%err, "failed to start the tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "cdn-edge exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), cdn_edge_error::Error> {
    if args.env_file.is_file() {
        load_dotenv(&args.env_file)?;
    }

    let config = AppConfig::from_env()?;
    config.validate()?;
    let port = config.app.port;

    let state = cdn_edge_service::lifecycle::build_state(config).await?;

    // The config handle inside `state` owns the live snapshot from here on;
    // the watcher keeps it fresh without interrupting in-flight requests.
    state.config.watch(&args.env_file)?;

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    cdn_edge_service::lifecycle::serve(state, addr).await
}

/// Loads `path` into the process environment without overwriting variables
/// already set (e.g. by the surrounding container/orchestrator), mirroring
/// `godotenv.Load()`'s non-destructive default.
fn load_dotenv(path: &std::path::Path) -> Result<(), cdn_edge_error::Error> {
    use cdn_edge_error::{make_err, Code};
    let contents = std::fs::read_to_string(path)
        .map_err(|e| make_err!(Code::Internal, "failed to read {}: {e}", path.display()))?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if std::env::var(key).is_err() {
                let value = shellexpand::env(value.trim()).unwrap_or_default().into_owned();
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}
