// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod app;
mod config;
mod map_view;
mod notifications;
mod snapshots;
mod tiles;

use app::AirspaceApp;
use clap::Parser;
use config::{AppConfig, ACCESS_TOKEN_ENV};
use log::{error, info, warn};
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Live drone airspace viewer
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Telemetry WebSocket URL (overrides the config file)
    #[arg(long)]
    stream_url: Option<String>,

    /// REST API base URL (overrides the config file)
    #[arg(long)]
    api_url: Option<String>,

    /// Bearer token; the environment variable wins over the config file
    #[arg(long, env = ACCESS_TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), eframe::Error> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    info!("Starting Airspace Monitor...");

    let config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });
    if let Ok(path) = AppConfig::get_config_path() {
        info!("Config file: {}", path.display());
    }
    let effective = config.with_overrides(args.stream_url, args.api_url);
    let token = effective.resolve_token(args.token);
    if token.is_none() {
        warn!("No access token configured; set {ACCESS_TOKEN_ENV} or access_token in the config file");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };
    let _guard = runtime.enter();

    let client = airspace_client::Client::connect_websocket(effective.client_config(token.clone()));
    let loader = snapshots::SnapshotLoader::spawn(&effective.api_base_url, token);
    info!("Streaming from {}", effective.stream_url);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 800.0])
            .with_title("Airspace Monitor"),
        ..Default::default()
    };

    eframe::run_native(
        "Airspace Monitor",
        options,
        Box::new(move |_cc| Ok(Box::new(AirspaceApp::new(config, client, loader)))),
    )
}
