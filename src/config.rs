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

//! Application configuration management.
//!
//! Persistent settings are stored as TOML through `confy`. Command line
//! flags and the access token environment variable are layered on top when
//! the client configuration is built.

use std::time::Duration;

use airspace_client::render::{Camera, DEFAULT_CENTER, DEFAULT_ZOOM};
use airspace_client::{ClientConfig, ConnectionConfig, Position, ReconcilerConfig};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "airspace-monitor";
const CONFIG_NAME: &str = "config";

/// Environment variable holding the access token; wins over the config file.
pub const ACCESS_TOKEN_ENV: &str = "AIRSPACE_ACCESS_TOKEN";

pub const DEFAULT_STREAM_URL: &str = "ws://localhost:8000/ws/telemetry";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_TILE_URL: &str = "https://{s}.basemaps.cartocdn.com/rastertiles/voyager/{z}/{x}/{y}.png";

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Telemetry WebSocket endpoint
    #[serde(default = "default_stream_url")]
    pub stream_url: String,

    /// Base URL of the REST API serving zones and flight requests
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Bearer token (optional, env var takes precedence)
    #[serde(default)]
    pub access_token: Option<String>,

    /// Seconds to wait before reconnecting the stream
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Keep-alive ping interval; no pings when unset
    #[serde(default)]
    pub ping_interval_secs: Option<u64>,

    /// Drop drones silent for this long; drones are kept all session when unset
    #[serde(default)]
    pub drone_timeout_secs: Option<u64>,

    #[serde(default = "default_center_lon")]
    pub map_center_lon: f64,

    #[serde(default = "default_center_lat")]
    pub map_center_lat: f64,

    /// Initial map zoom level
    #[serde(default = "default_zoom")]
    pub default_zoom: f64,

    /// Basemap tile URL; `{s}` picks a subdomain a-d
    #[serde(default = "default_tile_url")]
    pub tile_url: String,

    /// Show a toast for every new violation
    #[serde(default = "default_true")]
    pub notify_violations: bool,

    /// Number of violations listed in the side panel
    #[serde(default = "default_recent_violation_limit")]
    pub recent_violation_limit: usize,
}

fn default_stream_url() -> String {
    DEFAULT_STREAM_URL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_center_lon() -> f64 {
    DEFAULT_CENTER.lon
}

fn default_center_lat() -> f64 {
    DEFAULT_CENTER.lat
}

fn default_zoom() -> f64 {
    DEFAULT_ZOOM
}

fn default_tile_url() -> String {
    DEFAULT_TILE_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_recent_violation_limit() -> usize {
    20
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            stream_url: default_stream_url(),
            api_base_url: default_api_base_url(),
            access_token: None,
            reconnect_delay_secs: default_reconnect_delay_secs(),
            ping_interval_secs: None,
            drone_timeout_secs: None,
            map_center_lon: default_center_lon(),
            map_center_lat: default_center_lat(),
            default_zoom: default_zoom(),
            tile_url: default_tile_url(),
            notify_violations: true,
            recent_violation_limit: default_recent_violation_limit(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults if missing
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// Resolve the access token: environment first, then the config file.
    /// Blank values count as unset.
    #[must_use]
    pub fn resolve_token(&self, env_token: Option<String>) -> Option<String> {
        env_token
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.access_token.clone().filter(|t| !t.trim().is_empty()))
    }

    /// Client configuration for the stream and reconciler.
    #[must_use]
    pub fn client_config(&self, token: Option<String>) -> ClientConfig {
        ClientConfig {
            connection: ConnectionConfig {
                url: self.stream_url.clone(),
                token,
                reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
                ping_interval: self.ping_interval_secs.filter(|s| *s > 0).map(Duration::from_secs),
                ..Default::default()
            },
            reconciler: ReconcilerConfig {
                drone_timeout: self.drone_timeout_secs.map(Duration::from_secs),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Copy with command line URL overrides applied. The result is for this
    /// run only and is never saved.
    #[must_use]
    pub fn with_overrides(&self, stream_url: Option<String>, api_base_url: Option<String>) -> Self {
        let mut effective = self.clone();
        if let Some(url) = stream_url {
            effective.stream_url = url;
        }
        if let Some(url) = api_base_url {
            effective.api_base_url = url;
        }
        effective
    }

    /// Initial map camera.
    #[must_use]
    pub fn camera(&self) -> Camera {
        Camera::new(Position::new(self.map_center_lon, self.map_center_lat), self.default_zoom)
    }

    /// Remember the camera so the next run opens where this one left off.
    pub fn set_camera(&mut self, camera: &Camera) {
        self.map_center_lon = camera.center.lon;
        self.map_center_lat = camera.center.lat;
        self.default_zoom = camera.zoom;
    }
}
