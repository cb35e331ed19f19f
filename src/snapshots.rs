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

//! One-shot loading of no-fly zones and active flight paths.
//!
//! The API answers either with a GeoJSON FeatureCollection or with an array
//! of records whose geometry sits in one field (`area` for zones, `path` for
//! flight requests). Both are normalized to a [`FeatureCollection`].

use airspace_client::render::{Feature, FeatureCollection, Geometry};
use log::{info, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

const ZONES_PATH: &str = "/zones";
const ACTIVE_FLIGHTS_PATH: &str = "/flights/active";
const ZONE_GEOMETRY_FIELD: &str = "area";
const FLIGHT_GEOMETRY_FIELD: &str = "path";

/// Errors from fetching map snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: reqwest::StatusCode },

    #[error("unexpected response from {url}: {reason}")]
    Shape { url: String, reason: String },
}

/// Static map data for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapData {
    pub zones: FeatureCollection,
    pub paths: FeatureCollection,
}

/// Loading state shown by the viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Loading,
    Loaded,
    Failed(String),
}

/// Background fetch of zones and flight paths.
///
/// The result is delivered once through [`SnapshotLoader::poll`]. After
/// [`SnapshotLoader::cancel`] (or drop) a late response is discarded.
#[derive(Debug)]
pub struct SnapshotLoader {
    result_rx: Option<oneshot::Receiver<Result<MapData, SnapshotError>>>,
    cancel_token: CancellationToken,
}

impl SnapshotLoader {
    /// Start fetching. Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(api_base_url: &str, token: Option<String>) -> Self {
        let (result_tx, result_rx) = oneshot::channel();
        let cancel_token = CancellationToken::new();
        let task_cancel = cancel_token.clone();
        let base = api_base_url.trim_end_matches('/').to_string();

        tokio::spawn(async move {
            let http = reqwest::Client::new();
            let result = tokio::select! {
                () = task_cancel.cancelled() => return,
                result = load_map_data(&http, &base, token.as_deref()) => result,
            };

            if task_cancel.is_cancelled() || result_tx.send(result).is_err() {
                info!("Discarding map data fetched after teardown");
            }
        });

        Self {
            result_rx: Some(result_rx),
            cancel_token,
        }
    }

    /// Take the result if it has arrived. Yields it exactly once.
    pub fn poll(&mut self) -> Option<Result<MapData, SnapshotError>> {
        let rx = self.result_rx.as_mut()?;
        match rx.try_recv() {
            Ok(result) => {
                self.result_rx = None;
                Some(result)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.result_rx = None;
                None
            }
        }
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for SnapshotLoader {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn load_map_data(
    http: &reqwest::Client,
    base: &str,
    token: Option<&str>,
) -> Result<MapData, SnapshotError> {
    let zones_url = format!("{base}{ZONES_PATH}");
    let paths_url = format!("{base}{ACTIVE_FLIGHTS_PATH}");
    let (zones, paths) = tokio::try_join!(
        fetch_collection(http, &zones_url, token, ZONE_GEOMETRY_FIELD),
        fetch_collection(http, &paths_url, token, FLIGHT_GEOMETRY_FIELD),
    )?;

    info!("Loaded {} no-fly zones and {} flight paths", zones.len(), paths.len());
    Ok(MapData { zones, paths })
}

async fn fetch_collection(
    http: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    geometry_field: &str,
) -> Result<FeatureCollection, SnapshotError> {
    let mut request = http.get(url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(SnapshotError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let body: Value = response.json().await?;
    normalize(body, geometry_field).map_err(|reason| SnapshotError::Shape {
        url: url.to_string(),
        reason,
    })
}

/// Normalize a response body to a feature collection.
///
/// Records without a usable geometry are skipped.
pub fn normalize(body: Value, geometry_field: &str) -> Result<FeatureCollection, String> {
    if body.get("type").and_then(Value::as_str) == Some("FeatureCollection") {
        return serde_json::from_value(body).map_err(|e| e.to_string());
    }

    match body {
        Value::Array(records) => Ok(records
            .into_iter()
            .filter_map(|record| record_to_feature(record, geometry_field))
            .collect()),
        Value::Null => Ok(FeatureCollection::default()),
        other => Err(format!("expected a FeatureCollection or an array, got {}", kind_of(&other))),
    }
}

fn record_to_feature(record: Value, geometry_field: &str) -> Option<Feature> {
    let Value::Object(mut properties) = record else {
        warn!("Skipping non-object record");
        return None;
    };

    let geometry = match properties.remove(geometry_field).map(geometry_from_value) {
        Some(Ok(geometry)) => geometry,
        Some(Err(e)) => {
            warn!("Skipping record with invalid {geometry_field}: {e}");
            return None;
        }
        None => {
            warn!("Skipping record without {geometry_field}");
            return None;
        }
    };

    let id = properties.get("id").cloned();
    let mut feature = Feature::new(geometry, properties);
    feature.id = id;
    Some(feature)
}

// Geometry may arrive bare or wrapped in a Feature.
fn geometry_from_value(value: Value) -> Result<Geometry, serde_json::Error> {
    if value.get("type").and_then(Value::as_str) == Some("Feature") {
        let feature: Feature = serde_json::from_value(value)?;
        return feature
            .geometry
            .ok_or_else(|| serde::de::Error::custom("feature without geometry"));
    }
    serde_json::from_value(value)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
