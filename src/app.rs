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

//! Main viewer window.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use airspace_client::render::{drone_features, ensure_layer, Category, FeatureCollection, MapScene, RenderSurface};
use airspace_client::{AirspaceState, Client, ConnectionState, Position};
use log::{error, info, warn};

use crate::config::AppConfig;
use crate::map_view::MapView;
use crate::notifications::{ViolationNotifier, TOAST_TITLE};
use crate::snapshots::{LoadState, SnapshotLoader};
use crate::tiles::TileManager;

const DANGER: egui::Color32 = egui::Color32::from_rgb(0xFF, 0x5F, 0x57);
const SUCCESS: egui::Color32 = egui::Color32::from_rgb(0x28, 0xA7, 0x45);
const MUTED: egui::Color32 = egui::Color32::from_rgb(120, 120, 120);

/// Layer data waiting for the surface to become ready.
///
/// Only the newest data per category is kept.
#[derive(Debug, Default)]
pub struct LayerSync {
    pending: BTreeMap<u8, (Category, FeatureCollection)>,
}

impl LayerSync {
    pub fn queue(&mut self, category: Category, data: FeatureCollection) {
        self.pending.insert(category_order(category), (category, data));
    }

    /// Push queued data to the surface once it is ready.
    pub fn flush<S: RenderSurface + ?Sized>(&mut self, surface: &mut S) {
        if !surface.is_ready() {
            return;
        }
        for (_, (category, data)) in std::mem::take(&mut self.pending) {
            ensure_layer(surface, category, data);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// Zones below paths below drones.
fn category_order(category: Category) -> u8 {
    match category {
        Category::Zones => 0,
        Category::Paths => 1,
        Category::Drones => 2,
    }
}

pub fn status_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Connecting => "connecting",
        ConnectionState::Open => "live",
        ConnectionState::Closed => "reconnecting",
    }
}

pub struct AirspaceApp {
    config: AppConfig,
    client: Client,
    loader: SnapshotLoader,
    load_state: LoadState,
    scene: MapScene,
    map_view: MapView,
    layers: LayerSync,
    snapshot: Arc<AirspaceState>,
    notifier: ViolationNotifier,
    last_click: Option<Position>,
}

impl std::fmt::Debug for AirspaceApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirspaceApp")
            .field("client", &self.client)
            .field("load_state", &self.load_state)
            .finish_non_exhaustive()
    }
}

impl AirspaceApp {
    pub fn new(config: AppConfig, client: Client, loader: SnapshotLoader) -> Self {
        let scene = MapScene::new(config.camera());
        let tiles = TileManager::new(config.tile_url.clone());
        let snapshot = client.snapshot();

        Self {
            config,
            client,
            loader,
            load_state: LoadState::Loading,
            scene,
            map_view: MapView::new(tiles),
            layers: LayerSync::default(),
            snapshot,
            notifier: ViolationNotifier::new(),
            last_click: None,
        }
    }

    fn sync(&mut self) {
        if let Some(result) = self.loader.poll() {
            match result {
                Ok(data) => {
                    self.layers.queue(Category::Zones, data.zones);
                    self.layers.queue(Category::Paths, data.paths);
                    self.load_state = LoadState::Loaded;
                }
                Err(e) => {
                    error!("Failed to load map data: {e}");
                    self.load_state = LoadState::Failed(e.to_string());
                }
            }
        }

        let snapshot = self.client.snapshot();
        if !Arc::ptr_eq(&snapshot, &self.snapshot) {
            self.layers.queue(Category::Drones, drone_features(&snapshot));
            if self.config.notify_violations {
                self.notifier.observe(&snapshot, Instant::now());
            }
            self.snapshot = snapshot;
        }

        self.layers.flush(&mut self.scene);
    }

    fn draw_drone_list(&mut self, ui: &mut egui::Ui) {
        ui.heading("Active Drones");
        ui.add_space(4.0);

        let drones = self.snapshot.drones_sorted();
        if drones.is_empty() {
            ui.label(egui::RichText::new("No active drones").color(MUTED));
            return;
        }

        let mut focus = None;
        egui::ScrollArea::vertical()
            .id_salt("drone_list")
            .max_height(ui.available_height() / 2.0)
            .show(ui, |ui| {
                for drone in drones {
                    let response = egui::Frame::group(ui.style())
                        .show(ui, |ui| {
                            ui.set_width(ui.available_width());
                            ui.horizontal(|ui| {
                                let dot = if drone.has_violation { DANGER } else { SUCCESS };
                                ui.label(egui::RichText::new("●").color(dot));
                                ui.label(egui::RichText::new(&drone.id).strong());
                                if let Some(battery) = drone.battery_level {
                                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                                        ui.label(egui::RichText::new(format!("{battery:.0}%")).color(MUTED).small());
                                    });
                                }
                            });
                            let small = |text: String| egui::RichText::new(text).color(MUTED).small();
                            ui.label(small(format!("Altitude: {}m", fmt_number(drone.altitude))));
                            ui.label(small(format!("Speed: {}m/s", fmt_number(drone.speed))));
                            ui.label(small(format!("Status: {}", drone.status_label())));
                        })
                        .response
                        .interact(egui::Sense::click());

                    if response.clicked() {
                        focus = drone.location;
                    }
                    ui.add_space(2.0);
                }
            });

        if let Some(location) = focus {
            self.scene.camera_mut().center = location;
        }
    }

    fn draw_violation_list(&self, ui: &mut egui::Ui) {
        let count = self.snapshot.violations().len();
        ui.horizontal(|ui| {
            ui.heading("Recent Violations");
            if count > 0 {
                egui::Frame::NONE
                    .fill(DANGER)
                    .corner_radius(8.0)
                    .inner_margin(egui::Margin::symmetric(6, 1))
                    .show(ui, |ui| {
                        ui.label(egui::RichText::new(count.to_string()).color(egui::Color32::WHITE).small());
                    });
            }
        });
        ui.add_space(4.0);

        if count == 0 {
            ui.label(egui::RichText::new("No violations").color(MUTED));
            return;
        }

        egui::ScrollArea::vertical().id_salt("violation_list").show(ui, |ui| {
            for violation in self.snapshot.recent_violations(self.config.recent_violation_limit) {
                egui::Frame::group(ui.style())
                    .fill(egui::Color32::from_rgba_unmultiplied(0xFF, 0x5F, 0x57, 24))
                    .show(ui, |ui| {
                        ui.set_width(ui.available_width());
                        ui.horizontal(|ui| {
                            ui.label(egui::RichText::new(&violation.drone_id).strong());
                            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                                let local = violation.created_at.with_timezone(&chrono::Local);
                                ui.label(egui::RichText::new(local.format("%H:%M:%S").to_string()).color(MUTED).small());
                            });
                        });
                        ui.label(format!("{}: {}", violation.kind_label(), violation.description));
                    });
                ui.add_space(2.0);
            }
        });
    }

    fn draw_status_bar(&self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let state = self.client.connection_state();
            let color = match state {
                ConnectionState::Open => SUCCESS,
                ConnectionState::Connecting => MUTED,
                ConnectionState::Closed => DANGER,
            };
            ui.label(egui::RichText::new("●").color(color));
            ui.label(format!("Stream: {}", status_label(state)));
            ui.separator();

            match &self.load_state {
                LoadState::Loading => {
                    ui.spinner();
                    ui.label("Loading zones and flight paths...");
                }
                LoadState::Loaded => {
                    ui.label("Map data loaded");
                }
                LoadState::Failed(message) => {
                    ui.label(egui::RichText::new(format!("Map data unavailable: {message}")).color(DANGER));
                }
            }
            ui.separator();
            ui.label(format!(
                "{} drones, {} violations",
                self.snapshot.drone_count(),
                self.snapshot.violations().len()
            ));

            if let Some(click) = self.last_click {
                ui.separator();
                ui.label(egui::RichText::new(format!("{:.5}, {:.5}", click.lat, click.lon)).monospace());
            }
        });
    }

    fn draw_toasts(&mut self, ctx: &egui::Context) {
        let now = Instant::now();
        let toasts: Vec<String> = self.notifier.active(now).map(|t| t.message.clone()).collect();
        if toasts.is_empty() {
            return;
        }

        egui::Area::new(egui::Id::new("violation_toasts"))
            .anchor(egui::Align2::LEFT_TOP, egui::vec2(12.0, 36.0))
            .show(ctx, |ui| {
                for message in toasts {
                    egui::Frame::popup(ui.style()).show(ui, |ui| {
                        ui.label(egui::RichText::new(TOAST_TITLE).color(DANGER).strong());
                        ui.label(message);
                    });
                    ui.add_space(4.0);
                }
            });
        ctx.request_repaint_after(Duration::from_millis(250));
    }
}

impl eframe::App for AirspaceApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.sync();
        ctx.request_repaint_after(Duration::from_millis(200));

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| self.draw_status_bar(ui));

        egui::SidePanel::right("sidebar")
            .default_width(320.0)
            .resizable(true)
            .show(ctx, |ui| {
                self.draw_drone_list(ui);
                ui.separator();
                self.draw_violation_list(ui);
            });

        egui::CentralPanel::default().frame(egui::Frame::NONE).show(ctx, |ui| {
            if let Some(click) = self.map_view.show(ui, &mut self.scene) {
                info!("Map clicked at {:.5}, {:.5}", click.lat, click.lon);
                self.last_click = Some(click);
            }
        });

        // The scene may have become ready while painting
        if !self.layers.is_empty() {
            self.layers.flush(&mut self.scene);
            ctx.request_repaint();
        }

        self.draw_toasts(ctx);
    }
}

impl Drop for AirspaceApp {
    fn drop(&mut self) {
        self.client.close();
        self.loader.cancel();

        self.config.set_camera(self.scene.camera());
        if let Err(e) = self.config.save() {
            warn!("Failed to save map position: {e}");
        }
    }
}

fn fmt_number(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.0}"))
}
