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

//! Map widget painting a [`MapScene`] over a Web Mercator projection.

use airspace_client::render::{
    Camera, Color, Coord, Cursor, Feature, FeatureCollection, FillPaint, Geometry, HoverController, LayerKind,
    LinePaint, MapScene, Popup, SymbolPaint, DRONES_LAYER,
};
use airspace_client::Position;
use log::debug;

use crate::tiles::{visible_tiles, TileManager, ATTRIBUTION};

const TILE_SIZE: f64 = 256.0;
const MAX_LATITUDE: f64 = 85.051_128;
const SYMBOL_BASE_SIZE: f32 = 8.0;
const HIT_RADIUS: f32 = 12.0;

/// Web Mercator projection utilities
#[derive(Debug)]
pub struct WebMercator;

impl WebMercator {
    /// World pixel X for a longitude at a fractional zoom level
    pub fn lon_to_x(lon: f64, zoom: f64) -> f64 {
        (lon + 180.0) / 360.0 * world_size(zoom)
    }

    /// World pixel Y for a latitude at a fractional zoom level
    pub fn lat_to_y(lat: f64, zoom: f64) -> f64 {
        let lat_rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0;
        y * world_size(zoom)
    }

    /// Longitude for a world pixel X
    pub fn x_to_lon(x: f64, zoom: f64) -> f64 {
        x / world_size(zoom) * 360.0 - 180.0
    }

    /// Latitude for a world pixel Y
    pub fn y_to_lat(y: f64, zoom: f64) -> f64 {
        let n = std::f64::consts::PI * (1.0 - 2.0 * y / world_size(zoom));
        n.sinh().atan().to_degrees()
    }

    /// Ground resolution in meters per pixel
    pub fn meters_per_pixel(lat: f64, zoom: f64) -> f64 {
        156_543.033_92 * lat.to_radians().cos() / 2_f64.powf(zoom)
    }
}

fn world_size(zoom: f64) -> f64 {
    TILE_SIZE * 2_f64.powf(zoom)
}

/// Camera-to-screen transform for one frame.
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    center_x: f64,
    center_y: f64,
    zoom: f64,
    screen_center: egui::Pos2,
}

impl Projection {
    pub fn new(camera: &Camera, screen_center: egui::Pos2) -> Self {
        Self {
            center_x: WebMercator::lon_to_x(camera.center.lon, camera.zoom),
            center_y: WebMercator::lat_to_y(camera.center.lat, camera.zoom),
            zoom: camera.zoom,
            screen_center,
        }
    }

    #[allow(clippy::cast_possible_truncation, reason = "screen coordinates fit in f32")]
    pub fn to_screen(&self, coord: Coord) -> egui::Pos2 {
        let dx = WebMercator::lon_to_x(coord.lon, self.zoom) - self.center_x;
        let dy = WebMercator::lat_to_y(coord.lat, self.zoom) - self.center_y;
        self.screen_center + egui::vec2(dx as f32, dy as f32)
    }

    pub fn to_geo(&self, pos: egui::Pos2) -> Position {
        let offset = pos - self.screen_center;
        let x = self.center_x + f64::from(offset.x);
        let y = self.center_y + f64::from(offset.y);
        Position::new(WebMercator::x_to_lon(x, self.zoom), WebMercator::y_to_lat(y, self.zoom))
    }
}

/// Interactive map: basemap, pan, zoom, hover popups and click passthrough.
#[derive(Debug)]
pub struct MapView {
    tiles: TileManager,
    hover: HoverController,
}

impl MapView {
    pub fn new(tiles: TileManager) -> Self {
        Self {
            tiles,
            hover: HoverController::default(),
        }
    }

    /// Paint the scene. Returns the geographic position of a click, if any.
    pub fn show(&mut self, ui: &mut egui::Ui, scene: &mut MapScene) -> Option<Position> {
        let (response, painter) = ui.allocate_painter(
            egui::vec2(ui.available_width(), ui.available_height()),
            egui::Sense::click_and_drag(),
        );
        let rect = response.rect;
        painter.rect_filled(rect, 0.0, egui::Color32::from_rgb(232, 236, 240));

        if rect.width() > 0.0 && rect.height() > 0.0 {
            scene.mark_ready();
        }

        if response.hovered() {
            let (zoom_delta, scroll) = ui.ctx().input(|i| (i.zoom_delta(), i.smooth_scroll_delta.y));
            if (zoom_delta - 1.0).abs() > 0.001 {
                scene.camera_mut().zoom_by(f64::from(zoom_delta.log2()));
            } else if scroll.abs() > 0.0 {
                scene.camera_mut().zoom_by(f64::from(scroll) / 200.0);
            }
        }

        if response.dragged() {
            let projection = Projection::new(scene.camera(), rect.center());
            let center = projection.to_geo(rect.center() - response.drag_delta());
            scene.camera_mut().center = center;
        }

        self.paint_basemap(ui.ctx(), &painter, rect, scene.camera());

        let projection = Projection::new(scene.camera(), rect.center());
        for (layer, data) in scene.painted_layers() {
            match &layer.kind {
                LayerKind::Fill(paint) => paint_fills(&painter, &projection, paint, data),
                LayerKind::Line(paint) => paint_lines(&painter, &projection, paint, data),
                LayerKind::Symbol(paint) => paint_symbols(&painter, &projection, paint, data),
            }
        }

        self.update_hover(&response, &projection, scene);
        if let Some(popup) = self.hover.popup() {
            paint_popup(&painter, projection.to_screen(popup.coordinates), popup);
        }
        if self.hover.cursor() == Cursor::Pointer {
            ui.ctx().set_cursor_icon(egui::CursorIcon::PointingHand);
        }

        paint_scale_bar(&painter, rect, scene.camera());
        painter.text(
            rect.left_top() + egui::vec2(10.0, 10.0),
            egui::Align2::LEFT_TOP,
            "Drag to pan | Scroll or pinch to zoom",
            egui::FontId::proportional(12.0),
            egui::Color32::from_gray(60),
        );

        if response.clicked() {
            return response.interact_pointer_pos().map(|pos| projection.to_geo(pos));
        }
        None
    }

    fn paint_basemap(&self, ctx: &egui::Context, painter: &egui::Painter, rect: egui::Rect, camera: &Camera) {
        let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
        for (coord, tile_rect) in visible_tiles(camera, rect) {
            if let Some(texture) = self.tiles.get_tile(coord, ctx) {
                painter.image(texture.id(), tile_rect, uv, egui::Color32::WHITE);
            }
        }

        let (loading, failed) = self.tiles.progress();
        let note = if failed > 0 {
            format!("{ATTRIBUTION} | {failed} tiles failed")
        } else if loading > 0 {
            format!("{ATTRIBUTION} | loading tiles...")
        } else {
            ATTRIBUTION.to_string()
        };
        let galley = painter.layout_no_wrap(note, egui::FontId::proportional(10.0), egui::Color32::from_gray(60));
        let text_rect = egui::Align2::RIGHT_BOTTOM.anchor_size(rect.right_bottom() - egui::vec2(4.0, 4.0), galley.size());
        painter.rect_filled(text_rect.expand(2.0), 2.0, egui::Color32::from_white_alpha(200));
        painter.galley(text_rect.min, galley, egui::Color32::from_gray(60));
    }

    fn update_hover(&mut self, response: &egui::Response, projection: &Projection, scene: &MapScene) {
        let hit = response.hover_pos().and_then(|pointer| {
            let layer = scene.layer(DRONES_LAYER)?;
            let LayerKind::Symbol(paint) = &layer.kind else {
                return None;
            };
            let data = scene.source(&layer.source)?;
            hit_test(projection, data, pointer, HIT_RADIUS * paint.icon_size)
        });

        match hit {
            Some(feature) => self.hover.enter(feature),
            None if self.hover.popup().is_some() => self.hover.leave(),
            None => {}
        }
    }
}

/// Closest point feature within `radius` pixels of `pointer`.
pub fn hit_test<'a>(
    projection: &Projection,
    data: &'a FeatureCollection,
    pointer: egui::Pos2,
    radius: f32,
) -> Option<&'a Feature> {
    data.features
        .iter()
        .filter_map(|feature| {
            let distance = projection.to_screen(feature.point()?).distance(pointer);
            (distance <= radius).then_some((feature, distance))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(feature, _)| feature)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "opacity is clamped to 0..=1")]
fn to_color32(color: Color, opacity: f32) -> egui::Color32 {
    let alpha = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
    egui::Color32::from_rgba_unmultiplied(color.r, color.g, color.b, alpha)
}

fn polygons(geometry: &Geometry) -> Vec<&Vec<Vec<Coord>>> {
    match geometry {
        Geometry::Polygon { coordinates } => vec![coordinates],
        Geometry::MultiPolygon { coordinates } => coordinates.iter().collect(),
        _ => Vec::new(),
    }
}

fn screen_ring(projection: &Projection, ring: &[Coord]) -> Vec<egui::Pos2> {
    let mut points: Vec<_> = ring.iter().map(|c| projection.to_screen(*c)).collect();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

/// Triangulate a polygon (outer ring first, then holes) into a flat
/// vertex list and triangle indices into it.
pub fn triangulate(rings: &[Vec<egui::Pos2>]) -> (Vec<egui::Pos2>, Vec<u32>) {
    let mut vertices = Vec::new();
    let mut holes = Vec::new();
    for (i, ring) in rings.iter().enumerate() {
        if ring.len() < 3 {
            if i == 0 {
                return (Vec::new(), Vec::new());
            }
            continue;
        }
        if i > 0 {
            holes.push(vertices.len());
        }
        vertices.extend_from_slice(ring);
    }

    let data: Vec<f64> = vertices.iter().flat_map(|p| [f64::from(p.x), f64::from(p.y)]).collect();
    match earcutr::earcut(&data, &holes, 2) {
        Ok(indices) => {
            let indices = indices.into_iter().filter_map(|i| u32::try_from(i).ok()).collect();
            (vertices, indices)
        }
        Err(e) => {
            debug!("Skipping polygon that cannot be triangulated: {e:?}");
            (Vec::new(), Vec::new())
        }
    }
}

fn paint_fills(painter: &egui::Painter, projection: &Projection, paint: &FillPaint, data: &FeatureCollection) {
    for feature in &data.features {
        let Some(geometry) = &feature.geometry else {
            continue;
        };
        let style = paint.resolve(feature.properties());
        let color = to_color32(style.color, style.opacity);
        for polygon in polygons(geometry) {
            let rings: Vec<_> = polygon.iter().map(|ring| screen_ring(projection, ring)).collect();
            let (vertices, indices) = triangulate(&rings);
            if indices.is_empty() {
                continue;
            }

            let mut mesh = egui::Mesh::default();
            for vertex in vertices {
                mesh.colored_vertex(vertex, color);
            }
            mesh.indices = indices;
            painter.add(egui::Shape::mesh(mesh));
        }
    }
}

fn paint_lines(painter: &egui::Painter, projection: &Projection, paint: &LinePaint, data: &FeatureCollection) {
    for feature in &data.features {
        let Some(geometry) = &feature.geometry else {
            continue;
        };
        let style = paint.resolve(feature.properties());
        let stroke = egui::Stroke::new(style.width, to_color32(style.color, 1.0));

        let lines: Vec<Vec<egui::Pos2>> = match geometry {
            Geometry::LineString { coordinates } => {
                vec![coordinates.iter().map(|c| projection.to_screen(*c)).collect()]
            }
            Geometry::MultiLineString { coordinates } => coordinates
                .iter()
                .map(|line| line.iter().map(|c| projection.to_screen(*c)).collect())
                .collect(),
            Geometry::Polygon { .. } | Geometry::MultiPolygon { .. } => polygons(geometry)
                .into_iter()
                .flatten()
                .map(|ring| ring.iter().map(|c| projection.to_screen(*c)).collect())
                .collect(),
            Geometry::Point { .. } | Geometry::MultiPoint { .. } => Vec::new(),
        };

        for points in lines.into_iter().filter(|p| p.len() >= 2) {
            if style.dash.is_solid() {
                painter.add(egui::Shape::line(points, stroke));
            } else {
                painter.extend(egui::Shape::dashed_line(
                    &points,
                    stroke,
                    style.dash.on * style.width,
                    style.dash.off * style.width,
                ));
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, reason = "rotation angle fits in f32")]
fn paint_symbols(painter: &egui::Painter, projection: &Projection, paint: &SymbolPaint, data: &FeatureCollection) {
    let font = egui::FontId::proportional(paint.text_size);
    let halo = to_color32(paint.halo_color, 1.0);
    let text_color = to_color32(paint.text_color, 1.0);

    for feature in &data.features {
        let Some(coord) = feature.point() else {
            continue;
        };
        let style = paint.resolve(feature.properties());
        let pos = projection.to_screen(coord);
        if !painter.clip_rect().expand(50.0).contains(pos) {
            continue;
        }

        let size = SYMBOL_BASE_SIZE * style.icon_size;
        let (sin, cos) = (style.rotation_degrees.to_radians() as f32).sin_cos();
        let rotate = |x: f32, y: f32| pos + egui::vec2(x * cos - y * sin, x * sin + y * cos) * size;
        let arrow = vec![rotate(0.0, -1.0), rotate(0.7, 0.8), rotate(-0.7, 0.8)];
        painter.add(egui::Shape::convex_polygon(
            arrow,
            to_color32(style.icon_color, 1.0),
            egui::Stroke::new(1.0, egui::Color32::WHITE),
        ));

        if style.label.is_empty() {
            continue;
        }
        let label_pos = pos + egui::vec2(0.0, paint.label_offset * paint.text_size);
        for (dx, dy) in [(-1.0, 0.0), (1.0, 0.0), (0.0, -1.0), (0.0, 1.0)] {
            painter.text(
                label_pos + egui::vec2(dx, dy) * paint.halo_width,
                egui::Align2::CENTER_TOP,
                &style.label,
                font.clone(),
                halo,
            );
        }
        painter.text(label_pos, egui::Align2::CENTER_TOP, &style.label, font.clone(), text_color);
    }
}

fn paint_popup(painter: &egui::Painter, anchor: egui::Pos2, popup: &Popup) {
    let title_font = egui::FontId::proportional(13.0);
    let body_font = egui::FontId::proportional(11.0);
    let title = painter.layout_no_wrap(popup.drone_id.clone(), title_font, egui::Color32::BLACK);
    let body = painter.layout_no_wrap(popup.lines.join("\n"), body_font, egui::Color32::from_gray(70));

    let padding = egui::vec2(8.0, 6.0);
    let size = egui::vec2(
        title.size().x.max(body.size().x),
        title.size().y + 4.0 + body.size().y,
    ) + padding * 2.0;
    let box_rect = egui::Rect::from_min_size(anchor + egui::vec2(-size.x / 2.0, -size.y - 18.0), size);

    painter.rect_filled(box_rect, 4.0, egui::Color32::from_white_alpha(240));
    let title_height = title.size().y;
    painter.galley(box_rect.min + padding, title, egui::Color32::BLACK);
    painter.galley(
        box_rect.min + padding + egui::vec2(0.0, title_height + 4.0),
        body,
        egui::Color32::from_gray(70),
    );
}

#[allow(clippy::cast_possible_truncation, reason = "bar length is a few hundred pixels")]
fn paint_scale_bar(painter: &egui::Painter, rect: egui::Rect, camera: &Camera) {
    let meters_per_pixel = WebMercator::meters_per_pixel(camera.center.lat, camera.zoom);
    let (meters, label) = nice_scale(meters_per_pixel * 100.0);
    let width = (meters / meters_per_pixel) as f32;

    let origin = rect.left_bottom() + egui::vec2(12.0, -14.0);
    let stroke = egui::Stroke::new(2.0, egui::Color32::from_gray(40));
    painter.line_segment([origin, origin + egui::vec2(width, 0.0)], stroke);
    painter.line_segment([origin, origin + egui::vec2(0.0, -5.0)], stroke);
    painter.line_segment(
        [origin + egui::vec2(width, 0.0), origin + egui::vec2(width, -5.0)],
        stroke,
    );
    painter.text(
        origin + egui::vec2(width / 2.0, -6.0),
        egui::Align2::CENTER_BOTTOM,
        label,
        egui::FontId::proportional(10.0),
        egui::Color32::from_gray(40),
    );
}

/// Round a distance down to 1, 2 or 5 times a power of ten.
fn nice_scale(max_meters: f64) -> (f64, String) {
    let magnitude = 10_f64.powf(max_meters.max(1.0).log10().floor());
    let step = [5.0, 2.0, 1.0]
        .into_iter()
        .map(|f| f * magnitude)
        .find(|m| *m <= max_meters)
        .unwrap_or(magnitude);

    let label = if step >= 1000.0 {
        format!("{} km", step / 1000.0)
    } else {
        format!("{step} m")
    };
    (step, label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use airspace_client::render::{Properties, DEFAULT_CENTER};

    #[test]
    fn test_projection_center_maps_to_screen_center() {
        let camera = Camera::default();
        let projection = Projection::new(&camera, egui::pos2(400.0, 300.0));

        let pos = projection.to_screen(Coord::from(DEFAULT_CENTER));
        assert!((pos.x - 400.0).abs() < 0.01);
        assert!((pos.y - 300.0).abs() < 0.01);
    }

    #[test]
    fn test_projection_inverse() {
        let projection = Projection::new(&Camera::default(), egui::pos2(400.0, 300.0));
        let geo = projection.to_geo(egui::pos2(520.0, 180.0));
        let back = projection.to_screen(Coord::from(geo));

        assert!((back.x - 520.0).abs() < 0.01);
        assert!((back.y - 180.0).abs() < 0.01);
        assert!(geo.lon > DEFAULT_CENTER.lon);
        assert!(geo.lat > DEFAULT_CENTER.lat);
    }

    #[test]
    fn test_hit_test_picks_closest() {
        let projection = Projection::new(&Camera::default(), egui::pos2(0.0, 0.0));
        let near = projection.to_geo(egui::pos2(3.0, 0.0));
        let far = projection.to_geo(egui::pos2(8.0, 0.0));

        let point = |p: Position, id: &str| {
            let mut properties = Properties::new();
            properties.insert("id".into(), id.into());
            Feature::new(Geometry::Point { coordinates: Coord::from(p) }, properties)
        };
        let data = FeatureCollection::new(vec![point(far, "FAR"), point(near, "NEAR")]);

        let hit = hit_test(&projection, &data, egui::pos2(0.0, 0.0), 12.0).unwrap();
        assert_eq!(hit.property("id").and_then(serde_json::Value::as_str), Some("NEAR"));
        assert!(hit_test(&projection, &data, egui::pos2(100.0, 100.0), 12.0).is_none());
    }

    fn triangle_area(a: egui::Pos2, b: egui::Pos2, c: egui::Pos2) -> f32 {
        ((b - a).x * (c - a).y - (b - a).y * (c - a).x).abs() / 2.0
    }

    fn triangles(rings: &[Vec<egui::Pos2>]) -> Vec<[egui::Pos2; 3]> {
        let (vertices, indices) = triangulate(rings);
        indices
            .chunks(3)
            .map(|t| [vertices[t[0] as usize], vertices[t[1] as usize], vertices[t[2] as usize]])
            .collect()
    }

    fn centroid(t: &[egui::Pos2; 3]) -> egui::Pos2 {
        egui::pos2((t[0].x + t[1].x + t[2].x) / 3.0, (t[0].y + t[1].y + t[2].y) / 3.0)
    }

    #[test]
    fn test_triangulate_concave_ring() {
        // A fan from the first vertex would cover part of the notch
        let l_shape = vec![
            egui::pos2(2.0, 0.0),
            egui::pos2(2.0, 1.0),
            egui::pos2(1.0, 1.0),
            egui::pos2(1.0, 2.0),
            egui::pos2(0.0, 2.0),
            egui::pos2(0.0, 0.0),
        ];
        let tris = triangles(&[l_shape]);

        assert_eq!(tris.len(), 4);
        let area: f32 = tris.iter().map(|t| triangle_area(t[0], t[1], t[2])).sum();
        assert!((area - 3.0).abs() < 1e-4, "area {area}");
        for t in &tris {
            let c = centroid(t);
            assert!(!(c.x > 1.0 && c.y > 1.0), "triangle {t:?} covers the notch");
        }
    }

    #[test]
    fn test_triangulate_ring_with_hole() {
        let outer = vec![
            egui::pos2(0.0, 0.0),
            egui::pos2(4.0, 0.0),
            egui::pos2(4.0, 4.0),
            egui::pos2(0.0, 4.0),
        ];
        let hole = vec![
            egui::pos2(1.0, 1.0),
            egui::pos2(1.0, 3.0),
            egui::pos2(3.0, 3.0),
            egui::pos2(3.0, 1.0),
        ];
        let tris = triangles(&[outer, hole]);

        let area: f32 = tris.iter().map(|t| triangle_area(t[0], t[1], t[2])).sum();
        assert!((area - 12.0).abs() < 1e-4, "area {area}");
        for t in &tris {
            let c = centroid(t);
            assert!(!(c.x > 1.0 && c.x < 3.0 && c.y > 1.0 && c.y < 3.0), "triangle {t:?} fills the hole");
        }
    }

    #[test]
    fn test_triangulate_degenerate() {
        assert!(triangulate(&[vec![egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)]]).1.is_empty());
        assert!(triangulate(&[]).1.is_empty());
    }

    #[test]
    fn test_nice_scale() {
        assert_eq!(nice_scale(730.0), (500.0, "500 m".to_string()));
        assert_eq!(nice_scale(2_400.0), (2_000.0, "2 km".to_string()));
        assert_eq!(nice_scale(1_500.0), (1_000.0, "1 km".to_string()));
    }
}
