use geo::{Area, Coord, Geometry, MultiPolygon, Polygon, Rect, coord};
use geojson::GeoJson;
use ratatui::layout::Rect as TuiRect;
use ratatui::style::Color;
use ratatui::symbols::Marker as Dots;
use ratatui::widgets::canvas::{Canvas, Circle, Line, Points, Rectangle};
use ratatui::widgets::{Block, Borders};
use ratatui::Frame;
use tracing::warn;

use crate::{
    model::FeatureId,
    view::{MarkerKind, MaterializedView},
};

const MAX_ZOOM: f64 = 256.0;

/// Visible window of the map: centre in degrees (x = longitude) and zoom.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub center: Coord<f64>,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { center: coord! { x: 0.0, y: 0.0 }, zoom: 1.0 }
    }
}

impl Viewport {
    pub fn x_bounds(&self) -> [f64; 2] {
        let half = 180.0 / self.zoom;
        [self.center.x - half, self.center.x + half]
    }

    pub fn y_bounds(&self) -> [f64; 2] {
        let half = 90.0 / self.zoom;
        [self.center.y - half, self.center.y + half]
    }

    /// Moves by a tenth of the visible span per step.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.center.x = (self.center.x + dx * 36.0 / self.zoom).clamp(-180.0, 180.0);
        self.center.y = (self.center.y + dy * 18.0 / self.zoom).clamp(-90.0, 90.0);
    }

    pub fn zoom_by(&mut self, factor: f64) {
        self.zoom = (self.zoom * factor).clamp(1.0, MAX_ZOOM);
    }

    /// Centres on `bounds` and picks the largest zoom that still shows all of it.
    pub fn fit(&mut self, bounds: Rect<f64>) {
        self.center = bounds.center();
        let zx = 360.0 / bounds.width().max(f64::EPSILON);
        let zy = 180.0 / bounds.height().max(f64::EPSILON);
        self.zoom = zx.min(zy).clamp(1.0, MAX_ZOOM);
    }
}

/// Everything the map panel shows besides the basemap.
pub struct MapOverlay<'a> {
    pub view: &'a MaterializedView,
    pub viewport: Viewport,
    pub rectangle: Option<Rect<f64>>,
    pub drawing_from: Option<Coord<f64>>,
    pub selected: Option<FeatureId>,
}

/// Basemap outlines and the marker layer drawn on top.
pub struct MapView {
    outlines: Vec<MultiPolygon<f64>>,
}

impl MapView {
    pub fn new(raw: Option<GeoJson>) -> Self {
        let mut outlines = Vec::new();

        if let Some(GeoJson::FeatureCollection(fc)) = raw {
            for feature in fc.features {
                let Some(gj) = feature.geometry else { continue };
                let geom: Geometry<f64> = match gj.value.try_into() {
                    Ok(geom) => geom,
                    Err(err) => {
                        warn!(%err, "skipping basemap geometry");
                        continue;
                    }
                };
                let mut mp = match geom {
                    Geometry::Polygon(p) => p.into(),
                    Geometry::MultiPolygon(m) => m,
                    _ => continue,
                };

                // Drop islands under a fifth of the largest part.
                if mp.0.len() > 1 {
                    let areas: Vec<f64> = mp.0.iter().map(|p| p.unsigned_area()).collect();
                    let threshold = areas.iter().cloned().fold(0.0, f64::max) * 0.20;
                    let kept: Vec<Polygon<f64>> = mp
                        .0
                        .into_iter()
                        .zip(areas)
                        .filter(|(_, area)| *area >= threshold)
                        .map(|(poly, _)| poly)
                        .collect();
                    mp = MultiPolygon(kept);
                }

                outlines.push(mp);
            }
        }

        Self { outlines }
    }

    pub fn outline_count(&self) -> usize {
        self.outlines.len()
    }

    pub fn render(&self, f: &mut Frame, area: TuiRect, title: &str, overlay: &MapOverlay) {
        let viewport = overlay.viewport;
        let clusters = overlay
            .view
            .layer
            .group()
            .map(|g| (g, g.clusters(viewport.zoom)));

        let canvas = Canvas::default()
            .block(Block::default().title(title.to_string()).borders(Borders::ALL))
            .marker(Dots::Braille)
            .x_bounds(viewport.x_bounds())
            .y_bounds(viewport.y_bounds())
            .paint(|ctx| {
                // 1) Basemap outlines
                for mp in &self.outlines {
                    for poly in &mp.0 {
                        let ring = &poly.exterior().0;
                        for window in ring.windows(2) {
                            let a = window[0];
                            let b = window[1];
                            let color = Color::DarkGray;
                            ctx.draw(&Line { x1: a.x, y1: a.y, x2: b.x, y2: b.y, color });
                        }
                    }
                }
                ctx.layer();

                // 2) Filter rectangle and the one being drawn
                if let Some(rect) = overlay.rectangle {
                    ctx.draw(&rectangle(rect, Color::Magenta));
                }
                if let Some(anchor) = overlay.drawing_from {
                    ctx.draw(&rectangle(Rect::new(anchor, viewport.center), Color::LightMagenta));
                }

                // 3) Markers and clusters
                if let Some((group, clusters)) = &clusters {
                    let markers = group.markers();
                    for cluster in clusters {
                        if cluster.len() == 1 {
                            let marker = &markers[cluster.members[0]];
                            let color = match marker.kind {
                                MarkerKind::Text => Color::Cyan,
                                MarkerKind::Figure => Color::Yellow,
                            };
                            let coords = [(marker.position.x(), marker.position.y())];
                            ctx.draw(&Points { coords: &coords, color });
                        } else {
                            let radius = (2.0 + cluster.len() as f64).sqrt() * 1.5 / viewport.zoom;
                            ctx.draw(&Circle {
                                x: cluster.center.x(),
                                y: cluster.center.y(),
                                radius,
                                color: Color::Green,
                            });
                            let (x, y) = (cluster.center.x(), cluster.center.y());
                            ctx.print(x, y, cluster.len().to_string());
                        }
                    }

                    // 4) Selected marker on top, in red
                    let selected =
                        overlay.selected.and_then(|id| markers.iter().find(|m| m.feature == id));
                    if let Some(marker) = selected {
                        ctx.draw(&Circle {
                            x: marker.position.x(),
                            y: marker.position.y(),
                            radius: 2.0 / viewport.zoom,
                            color: Color::Red,
                        });
                    }
                }

                ctx.print(viewport.center.x, viewport.center.y, "+");
            });
        f.render_widget(canvas, area);
    }
}

fn rectangle(rect: Rect<f64>, color: Color) -> Rectangle {
    Rectangle {
        x: rect.min().x,
        y: rect.min().y,
        width: rect.width(),
        height: rect.height(),
        color,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn fit_zooms_to_the_tighter_axis() {
        let mut viewport = Viewport::default();
        viewport.fit(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 36.0, y: 9.0 }));
        assert_eq!(viewport.center, coord! { x: 18.0, y: 4.5 });
        assert_eq!(viewport.zoom, 10.0);

        viewport.fit(Rect::new(coord! { x: -180.0, y: -90.0 }, coord! { x: 180.0, y: 90.0 }));
        assert_eq!(viewport.zoom, 1.0);
    }

    #[test]
    fn pan_and_zoom_stay_in_range() {
        let mut viewport = Viewport::default();
        viewport.zoom_by(0.5);
        assert_eq!(viewport.zoom, 1.0);
        viewport.pan(100.0, 0.0);
        assert_eq!(viewport.center.x, 180.0);
    }

    #[test]
    fn small_islands_are_dropped_from_the_basemap() {
        let raw = GeoJson::from_str(
            r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{},
            "geometry":{"type":"MultiPolygon","coordinates":[
                [[[0,0],[10,0],[10,10],[0,10],[0,0]]],
                [[[20,20],[21,20],[21,21],[20,21],[20,20]]]
            ]}}]}"#,
        )
        .unwrap();
        let map = MapView::new(Some(raw));
        assert_eq!(map.outline_count(), 1);
        assert_eq!(map.outlines[0].0.len(), 1);
    }
}
