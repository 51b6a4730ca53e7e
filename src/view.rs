//! Materialization of the visible layer.
//!
//! A [`MaterializedView`] is produced whole by [`ViewMaterializer::rebuild`]
//! and swapped in by the store; nothing patches a live view in place, so
//! the visible list, coordinate list and marker layer always describe the
//! same features in the same order.

use std::collections::{BTreeMap, HashMap};

use geo::{BoundingRect, MultiPoint, Point, Rect, coord};
use tracing::{debug, info_span};

use crate::{
    assets::FigureAssets,
    filter::FilterRegistry,
    model::{Feature, FeatureId, ModelType},
    popup::{PopupContent, render_popup},
};

/// Viewport padding applied to each coordinate, away from zero.
pub const COORDINATE_PADDING: f64 = 10.0;

/// Two fixed marker variants, one per model type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Text,
    Figure,
}

impl From<ModelType> for MarkerKind {
    fn from(model: ModelType) -> Self {
        match model {
            ModelType::Text => MarkerKind::Text,
            ModelType::Figure => MarkerKind::Figure,
        }
    }
}

impl From<MarkerKind> for ModelType {
    fn from(kind: MarkerKind) -> Self {
        match kind {
            MarkerKind::Text => ModelType::Text,
            MarkerKind::Figure => ModelType::Figure,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Marker {
    pub feature: FeatureId,
    pub kind: MarkerKind,
    /// Unpadded location, x = longitude.
    pub position: Point<f64>,
    pub label: String,
    pub popup: PopupContent,
}

/// A group of nearby markers, by index into the owning [`ClusterGroup`].
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    pub center: Point<f64>,
    pub members: Vec<usize>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Clustering container: holds markers and groups them on a degree grid
/// whose cell shrinks as the zoom grows.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterGroup {
    radius: f64,
    markers: Vec<Marker>,
}

impl ClusterGroup {
    pub fn new(radius: f64) -> Self {
        Self { radius, markers: Vec::new() }
    }

    pub fn add_markers(&mut self, markers: impl IntoIterator<Item = Marker>) {
        self.markers.extend(markers);
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Groups markers into grid cells at `zoom`. Clusters come out in the
    /// order their first member was inserted.
    pub fn clusters(&self, zoom: f64) -> Vec<Cluster> {
        let cell = self.radius / zoom.max(f64::EPSILON);
        let mut slots: HashMap<(i64, i64), usize> = HashMap::new();
        let mut clusters: Vec<Cluster> = Vec::new();

        for (idx, marker) in self.markers.iter().enumerate() {
            let key = if cell > 0.0 {
                (
                    (marker.position.x() / cell).floor() as i64,
                    (marker.position.y() / cell).floor() as i64,
                )
            } else {
                (idx as i64, 0)
            };
            match slots.get(&key) {
                Some(&slot) => clusters[slot].members.push(idx),
                None => {
                    slots.insert(key, clusters.len());
                    clusters.push(Cluster { center: marker.position, members: vec![idx] });
                }
            }
        }

        for cluster in &mut clusters {
            let n = cluster.members.len() as f64;
            let (sx, sy) = cluster.members.iter().fold((0.0, 0.0), |(sx, sy), &i| {
                let p = self.markers[i].position;
                (sx + p.x(), sy + p.y())
            });
            cluster.center = Point::new(sx / n, sy / n);
        }
        clusters
    }
}

/// The rendered layer group. Holds at most one clustering container.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerGroup {
    group: Option<ClusterGroup>,
}

impl LayerGroup {
    pub fn insert(&mut self, group: ClusterGroup) {
        self.group = Some(group);
    }

    pub fn group(&self) -> Option<&ClusterGroup> {
        self.group.as_ref()
    }

    pub fn marker_count(&self) -> usize {
        self.group.as_ref().map_or(0, ClusterGroup::len)
    }
}

/// Visible features, their padded coordinates and the rendered layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterializedView {
    pub visible: Vec<FeatureId>,
    /// (latitude, longitude) pairs, padded; see [`padded_coordinate`].
    pub coordinates: Vec<(f64, f64)>,
    pub layer: LayerGroup,
}

impl MaterializedView {
    pub fn marker(&self, id: FeatureId) -> Option<&Marker> {
        self.layer
            .group()?
            .markers()
            .iter()
            .find(|m| m.feature == id)
    }

    /// Visible features per model type.
    pub fn model_type_counts(&self) -> BTreeMap<ModelType, usize> {
        let mut counts: BTreeMap<ModelType, usize> =
            ModelType::ALL.iter().map(|m| (*m, 0)).collect();
        if let Some(group) = self.layer.group() {
            for marker in group.markers() {
                *counts.entry(marker.kind.into()).or_default() += 1;
            }
        }
        counts
    }

    /// Bounds covering the coordinate list, clamped to the world.
    pub fn fit_bounds(&self) -> Rect<f64> {
        fit_bounds(&self.coordinates)
    }
}

/// Pads latitude and longitude by [`COORDINATE_PADDING`], away from zero.
pub fn padded_coordinate(feature: &Feature) -> (f64, f64) {
    let pad = |v: f64| if v < 0.0 { v - COORDINATE_PADDING } else { v + COORDINATE_PADDING };
    (pad(feature.location.lat), pad(feature.location.lon))
}

/// Bounding rectangle of `(lat, lon)` pairs in map space (x = lon), clamped
/// to [-180, 180] × [-90, 90]. An empty list gives the whole world.
pub fn fit_bounds(coordinates: &[(f64, f64)]) -> Rect<f64> {
    let world = Rect::new(coord! { x: -180.0, y: -90.0 }, coord! { x: 180.0, y: 90.0 });
    let points: MultiPoint<f64> = coordinates
        .iter()
        .map(|&(lat, lon)| Point::new(lon, lat))
        .collect();
    let Some(bounds) = points.bounding_rect() else {
        return world;
    };
    let clamp_x = |x: f64| x.clamp(-180.0, 180.0);
    let clamp_y = |y: f64| y.clamp(-90.0, 90.0);
    Rect::new(
        coord! { x: clamp_x(bounds.min().x), y: clamp_y(bounds.min().y) },
        coord! { x: clamp_x(bounds.max().x), y: clamp_y(bounds.max().y) },
    )
}

/// Builds fresh views from the feature store and the filter registry.
#[derive(Clone, Debug)]
pub struct ViewMaterializer {
    cluster_radius: f64,
}

impl ViewMaterializer {
    pub fn new(cluster_radius: f64) -> Self {
        Self { cluster_radius }
    }

    /// Evaluates every feature against `registry` and materializes the survivors,
    /// in store order.
    pub fn rebuild(
        &self,
        features: &[Feature],
        registry: &FilterRegistry,
        assets: &FigureAssets,
    ) -> MaterializedView {
        let _span = info_span!("rebuild", filters = registry.len()).entered();
        let view = self.materialize(features.iter().filter(|f| registry.evaluate(f)), assets);
        debug!(visible = view.visible.len(), total = features.len(), "view rebuilt");
        view
    }

    /// Zero-filter path: every feature is visible and every feature
    /// contributes to the coordinate list.
    pub fn reset(&self, features: &[Feature], assets: &FigureAssets) -> MaterializedView {
        let _span = info_span!("reset").entered();
        let mut view = self.materialize(features.iter(), assets);
        view.coordinates = features.iter().map(padded_coordinate).collect();
        view
    }

    fn materialize<'a>(
        &self,
        survivors: impl Iterator<Item = &'a Feature>,
        assets: &FigureAssets,
    ) -> MaterializedView {
        let mut view = MaterializedView::default();
        let mut markers = Vec::new();

        for feature in survivors {
            view.visible.push(feature.id);
            view.coordinates.push(padded_coordinate(feature));
            markers.push(Marker {
                feature: feature.id,
                kind: feature.model_type().into(),
                position: feature.location.point(),
                label: feature.location.name.clone(),
                popup: render_popup(feature, assets),
            });
        }

        let mut group = ClusterGroup::new(self.cluster_radius);
        group.add_markers(markers);
        view.layer.insert(group);
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterCategory, Predicate, tests::feature};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn store() -> Vec<Feature> {
        vec![
            feature(0, ModelType::Text, 5.0, 45.0, "runoff"),
            feature(1, ModelType::Figure, -120.0, -30.0, "snowmelt"),
            feature(2, ModelType::Text, 5.5, 45.5, "runoff"),
        ]
    }

    #[test]
    fn padding_moves_away_from_zero() {
        let f = feature(0, ModelType::Text, -3.0, 52.0, "runoff");
        assert_eq!(padded_coordinate(&f), (62.0, -13.0));
        let origin = feature(1, ModelType::Text, 0.0, 0.0, "runoff");
        assert_eq!(padded_coordinate(&origin), (10.0, 10.0));
    }

    #[test]
    fn rebuild_keeps_store_order_and_consistency() {
        let features = store();
        let mut registry = FilterRegistry::new();
        registry.add_or_replace(
            Predicate::ModelTypes(BTreeSet::from([ModelType::Text])),
            FilterCategory::ModelType,
        );

        let assets = FigureAssets::default();
        let view = ViewMaterializer::new(8.0).rebuild(&features, &registry, &assets);
        assert_eq!(view.visible, vec![FeatureId(0), FeatureId(2)]);
        assert_eq!(view.coordinates, vec![(55.0, 15.0), (55.5, 15.5)]);
        let ids: Vec<_> = view.layer.group().unwrap().markers().iter().map(|m| m.feature).collect();
        assert_eq!(ids, view.visible);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let features = store();
        let registry = FilterRegistry::new();
        let materializer = ViewMaterializer::new(8.0);
        let a = materializer.rebuild(&features, &registry, &FigureAssets::default());
        let b = materializer.rebuild(&features, &registry, &FigureAssets::default());
        assert_eq!(a, b);
    }

    #[test]
    fn reset_matches_unfiltered_rebuild() {
        let features = store();
        let materializer = ViewMaterializer::new(8.0);
        let reset = materializer.reset(&features, &FigureAssets::default());
        let assets = FigureAssets::default();
        let rebuilt = materializer.rebuild(&features, &FilterRegistry::new(), &assets);
        assert_eq!(reset, rebuilt);
        assert_eq!(reset.coordinates.len(), features.len());
    }

    #[test]
    fn nearby_markers_cluster_until_zoomed_in() {
        let features = store();
        let assets = FigureAssets::default();
        let view = ViewMaterializer::new(8.0).rebuild(&features, &FilterRegistry::new(), &assets);
        let group = view.layer.group().unwrap();

        let coarse = group.clusters(1.0);
        assert_eq!(coarse.len(), 2);
        assert_eq!(coarse[0].members, vec![0, 2]);
        assert_eq!(coarse[0].center, Point::new(5.25, 45.25));

        let fine = group.clusters(64.0);
        assert_eq!(fine.len(), 3);
    }

    #[test]
    fn model_type_counts_cover_every_type() {
        let features = store();
        let assets = FigureAssets::default();
        let view = ViewMaterializer::new(8.0).rebuild(&features, &FilterRegistry::new(), &assets);
        let counts = view.model_type_counts();
        assert_eq!(counts[&ModelType::Text], 2);
        assert_eq!(counts[&ModelType::Figure], 1);
        for model in ModelType::ALL {
            assert_eq!(ModelType::from(MarkerKind::from(model)), model);
        }
    }

    #[test]
    fn fit_bounds_clamps_and_defaults_to_world() {
        let world = fit_bounds(&[]);
        assert_eq!(world.min(), coord! { x: -180.0, y: -90.0 });

        let bounds = fit_bounds(&[(85.0, 175.0), (-20.0, 10.0)]);
        assert_eq!(bounds.min(), coord! { x: 10.0, y: -20.0 });
        assert_eq!(bounds.max(), coord! { x: 175.0, y: 85.0 });

        let clamped = fit_bounds(&[(95.0, 185.0), (0.0, 0.0)]);
        assert_eq!(clamped.max(), coord! { x: 180.0, y: 90.0 });
    }
}
