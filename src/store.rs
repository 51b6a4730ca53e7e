//! The map store: feature set, active filters and the materialized view.
//!
//! Everything here runs on the UI thread. The only asynchronous step is the
//! dataset fetch, which is split into [`MapStore::begin_load`] and
//! [`MapStore::finish_load`] so the fetch itself can run elsewhere. A newer
//! load supersedes any older one still in flight.

use std::collections::BTreeSet;

use geo::Rect;
use tracing::{debug, info, info_span, warn};

use crate::{
    api::{FeatureSource, ProcessTaxonomyEntry, SpatialZoneEntry, TemporalZoneEntry},
    assets::FigureAssets,
    error::Result,
    filter::{FilterCategory, FilterRegistry, Predicate},
    model::{Feature, FeatureId, ModelType, ProcessTag, ZONE_SENTINEL, present},
    notify::{AlertSink, Notification},
    view::{MaterializedView, ViewMaterializer},
};

/// Identifies one dataset load. Only the latest ticket may complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(usize),
    Failed,
    Superseded,
}

/// Facet choices made in the filter panel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FacetSelections {
    pub model_types: BTreeSet<ModelType>,
    pub processes: BTreeSet<String>,
    pub spatial_zones: BTreeSet<String>,
    pub temporal_zones: BTreeSet<String>,
    pub search: String,
}

/// Values offered by the filter panel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FacetOptions {
    pub processes: Vec<ProcessTag>,
    pub spatial_zones: Vec<String>,
    pub temporal_zones: Vec<String>,
}

impl FacetOptions {
    /// Distinct values present in `features`, sorted, placeholders left out.
    pub fn from_features(features: &[Feature]) -> Self {
        let processes: BTreeSet<ProcessTag> =
            features.iter().flat_map(|f| f.processes.iter().cloned()).collect();
        let spatial: BTreeSet<&str> = features.iter().filter_map(Feature::spatial_zone).collect();
        let temporal: BTreeSet<&str> = features.iter().filter_map(Feature::temporal_zone).collect();
        Self {
            processes: processes.into_iter().collect(),
            spatial_zones: spatial.into_iter().map(str::to_string).collect(),
            temporal_zones: temporal.into_iter().map(str::to_string).collect(),
        }
    }

    /// Lists served by the taxonomy endpoints, in server order.
    pub fn from_api(
        processes: Vec<ProcessTaxonomyEntry>,
        spatial: Vec<SpatialZoneEntry>,
        temporal: Vec<TemporalZoneEntry>,
    ) -> Self {
        let zone = |v: Option<String>| present(v.as_deref(), ZONE_SENTINEL).map(str::to_string);
        Self {
            processes: processes
                .into_iter()
                .filter_map(|p| {
                    Some(ProcessTag {
                        process: p.process?,
                        identifier: p.identifier.unwrap_or_default(),
                    })
                })
                .collect(),
            spatial_zones: spatial.into_iter().filter_map(|z| zone(z.spatial_property)).collect(),
            temporal_zones: temporal
                .into_iter()
                .filter_map(|z| zone(z.temporal_property))
                .collect(),
        }
    }
}

pub struct MapStore {
    features: Vec<Feature>,
    loaded: bool,
    registry: FilterRegistry,
    selections: FacetSelections,
    facets: FacetOptions,
    facets_pinned: bool,
    assets: FigureAssets,
    materializer: ViewMaterializer,
    view: MaterializedView,
    generation: u64,
}

impl MapStore {
    pub fn new(assets: FigureAssets, cluster_radius: f64) -> Self {
        Self {
            features: Vec::new(),
            loaded: false,
            registry: FilterRegistry::new(),
            selections: FacetSelections::default(),
            facets: FacetOptions::default(),
            facets_pinned: false,
            assets,
            materializer: ViewMaterializer::new(cluster_radius),
            view: MaterializedView::default(),
            generation: 0,
        }
    }

    /// Starts a load, invalidating every earlier ticket.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.generation += 1;
        debug!(generation = self.generation, "load started");
        LoadTicket(self.generation)
    }

    /// Applies a fetch result. Stale tickets are ignored; a failure leaves
    /// the store as it was and raises one error alert.
    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<Feature>>,
        alerts: &mut dyn AlertSink,
    ) -> LoadOutcome {
        if ticket.0 != self.generation {
            debug!(ticket = ticket.0, current = self.generation, "discarding superseded load");
            return LoadOutcome::Superseded;
        }
        let _span = info_span!("load", generation = ticket.0).entered();

        match result {
            Ok(features) => {
                let count = features.len();
                self.features = features;
                self.loaded = true;
                if !self.facets_pinned {
                    self.facets = FacetOptions::from_features(&self.features);
                }
                self.rebuild();
                info!(features = count, visible = self.view.visible.len(), "dataset loaded");
                LoadOutcome::Loaded(count)
            }
            Err(err) => {
                warn!(%err, "dataset load failed");
                alerts.display(Notification::error(
                    "Error loading perceptual models",
                    err.to_string(),
                ));
                LoadOutcome::Failed
            }
        }
    }

    /// Fetches from `source` and applies the result.
    pub async fn load<S: FeatureSource>(
        &mut self,
        source: &S,
        alerts: &mut dyn AlertSink,
    ) -> LoadOutcome {
        let ticket = self.begin_load();
        let result = source.fetch_features().await;
        self.finish_load(ticket, result, alerts)
    }

    /// Recomputes the view from the registry as it stands now and swaps it in.
    pub fn rebuild(&mut self) {
        self.view = if self.registry.is_empty() {
            self.materializer.reset(&self.features, &self.assets)
        } else {
            self.materializer.rebuild(&self.features, &self.registry, &self.assets)
        };
    }

    /// Drops every filter and selection, then re-renders everything.
    pub fn reset(&mut self) {
        self.registry.clear();
        self.selections = FacetSelections::default();
        self.view = self.materializer.reset(&self.features, &self.assets);
    }

    /// Registers a predicate directly. Facet selections follow the registry.
    pub fn add_filter(&mut self, predicate: Predicate, category: FilterCategory) {
        self.registry.add_or_replace(predicate, category);
        self.sync_selections(category);
        self.rebuild();
    }

    pub fn remove_filter(&mut self, predicate: &Predicate) -> bool {
        let category = self
            .registry
            .iter()
            .find(|f| f.predicate == *predicate)
            .map(|f| f.category);
        let Some(category) = category else { return false };
        self.registry.remove(predicate);
        self.sync_selections(category);
        self.rebuild();
        true
    }

    /// Recomputes the selections of one facet from the predicates registered under it.
    fn sync_selections(&mut self, category: FilterCategory) {
        let registered: Vec<&Predicate> = self
            .registry
            .iter()
            .filter(|f| f.category == category)
            .map(|f| &f.predicate)
            .collect();
        match category {
            FilterCategory::ModelType => {
                self.selections.model_types = registered
                    .iter()
                    .filter_map(|p| match p {
                        Predicate::ModelTypes(types) => Some(types),
                        _ => None,
                    })
                    .flatten()
                    .copied()
                    .collect();
            }
            FilterCategory::Process => {
                self.selections.processes = registered
                    .iter()
                    .filter_map(|p| match p {
                        Predicate::Process(key) => Some(key.clone()),
                        _ => None,
                    })
                    .collect();
            }
            FilterCategory::SpatialZone => {
                self.selections.spatial_zones = registered
                    .iter()
                    .filter_map(|p| match p {
                        Predicate::SpatialZones(zones) => Some(zones),
                        _ => None,
                    })
                    .flatten()
                    .cloned()
                    .collect();
            }
            FilterCategory::TemporalZone => {
                self.selections.temporal_zones = registered
                    .iter()
                    .filter_map(|p| match p {
                        Predicate::TemporalZones(zones) => Some(zones),
                        _ => None,
                    })
                    .flatten()
                    .cloned()
                    .collect();
            }
            FilterCategory::Search => {
                self.selections.search = registered
                    .iter()
                    .find_map(|p| match p {
                        Predicate::Search(text) => Some(text.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
            }
            FilterCategory::Rectangle | FilterCategory::Generic => {}
        }
    }

    pub fn set_model_types(&mut self, types: BTreeSet<ModelType>) {
        self.registry.remove_category(FilterCategory::ModelType);
        if !types.is_empty() {
            self.registry
                .add_or_replace(Predicate::ModelTypes(types.clone()), FilterCategory::ModelType);
        }
        self.selections.model_types = types;
        self.rebuild();
    }

    pub fn toggle_model_type(&mut self, model: ModelType) {
        let mut types = self.selections.model_types.clone();
        if !types.remove(&model) {
            types.insert(model);
        }
        self.set_model_types(types);
    }

    /// Selects or deselects one process. Each selected process is its own filter.
    pub fn toggle_process(&mut self, key: &str) {
        let predicate = Predicate::Process(key.to_string());
        if self.selections.processes.remove(key) {
            self.registry.remove(&predicate);
        } else {
            self.selections.processes.insert(key.to_string());
            self.registry.add_or_replace(predicate, FilterCategory::Process);
        }
        self.rebuild();
    }

    pub fn set_spatial_zones(&mut self, zones: BTreeSet<String>) {
        self.registry.remove_category(FilterCategory::SpatialZone);
        if !zones.is_empty() {
            let predicate = Predicate::SpatialZones(zones.clone());
            self.registry.add_or_replace(predicate, FilterCategory::SpatialZone);
        }
        self.selections.spatial_zones = zones;
        self.rebuild();
    }

    pub fn toggle_spatial_zone(&mut self, zone: &str) {
        let mut zones = self.selections.spatial_zones.clone();
        if !zones.remove(zone) {
            zones.insert(zone.to_string());
        }
        self.set_spatial_zones(zones);
    }

    pub fn set_temporal_zones(&mut self, zones: BTreeSet<String>) {
        self.registry.remove_category(FilterCategory::TemporalZone);
        if !zones.is_empty() {
            let predicate = Predicate::TemporalZones(zones.clone());
            self.registry.add_or_replace(predicate, FilterCategory::TemporalZone);
        }
        self.selections.temporal_zones = zones;
        self.rebuild();
    }

    pub fn toggle_temporal_zone(&mut self, zone: &str) {
        let mut zones = self.selections.temporal_zones.clone();
        if !zones.remove(zone) {
            zones.insert(zone.to_string());
        }
        self.set_temporal_zones(zones);
    }

    /// Replaces the search filter; blank text removes it.
    pub fn set_search(&mut self, text: &str) {
        self.registry.remove_category(FilterCategory::Search);
        let text = text.trim();
        if !text.is_empty() {
            self.registry.add_or_replace(Predicate::search(text), FilterCategory::Search);
        }
        self.selections.search = text.to_string();
        self.rebuild();
    }

    pub fn set_rectangle(&mut self, rect: Rect<f64>) {
        self.add_filter(Predicate::Rectangle(rect), FilterCategory::Rectangle);
    }

    pub fn clear_rectangle(&mut self) {
        if self.registry.remove_category(FilterCategory::Rectangle) > 0 {
            self.rebuild();
        }
    }

    /// Resets every facet selection. A drawn rectangle survives.
    pub fn clear_all_filters(&mut self) {
        self.selections = FacetSelections::default();
        self.registry.clear_except_rectangle();
        self.rebuild();
    }

    /// Replaces the derived facet lists with ones from the API.
    pub fn pin_facets(&mut self, facets: FacetOptions) {
        self.facets = facets;
        self.facets_pinned = true;
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.features.get(id.0).filter(|f| f.id == id)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn selections(&self) -> &FacetSelections {
        &self.selections
    }

    pub fn facets(&self) -> &FacetOptions {
        &self.facets
    }

    pub fn view(&self) -> &MaterializedView {
        &self.view
    }

    pub fn visible(&self) -> &[FeatureId] {
        &self.view.visible
    }

    pub fn coordinates(&self) -> &[(f64, f64)] {
        &self.view.coordinates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::MapError, filter::tests::feature};
    use geo::coord;
    use pretty_assertions::assert_eq;

    fn loaded_store() -> MapStore {
        let mut store = MapStore::new(FigureAssets::default(), 8.0);
        let ticket = store.begin_load();
        let features = vec![
            feature(0, ModelType::Text, 5.0, 45.0, "runoff"),
            feature(1, ModelType::Figure, -120.0, -30.0, "snowmelt"),
            feature(2, ModelType::Text, 30.0, 10.0, "runoff"),
        ];
        let mut alerts = Vec::new();
        assert_eq!(store.finish_load(ticket, Ok(features), &mut alerts), LoadOutcome::Loaded(3));
        assert!(alerts.is_empty());
        store
    }

    #[test]
    fn superseded_loads_are_dropped() {
        let mut store = MapStore::new(FigureAssets::default(), 8.0);
        let first = store.begin_load();
        let second = store.begin_load();
        let mut alerts = Vec::new();

        let stale = vec![feature(0, ModelType::Text, 0.0, 0.0, "runoff")];
        let late = store.finish_load(first, Ok(stale), &mut alerts);
        assert_eq!(late, LoadOutcome::Superseded);
        assert!(store.features().is_empty());

        assert_eq!(store.finish_load(second, Ok(Vec::new()), &mut alerts), LoadOutcome::Loaded(0));
        assert!(store.is_loaded());
    }

    #[test]
    fn failed_reload_keeps_previous_view() {
        let mut store = loaded_store();
        let before = store.view().clone();
        let ticket = store.begin_load();
        let mut alerts = Vec::new();

        let outcome = store.finish_load(
            ticket,
            Err(MapError::Status { endpoint: "geojson".into(), status: 502 }),
            &mut alerts,
        );
        assert_eq!(outcome, LoadOutcome::Failed);
        assert_eq!(alerts.len(), 1);
        assert_eq!(store.features().len(), 3);
        assert_eq!(store.view(), &before);
    }

    #[test]
    fn toggling_a_process_twice_restores_the_view() {
        let mut store = loaded_store();
        store.toggle_process("SNOWMELT");
        assert_eq!(store.visible(), &[FeatureId(1)]);
        store.toggle_process("SNOWMELT");
        assert_eq!(store.visible().len(), 3);
        assert!(store.registry().is_empty());
    }

    #[test]
    fn facet_selections_compile_into_one_filter_each() {
        let mut store = loaded_store();
        store.toggle_model_type(ModelType::Text);
        store.toggle_model_type(ModelType::Figure);
        assert_eq!(store.registry().count(FilterCategory::ModelType), 1);
        assert_eq!(store.visible().len(), 3);

        store.toggle_model_type(ModelType::Text);
        assert_eq!(store.visible(), &[FeatureId(1)]);
    }

    #[test]
    fn direct_filter_calls_keep_facet_selections_in_step() {
        let mut store = loaded_store();
        store.toggle_process("RUNOFF");
        assert!(store.selections().processes.contains("RUNOFF"));

        assert!(store.remove_filter(&Predicate::Process("RUNOFF".into())));
        assert!(store.selections().processes.is_empty());
        assert!(!store.remove_filter(&Predicate::Process("RUNOFF".into())));

        let zones = BTreeSet::from(["Hillslope".to_string()]);
        store.add_filter(Predicate::SpatialZones(zones.clone()), FilterCategory::SpatialZone);
        assert_eq!(store.selections().spatial_zones, zones);

        let figures = BTreeSet::from([ModelType::Figure]);
        store.add_filter(Predicate::ModelTypes(figures.clone()), FilterCategory::ModelType);
        assert_eq!(store.selections().model_types, figures);
        assert!(store.remove_filter(&Predicate::SpatialZones(zones)));
        assert!(store.selections().spatial_zones.is_empty());
    }

    #[test]
    fn search_is_case_insensitive_and_blank_clears() {
        let mut store = loaded_store();
        store.set_search("SITE 2");
        assert_eq!(store.visible(), &[FeatureId(2)]);
        store.set_search("   ");
        assert!(store.registry().is_empty());
        assert_eq!(store.visible().len(), 3);
    }

    #[test]
    fn clear_all_keeps_rectangle() {
        let mut store = loaded_store();
        store.set_search("site");
        store.set_rectangle(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 40.0, y: 50.0 }));
        assert_eq!(store.visible(), &[FeatureId(0), FeatureId(2)]);

        store.clear_all_filters();
        assert_eq!(store.selections(), &FacetSelections::default());
        assert_eq!(store.registry().len(), 1);
        assert_eq!(store.visible(), &[FeatureId(0), FeatureId(2)]);

        store.clear_rectangle();
        assert_eq!(store.visible().len(), 3);
    }

    #[test]
    fn api_facets_drop_placeholders() {
        let facets = FacetOptions::from_api(
            vec![ProcessTaxonomyEntry {
                id: 1,
                process: Some("Baseflow".into()),
                identifier: Some("BF".into()),
            }],
            vec![
                SpatialZoneEntry { id: 1, spatial_property: Some("N".into()) },
                SpatialZoneEntry { id: 2, spatial_property: Some("Hillslope".into()) },
            ],
            vec![TemporalZoneEntry { id: 1, temporal_property: None }],
        );
        assert_eq!(facets.spatial_zones, vec!["Hillslope".to_string()]);
        assert!(facets.temporal_zones.is_empty());
        assert_eq!(facets.processes[0].identifier, "BF");
    }

    #[test]
    fn facets_derive_from_features_unless_pinned() {
        let store = loaded_store();
        let names: Vec<_> = store.facets().processes.iter().map(|p| p.process.as_str()).collect();
        assert_eq!(names, vec!["runoff", "snowmelt"]);
        assert!(store.facets().spatial_zones.is_empty());

        let mut store = MapStore::new(FigureAssets::default(), 8.0);
        let riparian = vec!["Riparian".to_string()];
        store.pin_facets(FacetOptions { spatial_zones: riparian, ..FacetOptions::default() });
        let ticket = store.begin_load();
        let features = vec![feature(0, ModelType::Text, 0.0, 0.0, "runoff")];
        store.finish_load(ticket, Ok(features), &mut Vec::new());
        assert_eq!(store.facets().spatial_zones, vec!["Riparian".to_string()]);
    }
}
