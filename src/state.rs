use std::{fs, path::PathBuf};

use crossterm::event::KeyCode;
use geo::{Coord, Rect, coord};
use tokio::{
    runtime::Handle,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    analytics::{Tracker, record_click},
    api::{ApiClient, FeatureSource, LocalDataset},
    auth::{AuthSession, LoginOutcome, log_in, log_out},
    error::Result,
    map_draw::{MapView, Viewport},
    model::{Feature, FeatureId, ModelType},
    notify::{AlertQueue, AlertSink, Notification},
    store::{FacetOptions, LoadOutcome, LoadTicket, MapStore},
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Panel {
    Left,
    Center,
    Right,
}

/// Which facet list the left panel shows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FacetTab {
    ModelType,
    Process,
    SpatialZone,
    TemporalZone,
}

impl FacetTab {
    pub fn title(self) -> &'static str {
        match self {
            FacetTab::ModelType => "Model type",
            FacetTab::Process => "Process",
            FacetTab::SpatialZone => "Spatial zone",
            FacetTab::TemporalZone => "Temporal zone",
        }
    }

    fn next(self) -> Self {
        match self {
            FacetTab::ModelType => FacetTab::Process,
            FacetTab::Process => FacetTab::SpatialZone,
            FacetTab::SpatialZone => FacetTab::TemporalZone,
            FacetTab::TemporalZone => FacetTab::ModelType,
        }
    }

    fn prev(self) -> Self {
        match self {
            FacetTab::ModelType => FacetTab::TemporalZone,
            FacetTab::Process => FacetTab::ModelType,
            FacetTab::SpatialZone => FacetTab::Process,
            FacetTab::TemporalZone => FacetTab::SpatialZone,
        }
    }
}

/// One row of the facet list.
#[derive(Clone, Debug, PartialEq)]
pub struct FacetEntry {
    pub label: String,
    pub key: String,
    pub selected: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub on_password: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InputMode {
    Normal,
    Search(String),
    Login(LoginForm),
}

/// Results delivered from background tasks to the UI thread.
#[derive(Debug)]
pub enum AppEvent {
    Loaded(LoadTicket, Result<Vec<Feature>>),
    Facets(FacetOptions),
    LoggedIn(LoginOutcome),
    Notice(Notification),
}

/// Where the dataset is read from.
#[derive(Clone, Debug)]
pub enum DatasetSource {
    Api(ApiClient),
    Local(LocalDataset),
}

impl FeatureSource for DatasetSource {
    async fn fetch_features(&self) -> Result<Vec<Feature>> {
        match self {
            DatasetSource::Api(api) => api.fetch_features().await,
            DatasetSource::Local(local) => local.fetch_features().await,
        }
    }
}

/// Exported pages look for mapped figures next to themselves.
const FIGURE_BASE: &str = "figures/";

pub struct AppState {
    pub store: MapStore,
    pub map: MapView,
    pub viewport: Viewport,
    pub drawing_from: Option<Coord<f64>>,
    pub selected: Option<FeatureId>,
    pub alerts: AlertQueue,
    pub session: AuthSession,
    pub active_panel: Panel,
    pub facet_tab: FacetTab,
    pub facet_cursor: usize,
    pub mode: InputMode,
    pub export_dir: PathBuf,
    api: ApiClient,
    source: DatasetSource,
    tracker: Box<dyn Tracker>,
    runtime: Handle,
    events_tx: UnboundedSender<AppEvent>,
    events_rx: UnboundedReceiver<AppEvent>,
    inflight_load: Option<JoinHandle<()>>,
}

impl AppState {
    pub const HELP_TEXT: &'static str = "\
Tab: next panel   q: quit
Filters: ←/→ facet, ↑/↓ move, Space toggle
Map: arrows pan, +/- zoom, f fit, Enter open
     r draw rectangle, x clear rectangle
Details: ↑/↓ cycle, e export HTML
/: search   c: clear filters   R: reload
l: log in   o: log out   Esc: dismiss";

    pub fn new(
        store: MapStore,
        map: MapView,
        api: ApiClient,
        source: DatasetSource,
        tracker: Box<dyn Tracker>,
        runtime: Handle,
    ) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        Self {
            store,
            map,
            viewport: Viewport::default(),
            drawing_from: None,
            selected: None,
            alerts: AlertQueue::new(),
            session: AuthSession::default(),
            active_panel: Panel::Left,
            facet_tab: FacetTab::ModelType,
            facet_cursor: 0,
            mode: InputMode::Normal,
            export_dir: PathBuf::from("."),
            api,
            source,
            tracker,
            runtime,
            events_tx,
            events_rx,
            inflight_load: None,
        }
    }

    /// Starts a dataset fetch, aborting any fetch still running.
    pub fn reload(&mut self) {
        if let Some(handle) = self.inflight_load.take() {
            handle.abort();
            debug!("aborted in-flight load");
        }
        let ticket = self.store.begin_load();
        let source = self.source.clone();
        let tx = self.events_tx.clone();
        self.inflight_load = Some(self.runtime.spawn(async move {
            let result = source.fetch_features().await;
            // The receiver only goes away on shutdown.
            let _ = tx.send(AppEvent::Loaded(ticket, result));
        }));
    }

    /// Fetches the facet lists from the API; on failure the lists derived
    /// from the dataset stay in place.
    pub fn refresh_facets(&self) {
        if !matches!(self.source, DatasetSource::Api(_)) {
            return;
        }
        let api = self.api.clone();
        let tx = self.events_tx.clone();
        self.runtime.spawn(async move {
            let lists = tokio::try_join!(
                api.process_taxonomies(),
                api.spatial_zones(),
                api.temporal_zones()
            );
            match lists {
                Ok((processes, spatial, temporal)) => {
                    let facets = FacetOptions::from_api(processes, spatial, temporal);
                    let _ = tx.send(AppEvent::Facets(facets));
                }
                Err(err) => warn!(%err, "facet lists unavailable, deriving from dataset"),
            }
            match api.perceptual_models().await {
                Ok(models) => info!(models = models.len(), "server model list"),
                Err(err) => debug!(%err, "model list unavailable"),
            }
        });
    }

    /// Applies every result that background tasks have delivered.
    pub fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                AppEvent::Loaded(ticket, result) => {
                    let open_db_id = self.selected_feature().and_then(|f| f.db_id);
                    let outcome = self.store.finish_load(ticket, result, &mut self.alerts);
                    if matches!(outcome, LoadOutcome::Loaded(_)) {
                        self.inflight_load = None;
                        self.viewport.fit(self.store.view().fit_bounds());
                        self.reselect(open_db_id);
                    }
                }
                AppEvent::Facets(facets) => {
                    self.store.pin_facets(facets);
                    self.facet_cursor = 0;
                }
                AppEvent::LoggedIn(outcome) => {
                    if let Some(session) = outcome.session {
                        self.session = session;
                    }
                    self.alerts.display(outcome.notification);
                }
                AppEvent::Notice(notification) => self.alerts.display(notification),
            }
        }
    }

    /// Feature ids are positions, so after a reload the open feature is found
    /// again by its database id, or closed.
    fn reselect(&mut self, db_id: Option<i64>) {
        self.selected = db_id.and_then(|db| {
            self.store.features().iter().find(|f| f.db_id == Some(db)).map(|f| f.id)
        });
    }

    pub fn facet_entries(&self) -> Vec<FacetEntry> {
        let selections = self.store.selections();
        let facets = self.store.facets();
        match self.facet_tab {
            FacetTab::ModelType => ModelType::ALL
                .iter()
                .map(|m| FacetEntry {
                    label: m.label().to_string(),
                    key: m.label().to_string(),
                    selected: selections.model_types.contains(m),
                })
                .collect(),
            FacetTab::Process => facets
                .processes
                .iter()
                .map(|p| FacetEntry {
                    label: p.to_string(),
                    key: p.key().to_string(),
                    selected: selections.processes.contains(p.key()),
                })
                .collect(),
            FacetTab::SpatialZone => {
                zone_entries(&facets.spatial_zones, &selections.spatial_zones)
            }
            FacetTab::TemporalZone => {
                zone_entries(&facets.temporal_zones, &selections.temporal_zones)
            }
        }
    }

    fn toggle_facet(&mut self) {
        let Some(entry) = self.facet_entries().into_iter().nth(self.facet_cursor) else {
            return;
        };
        match self.facet_tab {
            FacetTab::ModelType => {
                if let Ok(model) = entry.key.parse::<ModelType>() {
                    self.store.toggle_model_type(model);
                }
            }
            FacetTab::Process => self.store.toggle_process(&entry.key),
            FacetTab::SpatialZone => self.store.toggle_spatial_zone(&entry.key),
            FacetTab::TemporalZone => self.store.toggle_temporal_zone(&entry.key),
        }
    }

    /// The open feature, if it is still visible.
    pub fn selected_feature(&self) -> Option<&Feature> {
        let id = self.selected?;
        self.store.view().marker(id)?;
        self.store.feature(id)
    }

    /// Writes the open feature's popup as an HTML page into the export
    /// directory and returns its path.
    pub fn export_selected(&mut self) -> Option<PathBuf> {
        let id = self.selected?;
        let marker = self.store.view().marker(id)?;
        let name = match self.store.feature(id).and_then(|f| f.db_id) {
            Some(db) => format!("model-{db}.html"),
            None => format!("feature-{}.html", id.0),
        };
        let path = self.export_dir.join(name);
        let page = format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"></head><body>\n{}\n{}\n",
            marker.popup.to_html(FIGURE_BASE),
            "</body></html>"
        );
        match fs::write(&path, page) {
            Ok(()) => {
                info!(path = %path.display(), "popup exported");
                self.alerts.display(Notification::success("Exported", path.display().to_string()));
                Some(path)
            }
            Err(err) => {
                warn!(%err, path = %path.display(), "popup export failed");
                self.alerts.display(Notification::error("Export failed", err.to_string()));
                None
            }
        }
    }

    /// Opens a marker's details and reports the click.
    pub fn open_feature(&mut self, id: FeatureId) {
        let Some(feature) = self.store.feature(id) else { return };
        record_click(self.tracker.as_ref(), &feature.location.name);
        self.selected = Some(id);
    }

    /// Opens the visible marker closest to the map cursor, within one cluster cell.
    fn open_nearest(&mut self) {
        let Some(group) = self.store.view().layer.group() else { return };
        let cursor = self.viewport.center;
        let reach = 4.0 / self.viewport.zoom;
        let nearest = group
            .markers()
            .iter()
            .map(|m| (m.feature, (m.position.x() - cursor.x).hypot(m.position.y() - cursor.y)))
            .filter(|(_, d)| *d <= reach)
            .min_by(|a, b| a.1.total_cmp(&b.1));
        match nearest {
            Some((id, _)) => self.open_feature(id),
            None => debug!("no marker under cursor"),
        }
    }

    /// Steps through visible features in store order.
    fn cycle_selection(&mut self, forward: bool) {
        let visible = self.store.visible();
        if visible.is_empty() {
            return;
        }
        let pos = self.selected.and_then(|id| visible.iter().position(|v| *v == id));
        let next = match (pos, forward) {
            (None, _) => 0,
            (Some(p), true) => (p + 1) % visible.len(),
            (Some(p), false) => (p + visible.len() - 1) % visible.len(),
        };
        let id = visible[next];
        self.open_feature(id);
        if let Some(f) = self.store.feature(id) {
            self.viewport.center = coord! { x: f.location.lon, y: f.location.lat };
        }
    }

    fn toggle_drawing(&mut self) {
        match self.drawing_from.take() {
            None => self.drawing_from = Some(self.viewport.center),
            Some(anchor) => {
                let rect = Rect::new(anchor, self.viewport.center);
                info!(?rect, "rectangle filter set");
                self.store.set_rectangle(rect);
            }
        }
    }

    fn start_login(&mut self) {
        if self.session.is_logged_in() {
            self.alerts.display(Notification::error("Already logged in", "Log out first"));
        } else {
            self.mode = InputMode::Login(LoginForm::default());
        }
    }

    fn submit_login(&mut self, form: LoginForm) {
        let api = self.api.clone();
        let tx = self.events_tx.clone();
        self.runtime.spawn(async move {
            let outcome = log_in(&api, &form.username, &form.password).await;
            let _ = tx.send(AppEvent::LoggedIn(outcome));
        });
    }

    fn logout(&mut self) {
        if !self.session.is_logged_in() {
            return;
        }
        let token = self.session.clear();
        let api = self.api.clone();
        let tx = self.events_tx.clone();
        self.runtime.spawn(async move {
            let notice = log_out(&api, token).await;
            let _ = tx.send(AppEvent::Notice(notice));
        });
    }

    /// Returns true when the app should exit.
    pub fn handle_input(&mut self, key: KeyCode) -> bool {
        match std::mem::replace(&mut self.mode, InputMode::Normal) {
            InputMode::Normal => return self.handle_normal(key),
            InputMode::Search(text) => self.handle_search(key, text),
            InputMode::Login(form) => self.handle_login(key, form),
        }
        false
    }

    fn handle_search(&mut self, key: KeyCode, mut text: String) {
        match key {
            KeyCode::Enter => self.store.set_search(&text),
            KeyCode::Esc => {}
            KeyCode::Backspace => {
                text.pop();
                self.mode = InputMode::Search(text);
            }
            KeyCode::Char(c) => {
                text.push(c);
                self.mode = InputMode::Search(text);
            }
            _ => self.mode = InputMode::Search(text),
        }
    }

    fn handle_login(&mut self, key: KeyCode, mut form: LoginForm) {
        match key {
            KeyCode::Esc => {}
            KeyCode::Tab => {
                form.on_password = !form.on_password;
                self.mode = InputMode::Login(form);
            }
            KeyCode::Enter if !form.on_password => {
                form.on_password = true;
                self.mode = InputMode::Login(form);
            }
            KeyCode::Enter => self.submit_login(form),
            KeyCode::Backspace => {
                if form.on_password {
                    form.password.pop();
                } else {
                    form.username.pop();
                }
                self.mode = InputMode::Login(form);
            }
            KeyCode::Char(c) => {
                if form.on_password {
                    form.password.push(c);
                } else {
                    form.username.push(c);
                }
                self.mode = InputMode::Login(form);
            }
            _ => self.mode = InputMode::Login(form),
        }
    }

    fn handle_normal(&mut self, key: KeyCode) -> bool {
        use KeyCode::*;
        match key {
            Char('q') => return true,
            Tab => {
                self.active_panel = match self.active_panel {
                    Panel::Left => Panel::Center,
                    Panel::Center => Panel::Right,
                    Panel::Right => Panel::Left,
                };
            }
            Char('/') => self.mode = InputMode::Search(self.store.selections().search.clone()),
            Char('c') => {
                self.store.clear_all_filters();
                self.facet_cursor = 0;
            }
            Char('R') => self.reload(),
            Char('l') => self.start_login(),
            Char('o') => self.logout(),
            Esc => {
                if self.drawing_from.take().is_none() {
                    self.alerts.dismiss();
                }
            }
            _ => match self.active_panel {
                Panel::Left => self.handle_filters(key),
                Panel::Center => self.handle_map(key),
                Panel::Right => self.handle_details(key),
            },
        }
        false
    }

    fn handle_filters(&mut self, key: KeyCode) {
        use KeyCode::*;
        match key {
            Left => {
                self.facet_tab = self.facet_tab.prev();
                self.facet_cursor = 0;
            }
            Right => {
                self.facet_tab = self.facet_tab.next();
                self.facet_cursor = 0;
            }
            Up => self.facet_cursor = self.facet_cursor.saturating_sub(1),
            Down => {
                if self.facet_cursor + 1 < self.facet_entries().len() {
                    self.facet_cursor += 1;
                }
            }
            Enter | Char(' ') => self.toggle_facet(),
            _ => {}
        }
    }

    fn handle_map(&mut self, key: KeyCode) {
        use KeyCode::*;
        match key {
            Left => self.viewport.pan(-1.0, 0.0),
            Right => self.viewport.pan(1.0, 0.0),
            Up => self.viewport.pan(0.0, 1.0),
            Down => self.viewport.pan(0.0, -1.0),
            Char('+') | Char('=') => self.viewport.zoom_by(2.0),
            Char('-') => self.viewport.zoom_by(0.5),
            Char('f') => self.viewport.fit(self.store.view().fit_bounds()),
            Char('r') => self.toggle_drawing(),
            Char('x') => self.store.clear_rectangle(),
            Enter => self.open_nearest(),
            _ => {}
        }
    }

    fn handle_details(&mut self, key: KeyCode) {
        match key {
            KeyCode::Down => self.cycle_selection(true),
            KeyCode::Up => self.cycle_selection(false),
            KeyCode::Char('e') => {
                self.export_selected();
            }
            _ => {}
        }
    }
}

fn zone_entries(
    zones: &[String],
    selected: &std::collections::BTreeSet<String>,
) -> Vec<FacetEntry> {
    zones
        .iter()
        .map(|z| FacetEntry { label: z.clone(), key: z.clone(), selected: selected.contains(z) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analytics::LogTracker, assets::FigureAssets, filter::tests::feature, model::ProcessTag,
    };

    fn app() -> AppState {
        let api = ApiClient::new(reqwest::Client::new(), "http://127.0.0.1:9");
        let path = PathBuf::from("/nonexistent.geojson");
        let source = DatasetSource::Local(LocalDataset { path });
        let mut store = MapStore::new(FigureAssets::default(), 8.0);
        let ticket = store.begin_load();
        let features = vec![
            feature(0, ModelType::Text, 1.0, 1.0, "of"),
            feature(1, ModelType::Figure, 50.0, 50.0, "sm"),
        ];
        store.finish_load(ticket, Ok(features), &mut Vec::new());
        let tracker = Box::new(LogTracker);
        AppState::new(store, MapView::new(None), api, source, tracker, Handle::current())
    }

    #[tokio::test]
    async fn search_mode_applies_on_enter() {
        let mut app = app();
        assert!(!app.handle_input(KeyCode::Char('/')));
        for c in "site 1".chars() {
            app.handle_input(KeyCode::Char(c));
        }
        assert_eq!(app.mode, InputMode::Search("site 1".into()));
        app.handle_input(KeyCode::Enter);
        assert_eq!(app.mode, InputMode::Normal);
        assert_eq!(app.store.visible(), &[FeatureId(1)]);
        assert!(app.handle_input(KeyCode::Char('q')));
    }

    #[tokio::test]
    async fn facet_list_toggles_processes() {
        let mut app = app();
        app.handle_input(KeyCode::Right);
        assert_eq!(app.facet_tab, FacetTab::Process);
        let entries = app.facet_entries();
        assert_eq!(entries.len(), 2);
        app.handle_input(KeyCode::Char(' '));
        assert!(app.facet_entries()[0].selected);
        assert_eq!(app.store.visible().len(), 1);
    }

    #[tokio::test]
    async fn details_panel_cycles_visible_features() {
        let mut app = app();
        app.active_panel = Panel::Right;
        app.handle_input(KeyCode::Down);
        assert_eq!(app.selected, Some(FeatureId(0)));
        app.handle_input(KeyCode::Down);
        assert_eq!(app.selected, Some(FeatureId(1)));
        assert_eq!(app.selected_feature().map(|f| f.id), Some(FeatureId(1)));
        app.handle_input(KeyCode::Down);
        assert_eq!(app.selected, Some(FeatureId(0)));
    }

    #[tokio::test]
    async fn rectangle_is_drawn_from_the_map_cursor() {
        let mut app = app();
        app.active_panel = Panel::Center;
        app.viewport.center = coord! { x: 0.0, y: 0.0 };
        app.handle_input(KeyCode::Char('r'));
        app.viewport.center = coord! { x: 10.0, y: 10.0 };
        app.handle_input(KeyCode::Char('r'));
        assert!(app.drawing_from.is_none());
        assert_eq!(app.store.visible(), &[FeatureId(0)]);
        app.handle_input(KeyCode::Char('x'));
        assert_eq!(app.store.visible().len(), 2);
    }

    fn deliver(app: &mut AppState, features: Vec<Feature>) {
        let ticket = app.store.begin_load();
        let _ = app.events_tx.send(AppEvent::Loaded(ticket, Ok(features)));
        app.drain_events();
    }

    #[tokio::test]
    async fn reload_closes_a_selection_it_cannot_match() {
        let mut app = app();
        app.open_feature(FeatureId(0));
        assert_eq!(app.selected_feature().map(|f| f.location.name.as_str()), Some("site 0"));

        let mut other = feature(0, ModelType::Text, 5.0, 5.0, "of");
        other.location.name = "different site".into();
        deliver(&mut app, vec![other]);

        assert_eq!(app.selected, None);
        assert!(app.selected_feature().is_none());
    }

    #[tokio::test]
    async fn reload_follows_the_selection_by_database_id() {
        let mut app = app();
        let mut first = feature(0, ModelType::Text, 1.0, 1.0, "of");
        let mut second = feature(1, ModelType::Figure, 50.0, 50.0, "sm");
        first.db_id = Some(10);
        second.db_id = Some(20);
        deliver(&mut app, vec![first.clone(), second.clone()]);
        app.open_feature(FeatureId(1));

        // Same rows, reversed order.
        first.id = FeatureId(1);
        second.id = FeatureId(0);
        deliver(&mut app, vec![second, first]);

        assert_eq!(app.selected, Some(FeatureId(0)));
        assert_eq!(app.selected_feature().and_then(|f| f.db_id), Some(20));
    }

    #[tokio::test]
    async fn processes_without_identifiers_toggle_separately() {
        let mut app = app();
        let mut a = feature(0, ModelType::Text, 1.0, 1.0, "of");
        let mut b = feature(1, ModelType::Text, 2.0, 2.0, "sm");
        a.processes = vec![ProcessTag { process: "Interflow".into(), identifier: String::new() }];
        b.processes = vec![ProcessTag { process: "Snowmelt".into(), identifier: String::new() }];
        deliver(&mut app, vec![a, b]);

        app.facet_tab = FacetTab::Process;
        let keys: Vec<String> = app.facet_entries().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["Interflow".to_string(), "Snowmelt".to_string()]);

        app.handle_input(KeyCode::Char(' '));
        let selected: Vec<bool> = app.facet_entries().iter().map(|e| e.selected).collect();
        assert_eq!(selected, vec![true, false]);
        assert_eq!(app.store.visible(), &[FeatureId(0)]);
    }

    #[tokio::test]
    async fn details_export_writes_escaped_html() {
        let mut app = app();
        let dir = std::env::temp_dir().join(format!("hydromap-export-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        app.export_dir = dir.clone();

        assert_eq!(app.export_selected(), None);
        app.open_feature(FeatureId(0));
        let path = app.export_selected().expect("page written");
        assert_eq!(path, dir.join("feature-0.html"));

        let page = fs::read_to_string(&path).unwrap();
        assert!(page.contains("<h3>site 0</h3>"));
        assert!(page.contains("<blockquote>snippet 0</blockquote>"));
        fs::remove_dir_all(&dir).unwrap();
    }
}
