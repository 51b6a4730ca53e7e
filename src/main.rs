use std::{
    io,
    time::{Duration, Instant},
};

use anyhow::Context;
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hydromap::{
    analytics::{HttpTracker, LogTracker, Tracker},
    api::{ApiClient, LocalDataset},
    assets::DataDir,
    config::AppConfig,
    map_draw::MapView,
    state::{AppState, DatasetSource},
    store::MapStore,
    ui,
};

fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();
    config.validate()?;

    // The terminal belongs to the UI, so logs go to a file.
    let dir = config.log_file.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = dir.map(|p| p.to_path_buf()).unwrap_or_else(|| ".".into());
    let name = config.log_file.file_name().context("--log-file must name a file")?;
    let appender = tracing_appender::rolling::never(dir, name);
    let (writer, _log_guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;
    let api = ApiClient::new(http.clone(), &config.api_url);
    let source = match &config.dataset {
        Some(path) => DatasetSource::Local(LocalDataset { path: path.clone() }),
        None => DatasetSource::Api(api.clone()),
    };

    let data = DataDir::new(&config.data_dir);
    let assets = data.load_figure_assets();
    let basemap = data.load_basemap().unwrap_or_else(|err| {
        warn!(%err, "basemap unavailable");
        None
    });
    let tracker: Box<dyn Tracker> = match &config.analytics_url {
        Some(url) => Box::new(HttpTracker::new(http, url.clone(), runtime.handle().clone())),
        None => Box::new(LogTracker),
    };
    info!(api = %config.api_url, dataset = ?config.dataset, figures = assets.len(), "starting");

    let store = MapStore::new(assets, config.cluster_radius);
    let mut state = AppState::new(
        store,
        MapView::new(basemap),
        api,
        source,
        tracker,
        runtime.handle().clone(),
    );
    state.reload();
    state.refresh_facets();

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, &mut state);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    info!("exiting");
    result
}

fn run<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    state: &mut AppState,
) -> anyhow::Result<()> {
    loop {
        state.drain_events();
        state.alerts.expire(Instant::now());
        terminal.draw(|f| ui::draw(f, state))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(KeyEvent { code, kind: KeyEventKind::Press, .. }) = event::read()? {
                if state.handle_input(code) {
                    return Ok(());
                }
            }
        }
    }
}
