use std::collections::BTreeSet;

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};

use crate::{
    filter::{Filter, Predicate},
    map_draw::MapOverlay,
    notify::Severity,
    state::{AppState, InputMode, Panel},
};

fn panel_block(title: String, focused: bool) -> Block<'static> {
    let style = if focused { Style::default().fg(Color::Yellow) } else { Style::default() };
    Block::default().borders(Borders::ALL).border_style(style).title(title)
}

pub fn draw(f: &mut Frame, state: &mut AppState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(20),
            Constraint::Percentage(60),
            Constraint::Percentage(20),
        ])
        .split(f.area());

    draw_filters(f, state, chunks[0]);
    draw_map(f, state, chunks[1]);
    draw_sidebar(f, state, chunks[2]);
}

// Left panel: facet checklist
fn draw_filters(f: &mut Frame, state: &AppState, area: Rect) {
    let entries = state.facet_entries();
    let items: Vec<ListItem> = entries
        .iter()
        .map(|e| ListItem::new(format!("[{}] {}", if e.selected { "x" } else { " " }, e.label)))
        .collect();
    let mut list_state = ListState::default();
    if !entries.is_empty() {
        list_state.select(Some(state.facet_cursor.min(entries.len() - 1)));
    }
    let title = format!("◀ {} ▶", state.facet_tab.title());
    let list = List::new(items)
        .block(panel_block(title, state.active_panel == Panel::Left))
        .highlight_symbol(">> ")
        .highlight_style(Style::default().fg(Color::Red));
    f.render_stateful_widget(list, area, &mut list_state);
}

// Centre: map, plus the input line while typing
fn draw_map(f: &mut Frame, state: &AppState, area: Rect) {
    let (map_area, input_area) = match state.mode {
        InputMode::Normal => (area, None),
        _ => {
            let split = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(3), Constraint::Length(3)])
                .split(area);
            (split[0], Some(split[1]))
        }
    };

    let focused = state.active_panel == Panel::Center;
    if state.store.is_loaded() {
        let view = state.store.view();
        let title = format!("Map ({} of {})", view.visible.len(), state.store.features().len());
        let overlay = MapOverlay {
            view,
            viewport: state.viewport,
            rectangle: state.store.registry().rectangle(),
            drawing_from: state.drawing_from,
            selected: state.selected,
        };
        let title = if focused { format!("{title} *") } else { title };
        state.map.render(f, map_area, &title, &overlay);
    } else {
        let txt = Paragraph::new("Loading perceptual models…")
            .block(panel_block("Map".to_string(), focused))
            .wrap(Wrap { trim: true });
        f.render_widget(txt, map_area);
    }

    if let Some(input_area) = input_area {
        let (title, text) = match &state.mode {
            InputMode::Search(text) => ("Search (Enter apply, Esc cancel)", text.clone()),
            InputMode::Login(form) => (
                "Log in (Tab switch field, Enter submit)",
                format!(
                    "{}user: {}   {}password: {}",
                    if form.on_password { " " } else { ">" },
                    form.username,
                    if form.on_password { ">" } else { " " },
                    "*".repeat(form.password.chars().count()),
                ),
            ),
            InputMode::Normal => ("", String::new()),
        };
        let input = Paragraph::new(text).block(Block::default().borders(Borders::ALL).title(title));
        f.render_widget(input, input_area);
    }
}

fn describe(filter: &Filter) -> String {
    let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(", ");
    match &filter.predicate {
        Predicate::ModelTypes(types) => {
            let labels: Vec<&str> = types.iter().map(|t| t.label()).collect();
            format!("type: {}", labels.join(", "))
        }
        Predicate::SpatialZones(zones) => format!("spatial: {}", join(zones)),
        Predicate::TemporalZones(zones) => format!("temporal: {}", join(zones)),
        Predicate::Process(key) => format!("process: {key}"),
        Predicate::Search(text) => format!("search: {text}"),
        Predicate::Rectangle(_) => "rectangle".to_string(),
        Predicate::Generic(named) => named.name.clone(),
    }
}

// Right panel: summary, details, alerts
fn draw_sidebar(f: &mut Frame, state: &AppState, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(35),
            Constraint::Percentage(45),
            Constraint::Percentage(20),
        ])
        .split(area);

    // Summary
    let view = state.store.view();
    let mut lines = vec![Line::from(format!(
        "Visible: {} / {}",
        view.visible.len(),
        state.store.features().len()
    ))];
    for (model, count) in view.model_type_counts() {
        lines.push(Line::from(format!("  {}: {count}", model.label())));
    }
    let registry = state.store.registry();
    if !registry.is_empty() {
        lines.push(Line::from(""));
        let bold = Style::default().add_modifier(Modifier::BOLD);
        lines.push(Line::from(Span::styled("Filters", bold)));
        lines.extend(registry.iter().map(|filter| Line::from(format!("  {}", describe(filter)))));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(match state.session.display_name() {
        Some(email) => format!("Signed in as {email}"),
        None if state.session.is_logged_in() => "Signed in".to_string(),
        None => "Not signed in".to_string(),
    }));
    lines.push(Line::from(""));
    lines.extend(AppState::HELP_TEXT.lines().map(Line::from));
    let info = Paragraph::new(lines)
        .block(panel_block("Info".to_string(), false))
        .wrap(Wrap { trim: false });
    f.render_widget(info, chunks[0]);

    // Details of the open marker
    let details: Vec<Line> = match state.selected.and_then(|id| view.marker(id)) {
        Some(marker) => marker.popup.lines().into_iter().map(Line::from).collect(),
        None => vec![Line::from("Select a marker to see its details")],
    };
    let details = Paragraph::new(details)
        .block(panel_block("Details".to_string(), state.active_panel == Panel::Right))
        .wrap(Wrap { trim: false });
    f.render_widget(details, chunks[1]);

    // Alerts
    let alerts: Vec<Line> = state
        .alerts
        .current()
        .map(|n| {
            let color = match n.severity {
                Severity::Success => Color::Green,
                Severity::Error => Color::Red,
            };
            let title = Style::default().fg(color).add_modifier(Modifier::BOLD);
            Line::from(vec![
                Span::styled(format!("{}: ", n.title), title),
                Span::raw(n.text.clone()),
            ])
        })
        .collect();
    let alerts = Paragraph::new(alerts)
        .block(Block::default().borders(Borders::ALL).title("Alerts"))
        .wrap(Wrap { trim: true });
    f.render_widget(alerts, chunks[2]);
}
