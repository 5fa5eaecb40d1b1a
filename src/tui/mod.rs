use std::{
    io::{self, Stdout},
    time::{Duration, Instant},
};

use color_eyre::Result;
use crossterm::{
    event::{self, Event as CrosstermEvent, KeyEvent},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};
use tokio::{sync::mpsc, task};
use tracing::{debug, error};

use crate::transport::ConnectionState;

#[derive(Debug)]
pub enum Event {
    Input(KeyEvent),
    Tick,
    Resize(u16, u16),
}

#[derive(Debug, Clone)]
pub struct Counters {
    pub total_events: u64,
    pub earthquakes: u64,
    pub tsunamis: u64,
    pub weather: u64,
    pub active_connections: u64,
}

#[derive(Debug, Clone)]
pub struct SourceRow {
    pub name: String,
    pub connected: bool,
    pub retry_count: u64,
}

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub category: String,
    pub summary: String,
    pub when: String,
    pub update_count: usize,
    pub collapsible: bool,
    pub expanded: bool,
    /// Older updates, newest first; only filled when expanded.
    pub history: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QuakeRow {
    pub magnitude: f64,
    pub place: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone)]
pub struct DashboardView {
    pub connection: ConnectionState,
    pub running: bool,
    pub uptime: String,
    pub counters: Counters,
    pub sources: Vec<SourceRow>,
    pub magnitudes: Vec<(String, u64)>,
    pub magnitude_scale: u64,
    pub quakes: Vec<QuakeRow>,
    pub filter: String,
    pub groups: Vec<GroupRow>,
    pub selected: Option<usize>,
    pub alert: Option<String>,
}

pub struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalGuard {
    pub fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.hide_cursor()?;

        Ok(Self { terminal })
    }

    pub fn draw<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Frame<'_>),
    {
        self.terminal.draw(f)?;
        Ok(())
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            error!(?err, "failed to disable raw mode");
        }

        let mut stdout = io::stdout();
        if let Err(err) = execute!(stdout, LeaveAlternateScreen) {
            error!(?err, "failed to leave alternate screen");
        }

        if let Err(err) = self.terminal.show_cursor() {
            error!(?err, "failed to show cursor");
        }
    }
}

pub fn spawn_event_loop(
    tx: mpsc::UnboundedSender<Event>,
    tick_rate: Duration,
) -> task::JoinHandle<()> {
    task::spawn_blocking(move || {
        let mut last_tick = Instant::now();

        loop {
            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or(Duration::ZERO);

            match event::poll(timeout) {
                Ok(true) => {
                    let forwarded = match event::read() {
                        Ok(CrosstermEvent::Key(key)) => tx.send(Event::Input(key)).is_ok(),
                        Ok(CrosstermEvent::Resize(w, h)) => tx.send(Event::Resize(w, h)).is_ok(),
                        Ok(_) => true,
                        Err(err) => {
                            error!(?err, "failed to read terminal event");
                            false
                        }
                    };
                    if !forwarded {
                        break;
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    error!(?err, "failed to poll terminal events");
                    break;
                }
            }

            if last_tick.elapsed() >= tick_rate {
                if tx.send(Event::Tick).is_err() {
                    break;
                }
                last_tick = Instant::now();
            }
        }

        debug!("terminal event loop terminated");
    })
}

pub fn render_app(frame: &mut Frame<'_>, view: &DashboardView) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(if view.alert.is_some() { 3 } else { 0 }),
            Constraint::Length(2),
        ])
        .split(frame.size());

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(rows[1]);

    let sidebar = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(7),
            Constraint::Min(4),
            Constraint::Length(MAGNITUDE_PANEL_HEIGHT),
        ])
        .split(columns[0]);

    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(6),
            Constraint::Length(QUAKE_ROWS as u16 + 2),
        ])
        .split(columns[1]);

    render_header(frame, rows[0], view);
    render_counters(frame, sidebar[0], view);
    render_sources(frame, sidebar[1], view);
    render_magnitudes(frame, sidebar[2], view);
    render_groups(frame, main[0], view);
    render_quakes(frame, main[1], view);
    if let Some(alert) = &view.alert {
        render_alert(frame, rows[2], alert);
    }
    render_footer(frame, rows[3]);
}

const MAGNITUDE_PANEL_HEIGHT: u16 = 10;
const BAR_WIDTH: u64 = 16;
const QUAKE_ROWS: usize = 5;

fn connection_style(state: ConnectionState) -> Style {
    match state {
        ConnectionState::Connected => Style::default().fg(Color::Green),
        ConnectionState::Connecting => Style::default().fg(Color::Yellow),
        ConnectionState::Disconnected => Style::default().fg(Color::Red),
    }
}

fn panel(title: &str) -> Block<'_> {
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title_style(
            Style::default()
                .fg(Color::LightBlue)
                .add_modifier(Modifier::BOLD),
        )
}

fn render_header(frame: &mut Frame<'_>, area: Rect, view: &DashboardView) {
    let service = if view.running { "running" } else { "stopped" };
    let line = Line::from(vec![
        Span::styled(
            "alertdeck",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" · live "),
        Span::styled(view.connection.label(), connection_style(view.connection)),
        Span::raw(format!(" · relay {service} · uptime {}", view.uptime)),
    ]);

    let header = Paragraph::new(line).block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, area);
}

fn render_counters(frame: &mut Frame<'_>, area: Rect, view: &DashboardView) {
    let counters = &view.counters;
    let lines = vec![
        Line::from(format!("events      {}", counters.total_events)),
        Line::from(format!("earthquakes {}", counters.earthquakes)),
        Line::from(format!("tsunamis    {}", counters.tsunamis)),
        Line::from(format!("weather     {}", counters.weather)),
        Line::from(format!("clients     {}", counters.active_connections)),
    ];

    frame.render_widget(Paragraph::new(lines).block(panel("Counters")), area);
}

fn render_sources(frame: &mut Frame<'_>, area: Rect, view: &DashboardView) {
    if view.sources.is_empty() {
        let empty = Paragraph::new("No data sources reported")
            .style(Style::default().fg(Color::DarkGray))
            .block(panel("Sources"));
        frame.render_widget(empty, area);
        return;
    }

    let items: Vec<ListItem> = view
        .sources
        .iter()
        .map(|source| {
            let (marker, style) = if source.connected {
                ("●", Style::default().fg(Color::Green))
            } else {
                ("○", Style::default().fg(Color::Red))
            };
            let mut spans = vec![
                Span::styled(marker, style),
                Span::raw(format!(" {}", source.name)),
            ];
            if source.retry_count > 0 {
                spans.push(Span::styled(
                    format!(" (retry {})", source.retry_count),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    frame.render_widget(List::new(items).block(panel("Sources")), area);
}

fn render_magnitudes(frame: &mut Frame<'_>, area: Rect, view: &DashboardView) {
    if view.magnitudes.is_empty() {
        let empty = Paragraph::new("No earthquake data")
            .style(Style::default().fg(Color::DarkGray))
            .block(panel("Magnitudes"));
        frame.render_widget(empty, area);
        return;
    }

    let scale = view.magnitude_scale.max(1);
    let lines: Vec<Line> = view
        .magnitudes
        .iter()
        .map(|(label, count)| {
            let filled = (count * BAR_WIDTH).div_ceil(scale) as usize;
            Line::from(vec![
                Span::raw(format!("{label:<12}")),
                Span::styled("█".repeat(filled), Style::default().fg(Color::Yellow)),
                Span::raw(format!(" {count}")),
            ])
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(panel("Magnitudes")), area);
}

fn render_groups(frame: &mut Frame<'_>, area: Rect, view: &DashboardView) {
    let title = format!("Events [{}]", view.filter);
    if view.groups.is_empty() {
        let empty = Paragraph::new("No events yet.\n\nPress `f` to change the filter or `r` to refresh.")
            .wrap(Wrap { trim: true })
            .style(Style::default().fg(Color::Gray))
            .block(panel(&title));
        frame.render_widget(empty, area);
        return;
    }

    let mut items = Vec::new();
    for (idx, group) in view.groups.iter().enumerate() {
        let marker = match (group.collapsible, group.expanded) {
            (false, _) => " ",
            (true, false) => "▸",
            (true, true) => "▾",
        };
        let mut text = format!(
            "{marker} [{}] {} · {}",
            group.category, group.summary, group.when
        );
        if group.update_count > 1 {
            text.push_str(&format!(" ({} updates)", group.update_count));
        }

        let base = Style::default().fg(Color::Gray);
        let style = if Some(idx) == view.selected {
            base.add_modifier(Modifier::BOLD).bg(Color::DarkGray)
        } else {
            base
        };
        items.push(ListItem::new(text).style(style));

        for older in &group.history {
            items.push(
                ListItem::new(format!("    └ {older}"))
                    .style(Style::default().fg(Color::DarkGray)),
            );
        }
    }

    frame.render_widget(List::new(items).block(panel(&title)), area);
}

fn render_quakes(frame: &mut Frame<'_>, area: Rect, view: &DashboardView) {
    if view.quakes.is_empty() {
        let empty = Paragraph::new("No located earthquakes")
            .style(Style::default().fg(Color::DarkGray))
            .block(panel("Located quakes"));
        frame.render_widget(empty, area);
        return;
    }

    let items: Vec<ListItem> = view
        .quakes
        .iter()
        .take(QUAKE_ROWS)
        .map(|quake| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("M{:.1}", quake.magnitude),
                    Style::default().fg(Color::Yellow),
                ),
                Span::raw(format!(
                    " {} ({:.2}, {:.2})",
                    quake.place, quake.latitude, quake.longitude
                )),
            ]))
        })
        .collect();

    frame.render_widget(List::new(items).block(panel("Located quakes")), area);
}

fn render_alert(frame: &mut Frame<'_>, area: Rect, alert: &str) {
    let paragraph = Paragraph::new(alert.to_string())
        .wrap(Wrap { trim: true })
        .style(Style::default().fg(Color::LightRed))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red))
                .title("Alert (x to dismiss)"),
        );
    frame.render_widget(paragraph, area);
}

fn render_footer(frame: &mut Frame<'_>, area: Rect) {
    let content = Paragraph::new(
        "q quit · r refresh · f filter · ↑/↓ select · enter/space expand · x dismiss · s simulate · t test push · c config",
    )
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default().borders(Borders::TOP));

    frame.render_widget(content, area);
}
