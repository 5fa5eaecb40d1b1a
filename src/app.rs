use std::time::Duration;

use chrono::Local;
use color_eyre::{
    Result,
    eyre::{Report, eyre},
};
use crossterm::event::{KeyCode, KeyEventKind, KeyModifiers};
use serde_json::json;
use tokio::{select, sync::mpsc};
use tracing::{debug, info, warn};

use crate::{
    api::{ApiClient, ApiError},
    config::Config,
    events::{EventGroup, RawEvent},
    protocol::SimulationRequest,
    session::{Session, SessionConfig},
    state::{Slice, StoreState},
    tui::{self, Counters, DashboardView, Event, GroupRow, QuakeRow, SourceRow, TerminalGuard},
};

pub struct AlertDeckApp {
    tick_rate: Duration,
    headless: bool,
    session: Session,
    selected: Option<usize>,
}

impl AlertDeckApp {
    pub async fn bootstrap(config: Config) -> Result<Self> {
        let api = ApiClient::new(&config.server, config.request_timeout()).map_err(|err| match err {
            ApiError::InvalidUrl { url, reason } => eyre!(
                "Relay address {url} is not usable ({reason}). Pass --server http://<host>:<port> to point at the relay."
            ),
            other => Report::from(other),
        })?;

        let ws_url = config.websocket_url();
        info!(server = %api.base(), ws = %ws_url, "relay endpoints resolved");

        let session = Session::new(SessionConfig {
            ws_url,
            api,
            reconnect_delay: config.reconnect_delay(),
            poll_interval: config.poll_interval(),
        });

        Ok(Self {
            tick_rate: Duration::from_millis(250),
            headless: config.headless,
            session,
            selected: None,
        })
    }

    pub async fn run(self) -> Result<()> {
        if self.headless {
            self.run_headless().await
        } else {
            self.run_terminal().await
        }
    }

    async fn run_headless(mut self) -> Result<()> {
        info!("starting headless session");
        self.session.store_mut().subscribe(log_change);
        self.session.start();

        loop {
            select! {
                alive = self.session.step() => {
                    if !alive {
                        break;
                    }
                }
                ctrl_c = tokio::signal::ctrl_c() => {
                    if let Err(err) = ctrl_c {
                        warn!(?err, "failed to listen for ctrl+c");
                    } else {
                        info!("received ctrl+c");
                    }
                    break;
                }
            }
        }

        self.session.shutdown();
        info!("alertdeck shutting down");
        Ok(())
    }

    async fn run_terminal(mut self) -> Result<()> {
        info!("starting terminal dashboard");

        let mut terminal = TerminalGuard::new()?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let event_handle = tui::spawn_event_loop(tx, self.tick_rate);
        self.session.start();

        loop {
            let view = build_view_model(&self.session, self.selected);
            self.selected = view.selected;
            terminal.draw(|frame| tui::render_app(frame, &view))?;

            let exit_requested = select! {
                maybe_event = rx.recv() => match maybe_event {
                    Some(event) => self.handle_event(event),
                    None => true,
                },
                alive = self.session.step() => !alive,
                ctrl_c = tokio::signal::ctrl_c() => {
                    if let Err(err) = ctrl_c {
                        warn!(?err, "failed to listen for ctrl+c");
                    } else {
                        info!("received ctrl+c");
                    }
                    true
                }
            };

            if exit_requested {
                break;
            }
        }

        self.session.shutdown();
        drop(terminal);
        drop(rx);

        if let Err(err) = event_handle.await {
            warn!(?err, "terminal event loop task ended unexpectedly");
        }

        info!("alertdeck shutting down");
        Ok(())
    }

    fn handle_event(&mut self, event: Event) -> bool {
        let key = match event {
            Event::Input(key) if key.kind != KeyEventKind::Release => key,
            Event::Input(_) | Event::Tick | Event::Resize(..) => return false,
        };

        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => true,
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => true,
            KeyCode::Char('r') | KeyCode::Char('R') => {
                debug!("manual refresh");
                self.session.refresh();
                false
            }
            KeyCode::Char('f') | KeyCode::Char('F') => {
                let filter = self.session.cycle_filter();
                debug!(%filter, "filter changed");
                self.selected = None;
                false
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.move_selection(1);
                false
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.move_selection(-1);
                false
            }
            KeyCode::Enter | KeyCode::Char(' ') => {
                self.toggle_selected();
                false
            }
            KeyCode::Char('x') | KeyCode::Char('X') => {
                self.session.dismiss_alert();
                false
            }
            KeyCode::Char('s') | KeyCode::Char('S') => {
                info!("sending test simulation");
                self.session.simulate(default_simulation());
                false
            }
            KeyCode::Char('t') | KeyCode::Char('T') => {
                info!("requesting test push");
                self.session.test_push("earthquake".to_string(), None);
                false
            }
            KeyCode::Char('c') | KeyCode::Char('C') => {
                debug!("fetching relay configuration");
                self.session.inspect_config();
                false
            }
            _ => false,
        }
    }

    fn move_selection(&mut self, delta: i32) {
        let len = self.session.groups().len();
        if len == 0 {
            self.selected = None;
            return;
        }

        let current = self.selected.unwrap_or(0) as i32;
        let next = (current + delta).clamp(0, len.saturating_sub(1) as i32) as usize;
        self.selected = Some(next);
    }

    fn toggle_selected(&mut self) {
        let Some(identity) = self
            .selected
            .and_then(|idx| self.session.groups().get(idx))
            .map(|group| group.identity.clone())
        else {
            return;
        };

        match self.session.toggle_group(&identity) {
            Some(expanded) => debug!(%identity, expanded, "group toggled"),
            None => debug!(%identity, "group has nothing to expand"),
        }
    }
}

fn default_simulation() -> SimulationRequest {
    SimulationRequest {
        target_group: String::new(),
        disaster_type: "earthquake".to_string(),
        test_type: "china".to_string(),
        custom_params: json!({}),
    }
}

fn log_change(slice: Slice, state: &StoreState) {
    match slice {
        Slice::Status => debug!(
            running = state.status.running,
            uptime = %state.status.uptime_text,
            active = state.status.active_connections,
            "status"
        ),
        Slice::Statistics => info!(
            total = state.statistics.total_events,
            recent = state.statistics.recent_events.len(),
            "statistics updated"
        ),
        Slice::Connections => {
            let up = state.connections.values().filter(|c| c.connected).count();
            info!(sources = state.connections.len(), up, "data sources updated");
        }
        Slice::Earthquakes => info!(markers = state.earthquakes.len(), "earthquakes updated"),
        Slice::Realtime => info!(connected = state.realtime_connected, "real-time channel"),
        Slice::Alert => match &state.alert {
            Some(alert) => warn!(message = %alert.message, "alert"),
            None => debug!("alert dismissed"),
        },
    }
}

fn build_view_model(session: &Session, selected: Option<usize>) -> DashboardView {
    let store = session.store();
    let state = store.state();
    let status = &state.status;
    let statistics = &state.statistics;
    let aggregator = session.aggregator();

    let groups: Vec<GroupRow> = aggregator
        .groups()
        .iter()
        .map(|group| summarize_group(group, aggregator.is_expanded(&group.identity)))
        .collect();

    let selected = if groups.is_empty() {
        None
    } else {
        Some(selected.unwrap_or(0).min(groups.len() - 1))
    };

    DashboardView {
        connection: session.connection_state(),
        running: status.running,
        uptime: session.uptime_text().to_string(),
        counters: Counters {
            total_events: statistics.total_events,
            earthquakes: statistics.earthquake_count(),
            tsunamis: statistics.tsunami_count(),
            weather: statistics.weather_count(),
            active_connections: status.active_connections,
        },
        sources: state
            .connections
            .iter()
            .map(|(name, info)| SourceRow {
                name: name.clone(),
                connected: info.connected,
                retry_count: info.retry_count,
            })
            .collect(),
        magnitudes: statistics.magnitude_histogram.buckets().to_vec(),
        magnitude_scale: statistics.magnitude_histogram.max_count(),
        quakes: state
            .earthquakes
            .iter()
            .map(|quake| QuakeRow {
                magnitude: quake.magnitude,
                place: quake.place.clone(),
                latitude: quake.latitude,
                longitude: quake.longitude,
            })
            .collect(),
        filter: aggregator.filter().to_string(),
        groups,
        selected,
        alert: store.alert().map(|alert| alert.message.clone()),
    }
}

fn summarize_group(group: &EventGroup, expanded: bool) -> GroupRow {
    let latest = group.latest();
    let history = if expanded && group.is_collapsible() {
        group.history().iter().map(describe_event).collect()
    } else {
        Vec::new()
    };

    GroupRow {
        category: latest.category.as_str().to_string(),
        summary: event_summary(latest),
        when: event_time(latest),
        update_count: group.update_count(),
        collapsible: group.is_collapsible(),
        expanded,
        history,
    }
}

fn event_summary(event: &RawEvent) -> String {
    let text = if event.description.is_empty() {
        event.identity.as_str()
    } else {
        event.description.as_str()
    };

    match event.magnitude {
        Some(magnitude) => format!("M{magnitude:.1} {text}"),
        None => text.to_string(),
    }
}

fn event_time(event: &RawEvent) -> String {
    match event.time {
        Some(time) => time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        None if !event.raw_time.is_empty() => event.raw_time.clone(),
        None => "unknown time".to_string(),
    }
}

fn describe_event(event: &RawEvent) -> String {
    format!("{} · {}", event_summary(event), event_time(event))
}
