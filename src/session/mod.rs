use std::time::Duration;

use chrono::Utc;
use tokio::{select, sync::mpsc, task::JoinHandle};
use tracing::{debug, info, trace, warn};

use crate::{
    api::{ApiClient, ApiError, Hydration},
    events::{EventAggregator, EventFilter, EventGroup},
    protocol::{InboundMessage, MessageKind, SimulationRequest, SimulationResponse, UpdateData},
    source::{DataSource, PollSchedule, PollingSource, SourceEvent},
    state::{StateStore, StatusPatch},
    transport::{ChannelConfig, ConnectionState, TransportChannel, TransportEvent},
    uptime::{UptimeTick, UptimeTicker, render_uptime},
};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ws_url: String,
    pub api: ApiClient,
    pub reconnect_delay: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug)]
struct ActionReport {
    succeeded: bool,
    summary: String,
}

impl From<SimulationResponse> for ActionReport {
    fn from(response: SimulationResponse) -> Self {
        Self {
            succeeded: response.succeeded(),
            summary: response.summary(),
        }
    }
}

#[derive(Debug)]
struct ActionOutcome {
    action: &'static str,
    result: Result<ActionReport, ApiError>,
}

pub struct Session {
    store: StateStore,
    aggregator: EventAggregator,
    channel: TransportChannel,
    polling: PollingSource,
    schedule: PollSchedule,
    ticker: UptimeTicker,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    tick_rx: mpsc::UnboundedReceiver<UptimeTick>,
    source_tx: mpsc::UnboundedSender<SourceEvent>,
    source_rx: mpsc::UnboundedReceiver<SourceEvent>,
    action_tx: mpsc::UnboundedSender<ActionOutcome>,
    action_rx: mpsc::UnboundedReceiver<ActionOutcome>,
    actions: Vec<JoinHandle<()>>,
    connection: ConnectionState,
    torn_down: bool,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let (source_tx, source_rx) = mpsc::unbounded_channel();
        let (action_tx, action_rx) = mpsc::unbounded_channel();

        let channel = TransportChannel::new(
            ChannelConfig {
                url: config.ws_url,
                reconnect_delay: config.reconnect_delay,
            },
            transport_tx,
        );

        Self {
            store: StateStore::new(),
            aggregator: EventAggregator::new(),
            channel,
            polling: PollingSource::new(config.api),
            schedule: PollSchedule::new(config.poll_interval, source_tx.clone()),
            ticker: UptimeTicker::new(tick_tx),
            transport_rx,
            tick_rx,
            source_tx,
            source_rx,
            action_tx,
            action_rx,
            actions: Vec::new(),
            connection: ConnectionState::Disconnected,
            torn_down: false,
        }
    }

    pub fn start(&mut self) {
        if self.torn_down {
            return;
        }
        info!(url = %self.channel.url(), "starting session");
        self.channel.connect();
        self.sync_connection();
        self.polling.request_refresh(&self.source_tx);
        self.schedule.arm();
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut StateStore {
        &mut self.store
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn uptime_text(&self) -> &str {
        &self.store.status().uptime_text
    }

    pub fn groups(&self) -> &[EventGroup] {
        self.aggregator.groups()
    }

    pub fn aggregator(&self) -> &EventAggregator {
        &self.aggregator
    }

    pub fn cycle_filter(&mut self) -> EventFilter {
        self.aggregator.cycle_filter()
    }

    pub fn toggle_group(&mut self, identity: &str) -> Option<bool> {
        self.aggregator.toggle(identity)
    }

    pub fn dismiss_alert(&mut self) -> bool {
        self.store.dismiss_alert()
    }

    pub fn refresh(&mut self) {
        if self.torn_down {
            return;
        }
        if !self.channel.is_open() {
            self.schedule.arm();
        }
        self.request_refresh();
    }

    pub fn simulate(&mut self, request: SimulationRequest) {
        if self.torn_down {
            return;
        }
        let api = self.polling.api().clone();
        let replies = self.action_tx.clone();
        self.spawn_action(async move {
            let result = api.simulate(&request).await.map(ActionReport::from);
            let _ = replies.send(ActionOutcome {
                action: "simulation",
                result,
            });
        });
    }

    pub fn test_push(&mut self, disaster_type: String, target_session: Option<String>) {
        if self.torn_down {
            return;
        }
        let api = self.polling.api().clone();
        let replies = self.action_tx.clone();
        self.spawn_action(async move {
            let result = api
                .test_push(&disaster_type, target_session.as_deref())
                .await
                .map(ActionReport::from);
            let _ = replies.send(ActionOutcome {
                action: "test push",
                result,
            });
        });
    }

    pub fn inspect_config(&mut self) {
        if self.torn_down {
            return;
        }
        let api = self.polling.api().clone();
        let replies = self.action_tx.clone();
        self.spawn_action(async move {
            let result = api.config().await.map(|config| {
                let sections: Vec<&str> = config
                    .as_object()
                    .map(|object| object.keys().map(String::as_str).collect())
                    .unwrap_or_default();
                ActionReport {
                    succeeded: true,
                    summary: if sections.is_empty() {
                        "no sections".to_string()
                    } else {
                        format!("sections {}", sections.join(", "))
                    },
                }
            });
            let _ = replies.send(ActionOutcome {
                action: "config fetch",
                result,
            });
        });
    }

    /// Cancel safe: nothing is applied until an event has been received.
    pub async fn step(&mut self) -> bool {
        if self.torn_down {
            return false;
        }

        select! {
            Some(event) = self.transport_rx.recv() => self.handle_transport(event),
            Some(UptimeTick) = self.tick_rx.recv() => self.handle_tick(),
            Some(event) = self.source_rx.recv() => self.handle_source(event),
            Some(outcome) = self.action_rx.recv() => self.handle_action(outcome),
            else => return false,
        }

        true
    }

    pub fn shutdown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.channel.shutdown();
        self.connection = ConnectionState::Disconnected;
        self.ticker.stop();
        self.schedule.disarm();
        self.polling.cancel();
        for action in self.actions.drain(..) {
            action.abort();
        }

        while self.transport_rx.try_recv().is_ok() {}
        while self.tick_rx.try_recv().is_ok() {}
        while self.source_rx.try_recv().is_ok() {}
        while self.action_rx.try_recv().is_ok() {}

        info!("session shut down");
    }

    fn request_refresh(&mut self) {
        let replies = self.source_tx.clone();
        let source: &mut dyn DataSource = if self.channel.is_open() {
            &mut self.channel
        } else {
            &mut self.polling
        };

        let kind = source.kind();
        if source.request_refresh(&replies) {
            debug!(?kind, "refresh requested");
        } else {
            debug!(?kind, "refresh could not be issued");
        }
    }

    fn spawn_action<F>(&mut self, action: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.actions.retain(|handle| !handle.is_finished());
        self.actions.push(tokio::spawn(action));
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        let message = self.channel.handle_event(event);
        self.sync_connection();
        if let Some(message) = message {
            self.apply_message(message);
        }
    }

    fn sync_connection(&mut self) {
        let state = self.channel.state();
        if state == self.connection {
            return;
        }

        debug!(
            from = self.connection.label(),
            to = state.label(),
            reconnect_pending = self.channel.reconnect_pending(),
            "connection state changed"
        );
        let was_connected = self.connection == ConnectionState::Connected;
        self.connection = state;
        self.store
            .set_realtime_connected(state == ConnectionState::Connected);

        match state {
            ConnectionState::Connected => {
                self.schedule.disarm();
                self.polling.cancel();
            }
            ConnectionState::Disconnected if was_connected => {
                self.schedule.arm();
            }
            _ => {}
        }
    }

    fn apply_message(&mut self, message: InboundMessage) {
        match &message.kind {
            kind if kind.carries_data() => {
                if let Some(new_event) = &message.new_event {
                    debug!(event = %new_event, "new event announced");
                }
                if let Some(data) = message.data {
                    self.apply_update(data);
                }
            }
            MessageKind::Pong => trace!("pong"),
            MessageKind::Unknown(kind) => debug!(%kind, "ignoring unknown message type"),
            _ => {}
        }
    }

    fn apply_update(&mut self, data: UpdateData) {
        if let Some(status) = &data.status {
            self.store.apply_status(StatusPatch::from_payload(status));
            self.sync_ticker();
        }
        if let Some(statistics) = &data.statistics {
            self.store.apply_statistics(statistics);
            self.aggregator
                .recompute(&self.store.statistics().recent_events);
        }
        if let Some(connections) = &data.connections {
            self.store.apply_connections(connections);
        }
        if let Some(earthquakes) = &data.earthquakes {
            self.store.apply_earthquakes(earthquakes);
        }
    }

    fn apply_hydration(&mut self, hydration: Hydration) {
        self.apply_update(UpdateData {
            status: Some(hydration.status),
            statistics: Some(hydration.statistics),
            connections: Some(hydration.connections),
            earthquakes: hydration.earthquakes,
        });
    }

    fn sync_ticker(&mut self) {
        let status = self.store.status();
        match (status.running, status.reference_start_time) {
            (true, Some(reference)) => {
                if self.ticker.start(reference) {
                    let text = render_uptime(reference, Utc::now());
                    self.store.apply_status(StatusPatch::uptime(text));
                }
            }
            _ => self.ticker.stop(),
        }
    }

    fn handle_tick(&mut self) {
        let Some(reference) = self.ticker.reference() else {
            return;
        };
        let text = render_uptime(reference, Utc::now());
        self.store.apply_status(StatusPatch::uptime(text));
    }

    fn handle_source(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::PollDue => self.request_refresh(),
            SourceEvent::Hydrated(_) if self.connection == ConnectionState::Connected => {
                debug!("discarding http result, real-time channel is up");
            }
            SourceEvent::Hydrated(Ok(hydration)) => {
                debug!("hydrated over http");
                self.apply_hydration(*hydration);
            }
            SourceEvent::Hydrated(Err(err)) => {
                warn!(%err, "fallback poll failed");
                self.schedule.disarm();
                self.store
                    .raise_alert(format!("Failed to refresh dashboard data: {err}"));
            }
        }
    }

    fn handle_action(&mut self, outcome: ActionOutcome) {
        let ActionOutcome { action, result } = outcome;
        let message = match result {
            Ok(report) if report.succeeded => {
                info!(action, "admin action succeeded");
                format!("{action} succeeded: {}", report.summary)
            }
            Ok(report) => {
                warn!(action, summary = %report.summary, "admin action rejected");
                format!("{action} failed: {}", report.summary)
            }
            Err(err) => {
                warn!(action, %err, "admin action request failed");
                format!("{action} request failed: {err}")
            }
        };
        self.store.raise_alert(message);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::DEFAULT_REQUEST_TIMEOUT,
        protocol::decode_frame,
        state::{Slice, UPTIME_PLACEHOLDER},
    };
    use axum::{
        Json, Router,
        extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        response::IntoResponse,
        routing::{get, post},
    };
    use chrono::TimeDelta;
    use serde_json::json;
    use std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
    };
    use tokio::{net::TcpListener, time};

    fn session_for(addr: SocketAddr) -> Session {
        let api = ApiClient::new(&format!("http://{addr}"), DEFAULT_REQUEST_TIMEOUT)
            .expect("client");
        Session::new(SessionConfig {
            ws_url: format!("ws://{addr}/ws"),
            api,
            reconnect_delay: Duration::from_secs(3),
            poll_interval: Duration::from_secs(30),
        })
    }

    fn offline_session() -> Session {
        session_for(SocketAddr::from(([127, 0, 0, 1], 9)))
    }

    fn inject(session: &mut Session, frame: serde_json::Value) {
        let message = decode_frame(&frame.to_string()).expect("frame should decode");
        session.apply_message(message);
    }

    fn status_frame(status: serde_json::Value) -> serde_json::Value {
        json!({ "type": "update", "data": { "status": status } })
    }

    #[tokio::test]
    async fn statistics_frame_regroups_events() {
        let mut session = offline_session();

        inject(
            &mut session,
            json!({
                "type": "full_update",
                "data": {
                    "statistics": {
                        "total_events": 3,
                        "recent_pushes": [
                            { "type": "earthquake", "event_id": "a", "time": "2026-10-18T01:00:00Z" },
                            { "type": "earthquake", "event_id": "a", "time": "2026-10-18T02:00:00Z" },
                            { "type": "tsunami", "event_id": "b", "time": "2026-10-18T03:00:00Z" }
                        ]
                    },
                    "connections": { "wolfx": { "connected": true } }
                }
            }),
        );

        let groups = session.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].identity, "b");
        assert_eq!(groups[1].update_count(), 2);
        assert!(session.store().state().connections["wolfx"].connected);

        assert_eq!(session.toggle_group("a"), Some(true));
        session.aggregator.set_filter(EventFilter::Earthquake);
        assert_eq!(session.groups().len(), 1);
        assert!(session.aggregator().is_expanded("a"));
    }

    #[tokio::test]
    async fn unknown_and_pong_frames_leave_store_untouched() {
        let mut session = offline_session();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session
            .store_mut()
            .subscribe(move |slice, _| sink.lock().expect("lock").push(slice));

        inject(&mut session, json!({ "type": "pong" }));
        inject(&mut session, json!({ "type": "mystery", "data": { "status": { "running": true } } }));
        inject(&mut session, json!({ "type": "event", "new_event": { "id": "x" } }));

        assert!(seen.lock().expect("lock").is_empty());
        assert!(!session.store().status().running);
    }

    #[tokio::test]
    async fn running_status_with_start_time_starts_ticker() {
        let mut session = offline_session();
        let started = Utc::now() - TimeDelta::seconds(3_661);

        inject(
            &mut session,
            status_frame(json!({ "running": true, "start_time": started.to_rfc3339() })),
        );

        assert!(session.ticker.is_running());
        assert!(session.uptime_text().starts_with("1 hour 1 minute"));

        inject(&mut session, status_frame(json!({ "running": false })));
        assert!(!session.ticker.is_running());
    }

    #[tokio::test]
    async fn partial_status_without_uptime_keeps_rendered_text() {
        let mut session = offline_session();
        assert_eq!(session.uptime_text(), UPTIME_PLACEHOLDER);

        inject(&mut session, status_frame(json!({ "running": true, "uptime": "3小时" })));
        assert_eq!(session.uptime_text(), "3小时");
        assert!(!session.ticker.is_running());

        inject(&mut session, status_frame(json!({ "active_connections": 4 })));
        assert_eq!(session.uptime_text(), "3小时");
        assert_eq!(session.store().status().active_connections, 4);
        assert!(!session.ticker.is_running());
    }

    #[tokio::test]
    async fn repeated_status_with_same_start_time_keeps_one_ticker() {
        let mut session = offline_session();
        let started = (Utc::now() - TimeDelta::seconds(10)).to_rfc3339();
        let renders = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&renders);
        session.store_mut().subscribe(move |slice, _| {
            if slice == Slice::Status {
                *sink.lock().expect("lock") += 1;
            }
        });

        inject(&mut session, status_frame(json!({ "running": true, "start_time": started })));
        inject(&mut session, status_frame(json!({ "running": true, "start_time": started })));

        // each frame applies once; only the first also renders the uptime
        assert_eq!(*renders.lock().expect("lock"), 3);
        assert!(session.ticker.is_running());
    }

    #[tokio::test]
    async fn failed_poll_raises_one_alert_and_disarms() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let mut session = session_for(addr);
        session.start();
        assert!(session.schedule.is_armed());

        while session.store().alert().is_none() {
            assert!(
                time::timeout(Duration::from_secs(5), session.step())
                    .await
                    .expect("step before timeout")
            );
        }

        assert!(!session.schedule.is_armed());
        assert!(
            session
                .store()
                .alert()
                .is_some_and(|alert| alert.message.contains("Failed to refresh"))
        );

        session.refresh();
        assert!(session.schedule.is_armed());
        session.shutdown();
    }

    #[tokio::test]
    async fn shutdown_stops_everything_and_ignores_later_events() {
        let mut session = offline_session();
        inject(
            &mut session,
            status_frame(json!({ "running": true, "start_time": Utc::now().to_rfc3339() })),
        );
        session.start();

        session.shutdown();
        session.shutdown();

        assert!(session.torn_down);
        assert!(!session.ticker.is_running());
        assert!(!session.schedule.is_armed());
        assert!(!session.channel.reconnect_pending());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(!session.step().await);
    }

    fn relay_statistics() -> serde_json::Value {
        json!({
            "total_events": 1,
            "recent_pushes": [{ "type": "earthquake", "id": "q", "time": "2026-10-18T01:00:00Z" }]
        })
    }

    #[tokio::test]
    async fn admin_action_results_surface_as_alerts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let router = Router::new()
            .route(
                "/api/simulate",
                post(|| async { Json(json!({ "success": false, "error": "unknown group" })) }),
            )
            .route(
                "/api/test-push",
                post(|| async { Json(json!({ "success": true, "message": "pushed" })) }),
            )
            .route(
                "/api/full-config",
                get(|| async { Json(json!({ "websocket": { "port": 8089 }, "groups": [] })) }),
            );
        tokio::spawn(async move {
            let _ = axum::serve(listener, router.into_make_service()).await;
        });

        let mut session = session_for(addr);
        session.simulate(SimulationRequest {
            target_group: "nobody".into(),
            disaster_type: "earthquake".into(),
            test_type: "china".into(),
            custom_params: json!({}),
        });
        while session.store().alert().is_none() {
            assert!(
                time::timeout(Duration::from_secs(5), session.step())
                    .await
                    .expect("step before timeout")
            );
        }
        assert_eq!(
            session.store().alert().map(|alert| alert.message.as_str()),
            Some("simulation failed: unknown group")
        );

        assert!(session.dismiss_alert());
        session.test_push("tsunami".into(), None);
        while session.store().alert().is_none() {
            assert!(
                time::timeout(Duration::from_secs(5), session.step())
                    .await
                    .expect("step before timeout")
            );
        }
        assert_eq!(
            session.store().alert().map(|alert| alert.message.as_str()),
            Some("test push succeeded: pushed")
        );

        assert!(session.dismiss_alert());
        session.inspect_config();
        while session.store().alert().is_none() {
            assert!(
                time::timeout(Duration::from_secs(5), session.step())
                    .await
                    .expect("step before timeout")
            );
        }
        assert_eq!(
            session.store().alert().map(|alert| alert.message.as_str()),
            Some("config fetch succeeded: sections groups, websocket")
        );
    }

    #[tokio::test]
    async fn nested_nulls_default_and_keep_sibling_slices() {
        let mut session = offline_session();
        inject(
            &mut session,
            json!({
                "type": "full_update",
                "data": {
                    "status": { "running": true, "active_connections": 5 },
                    "statistics": { "total_events": 2.0, "by_type": { "earthquake": null } },
                    "connections": { "wolfx": null }
                }
            }),
        );

        assert_eq!(session.store().status().active_connections, 5);
        assert_eq!(session.store().statistics().total_events, 2);
        assert_eq!(session.store().statistics().earthquake_count(), 0);
        assert!(!session.store().state().connections["wolfx"].connected);
    }

    #[tokio::test]
    async fn unreadable_slice_leaves_its_store_slice_untouched() {
        let mut session = offline_session();
        inject(
            &mut session,
            json!({ "type": "update", "data": { "statistics": { "total_events": 4 } } }),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session
            .store_mut()
            .subscribe(move |slice, _| sink.lock().expect("lock").push(slice));

        inject(
            &mut session,
            json!({ "type": "update", "data": { "statistics": "oops", "status": { "active_connections": 2 } } }),
        );

        assert_eq!(*seen.lock().expect("lock"), vec![Slice::Status]);
        assert_eq!(session.store().statistics().total_events, 4);
        assert_eq!(session.store().status().active_connections, 2);
    }

    #[tokio::test]
    async fn http_results_are_discarded_while_connected() {
        let mut session = offline_session();
        session.connection = ConnectionState::Connected;

        let mut hydration = Hydration::default();
        hydration.status.active_connections = Some(9);
        session.handle_source(SourceEvent::Hydrated(Ok(Box::new(hydration))));
        session.handle_source(SourceEvent::Hydrated(Err(ApiError::Status {
            endpoint: "status".into(),
            status: reqwest::StatusCode::BAD_GATEWAY,
        })));

        assert_eq!(session.store().status().active_connections, 0);
        assert!(session.store().alert().is_none());
    }

    async fn noisy_relay_socket(mut socket: WebSocket) {
        let _ = socket.send(WsMessage::Text("{ broken".into())).await;
        let frame = json!({
            "type": "update",
            "data": {
                "status": { "running": true, "active_connections": 5 },
                "statistics": { "total_events": 2, "by_type": { "earthquake": null } },
                "connections": { "wolfx": null }
            }
        });
        let _ = socket.send(WsMessage::Text(frame.to_string())).await;
        while let Some(Ok(_)) = socket.recv().await {}
    }

    async fn noisy_ws_handler(upgrade: WebSocketUpgrade) -> impl IntoResponse {
        upgrade.on_upgrade(noisy_relay_socket)
    }

    #[tokio::test]
    async fn malformed_frames_touch_no_slice() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let router = Router::new().route("/ws", get(noisy_ws_handler));
        tokio::spawn(async move {
            let _ = axum::serve(listener, router.into_make_service()).await;
        });

        let mut session = session_for(addr);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session
            .store_mut()
            .subscribe(move |slice, _| sink.lock().expect("lock").push(slice));

        session.channel.connect();
        while !seen.lock().expect("lock").contains(&Slice::Connections) {
            assert!(
                time::timeout(Duration::from_secs(5), session.step())
                    .await
                    .expect("step before timeout")
            );
        }

        assert_eq!(
            *seen.lock().expect("lock"),
            vec![
                Slice::Realtime,
                Slice::Status,
                Slice::Statistics,
                Slice::Connections
            ]
        );
        assert_eq!(session.store().status().active_connections, 5);
        assert_eq!(session.store().statistics().total_events, 2);

        session.shutdown();
    }

    async fn relay_socket(mut socket: WebSocket) {
        let frame = json!({
            "type": "full_update",
            "data": {
                "status": { "running": true, "uptime": "5 minutes", "active_connections": 1 },
                "statistics": relay_statistics()
            }
        });
        let _ = socket.send(WsMessage::Text(frame.to_string())).await;
        while let Some(Ok(_)) = socket.recv().await {}
    }

    async fn ws_handler(upgrade: WebSocketUpgrade) -> impl IntoResponse {
        upgrade.on_upgrade(relay_socket)
    }

    #[tokio::test]
    async fn realtime_frames_hydrate_and_disarm_polling() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let router = Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/status", get(|| async { Json(json!({ "running": false })) }))
            .route("/api/statistics", get(|| async { Json(relay_statistics()) }))
            .route("/api/connections", get(|| async { Json(json!({ "connections": {} })) }));
        tokio::spawn(async move {
            let _ = axum::serve(listener, router.into_make_service()).await;
        });

        let mut session = session_for(addr);
        session.start();

        while session.groups().is_empty() || session.connection_state() != ConnectionState::Connected {
            assert!(
                time::timeout(Duration::from_secs(5), session.step())
                    .await
                    .expect("step before timeout")
            );
        }

        assert!(session.store().state().realtime_connected);
        assert!(!session.schedule.is_armed());
        assert!(!session.polling.is_fetching());
        assert_eq!(session.groups()[0].identity, "q");

        session.shutdown();
    }
}
