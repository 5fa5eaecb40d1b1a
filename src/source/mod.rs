use std::time::Duration;

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::debug;

use crate::{
    api::{ApiClient, ApiError, Hydration},
    transport::TransportChannel,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum SourceEvent {
    PollDue,
    Hydrated(Result<Box<Hydration>, ApiError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Realtime,
    Polling,
}

pub trait DataSource {
    fn kind(&self) -> SourceKind;

    fn request_refresh(&mut self, replies: &mpsc::UnboundedSender<SourceEvent>) -> bool;
}

impl DataSource for TransportChannel {
    fn kind(&self) -> SourceKind {
        SourceKind::Realtime
    }

    fn request_refresh(&mut self, _replies: &mpsc::UnboundedSender<SourceEvent>) -> bool {
        self.send_refresh_request()
    }
}

/// HTTP fallback. At most one fetch is in flight at a time.
#[derive(Debug)]
pub struct PollingSource {
    api: ApiClient,
    in_flight: Option<JoinHandle<()>>,
}

impl PollingSource {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            in_flight: None,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

impl DataSource for PollingSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Polling
    }

    fn request_refresh(&mut self, replies: &mpsc::UnboundedSender<SourceEvent>) -> bool {
        if self.is_fetching() {
            debug!("poll already in flight");
            return true;
        }

        let api = self.api.clone();
        let replies = replies.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = api.hydrate().await.map(Box::new);
            let _ = replies.send(SourceEvent::Hydrated(result));
        }));
        true
    }
}

impl Drop for PollingSource {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug)]
pub struct PollSchedule {
    period: Duration,
    replies: mpsc::UnboundedSender<SourceEvent>,
    handle: Option<JoinHandle<()>>,
}

impl PollSchedule {
    pub fn new(period: Duration, replies: mpsc::UnboundedSender<SourceEvent>) -> Self {
        Self {
            period,
            replies,
            handle: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    pub fn arm(&mut self) -> bool {
        if self.is_armed() {
            return false;
        }

        let period = self.period;
        let replies = self.replies.clone();
        self.handle = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if replies.send(SourceEvent::PollDue).is_err() {
                    break;
                }
            }
        }));

        debug!(period_secs = period.as_secs(), "polling armed");
        true
    }

    pub fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("polling disarmed");
        }
    }
}

impl Drop for PollSchedule {
    fn drop(&mut self) {
        self.disarm();
    }
}
