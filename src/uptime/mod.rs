use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::debug;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);
pub const JUST_NOW: &str = "just now";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UptimeTick;

pub fn format_uptime(elapsed_secs: i64) -> String {
    if elapsed_secs < 0 {
        return JUST_NOW.to_string();
    }

    let days = elapsed_secs / 86_400;
    let hours = (elapsed_secs % 86_400) / 3_600;
    let minutes = (elapsed_secs % 3_600) / 60;
    let seconds = elapsed_secs % 60;

    let mut parts = Vec::with_capacity(4);
    if days > 0 {
        parts.push(unit(days, "day"));
    }
    if hours > 0 {
        parts.push(unit(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(unit(minutes, "minute"));
    }
    parts.push(unit(seconds, "second"));
    parts.join(" ")
}

fn unit(value: i64, name: &str) -> String {
    if value == 1 {
        format!("{value} {name}")
    } else {
        format!("{value} {name}s")
    }
}

pub fn render_uptime(reference: DateTime<Utc>, now: DateTime<Utc>) -> String {
    // div_euclid floors toward negative infinity, so 0.5s in the future is -1
    let elapsed_ms = (now - reference).num_milliseconds();
    format_uptime(elapsed_ms.div_euclid(1_000))
}

#[derive(Debug)]
pub struct UptimeTicker {
    ticks: mpsc::UnboundedSender<UptimeTick>,
    reference: Option<DateTime<Utc>>,
    handle: Option<JoinHandle<()>>,
}

impl UptimeTicker {
    pub fn new(ticks: mpsc::UnboundedSender<UptimeTick>) -> Self {
        Self {
            ticks,
            reference: None,
            handle: None,
        }
    }

    pub fn start(&mut self, reference: DateTime<Utc>) -> bool {
        if self.is_running() && self.reference == Some(reference) {
            return false;
        }
        self.stop();

        let ticks = self.ticks.clone();
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if ticks.send(UptimeTick).is_err() {
                    break;
                }
            }
        });

        debug!(%reference, "uptime ticker started");
        self.reference = Some(reference);
        self.handle = Some(handle);
        true
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("uptime ticker stopped");
        }
        self.reference = None;
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn reference(&self) -> Option<DateTime<Utc>> {
        self.reference
    }
}

impl Drop for UptimeTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn drain(rx: &mut mpsc::UnboundedReceiver<UptimeTick>) -> usize {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[test]
    fn formats_hours_minutes_seconds_without_days() {
        assert_eq!(format_uptime(3_661), "1 hour 1 minute 1 second");
        assert_eq!(format_uptime(0), "0 seconds");
        assert_eq!(format_uptime(59), "59 seconds");
        assert_eq!(format_uptime(86_400 * 2 + 5), "2 days 5 seconds");
        assert_eq!(format_uptime(7_320), "2 hours 2 minutes 0 seconds");
    }

    #[test]
    fn future_reference_renders_just_now() {
        assert_eq!(format_uptime(-1), JUST_NOW);

        let now = Utc::now();
        assert_eq!(render_uptime(now + TimeDelta::seconds(30), now), JUST_NOW);
        assert_eq!(
            render_uptime(now - TimeDelta::seconds(3_661), now),
            "1 hour 1 minute 1 second"
        );
        assert_eq!(
            render_uptime(now - TimeDelta::milliseconds(1_999), now),
            "1 second"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_second() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ticker = UptimeTicker::new(tx);

        assert!(ticker.start(Utc::now()));
        time::sleep(Duration::from_millis(3_500)).await;

        assert_eq!(drain(&mut rx), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn starting_twice_with_same_reference_keeps_one_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ticker = UptimeTicker::new(tx);
        let reference = Utc::now();

        assert!(ticker.start(reference));
        assert!(!ticker.start(reference));
        time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(drain(&mut rx), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_reference_restarts_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ticker = UptimeTicker::new(tx);
        let reference = Utc::now();

        assert!(ticker.start(reference));
        assert!(ticker.start(reference - TimeDelta::seconds(10)));
        assert_eq!(ticker.reference(), Some(reference - TimeDelta::seconds(10)));
        time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(drain(&mut rx), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_silences_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ticker = UptimeTicker::new(tx);

        ticker.start(Utc::now());
        ticker.stop();
        ticker.stop();
        assert!(!ticker.is_running());
        assert!(ticker.reference().is_none());

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(drain(&mut rx), 0);
    }
}
