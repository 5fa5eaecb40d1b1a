use std::{path::PathBuf, time::Duration};

use clap::Parser;
use reqwest::Url;

use crate::{
    api::DEFAULT_REQUEST_TIMEOUT, source::DEFAULT_POLL_INTERVAL,
    transport::DEFAULT_RECONNECT_DELAY,
};

#[derive(Debug, Clone, Parser)]
#[command(name = "alertdeck", about = "Live dashboard for a disaster-alert relay")]
pub struct Config {
    #[arg(
        long = "server",
        env = "ALERTDECK_SERVER",
        value_name = "URL",
        default_value = "http://127.0.0.1:8089",
        help = "Base URL of the relay; REST endpoints live under /api"
    )]
    pub server: String,

    #[arg(
        long = "ws-url",
        env = "ALERTDECK_WS_URL",
        value_name = "URL",
        help = "Real-time endpoint; derived from --server when omitted"
    )]
    pub ws_url: Option<String>,

    #[arg(
        long = "reconnect-delay",
        env = "ALERTDECK_RECONNECT_DELAY",
        value_name = "SECS",
        default_value_t = DEFAULT_RECONNECT_DELAY.as_secs(),
        help = "Seconds to wait before reopening a dropped real-time channel"
    )]
    pub reconnect_delay_secs: u64,

    #[arg(
        long = "poll-interval",
        env = "ALERTDECK_POLL_INTERVAL",
        value_name = "SECS",
        default_value_t = DEFAULT_POLL_INTERVAL.as_secs(),
        help = "Seconds between HTTP refreshes while the real-time channel is down"
    )]
    pub poll_interval_secs: u64,

    #[arg(
        long = "request-timeout",
        env = "ALERTDECK_REQUEST_TIMEOUT",
        value_name = "SECS",
        default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs(),
        help = "Timeout for each REST request"
    )]
    pub request_timeout_secs: u64,

    #[arg(
        long,
        env = "ALERTDECK_HEADLESS",
        help = "Skip the terminal UI and log dashboard changes instead"
    )]
    pub headless: bool,

    #[arg(
        long = "log-file",
        env = "ALERTDECK_LOG_FILE",
        value_name = "FILE",
        help = "Write logs to FILE while the terminal UI is active"
    )]
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn websocket_url(&self) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }

        let Ok(mut url) = Url::parse(&self.server) else {
            return self.server.clone();
        };
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        if url.set_scheme(scheme).is_err() {
            return self.server.clone();
        }
        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.set_query(None);
        url.to_string()
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
