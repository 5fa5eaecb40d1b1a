use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::protocol::{
    ConnectionsPayload, ConnectionsResponse, EarthquakesResponse, SimulationRequest,
    SimulationResponse, StatisticsPayload, StatusPayload,
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid server url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: StatusCode },
    #[error("could not decode {endpoint} response: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Hydration {
    pub status: StatusPayload,
    pub statistics: StatisticsPayload,
    pub connections: ConnectionsPayload,
    pub earthquakes: Option<Vec<Value>>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(server: &str, timeout: Duration) -> Result<Self, ApiError> {
        let mut base = Url::parse(server).map_err(|err| ApiError::InvalidUrl {
            url: server.to_string(),
            reason: err.to_string(),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl {
                url: server.to_string(),
                reason: "expected an http or https url".to_string(),
            });
        }
        let path = format!("{}/api/", base.path().trim_end_matches('/'));
        base.set_path(&path);

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Client)?;

        Ok(Self { http, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, endpoint: &str) -> Result<Url, ApiError> {
        self.base.join(endpoint).map_err(|err| ApiError::InvalidUrl {
            url: format!("{}{}", self.base, endpoint),
            reason: err.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        let url = self.endpoint(endpoint)?;
        debug!(%url, "GET");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| ApiError::Request {
                endpoint: endpoint.to_string(),
                source,
            })?;
        decode(endpoint, response).await
    }

    async fn post_json<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(endpoint)?;
        debug!(%url, "POST");
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Request {
                endpoint: endpoint.to_string(),
                source,
            })?;
        decode(endpoint, response).await
    }

    pub async fn status(&self) -> Result<StatusPayload, ApiError> {
        self.get_json("status").await
    }

    pub async fn statistics(&self) -> Result<StatisticsPayload, ApiError> {
        self.get_json("statistics").await
    }

    pub async fn connections(&self) -> Result<ConnectionsPayload, ApiError> {
        let response: ConnectionsResponse = self.get_json("connections").await?;
        Ok(response.connections.unwrap_or_default())
    }

    pub async fn earthquakes(&self) -> Result<Vec<Value>, ApiError> {
        let response: EarthquakesResponse = self.get_json("earthquakes").await?;
        Ok(response.earthquakes.unwrap_or_default())
    }

    pub async fn config(&self) -> Result<Value, ApiError> {
        self.get_json("full-config").await
    }

    pub async fn simulate(
        &self,
        request: &SimulationRequest,
    ) -> Result<SimulationResponse, ApiError> {
        self.post_json("simulate", request).await
    }

    pub async fn test_push(
        &self,
        disaster_type: &str,
        target_session: Option<&str>,
    ) -> Result<SimulationResponse, ApiError> {
        let mut url = self.endpoint("test-push")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("disaster_type", disaster_type);
            if let Some(target) = target_session {
                query.append_pair("target_session", target);
            }
        }
        debug!(%url, "POST");
        let response = self
            .http
            .post(url)
            .send()
            .await
            .map_err(|source| ApiError::Request {
                endpoint: "test-push".to_string(),
                source,
            })?;
        decode("test-push", response).await
    }

    /// The earthquake list is best effort.
    pub async fn hydrate(&self) -> Result<Hydration, ApiError> {
        let (status, statistics, connections) =
            tokio::try_join!(self.status(), self.statistics(), self.connections())?;

        let earthquakes = match self.earthquakes().await {
            Ok(list) => Some(list),
            Err(err) => {
                debug!(%err, "earthquake list unavailable");
                None
            }
        };

        Ok(Hydration {
            status,
            statistics,
            connections,
            earthquakes,
        })
    }
}

async fn decode<T: DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Status {
            endpoint: endpoint.to_string(),
            status,
        });
    }

    response.json().await.map_err(|source| ApiError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Query,
        http::StatusCode as AxumStatus,
        routing::{get, post},
    };
    use serde_json::json;
    use std::{collections::HashMap, net::SocketAddr};
    use tokio::net::TcpListener;

    async fn spawn(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router.into_make_service()).await;
        });
        addr
    }

    fn relay_router() -> Router {
        Router::new()
            .route(
                "/api/status",
                get(|| async {
                    Json(json!({
                        "running": true,
                        "uptime": "2小时",
                        "start_time": "2026-10-18T00:00:00+00:00",
                        "active_connections": 2,
                        "total_connections": 3,
                        "data_sources": ["fan_studio"]
                    }))
                }),
            )
            .route(
                "/api/statistics",
                get(|| async {
                    Json(json!({
                        "total_events": 4.0,
                        "by_type": { "earthquake": 4 },
                        "by_source": { "wolfx": null },
                        "recent_pushes": [{ "type": "earthquake", "id": "q1" }]
                    }))
                }),
            )
            .route(
                "/api/connections",
                get(|| async {
                    Json(json!({ "connections": { "wolfx": { "connected": true }, "p2pquake": null } }))
                }),
            )
            .route(
                "/api/full-config",
                get(|| async { Json(json!({ "websocket": { "port": 8089 }, "groups": [] })) }),
            )
            .route(
                "/api/simulate",
                post(|Json(body): Json<serde_json::Value>| async move {
                    Json(json!({
                        "success": body["disaster_type"] == "earthquake",
                        "message": "sent"
                    }))
                }),
            )
            .route(
                "/api/test-push",
                post(|Query(query): Query<HashMap<String, String>>| async move {
                    Json(json!({
                        "success": true,
                        "message": query.get("disaster_type").cloned().unwrap_or_default()
                    }))
                }),
            )
    }

    #[tokio::test]
    async fn hydrate_fetches_core_slices() {
        let addr = spawn(relay_router()).await;
        let client = ApiClient::new(&format!("http://{addr}"), DEFAULT_REQUEST_TIMEOUT)
            .expect("client");

        let hydration = client.hydrate().await.expect("hydrate");

        assert_eq!(hydration.status.running, Some(true));
        assert_eq!(hydration.status.active_connections, Some(2));
        assert_eq!(hydration.statistics.total_events, Some(4));
        assert_eq!(hydration.connections["wolfx"].connected, Some(true));
        assert_eq!(hydration.connections["p2pquake"].connected, None);
        assert_eq!(
            hydration.statistics.by_source.as_ref().map(|sources| sources["wolfx"]),
            Some(0)
        );
        assert!(
            hydration.earthquakes.is_none(),
            "missing earthquakes endpoint should not fail hydration"
        );
    }

    #[tokio::test]
    async fn admin_actions_round_trip() {
        let addr = spawn(relay_router()).await;
        let client = ApiClient::new(&format!("http://{addr}/"), DEFAULT_REQUEST_TIMEOUT)
            .expect("client");

        let response = client
            .simulate(&SimulationRequest {
                target_group: String::new(),
                disaster_type: "earthquake".into(),
                test_type: "china".into(),
                custom_params: json!({ "magnitude": 5.5 }),
            })
            .await
            .expect("simulate");
        assert!(response.succeeded());
        assert_eq!(response.summary(), "sent");

        let pushed = client
            .test_push("tsunami", Some("group-1"))
            .await
            .expect("test push");
        assert_eq!(pushed.message.as_deref(), Some("tsunami"));

        let config = client.config().await.expect("config");
        assert_eq!(config["websocket"]["port"], 8089);
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let router = Router::new().route(
            "/api/status",
            get(|| async { (AxumStatus::SERVICE_UNAVAILABLE, Json(json!({ "error": "down" }))) }),
        );
        let addr = spawn(router).await;
        let client = ApiClient::new(&format!("http://{addr}"), DEFAULT_REQUEST_TIMEOUT)
            .expect("client");

        match client.status().await {
            Err(ApiError::Status { endpoint, status }) => {
                assert_eq!(endpoint, "status");
                assert_eq!(status.as_u16(), 503);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(client.hydrate().await.is_err());
    }

    #[test]
    fn rejects_non_http_servers() {
        assert!(matches!(
            ApiClient::new("ftp://relay", DEFAULT_REQUEST_TIMEOUT),
            Err(ApiError::InvalidUrl { .. })
        ));
        assert!(ApiClient::new("not a url", DEFAULT_REQUEST_TIMEOUT).is_err());

        let nested = ApiClient::new("https://relay.example/admin/", DEFAULT_REQUEST_TIMEOUT)
            .expect("client");
        assert_eq!(nested.base().as_str(), "https://relay.example/admin/api/");
    }
}
