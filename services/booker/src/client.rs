//! HTTP client for the external booking API.
//!
//! Endpoints live under `/api/v1/servers`. Successful calls return 200 (or
//! 204 for "nothing"); failures carry a JSON `{code, message}` body.

use std::time::Duration;

use booker_retry::{retry_when, RetryPolicy};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::driver::{DriverError, DriverResult};

/// A server as described by the booking API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiServer {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub ip_address: String,
    pub port: u16,
    #[serde(default)]
    pub stv_port: u16,
    #[serde(default)]
    pub server_password: String,
    #[serde(default)]
    pub rcon_password: String,
    #[serde(default)]
    pub executable: String,
    #[serde(default)]
    pub options: String,
    #[serde(default)]
    pub running: bool,
}

impl ApiServer {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }

    pub fn stv_address(&self) -> String {
        format!("{}:{}", self.ip_address, self.stv_port)
    }
}

/// Error body returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Outcome of a game update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Done,
    Pending,
}

#[derive(Serialize)]
struct UuidRequest<'a> {
    uuid: &'a str,
}

#[derive(Serialize)]
struct SetPasswordRequest<'a> {
    uuid: &'a str,
    rcon_password: &'a str,
    server_password: &'a str,
}

#[derive(Serialize)]
struct SendCommandRequest<'a> {
    uuid: &'a str,
    command: &'a str,
}

#[derive(Deserialize)]
struct ConsoleResponse {
    #[serde(default)]
    console_lines: Vec<String>,
}

/// Booking API client.
#[derive(Clone)]
pub struct BookingApiClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl BookingApiClient {
    /// Create a new client. `retry_attempts` of 1 disables retries.
    pub fn new(base_url: &str, retry_attempts: u32) -> DriverResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DriverError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        let retry = if retry_attempts > 1 {
            RetryPolicy::exponential(retry_attempts)
        } else {
            RetryPolicy::default()
        };

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/servers/{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> DriverResult<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| DriverError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|err| format!("{} ({})", err.message, err.code))
            .unwrap_or(body);
        error!(status = %status, message = %message, "Booking API request failed");
        Err(DriverError::Rejected(format!("{status}: {message}")))
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> DriverResult<reqwest::Response> {
        let url = self.url(path);
        retry_when(
            &self.retry,
            |e: &DriverError| matches!(e, DriverError::Unavailable(_)),
            |_| self.send(self.client.post(&url).json(body)),
        )
        .await
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> DriverResult<reqwest::Response> {
        let url = self.url(path);
        retry_when(
            &self.retry,
            |e: &DriverError| matches!(e, DriverError::Unavailable(_)),
            |_| self.send(self.client.get(&url).query(query)),
        )
        .await
    }

    /// Next free server carrying `tag`, or `None` when the API has none.
    pub async fn next(&self, tag: &str) -> DriverResult<Option<ApiServer>> {
        debug!(tag = %tag, "Fetching next server");
        let response = self.get("next", &[("tag", tag)]).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let server = response
            .json::<ApiServer>()
            .await
            .map_err(|e| DriverError::Rejected(format!("invalid server payload: {e}")))?;
        Ok(Some(server))
    }

    pub async fn start(&self, uuid: &str) -> DriverResult<()> {
        self.post("start", &UuidRequest { uuid }).await?;
        Ok(())
    }

    pub async fn stop(&self, uuid: &str) -> DriverResult<()> {
        self.post("stop", &UuidRequest { uuid }).await?;
        Ok(())
    }

    pub async fn set_password(
        &self,
        uuid: &str,
        rcon_password: &str,
        server_password: &str,
    ) -> DriverResult<()> {
        self.post(
            "setpassword",
            &SetPasswordRequest {
                uuid,
                rcon_password,
                server_password,
            },
        )
        .await?;
        Ok(())
    }

    pub async fn send_command(&self, uuid: &str, command: &str) -> DriverResult<()> {
        self.post("sendcommand", &SendCommandRequest { uuid, command })
            .await?;
        Ok(())
    }

    /// Ask the API to update the game files.
    pub async fn update(&self, uuid: &str) -> DriverResult<UpdateStatus> {
        let response = self.post("update", &UuidRequest { uuid }).await?;
        if response.status() == StatusCode::ACCEPTED {
            Ok(UpdateStatus::Pending)
        } else {
            Ok(UpdateStatus::Done)
        }
    }

    /// Console output, empty when the API has none.
    pub async fn console(&self, uuid: &str) -> DriverResult<Vec<String>> {
        let response = self.get("console", &[("uuid", uuid)]).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }

        let body = response
            .json::<ConsoleResponse>()
            .await
            .map_err(|e| DriverError::Rejected(format!("invalid console payload: {e}")))?;
        Ok(body.console_lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn server_json() -> serde_json::Value {
        serde_json::json!({
            "uuid": "6f1c",
            "name": "API 1",
            "tags": ["eu"],
            "ip_address": "10.1.1.1",
            "port": 27015,
            "stv_port": 27020,
            "server_password": "",
            "rcon_password": "",
            "executable": "srcds_run",
            "options": "",
            "running": false
        })
    }

    #[tokio::test]
    async fn test_next_returns_server() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/servers/next"))
            .and(query_param("tag", "eu"))
            .respond_with(ResponseTemplate::new(200).set_body_json(server_json()))
            .mount(&mock)
            .await;

        let client = BookingApiClient::new(&mock.uri(), 1).unwrap();
        let server = client.next("eu").await.unwrap().unwrap();
        assert_eq!(server.uuid, "6f1c");
        assert_eq!(server.address(), "10.1.1.1:27015");
        assert_eq!(server.stv_address(), "10.1.1.1:27020");
    }

    #[tokio::test]
    async fn test_next_no_content() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/servers/next"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock)
            .await;

        let client = BookingApiClient::new(&mock.uri(), 1).unwrap();
        assert!(client.next("eu").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_body_is_rejected() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/servers/start"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(serde_json::json!({"code": 7, "message": "already running"})),
            )
            .expect(1)
            .mount(&mock)
            .await;

        let client = BookingApiClient::new(&mock.uri(), 3).unwrap();
        match client.start("6f1c").await {
            Err(DriverError::Rejected(msg)) => assert!(msg.contains("already running")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_set_password_body() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/servers/setpassword"))
            .and(body_json(serde_json::json!({
                "uuid": "6f1c",
                "rcon_password": "r",
                "server_password": "s"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock)
            .await;

        let client = BookingApiClient::new(&mock.uri(), 1).unwrap();
        client.set_password("6f1c", "r", "s").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_pending_then_done() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/servers/update"))
            .respond_with(ResponseTemplate::new(202))
            .up_to_n_times(1)
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/servers/update"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock)
            .await;

        let client = BookingApiClient::new(&mock.uri(), 1).unwrap();
        assert_eq!(client.update("6f1c").await.unwrap(), UpdateStatus::Pending);
        assert_eq!(client.update("6f1c").await.unwrap(), UpdateStatus::Done);
    }

    #[tokio::test]
    async fn test_console_lines() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/servers/console"))
            .and(query_param("uuid", "6f1c"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"console_lines": ["a", "b"]})),
            )
            .mount(&mock)
            .await;

        let client = BookingApiClient::new(&mock.uri(), 1).unwrap();
        assert_eq!(client.console("6f1c").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unreachable_api_is_unavailable() {
        let client = BookingApiClient::new("http://127.0.0.1:1", 1)
            .unwrap()
            .with_retry(RetryPolicy {
                attempts: 3,
                backoff: booker_retry::Backoff::Fixed(Duration::from_millis(5)),
            });
        assert!(matches!(
            client.start("6f1c").await,
            Err(DriverError::Unavailable(_))
        ));
    }
}
