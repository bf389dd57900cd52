//! Control-plane HTTP client implementation.
//!
//! This module provides the base HTTP client for the Ferro control-plane
//! REST API. Collection-specific clients in [`super::resource`] delegate to
//! [`ApiClient::query`] for all CRUD traffic.

use reqwest::{header, Client, Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::Settings;
use crate::error::{ApiError, FerroError, Result};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connect timeout for streaming (watch) requests in seconds.
const STREAM_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Maximum number of retries for transient failures.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Control-plane API client.
///
/// Stateless beyond connection configuration; instances may be freely shared
/// across concurrent callers.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// HTTP client for request/response traffic.
    client: Client,
    /// HTTP client for watch streams (no total request timeout).
    stream_client: Client,
    /// Base URL of the control plane, without trailing slash.
    base_url: String,
    /// Bearer token for authentication.
    token: Option<String>,
}

impl ApiClient {
    /// Creates a new control-plane client from settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP clients cannot be created.
    pub fn new(settings: &Settings) -> Result<Self> {
        Self::with_timeout(settings, settings.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a client with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP clients cannot be created.
    pub fn with_timeout(settings: &Settings, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ApiError::network(format!("Failed to create HTTP client: {e}")))?;

        // Watch responses are unbounded; only the connect phase is bounded.
        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            stream_client,
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    /// The configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Performs a request against the control plane and decodes the JSON
    /// response.
    ///
    /// Transient transport failures and 5xx responses are retried up to
    /// [`MAX_RETRIES`] times with a linear backoff; any other failure is
    /// returned to the caller immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if every attempt fails or the server rejects the
    /// request.
    pub async fn query<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {MAX_RETRIES}");
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)))
                    .await;
            }

            match self.query_once::<T>(method.clone(), path, body).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.is_retryable() {
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            FerroError::Api(ApiError::NetworkError {
                message: String::from("Max retries exceeded"),
            })
        }))
    }

    /// Performs a single request without retries.
    async fn query_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        trace!("Requesting {method} {url}");

        let mut request = self
            .client
            .request(method, &url)
            .header(header::CONTENT_TYPE, "application/json");

        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            FerroError::Api(ApiError::NetworkError {
                message: format!("Request failed: {e}"),
            })
        })?;

        let status = response.status();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(FerroError::Api(ApiError::AuthenticationFailed {
                message: String::from("Invalid API token"),
            }));
        }

        if !status.is_success() {
            let message = Self::error_message(response).await;
            return Err(FerroError::Api(ApiError::request_failed(
                status.as_u16(),
                message,
            )));
        }

        let parsed: T = response.json().await.map_err(|e| {
            FerroError::Api(ApiError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
        })?;

        debug!("Request to {url} completed");
        Ok(parsed)
    }

    /// Opens a streaming watch connection for a collection.
    ///
    /// The response body is an unbounded sequence of newline-delimited JSON
    /// frames; the caller owns its consumption. The last known
    /// `resourceVersion` is passed so the server resumes instead of replaying
    /// from the beginning.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or the server
    /// rejects the watch request.
    pub async fn open_watch(
        &self,
        collection: &str,
        resource_version: Option<&str>,
    ) -> Result<Response> {
        let url = format!("{}/api/v1/watch/{collection}", self.base_url);
        debug!("Opening watch stream: {url}");

        let mut request = self.stream_client.get(&url);

        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        if let Some(version) = resource_version {
            request = request.query(&[("resourceVersion", version)]);
        }

        let response = request.send().await.map_err(|e| {
            FerroError::Api(ApiError::NetworkError {
                message: format!("Watch request failed: {e}"),
            })
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = Self::error_message(response).await;
            return Err(FerroError::Api(ApiError::request_failed(
                status.as_u16(),
                message,
            )));
        }

        Ok(response)
    }

    /// Extracts the server's `message` field from an error response body,
    /// falling back to the raw text.
    async fn error_message(response: Response) -> String {
        let body = response.text().await.unwrap_or_default();

        serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
            .unwrap_or(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(server: &MockServer) -> Settings {
        Settings {
            api_url: server.uri(),
            token: Some(String::from("test-token")),
            request_timeout_secs: Some(5),
        }
    }

    #[tokio::test]
    async fn test_query_decodes_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/connection/db"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "db",
                "spec": {"uri": "s3://bucket"}
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&settings_for(&server)).unwrap();
        let value: Value = client
            .query(Method::GET, "/api/v1/connection/db", None)
            .await
            .unwrap();

        assert_eq!(value["name"], "db");
    }

    #[tokio::test]
    async fn test_not_found_maps_to_request_failed_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/connection/missing"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"message": "not found"})),
            )
            .mount(&server)
            .await;

        let client = ApiClient::new(&settings_for(&server)).unwrap();
        let err = client
            .query::<Value>(Method::GET, "/api/v1/connection/missing", None)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/connection"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/connection"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = ApiClient::new(&settings_for(&server)).unwrap();
        let value: Vec<Value> = client
            .query(Method::GET, "/api/v1/connection", None)
            .await
            .unwrap();

        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/connection"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&settings_for(&server)).unwrap();
        let err = client
            .query::<Value>(Method::GET, "/api/v1/connection", None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FerroError::Api(ApiError::AuthenticationFailed { .. })
        ));
    }
}
