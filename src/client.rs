use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::extract::{extract_text, truncate};
use crate::metrics::ErrorKind;

/// Longest response body kept in an HTTP error message.
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP {status}: {message}")]
    Http4xx { status: u16, message: String },

    #[error("HTTP {status}: {message}")]
    Http5xx { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Extraction(#[from] crate::extract::ExtractionError),

    #[error("No models returned from {0}/models")]
    NoModelsAvailable(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Connection(_) => ErrorKind::Connection,
            ClientError::Http4xx { .. } => ErrorKind::Http4xx,
            ClientError::Http5xx { .. } => ErrorKind::Http5xx,
            ClientError::Parse(_) => ErrorKind::Parse,
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::Extraction(_) => ErrorKind::Extraction,
            ClientError::NoModelsAvailable(_) | ClientError::Other(_) => ErrorKind::Other,
        }
    }

    fn from_status(status: u16, body: &str) -> Self {
        let message = truncate(body.trim(), MAX_ERROR_BODY_CHARS);
        match ErrorKind::from_status(status) {
            ErrorKind::Http4xx => ClientError::Http4xx { status, message },
            ErrorKind::Http5xx => ClientError::Http5xx { status, message },
            _ => ClientError::Other(format!("HTTP {}: {}", status, message)),
        }
    }

    fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            ClientError::Timeout(timeout)
        } else if error.is_connect() {
            ClientError::Connection(error.to_string())
        } else if error.is_request() {
            // Check if this is a connection-related request error
            let err_msg = error.to_string();
            if err_msg.contains("connection closed")
                || err_msg.contains("connection reset")
                || err_msg.contains("broken pipe")
                || err_msg.contains("connection refused")
            {
                ClientError::Connection(format!("Request error: {}", error))
            } else {
                ClientError::Other(format!("Request error: {}", error))
            }
        } else if error.is_decode() || error.is_body() {
            ClientError::Parse(error.to_string())
        } else {
            ClientError::Other(error.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

// Request body for the OpenAI Chat Completions API
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub temperature: f64,
    pub max_tokens: u32,
}

// Models list response
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsResponse {
    #[serde(default)]
    pub data: Vec<Model>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Model {
    pub id: String,
}

/// Everything needed to issue one chat-completion call.
#[derive(Debug, Clone)]
pub struct RequestParams {
    /// API root of the target, already normalized (see [`normalize_api_url`])
    pub endpoint_url: String,
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// The recorded result of one request attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub model: String,
    pub latency_ms: f64,
    /// HTTP status, absent when no response was received
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl RequestOutcome {
    fn failed(model: &str, latency_ms: f64, status: Option<u16>, error: ClientError) -> Self {
        Self {
            model: model.to_string(),
            latency_ms,
            status,
            text: None,
            usage: None,
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(200)
    }
}

/// Configuration for creating a [`ChatClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection pool size (should match concurrency for optimal performance)
    pub pool_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { pool_size: 1 }
    }
}

/// HTTP client for OpenAI-compatible chat-completion servers.
///
/// The client is not bound to a target: every call names its endpoint, so a
/// single pool serves both legs of an A/B comparison.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
}

impl ChatClient {
    /// Creates a new client with connection pooling.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use slm_bench::client::{ChatClient, ClientConfig};
    ///
    /// let client = ChatClient::new(ClientConfig { pool_size: 8 }).unwrap();
    /// ```
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.pool_size) // Match concurrency for optimal connection reuse
            .pool_idle_timeout(Duration::from_secs(300))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self { client })
    }

    /// Issues one chat-completion call and records how it went.
    ///
    /// Never fails: transport errors, timeouts, non-2xx statuses and
    /// unreadable bodies all land in the returned outcome. Latency covers
    /// sending the request and reading the whole response body.
    pub async fn send(&self, params: &RequestParams) -> RequestOutcome {
        let url = format!("{}/chat/completions", params.endpoint_url);
        let body = ChatCompletionRequest {
            model: &params.model,
            messages: &params.messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(params.timeout)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let error = ClientError::from_reqwest(e, params.timeout);
                return RequestOutcome::failed(&params.model, elapsed_ms(started), None, error);
            }
        };

        let status = response.status();
        let bytes = response.bytes().await;
        let latency_ms = elapsed_ms(started);
        let status_code = status.as_u16();

        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(e) => {
                let error = ClientError::from_reqwest(e, params.timeout);
                return RequestOutcome::failed(&params.model, latency_ms, Some(status_code), error);
            }
        };

        // Only a 200 carries a completion; other 2xx and 3xx land in `Other`
        if status_code != 200 {
            let error = ClientError::from_status(status_code, &String::from_utf8_lossy(&bytes));
            return RequestOutcome::failed(&params.model, latency_ms, Some(status_code), error);
        }

        let payload: Value = match serde_json::from_slice(&bytes) {
            Ok(payload) => payload,
            Err(e) => {
                let error = ClientError::Parse(e.to_string());
                return RequestOutcome::failed(&params.model, latency_ms, Some(status_code), error);
            }
        };

        let usage = payload.get("usage").filter(|usage| !usage.is_null()).cloned();
        let (text, error) = match extract_text(&payload) {
            Ok(text) => (Some(text), None),
            Err(e) => (None, Some(ClientError::from(e))),
        };

        RequestOutcome {
            model: params.model.clone(),
            latency_ms,
            status: Some(status_code),
            text,
            usage,
            error_kind: error.as_ref().map(ClientError::kind),
            error: error.map(|e| e.to_string()),
        }
    }

    /// Lists the models served at `api_url`.
    pub async fn list_models(&self, api_url: &str, timeout: Duration) -> Result<Vec<Model>> {
        let url = format!("{}/models", api_url);

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to query models endpoint {}: {}", url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response".to_string());
            anyhow::bail!("Models endpoint {} returned {}: {}", url, status, text);
        }

        let models_response: ModelsResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse models response: {}", e))?;

        Ok(models_response.data)
    }

    /// Returns the first model listed by the server.
    ///
    /// Fails with [`ClientError::NoModelsAvailable`] when the listing is empty.
    pub async fn detect_model(&self, api_url: &str, timeout: Duration) -> Result<String> {
        let models = self.list_models(api_url, timeout).await?;

        let Some(first) = models.first() else {
            return Err(ClientError::NoModelsAvailable(api_url.to_string()).into());
        };

        if models.len() > 1 {
            log::info!("Found {} models at {}, using: {}", models.len(), api_url, first.id);
            log::debug!(
                "Available models: {:?}",
                models.iter().map(|m| &m.id).collect::<Vec<_>>()
            );
        } else {
            log::info!("Detected model at {}: {}", api_url, first.id);
        }

        Ok(first.id.clone())
    }

    /// Uses `model` when given, otherwise asks the server.
    pub async fn resolve_model(
        &self,
        api_url: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<String> {
        match model {
            Some(model) => Ok(model.to_string()),
            None => {
                log::info!("Model not specified, querying {}/models", api_url);
                self.detect_model(api_url, timeout).await
            }
        }
    }

    /// Waits for the server to answer `GET {api_url}/models` successfully.
    ///
    /// Polls every `retry_interval`, each probe bounded by `probe_timeout`,
    /// until `total_timeout` has elapsed.
    pub async fn check_server_ready(
        &self,
        api_url: &str,
        total_timeout: Duration,
        retry_interval: Duration,
        probe_timeout: Duration,
    ) -> Result<()> {
        let start_time = Instant::now();
        let mut attempt = 0;

        log::info!("Waiting for server to be ready at {}...", api_url);

        loop {
            attempt += 1;
            log::debug!("Server readiness check attempt {}: GET {}/models", attempt, api_url);

            match self.list_models(api_url, probe_timeout).await {
                Ok(models) => {
                    log::info!(
                        "Server is ready ({} model{} available after {:.1}s)",
                        models.len(),
                        if models.len() == 1 { "" } else { "s" },
                        start_time.elapsed().as_secs_f64()
                    );
                    return Ok(());
                }
                Err(e) => {
                    log::debug!("Models endpoint not ready: {}", e);
                }
            }

            let remaining = total_timeout.saturating_sub(start_time.elapsed());
            if remaining.is_zero() {
                anyhow::bail!(
                    "Server not ready at {}/models after {}s",
                    api_url,
                    total_timeout.as_secs()
                );
            }

            // Log progress every ~30 seconds at the default interval
            if attempt % 15 == 0 {
                log::info!(
                    "Still waiting for server (elapsed: {:.0}s, timeout: {:.0}s)...",
                    start_time.elapsed().as_secs_f64(),
                    total_timeout.as_secs_f64()
                );
            }

            tokio::time::sleep(retry_interval.min(remaining)).await;
        }
    }
}

/// Turns a user-supplied target URL into the API root used for requests.
///
/// Trailing slashes are removed and `/v1` is appended when missing, so both
/// `http://host:8000` and `http://host:8000/v1/` become
/// `http://host:8000/v1`.
pub fn normalize_api_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.ends_with("/v1") {
        url.to_string()
    } else {
        format!("{}/v1", url)
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
