//! HTTP client for the signal server REST API.
//!
//! Endpoints:
//! - `GET  /api/signals?inst_id=&status=&limit=` -> `{"signals": [...]}`
//! - `GET  /api/signals/{id}`
//! - `POST /api/signals/{id}/confirm`
//! - `POST /api/signals/{id}/skip`
//! - `GET  /api/signals/trading/mode`
//!
//! Errors come back as `{"detail": "..."}`.

use crate::api::{BoxFuture, ConfirmAck, ConfirmRequest, SignalApi, SkipAck};
use crate::error::{ApiError, ApiResult};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sigdesk_core::{CredentialSource, Signal, SignalFilter, SignalId, TradingFlag};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Server trading mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingMode {
    pub flag: TradingFlag,
    /// Human-readable label, as the server words it.
    pub mode: String,
}

/// REST implementation of [`SignalApi`].
pub struct RestSignalApi {
    client: Client,
    /// Server base URL without trailing slash.
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl RestSignalApi {
    /// Create a new REST client.
    ///
    /// # Arguments
    /// * `base_url` - server root (e.g., "http://localhost:8000")
    /// * `credentials` - bearer credential, read before each request
    /// * `timeout` - per-request timeout
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialSource>,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/signals{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.credential() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| ApiError::HttpClient(format!("HTTP request failed: {e}")))
    }

    /// Fetch the server's trading mode (live or simulated).
    pub async fn trading_mode(&self) -> ApiResult<TradingMode> {
        let response = self.send(self.client.get(self.url("/trading/mode"))).await?;
        read_json(response).await
    }

    async fn get_signals(&self, filter: &SignalFilter) -> ApiResult<Vec<Signal>> {
        filter
            .validate()
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

        debug!(?filter, "Fetching signals");
        let request = self
            .client
            .get(self.url(""))
            .query(&filter.query_pairs());
        let response = self.send(request).await?;
        let body = read_body(response).await?;
        let signals = parse_signals_body(&body)?;

        info!(count = signals.len(), "Fetched signals");
        Ok(signals)
    }

    async fn get_signal(&self, id: SignalId) -> ApiResult<Signal> {
        let response = self.send(self.client.get(self.url(&format!("/{id}")))).await?;
        let signal: Signal = read_json(response).await?;
        signal
            .validate()
            .map_err(|e| ApiError::Parse(format!("Invalid signal {id}: {e}")))?;
        Ok(signal)
    }

    async fn post_confirm(&self, id: SignalId, request: ConfirmRequest) -> ApiResult<ConfirmAck> {
        request.validate()?;

        info!(%id, leverage = request.leverage, margin_mode = %request.margin_mode, "Confirming signal");
        let builder = self
            .client
            .post(self.url(&format!("/{id}/confirm")))
            .json(&request);
        let response = self.send(builder).await?;
        let ack: ConfirmAck = read_json(response).await?;

        if !ack.success {
            warn!(%id, error = ?ack.error, "Signal confirmed but order execution failed");
        }
        Ok(ack)
    }

    async fn post_skip(&self, id: SignalId) -> ApiResult<SkipAck> {
        info!(%id, "Skipping signal");
        let response = self.send(self.client.post(self.url(&format!("/{id}/skip")))).await?;
        read_json(response).await
    }
}

impl SignalApi for RestSignalApi {
    fn fetch_signals<'a>(&'a self, filter: &'a SignalFilter) -> BoxFuture<'a, ApiResult<Vec<Signal>>> {
        Box::pin(self.get_signals(filter))
    }

    fn fetch_signal(&self, id: SignalId) -> BoxFuture<'_, ApiResult<Signal>> {
        Box::pin(self.get_signal(id))
    }

    fn confirm(&self, id: SignalId, request: ConfirmRequest) -> BoxFuture<'_, ApiResult<ConfirmAck>> {
        Box::pin(self.post_confirm(id, request))
    }

    fn skip(&self, id: SignalId) -> BoxFuture<'_, ApiResult<SkipAck>> {
        Box::pin(self.post_skip(id))
    }
}

/// Read the body, mapping non-success statuses to errors.
async fn read_body(response: Response) -> ApiResult<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::HttpClient(format!("Failed to read response: {e}")))?;

    if !status.is_success() {
        return Err(error_from_status(status.as_u16(), &body));
    }
    Ok(body)
}

async fn read_json<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let body = read_body(response).await?;
    serde_json::from_str(&body).map_err(|e| ApiError::Parse(format!("Failed to parse response: {e}")))
}

/// Map a non-success status and body to an error.
pub fn error_from_status(status: u16, body: &str) -> ApiError {
    let detail = extract_detail(body);
    if status == 401 {
        ApiError::Unauthorized(detail)
    } else {
        ApiError::Rejected { status, detail }
    }
}

/// Extract the server's `detail` message, falling back to the raw body.
pub fn extract_detail(body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").cloned());

    match detail {
        Some(Value::String(s)) => s,
        // Validation errors arrive as a list of objects.
        Some(other) => other.to_string(),
        None if body.trim().is_empty() => "no detail".to_string(),
        None => body.trim().to_string(),
    }
}

/// Parse a list response.
///
/// Records that fail to decode or validate are skipped with a warning
/// rather than failing the whole fetch.
pub fn parse_signals_body(body: &str) -> ApiResult<Vec<Signal>> {
    let value: Value = serde_json::from_str(body)?;
    let entries = value
        .get("signals")
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::Parse("response has no signals array".to_string()))?;

    let mut signals = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        let signal = match serde_json::from_value::<Signal>(entry.clone()) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(idx, error = %e, "Skipping undecodable signal record");
                continue;
            }
        };
        if let Err(e) = signal.validate() {
            warn!(idx, id = %signal.id, error = %e, "Skipping invalid signal record");
            continue;
        }
        signals.push(signal);
    }
    Ok(signals)
}
