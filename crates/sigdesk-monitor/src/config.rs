//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sigdesk_api::ConfirmRequest;
use sigdesk_core::{MarginMode, SignalFilter, TradingFlag};
use sigdesk_ws::{ConnectionConfig, AUTH_CLOSE_CODE};
use std::path::Path;
use std::time::Duration;

/// Env var naming the config file.
pub const CONFIG_ENV: &str = "SIGDESK_CONFIG";
/// Env var overriding the configured credential.
pub const TOKEN_ENV: &str = "SIGDESK_TOKEN";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Push connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Base delay for reconnection backoff (ms). Default: 1000.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Backoff cap (ms). Default: 30000.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Close codes treated as a refused credential. Default: [4001].
    #[serde(default = "default_auth_close_codes")]
    pub auth_close_codes: Vec<u16>,
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_auth_close_codes() -> Vec<u16> {
    vec![AUTH_CLOSE_CODE]
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            auth_close_codes: default_auth_close_codes(),
        }
    }
}

/// Defaults for confirm commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmConfig {
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub margin_mode: MarginMode,
    /// `"0"` live, `"1"` simulated. Unset: server decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<TradingFlag>,
}

fn default_leverage() -> u32 {
    sigdesk_api::api::DEFAULT_LEVERAGE
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            leverage: default_leverage(),
            margin_mode: MarginMode::default(),
            flag: None,
        }
    }
}

impl From<&ConfirmConfig> for ConfirmRequest {
    fn from(cfg: &ConfirmConfig) -> Self {
        Self {
            leverage: cfg.leverage,
            margin_mode: cfg.margin_mode,
            flag: cfg.flag,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Signal server root (REST).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Push endpoint.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Bearer credential. Overridden by `SIGDESK_TOKEN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Periodic snapshot refresh (seconds, 0 = disabled). Default: 60.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// REST request timeout (seconds). Default: 10.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Signal book mailbox capacity. Default: 1024.
    #[serde(default = "default_book_capacity")]
    pub book_capacity: usize,
    /// Initial view and fetch filter.
    #[serde(default)]
    pub filter: SignalFilter,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub confirm: ConfirmConfig,
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:8000/api/signals/ws/signals".to_string()
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_book_capacity() -> usize {
    1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
            credential: None,
            refresh_interval_secs: default_refresh_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            book_capacity: default_book_capacity(),
            filter: SignalFilter::default(),
            websocket: WsConfig::default(),
            confirm: ConfirmConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Path: `path` argument, else `SIGDESK_CONFIG`, else
    /// `config/default.toml`. A missing file yields defaults. The
    /// `SIGDESK_TOKEN` env var is applied last.
    pub fn load(path: Option<&str>) -> AppResult<Self> {
        let config_path = path
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Self::default()
        };

        config.apply_token_override(std::env::var(TOKEN_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Replace the credential when `token` is set and non-empty.
    pub fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.credential = Some(token);
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.api_url.trim().is_empty() {
            return Err(AppError::Config("api_url must not be empty".to_string()));
        }
        if self.ws_url.trim().is_empty() {
            return Err(AppError::Config("ws_url must not be empty".to_string()));
        }
        if self.book_capacity == 0 {
            return Err(AppError::Config("book_capacity must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.websocket.reconnect_base_delay_ms > self.websocket.reconnect_max_delay_ms {
            return Err(AppError::Config(
                "websocket.reconnect_base_delay_ms exceeds reconnect_max_delay_ms".to_string(),
            ));
        }
        self.filter
            .validate()
            .map_err(|e| AppError::Config(format!("Invalid filter: {e}")))?;
        self.confirm_request()
            .validate()
            .map_err(|e| AppError::Config(format!("Invalid confirm defaults: {e}")))?;
        Ok(())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.ws_url.clone(),
            reconnect_base_delay_ms: self.websocket.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.websocket.reconnect_max_delay_ms,
            auth_close_codes: self.websocket.auth_close_codes.clone(),
            ..ConnectionConfig::default()
        }
    }

    pub fn confirm_request(&self) -> ConfirmRequest {
        ConfirmRequest::from(&self.confirm)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `None` when periodic refresh is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}
