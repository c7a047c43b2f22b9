//! Filter criteria scoping both fetches and the visible collection.

use crate::error::{CoreError, Result};
use crate::signal::{Signal, SignalStatus};
use serde::{Deserialize, Serialize};

/// Default result-count bound, matching the server default.
pub const DEFAULT_LIMIT: u32 = 50;

/// Signal filter: instrument, status and result-count bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalFilter {
    #[serde(default)]
    pub inst_id: Option<String>,
    #[serde(default)]
    pub status: Option<SignalStatus>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

impl Default for SignalFilter {
    fn default() -> Self {
        Self {
            inst_id: None,
            status: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl SignalFilter {
    #[must_use]
    pub fn with_inst_id(mut self, inst_id: impl Into<String>) -> Self {
        self.inst_id = Some(inst_id.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: SignalStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(CoreError::InvalidFilter("limit must be >= 1".to_string()));
        }
        if self.inst_id.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(CoreError::InvalidFilter("empty inst_id".to_string()));
        }
        Ok(())
    }

    /// Check whether a signal belongs to the visible projection.
    ///
    /// `limit` only bounds fetches; it does not hide entries.
    pub fn matches(&self, signal: &Signal) -> bool {
        let inst_ok = self
            .inst_id
            .as_deref()
            .map_or(true, |inst| inst == signal.inst_id);
        let status_ok = self.status.map_or(true, |s| s == signal.status);
        inst_ok && status_ok
    }

    /// Query parameters for the list endpoint.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(3);
        if let Some(inst_id) = &self.inst_id {
            pairs.push(("inst_id", inst_id.clone()));
        }
        if let Some(status) = self.status {
            pairs.push(("status", status.to_string()));
        }
        pairs.push(("limit", self.limit.to_string()));
        pairs
    }
}
