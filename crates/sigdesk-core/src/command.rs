//! Parameters carried by confirm commands.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Margin mode for the position opened on confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    #[default]
    Isolated,
    Cross,
}

impl fmt::Display for MarginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Isolated => write!(f, "isolated"),
            Self::Cross => write!(f, "cross"),
        }
    }
}

impl FromStr for MarginMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolated" => Ok(Self::Isolated),
            "cross" => Ok(Self::Cross),
            other => Err(CoreError::InvalidSignal(format!(
                "unknown margin mode: {other}"
            ))),
        }
    }
}

/// Exchange account flag: live or simulated trading.
///
/// Wire values are the exchange's `"0"` / `"1"` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradingFlag {
    #[serde(rename = "0")]
    Live,
    #[serde(rename = "1")]
    Simulated,
}

impl fmt::Display for TradingFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Simulated => write!(f, "simulated"),
        }
    }
}

impl FromStr for TradingFlag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "live" => Ok(Self::Live),
            "1" | "simulated" | "demo" => Ok(Self::Simulated),
            other => Err(CoreError::InvalidSignal(format!(
                "unknown trading flag: {other}"
            ))),
        }
    }
}
