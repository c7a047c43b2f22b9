//! Signal entity and its status state machine.
//!
//! A signal is created server-side by the scanner and only ever mutated
//! client-side through a status transition.

use crate::decimal::Price;
use crate::error::{CoreError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server-assigned signal identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(u64);

impl SignalId {
    #[inline]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SignalId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Trade direction proposed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Resonance strength: how many strategy families agree (1-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Strength(u8);

impl Strength {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 3;

    pub fn new(value: u8) -> Result<Self> {
        Self::try_from(value)
    }

    #[inline]
    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Strength {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::InvalidStrength(value))
        }
    }
}

impl From<Strength> for u8 {
    fn from(s: Strength) -> Self {
        s.0
    }
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signal lifecycle status.
///
/// ```text
/// pending ─┬─> confirmed ──> executed   (client request, then server)
///          ├─> executed                 (server only)
///          ├─> skipped                  (client request)
///          └─> expired                  (server only)
/// ```
///
/// All non-pending states are decided. `confirmed` may still move to
/// `executed` once the server has placed the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    #[default]
    Pending,
    Confirmed,
    Skipped,
    Expired,
    Executed,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Skipped => "skipped",
            Self::Expired => "expired",
            Self::Executed => "executed",
        }
    }

    /// Check if the signal is no longer pending.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Check if the client may request this status.
    pub fn is_client_requestable(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Skipped)
    }

    /// Check if `next` is reachable from `self` in one step.
    pub fn can_transition_to(&self, next: SignalStatus) -> bool {
        match self {
            Self::Pending => next.is_terminal(),
            Self::Confirmed => next == Self::Executed,
            _ => false,
        }
    }

    /// Validate and perform a transition.
    pub fn transition(self, next: SignalStatus) -> Result<SignalStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "skipped" => Ok(Self::Skipped),
            "expired" => Ok(Self::Expired),
            "executed" => Ok(Self::Executed),
            other => Err(CoreError::InvalidSignal(format!("unknown status: {other}"))),
        }
    }
}

/// A directional trading opportunity proposed by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    /// Instrument identifier (e.g., "BTC-USDT-SWAP").
    pub inst_id: String,
    /// Bar period (e.g., "4H").
    pub bar: String,
    pub direction: Direction,
    pub strength: Strength,
    /// Contributing strategy names, de-duplicated, in server order.
    #[serde(default, deserialize_with = "strategies_format::deserialize")]
    pub strategies: Vec<String>,
    pub entry_price: Price,
    pub stop_loss: Price,
    #[serde(default)]
    pub enter_tag: Option<String>,
    #[serde(with = "created_at_format")]
    pub created_at: DateTime<Utc>,
    /// Push-created records carry no status; they start pending.
    #[serde(default)]
    pub status: SignalStatus,
}

impl Signal {
    /// Create a pending signal with no strategies or tag.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SignalId,
        inst_id: impl Into<String>,
        bar: impl Into<String>,
        direction: Direction,
        strength: Strength,
        entry_price: Price,
        stop_loss: Price,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            inst_id: inst_id.into(),
            bar: bar.into(),
            direction,
            strength,
            strategies: Vec::new(),
            entry_price,
            stop_loss,
            enter_tag: None,
            created_at,
            status: SignalStatus::Pending,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: SignalStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_strategies<I, S>(mut self, strategies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strategies = dedup_in_order(strategies.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_enter_tag(mut self, tag: impl Into<String>) -> Self {
        self.enter_tag = Some(tag.into());
        self
    }

    /// Structural validation beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        if self.id.get() == 0 {
            return Err(CoreError::InvalidSignalId(self.id.get()));
        }
        if self.inst_id.trim().is_empty() {
            return Err(CoreError::InvalidSignal("empty inst_id".to_string()));
        }
        if self.bar.trim().is_empty() {
            return Err(CoreError::InvalidSignal("empty bar".to_string()));
        }
        if !self.entry_price.is_positive() {
            return Err(CoreError::InvalidPrice(format!(
                "entry_price must be positive, got {}",
                self.entry_price
            )));
        }
        if !self.stop_loss.is_positive() {
            return Err(CoreError::InvalidPrice(format!(
                "stop_loss must be positive, got {}",
                self.stop_loss
            )));
        }
        Ok(())
    }

    /// Whether confirm/skip may still be requested.
    pub fn is_actionable(&self) -> bool {
        self.status == SignalStatus::Pending
    }

    /// Stop-loss distance from entry, in percent.
    pub fn risk_pct(&self) -> Option<rust_decimal::Decimal> {
        self.entry_price.distance_pct(self.stop_loss)
    }
}

fn dedup_in_order(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Parse a server timestamp.
///
/// Accepts RFC 3339 with offset, or a naive date-time (SQLite default
/// format) interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| CoreError::InvalidTimestamp(raw.to_string()))
}

/// `strategies` is a JSON array on push frames but a JSON-encoded string
/// in list responses (stored as text server-side).
mod strategies_format {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawStrategies {
        List(Vec<String>),
        Encoded(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = match RawStrategies::deserialize(deserializer)? {
            RawStrategies::List(list) => list,
            RawStrategies::Encoded(text) if text.trim().is_empty() => Vec::new(),
            RawStrategies::Encoded(text) => serde_json::from_str::<Vec<String>>(&text)
                .map_err(|e| D::Error::custom(format!("invalid strategies string: {e}")))?,
        };
        Ok(super::dedup_in_order(list.into_iter()))
    }
}

mod created_at_format {
    use chrono::{DateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(D::Error::custom)
    }
}
