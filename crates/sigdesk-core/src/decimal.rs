//! Precision-safe decimal price type.
//!
//! Uses `rust_decimal` for exact decimal arithmetic, avoiding
//! floating-point rounding errors in displayed price levels.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Sub;
use std::str::FromStr;

/// Price with exact decimal precision.
///
/// The server sends prices either as JSON numbers or as strings;
/// both deserialize into the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Absolute distance to another price as a percentage of `self`.
    ///
    /// Used to express stop-loss distance relative to the entry.
    #[inline]
    pub fn distance_pct(&self, other: Price) -> Option<Decimal> {
        if self.is_zero() {
            return None;
        }
        Some(((other.0 - self.0) / self.0 * Decimal::from(100)).abs())
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Sub for Price {
    type Output = Decimal;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_distance_pct() {
        let entry = Price::new(dec!(100));
        let stop = Price::new(dec!(98));

        assert_eq!(entry.distance_pct(stop), Some(dec!(2)));
        assert_eq!(Price::ZERO.distance_pct(stop), None);
    }

    #[test]
    fn test_price_deserializes_from_number_and_string() {
        let from_str: Price = serde_json::from_str("\"43251.7\"").unwrap();
        let from_num: Price = serde_json::from_str("43251.7").unwrap();

        assert_eq!(from_str, Price::new(dec!(43251.7)));
        assert_eq!(from_num, Price::new(dec!(43251.7)));
    }

    #[test]
    fn test_price_positive() {
        assert!(Price::new(dec!(0.5)).is_positive());
        assert!(!Price::ZERO.is_positive());
        assert!(!Price::new(dec!(-1)).is_positive());
    }
}
