//! Money Module
//!
//! Fixed-point token amounts with exactly 2 decimal places.
//!
//! ## Rounding Rule
//! Every constructor and every arithmetic result is rounded to 2 places
//! with half-up rounding (midpoint away from zero), so repeated 0.01
//! transfers never accumulate drift.
//!
//! ## Usage
//! ```rust
//! use node_pulse::money::Money;
//!
//! let balance: Money = "5.00".parse().unwrap();
//! let unit = Money::from_units(1);
//! assert_eq!((balance - unit).to_string(), "4.99");
//! ```

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub};
use thiserror::Error;

/// Decimal places carried by every `Money` value
pub const MONEY_SCALE: u32 = 2;

#[derive(Debug, Error)]
pub enum MoneyError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Token amount rounded to [`MONEY_SCALE`] decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

#[inline]
fn round_half_up(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Round an arbitrary decimal into a `Money` value
    pub fn new(value: Decimal) -> Self {
        Self(round_half_up(value))
    }

    /// Build from smallest units: `from_units(1)` is 0.01
    pub fn from_units(units: i64) -> Self {
        Self(Decimal::new(units, MONEY_SCALE))
    }

    /// Value in smallest units (0.01 -> 1)
    pub fn units(&self) -> i64 {
        (self.0 * Decimal::from(100)).to_i64().unwrap_or(i64::MAX)
    }

    #[inline]
    pub fn amount(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Money::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let d = Decimal::from_str(s.trim()).map_err(|e| MoneyError::InvalidFormat(format!("{s}: {e}")))?;
        Ok(Money::new(d))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money::new(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        *self = *self + rhs;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money::new(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_units() {
        assert_eq!(Money::from_units(1).to_string(), "0.01");
        assert_eq!(Money::from_units(500).to_string(), "5.00");
        assert_eq!(Money::from_units(-1).units(), -1);
    }

    #[test]
    fn test_half_up_rounding() {
        assert_eq!("0.005".parse::<Money>().unwrap().to_string(), "0.01");
        assert_eq!("0.004".parse::<Money>().unwrap().to_string(), "0.00");
        assert_eq!("-0.005".parse::<Money>().unwrap().to_string(), "-0.01");
        assert_eq!("1.2349".parse::<Money>().unwrap().to_string(), "1.23");
    }

    #[test]
    fn test_repeated_small_transfers_do_not_drift() {
        let mut balance: Money = "1.00".parse().unwrap();
        let unit = Money::from_units(1);
        for _ in 0..100 {
            balance = balance - unit;
        }
        assert_eq!(balance, Money::ZERO);
        assert!(!balance.is_positive());
    }

    #[test]
    fn test_scale_is_always_two() {
        let m = Money::new(Decimal::new(5, 0));
        assert_eq!(m.to_string(), "5.00");
        assert_eq!(m.amount().scale(), MONEY_SCALE);
    }

    #[test]
    fn test_serde_accepts_numbers_and_strings() {
        let a: Money = serde_yaml::from_str("0.14").unwrap();
        let b: Money = serde_json::from_str("\"0.23\"").unwrap();
        assert_eq!(a, Money::from_units(14));
        assert_eq!(b, Money::from_units(23));
    }

    #[test]
    fn test_invalid_format() {
        assert!(matches!("abc".parse::<Money>(), Err(MoneyError::InvalidFormat(_))));
    }
}
