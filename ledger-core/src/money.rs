//! Money value type
//!
//! Amounts are integers in the smallest currency unit and are never
//! negative. Signed deltas exist only as [`BalanceImpact`], which is an
//! in-memory computation aid and is never stored.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Non-negative amount in minor units
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Money(u64);

impl Money {
    /// Construct from an external signed integer, rejecting negatives
    pub fn of(minor_units: i64) -> Result<Self> {
        if minor_units < 0 {
            return Err(Error::InvalidAmount(minor_units));
        }
        Ok(Self(minor_units as u64))
    }

    /// Zero amount
    pub fn zero() -> Self {
        Self(0)
    }

    /// Raw minor units
    pub fn minor_units(&self) -> u64 {
        self.0
    }

    /// Checked addition
    pub fn add(&self, other: Money) -> Result<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or(Error::AmountOverflow)
    }

    /// Checked subtraction; fails instead of going below zero
    pub fn subtract(&self, other: Money) -> Result<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or(Error::NegativeResult)
    }

    /// Signed delta escape hatch for balance-impact computations
    pub fn for_balance_impact(delta: i64) -> BalanceImpact {
        BalanceImpact(delta)
    }

    /// True when the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// True when the amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Strictly greater comparison
    pub fn greater_than(&self, other: Money) -> bool {
        self.0 > other.0
    }

    /// Strictly lesser comparison
    pub fn less_than(&self, other: Money) -> bool {
        self.0 < other.0
    }

    /// Greater-or-equal comparison
    pub fn greater_or_equal(&self, other: Money) -> bool {
        self.0 >= other.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signed delta between two amounts.
///
/// Internal computation aid only; a `BalanceImpact` is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BalanceImpact(i64);

impl BalanceImpact {
    /// Signed minor units
    pub fn minor_units(&self) -> i64 {
        self.0
    }

    /// Apply the delta to an amount, rejecting a negative result
    pub fn applied_to(&self, base: Money) -> Result<Money> {
        if self.0 >= 0 {
            base.add(Money(self.0 as u64))
        } else {
            base.subtract(Money(self.0.unsigned_abs()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_of_rejects_negative() {
        assert!(matches!(Money::of(-1), Err(Error::InvalidAmount(-1))));
        assert_eq!(Money::of(0).unwrap(), Money::zero());
        assert_eq!(Money::of(500).unwrap().minor_units(), 500);
    }

    #[test]
    fn test_add_and_subtract() {
        let a = Money::of(3_000).unwrap();
        let b = Money::of(1_000).unwrap();

        assert_eq!(a.add(b).unwrap().minor_units(), 4_000);
        assert_eq!(a.subtract(b).unwrap().minor_units(), 2_000);
        assert!(matches!(b.subtract(a), Err(Error::NegativeResult)));
    }

    #[test]
    fn test_add_overflow() {
        let max = Money(u64::MAX);
        let one = Money::of(1).unwrap();
        assert!(matches!(max.add(one), Err(Error::AmountOverflow)));
    }

    #[test]
    fn test_comparisons() {
        let small = Money::of(1).unwrap();
        let large = Money::of(2).unwrap();

        assert!(large.greater_than(small));
        assert!(small.less_than(large));
        assert!(large.greater_or_equal(large));
        assert!(Money::zero().is_zero());
        assert!(small.is_positive());
        assert!(!Money::zero().is_positive());
    }

    #[test]
    fn test_balance_impact() {
        let base = Money::of(1_000).unwrap();

        let up = Money::for_balance_impact(250);
        assert_eq!(up.applied_to(base).unwrap().minor_units(), 1_250);

        let down = Money::for_balance_impact(-400);
        assert_eq!(down.applied_to(base).unwrap().minor_units(), 600);

        let too_far = Money::for_balance_impact(-1_001);
        assert!(matches!(too_far.applied_to(base), Err(Error::NegativeResult)));
    }
}
