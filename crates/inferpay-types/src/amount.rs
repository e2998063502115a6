//! Amount type for InferPay
//!
//! Amounts are unsigned fixed-point values in the smallest unit of the
//! external funds-transfer primitive. Negative balances are unrepresentable
//! by construction; overflow and underflow surface as explicit errors.

use crate::{InferPayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An unsigned value amount in smallest units
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Amount(pub u64);

impl Amount {
    /// Create a new amount
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The zero amount
    pub fn zero() -> Self {
        Self(0)
    }

    /// Whether the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition
    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(InferPayError::AmountOverflow)
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(InferPayError::AmountOverflow)
    }

    /// Saturating subtraction, used where the remainder can legitimately be zero
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_arithmetic() {
        let a = Amount::new(100);
        let b = Amount::new(40);

        assert_eq!(a.checked_add(b).unwrap(), Amount::new(140));
        assert_eq!(a.checked_sub(b).unwrap(), Amount::new(60));
    }

    #[test]
    fn test_underflow_is_an_error() {
        let a = Amount::new(10);
        let b = Amount::new(20);
        assert!(matches!(
            a.checked_sub(b),
            Err(InferPayError::AmountOverflow)
        ));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let a = Amount::new(u64::MAX);
        assert!(a.checked_add(Amount::new(1)).is_err());
    }

    #[test]
    fn test_saturating_sub() {
        assert_eq!(
            Amount::new(5).saturating_sub(Amount::new(9)),
            Amount::zero()
        );
    }
}
