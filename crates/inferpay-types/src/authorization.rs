//! Spending authorization types
//!
//! An authorization is an account's bounded, expiring entitlement to pay
//! for requests. Two funding models exist: a pre-approved allowance drawn
//! from the external transfer primitive at settlement time, and a custody
//! deposit held by the ledger itself.

use crate::{Amount, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which funding model the ledger was configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundingModel {
    /// Spending draws down a pre-approved allowance (`spent <= limit`)
    Allowance,
    /// Spending draws down a deposit balance held by the ledger
    Custody,
}

/// Per-account spending authorization state
///
/// An authorization with `expires_at` unset never existed or was cancelled;
/// callers treat it as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Total value authorized for the current period
    pub limit: Amount,
    /// Cumulative value consumed this period
    pub spent: Amount,
    /// Absolute deadline after which debits are rejected
    pub expires_at: DateTime<Utc>,
    /// Deposit held by the ledger (custody model only; zero otherwise)
    pub deposit_balance: Amount,
}

impl Authorization {
    /// Create a fresh authorization with nothing spent
    pub fn new(limit: Amount, expires_at: DateTime<Utc>) -> Self {
        Self {
            limit,
            spent: Amount::zero(),
            expires_at,
            deposit_balance: Amount::zero(),
        }
    }

    /// Remaining allowance capacity
    pub fn remaining(&self) -> Result<Amount> {
        self.limit.checked_sub(self.spent)
    }

    /// Whether the authorization is past its deadline at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
