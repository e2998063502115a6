//! Escrow record types
//!
//! One escrow record exists per paid action, keyed by the answer/trigger
//! handle it backs. Records are created PENDING and move exactly once to
//! COMPLETE (settlement) or REFUNDED (cancellation or keeper timeout);
//! both end states are terminal.

use crate::{AccountId, Amount, EscrowHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an escrow record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowStatus {
    /// Funds held, awaiting a verified response or a timeout
    Pending,
    /// Response recorded; funds released to the treasury
    Complete,
    /// Funds returned to the payer (owner cancellation or keeper sweep)
    Refunded,
}

impl EscrowStatus {
    /// Whether the record can still transition
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Complete => write!(f, "COMPLETE"),
            Self::Refunded => write!(f, "REFUNDED"),
        }
    }
}

/// Custody record for a single in-flight paid request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowRecord {
    /// The answer/trigger handle this escrow backs
    pub handle: EscrowHandle,
    /// The account whose authorization was debited
    pub payer: AccountId,
    /// The escrowed value
    pub amount: Amount,
    /// When the record was opened, from the shared clock
    pub created_at: DateTime<Utc>,
    /// Current status
    pub status: EscrowStatus,
}

impl EscrowRecord {
    /// Whether the record is still awaiting an outcome
    pub fn is_pending(&self) -> bool {
        self.status == EscrowStatus::Pending
    }
}

/// The outcome of a refund transition, consumed by the orchestrator to
/// apply the money movement it implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundOutcome {
    /// The account to credit back
    pub payer: AccountId,
    /// The portion returned to the payer's authorization
    pub refund: Amount,
    /// The cancellation fee kept by the treasury (zero on keeper sweeps)
    pub fee: Amount,
}
