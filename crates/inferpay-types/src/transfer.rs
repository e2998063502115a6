//! Collaborator traits consumed by the components
//!
//! InferPay never moves funds itself; it consumes an external transfer
//! capability. Cross-component questions (does this account have pending
//! escrows?) are asked through explicit trait calls rather than shared
//! mutable references.

use crate::{AccountId, Amount, Result};
use async_trait::async_trait;

/// The external funds-transfer primitive (token allowance or native ledger)
#[async_trait]
pub trait FundsTransfer: Send + Sync {
    /// Pull `amount` from `from` into custody
    async fn transfer_in(&self, from: &AccountId, amount: Amount) -> Result<()>;

    /// Pay `amount` out of custody to `to`
    async fn transfer_out(&self, to: &AccountId, amount: Amount) -> Result<()>;
}

/// Probe for non-terminal escrow records, answered by the escrow ledger
///
/// The spending authorization ledger consults this before destroying or
/// draining an account's authorization, so in-flight funds are never
/// orphaned.
#[async_trait]
pub trait PendingEscrowProbe: Send + Sync {
    /// Number of PENDING escrow records paid for by `account`
    async fn pending_count(&self, account: &AccountId) -> u64;
}
