//! InferPay Escrow - Custody of in-flight request payments
//!
//! One record per paid action, keyed by the answer/trigger handle it backs.
//! The ledger owns only the custody records and their transitions; the
//! orchestrator composes the money movement each transition implies
//! (treasury payout on settlement, authorization credit on refund).
//!
//! # Invariants
//!
//! 1. Records transition PENDING -> COMPLETE or PENDING -> REFUNDED, once
//! 2. A handle is never reused for a second record
//! 3. `refund_by_timeout` never reverts on an unknown handle (keepers
//!    sweep blindly) and is idempotent past the first transition
//!
//! Cancellation by the payer is allowed after a shorter timeout than the
//! permissionless keeper sweep, so a user can self-correct first.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use inferpay_types::{
    AccountId, Amount, Clock, EscrowHandle, EscrowRecord, EscrowStatus, InferPayError,
    PendingEscrowProbe, RefundOutcome, Result,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Deployment-time escrow timing and fee configuration
#[derive(Debug, Clone)]
pub struct EscrowConfig {
    /// How long the payer must wait before cancelling their own prompt
    pub cancellation_timeout: Duration,
    /// How long anyone must wait before sweeping a stalled prompt
    pub refund_timeout: Duration,
    /// Fee kept by the treasury on an owner cancellation
    pub cancellation_fee: Amount,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            cancellation_timeout: Duration::minutes(5),
            refund_timeout: Duration::minutes(30),
            cancellation_fee: Amount::zero(),
        }
    }
}

#[derive(Debug, Default)]
struct EscrowState {
    records: HashMap<EscrowHandle, EscrowRecord>,
    pending_by_payer: HashMap<AccountId, u64>,
}

impl EscrowState {
    fn finish(&mut self, handle: EscrowHandle, status: EscrowStatus) {
        let record = self
            .records
            .get_mut(&handle)
            .expect("caller verified the record exists");
        record.status = status;
        if let Some(count) = self.pending_by_payer.get_mut(&record.payer) {
            *count -= 1;
            if *count == 0 {
                self.pending_by_payer.remove(&record.payer);
            }
        }
    }
}

/// The Escrow Custody Ledger
#[derive(Clone)]
pub struct EscrowLedger {
    state: Arc<RwLock<EscrowState>>,
    clock: Arc<dyn Clock>,
    config: EscrowConfig,
}

impl EscrowLedger {
    pub fn new(clock: Arc<dyn Clock>, config: EscrowConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(EscrowState::default())),
            clock,
            config,
        }
    }

    /// The active timing/fee configuration
    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    /// Open a PENDING record for a freshly reserved handle
    pub async fn open(
        &self,
        handle: EscrowHandle,
        payer: &AccountId,
        amount: Amount,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        if state.records.contains_key(&handle) {
            return Err(InferPayError::EscrowAlreadyExists {
                handle: handle.to_string(),
            });
        }

        state.records.insert(
            handle,
            EscrowRecord {
                handle,
                payer: payer.clone(),
                amount,
                created_at: now,
                status: EscrowStatus::Pending,
            },
        );
        *state.pending_by_payer.entry(payer.clone()).or_default() += 1;

        debug!(%handle, %payer, %amount, "escrow opened");
        Ok(())
    }

    /// Pre-validation hook for the orchestrator: the record must exist and
    /// still be PENDING. Returns the escrowed amount.
    pub async fn ensure_pending(&self, handle: EscrowHandle) -> Result<Amount> {
        let state = self.state.read().await;
        let record =
            state
                .records
                .get(&handle)
                .ok_or_else(|| InferPayError::EscrowNotFound {
                    handle: handle.to_string(),
                })?;
        if !record.is_pending() {
            return Err(InferPayError::EscrowNotPending {
                handle: handle.to_string(),
                status: record.status.to_string(),
            });
        }
        Ok(record.amount)
    }

    /// Settle a record on a verified response: PENDING -> COMPLETE.
    /// Returns the released amount for the treasury payout.
    pub async fn settle(&self, handle: EscrowHandle) -> Result<Amount> {
        let mut state = self.state.write().await;
        let record =
            state
                .records
                .get(&handle)
                .ok_or_else(|| InferPayError::EscrowNotFound {
                    handle: handle.to_string(),
                })?;
        if !record.is_pending() {
            return Err(InferPayError::EscrowNotPending {
                handle: handle.to_string(),
                status: record.status.to_string(),
            });
        }

        let amount = record.amount;
        state.finish(handle, EscrowStatus::Complete);

        info!(%handle, %amount, "escrow settled");
        Ok(amount)
    }

    /// Read-only preview of [`EscrowLedger::refund_by_owner`]: validates
    /// and computes the outcome without transitioning the record.
    pub async fn check_owner_refund(
        &self,
        handle: EscrowHandle,
        caller: &AccountId,
    ) -> Result<RefundOutcome> {
        let now = self.clock.now();
        let state = self.state.read().await;
        self.owner_refund_outcome(&state, handle, caller, now)
    }

    /// Payer cancellation after the cancellation timeout: PENDING ->
    /// REFUNDED, keeping the cancellation fee for the treasury.
    pub async fn refund_by_owner(
        &self,
        handle: EscrowHandle,
        caller: &AccountId,
    ) -> Result<RefundOutcome> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let outcome = self.owner_refund_outcome(&state, handle, caller, now)?;
        state.finish(handle, EscrowStatus::Refunded);

        info!(%handle, refund = %outcome.refund, fee = %outcome.fee, "escrow refunded by owner");
        Ok(outcome)
    }

    fn owner_refund_outcome(
        &self,
        state: &EscrowState,
        handle: EscrowHandle,
        caller: &AccountId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<RefundOutcome> {
        let record =
            state
                .records
                .get(&handle)
                .ok_or_else(|| InferPayError::EscrowNotFound {
                    handle: handle.to_string(),
                })?;

        if &record.payer != caller {
            return Err(InferPayError::NotPromptOwner {
                caller: caller.to_string(),
                handle: handle.to_string(),
            });
        }
        if !record.is_pending() {
            return Err(InferPayError::EscrowNotPending {
                handle: handle.to_string(),
                status: record.status.to_string(),
            });
        }

        let cancellable_at = record.created_at + self.config.cancellation_timeout;
        if now < cancellable_at {
            return Err(InferPayError::PromptNotCancellableYet {
                handle: handle.to_string(),
                cancellable_at: cancellable_at.to_rfc3339(),
            });
        }

        // The fee can never exceed the escrowed amount.
        let fee = self.config.cancellation_fee.min(record.amount);
        Ok(RefundOutcome {
            payer: record.payer.clone(),
            refund: record.amount.saturating_sub(fee),
            fee,
        })
    }

    /// Read-only preview of [`EscrowLedger::refund_by_timeout`]
    pub async fn check_timeout_refund(
        &self,
        handle: EscrowHandle,
    ) -> Result<Option<RefundOutcome>> {
        let now = self.clock.now();
        let state = self.state.read().await;
        self.timeout_refund_outcome(&state, handle, now)
    }

    /// Permissionless keeper sweep after the refund timeout: PENDING ->
    /// REFUNDED with the full amount returned. Unknown handles are a
    /// silent no-op (`Ok(None)`) so blind batch sweeps never revert.
    pub async fn refund_by_timeout(
        &self,
        handle: EscrowHandle,
    ) -> Result<Option<RefundOutcome>> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let outcome = match self.timeout_refund_outcome(&state, handle, now)? {
            Some(outcome) => outcome,
            None => return Ok(None),
        };
        state.finish(handle, EscrowStatus::Refunded);

        info!(%handle, refund = %outcome.refund, "escrow refunded by timeout");
        Ok(Some(outcome))
    }

    fn timeout_refund_outcome(
        &self,
        state: &EscrowState,
        handle: EscrowHandle,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<RefundOutcome>> {
        let record = match state.records.get(&handle) {
            Some(record) => record,
            None => return Ok(None),
        };

        if !record.is_pending() {
            return Err(InferPayError::EscrowNotPending {
                handle: handle.to_string(),
                status: record.status.to_string(),
            });
        }

        let refundable_at = record.created_at + self.config.refund_timeout;
        if now < refundable_at {
            return Err(InferPayError::PromptNotRefundableYet {
                handle: handle.to_string(),
                refundable_at: refundable_at.to_rfc3339(),
            });
        }

        Ok(Some(RefundOutcome {
            payer: record.payer.clone(),
            refund: record.amount,
            fee: Amount::zero(),
        }))
    }

    /// Read accessor for a single record
    pub async fn record(&self, handle: EscrowHandle) -> Option<EscrowRecord> {
        self.state.read().await.records.get(&handle).cloned()
    }
}

#[async_trait]
impl PendingEscrowProbe for EscrowLedger {
    async fn pending_count(&self, account: &AccountId) -> u64 {
        self.state
            .read()
            .await
            .pending_by_payer
            .get(account)
            .copied()
            .unwrap_or(0)
    }
}
