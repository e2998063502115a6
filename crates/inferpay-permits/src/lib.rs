//! InferPay Permits - The spending authorization ledger
//!
//! Tracks, per account, how much value that account is currently entitled
//! to spend and until when. Two funding models implement one trait:
//!
//! - [`AllowanceLedger`]: debits consume a pre-approved allowance
//!   (`spent <= limit`, always) and pull the funds into custody through
//!   the external [`FundsTransfer`] capability at debit time.
//! - [`CustodyLedger`]: debits consume a deposit balance the ledger holds
//!   directly; funds entered custody earlier, at deposit time.
//!
//! Destroying or draining an authorization requires zero pending escrow
//! records for the account, so in-flight funds are never orphaned. The
//! ledger asks the escrow ledger through [`PendingEscrowProbe`] rather
//! than holding a reference to it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inferpay_types::{
    AccountId, Amount, Authorization, Clock, FundingModel, FundsTransfer, InferPayError,
    PendingEscrowProbe, Result,
};
use tokio::sync::RwLock;
use tracing::debug;

/// One spending authorization interface, two funding models behind it
#[async_trait]
pub trait SpendingAuthorization: Send + Sync {
    /// Which funding model this ledger was configured with
    fn funding_model(&self) -> FundingModel;

    /// Replace the account's authorization, resetting `spent` to zero.
    /// Rejected while the account has pending escrows.
    async fn set_authorization(
        &self,
        account: &AccountId,
        limit: Amount,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Clear the account's authorization. Rejected while the account has
    /// pending escrows. The custody model returns the full deposit first.
    async fn cancel_authorization(&self, account: &AccountId) -> Result<()>;

    /// Validate that `amount` of spending capacity is available, without
    /// consuming it or moving funds
    async fn check_debit(&self, account: &AccountId, amount: Amount) -> Result<()>;

    /// Consume `amount` of spending capacity
    async fn debit(&self, account: &AccountId, amount: Amount) -> Result<()>;

    /// Return `amount` of spending capacity (refund / cancellation path)
    async fn credit(&self, account: &AccountId, amount: Amount) -> Result<()>;

    /// Custody model only: pull `amount` from the account into the ledger
    async fn deposit(&self, account: &AccountId, amount: Amount) -> Result<()>;

    /// Custody model only: pay `amount` back out to the account. Rejected
    /// while the account has pending escrows.
    async fn withdraw(&self, account: &AccountId, amount: Amount) -> Result<()>;

    /// Read accessor for the account's authorization state
    async fn authorization(&self, account: &AccountId) -> Option<Authorization>;
}

async fn ensure_no_pending(
    probe: &dyn PendingEscrowProbe,
    account: &AccountId,
) -> Result<()> {
    let pending = probe.pending_count(account).await;
    if pending > 0 {
        return Err(InferPayError::HasPendingPrompts {
            account: account.to_string(),
            pending,
        });
    }
    Ok(())
}

// ============================================================================
// Allowance model
// ============================================================================

fn validate_allowance_debit(
    account: &AccountId,
    auth: &Authorization,
    amount: Amount,
    now: DateTime<Utc>,
) -> Result<()> {
    if auth.is_expired_at(now) {
        return Err(InferPayError::AuthorizationExpired {
            account: account.to_string(),
            expired_at: auth.expires_at.to_rfc3339(),
        });
    }
    let remaining = auth.remaining()?;
    if remaining < amount {
        return Err(InferPayError::InsufficientAuthorization {
            requested: amount.0,
            remaining: remaining.0,
        });
    }
    Ok(())
}

fn validate_custody_debit(
    account: &AccountId,
    auth: &Authorization,
    amount: Amount,
    now: DateTime<Utc>,
) -> Result<()> {
    if auth.is_expired_at(now) {
        return Err(InferPayError::AuthorizationExpired {
            account: account.to_string(),
            expired_at: auth.expires_at.to_rfc3339(),
        });
    }
    if auth.deposit_balance < amount {
        return Err(InferPayError::InsufficientDeposit {
            requested: amount.0,
            available: auth.deposit_balance.0,
        });
    }
    Ok(())
}

/// Spending authorization backed by a pre-approved allowance
#[derive(Clone)]
pub struct AllowanceLedger {
    accounts: Arc<RwLock<HashMap<AccountId, Authorization>>>,
    clock: Arc<dyn Clock>,
    pending: Arc<dyn PendingEscrowProbe>,
    transfer: Arc<dyn FundsTransfer>,
}

impl AllowanceLedger {
    pub fn new(
        clock: Arc<dyn Clock>,
        pending: Arc<dyn PendingEscrowProbe>,
        transfer: Arc<dyn FundsTransfer>,
    ) -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
            clock,
            pending,
            transfer,
        }
    }
}

#[async_trait]
impl SpendingAuthorization for AllowanceLedger {
    fn funding_model(&self) -> FundingModel {
        FundingModel::Allowance
    }

    async fn set_authorization(
        &self,
        account: &AccountId,
        limit: Amount,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        ensure_no_pending(self.pending.as_ref(), account).await?;
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.clone(), Authorization::new(limit, expires_at));
        debug!(%account, %limit, "allowance authorization set");
        Ok(())
    }

    async fn cancel_authorization(&self, account: &AccountId) -> Result<()> {
        ensure_no_pending(self.pending.as_ref(), account).await?;
        let mut accounts = self.accounts.write().await;
        accounts.remove(account);
        debug!(%account, "allowance authorization cancelled");
        Ok(())
    }

    async fn check_debit(&self, account: &AccountId, amount: Amount) -> Result<()> {
        let now = self.clock.now();
        let accounts = self.accounts.read().await;
        let auth = accounts
            .get(account)
            .ok_or_else(|| InferPayError::NoActiveAuthorization {
                account: account.to_string(),
            })?;
        validate_allowance_debit(account, auth, amount, now)
    }

    async fn debit(&self, account: &AccountId, amount: Amount) -> Result<()> {
        let now = self.clock.now();
        let mut accounts = self.accounts.write().await;
        let auth = accounts
            .get_mut(account)
            .ok_or_else(|| InferPayError::NoActiveAuthorization {
                account: account.to_string(),
            })?;
        validate_allowance_debit(account, auth, amount, now)?;

        let spent = auth.spent.checked_add(amount)?;
        // Funds move into custody at debit time under this model.
        self.transfer.transfer_in(account, amount).await?;
        auth.spent = spent;
        debug!(%account, %amount, spent = %auth.spent, "allowance debited");
        Ok(())
    }

    async fn credit(&self, account: &AccountId, amount: Amount) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let auth = accounts
            .get_mut(account)
            .ok_or_else(|| InferPayError::NoActiveAuthorization {
                account: account.to_string(),
            })?;

        self.transfer.transfer_out(account, amount).await?;
        // Credits only ever undo earlier debits, so this cannot underflow;
        // saturate anyway to preserve `spent <= limit`.
        auth.spent = auth.spent.saturating_sub(amount);
        debug!(%account, %amount, spent = %auth.spent, "allowance credited");
        Ok(())
    }

    async fn deposit(&self, _account: &AccountId, _amount: Amount) -> Result<()> {
        Err(InferPayError::UnsupportedFundingModel {
            model: "allowance".to_string(),
        })
    }

    async fn withdraw(&self, _account: &AccountId, _amount: Amount) -> Result<()> {
        Err(InferPayError::UnsupportedFundingModel {
            model: "allowance".to_string(),
        })
    }

    async fn authorization(&self, account: &AccountId) -> Option<Authorization> {
        self.accounts.read().await.get(account).cloned()
    }
}

// ============================================================================
// Custody model
// ============================================================================

/// Spending authorization backed by a deposit the ledger holds directly
#[derive(Clone)]
pub struct CustodyLedger {
    accounts: Arc<RwLock<HashMap<AccountId, Authorization>>>,
    clock: Arc<dyn Clock>,
    pending: Arc<dyn PendingEscrowProbe>,
    transfer: Arc<dyn FundsTransfer>,
}

impl CustodyLedger {
    pub fn new(
        clock: Arc<dyn Clock>,
        pending: Arc<dyn PendingEscrowProbe>,
        transfer: Arc<dyn FundsTransfer>,
    ) -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
            clock,
            pending,
            transfer,
        }
    }
}

#[async_trait]
impl SpendingAuthorization for CustodyLedger {
    fn funding_model(&self) -> FundingModel {
        FundingModel::Custody
    }

    async fn set_authorization(
        &self,
        account: &AccountId,
        limit: Amount,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        ensure_no_pending(self.pending.as_ref(), account).await?;
        let mut accounts = self.accounts.write().await;

        // Replacing the authorization must not orphan an existing deposit.
        let deposit_balance = accounts
            .get(account)
            .map(|a| a.deposit_balance)
            .unwrap_or(Amount::zero());
        let mut auth = Authorization::new(limit, expires_at);
        auth.deposit_balance = deposit_balance;
        accounts.insert(account.clone(), auth);
        debug!(%account, %limit, "custody authorization set");
        Ok(())
    }

    async fn cancel_authorization(&self, account: &AccountId) -> Result<()> {
        ensure_no_pending(self.pending.as_ref(), account).await?;
        let mut accounts = self.accounts.write().await;

        if let Some(auth) = accounts.remove(account) {
            if !auth.deposit_balance.is_zero() {
                // Return the full deposit before forgetting the account.
                self.transfer
                    .transfer_out(account, auth.deposit_balance)
                    .await?;
            }
        }
        debug!(%account, "custody authorization cancelled");
        Ok(())
    }

    async fn check_debit(&self, account: &AccountId, amount: Amount) -> Result<()> {
        let now = self.clock.now();
        let accounts = self.accounts.read().await;
        let auth = accounts
            .get(account)
            .ok_or_else(|| InferPayError::NoActiveAuthorization {
                account: account.to_string(),
            })?;
        validate_custody_debit(account, auth, amount, now)
    }

    async fn debit(&self, account: &AccountId, amount: Amount) -> Result<()> {
        let now = self.clock.now();
        let mut accounts = self.accounts.write().await;
        let auth = accounts
            .get_mut(account)
            .ok_or_else(|| InferPayError::NoActiveAuthorization {
                account: account.to_string(),
            })?;
        validate_custody_debit(account, auth, amount, now)?;

        auth.deposit_balance = auth.deposit_balance.checked_sub(amount)?;
        debug!(%account, %amount, balance = %auth.deposit_balance, "deposit debited");
        Ok(())
    }

    async fn credit(&self, account: &AccountId, amount: Amount) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let auth = accounts
            .get_mut(account)
            .ok_or_else(|| InferPayError::NoActiveAuthorization {
                account: account.to_string(),
            })?;

        auth.deposit_balance = auth.deposit_balance.checked_add(amount)?;
        debug!(%account, %amount, balance = %auth.deposit_balance, "deposit credited");
        Ok(())
    }

    async fn deposit(&self, account: &AccountId, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Err(InferPayError::invalid_amount(
                "deposit must be greater than zero",
            ));
        }

        let mut accounts = self.accounts.write().await;
        let auth = accounts
            .get_mut(account)
            .ok_or_else(|| InferPayError::NoActiveAuthorization {
                account: account.to_string(),
            })?;

        self.transfer.transfer_in(account, amount).await?;
        auth.deposit_balance = auth.deposit_balance.checked_add(amount)?;
        debug!(%account, %amount, balance = %auth.deposit_balance, "deposit received");
        Ok(())
    }

    async fn withdraw(&self, account: &AccountId, amount: Amount) -> Result<()> {
        ensure_no_pending(self.pending.as_ref(), account).await?;

        let mut accounts = self.accounts.write().await;
        let auth = accounts
            .get_mut(account)
            .ok_or_else(|| InferPayError::NoActiveAuthorization {
                account: account.to_string(),
            })?;

        if auth.deposit_balance < amount {
            return Err(InferPayError::InsufficientDeposit {
                requested: amount.0,
                available: auth.deposit_balance.0,
            });
        }

        auth.deposit_balance = auth.deposit_balance.checked_sub(amount)?;
        self.transfer.transfer_out(account, amount).await?;
        debug!(%account, %amount, balance = %auth.deposit_balance, "deposit withdrawn");
        Ok(())
    }

    async fn authorization(&self, account: &AccountId) -> Option<Authorization> {
        self.accounts.read().await.get(account).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use inferpay_types::ManualClock;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FixedProbe(AtomicU64);

    #[async_trait]
    impl PendingEscrowProbe for FixedProbe {
        async fn pending_count(&self, _account: &AccountId) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingTransfer {
        inbound: RwLock<Vec<(AccountId, Amount)>>,
        outbound: RwLock<Vec<(AccountId, Amount)>>,
    }

    #[async_trait]
    impl FundsTransfer for RecordingTransfer {
        async fn transfer_in(&self, from: &AccountId, amount: Amount) -> Result<()> {
            self.inbound.write().await.push((from.clone(), amount));
            Ok(())
        }

        async fn transfer_out(&self, to: &AccountId, amount: Amount) -> Result<()> {
            self.outbound.write().await.push((to.clone(), amount));
            Ok(())
        }
    }

    fn allowance_fixture() -> (AllowanceLedger, Arc<ManualClock>, Arc<FixedProbe>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let probe = Arc::new(FixedProbe(AtomicU64::new(0)));
        let transfer = Arc::new(RecordingTransfer::default());
        let ledger = AllowanceLedger::new(clock.clone(), probe.clone(), transfer);
        (ledger, clock, probe)
    }

    #[tokio::test]
    async fn test_allowance_debit_and_credit() {
        let (ledger, clock, _) = allowance_fixture();
        let account = AccountId::new();
        ledger
            .set_authorization(&account, Amount::new(100), clock.now() + Duration::hours(1))
            .await
            .unwrap();

        ledger.debit(&account, Amount::new(30)).await.unwrap();
        let auth = ledger.authorization(&account).await.unwrap();
        assert_eq!(auth.spent, Amount::new(30));
        assert!(auth.spent <= auth.limit);

        ledger.credit(&account, Amount::new(30)).await.unwrap();
        let auth = ledger.authorization(&account).await.unwrap();
        assert_eq!(auth.spent, Amount::zero());
    }

    #[tokio::test]
    async fn test_allowance_overdraw_is_rejected() {
        let (ledger, clock, _) = allowance_fixture();
        let account = AccountId::new();
        ledger
            .set_authorization(&account, Amount::new(50), clock.now() + Duration::hours(1))
            .await
            .unwrap();

        let result = ledger.debit(&account, Amount::new(60)).await;
        assert!(matches!(
            result,
            Err(InferPayError::InsufficientAuthorization {
                requested: 60,
                remaining: 50
            })
        ));
        // Nothing was consumed.
        let auth = ledger.authorization(&account).await.unwrap();
        assert_eq!(auth.spent, Amount::zero());
    }

    #[tokio::test]
    async fn test_debit_without_authorization() {
        let (ledger, _, _) = allowance_fixture();
        let result = ledger.debit(&AccountId::new(), Amount::new(1)).await;
        assert!(matches!(
            result,
            Err(InferPayError::NoActiveAuthorization { .. })
        ));
    }

    #[tokio::test]
    async fn test_debit_after_expiry() {
        let (ledger, clock, _) = allowance_fixture();
        let account = AccountId::new();
        ledger
            .set_authorization(&account, Amount::new(100), clock.now() + Duration::minutes(5))
            .await
            .unwrap();

        clock.advance(Duration::minutes(10));
        let result = ledger.debit(&account, Amount::new(1)).await;
        assert!(matches!(
            result,
            Err(InferPayError::AuthorizationExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_pending_escrows_block_replacement() {
        let (ledger, clock, probe) = allowance_fixture();
        let account = AccountId::new();
        ledger
            .set_authorization(&account, Amount::new(100), clock.now() + Duration::hours(1))
            .await
            .unwrap();

        probe.0.store(2, Ordering::SeqCst);
        assert!(matches!(
            ledger
                .set_authorization(&account, Amount::new(10), clock.now() + Duration::hours(1))
                .await,
            Err(InferPayError::HasPendingPrompts { pending: 2, .. })
        ));
        assert!(matches!(
            ledger.cancel_authorization(&account).await,
            Err(InferPayError::HasPendingPrompts { .. })
        ));

        probe.0.store(0, Ordering::SeqCst);
        ledger.cancel_authorization(&account).await.unwrap();
        assert!(ledger.authorization(&account).await.is_none());
    }

    #[tokio::test]
    async fn test_check_debit_consumes_nothing() {
        let (ledger, clock, _) = allowance_fixture();
        let account = AccountId::new();
        ledger
            .set_authorization(&account, Amount::new(100), clock.now() + Duration::hours(1))
            .await
            .unwrap();

        ledger.check_debit(&account, Amount::new(100)).await.unwrap();
        let auth = ledger.authorization(&account).await.unwrap();
        assert_eq!(auth.spent, Amount::zero());

        assert!(matches!(
            ledger.check_debit(&account, Amount::new(101)).await,
            Err(InferPayError::InsufficientAuthorization { .. })
        ));
    }

    #[tokio::test]
    async fn test_allowance_rejects_deposits() {
        let (ledger, _, _) = allowance_fixture();
        assert!(matches!(
            ledger.deposit(&AccountId::new(), Amount::new(1)).await,
            Err(InferPayError::UnsupportedFundingModel { .. })
        ));
    }

    fn custody_fixture() -> (CustodyLedger, Arc<ManualClock>, Arc<RecordingTransfer>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let probe = Arc::new(FixedProbe(AtomicU64::new(0)));
        let transfer = Arc::new(RecordingTransfer::default());
        let ledger = CustodyLedger::new(clock.clone(), probe, transfer.clone());
        (ledger, clock, transfer)
    }

    #[tokio::test]
    async fn test_custody_deposit_debit_withdraw() {
        let (ledger, clock, transfer) = custody_fixture();
        let account = AccountId::new();
        ledger
            .set_authorization(&account, Amount::new(1000), clock.now() + Duration::hours(1))
            .await
            .unwrap();

        ledger.deposit(&account, Amount::new(500)).await.unwrap();
        assert_eq!(transfer.inbound.read().await.len(), 1);

        ledger.debit(&account, Amount::new(200)).await.unwrap();
        let auth = ledger.authorization(&account).await.unwrap();
        assert_eq!(auth.deposit_balance, Amount::new(300));

        let result = ledger.debit(&account, Amount::new(400)).await;
        assert!(matches!(
            result,
            Err(InferPayError::InsufficientDeposit {
                requested: 400,
                available: 300
            })
        ));

        ledger.withdraw(&account, Amount::new(300)).await.unwrap();
        assert_eq!(
            transfer.outbound.read().await.as_slice(),
            &[(account.clone(), Amount::new(300))]
        );
    }

    #[tokio::test]
    async fn test_custody_cancel_returns_deposit() {
        let (ledger, clock, transfer) = custody_fixture();
        let account = AccountId::new();
        ledger
            .set_authorization(&account, Amount::new(1000), clock.now() + Duration::hours(1))
            .await
            .unwrap();
        ledger.deposit(&account, Amount::new(250)).await.unwrap();

        ledger.cancel_authorization(&account).await.unwrap();
        assert_eq!(
            transfer.outbound.read().await.as_slice(),
            &[(account.clone(), Amount::new(250))]
        );
        assert!(ledger.authorization(&account).await.is_none());
    }

    #[tokio::test]
    async fn test_custody_replacement_keeps_deposit() {
        let (ledger, clock, _) = custody_fixture();
        let account = AccountId::new();
        ledger
            .set_authorization(&account, Amount::new(1000), clock.now() + Duration::hours(1))
            .await
            .unwrap();
        ledger.deposit(&account, Amount::new(250)).await.unwrap();

        ledger
            .set_authorization(&account, Amount::new(500), clock.now() + Duration::hours(2))
            .await
            .unwrap();
        let auth = ledger.authorization(&account).await.unwrap();
        assert_eq!(auth.deposit_balance, Amount::new(250));
        assert_eq!(auth.spent, Amount::zero());
    }
}
