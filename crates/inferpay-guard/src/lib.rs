//! InferPay Guard - Caller-identity checks for every mutating operation
//!
//! Role requirements live in one policy table instead of scattered inline
//! checks. Four caller classes exist:
//!
//! - **Admin**: fee configuration and one-time component linking
//! - **Oracle**: the single trusted identity that submits answers, branch
//!   and metadata completions, and autonomous job firings
//! - **ResourceOwner**: the recorded owner of the resource being mutated;
//!   the guard admits the call and the owning component verifies the
//!   specific resource
//! - **Anyone**: permissionless (the keeper's timeout sweep)
//!
//! All checks fail closed with `Unauthorized`; none silently downgrades.

use inferpay_types::{AccountId, InferPayError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

/// Every mutating entry point of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    SetFees,
    LinkOracle,
    SetAuthorization,
    CancelAuthorization,
    Deposit,
    Withdraw,
    InitiatePrompt,
    InitiateRegeneration,
    InitiateAgentJob,
    InitiateBranch,
    InitiateMetadataUpdate,
    CancelPrompt,
    RefundByTimeout,
    SubmitAnswer,
    SubmitJobResult,
    SubmitBranch,
    SubmitMetadataUpdate,
}

/// The caller class an operation requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallerClass {
    Admin,
    Oracle,
    ResourceOwner,
    Anyone,
}

impl Operation {
    /// The policy table
    pub fn required_class(&self) -> CallerClass {
        match self {
            Self::SetFees | Self::LinkOracle => CallerClass::Admin,
            Self::InitiateAgentJob
            | Self::SubmitAnswer
            | Self::SubmitJobResult
            | Self::SubmitBranch
            | Self::SubmitMetadataUpdate => CallerClass::Oracle,
            Self::SetAuthorization
            | Self::CancelAuthorization
            | Self::Deposit
            | Self::Withdraw
            | Self::InitiatePrompt
            | Self::InitiateRegeneration
            | Self::InitiateBranch
            | Self::InitiateMetadataUpdate
            | Self::CancelPrompt => CallerClass::ResourceOwner,
            Self::RefundByTimeout => CallerClass::Anyone,
        }
    }
}

/// The Access Control Guard
pub struct AccessGuard {
    admin: AccountId,
    /// Linked exactly once, by the admin
    oracle: RwLock<Option<AccountId>>,
}

impl AccessGuard {
    /// Create a guard with the given admin identity
    pub fn new(admin: AccountId) -> Result<Self> {
        if admin.is_nil() {
            return Err(InferPayError::ZeroAccount {
                role: "admin".to_string(),
            });
        }
        Ok(Self {
            admin,
            oracle: RwLock::new(None),
        })
    }

    /// Link the trusted oracle identity. Admin-only, once.
    pub async fn link_oracle(&self, caller: &AccountId, oracle: AccountId) -> Result<()> {
        self.authorize(Operation::LinkOracle, caller).await?;
        if oracle.is_nil() {
            return Err(InferPayError::ZeroAccount {
                role: "oracle".to_string(),
            });
        }

        let mut slot = self.oracle.write().await;
        if slot.is_some() {
            return Err(InferPayError::OracleAlreadyLinked);
        }
        *slot = Some(oracle);
        Ok(())
    }

    /// The linked oracle identity, if any
    pub async fn oracle(&self) -> Option<AccountId> {
        self.oracle.read().await.clone()
    }

    /// The admin identity
    pub fn admin(&self) -> &AccountId {
        &self.admin
    }

    /// Check `caller` against the policy table for `operation`
    pub async fn authorize(&self, operation: Operation, caller: &AccountId) -> Result<()> {
        let allowed = match operation.required_class() {
            CallerClass::Admin => caller == &self.admin,
            // An unlinked oracle admits nobody.
            CallerClass::Oracle => self.oracle.read().await.as_ref() == Some(caller),
            // The owning component verifies the specific resource.
            CallerClass::ResourceOwner => !caller.is_nil(),
            CallerClass::Anyone => true,
        };

        if allowed {
            Ok(())
        } else {
            warn!(?operation, %caller, "caller rejected");
            Err(InferPayError::unauthorized(format!(
                "{operation:?} requires the {:?} caller class",
                operation.required_class()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admin_operations() {
        let admin = AccountId::new();
        let guard = AccessGuard::new(admin.clone()).unwrap();

        assert!(guard.authorize(Operation::SetFees, &admin).await.is_ok());
        assert!(matches!(
            guard.authorize(Operation::SetFees, &AccountId::new()).await,
            Err(InferPayError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_oracle_fails_closed_before_linking() {
        let guard = AccessGuard::new(AccountId::new()).unwrap();
        let anyone = AccountId::new();

        assert!(matches!(
            guard.authorize(Operation::SubmitAnswer, &anyone).await,
            Err(InferPayError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_oracle_links_once() {
        let admin = AccountId::new();
        let guard = AccessGuard::new(admin.clone()).unwrap();
        let oracle = AccountId::new();

        guard.link_oracle(&admin, oracle.clone()).await.unwrap();
        assert!(guard.authorize(Operation::SubmitAnswer, &oracle).await.is_ok());

        assert!(matches!(
            guard.link_oracle(&admin, AccountId::new()).await,
            Err(InferPayError::OracleAlreadyLinked)
        ));
    }

    #[tokio::test]
    async fn test_only_admin_links_oracle() {
        let guard = AccessGuard::new(AccountId::new()).unwrap();
        let intruder = AccountId::new();
        assert!(matches!(
            guard.link_oracle(&intruder, AccountId::new()).await,
            Err(InferPayError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_nil_accounts_are_rejected() {
        assert!(matches!(
            AccessGuard::new(AccountId::nil()),
            Err(InferPayError::ZeroAccount { .. })
        ));

        let admin = AccountId::new();
        let guard = AccessGuard::new(admin.clone()).unwrap();
        assert!(matches!(
            guard.link_oracle(&admin, AccountId::nil()).await,
            Err(InferPayError::ZeroAccount { .. })
        ));
        assert!(matches!(
            guard
                .authorize(Operation::InitiatePrompt, &AccountId::nil())
                .await,
            Err(InferPayError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_keeper_sweep_is_permissionless() {
        let guard = AccessGuard::new(AccountId::new()).unwrap();
        let stranger = AccountId::new();
        assert!(guard
            .authorize(Operation::RefundByTimeout, &stranger)
            .await
            .is_ok());
    }

    #[test]
    fn test_policy_table() {
        assert_eq!(Operation::SetFees.required_class(), CallerClass::Admin);
        assert_eq!(Operation::SubmitAnswer.required_class(), CallerClass::Oracle);
        assert_eq!(
            Operation::InitiateAgentJob.required_class(),
            CallerClass::Oracle
        );
        assert_eq!(
            Operation::CancelPrompt.required_class(),
            CallerClass::ResourceOwner
        );
        assert_eq!(
            Operation::RefundByTimeout.required_class(),
            CallerClass::Anyone
        );
    }
}
