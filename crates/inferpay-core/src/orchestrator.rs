//! The request lifecycle orchestrator
//!
//! Every paid action flows through here in the same shape:
//!
//! 1. Guard check (caller role)
//! 2. Read-only pre-validation against the registry and escrow ledger
//! 3. External funds movement (debit, payout or refund credit)
//! 4. Internal transitions: reserve handles, open/close escrow, record
//! 5. Publish the facts the action implies
//!
//! Steps that can fail come before steps that mutate: external transfers
//! run only after pre-validation and before any terminal internal
//! transition, and all mutating entry points serialize on one lock. A
//! failed call therefore leaves every component unchanged.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use inferpay_audit::FactLog;
use inferpay_escrow::EscrowLedger;
use inferpay_guard::{AccessGuard, Operation};
use inferpay_permits::{AllowanceLedger, CustodyLedger, SpendingAuthorization};
use inferpay_registry::Registry;
use inferpay_types::{
    AccountId, Amount, Authorization, Clock, ContentRef, ConversationId, DomainFact,
    EscrowHandle, EscrowRecord, FundingModel, FundsTransfer, InferPayError, JobId, MessageId,
    PendingEscrowProbe, RefundOutcome, Result, TriggerId,
};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::config::{CoreConfig, FeeSchedule};

/// Handles assigned to a freshly submitted prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTicket {
    pub conversation: ConversationId,
    pub prompt: MessageId,
    pub answer: MessageId,
}

/// Handles assigned to a freshly submitted agent job firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTicket {
    pub job: JobId,
    pub trigger: TriggerId,
}

/// The InferPay core
pub struct Orchestrator {
    guard: AccessGuard,
    registry: Registry,
    authorization: Arc<dyn SpendingAuthorization>,
    escrow: EscrowLedger,
    facts: FactLog,
    transfer: Arc<dyn FundsTransfer>,
    treasury: AccountId,
    fees: RwLock<FeeSchedule>,
    /// One mutating operation at a time
    serial: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        admin: AccountId,
        config: CoreConfig,
        clock: Arc<dyn Clock>,
        transfer: Arc<dyn FundsTransfer>,
    ) -> Result<Self> {
        if config.treasury.is_nil() {
            return Err(InferPayError::ZeroAccount {
                role: "treasury".to_string(),
            });
        }

        let guard = AccessGuard::new(admin)?;
        let escrow = EscrowLedger::new(clock.clone(), config.escrow);
        let probe: Arc<dyn PendingEscrowProbe> = Arc::new(escrow.clone());
        let authorization: Arc<dyn SpendingAuthorization> = match config.funding {
            FundingModel::Allowance => Arc::new(AllowanceLedger::new(
                clock.clone(),
                probe,
                transfer.clone(),
            )),
            FundingModel::Custody => Arc::new(CustodyLedger::new(
                clock.clone(),
                probe,
                transfer.clone(),
            )),
        };

        Ok(Self {
            guard,
            registry: Registry::new(),
            authorization,
            escrow,
            facts: FactLog::new(clock),
            transfer,
            treasury: config.treasury,
            fees: RwLock::new(config.fees),
            serial: Mutex::new(()),
        })
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Link the trusted oracle identity. Admin-only, once.
    pub async fn link_oracle(&self, caller: &AccountId, oracle: AccountId) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.guard.link_oracle(caller, oracle).await
    }

    /// Replace the fee schedule. Admin-only.
    pub async fn set_fees(&self, caller: &AccountId, fees: FeeSchedule) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.guard.authorize(Operation::SetFees, caller).await?;
        *self.fees.write().await = fees;
        info!("fee schedule replaced");
        Ok(())
    }

    /// The active fee schedule
    pub async fn fees(&self) -> FeeSchedule {
        self.fees.read().await.clone()
    }

    // ========================================================================
    // Spending authorization surface (callers manage their own account)
    // ========================================================================

    pub async fn set_authorization(
        &self,
        caller: &AccountId,
        limit: Amount,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.guard
            .authorize(Operation::SetAuthorization, caller)
            .await?;
        self.authorization
            .set_authorization(caller, limit, expires_at)
            .await
    }

    pub async fn cancel_authorization(&self, caller: &AccountId) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.guard
            .authorize(Operation::CancelAuthorization, caller)
            .await?;
        self.authorization.cancel_authorization(caller).await
    }

    /// Custody model only
    pub async fn deposit(&self, caller: &AccountId, amount: Amount) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.guard.authorize(Operation::Deposit, caller).await?;
        self.authorization.deposit(caller, amount).await
    }

    /// Custody model only
    pub async fn withdraw(&self, caller: &AccountId, amount: Amount) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.guard.authorize(Operation::Withdraw, caller).await?;
        self.authorization.withdraw(caller, amount).await
    }

    pub async fn authorization_of(&self, account: &AccountId) -> Option<Authorization> {
        self.authorization.authorization(account).await
    }

    // ========================================================================
    // Paid actions
    // ========================================================================

    /// Submit a paid prompt. Pass an unassigned conversation handle to start
    /// a new conversation; the prompt fee moves into escrow under the
    /// reserved answer handle.
    pub async fn initiate_prompt(
        &self,
        caller: &AccountId,
        conversation: ConversationId,
        payload: ContentRef,
    ) -> Result<PromptTicket> {
        let _serial = self.serial.lock().await;
        self.guard
            .authorize(Operation::InitiatePrompt, caller)
            .await?;
        if !conversation.is_unassigned() {
            self.registry
                .check_conversation_access(caller, conversation)
                .await?;
        }

        let fee = self.fees.read().await.prompt_fee;
        self.authorization.debit(caller, fee).await?;

        let conversation = if conversation.is_unassigned() {
            self.registry.reserve_conversation_id()
        } else {
            conversation
        };
        let prompt = self.registry.reserve_message_id();
        let answer = self.registry.reserve_message_id();

        self.escrow
            .open(EscrowHandle::Answer(answer), caller, fee)
            .await?;
        let created = self
            .registry
            .record_prompt(caller, conversation, prompt, answer)
            .await?;

        if created {
            self.facts
                .publish(DomainFact::ConversationAdded {
                    conversation,
                    owner: caller.clone(),
                })
                .await;
        }
        self.facts
            .publish(DomainFact::PromptSubmitted {
                user: caller.clone(),
                conversation,
                prompt,
                answer,
                payload,
            })
            .await;
        self.facts
            .publish(DomainFact::PaymentEscrowed {
                handle: EscrowHandle::Answer(answer),
                payer: caller.clone(),
                amount: fee,
            })
            .await;

        info!(%caller, %conversation, %prompt, %answer, %fee, "prompt initiated");
        Ok(PromptTicket {
            conversation,
            prompt,
            answer,
        })
    }

    /// Request a re-answer for an existing prompt. At most one regeneration
    /// is outstanding per prompt; returns the fresh answer handle.
    pub async fn initiate_regeneration(
        &self,
        caller: &AccountId,
        prompt: MessageId,
    ) -> Result<MessageId> {
        let _serial = self.serial.lock().await;
        self.guard
            .authorize(Operation::InitiateRegeneration, caller)
            .await?;

        self.registry.check_regeneration(caller, prompt).await?;

        let fee = self.fees.read().await.regeneration_fee;
        self.authorization.debit(caller, fee).await?;

        let answer = self.registry.reserve_message_id();
        self.escrow
            .open(EscrowHandle::Answer(answer), caller, fee)
            .await?;
        self.registry
            .record_regeneration_request(caller, prompt, answer)
            .await?;

        self.facts
            .publish(DomainFact::RegenerationRequested {
                user: caller.clone(),
                prompt,
                answer,
            })
            .await;
        self.facts
            .publish(DomainFact::PaymentEscrowed {
                handle: EscrowHandle::Answer(answer),
                payer: caller.clone(),
                amount: fee,
            })
            .await;

        info!(%caller, %prompt, %answer, %fee, "regeneration initiated");
        Ok(answer)
    }

    /// Oracle-only: submit an autonomous job firing on behalf of `user`,
    /// who pays for it. Pass an unassigned job handle to create the job.
    pub async fn initiate_agent_job(
        &self,
        caller: &AccountId,
        user: &AccountId,
        job: JobId,
        payload: ContentRef,
    ) -> Result<JobTicket> {
        let _serial = self.serial.lock().await;
        self.guard
            .authorize(Operation::InitiateAgentJob, caller)
            .await?;
        if user.is_nil() {
            return Err(InferPayError::ZeroAccount {
                role: "user".to_string(),
            });
        }
        if !job.is_unassigned() {
            self.registry.check_job_access(user, job).await?;
        }

        let fee = self.fees.read().await.agent_job_fee;
        self.authorization.debit(user, fee).await?;

        let job = if job.is_unassigned() {
            self.registry.reserve_job_id()
        } else {
            job
        };
        let trigger = self.registry.reserve_trigger_id();

        self.escrow
            .open(EscrowHandle::Trigger(trigger), user, fee)
            .await?;
        let created = self.registry.record_agent_job(user, job, trigger).await?;

        if created {
            self.facts
                .publish(DomainFact::JobAdded {
                    job,
                    owner: user.clone(),
                })
                .await;
        }
        self.facts
            .publish(DomainFact::AgentJobSubmitted {
                user: user.clone(),
                job,
                trigger,
                payload,
            })
            .await;
        self.facts
            .publish(DomainFact::PaymentEscrowed {
                handle: EscrowHandle::Trigger(trigger),
                payer: user.clone(),
                amount: fee,
            })
            .await;

        info!(%user, %job, %trigger, %fee, "agent job initiated");
        Ok(JobTicket { job, trigger })
    }

    /// Request a branch of a conversation the caller owns. Branching is
    /// charged directly to the treasury, not escrowed; returns the reserved
    /// branch conversation handle.
    pub async fn initiate_branch(
        &self,
        caller: &AccountId,
        source: ConversationId,
    ) -> Result<ConversationId> {
        let _serial = self.serial.lock().await;
        self.guard
            .authorize(Operation::InitiateBranch, caller)
            .await?;
        if self.registry.conversation_owner(source).await.as_ref() != Some(caller) {
            return Err(InferPayError::unauthorized(format!(
                "{source} is not owned by the caller"
            )));
        }

        let fee = self.fees.read().await.branch_fee;
        // The treasury payout precedes the debit so a failed payout never
        // leaves the caller charged for nothing.
        self.authorization.check_debit(caller, fee).await?;
        self.pay_treasury(fee).await?;
        self.authorization.debit(caller, fee).await?;

        let branch = self.registry.reserve_conversation_id();
        self.registry
            .record_branch_request(caller, source, branch)
            .await?;

        self.facts
            .publish(DomainFact::BranchRequested {
                user: caller.clone(),
                source,
                branch,
            })
            .await;

        info!(%caller, %source, %branch, %fee, "branch initiated");
        Ok(branch)
    }

    /// Request a metadata update for a conversation the caller owns.
    /// Charged directly to the treasury, not escrowed.
    pub async fn initiate_metadata_update(
        &self,
        caller: &AccountId,
        conversation: ConversationId,
        metadata: ContentRef,
    ) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.guard
            .authorize(Operation::InitiateMetadataUpdate, caller)
            .await?;
        self.registry
            .record_metadata_update_request(caller, conversation)
            .await?;

        let fee = self.fees.read().await.metadata_fee;
        self.authorization.check_debit(caller, fee).await?;
        self.pay_treasury(fee).await?;
        self.authorization.debit(caller, fee).await?;

        self.facts
            .publish(DomainFact::MetadataUpdateRequested {
                user: caller.clone(),
                conversation,
                metadata,
            })
            .await;

        info!(%caller, %conversation, %fee, "metadata update initiated");
        Ok(())
    }

    // ========================================================================
    // Settlement surface (oracle)
    // ========================================================================

    /// Oracle-only: record a verified answer and release the escrowed
    /// payment to the treasury.
    pub async fn submit_answer(
        &self,
        caller: &AccountId,
        prompt: MessageId,
        answer: MessageId,
        content: Vec<ContentRef>,
    ) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.guard.authorize(Operation::SubmitAnswer, caller).await?;

        if self.registry.is_answer_finalized(answer).await {
            return Err(InferPayError::JobAlreadyFinalized {
                handle: answer.to_string(),
            });
        }
        let handle = EscrowHandle::Answer(answer);
        let amount = self.escrow.ensure_pending(handle).await?;
        self.registry.check_answer(prompt, answer, &content).await?;

        // The payout runs before the terminal transitions; if it fails the
        // escrow stays PENDING and the oracle can retry.
        self.pay_treasury(amount).await?;
        self.registry.record_answer(prompt, answer, &content).await?;
        self.escrow.settle(handle).await?;

        self.facts
            .publish(DomainFact::AnswerAdded {
                prompt,
                answer,
                content,
            })
            .await;
        self.facts
            .publish(DomainFact::PaymentFinalized { handle, amount })
            .await;

        info!(%prompt, %answer, %amount, "answer submitted");
        Ok(())
    }

    /// Oracle-only: record a verified job result and release the escrowed
    /// payment to the treasury.
    pub async fn submit_job_result(
        &self,
        caller: &AccountId,
        trigger: TriggerId,
        content: Vec<ContentRef>,
    ) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.guard
            .authorize(Operation::SubmitJobResult, caller)
            .await?;

        if self.registry.is_trigger_finalized(trigger).await {
            return Err(InferPayError::JobAlreadyFinalized {
                handle: trigger.to_string(),
            });
        }
        let handle = EscrowHandle::Trigger(trigger);
        let amount = self.escrow.ensure_pending(handle).await?;
        self.registry.check_job_result(trigger, &content).await?;

        self.pay_treasury(amount).await?;
        self.registry.record_job_result(trigger, &content).await?;
        self.escrow.settle(handle).await?;

        self.facts
            .publish(DomainFact::JobResultAdded { trigger, content })
            .await;
        self.facts
            .publish(DomainFact::PaymentFinalized { handle, amount })
            .await;

        info!(%trigger, %amount, "job result submitted");
        Ok(())
    }

    /// Oracle-only: materialize a requested branch
    pub async fn submit_branch(
        &self,
        caller: &AccountId,
        source: ConversationId,
        branch: ConversationId,
    ) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.guard.authorize(Operation::SubmitBranch, caller).await?;
        self.registry.record_branch(source, branch).await?;

        self.facts
            .publish(DomainFact::ConversationBranched { source, branch })
            .await;

        info!(%source, %branch, "branch submitted");
        Ok(())
    }

    /// Oracle-only: apply a requested metadata update
    pub async fn submit_metadata_update(
        &self,
        caller: &AccountId,
        conversation: ConversationId,
        metadata: ContentRef,
    ) -> Result<()> {
        let _serial = self.serial.lock().await;
        self.guard
            .authorize(Operation::SubmitMetadataUpdate, caller)
            .await?;
        self.registry.record_metadata_update(conversation).await?;

        self.facts
            .publish(DomainFact::MetadataUpdated {
                conversation,
                metadata,
            })
            .await;

        info!(%conversation, "metadata update submitted");
        Ok(())
    }

    // ========================================================================
    // Refund surface
    // ========================================================================

    /// Payer-only cancellation of an unanswered prompt, allowed after the
    /// cancellation timeout. Finalizes the answer handle so a late answer
    /// can never settle, and returns the escrowed amount minus the
    /// cancellation fee.
    pub async fn cancel_prompt(
        &self,
        caller: &AccountId,
        answer: MessageId,
    ) -> Result<RefundOutcome> {
        let _serial = self.serial.lock().await;
        self.guard.authorize(Operation::CancelPrompt, caller).await?;

        if self.registry.is_answer_finalized(answer).await {
            return Err(InferPayError::JobAlreadyFinalized {
                handle: answer.to_string(),
            });
        }

        // Validate and move the money first; the escrow record flips to
        // REFUNDED only once the refund has actually gone out.
        let handle = EscrowHandle::Answer(answer);
        let outcome = self.escrow.check_owner_refund(handle, caller).await?;
        if !outcome.refund.is_zero() {
            self.authorization.credit(caller, outcome.refund).await?;
        }
        if !outcome.fee.is_zero() {
            self.pay_treasury(outcome.fee).await?;
        }

        self.escrow.refund_by_owner(handle, caller).await?;
        self.registry.record_cancellation(caller, answer).await?;

        self.facts
            .publish(DomainFact::PromptCancelled {
                user: caller.clone(),
                answer,
            })
            .await;
        self.facts
            .publish(DomainFact::PaymentRefunded {
                handle,
                payer: outcome.payer.clone(),
                refund: outcome.refund,
                fee: outcome.fee,
            })
            .await;

        info!(%caller, %answer, refund = %outcome.refund, fee = %outcome.fee, "prompt cancelled");
        Ok(outcome)
    }

    /// Permissionless keeper sweep: refund a stalled escrow in full after
    /// the refund timeout. Unknown handles are a silent no-op so batch
    /// sweeps never fail halfway.
    pub async fn refund_by_timeout(
        &self,
        caller: &AccountId,
        handle: EscrowHandle,
    ) -> Result<Option<RefundOutcome>> {
        let _serial = self.serial.lock().await;
        self.guard
            .authorize(Operation::RefundByTimeout, caller)
            .await?;

        let outcome = match self.escrow.check_timeout_refund(handle).await? {
            Some(outcome) => outcome,
            None => return Ok(None),
        };

        // Credit first: if the refund cannot go out the record stays
        // PENDING and the next sweep retries it.
        if !outcome.refund.is_zero() {
            self.authorization
                .credit(&outcome.payer, outcome.refund)
                .await?;
        }
        self.escrow.refund_by_timeout(handle).await?;

        self.facts
            .publish(DomainFact::PaymentRefunded {
                handle,
                payer: outcome.payer.clone(),
                refund: outcome.refund,
                fee: outcome.fee,
            })
            .await;

        info!(%handle, payer = %outcome.payer, refund = %outcome.refund, "escrow swept");
        Ok(Some(outcome))
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    pub async fn escrow_record(&self, handle: EscrowHandle) -> Option<EscrowRecord> {
        self.escrow.record(handle).await
    }

    pub async fn conversation_owner(&self, conversation: ConversationId) -> Option<AccountId> {
        self.registry.conversation_owner(conversation).await
    }

    pub async fn job_owner(&self, job: JobId) -> Option<AccountId> {
        self.registry.job_owner(job).await
    }

    pub async fn oracle(&self) -> Option<AccountId> {
        self.guard.oracle().await
    }

    /// The fact log, for indexer subscriptions and audits
    pub fn facts(&self) -> &FactLog {
        &self.facts
    }

    async fn pay_treasury(&self, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.transfer.transfer_out(&self.treasury, amount).await
    }
}
