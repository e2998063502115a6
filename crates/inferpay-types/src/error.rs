//! Error types for InferPay
//!
//! All errors are explicit and fail closed: when in doubt, deny the action.
//! Every mutating operation is all-or-nothing, so any error here implies no
//! component state changed.

use thiserror::Error;

/// Result type for InferPay operations
pub type Result<T> = std::result::Result<T, InferPayError>;

/// InferPay error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferPayError {
    // ========================================================================
    // Configuration Errors (fatal; admin must retry with valid input)
    // ========================================================================

    /// A nil principal was supplied where a real account is required
    #[error("Nil account supplied for {role}")]
    ZeroAccount { role: String },

    /// The trusted oracle identity can only be linked once
    #[error("Oracle identity is already linked")]
    OracleAlreadyLinked,

    /// Deposit/withdraw called against the wrong funding model
    #[error("Operation not supported by the {model} funding model")]
    UnsupportedFundingModel { model: String },

    // ========================================================================
    // Authorization Errors (recoverable by the calling account)
    // ========================================================================

    /// The account has no spending authorization
    #[error("Account {account} has no active spending authorization")]
    NoActiveAuthorization { account: String },

    /// The account's authorization has expired
    #[error("Authorization for account {account} expired at {expired_at}")]
    AuthorizationExpired { account: String, expired_at: String },

    /// Remaining allowance is smaller than the requested debit
    #[error("Insufficient authorization: requested {requested}, remaining {remaining}")]
    InsufficientAuthorization { requested: u64, remaining: u64 },

    /// Deposit balance is smaller than the requested debit
    #[error("Insufficient deposit: requested {requested}, available {available}")]
    InsufficientDeposit { requested: u64, available: u64 },

    /// The account still has non-terminal escrow records
    #[error("Account {account} has {pending} pending prompts")]
    HasPendingPrompts { account: String, pending: u64 },

    // ========================================================================
    // Ownership Errors (caller/resource mismatch; never retried)
    // ========================================================================

    /// The caller is not permitted to perform this operation
    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// Only the payer of an escrowed prompt may cancel it
    #[error("Caller {caller} is not the payer of escrow {handle}")]
    NotPromptOwner { caller: String, handle: String },

    // ========================================================================
    // State-Machine Violations (logic or ordering bug by the caller)
    // ========================================================================

    /// The answer/trigger handle is already finalized
    #[error("Handle {handle} is already finalized")]
    JobAlreadyFinalized { handle: String },

    /// A regeneration is already outstanding for this prompt
    #[error("Regeneration already pending for prompt {prompt}")]
    RegenerationAlreadyPending { prompt: String },

    /// No escrow record exists for the handle
    #[error("Escrow {handle} not found")]
    EscrowNotFound { handle: String },

    /// An escrow record already exists for the handle
    #[error("Escrow {handle} already exists")]
    EscrowAlreadyExists { handle: String },

    /// The escrow record is no longer PENDING
    #[error("Escrow {handle} is not pending (status: {status})")]
    EscrowNotPending { handle: String, status: String },

    /// The prompt message is not linked to an owned conversation
    #[error("Invalid prompt message {prompt}: conversation is unowned")]
    InvalidPromptMessageId { prompt: String },

    /// The trigger is not linked to an owned job
    #[error("Invalid trigger {trigger}: job is unowned")]
    InvalidTriggerId { trigger: String },

    /// An answer must carry a non-empty primary content reference
    #[error("Answer for {handle} has no primary content reference")]
    AnswerContentRequired { handle: String },

    // ========================================================================
    // Timing Guards (caller must wait and retry after the deadline)
    // ========================================================================

    /// The cancellation timeout has not elapsed yet
    #[error("Prompt {handle} not cancellable until {cancellable_at}")]
    PromptNotCancellableYet { handle: String, cancellable_at: String },

    /// The refund timeout has not elapsed yet
    #[error("Prompt {handle} not refundable until {refundable_at}")]
    PromptNotRefundableYet { handle: String, refundable_at: String },

    // ========================================================================
    // Arithmetic & Input
    // ========================================================================

    /// Amount arithmetic overflowed or underflowed
    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    /// Invalid amount supplied
    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    /// Funds transfer collaborator rejected the movement
    #[error("Funds transfer failed: {message}")]
    TransferFailed { message: String },
}

impl InferPayError {
    /// Create an unauthorized error
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Create an invalid amount error
    pub fn invalid_amount(message: impl Into<String>) -> Self {
        Self::InvalidAmount {
            message: message.into(),
        }
    }

    /// Whether the caller can succeed by simply waiting and retrying
    pub fn is_timing_guard(&self) -> bool {
        matches!(
            self,
            Self::PromptNotCancellableYet { .. } | Self::PromptNotRefundableYet { .. }
        )
    }

    /// Get an error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ZeroAccount { .. } => "ZERO_ACCOUNT",
            Self::OracleAlreadyLinked => "ORACLE_ALREADY_LINKED",
            Self::UnsupportedFundingModel { .. } => "UNSUPPORTED_FUNDING_MODEL",
            Self::NoActiveAuthorization { .. } => "NO_ACTIVE_AUTHORIZATION",
            Self::AuthorizationExpired { .. } => "AUTHORIZATION_EXPIRED",
            Self::InsufficientAuthorization { .. } => "INSUFFICIENT_AUTHORIZATION",
            Self::InsufficientDeposit { .. } => "INSUFFICIENT_DEPOSIT",
            Self::HasPendingPrompts { .. } => "HAS_PENDING_PROMPTS",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::NotPromptOwner { .. } => "NOT_PROMPT_OWNER",
            Self::JobAlreadyFinalized { .. } => "JOB_ALREADY_FINALIZED",
            Self::RegenerationAlreadyPending { .. } => "REGENERATION_ALREADY_PENDING",
            Self::EscrowNotFound { .. } => "ESCROW_NOT_FOUND",
            Self::EscrowAlreadyExists { .. } => "ESCROW_ALREADY_EXISTS",
            Self::EscrowNotPending { .. } => "ESCROW_NOT_PENDING",
            Self::InvalidPromptMessageId { .. } => "INVALID_PROMPT_MESSAGE_ID",
            Self::InvalidTriggerId { .. } => "INVALID_TRIGGER_ID",
            Self::AnswerContentRequired { .. } => "ANSWER_CONTENT_REQUIRED",
            Self::PromptNotCancellableYet { .. } => "PROMPT_NOT_CANCELLABLE_YET",
            Self::PromptNotRefundableYet { .. } => "PROMPT_NOT_REFUNDABLE_YET",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::TransferFailed { .. } => "TRANSFER_FAILED",
        }
    }
}
