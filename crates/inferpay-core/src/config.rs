//! Deployment configuration for the orchestrator

use inferpay_escrow::EscrowConfig;
use inferpay_types::{AccountId, Amount, FundingModel};
use serde::{Deserialize, Serialize};

/// Per-action fees, replaceable at runtime by the admin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub prompt_fee: Amount,
    pub regeneration_fee: Amount,
    pub agent_job_fee: Amount,
    pub branch_fee: Amount,
    pub metadata_fee: Amount,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            prompt_fee: Amount::new(1),
            regeneration_fee: Amount::new(1),
            agent_job_fee: Amount::new(1),
            branch_fee: Amount::new(1),
            metadata_fee: Amount::new(1),
        }
    }
}

/// Everything the orchestrator needs beyond its collaborators
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Initial fee schedule; the admin can replace it later
    pub fees: FeeSchedule,
    /// Escrow timing and cancellation-fee configuration
    pub escrow: EscrowConfig,
    /// Which spending authorization model backs debits
    pub funding: FundingModel,
    /// Destination of settled payments and cancellation fees
    pub treasury: AccountId,
}

impl CoreConfig {
    pub fn new(treasury: AccountId) -> Self {
        Self {
            fees: FeeSchedule::default(),
            escrow: EscrowConfig::default(),
            funding: FundingModel::Allowance,
            treasury,
        }
    }
}
