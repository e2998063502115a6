//! InferPay Core - The request lifecycle orchestrator
//!
//! Composes the component crates into the public operation surface:
//!
//! - [`inferpay_registry`]: handle issuance and ownership records
//! - [`inferpay_permits`]: the spending authorization ledger
//! - [`inferpay_escrow`]: custody of in-flight payments
//! - [`inferpay_guard`]: caller-role checks
//! - [`inferpay_audit`]: the domain-fact log
//!
//! See [`Orchestrator`] for the operation surface and its ordering
//! discipline.

mod config;
mod orchestrator;

pub use config::{CoreConfig, FeeSchedule};
pub use orchestrator::{JobTicket, Orchestrator, PromptTicket};

pub use inferpay_escrow::EscrowConfig;
pub use inferpay_types::{FundingModel, FundsTransfer};
