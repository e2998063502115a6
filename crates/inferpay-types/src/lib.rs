//! InferPay Types - Canonical domain types for escrow-backed inference payments
//!
//! This crate contains all foundational types for InferPay with zero dependencies
//! on other inferpay crates. It defines:
//!
//! - Identity types (AccountId, ConversationId, MessageId, etc.)
//! - The fixed-point Amount type with checked arithmetic
//! - Escrow record and spending authorization types
//! - Domain facts published for the external indexer
//! - The collaborator traits (FundsTransfer, Clock, PendingEscrowProbe)
//!
//! # Architectural Invariants
//!
//! These types support the core InferPay financial invariants:
//!
//! 1. `spent <= limit` for every spending authorization, at all times
//! 2. Escrow records move only PENDING -> COMPLETE or PENDING -> REFUNDED
//! 3. Reserved handles are unique and monotonic, never reused
//! 4. Every domain event is published as a fact exactly once

pub mod amount;
pub mod authorization;
pub mod clock;
pub mod error;
pub mod escrow;
pub mod fact;
pub mod identity;
pub mod transfer;

pub use amount::*;
pub use authorization::*;
pub use clock::*;
pub use error::*;
pub use escrow::*;
pub use fact::*;
pub use identity::*;
pub use transfer::*;

/// Version of the InferPay types schema
pub const TYPES_VERSION: &str = "0.1.0";
