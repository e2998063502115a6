//! Domain facts published for the external indexer
//!
//! A fact is an immutable record of something that happened. The core
//! publishes exactly one fact per paid action plus one per payment
//! transition; the indexer reconstructs history off the critical path.
//! Facts carry opaque content references produced by the storage
//! collaborator; the core never interprets them.

use crate::{
    AccountId, Amount, ConversationId, EscrowHandle, JobId, MessageId, TriggerId,
};
use serde::{Deserialize, Serialize};

/// An opaque reference to a payload held by the content store
pub type ContentRef = String;

/// Something that happened, published exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainFact {
    /// A paid prompt was submitted
    PromptSubmitted {
        user: AccountId,
        conversation: ConversationId,
        prompt: MessageId,
        answer: MessageId,
        payload: ContentRef,
    },
    /// A conversation was created and assigned an owner
    ConversationAdded {
        conversation: ConversationId,
        owner: AccountId,
    },
    /// The oracle submitted an autonomous job firing on behalf of a user
    AgentJobSubmitted {
        user: AccountId,
        job: JobId,
        trigger: TriggerId,
        payload: ContentRef,
    },
    /// A job was created and assigned an owner
    JobAdded { job: JobId, owner: AccountId },
    /// A re-answer was requested for an existing prompt
    RegenerationRequested {
        user: AccountId,
        prompt: MessageId,
        answer: MessageId,
    },
    /// A verified answer was recorded
    AnswerAdded {
        prompt: MessageId,
        answer: MessageId,
        content: Vec<ContentRef>,
    },
    /// A verified job result was recorded
    JobResultAdded {
        trigger: TriggerId,
        content: Vec<ContentRef>,
    },
    /// A branch of an existing conversation was requested
    BranchRequested {
        user: AccountId,
        source: ConversationId,
        branch: ConversationId,
    },
    /// A requested branch was materialized by the oracle
    ConversationBranched {
        source: ConversationId,
        branch: ConversationId,
    },
    /// A metadata update was requested for a conversation
    MetadataUpdateRequested {
        user: AccountId,
        conversation: ConversationId,
        metadata: ContentRef,
    },
    /// A requested metadata update was applied by the oracle
    MetadataUpdated {
        conversation: ConversationId,
        metadata: ContentRef,
    },
    /// A payment entered escrow
    PaymentEscrowed {
        handle: EscrowHandle,
        payer: AccountId,
        amount: Amount,
    },
    /// An escrowed payment was released to the treasury
    PaymentFinalized { handle: EscrowHandle, amount: Amount },
    /// An escrowed payment was returned to the payer
    PaymentRefunded {
        handle: EscrowHandle,
        payer: AccountId,
        refund: Amount,
        fee: Amount,
    },
    /// The payer cancelled an unanswered prompt
    PromptCancelled { user: AccountId, answer: MessageId },
}

impl DomainFact {
    /// Short tag used in logs and the fact chain
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PromptSubmitted { .. } => "prompt_submitted",
            Self::ConversationAdded { .. } => "conversation_added",
            Self::AgentJobSubmitted { .. } => "agent_job_submitted",
            Self::JobAdded { .. } => "job_added",
            Self::RegenerationRequested { .. } => "regeneration_requested",
            Self::AnswerAdded { .. } => "answer_added",
            Self::JobResultAdded { .. } => "job_result_added",
            Self::BranchRequested { .. } => "branch_requested",
            Self::ConversationBranched { .. } => "conversation_branched",
            Self::MetadataUpdateRequested { .. } => "metadata_update_requested",
            Self::MetadataUpdated { .. } => "metadata_updated",
            Self::PaymentEscrowed { .. } => "payment_escrowed",
            Self::PaymentFinalized { .. } => "payment_finalized",
            Self::PaymentRefunded { .. } => "payment_refunded",
            Self::PromptCancelled { .. } => "prompt_cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_kind() {
        let fact = DomainFact::PaymentFinalized {
            handle: EscrowHandle::Answer(MessageId::new(2)),
            amount: Amount::new(1),
        };
        assert_eq!(fact.kind(), "payment_finalized");
    }

    #[test]
    fn test_fact_serializes() {
        let fact = DomainFact::AnswerAdded {
            prompt: MessageId::new(1),
            answer: MessageId::new(2),
            content: vec!["blob:abc".to_string()],
        };
        let json = serde_json::to_string(&fact).unwrap();
        let back: DomainFact = serde_json::from_str(&json).unwrap();
        assert_eq!(fact, back);
    }
}
