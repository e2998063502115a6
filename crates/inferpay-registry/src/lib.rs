//! InferPay Registry - Identity & ownership for conversations, jobs and messages
//!
//! The registry is the system's source of truth for:
//!
//! - Handle issuance (dedicated monotonic counter per handle type)
//! - Conversation/job ownership, assigned on first use and immutable after
//! - The message -> conversation and trigger -> job relations
//! - The per-prompt regeneration lock and per-handle finalized flag
//!
//! # Invariants
//!
//! 1. Two reservation calls never return the same handle
//! 2. Once assigned, a conversation/job owner never changes
//! 3. A finalized answer/trigger handle is permanently unanswerable
//! 4. At most one regeneration is outstanding per prompt
//!
//! Mutating entry points are reachable only through the orchestrator, which
//! enforces caller roles before calling in.

mod sequencer;

pub use sequencer::HandleSequencer;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use inferpay_types::{
    AccountId, ContentRef, ConversationId, InferPayError, JobId, MessageId, Result, TriggerId,
};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct RegistryState {
    conversation_owners: HashMap<ConversationId, AccountId>,
    job_owners: HashMap<JobId, AccountId>,
    message_conversations: HashMap<MessageId, ConversationId>,
    trigger_jobs: HashMap<TriggerId, JobId>,
    /// message handles that are prompts; answers are never regenerated
    prompt_messages: HashSet<MessageId>,
    /// answer handle -> the prompt it will answer
    answer_prompts: HashMap<MessageId, MessageId>,
    /// prompt handles with a re-answer outstanding
    regeneration_locks: HashSet<MessageId>,
    /// branch conversation -> source conversation, while the branch is pending
    pending_branches: HashMap<ConversationId, ConversationId>,
    finalized_answers: HashSet<MessageId>,
    finalized_triggers: HashSet<TriggerId>,
}

/// The Identity & Ownership Registry
#[derive(Clone)]
pub struct Registry {
    sequencer: Arc<HandleSequencer>,
    state: Arc<RwLock<RegistryState>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sequencer: Arc::new(HandleSequencer::new()),
            state: Arc::new(RwLock::new(RegistryState::default())),
        }
    }

    // ========================================================================
    // Handle reservation
    // ========================================================================

    pub fn reserve_conversation_id(&self) -> ConversationId {
        self.sequencer.reserve_conversation_id()
    }

    pub fn reserve_job_id(&self) -> JobId {
        self.sequencer.reserve_job_id()
    }

    pub fn reserve_message_id(&self) -> MessageId {
        self.sequencer.reserve_message_id()
    }

    pub fn reserve_trigger_id(&self) -> TriggerId {
        self.sequencer.reserve_trigger_id()
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    pub async fn conversation_owner(&self, conversation: ConversationId) -> Option<AccountId> {
        self.state
            .read()
            .await
            .conversation_owners
            .get(&conversation)
            .cloned()
    }

    pub async fn job_owner(&self, job: JobId) -> Option<AccountId> {
        self.state.read().await.job_owners.get(&job).cloned()
    }

    pub async fn message_conversation(&self, message: MessageId) -> Option<ConversationId> {
        self.state
            .read()
            .await
            .message_conversations
            .get(&message)
            .copied()
    }

    pub async fn is_answer_finalized(&self, answer: MessageId) -> bool {
        self.state.read().await.finalized_answers.contains(&answer)
    }

    pub async fn is_trigger_finalized(&self, trigger: TriggerId) -> bool {
        self.state.read().await.finalized_triggers.contains(&trigger)
    }

    pub async fn is_regeneration_pending(&self, prompt: MessageId) -> bool {
        self.state.read().await.regeneration_locks.contains(&prompt)
    }

    pub async fn is_prompt_message(&self, message: MessageId) -> bool {
        self.state.read().await.prompt_messages.contains(&message)
    }

    /// Owner check used by the orchestrator's pre-validation: succeeds when
    /// the conversation is unowned (first use) or owned by `user`.
    pub async fn check_conversation_access(
        &self,
        user: &AccountId,
        conversation: ConversationId,
    ) -> Result<()> {
        let state = self.state.read().await;
        match state.conversation_owners.get(&conversation) {
            Some(owner) if owner != user => Err(InferPayError::unauthorized(format!(
                "{conversation} is owned by another account"
            ))),
            _ => Ok(()),
        }
    }

    /// Job analogue of [`Registry::check_conversation_access`]
    pub async fn check_job_access(&self, user: &AccountId, job: JobId) -> Result<()> {
        let state = self.state.read().await;
        match state.job_owners.get(&job) {
            Some(owner) if owner != user => Err(InferPayError::unauthorized(format!(
                "{job} is owned by another account"
            ))),
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Prompt / job records
    // ========================================================================

    /// Record a submitted prompt. Assigns conversation ownership on first
    /// use. Returns `true` when the conversation was newly created.
    pub async fn record_prompt(
        &self,
        user: &AccountId,
        conversation: ConversationId,
        prompt: MessageId,
        answer: MessageId,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let created = Self::claim_conversation(&mut state, user, conversation)?;

        state.message_conversations.insert(prompt, conversation);
        state.message_conversations.insert(answer, conversation);
        state.prompt_messages.insert(prompt);
        state.answer_prompts.insert(answer, prompt);

        debug!(%user, %conversation, %prompt, %answer, created, "prompt recorded");
        Ok(created)
    }

    /// Record a submitted agent job firing. Returns `true` when the job was
    /// newly created.
    pub async fn record_agent_job(
        &self,
        user: &AccountId,
        job: JobId,
        trigger: TriggerId,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let created = match state.job_owners.get(&job) {
            None => {
                state.job_owners.insert(job, user.clone());
                true
            }
            Some(owner) if owner == user => false,
            Some(_) => {
                return Err(InferPayError::unauthorized(format!(
                    "{job} is owned by another account"
                )))
            }
        };

        state.trigger_jobs.insert(trigger, job);

        debug!(%user, %job, %trigger, created, "agent job recorded");
        Ok(created)
    }

    /// Read-only pre-validation for [`Registry::record_regeneration_request`]
    pub async fn check_regeneration(&self, user: &AccountId, prompt: MessageId) -> Result<()> {
        let state = self.state.read().await;
        Self::validate_regeneration(&state, user, prompt).map(|_| ())
    }

    /// Record a regeneration request for an existing prompt: sets the
    /// regeneration lock and links the fresh answer handle to the prompt.
    pub async fn record_regeneration_request(
        &self,
        user: &AccountId,
        prompt: MessageId,
        new_answer: MessageId,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let conversation = Self::validate_regeneration(&state, user, prompt)?;

        state.regeneration_locks.insert(prompt);
        state.message_conversations.insert(new_answer, conversation);
        state.answer_prompts.insert(new_answer, prompt);

        debug!(%user, %prompt, %new_answer, "regeneration requested");
        Ok(())
    }

    fn validate_regeneration(
        state: &RegistryState,
        user: &AccountId,
        prompt: MessageId,
    ) -> Result<ConversationId> {
        // Only a prompt handle can be regenerated; an answer handle is in
        // the message relation too and must be rejected.
        if !state.prompt_messages.contains(&prompt) {
            return Err(InferPayError::InvalidPromptMessageId {
                prompt: prompt.to_string(),
            });
        }
        let conversation = *state.message_conversations.get(&prompt).ok_or(
            InferPayError::InvalidPromptMessageId {
                prompt: prompt.to_string(),
            },
        )?;
        match state.conversation_owners.get(&conversation) {
            Some(owner) if owner == user => {}
            _ => {
                return Err(InferPayError::unauthorized(format!(
                    "{conversation} is not owned by the caller"
                )))
            }
        }
        if state.regeneration_locks.contains(&prompt) {
            return Err(InferPayError::RegenerationAlreadyPending {
                prompt: prompt.to_string(),
            });
        }
        Ok(conversation)
    }

    // ========================================================================
    // Settlement-side records
    // ========================================================================

    /// Read-only pre-validation for [`Registry::record_answer`]
    pub async fn check_answer(
        &self,
        prompt: MessageId,
        answer: MessageId,
        content: &[ContentRef],
    ) -> Result<()> {
        let state = self.state.read().await;
        Self::validate_answer(&state, prompt, answer, content)
    }

    /// Record a verified answer: finalizes the answer handle and clears the
    /// prompt's regeneration lock when this answer closes it.
    pub async fn record_answer(
        &self,
        prompt: MessageId,
        answer: MessageId,
        content: &[ContentRef],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        Self::validate_answer(&state, prompt, answer, content)?;

        state.finalized_answers.insert(answer);
        if state.answer_prompts.get(&answer) == Some(&prompt) {
            state.regeneration_locks.remove(&prompt);
        }

        debug!(%prompt, %answer, refs = content.len(), "answer recorded");
        Ok(())
    }

    fn validate_answer(
        state: &RegistryState,
        prompt: MessageId,
        answer: MessageId,
        content: &[ContentRef],
    ) -> Result<()> {
        if state.finalized_answers.contains(&answer) {
            return Err(InferPayError::JobAlreadyFinalized {
                handle: answer.to_string(),
            });
        }
        if content.first().map(|c| c.is_empty()).unwrap_or(true) {
            return Err(InferPayError::AnswerContentRequired {
                handle: answer.to_string(),
            });
        }

        let owned = state.prompt_messages.contains(&prompt)
            && state
                .message_conversations
                .get(&prompt)
                .map(|conversation| state.conversation_owners.contains_key(conversation))
                .unwrap_or(false);
        if !owned {
            return Err(InferPayError::InvalidPromptMessageId {
                prompt: prompt.to_string(),
            });
        }
        Ok(())
    }

    /// Read-only pre-validation for [`Registry::record_job_result`]
    pub async fn check_job_result(
        &self,
        trigger: TriggerId,
        content: &[ContentRef],
    ) -> Result<()> {
        let state = self.state.read().await;
        Self::validate_job_result(&state, trigger, content)
    }

    /// Trigger analogue of [`Registry::record_answer`]
    pub async fn record_job_result(
        &self,
        trigger: TriggerId,
        content: &[ContentRef],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        Self::validate_job_result(&state, trigger, content)?;

        state.finalized_triggers.insert(trigger);

        debug!(%trigger, refs = content.len(), "job result recorded");
        Ok(())
    }

    fn validate_job_result(
        state: &RegistryState,
        trigger: TriggerId,
        content: &[ContentRef],
    ) -> Result<()> {
        if state.finalized_triggers.contains(&trigger) {
            return Err(InferPayError::JobAlreadyFinalized {
                handle: trigger.to_string(),
            });
        }
        if content.first().map(|c| c.is_empty()).unwrap_or(true) {
            return Err(InferPayError::AnswerContentRequired {
                handle: trigger.to_string(),
            });
        }

        let owned = state
            .trigger_jobs
            .get(&trigger)
            .map(|job| state.job_owners.contains_key(job))
            .unwrap_or(false);
        if !owned {
            return Err(InferPayError::InvalidTriggerId {
                trigger: trigger.to_string(),
            });
        }
        Ok(())
    }

    /// Record a payer cancellation: finalizes the answer handle so the
    /// oracle can never answer it afterwards.
    pub async fn record_cancellation(&self, user: &AccountId, answer: MessageId) -> Result<()> {
        let mut state = self.state.write().await;

        if state.finalized_answers.contains(&answer) {
            return Err(InferPayError::JobAlreadyFinalized {
                handle: answer.to_string(),
            });
        }

        match state
            .message_conversations
            .get(&answer)
            .and_then(|conversation| state.conversation_owners.get(conversation))
        {
            Some(owner) if owner == user => {}
            _ => {
                return Err(InferPayError::unauthorized(format!(
                    "{answer} does not belong to the caller"
                )))
            }
        }

        state.finalized_answers.insert(answer);
        // A cancelled regeneration releases the prompt for a later retry.
        if let Some(prompt) = state.answer_prompts.get(&answer).copied() {
            state.regeneration_locks.remove(&prompt);
        }

        debug!(%user, %answer, "cancellation recorded");
        Ok(())
    }

    // ========================================================================
    // Branch / metadata records
    // ========================================================================

    /// Record a branch request: the reserved branch conversation stays
    /// unowned until the oracle materializes it.
    pub async fn record_branch_request(
        &self,
        user: &AccountId,
        source: ConversationId,
        branch: ConversationId,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        match state.conversation_owners.get(&source) {
            Some(owner) if owner == user => {}
            _ => {
                return Err(InferPayError::unauthorized(format!(
                    "{source} is not owned by the caller"
                )))
            }
        }

        state.pending_branches.insert(branch, source);
        debug!(%user, %source, %branch, "branch requested");
        Ok(())
    }

    /// Materialize a requested branch: the branch inherits the source
    /// conversation's owner.
    pub async fn record_branch(
        &self,
        source: ConversationId,
        branch: ConversationId,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        if state.pending_branches.get(&branch) != Some(&source) {
            return Err(InferPayError::unauthorized(format!(
                "{branch} was not requested as a branch of {source}"
            )));
        }
        let owner = state
            .conversation_owners
            .get(&source)
            .cloned()
            .ok_or_else(|| {
                InferPayError::unauthorized(format!("{source} is unowned"))
            })?;

        state.pending_branches.remove(&branch);
        state.conversation_owners.insert(branch, owner);

        debug!(%source, %branch, "branch recorded");
        Ok(())
    }

    /// Ownership-check-then-record for a metadata update request
    pub async fn record_metadata_update_request(
        &self,
        user: &AccountId,
        conversation: ConversationId,
    ) -> Result<()> {
        let state = self.state.read().await;
        match state.conversation_owners.get(&conversation) {
            Some(owner) if owner == user => Ok(()),
            _ => Err(InferPayError::unauthorized(format!(
                "{conversation} is not owned by the caller"
            ))),
        }
    }

    /// Record an applied metadata update; the conversation must exist
    pub async fn record_metadata_update(&self, conversation: ConversationId) -> Result<()> {
        let state = self.state.read().await;
        if state.conversation_owners.contains_key(&conversation) {
            Ok(())
        } else {
            Err(InferPayError::unauthorized(format!(
                "{conversation} is unowned"
            )))
        }
    }

    fn claim_conversation(
        state: &mut RegistryState,
        user: &AccountId,
        conversation: ConversationId,
    ) -> Result<bool> {
        match state.conversation_owners.get(&conversation) {
            None => {
                state.conversation_owners.insert(conversation, user.clone());
                Ok(true)
            }
            Some(owner) if owner == user => Ok(false),
            Some(_) => Err(InferPayError::unauthorized(format!(
                "{conversation} is owned by another account"
            ))),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry_with_prompt(
        user: &AccountId,
    ) -> (Registry, ConversationId, MessageId, MessageId) {
        let registry = Registry::new();
        let conversation = registry.reserve_conversation_id();
        let prompt = registry.reserve_message_id();
        let answer = registry.reserve_message_id();
        registry
            .record_prompt(user, conversation, prompt, answer)
            .await
            .unwrap();
        (registry, conversation, prompt, answer)
    }

    #[tokio::test]
    async fn test_first_prompt_assigns_owner() {
        let user = AccountId::new();
        let (registry, conversation, prompt, _) = registry_with_prompt(&user).await;

        assert_eq!(registry.conversation_owner(conversation).await, Some(user));
        assert_eq!(
            registry.message_conversation(prompt).await,
            Some(conversation)
        );
    }

    #[tokio::test]
    async fn test_foreign_conversation_is_rejected() {
        let user = AccountId::new();
        let (registry, conversation, _, _) = registry_with_prompt(&user).await;

        let intruder = AccountId::new();
        let prompt = registry.reserve_message_id();
        let answer = registry.reserve_message_id();
        let result = registry
            .record_prompt(&intruder, conversation, prompt, answer)
            .await;
        assert!(matches!(result, Err(InferPayError::Unauthorized { .. })));

        // The owner is untouched.
        assert_eq!(registry.conversation_owner(conversation).await, Some(user));
    }

    #[tokio::test]
    async fn test_record_answer_finalizes_once() {
        let user = AccountId::new();
        let (registry, _, prompt, answer) = registry_with_prompt(&user).await;

        let content = vec!["blob:a".to_string()];
        registry.record_answer(prompt, answer, &content).await.unwrap();
        assert!(registry.is_answer_finalized(answer).await);

        let again = registry.record_answer(prompt, answer, &content).await;
        assert!(matches!(
            again,
            Err(InferPayError::JobAlreadyFinalized { .. })
        ));
    }

    #[tokio::test]
    async fn test_answer_requires_content() {
        let user = AccountId::new();
        let (registry, _, prompt, answer) = registry_with_prompt(&user).await;

        let empty: Vec<String> = vec![];
        assert!(matches!(
            registry.record_answer(prompt, answer, &empty).await,
            Err(InferPayError::AnswerContentRequired { .. })
        ));
        assert!(matches!(
            registry
                .record_answer(prompt, answer, &[String::new()])
                .await,
            Err(InferPayError::AnswerContentRequired { .. })
        ));
        assert!(!registry.is_answer_finalized(answer).await);
    }

    #[tokio::test]
    async fn test_answer_to_unknown_prompt_is_rejected() {
        let registry = Registry::new();
        let answer = registry.reserve_message_id();
        let result = registry
            .record_answer(MessageId::new(99), answer, &["blob:a".to_string()])
            .await;
        assert!(matches!(
            result,
            Err(InferPayError::InvalidPromptMessageId { .. })
        ));
    }

    #[tokio::test]
    async fn test_regeneration_lock_cycle() {
        let user = AccountId::new();
        let (registry, _, prompt, answer) = registry_with_prompt(&user).await;
        registry
            .record_answer(prompt, answer, &["blob:a".to_string()])
            .await
            .unwrap();

        // First regeneration locks the prompt.
        let regen_answer = registry.reserve_message_id();
        registry
            .record_regeneration_request(&user, prompt, regen_answer)
            .await
            .unwrap();
        assert!(registry.is_regeneration_pending(prompt).await);

        // A second request is rejected while the first is outstanding.
        let another = registry.reserve_message_id();
        assert!(matches!(
            registry
                .record_regeneration_request(&user, prompt, another)
                .await,
            Err(InferPayError::RegenerationAlreadyPending { .. })
        ));

        // Recording the regeneration's answer releases the lock.
        registry
            .record_answer(prompt, regen_answer, &["blob:b".to_string()])
            .await
            .unwrap();
        assert!(!registry.is_regeneration_pending(prompt).await);

        // A third request now succeeds.
        let third = registry.reserve_message_id();
        registry
            .record_regeneration_request(&user, prompt, third)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_regeneration_rejects_answer_handles() {
        let user = AccountId::new();
        let (registry, _, prompt, answer) = registry_with_prompt(&user).await;

        assert!(registry.is_prompt_message(prompt).await);
        assert!(!registry.is_prompt_message(answer).await);

        // An answer handle is in the message relation but is not a prompt.
        let fresh = registry.reserve_message_id();
        assert!(matches!(
            registry
                .record_regeneration_request(&user, answer, fresh)
                .await,
            Err(InferPayError::InvalidPromptMessageId { .. })
        ));
        assert!(!registry.is_regeneration_pending(answer).await);
    }

    #[tokio::test]
    async fn test_answer_rejects_non_prompt_handles() {
        let user = AccountId::new();
        let (registry, _, _, answer) = registry_with_prompt(&user).await;

        let result = registry
            .record_answer(answer, answer, &["blob:a".to_string()])
            .await;
        assert!(matches!(
            result,
            Err(InferPayError::InvalidPromptMessageId { .. })
        ));
    }

    #[tokio::test]
    async fn test_check_answer_does_not_mutate() {
        let user = AccountId::new();
        let (registry, _, prompt, answer) = registry_with_prompt(&user).await;

        let content = vec!["blob:a".to_string()];
        registry.check_answer(prompt, answer, &content).await.unwrap();
        assert!(!registry.is_answer_finalized(answer).await);

        registry.record_answer(prompt, answer, &content).await.unwrap();
        assert!(matches!(
            registry.check_answer(prompt, answer, &content).await,
            Err(InferPayError::JobAlreadyFinalized { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_finalizes_and_blocks_answer() {
        let user = AccountId::new();
        let (registry, _, prompt, answer) = registry_with_prompt(&user).await;

        registry.record_cancellation(&user, answer).await.unwrap();
        assert!(registry.is_answer_finalized(answer).await);

        let result = registry
            .record_answer(prompt, answer, &["blob:a".to_string()])
            .await;
        assert!(matches!(
            result,
            Err(InferPayError::JobAlreadyFinalized { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_requires_ownership() {
        let user = AccountId::new();
        let (registry, _, _, answer) = registry_with_prompt(&user).await;

        let intruder = AccountId::new();
        assert!(matches!(
            registry.record_cancellation(&intruder, answer).await,
            Err(InferPayError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_agent_job_ownership() {
        let registry = Registry::new();
        let user = AccountId::new();
        let job = registry.reserve_job_id();
        let trigger = registry.reserve_trigger_id();

        let created = registry.record_agent_job(&user, job, trigger).await.unwrap();
        assert!(created);
        assert_eq!(registry.job_owner(job).await, Some(user.clone()));

        let trigger2 = registry.reserve_trigger_id();
        let created = registry
            .record_agent_job(&user, job, trigger2)
            .await
            .unwrap();
        assert!(!created);

        let intruder = AccountId::new();
        let trigger3 = registry.reserve_trigger_id();
        assert!(matches!(
            registry.record_agent_job(&intruder, job, trigger3).await,
            Err(InferPayError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_job_result_finalizes_trigger() {
        let registry = Registry::new();
        let user = AccountId::new();
        let job = registry.reserve_job_id();
        let trigger = registry.reserve_trigger_id();
        registry.record_agent_job(&user, job, trigger).await.unwrap();

        registry
            .record_job_result(trigger, &["blob:r".to_string()])
            .await
            .unwrap();
        assert!(registry.is_trigger_finalized(trigger).await);

        assert!(matches!(
            registry
                .record_job_result(trigger, &["blob:r".to_string()])
                .await,
            Err(InferPayError::JobAlreadyFinalized { .. })
        ));
    }

    #[tokio::test]
    async fn test_branch_inherits_owner() {
        let user = AccountId::new();
        let (registry, source, _, _) = registry_with_prompt(&user).await;

        let branch = registry.reserve_conversation_id();
        registry
            .record_branch_request(&user, source, branch)
            .await
            .unwrap();
        assert_eq!(registry.conversation_owner(branch).await, None);

        registry.record_branch(source, branch).await.unwrap();
        assert_eq!(registry.conversation_owner(branch).await, Some(user));
    }

    #[tokio::test]
    async fn test_unrequested_branch_is_rejected() {
        let user = AccountId::new();
        let (registry, source, _, _) = registry_with_prompt(&user).await;

        let branch = registry.reserve_conversation_id();
        assert!(registry.record_branch(source, branch).await.is_err());
    }
}
