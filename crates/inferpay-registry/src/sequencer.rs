//! Monotonic handle issuance
//!
//! One dedicated counter per handle type. Counters hand out 1, 2, 3, ...
//! so that zero stays free as the caller-facing "not yet assigned /
//! create new" sentinel. Reservation is a single atomic fetch-add: two
//! concurrent reservations can never observe the same value.

use std::sync::atomic::{AtomicU64, Ordering};

use inferpay_types::{ConversationId, JobId, MessageId, TriggerId};

/// The registry's counter service
#[derive(Debug)]
pub struct HandleSequencer {
    conversations: AtomicU64,
    jobs: AtomicU64,
    messages: AtomicU64,
    triggers: AtomicU64,
}

impl HandleSequencer {
    pub fn new() -> Self {
        Self {
            conversations: AtomicU64::new(1),
            jobs: AtomicU64::new(1),
            messages: AtomicU64::new(1),
            triggers: AtomicU64::new(1),
        }
    }

    pub fn reserve_conversation_id(&self) -> ConversationId {
        ConversationId::new(self.conversations.fetch_add(1, Ordering::SeqCst))
    }

    pub fn reserve_job_id(&self) -> JobId {
        JobId::new(self.jobs.fetch_add(1, Ordering::SeqCst))
    }

    pub fn reserve_message_id(&self) -> MessageId {
        MessageId::new(self.messages.fetch_add(1, Ordering::SeqCst))
    }

    pub fn reserve_trigger_id(&self) -> TriggerId {
        TriggerId::new(self.triggers.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for HandleSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_first_handle_is_one() {
        let seq = HandleSequencer::new();
        assert_eq!(seq.reserve_conversation_id(), ConversationId::new(1));
        assert_eq!(seq.reserve_message_id(), MessageId::new(1));
        assert!(!seq.reserve_trigger_id().is_unassigned());
    }

    #[test]
    fn test_counters_are_independent() {
        let seq = HandleSequencer::new();
        seq.reserve_message_id();
        seq.reserve_message_id();
        assert_eq!(seq.reserve_message_id(), MessageId::new(3));
        assert_eq!(seq.reserve_job_id(), JobId::new(1));
    }

    #[test]
    fn test_concurrent_reservations_are_unique() {
        let seq = Arc::new(HandleSequencer::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let seq = Arc::clone(&seq);
            handles.push(std::thread::spawn(move || {
                (0..100)
                    .map(|_| seq.reserve_message_id().0)
                    .collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "handle {id} issued twice");
            }
        }
        assert_eq!(seen.len(), 800);
    }
}
