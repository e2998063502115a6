//! InferPay Audit - The domain-fact log
//!
//! Every consequential action appends exactly one fact. The log is
//! append-only and hash-chained so an indexer can verify it reconstructed
//! the full history. Indexers subscribe off the critical path through a
//! broadcast channel; a slow indexer can always re-read the log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use inferpay_types::{Clock, DomainFact, FactId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Capacity of the indexer broadcast channel
const BROADCAST_CAPACITY: usize = 256;

/// A published fact with its position in the chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactRecord {
    /// Correlation id for external systems
    pub id: FactId,
    /// Zero-based position in the log
    pub sequence: u64,
    /// Hash of the previous record (all-zero for the first)
    pub previous_hash: String,
    /// Hash of this record
    pub hash: String,
    /// When the fact was recorded, from the shared clock
    pub recorded_at: DateTime<Utc>,
    /// The fact itself
    pub fact: DomainFact,
}

impl FactRecord {
    fn compute_hash(
        previous_hash: &str,
        sequence: u64,
        recorded_at: DateTime<Utc>,
        fact: &DomainFact,
    ) -> String {
        let payload = serde_json::to_string(fact).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(previous_hash.as_bytes());
        hasher.update(sequence.to_be_bytes());
        hasher.update(recorded_at.timestamp_millis().to_be_bytes());
        hasher.update(fact.kind().as_bytes());
        hasher.update(payload.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Recompute and compare this record's hash
    pub fn verify(&self) -> bool {
        self.hash
            == Self::compute_hash(&self.previous_hash, self.sequence, self.recorded_at, &self.fact)
    }
}

/// The append-only fact log
#[derive(Clone)]
pub struct FactLog {
    records: Arc<RwLock<Vec<FactRecord>>>,
    clock: Arc<dyn Clock>,
    publisher: broadcast::Sender<FactRecord>,
}

impl FactLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (publisher, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            clock,
            publisher,
        }
    }

    /// Append a fact and notify subscribed indexers
    pub async fn publish(&self, fact: DomainFact) -> FactRecord {
        let recorded_at = self.clock.now();
        let mut records = self.records.write().await;

        let sequence = records.len() as u64;
        let previous_hash = records
            .last()
            .map(|r| r.hash.clone())
            .unwrap_or_else(|| hex::encode([0u8; 32]));
        let hash = FactRecord::compute_hash(&previous_hash, sequence, recorded_at, &fact);

        let record = FactRecord {
            id: FactId::new(),
            sequence,
            previous_hash,
            hash,
            recorded_at,
            fact,
        };
        records.push(record.clone());

        debug!(kind = record.fact.kind(), sequence, "fact published");
        // No receiver is fine; the log itself is the source of truth.
        let _ = self.publisher.send(record.clone());
        record
    }

    /// Subscribe to facts as they are published
    pub fn subscribe(&self) -> broadcast::Receiver<FactRecord> {
        self.publisher.subscribe()
    }

    /// All records, oldest first
    pub async fn all(&self) -> Vec<FactRecord> {
        self.records.read().await.clone()
    }

    /// Number of published facts
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Walk the chain and verify every hash link
    pub async fn verify_chain(&self) -> bool {
        let records = self.records.read().await;
        let mut previous = hex::encode([0u8; 32]);
        for (i, record) in records.iter().enumerate() {
            if record.sequence != i as u64
                || record.previous_hash != previous
                || !record.verify()
            {
                return false;
            }
            previous = record.hash.clone();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inferpay_types::{Amount, EscrowHandle, ManualClock, MessageId};

    fn log() -> FactLog {
        FactLog::new(Arc::new(ManualClock::new(Utc::now())))
    }

    fn sample_fact(n: u64) -> DomainFact {
        DomainFact::PaymentFinalized {
            handle: EscrowHandle::Answer(MessageId::new(n)),
            amount: Amount::new(n),
        }
    }

    #[tokio::test]
    async fn test_chain_links_and_verifies() {
        let log = log();
        log.publish(sample_fact(1)).await;
        log.publish(sample_fact(2)).await;
        log.publish(sample_fact(3)).await;

        assert_eq!(log.len().await, 3);
        assert!(log.verify_chain().await);

        let records = log.all().await;
        assert_eq!(records[1].previous_hash, records[0].hash);
        assert_eq!(records[2].previous_hash, records[1].hash);
    }

    #[tokio::test]
    async fn test_tampering_breaks_the_chain() {
        let log = log();
        log.publish(sample_fact(1)).await;
        log.publish(sample_fact(2)).await;

        {
            let mut records = log.records.write().await;
            records[0].fact = sample_fact(99);
        }
        assert!(!log.verify_chain().await);
    }

    #[tokio::test]
    async fn test_subscribers_see_published_facts() {
        let log = log();
        let mut rx = log.subscribe();

        log.publish(sample_fact(7)).await;
        let record = rx.recv().await.unwrap();
        assert_eq!(record.fact, sample_fact(7));
        assert_eq!(record.sequence, 0);
    }

    #[tokio::test]
    async fn test_publishing_without_subscribers() {
        let log = log();
        let record = log.publish(sample_fact(1)).await;
        assert!(record.verify());
    }
}
