//! Activation store interface and in-memory implementation.
//!
//! Provides the [`ActivationStore`] trait for persisting the tokenomics
//! state, pool totals, the pending queue and terminal activation records.
//! [`MemoryStore`] is suitable for testing; the sequencer's production store
//! is RocksDB-backed (faith-sequencer).
//!
//! A terminal transition is a single [`TerminalCommit`]: new state, new
//! totals, the terminal record and removal from the queue are applied
//! together or not at all.

use std::collections::{BTreeMap, HashMap};

use crate::error::StoreError;
use crate::types::{
    Activation, ActivationId, ActivationStatus, DepositKey, PoolTotals, StateSnapshot,
    TokenomicsState,
};

/// Everything written when an activation reaches `Completed` or `Failed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminalCommit {
    /// The activation in its terminal status.
    pub activation: Activation,
    /// Tokenomics state after the transition. Unchanged on failure.
    pub state: TokenomicsState,
    pub totals: PoolTotals,
}

/// Durable storage for the sequencer.
///
/// Not internally synchronized. Callers wrap it in a `Mutex`.
pub trait ActivationStore: Send + Sync {
    /// Last committed state and totals, or `None` for a fresh store.
    fn load_snapshot(&self) -> Result<Option<StateSnapshot>, StoreError>;

    /// Queued activations in sequence order.
    fn pending(&self) -> Result<Vec<Activation>, StoreError>;

    /// Persist a newly created `Pending` activation and claim its deposit key.
    fn record_pending(&mut self, activation: &Activation) -> Result<(), StoreError>;

    /// Apply a terminal transition atomically.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownActivation`] if the activation is not queued
    /// - [`StoreError::OutOfOrder`] if a `Completed` activation is not the
    ///   queue head
    fn commit(&mut self, commit: &TerminalCommit) -> Result<(), StoreError>;

    /// Look up a terminal record.
    fn get_activation(&self, id: &ActivationId) -> Result<Option<Activation>, StoreError>;

    /// Whether a deposit key was ever recorded, pending or terminal.
    fn contains_deposit(&self, key: &DepositKey) -> Result<bool, StoreError>;

    /// Sequence number to assign to the next activation.
    fn next_sequence(&self) -> Result<u64, StoreError>;
}

/// In-memory store for tests. No persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Option<StateSnapshot>,
    queue: BTreeMap<u64, Activation>,
    records: HashMap<ActivationId, Activation>,
    deposits: HashMap<DepositKey, ActivationId>,
    next_sequence: u64,
    commits: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of terminal commits applied.
    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    /// Number of terminal records held.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl ActivationStore for MemoryStore {
    fn load_snapshot(&self) -> Result<Option<StateSnapshot>, StoreError> {
        Ok(self.snapshot.clone())
    }

    fn pending(&self) -> Result<Vec<Activation>, StoreError> {
        Ok(self.queue.values().cloned().collect())
    }

    fn record_pending(&mut self, activation: &Activation) -> Result<(), StoreError> {
        self.queue.insert(activation.sequence, activation.clone());
        self.deposits.insert(activation.key(), activation.id);
        self.next_sequence = self.next_sequence.max(activation.sequence + 1);
        Ok(())
    }

    fn commit(&mut self, commit: &TerminalCommit) -> Result<(), StoreError> {
        let activation = &commit.activation;
        if !self.queue.contains_key(&activation.sequence) {
            return Err(StoreError::UnknownActivation(activation.id.to_string()));
        }
        if activation.status == ActivationStatus::Completed {
            if let Some((&head, _)) = self.queue.first_key_value() {
                if head != activation.sequence {
                    return Err(StoreError::OutOfOrder {
                        expected: head,
                        got: activation.sequence,
                    });
                }
            }
        }

        self.queue.remove(&activation.sequence);
        self.records.insert(activation.id, activation.clone());
        self.snapshot = Some(StateSnapshot {
            state: commit.state.clone(),
            totals: commit.totals,
        });
        self.commits += 1;
        Ok(())
    }

    fn get_activation(&self, id: &ActivationId) -> Result<Option<Activation>, StoreError> {
        Ok(self.records.get(id).cloned())
    }

    fn contains_deposit(&self, key: &DepositKey) -> Result<bool, StoreError> {
        Ok(self.deposits.contains_key(key))
    }

    fn next_sequence(&self) -> Result<u64, StoreError> {
        Ok(self.next_sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_millis;

    fn pending(chain: &str, deposit: &str, sequence: u64) -> Activation {
        let key = DepositKey::new(chain, deposit);
        Activation {
            id: key.activation_id(),
            sequence,
            source_chain: chain.to_string(),
            deposit_id: deposit.to_string(),
            user: "user".to_string(),
            amount: 1_000,
            btc_equivalent: 1_000,
            locked_price: None,
            status: ActivationStatus::Pending,
            created_at: now_millis(),
            resolved_at: None,
            settlement_ref: None,
            failure: None,
            allocation: None,
        }
    }

    fn terminal(mut a: Activation, status: ActivationStatus) -> TerminalCommit {
        a.status = status;
        TerminalCommit {
            activation: a,
            state: TokenomicsState::genesis(),
            totals: PoolTotals::default(),
        }
    }

    #[test]
    fn fresh_store_is_empty() {
        let store = MemoryStore::new();
        assert!(store.load_snapshot().unwrap().is_none());
        assert!(store.pending().unwrap().is_empty());
        assert_eq!(store.next_sequence().unwrap(), 0);
    }

    #[test]
    fn pending_is_sequence_ordered() {
        let mut store = MemoryStore::new();
        store.record_pending(&pending("eth", "b", 1)).unwrap();
        store.record_pending(&pending("eth", "a", 0)).unwrap();
        let seqs: Vec<u64> = store.pending().unwrap().iter().map(|a| a.sequence).collect();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(store.next_sequence().unwrap(), 2);
    }

    #[test]
    fn deposit_key_claimed_on_record() {
        let mut store = MemoryStore::new();
        store.record_pending(&pending("sol", "x", 0)).unwrap();
        assert!(store.contains_deposit(&DepositKey::new("sol", "x")).unwrap());
        assert!(!store.contains_deposit(&DepositKey::new("sol", "y")).unwrap());
    }

    #[test]
    fn commit_moves_record_out_of_queue() {
        let mut store = MemoryStore::new();
        let a = pending("eth", "1", 0);
        store.record_pending(&a).unwrap();
        store
            .commit(&terminal(a.clone(), ActivationStatus::Completed))
            .unwrap();
        assert!(store.pending().unwrap().is_empty());
        let rec = store.get_activation(&a.id).unwrap().unwrap();
        assert_eq!(rec.status, ActivationStatus::Completed);
        assert!(store.load_snapshot().unwrap().is_some());
        // Key stays claimed after the terminal commit.
        assert!(store.contains_deposit(&a.key()).unwrap());
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn completed_commit_must_be_head() {
        let mut store = MemoryStore::new();
        let a = pending("eth", "1", 0);
        let b = pending("eth", "2", 1);
        store.record_pending(&a).unwrap();
        store.record_pending(&b).unwrap();
        let err = store
            .commit(&terminal(b, ActivationStatus::Completed))
            .unwrap_err();
        assert_eq!(err, StoreError::OutOfOrder { expected: 0, got: 1 });
    }

    #[test]
    fn failed_commit_may_skip_head() {
        // Cancelling a queued activation behind the head.
        let mut store = MemoryStore::new();
        let a = pending("eth", "1", 0);
        let b = pending("eth", "2", 1);
        store.record_pending(&a).unwrap();
        store.record_pending(&b).unwrap();
        store
            .commit(&terminal(b, ActivationStatus::Failed))
            .unwrap();
        assert_eq!(store.pending().unwrap().len(), 1);
    }

    #[test]
    fn commit_of_unknown_activation_fails() {
        let mut store = MemoryStore::new();
        let err = store
            .commit(&terminal(pending("eth", "1", 0), ActivationStatus::Failed))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownActivation(_)));
    }
}
