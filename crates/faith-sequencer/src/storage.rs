//! RocksDB-backed persistent sequencer storage.
//!
//! Implements [`ActivationStore`] using column families for the tokenomics
//! state, terminal activation records, the pending queue and the deposit-key
//! index. All mutations use an atomic [`WriteBatch`] so a terminal transition
//! is never half-applied.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};

use faith_core::error::StoreError;
use faith_core::store::{ActivationStore, TerminalCommit};
use faith_core::types::{
    Activation, ActivationId, ActivationStatus, DepositKey, PoolTotals, StateSnapshot,
    TokenomicsState,
};

// --- Column family names ---

const CF_STATE: &str = "state";
const CF_ACTIVATIONS: &str = "activations";
const CF_QUEUE: &str = "queue";
const CF_DEPOSITS: &str = "deposits";

const ALL_CFS: &[&str] = &[CF_STATE, CF_ACTIVATIONS, CF_QUEUE, CF_DEPOSITS];

// --- State keys ---

const KEY_TOKENOMICS: &[u8] = b"tokenomics";
const KEY_POOL_TOTALS: &[u8] = b"pool_totals";
const KEY_NEXT_SEQUENCE: &[u8] = b"next_sequence";

fn backend(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _): (T, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(value)
}

/// Encode a sequence number as big-endian bytes for ordered iteration.
fn sequence_key(sequence: u64) -> [u8; 8] {
    sequence.to_be_bytes()
}

/// RocksDB-backed sequencer storage.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a database at the given path, creating missing column
    /// families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(backend)?;
        Ok(Self { db })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(backend)
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))
    }

    fn get_state<T: bincode::Decode<()>>(&self, key: &[u8]) -> Result<Option<T>, StoreError> {
        let cf = self.cf_handle(CF_STATE)?;
        match self.db.get_cf(cf, key).map_err(backend)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn queued(&self, sequence: u64) -> Result<Option<Activation>, StoreError> {
        let cf = self.cf_handle(CF_QUEUE)?;
        match self.db.get_cf(cf, sequence_key(sequence)).map_err(backend)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn queue_head(&self) -> Result<Option<u64>, StoreError> {
        let cf = self.cf_handle(CF_QUEUE)?;
        match self.db.iterator_cf(cf, IteratorMode::Start).next() {
            Some(item) => {
                let (key, _) = item.map_err(backend)?;
                let bytes: [u8; 8] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("queue key length".into()))?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }
}

impl ActivationStore for RocksStore {
    fn load_snapshot(&self) -> Result<Option<StateSnapshot>, StoreError> {
        let Some(state) = self.get_state::<TokenomicsState>(KEY_TOKENOMICS)? else {
            return Ok(None);
        };
        let totals = self
            .get_state::<PoolTotals>(KEY_POOL_TOTALS)?
            .unwrap_or_default();
        Ok(Some(StateSnapshot { state, totals }))
    }

    fn pending(&self) -> Result<Vec<Activation>, StoreError> {
        let cf = self.cf_handle(CF_QUEUE)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(backend)?;
            out.push(decode::<Activation>(&value)?);
        }
        Ok(out)
    }

    fn record_pending(&mut self, activation: &Activation) -> Result<(), StoreError> {
        let cf_queue = self.cf_handle(CF_QUEUE)?;
        let cf_deposits = self.cf_handle(CF_DEPOSITS)?;
        let cf_state = self.cf_handle(CF_STATE)?;

        let next = self
            .next_sequence()?
            .max(activation.sequence.saturating_add(1));

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_queue, sequence_key(activation.sequence), encode(activation)?);
        batch.put_cf(
            cf_deposits,
            activation.key().to_bytes(),
            activation.id.as_bytes(),
        );
        batch.put_cf(cf_state, KEY_NEXT_SEQUENCE, encode(&next)?);
        self.db.write(batch).map_err(backend)
    }

    fn commit(&mut self, commit: &TerminalCommit) -> Result<(), StoreError> {
        let activation = &commit.activation;
        if self.queued(activation.sequence)?.is_none() {
            return Err(StoreError::UnknownActivation(activation.id.to_string()));
        }
        if activation.status == ActivationStatus::Completed {
            if let Some(head) = self.queue_head()? {
                if head != activation.sequence {
                    return Err(StoreError::OutOfOrder {
                        expected: head,
                        got: activation.sequence,
                    });
                }
            }
        }

        let cf_state = self.cf_handle(CF_STATE)?;
        let cf_activations = self.cf_handle(CF_ACTIVATIONS)?;
        let cf_queue = self.cf_handle(CF_QUEUE)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_state, KEY_TOKENOMICS, encode(&commit.state)?);
        batch.put_cf(cf_state, KEY_POOL_TOTALS, encode(&commit.totals)?);
        batch.put_cf(cf_activations, activation.id.as_bytes(), encode(activation)?);
        batch.delete_cf(cf_queue, sequence_key(activation.sequence));
        self.db.write(batch).map_err(backend)
    }

    fn get_activation(&self, id: &ActivationId) -> Result<Option<Activation>, StoreError> {
        let cf = self.cf_handle(CF_ACTIVATIONS)?;
        match self.db.get_cf(cf, id.as_bytes()).map_err(backend)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn contains_deposit(&self, key: &DepositKey) -> Result<bool, StoreError> {
        let cf = self.cf_handle(CF_DEPOSITS)?;
        Ok(self.db.get_cf(cf, key.to_bytes()).map_err(backend)?.is_some())
    }

    fn next_sequence(&self) -> Result<u64, StoreError> {
        Ok(self.get_state::<u64>(KEY_NEXT_SEQUENCE)?.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faith_core::pricing::activate;
    use faith_core::types::now_millis;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn temp_store() -> (RocksStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("sequencer")).unwrap();
        (store, dir)
    }

    fn pending(deposit: &str, sequence: u64) -> Activation {
        let key = DepositKey::new("ethereum", deposit);
        Activation {
            id: key.activation_id(),
            sequence,
            source_chain: key.chain,
            deposit_id: key.deposit_id,
            user: "0xuser".into(),
            amount: 5_000,
            btc_equivalent: 100_000,
            locked_price: None,
            status: ActivationStatus::Pending,
            created_at: now_millis(),
            resolved_at: None,
            settlement_ref: None,
            failure: None,
            allocation: None,
        }
    }

    fn completed(mut a: Activation, state: TokenomicsState) -> TerminalCommit {
        a.status = ActivationStatus::Completed;
        a.locked_price = Some(state.next_price);
        a.resolved_at = Some(now_millis());
        TerminalCommit {
            activation: a,
            state,
            totals: PoolTotals {
                system_total_btc: 100_000,
                ..PoolTotals::default()
            },
        }
    }

    // ------------------------------------------------------------------
    // Basics
    // ------------------------------------------------------------------

    #[test]
    fn fresh_store_has_no_snapshot() {
        let (store, _dir) = temp_store();
        assert!(store.load_snapshot().unwrap().is_none());
        assert!(store.pending().unwrap().is_empty());
        assert_eq!(store.next_sequence().unwrap(), 0);
    }

    #[test]
    fn record_pending_claims_key_and_advances_sequence() {
        let (mut store, _dir) = temp_store();
        let a = pending("d1", 0);
        store.record_pending(&a).unwrap();
        assert!(store.contains_deposit(&a.key()).unwrap());
        assert_eq!(store.next_sequence().unwrap(), 1);
        assert_eq!(store.pending().unwrap(), vec![a]);
    }

    #[test]
    fn nul_split_keys_are_distinct_deposits() {
        let (mut store, _dir) = temp_store();
        let mut a = pending("y", 0);
        a.source_chain = "eth\0x".into();
        a.id = a.key().activation_id();
        store.record_pending(&a).unwrap();
        let other = DepositKey::new("eth", "x\0y");
        assert!(store.contains_deposit(&a.key()).unwrap());
        assert!(!store.contains_deposit(&other).unwrap());
    }

    #[test]
    fn queue_iterates_in_sequence_order() {
        let (mut store, _dir) = temp_store();
        // 256 sorts before 3 under little-endian keys; big-endian keeps order.
        for seq in [256u64, 3, 70_000] {
            store.record_pending(&pending(&format!("d{seq}"), seq)).unwrap();
        }
        let seqs: Vec<u64> = store.pending().unwrap().iter().map(|a| a.sequence).collect();
        assert_eq!(seqs, vec![3, 256, 70_000]);
        assert_eq!(store.next_sequence().unwrap(), 70_001);
    }

    // ------------------------------------------------------------------
    // Terminal commits
    // ------------------------------------------------------------------

    #[test]
    fn commit_writes_state_record_and_dequeues() {
        let (mut store, _dir) = temp_store();
        let a = pending("d1", 0);
        store.record_pending(&a).unwrap();

        let state = activate(&TokenomicsState::genesis()).unwrap().state;
        store.commit(&completed(a.clone(), state.clone())).unwrap();

        let snap = store.load_snapshot().unwrap().unwrap();
        assert_eq!(snap.state, state);
        assert_eq!(snap.totals.system_total_btc, 100_000);
        assert!(store.pending().unwrap().is_empty());

        let rec = store.get_activation(&a.id).unwrap().unwrap();
        assert_eq!(rec.status, ActivationStatus::Completed);
        assert_eq!(rec.locked_price, Some(3));
        assert!(store.contains_deposit(&a.key()).unwrap());
    }

    #[test]
    fn completed_commit_out_of_order_is_rejected() {
        let (mut store, _dir) = temp_store();
        store.record_pending(&pending("d1", 0)).unwrap();
        let b = pending("d2", 1);
        store.record_pending(&b).unwrap();

        let err = store
            .commit(&completed(b, TokenomicsState::genesis()))
            .unwrap_err();
        assert_eq!(err, StoreError::OutOfOrder { expected: 0, got: 1 });
        // Nothing written.
        assert!(store.load_snapshot().unwrap().is_none());
        assert_eq!(store.pending().unwrap().len(), 2);
    }

    #[test]
    fn commit_unknown_activation_fails() {
        let (mut store, _dir) = temp_store();
        let err = store
            .commit(&completed(pending("ghost", 9), TokenomicsState::genesis()))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownActivation(_)));
    }

    #[test]
    fn failed_commit_keeps_state() {
        let (mut store, _dir) = temp_store();
        let mut a = pending("d1", 0);
        store.record_pending(&a).unwrap();
        a.status = ActivationStatus::Failed;
        store
            .commit(&TerminalCommit {
                activation: a.clone(),
                state: TokenomicsState::genesis(),
                totals: PoolTotals::default(),
            })
            .unwrap();
        let snap = store.load_snapshot().unwrap().unwrap();
        assert_eq!(snap.state, TokenomicsState::genesis());
        assert_eq!(
            store.get_activation(&a.id).unwrap().unwrap().status,
            ActivationStatus::Failed
        );
    }

    // ------------------------------------------------------------------
    // Persistence across reopen
    // ------------------------------------------------------------------

    #[test]
    fn persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sequencer");
        let a = pending("d1", 0);
        let b = pending("d2", 1);
        let state = activate(&TokenomicsState::genesis()).unwrap().state;

        {
            let mut store = RocksStore::open(&path).unwrap();
            store.record_pending(&a).unwrap();
            store.record_pending(&b).unwrap();
            store.commit(&completed(a.clone(), state.clone())).unwrap();
            store.flush().unwrap();
        }

        {
            let store = RocksStore::open(&path).unwrap();
            assert_eq!(store.load_snapshot().unwrap().unwrap().state, state);
            assert_eq!(store.pending().unwrap(), vec![b]);
            assert_eq!(store.next_sequence().unwrap(), 2);
            assert!(store.get_activation(&a.id).unwrap().is_some());
        }
    }
}
