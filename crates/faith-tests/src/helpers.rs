//! Shared helpers for the integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use faith_core::error::{SettlementError, StoreError};
use faith_core::events::SequencerEvent;
use faith_core::store::{ActivationStore, MemoryStore, TerminalCommit};
use faith_core::traits::{
    BridgeTransport, MonitoringSink, SettlementRequest, SettlementStatus, SettlementTicket,
};
use faith_core::types::{Activation, ActivationId, DepositKey, StateSnapshot};
use faith_sequencer::{BackoffPolicy, Sequencer, SequencerOptions};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// How a scripted deposit resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Settle on the first poll.
    Settle,
    /// Report `Pending` this many times, then settle.
    SettleAfter(u32),
    /// Reject on the first poll.
    Reject(String),
    /// Stay pending until [`ScriptedTransport::release`] is called.
    Hold,
    /// Fail `submit` with a transport error.
    SubmitError(String),
}

#[derive(Default)]
struct TransportState {
    scripts: HashMap<String, Script>,
    polls: HashMap<String, u32>,
    released: HashSet<String>,
    submitted: Vec<SettlementRequest>,
    outstanding: HashSet<String>,
    max_outstanding: usize,
}

/// Transport whose outcomes are scripted per deposit id. Unscripted
/// deposits settle on the first poll.
///
/// Records every submission and the largest number of submissions that
/// were unresolved at the same time.
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<TransportState>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, deposit_id: &str, script: Script) {
        self.state.lock().scripts.insert(deposit_id.to_string(), script);
    }

    /// Let a held deposit settle on its next poll.
    pub fn release(&self, deposit_id: &str) {
        self.state.lock().released.insert(deposit_id.to_string());
    }

    /// Every request submitted so far, in submission order.
    pub fn submitted(&self) -> Vec<SettlementRequest> {
        self.state.lock().submitted.clone()
    }

    pub fn max_outstanding(&self) -> usize {
        self.state.lock().max_outstanding
    }
}

#[async_trait]
impl BridgeTransport for ScriptedTransport {
    async fn submit(&self, request: &SettlementRequest) -> Result<SettlementTicket, SettlementError> {
        let mut st = self.state.lock();
        let id = request.deposit_id.clone();
        st.submitted.push(request.clone());
        if let Some(Script::SubmitError(msg)) = st.scripts.get(&id) {
            return Err(SettlementError::Transport(msg.clone()));
        }
        st.outstanding.insert(id.clone());
        st.max_outstanding = st.max_outstanding.max(st.outstanding.len());
        Ok(SettlementTicket(id))
    }

    async fn poll(&self, ticket: &SettlementTicket) -> Result<SettlementStatus, SettlementError> {
        let mut st = self.state.lock();
        let id = ticket.0.clone();
        let polls = {
            let n = st.polls.entry(id.clone()).or_default();
            *n += 1;
            *n
        };
        let script = st.scripts.get(&id).cloned().unwrap_or(Script::Settle);
        let status = match script {
            Script::Settle => settled(&id),
            Script::SettleAfter(n) if polls > n => settled(&id),
            Script::SettleAfter(_) => SettlementStatus::Pending,
            Script::Reject(reason) => SettlementStatus::Rejected { reason },
            Script::Hold if st.released.contains(&id) => settled(&id),
            Script::Hold => SettlementStatus::Pending,
            Script::SubmitError(msg) => return Err(SettlementError::Transport(msg)),
        };
        if status != SettlementStatus::Pending {
            st.outstanding.remove(&id);
        }
        Ok(status)
    }
}

fn settled(id: &str) -> SettlementStatus {
    SettlementStatus::Settled {
        reference: format!("bridge-{id}"),
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Keeps every event in emission order.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SequencerEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SequencerEvent> {
        self.events.lock().clone()
    }

    /// Locked prices in emission order.
    pub fn locked_prices(&self) -> Vec<u64> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SequencerEvent::ActivationLocked { locked_price, .. } => Some(*locked_price),
                _ => None,
            })
            .collect()
    }

    /// Largest number of activations locked but not yet settled at once,
    /// as seen from the event stream.
    pub fn max_concurrent_locks(&self) -> usize {
        let mut open = HashSet::new();
        let mut max = 0;
        for e in self.events.lock().iter() {
            match e {
                SequencerEvent::ActivationLocked { id, .. } => {
                    open.insert(*id);
                    max = max.max(open.len());
                }
                SequencerEvent::ActivationSettled { id, .. } => {
                    open.remove(id);
                }
                _ => {}
            }
        }
        max
    }
}

impl MonitoringSink for RecordingSink {
    fn emit(&self, event: &SequencerEvent) {
        self.events.lock().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// A [`MemoryStore`] that outlives the sequencer using it, and can be told
/// to fail terminal commits.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<MemoryStore>>,
    /// Commits allowed before every further commit fails.
    commit_budget: Arc<AtomicU64>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::default(),
            commit_budget: Arc::new(AtomicU64::new(u64::MAX)),
        }
    }

    /// Fail every terminal commit after the next `n`.
    pub fn fail_commits_after(&self, n: u64) {
        self.commit_budget.store(n, Ordering::SeqCst);
    }

    pub fn commit_count(&self) -> u64 {
        self.inner.lock().commit_count()
    }
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivationStore for SharedStore {
    fn load_snapshot(&self) -> Result<Option<StateSnapshot>, StoreError> {
        self.inner.lock().load_snapshot()
    }

    fn pending(&self) -> Result<Vec<Activation>, StoreError> {
        self.inner.lock().pending()
    }

    fn record_pending(&mut self, activation: &Activation) -> Result<(), StoreError> {
        self.inner.lock().record_pending(activation)
    }

    fn commit(&mut self, commit: &TerminalCommit) -> Result<(), StoreError> {
        let allowed = self
            .commit_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if allowed.is_err() {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        self.inner.lock().commit(commit)
    }

    fn get_activation(&self, id: &ActivationId) -> Result<Option<Activation>, StoreError> {
        self.inner.lock().get_activation(id)
    }

    fn contains_deposit(&self, key: &DepositKey) -> Result<bool, StoreError> {
        self.inner.lock().contains_deposit(key)
    }

    fn next_sequence(&self) -> Result<u64, StoreError> {
        self.inner.lock().next_sequence()
    }
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

/// Short polling schedule: 10 ms doubling to 200 ms, 2 s ceiling.
pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial_delay_ms: 10,
        max_delay_ms: 200,
        multiplier: 2.0,
        max_wait_ms: 2_000,
    }
}

/// Open a sequencer with the fast backoff and a recording sink.
pub fn open_sequencer(
    store: Box<dyn ActivationStore>,
    transport: Arc<dyn BridgeTransport>,
    sink: &RecordingSink,
) -> Arc<Sequencer> {
    Sequencer::open(
        store,
        transport,
        SequencerOptions {
            backoff: fast_backoff(),
            sinks: vec![Box::new(sink.clone())],
            ..SequencerOptions::default()
        },
    )
    .unwrap()
}

/// Enqueue `deposit_id` on "ethereum" with 0.01 BTC.
pub fn deposit(sequencer: &Sequencer, deposit_id: &str) -> ActivationId {
    sequencer
        .create_activation("ethereum", deposit_id, "0xfaith", 1, 1_000_000)
        .unwrap()
}
