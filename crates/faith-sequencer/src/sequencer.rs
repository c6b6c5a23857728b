//! The activation sequencer.
//!
//! [`Sequencer`] owns the single mutable [`TokenomicsState`]. Any number of
//! callers may enqueue activations concurrently; one worker task
//! ([`Sequencer::run`]) drains the queue head first, locking a price,
//! dispatching settlement and then committing or rolling back. At most one
//! activation holds the price slot at any instant.
//!
//! Lock order is queue, then store. The store lock also guards every
//! terminal commit together with the in-memory snapshot update, so a reader
//! never sees a snapshot that disagrees with what is on disk.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use faith_alloc::CostAllocator;
use faith_core::constants::MAX_KEY_LEN;
use faith_core::error::{AllocationError, FaithError, SettlementError, ValidationError};
use faith_core::events::{SequencerEvent, SettlementOutcome};
use faith_core::pricing::{self, Activated};
use faith_core::store::{ActivationStore, TerminalCommit};
use faith_core::traits::{
    BridgeTransport, MonitoringSink, PriceFeedProvider, SettlementRequest, SettlementStatus,
};
use faith_core::types::{
    now_millis, Activation, ActivationId, ActivationStatus, DepositFact, DepositKey,
    FailureReason, PoolAllocation, PoolTotals, StateSnapshot,
};

use crate::config::{BackoffPolicy, SequencerConfig};
use crate::sink::{BroadcastSink, TracingSink};

/// The activation holding the price slot.
struct InFlight {
    activation: Activation,
    cancel: Arc<Notify>,
    /// A caller asked to cancel and was told it would take effect.
    cancel_requested: bool,
    /// Settlement has resolved; cancels are refused from here on.
    resolving: bool,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Activation>,
    in_flight: Option<InFlight>,
    next_sequence: u64,
}

/// Everything a sequencer needs besides its store and transport.
pub struct SequencerOptions {
    pub allocator: CostAllocator,
    pub backoff: BackoffPolicy,
    pub event_capacity: usize,
    /// Extra sinks, called after the built-in broadcast sink.
    pub sinks: Vec<Box<dyn MonitoringSink>>,
}

impl SequencerOptions {
    /// Options from a loaded configuration, logging every event.
    pub fn from_config(config: &SequencerConfig) -> Result<Self, FaithError> {
        Ok(Self {
            allocator: CostAllocator::new(config.fees, config.curve)?,
            backoff: config.backoff.clone(),
            event_capacity: config.event_capacity,
            sinks: vec![Box::new(TracingSink)],
        })
    }
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            allocator: CostAllocator::default(),
            backoff: BackoffPolicy::default(),
            event_capacity: 1024,
            sinks: Vec::new(),
        }
    }
}

/// Serialised settlement pipeline over a durable store.
pub struct Sequencer {
    store: Mutex<Box<dyn ActivationStore>>,
    queue: Mutex<Queue>,
    snapshot: RwLock<StateSnapshot>,
    transport: Arc<dyn BridgeTransport>,
    allocator: CostAllocator,
    backoff: BackoffPolicy,
    broadcast: BroadcastSink,
    sinks: Vec<Box<dyn MonitoringSink>>,
    /// Wakes the worker when work arrives or shutdown is requested.
    wake: Notify,
    /// Fired after every terminal transition.
    resolved: Notify,
    shutdown: AtomicBool,
    halted: AtomicBool,
}

impl Sequencer {
    /// Open a sequencer over `store`, resuming from its last committed state.
    ///
    /// Activations that were in flight when the process stopped come back as
    /// `Pending` at their original queue position and are dispatched again
    /// under the same id.
    pub fn open(
        store: Box<dyn ActivationStore>,
        transport: Arc<dyn BridgeTransport>,
        options: SequencerOptions,
    ) -> Result<Arc<Self>, FaithError> {
        let snapshot = store.load_snapshot()?.unwrap_or_default();
        snapshot.state.check_invariants()?;

        let mut pending = VecDeque::new();
        for mut activation in store.pending()? {
            activation.status = ActivationStatus::Pending;
            activation.locked_price = None;
            pending.push_back(activation);
        }
        let next_sequence = store.next_sequence()?;

        if !pending.is_empty() {
            info!(
                queued = pending.len(),
                tokens_minted = snapshot.state.tokens_minted,
                "resuming sequencer"
            );
        }

        Ok(Arc::new(Self {
            store: Mutex::new(store),
            queue: Mutex::new(Queue {
                pending,
                in_flight: None,
                next_sequence,
            }),
            snapshot: RwLock::new(snapshot),
            transport,
            allocator: options.allocator,
            backoff: options.backoff,
            broadcast: BroadcastSink::new(options.event_capacity),
            sinks: options.sinks,
            wake: Notify::new(),
            resolved: Notify::new(),
            shutdown: AtomicBool::new(false),
            halted: AtomicBool::new(false),
        }))
    }

    // ------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------

    /// Validate and enqueue a new activation. Returns without waiting for
    /// it to be processed.
    ///
    /// Rejections never consume a queue position or a price slot.
    pub fn create_activation(
        &self,
        chain: &str,
        deposit_id: &str,
        user: &str,
        amount: u64,
        btc_equivalent: u64,
    ) -> Result<ActivationId, FaithError> {
        if self.shutdown.load(Ordering::Acquire) || self.halted.load(Ordering::Acquire) {
            return Err(FaithError::ShuttingDown);
        }
        check_field("chain", chain)?;
        check_field("deposit_id", deposit_id)?;
        check_field("user", user)?;
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        if btc_equivalent == 0 {
            return Err(ValidationError::ZeroBtcEquivalent.into());
        }
        self.allocator.calculate_costs(btc_equivalent)?;

        let key = DepositKey::new(chain, deposit_id);
        let activation = {
            let mut queue = self.queue.lock();
            let mut store = self.store.lock();
            if store.contains_deposit(&key)? {
                return Err(ValidationError::DuplicateDeposit(key.to_string()).into());
            }
            let activation = Activation {
                id: key.activation_id(),
                sequence: queue.next_sequence,
                source_chain: key.chain.clone(),
                deposit_id: key.deposit_id.clone(),
                user: user.to_string(),
                amount,
                btc_equivalent,
                locked_price: None,
                status: ActivationStatus::Pending,
                created_at: now_millis(),
                resolved_at: None,
                settlement_ref: None,
                failure: None,
                allocation: None,
            };
            store.record_pending(&activation)?;
            queue.next_sequence += 1;
            queue.pending.push_back(activation.clone());
            activation
        };

        debug!(id = %activation.id, sequence = activation.sequence, "queued activation");
        self.emit(SequencerEvent::ActivationCreated {
            id: activation.id,
            sequence: activation.sequence,
            source_chain: activation.source_chain,
            deposit_id: activation.deposit_id,
            btc_equivalent,
        });
        self.wake.notify_one();
        Ok(activation.id)
    }

    /// Value a deposit fact through `feed` and enqueue it.
    pub fn submit_deposit(
        &self,
        fact: &DepositFact,
        feed: &dyn PriceFeedProvider,
    ) -> Result<ActivationId, FaithError> {
        let btc_equivalent = feed.btc_equivalent(&fact.asset, fact.amount)?;
        self.create_activation(
            &fact.chain_id,
            &fact.deposit_id,
            &fact.user,
            fact.amount,
            btc_equivalent,
        )
    }

    /// Cancel an activation.
    ///
    /// A `Pending` activation is removed from the queue and recorded `Failed`
    /// without touching the tokenomics state. An in-flight activation is
    /// signalled and goes through the settlement-failure rollback.
    ///
    /// `Ok` means the activation will end `Failed`. Once settlement has
    /// resolved the cancel is refused with [`FaithError::AlreadyResolved`].
    pub fn cancel(&self, id: &ActivationId) -> Result<(), FaithError> {
        let cancelled = {
            let mut queue = self.queue.lock();
            if let Some(in_flight) = queue.in_flight.as_mut().filter(|f| f.activation.id == *id) {
                if in_flight.resolving {
                    return Err(FaithError::AlreadyResolved(id.to_string()));
                }
                in_flight.cancel_requested = true;
                in_flight.cancel.notify_one();
                debug!(%id, "cancelling in-flight activation");
                return Ok(());
            }
            let Some(pos) = queue.pending.iter().position(|a| a.id == *id) else {
                drop(queue);
                return match self.store.lock().get_activation(id)? {
                    Some(_) => Err(FaithError::AlreadyResolved(id.to_string())),
                    None => Err(FaithError::UnknownActivation(id.to_string())),
                };
            };

            let mut activation = queue.pending[pos].clone();
            activation.status = ActivationStatus::Failed;
            activation.failure = Some(FailureReason::Cancelled);
            activation.resolved_at = Some(now_millis());

            let mut store = self.store.lock();
            let snapshot = self.snapshot.read().clone();
            store.commit(&TerminalCommit {
                activation: activation.clone(),
                state: snapshot.state,
                totals: snapshot.totals,
            })?;
            queue.pending.remove(pos);
            activation
        };

        info!(%id, sequence = cancelled.sequence, "cancelled pending activation");
        self.emit(SequencerEvent::ActivationSettled {
            id: *id,
            outcome: SettlementOutcome::Failure {
                reason: FailureReason::Cancelled,
            },
        });
        self.resolved.notify_waiters();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Last committed tokenomics state and pool totals.
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot.read().clone()
    }

    /// Current view of an activation, queued, in flight or resolved.
    pub fn activation(&self, id: &ActivationId) -> Result<Option<Activation>, FaithError> {
        {
            let queue = self.queue.lock();
            if let Some(f) = queue.in_flight.as_ref().filter(|f| f.activation.id == *id) {
                return Ok(Some(f.activation.clone()));
            }
            if let Some(a) = queue.pending.iter().find(|a| a.id == *id) {
                return Ok(Some(a.clone()));
            }
        }
        Ok(self.store.lock().get_activation(id)?)
    }

    /// Number of `Pending` activations.
    pub fn queue_depth(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// The activation currently holding the price slot.
    pub fn in_flight(&self) -> Option<Activation> {
        self.queue
            .lock()
            .in_flight
            .as_ref()
            .map(|f| f.activation.clone())
    }

    /// Whether nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        let queue = self.queue.lock();
        queue.pending.is_empty() && queue.in_flight.is_none()
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SequencerEvent> {
        self.broadcast.subscribe()
    }

    /// Whether the worker stopped on a persistence failure.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Wait until the queue is drained, or the worker has halted.
    pub async fn wait_idle(&self) {
        loop {
            let resolved = self.resolved.notified();
            if self.is_idle() || self.is_halted() {
                return;
            }
            resolved.await;
        }
    }

    /// Stop the worker once the current activation, if any, resolves.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    // ------------------------------------------------------------------
    // Worker
    // ------------------------------------------------------------------

    /// Drain the queue until [`Sequencer::shutdown`] is called.
    ///
    /// Returns an error only when a terminal transition could not be
    /// persisted. The worker stops there; the activation stays queued in the
    /// store and is dispatched again after a restart.
    pub async fn run(self: Arc<Self>) -> Result<(), FaithError> {
        info!("sequencer worker started");
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                info!("sequencer worker stopped");
                return Ok(());
            }
            let Some((activation, cancel)) = self.take_head() else {
                self.wake.notified().await;
                continue;
            };
            if let Err(e) = self.process(activation, cancel).await {
                error!("sequencer halted: {e}");
                self.halted.store(true, Ordering::Release);
                {
                    self.queue.lock().in_flight = None;
                }
                self.resolved.notify_waiters();
                return Err(e);
            }
        }
    }

    /// Pop the queue head into the price slot.
    fn take_head(&self) -> Option<(Activation, Arc<Notify>)> {
        let mut queue = self.queue.lock();
        let activation = queue.pending.pop_front()?;
        let cancel = Arc::new(Notify::new());
        queue.in_flight = Some(InFlight {
            activation: activation.clone(),
            cancel: Arc::clone(&cancel),
            cancel_requested: false,
            resolving: false,
        });
        Some((activation, cancel))
    }

    fn set_in_flight_status(&self, status: ActivationStatus, locked_price: Option<u64>) {
        if let Some(f) = self.queue.lock().in_flight.as_mut() {
            f.activation.status = status;
            f.activation.locked_price = locked_price;
        }
    }

    async fn process(
        &self,
        mut activation: Activation,
        cancel: Arc<Notify>,
    ) -> Result<(), FaithError> {
        let base = self.snapshot();
        let activated = pricing::activate(&base.state)?;
        let charged = activated.charged;
        debug!(id = %activation.id, sequence = activation.sequence, price = charged, "locked price");

        activation.status = ActivationStatus::Locked;
        activation.locked_price = Some(charged);
        self.set_in_flight_status(ActivationStatus::Locked, Some(charged));
        self.emit(SequencerEvent::ActivationLocked {
            id: activation.id,
            locked_price: charged,
        });

        // The split uses the system total before this activation.
        let allocation = match self
            .allocator
            .allocate(activation.btc_equivalent, base.totals.system_total_btc)
        {
            Ok(allocation) => allocation,
            Err(e) => {
                let reason = FailureReason::Allocation(e.to_string());
                return self.roll_back(activation, &base, &activated, reason);
            }
        };
        let Some(totals) = base.totals.absorb(activation.btc_equivalent, &allocation) else {
            let reason = FailureReason::Allocation(AllocationError::ArithmeticOverflow.to_string());
            return self.roll_back(activation, &base, &activated, reason);
        };

        activation.status = ActivationStatus::Settling;
        self.set_in_flight_status(ActivationStatus::Settling, Some(charged));
        let request = SettlementRequest {
            activation_id: activation.id,
            source_chain: activation.source_chain.clone(),
            deposit_id: activation.deposit_id.clone(),
            user: activation.user.clone(),
            amount: activation.amount,
            btc_equivalent: activation.btc_equivalent,
            locked_price: charged,
        };

        let outcome = self.settle(&request, &cancel).await;
        match self.close_cancel_window(outcome) {
            Ok(reference) => self.complete(activation, activated, allocation, totals, reference),
            Err(e) => self.roll_back(activation, &base, &activated, e.into()),
        }
    }

    /// Refuse further cancels. A cancel accepted while settlement was
    /// resolving still wins over a success.
    fn close_cancel_window(
        &self,
        outcome: Result<String, SettlementError>,
    ) -> Result<String, SettlementError> {
        let mut queue = self.queue.lock();
        let Some(in_flight) = queue.in_flight.as_mut() else {
            return outcome;
        };
        in_flight.resolving = true;
        match outcome {
            Ok(_) if in_flight.cancel_requested => Err(SettlementError::Cancelled),
            other => other,
        }
    }

    /// Dispatch and wait for resolution, bounded by the backoff ceiling.
    async fn settle(
        &self,
        request: &SettlementRequest,
        cancel: &Notify,
    ) -> Result<String, SettlementError> {
        let started = Instant::now();
        let deadline = started + self.backoff.max_wait();
        tokio::select! {
            biased;
            _ = cancel.notified() => Err(SettlementError::Cancelled),
            outcome = self.poll_until_resolved(request) => outcome,
            _ = tokio::time::sleep_until(deadline) => Err(SettlementError::Timeout {
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    async fn poll_until_resolved(&self, request: &SettlementRequest) -> Result<String, SettlementError> {
        let ticket = self.transport.submit(request).await?;
        let mut attempt = 0u32;
        loop {
            match self.transport.poll(&ticket).await? {
                SettlementStatus::Settled { reference } => return Ok(reference),
                SettlementStatus::Rejected { reason } => {
                    return Err(SettlementError::Failure(reason));
                }
                SettlementStatus::Pending => {}
            }
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt = attempt.saturating_add(1);
        }
    }

    fn complete(
        &self,
        mut activation: Activation,
        activated: Activated,
        allocation: PoolAllocation,
        totals: PoolTotals,
        reference: String,
    ) -> Result<(), FaithError> {
        activation.status = ActivationStatus::Completed;
        activation.resolved_at = Some(now_millis());
        activation.settlement_ref = Some(reference.clone());
        activation.allocation = Some(allocation);

        let snapshot = StateSnapshot {
            state: activated.state,
            totals,
        };
        self.commit(&activation, &snapshot)?;

        let state = &snapshot.state;
        info!(
            id = %activation.id,
            price = activated.charged,
            tokens_minted = state.tokens_minted,
            "activation completed"
        );
        self.emit(SequencerEvent::ActivationSettled {
            id: activation.id,
            outcome: SettlementOutcome::Success { reference },
        });
        self.emit(SequencerEvent::PriceUpdated {
            prev_price: state.prev_price,
            next_price: state.next_price,
            tokens_minted: state.tokens_minted,
        });
        for release in &activated.releases {
            info!(
                amount = release.amount,
                total_released = release.total_released,
                trigger_price = release.trigger_price,
                terminal = release.terminal,
                "coin release"
            );
            self.emit(SequencerEvent::CoinsReleased {
                amount: release.amount,
                total_released: release.total_released,
                remaining: release.remaining,
            });
        }
        self.emit(SequencerEvent::PoolsAllocated {
            id: activation.id,
            allocation,
        });
        self.resolved.notify_waiters();
        Ok(())
    }

    fn roll_back(
        &self,
        mut activation: Activation,
        base: &StateSnapshot,
        activated: &Activated,
        reason: FailureReason,
    ) -> Result<(), FaithError> {
        let state = pricing::deactivate(&activated.state, &activated.undo)?;
        if state != base.state {
            return Err(FaithError::Pricing(
                faith_core::error::PricingError::InvalidState(
                    "rollback did not restore the pre-lock state".into(),
                ),
            ));
        }

        activation.status = ActivationStatus::Failed;
        activation.resolved_at = Some(now_millis());
        activation.failure = Some(reason.clone());

        let snapshot = StateSnapshot {
            state,
            totals: base.totals,
        };
        self.commit(&activation, &snapshot)?;

        warn!(id = %activation.id, %reason, "settlement failed, price rolled back");
        self.emit(SequencerEvent::ActivationSettled {
            id: activation.id,
            outcome: SettlementOutcome::Failure { reason },
        });
        self.resolved.notify_waiters();
        Ok(())
    }

    /// Persist a terminal transition, publish the new snapshot and free the
    /// price slot.
    fn commit(&self, activation: &Activation, snapshot: &StateSnapshot) -> Result<(), FaithError> {
        {
            let mut store = self.store.lock();
            if let Err(e) = store.commit(&TerminalCommit {
                activation: activation.clone(),
                state: snapshot.state.clone(),
                totals: snapshot.totals,
            }) {
                error!(id = %activation.id, status = %activation.status, "failed to persist terminal transition: {e}");
                return Err(e.into());
            }
            *self.snapshot.write() = snapshot.clone();
        }
        self.queue.lock().in_flight = None;
        Ok(())
    }

    fn emit(&self, event: SequencerEvent) {
        self.broadcast.emit(&event);
        self.sinks.emit(&event);
    }
}

fn check_field(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    if value.len() > MAX_KEY_LEN {
        return Err(ValidationError::FieldTooLong {
            field,
            len: value.len(),
            max: MAX_KEY_LEN,
        });
    }
    Ok(())
}
