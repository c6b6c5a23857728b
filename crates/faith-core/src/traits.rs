//! Trait interfaces for the collaborators around the settlement core.
//!
//! - [`BridgeTransport`]: cross-chain settlement (faith-sequencer implements)
//! - [`MonitoringSink`]: event consumers (faith-sequencer implements)
//! - [`DepositSource`]: per-chain deposit facts
//! - [`PriceFeedProvider`]: BTC valuation of deposited assets

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FaithError, SettlementError};
use crate::events::SequencerEvent;
use crate::types::{ActivationId, AssetKind, DepositFact};

/// What the sequencer asks a transport to settle.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SettlementRequest {
    /// Idempotency key: resubmitting the same id must not settle twice.
    pub activation_id: ActivationId,
    pub source_chain: String,
    pub deposit_id: String,
    pub user: String,
    pub amount: u64,
    pub btc_equivalent: u64,
    pub locked_price: u64,
}

/// Handle returned by [`BridgeTransport::submit`] for polling.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SettlementTicket(pub String);

/// State of a submitted settlement as seen by the transport.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum SettlementStatus {
    Pending,
    Settled { reference: String },
    Rejected { reason: String },
}

/// Asynchronous cross-chain settlement.
///
/// Any transport that eventually resolves a submitted request to success or
/// failure is substitutable: message bus, relay, or direct call. Errors
/// returned from either method are treated as a failed settlement.
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    /// Dispatch a settlement request. Must not wait for resolution.
    async fn submit(&self, request: &SettlementRequest) -> Result<SettlementTicket, SettlementError>;

    /// Check on a previously submitted request.
    async fn poll(&self, ticket: &SettlementTicket) -> Result<SettlementStatus, SettlementError>;
}

/// Consumer of pipeline events. Must not block.
pub trait MonitoringSink: Send + Sync {
    fn emit(&self, event: &SequencerEvent);
}

/// Fan out to several sinks in order.
impl MonitoringSink for Vec<Box<dyn MonitoringSink>> {
    fn emit(&self, event: &SequencerEvent) {
        for sink in self {
            sink.emit(event);
        }
    }
}

/// Stream of deposit facts from one or more chains.
#[async_trait]
pub trait DepositSource: Send {
    /// Next deposit, or `None` once the source is exhausted.
    async fn next_deposit(&mut self) -> Result<Option<DepositFact>, FaithError>;
}

/// Values deposits in BTC sats.
pub trait PriceFeedProvider: Send + Sync {
    fn btc_equivalent(&self, asset: &AssetKind, amount: u64) -> Result<u64, FaithError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Counting(Arc<Mutex<Vec<&'static str>>>);

    impl MonitoringSink for Counting {
        fn emit(&self, event: &SequencerEvent) {
            self.0.lock().push(event.kind());
        }
    }

    #[test]
    fn sink_fan_out_reaches_every_sink() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sinks: Vec<Box<dyn MonitoringSink>> = vec![
            Box::new(Counting(Arc::clone(&log))),
            Box::new(Counting(Arc::clone(&log))),
        ];
        sinks.emit(&SequencerEvent::CoinsReleased {
            amount: 9,
            total_released: 9,
            remaining: 1,
        });
        assert_eq!(*log.lock(), vec!["coins_released", "coins_released"]);
    }
}
