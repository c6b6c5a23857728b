//! Monitoring sinks shipped with the sequencer.

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use faith_core::events::{SequencerEvent, SettlementOutcome};
use faith_core::traits::MonitoringSink;

/// Renders every event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MonitoringSink for TracingSink {
    fn emit(&self, event: &SequencerEvent) {
        match event {
            SequencerEvent::ActivationCreated {
                id,
                sequence,
                source_chain,
                deposit_id,
                btc_equivalent,
            } => debug!(
                %id,
                sequence,
                chain = %source_chain,
                deposit = %deposit_id,
                btc_equivalent,
                "activation created"
            ),
            SequencerEvent::ActivationLocked { id, locked_price } => {
                debug!(%id, price = locked_price, "activation locked")
            }
            SequencerEvent::ActivationSettled { id, outcome } => match outcome {
                SettlementOutcome::Success { reference } => {
                    info!(%id, %reference, "activation settled")
                }
                SettlementOutcome::Failure { reason } => {
                    warn!(%id, %reason, "activation failed")
                }
            },
            SequencerEvent::PriceUpdated {
                prev_price,
                next_price,
                tokens_minted,
            } => info!(prev_price, next_price, tokens_minted, "price updated"),
            SequencerEvent::CoinsReleased {
                amount,
                total_released,
                remaining,
            } => info!(amount, total_released, remaining, "coins released"),
            SequencerEvent::PoolsAllocated { id, allocation } => debug!(
                %id,
                net = allocation.net_amount,
                development = allocation.development_sats,
                liquidity = allocation.liquidity_sats,
                "pools allocated"
            ),
        }
    }
}

/// Forwards events onto a tokio broadcast channel.
///
/// Sending never blocks. With no subscribers the event is dropped; slow
/// subscribers see `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<SequencerEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SequencerEvent> {
        self.tx.subscribe()
    }
}

impl MonitoringSink for BroadcastSink {
    fn emit(&self, event: &SequencerEvent) {
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faith_core::types::ActivationId;

    #[test]
    fn broadcast_reaches_subscriber() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        let event = SequencerEvent::ActivationLocked {
            id: ActivationId::default(),
            locked_price: 3,
        };
        sink.emit(&event);
        assert_eq!(rx.try_recv().unwrap(), event);
    }

    #[test]
    fn broadcast_without_subscribers_is_silent() {
        let sink = BroadcastSink::new(1);
        sink.emit(&SequencerEvent::PriceUpdated {
            prev_price: 1,
            next_price: 3,
            tokens_minted: 1,
        });
    }

    #[test]
    fn tracing_sink_accepts_every_kind() {
        let sink = TracingSink;
        sink.emit(&SequencerEvent::CoinsReleased {
            amount: 9,
            total_released: 9,
            remaining: 999_999_990,
        });
        sink.emit(&SequencerEvent::ActivationSettled {
            id: ActivationId::default(),
            outcome: SettlementOutcome::Success {
                reference: "tx-1".into(),
            },
        });
    }
}
