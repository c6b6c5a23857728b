//! Events emitted to monitoring sinks.
//!
//! One variant per event kind with fixed fields. Events are emitted only
//! after the transition they describe has been committed, except
//! [`SequencerEvent::ActivationLocked`], which reports the in-memory lock.

use serde::{Deserialize, Serialize};

use crate::types::{ActivationId, FailureReason, PoolAllocation};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SequencerEvent {
    ActivationCreated {
        id: ActivationId,
        sequence: u64,
        source_chain: String,
        deposit_id: String,
        btc_equivalent: u64,
    },
    ActivationLocked {
        id: ActivationId,
        locked_price: u64,
    },
    ActivationSettled {
        id: ActivationId,
        outcome: SettlementOutcome,
    },
    PriceUpdated {
        prev_price: u64,
        next_price: u64,
        tokens_minted: u64,
    },
    CoinsReleased {
        amount: u64,
        total_released: u64,
        remaining: u64,
    },
    PoolsAllocated {
        id: ActivationId,
        allocation: PoolAllocation,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Success { reference: String },
    Failure { reason: FailureReason },
}

impl SequencerEvent {
    /// Short name used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ActivationCreated { .. } => "activation_created",
            Self::ActivationLocked { .. } => "activation_locked",
            Self::ActivationSettled { .. } => "activation_settled",
            Self::PriceUpdated { .. } => "price_updated",
            Self::CoinsReleased { .. } => "coins_released",
            Self::PoolsAllocated { .. } => "pools_allocated",
        }
    }

    /// The activation the event belongs to, if any.
    pub fn activation_id(&self) -> Option<ActivationId> {
        match self {
            Self::ActivationCreated { id, .. }
            | Self::ActivationLocked { id, .. }
            | Self::ActivationSettled { id, .. }
            | Self::PoolsAllocated { id, .. } => Some(*id),
            Self::PriceUpdated { .. } | Self::CoinsReleased { .. } => None,
        }
    }
}
