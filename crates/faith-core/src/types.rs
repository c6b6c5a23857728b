//! Core domain types: deposit keys, activations, tokenomics state, pool
//! allocations.
//!
//! All monetary values are in sats. Timestamps are Unix milliseconds.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{
    INITIAL_COIN_DIVISOR, INITIAL_RELEASE_TARGET, STARTING_PRICE, TOTAL_SUPPLY,
};
use crate::error::{PricingError, SettlementError};

/// Identifier of an activation, derived from its deposit key.
///
/// `blake3(chain || 0x00 || deposit_id)`, so the same deposit always maps to
/// the same id across restarts and across transports.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct ActivationId(pub [u8; 32]);

impl ActivationId {
    /// Derive the id for a deposit key.
    pub fn from_deposit(key: &DepositKey) -> Self {
        Self(*blake3::hash(&key.to_bytes()).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Unique key of a deposit: the source chain plus the chain-local deposit id.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct DepositKey {
    pub chain: String,
    pub deposit_id: String,
}

impl DepositKey {
    pub fn new(chain: impl Into<String>, deposit_id: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            deposit_id: deposit_id.into(),
        }
    }

    /// Byte encoding used as a storage key and id preimage.
    ///
    /// The chain is length-prefixed (u32 big-endian) so no two keys share an
    /// encoding, whatever bytes either field contains.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.chain.len() + self.deposit_id.len());
        out.extend_from_slice(&(self.chain.len() as u32).to_be_bytes());
        out.extend_from_slice(self.chain.as_bytes());
        out.extend_from_slice(self.deposit_id.as_bytes());
        out
    }

    pub fn activation_id(&self) -> ActivationId {
        ActivationId::from_deposit(self)
    }
}

impl fmt::Display for DepositKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.deposit_id)
    }
}

/// Asset a deposit was made in. The BTC-equivalent figure is supplied
/// upstream by the price feed; the kind is carried for reporting.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Btc,
    Eth,
    Sol,
    Usdc,
    Usdt,
    Other(String),
}

/// A deposit fact as delivered by a per-chain deposit source.
///
/// Carries no BTC figure; that comes from a price feed at intake.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DepositFact {
    pub chain_id: String,
    pub deposit_id: String,
    pub user: String,
    /// Amount in the deposited asset's smallest unit.
    pub amount: u64,
    pub asset: AssetKind,
}

impl DepositFact {
    pub fn key(&self) -> DepositKey {
        DepositKey::new(self.chain_id.clone(), self.deposit_id.clone())
    }
}

/// Lifecycle of an activation.
///
/// `Pending → Locked → Settling → {Completed | Failed}`. A `Pending`
/// activation may also go straight to `Failed` when cancelled.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, bincode::Encode,
    bincode::Decode,
)]
pub enum ActivationStatus {
    Pending,
    Locked,
    Settling,
    Completed,
    Failed,
}

impl ActivationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Locked or settling: holding the single price slot.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Locked | Self::Settling)
    }
}

impl fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Locked => "locked",
            Self::Settling => "settling",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why an activation ended `Failed`.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode,
)]
pub enum FailureReason {
    SettlementFailure(String),
    SettlementTimeout { waited_ms: u64 },
    Cancelled,
    Transport(String),
    /// Cost allocation failed at lock time; nothing was dispatched.
    Allocation(String),
}

impl From<SettlementError> for FailureReason {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::Timeout { waited_ms } => Self::SettlementTimeout { waited_ms },
            SettlementError::Failure(msg) => Self::SettlementFailure(msg),
            SettlementError::Cancelled => Self::Cancelled,
            SettlementError::Transport(msg) => Self::Transport(msg),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SettlementFailure(msg) => write!(f, "settlement failure: {msg}"),
            Self::SettlementTimeout { waited_ms } => {
                write!(f, "settlement timeout after {waited_ms} ms")
            }
            Self::Cancelled => f.write_str("cancelled"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Allocation(msg) => write!(f, "allocation: {msg}"),
        }
    }
}

/// One deposit moving through the sequencer.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode,
)]
pub struct Activation {
    pub id: ActivationId,
    /// Position in the global FIFO order, assigned at creation.
    pub sequence: u64,
    pub source_chain: String,
    pub deposit_id: String,
    pub user: String,
    pub amount: u64,
    pub btc_equivalent: u64,
    pub locked_price: Option<u64>,
    pub status: ActivationStatus,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
    /// Transport reference of a successful settlement.
    pub settlement_ref: Option<String>,
    pub failure: Option<FailureReason>,
    pub allocation: Option<PoolAllocation>,
}

impl Activation {
    pub fn key(&self) -> DepositKey {
        DepositKey::new(self.source_chain.clone(), self.deposit_id.clone())
    }
}

/// The tokenomics state: price ladder position plus the phased reward-pool
/// ledger.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode,
)]
pub struct TokenomicsState {
    /// Cumulative sats charged across all completed activations.
    pub proof_of_faith: u64,
    /// Number of completed activations.
    pub tokens_minted: u64,
    /// Current charge per activation, `price(tokens_minted)`.
    pub next_price: u64,
    /// Charge immediately prior to `next_price`; zero at genesis.
    pub prev_price: u64,
    pub coin_divisor: u64,
    pub coins_released: u64,
    pub coins_remaining: u64,
    /// Price that must be exceeded for the next release to fire.
    pub release_target: u64,
    /// Units the next release would unlock.
    pub next_release_amount: u64,
}

impl TokenomicsState {
    /// The state before any activation.
    pub fn genesis() -> Self {
        Self {
            proof_of_faith: 0,
            tokens_minted: 0,
            next_price: STARTING_PRICE,
            prev_price: 0,
            coin_divisor: INITIAL_COIN_DIVISOR,
            coins_released: 0,
            coins_remaining: TOTAL_SUPPLY,
            release_target: INITIAL_RELEASE_TARGET,
            next_release_amount: TOTAL_SUPPLY / INITIAL_COIN_DIVISOR,
        }
    }

    /// Whether every unit of the reward pool has been released.
    pub fn distribution_complete(&self) -> bool {
        self.coins_remaining == 0
    }

    /// Check the structural invariants that must hold in every state.
    pub fn check_invariants(&self) -> Result<(), PricingError> {
        let total = self
            .coins_released
            .checked_add(self.coins_remaining)
            .ok_or(PricingError::ArithmeticOverflow)?;
        if total != TOTAL_SUPPLY {
            return Err(PricingError::InvalidState(format!(
                "coin ledger sums to {total}, expected {TOTAL_SUPPLY}"
            )));
        }
        if self.tokens_minted > 0 && self.next_price <= self.prev_price {
            return Err(PricingError::InvalidState(format!(
                "price {} not above previous {}",
                self.next_price, self.prev_price
            )));
        }
        if self.coin_divisor == 0 {
            return Err(PricingError::InvalidState("zero coin divisor".into()));
        }
        Ok(())
    }
}

impl Default for TokenomicsState {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Cost deduction and pool split for one settled activation.
///
/// Derived, never mutated after computation.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default, bincode::Encode,
    bincode::Decode,
)]
pub struct PoolAllocation {
    pub oracle_cost: u64,
    pub contract_cost: u64,
    pub network_fee: u64,
    pub total_cost: u64,
    pub net_amount: u64,
    /// Liquidity share applied, in parts-per-billion.
    pub liquidity_ppb: u64,
    pub development_sats: u64,
    pub liquidity_sats: u64,
}

/// Running totals updated on every completed activation.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default, bincode::Encode,
    bincode::Decode,
)]
pub struct PoolTotals {
    /// Sum of BTC equivalents of all completed activations.
    pub system_total_btc: u64,
    pub development_sats: u64,
    pub liquidity_sats: u64,
    /// Oracle, contract and network costs collected.
    pub costs_collected: u64,
}

impl PoolTotals {
    /// Fold one allocation into the totals.
    pub fn absorb(&self, btc_equivalent: u64, alloc: &PoolAllocation) -> Option<Self> {
        Some(Self {
            system_total_btc: self.system_total_btc.checked_add(btc_equivalent)?,
            development_sats: self.development_sats.checked_add(alloc.development_sats)?,
            liquidity_sats: self.liquidity_sats.checked_add(alloc.liquidity_sats)?,
            costs_collected: self.costs_collected.checked_add(alloc.total_cost)?,
        })
    }
}

/// Consistent read of the committed pipeline state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct StateSnapshot {
    pub state: TokenomicsState,
    pub totals: PoolTotals,
}

/// Unix milliseconds now.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
