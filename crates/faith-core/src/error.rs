//! Error types for the Faith settlement pipeline.
use thiserror::Error;

/// Rejections raised before an activation is queued. These never consume a
/// price slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("empty field: {0}")] EmptyField(&'static str),
    #[error("{field} too long: {len} > {max}")] FieldTooLong { field: &'static str, len: usize, max: usize },
    #[error("zero deposit amount")] ZeroAmount,
    #[error("zero BTC equivalent")] ZeroBtcEquivalent,
    #[error("duplicate deposit: {0}")] DuplicateDeposit(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("insufficient amount: {amount} sats does not cover {total_cost} sats of costs")] InsufficientAmount { amount: u64, total_cost: u64 },
    #[error("invalid fee schedule: {0}")] InvalidFeeSchedule(String),
    #[error("invalid liquidity curve: {0}")] InvalidCurve(String),
    #[error("arithmetic overflow")] ArithmeticOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    #[error("invalid state: {0}")] InvalidState(String),
    #[error("arithmetic overflow")] ArithmeticOverflow,
}

/// Outcomes that send an in-flight activation down the rollback path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("settlement timed out after {waited_ms} ms")] Timeout { waited_ms: u64 },
    #[error("settlement failed: {0}")] Failure(String),
    #[error("cancelled")] Cancelled,
    #[error("transport: {0}")] Transport(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("backend: {0}")] Backend(String),
    #[error("corrupt record: {0}")] Corrupt(String),
    #[error("unknown activation: {0}")] UnknownActivation(String),
    #[error("commit out of order: expected {expected}, got {got}")] OutOfOrder { expected: u64, got: u64 },
}

#[derive(Error, Debug)]
pub enum FaithError {
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error(transparent)] Allocation(#[from] AllocationError),
    #[error(transparent)] Pricing(#[from] PricingError),
    #[error(transparent)] Settlement(#[from] SettlementError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error("unknown activation: {0}")] UnknownActivation(String),
    #[error("activation {0} already resolved")] AlreadyResolved(String),
    #[error("deposit source: {0}")] Source(String),
    #[error("price feed: {0}")] PriceFeed(String),
    #[error("config: {0}")] Config(String),
    #[error("sequencer is shutting down")] ShuttingDown,
}
