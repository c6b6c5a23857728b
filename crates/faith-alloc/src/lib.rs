//! # faith-alloc: Cost deduction and pool split.
//!
//! All calculations use integer arithmetic only for determinism.
//!
//! - **Costs**: oracle, contract and network fees are charged in basis points
//!   of the BTC-equivalent amount, each rounded up to a whole sat.
//! - **Saturating liquidity curve**: the liquidity share of the net amount
//!   rises from `min` at zero system BTC towards `max`, reaching 90% of the
//!   range at the configured target BTC level.
//! - **Exact split**: the liquidity pool takes the floored share and the
//!   development pool absorbs the remainder, so the two always sum to the net
//!   amount.

pub mod allocator;
pub mod curve;

pub use allocator::{CostAllocator, CostBreakdown, FeeSchedule, LiquidityCurve, PoolSplit};
pub use curve::CURVE_PRECISION;
