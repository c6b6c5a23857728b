//! Protocol constants. All prices and pooled values are in sats, the smallest
//! indivisible unit.

/// Charge for the very first activation slot (`price(0)`).
pub const STARTING_PRICE: u64 = 1;

/// Fixed supply of the reward pool released in phases.
///
/// `coins_released + coins_remaining` equals this value in every state.
pub const TOTAL_SUPPLY: u64 = 999_999_999;

/// Divisor applied to the remaining pool on the first release.
///
/// Halved after every release, so each phase unlocks twice the share of the
/// remaining pool that the previous one did.
pub const INITIAL_COIN_DIVISOR: u64 = 111_111_111;

/// Price the ladder must exceed before the first release fires.
///
/// Each release multiplies the target by the golden ratio.
pub const INITIAL_RELEASE_TARGET: u64 = 369;

/// Once fewer than this many units remain after a release, the whole
/// remainder is released and distribution ends for good.
pub const TERMINAL_REMAINDER: u64 = 2;

/// Scale for percentages expressed in parts-per-billion (1e9 = 100%).
pub const PCT_PRECISION: u64 = 1_000_000_000;

/// Scale for fee rates expressed in basis points (10_000 = 100%).
pub const BPS_PRECISION: u64 = 10_000;

/// Oracle fee charged on every settlement: 0.1%.
pub const DEFAULT_ORACLE_FEE_BPS: u64 = 10;

/// Contract execution fee: 0.2%.
pub const DEFAULT_CONTRACT_FEE_BPS: u64 = 20;

/// Destination network fee: 0.3%.
pub const DEFAULT_NETWORK_FEE_BPS: u64 = 30;

/// Liquidity share of the net amount at zero system BTC: 10%.
pub const DEFAULT_MIN_LIQUIDITY_PPB: u64 = 100_000_000;

/// Asymptotic liquidity share: 95%.
pub const DEFAULT_MAX_LIQUIDITY_PPB: u64 = 950_000_000;

/// Sats per whole BTC.
pub const SATS_PER_BTC: u64 = 100_000_000;

/// System BTC total at which the liquidity curve reaches 90% of its range.
pub const DEFAULT_TARGET_BTC_FOR_MAX_LIQUIDITY: u64 = 100 * SATS_PER_BTC;

/// Upper bound on chain id and deposit id lengths accepted at intake.
pub const MAX_KEY_LEN: usize = 256;
