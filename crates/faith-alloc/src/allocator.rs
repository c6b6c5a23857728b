//! Cost allocator: fee deduction and the two-pool split.
//!
//! Pure functions over a fixed configuration. No shared state.

use serde::{Deserialize, Serialize};

use faith_core::constants::{
    BPS_PRECISION, DEFAULT_CONTRACT_FEE_BPS, DEFAULT_MAX_LIQUIDITY_PPB, DEFAULT_MIN_LIQUIDITY_PPB,
    DEFAULT_NETWORK_FEE_BPS, DEFAULT_ORACLE_FEE_BPS, DEFAULT_TARGET_BTC_FOR_MAX_LIQUIDITY,
    PCT_PRECISION,
};
use faith_core::error::AllocationError;
use faith_core::types::PoolAllocation;

use crate::curve::{saturation, scaled_ratio, CURVE_PRECISION};

/// Fee rates in basis points of the BTC-equivalent amount.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct FeeSchedule {
    pub oracle_bps: u64,
    pub contract_bps: u64,
    pub network_bps: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            oracle_bps: DEFAULT_ORACLE_FEE_BPS,
            contract_bps: DEFAULT_CONTRACT_FEE_BPS,
            network_bps: DEFAULT_NETWORK_FEE_BPS,
        }
    }
}

impl FeeSchedule {
    pub fn total_bps(&self) -> u64 {
        self.oracle_bps
            .saturating_add(self.contract_bps)
            .saturating_add(self.network_bps)
    }

    pub fn validate(&self) -> Result<(), AllocationError> {
        if self.total_bps() >= BPS_PRECISION {
            return Err(AllocationError::InvalidFeeSchedule(format!(
                "fees total {} bps, must stay below {BPS_PRECISION}",
                self.total_bps()
            )));
        }
        Ok(())
    }
}

/// Shape of the saturating liquidity curve.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LiquidityCurve {
    /// Liquidity share at zero system BTC, in parts-per-billion.
    pub min_ppb: u64,
    /// Asymptotic liquidity share, in parts-per-billion.
    pub max_ppb: u64,
    /// System BTC (sats) at which the curve covers 90% of its range.
    pub target_btc: u64,
}

impl Default for LiquidityCurve {
    fn default() -> Self {
        Self {
            min_ppb: DEFAULT_MIN_LIQUIDITY_PPB,
            max_ppb: DEFAULT_MAX_LIQUIDITY_PPB,
            target_btc: DEFAULT_TARGET_BTC_FOR_MAX_LIQUIDITY,
        }
    }
}

impl LiquidityCurve {
    pub fn validate(&self) -> Result<(), AllocationError> {
        if self.min_ppb > self.max_ppb || self.max_ppb > PCT_PRECISION {
            return Err(AllocationError::InvalidCurve(format!(
                "bounds {}..{} ppb out of order or above {PCT_PRECISION}",
                self.min_ppb, self.max_ppb
            )));
        }
        if self.target_btc == 0 {
            return Err(AllocationError::InvalidCurve("zero target BTC".into()));
        }
        Ok(())
    }
}

/// Fee deduction for one BTC-equivalent amount.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CostBreakdown {
    pub oracle_cost: u64,
    pub contract_cost: u64,
    pub network_fee: u64,
    pub total_cost: u64,
    pub net_amount: u64,
}

/// Net amount divided between the two destination pools.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PoolSplit {
    pub liquidity_ppb: u64,
    pub development_sats: u64,
    pub liquidity_sats: u64,
}

/// Computes costs and pool splits for settled activations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CostAllocator {
    fees: FeeSchedule,
    curve: LiquidityCurve,
}

/// `ceil(amount * bps / BPS_PRECISION)`. Never exceeds `amount` for
/// `bps <= BPS_PRECISION`.
fn fee(amount: u64, bps: u64) -> u64 {
    let scaled = amount as u128 * bps as u128;
    let fee = scaled.div_ceil(BPS_PRECISION as u128);
    u64::try_from(fee).unwrap_or(u64::MAX)
}

impl CostAllocator {
    /// Create an allocator, rejecting inconsistent configuration.
    pub fn new(fees: FeeSchedule, curve: LiquidityCurve) -> Result<Self, AllocationError> {
        fees.validate()?;
        curve.validate()?;
        Ok(Self { fees, curve })
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    pub fn curve(&self) -> &LiquidityCurve {
        &self.curve
    }

    /// Fee deduction with the net amount clamped at zero.
    pub fn cost_breakdown(&self, btc_amount: u64) -> CostBreakdown {
        let oracle_cost = fee(btc_amount, self.fees.oracle_bps);
        let contract_cost = fee(btc_amount, self.fees.contract_bps);
        let network_fee = fee(btc_amount, self.fees.network_bps);
        let total_cost = oracle_cost
            .saturating_add(contract_cost)
            .saturating_add(network_fee);
        CostBreakdown {
            oracle_cost,
            contract_cost,
            network_fee,
            total_cost,
            net_amount: btc_amount.saturating_sub(total_cost),
        }
    }

    /// Fee deduction, failing when nothing would be left to split.
    ///
    /// Run before an activation is queued: a zero-net deposit must never
    /// consume a price slot.
    pub fn calculate_costs(&self, btc_amount: u64) -> Result<CostBreakdown, AllocationError> {
        let costs = self.cost_breakdown(btc_amount);
        if costs.net_amount == 0 {
            return Err(AllocationError::InsufficientAmount {
                amount: btc_amount,
                total_cost: costs.total_cost,
            });
        }
        Ok(costs)
    }

    /// Liquidity share in parts-per-billion for the given system BTC total.
    ///
    /// `min + (max - min) * (1 - e^(-k * total))` with
    /// `k = -ln(0.1) / target_btc`.
    pub fn liquidity_percentage(&self, system_total_btc: u64) -> u64 {
        let sat = saturation(scaled_ratio(system_total_btc, self.curve.target_btc));
        let range = self.curve.max_ppb - self.curve.min_ppb;
        let lift = range as u128 * sat as u128 / CURVE_PRECISION as u128;
        self.curve.min_ppb + lift as u64
    }

    /// Development share in parts-per-billion, the complement of liquidity.
    pub fn development_percentage(&self, system_total_btc: u64) -> u64 {
        PCT_PRECISION - self.liquidity_percentage(system_total_btc)
    }

    /// Split a net amount. The development pool absorbs rounding so the two
    /// pools sum exactly to `net_amount`.
    pub fn split_pools(&self, net_amount: u64, system_total_btc: u64) -> PoolSplit {
        let liquidity_ppb = self.liquidity_percentage(system_total_btc);
        let liquidity_sats =
            (net_amount as u128 * liquidity_ppb as u128 / PCT_PRECISION as u128) as u64;
        PoolSplit {
            liquidity_ppb,
            development_sats: net_amount - liquidity_sats,
            liquidity_sats,
        }
    }

    /// Full allocation of a settled BTC-equivalent amount.
    pub fn allocate(
        &self,
        btc_amount: u64,
        system_total_btc: u64,
    ) -> Result<PoolAllocation, AllocationError> {
        let costs = self.calculate_costs(btc_amount)?;
        let split = self.split_pools(costs.net_amount, system_total_btc);
        tracing::trace!(
            btc_amount,
            system_total_btc,
            net = costs.net_amount,
            liquidity_ppb = split.liquidity_ppb,
            "allocated settlement"
        );
        Ok(PoolAllocation {
            oracle_cost: costs.oracle_cost,
            contract_cost: costs.contract_cost,
            network_fee: costs.network_fee,
            total_cost: costs.total_cost,
            net_amount: costs.net_amount,
            liquidity_ppb: split.liquidity_ppb,
            development_sats: split.development_sats,
            liquidity_sats: split.liquidity_sats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn alloc() -> CostAllocator {
        CostAllocator::default()
    }

    // ------------------------------------------------------------------
    // configuration
    // ------------------------------------------------------------------

    #[test]
    fn default_config_is_valid() {
        assert!(CostAllocator::new(FeeSchedule::default(), LiquidityCurve::default()).is_ok());
    }

    #[test]
    fn fees_at_one_hundred_percent_rejected() {
        let fees = FeeSchedule {
            oracle_bps: 5_000,
            contract_bps: 5_000,
            network_bps: 0,
        };
        assert!(matches!(
            CostAllocator::new(fees, LiquidityCurve::default()),
            Err(AllocationError::InvalidFeeSchedule(_))
        ));
    }

    #[test]
    fn inverted_curve_rejected() {
        let curve = LiquidityCurve {
            min_ppb: 900_000_000,
            max_ppb: 100_000_000,
            ..LiquidityCurve::default()
        };
        assert!(matches!(
            CostAllocator::new(FeeSchedule::default(), curve),
            Err(AllocationError::InvalidCurve(_))
        ));
    }

    #[test]
    fn zero_target_rejected() {
        let curve = LiquidityCurve {
            target_btc: 0,
            ..LiquidityCurve::default()
        };
        assert!(CostAllocator::new(FeeSchedule::default(), curve).is_err());
    }

    // ------------------------------------------------------------------
    // costs
    // ------------------------------------------------------------------

    #[test]
    fn default_schedule_costs() {
        let c = alloc().calculate_costs(1_000_000).unwrap();
        assert_eq!(c.oracle_cost, 1_000);
        assert_eq!(c.contract_cost, 2_000);
        assert_eq!(c.network_fee, 3_000);
        assert_eq!(c.total_cost, 6_000);
        assert_eq!(c.net_amount, 994_000);
    }

    #[test]
    fn three_percent_network_schedule() {
        let fees = FeeSchedule {
            oracle_bps: 10,
            contract_bps: 20,
            network_bps: 300,
        };
        let a = CostAllocator::new(fees, LiquidityCurve::default()).unwrap();
        let c = a.calculate_costs(1_000_000).unwrap();
        assert_eq!(c.oracle_cost, 1_000);
        assert_eq!(c.contract_cost, 2_000);
        assert_eq!(c.network_fee, 30_000);
        assert_eq!(c.total_cost, 33_000);
        assert_eq!(c.net_amount, 967_000);
    }

    #[test]
    fn fees_round_up() {
        // 0.1% of 1 sat is 0.001, charged as 1.
        let c = alloc().cost_breakdown(1);
        assert_eq!(c.oracle_cost, 1);
        assert_eq!(c.contract_cost, 1);
        assert_eq!(c.network_fee, 1);
        assert_eq!(c.total_cost, 3);
        assert_eq!(c.net_amount, 0);
    }

    #[test]
    fn dust_is_insufficient() {
        assert_eq!(
            alloc().calculate_costs(3),
            Err(AllocationError::InsufficientAmount {
                amount: 3,
                total_cost: 3
            })
        );
        assert!(alloc().calculate_costs(0).is_err());
        assert!(alloc().calculate_costs(4).is_ok());
    }

    #[test]
    fn huge_amount_does_not_overflow() {
        let c = alloc().cost_breakdown(u64::MAX);
        assert_eq!(c.net_amount, u64::MAX - c.total_cost);
    }

    // ------------------------------------------------------------------
    // curve and split
    // ------------------------------------------------------------------

    #[test]
    fn liquidity_at_zero_is_min() {
        assert_eq!(alloc().liquidity_percentage(0), DEFAULT_MIN_LIQUIDITY_PPB);
    }

    #[test]
    fn liquidity_at_target_is_ninety_percent_of_range() {
        let a = alloc();
        let expected = DEFAULT_MIN_LIQUIDITY_PPB
            + (DEFAULT_MAX_LIQUIDITY_PPB - DEFAULT_MIN_LIQUIDITY_PPB) * 9 / 10;
        assert_eq!(
            a.liquidity_percentage(DEFAULT_TARGET_BTC_FOR_MAX_LIQUIDITY),
            expected
        );
        assert_eq!(expected, 865_000_000);
    }

    #[test]
    fn liquidity_never_reaches_max() {
        let a = alloc();
        let far = a.liquidity_percentage(u64::MAX);
        assert!(far < DEFAULT_MAX_LIQUIDITY_PPB);
        assert!(far > 949_000_000);
    }

    #[test]
    fn liquidity_follows_exponential_formula() {
        let a = alloc();
        let min = DEFAULT_MIN_LIQUIDITY_PPB as f64;
        let range = (DEFAULT_MAX_LIQUIDITY_PPB - DEFAULT_MIN_LIQUIDITY_PPB) as f64;
        let target = DEFAULT_TARGET_BTC_FOR_MAX_LIQUIDITY;
        let k = -(0.1f64).ln() / target as f64;
        for i in 0..=4_000u64 {
            let total = i * target / 1_000;
            let want = min + range * (1.0 - (-k * total as f64).exp());
            let got = a.liquidity_percentage(total) as f64;
            assert!(
                (got - want).abs() <= range * 1e-4,
                "total {total}: got {got} ppb, formula {want} ppb"
            );
        }
    }

    #[test]
    fn split_near_steepest_point_matches_formula() {
        // 0.061 x target on a 1 BTC net amount.
        let a = alloc();
        let total = DEFAULT_TARGET_BTC_FOR_MAX_LIQUIDITY / 1_000 * 61;
        let net = 100_000_000u64;
        let k = -(0.1f64).ln() / DEFAULT_TARGET_BTC_FOR_MAX_LIQUIDITY as f64;
        let pct = DEFAULT_MIN_LIQUIDITY_PPB as f64
            + (DEFAULT_MAX_LIQUIDITY_PPB - DEFAULT_MIN_LIQUIDITY_PPB) as f64
                * (1.0 - (-k * total as f64).exp());
        let want = net as f64 * pct / PCT_PRECISION as f64;
        let s = a.split_pools(net, total);
        assert!((s.liquidity_sats as f64 - want).abs() < 2.0);
    }

    #[test]
    fn development_is_complement() {
        let a = alloc();
        for total in [0, 1, 50 * 100_000_000, u64::MAX] {
            assert_eq!(
                a.liquidity_percentage(total) + a.development_percentage(total),
                PCT_PRECISION
            );
        }
    }

    #[test]
    fn split_at_zero_system_btc() {
        let s = alloc().split_pools(1_000_000, 0);
        assert_eq!(s.liquidity_ppb, DEFAULT_MIN_LIQUIDITY_PPB);
        assert_eq!(s.liquidity_sats, 100_000);
        assert_eq!(s.development_sats, 900_000);
    }

    #[test]
    fn split_at_target() {
        let s = alloc().split_pools(1_000_000, DEFAULT_TARGET_BTC_FOR_MAX_LIQUIDITY);
        assert_eq!(s.liquidity_sats, 865_000);
        assert_eq!(s.development_sats, 135_000);
    }

    #[test]
    fn split_remainder_goes_to_development() {
        // 10% of 7 sats is 0.7, floored to 0.
        let s = alloc().split_pools(7, 0);
        assert_eq!(s.liquidity_sats, 0);
        assert_eq!(s.development_sats, 7);
    }

    #[test]
    fn allocate_combines_costs_and_split() {
        let p = alloc().allocate(1_000_000, 0).unwrap();
        assert_eq!(p.total_cost, 6_000);
        assert_eq!(p.net_amount, 994_000);
        assert_eq!(p.liquidity_sats, 99_400);
        assert_eq!(p.development_sats, 894_600);
        assert_eq!(p.liquidity_ppb, DEFAULT_MIN_LIQUIDITY_PPB);
    }

    #[test]
    fn allocate_rejects_dust() {
        assert!(matches!(
            alloc().allocate(2, 0),
            Err(AllocationError::InsufficientAmount { .. })
        ));
    }

    // --- proptest ---

    proptest! {
        #[test]
        fn cost_identities(x in 0u64..=u64::MAX / 2) {
            let c = alloc().cost_breakdown(x);
            prop_assert_eq!(c.total_cost, c.oracle_cost + c.contract_cost + c.network_fee);
            prop_assert_eq!(c.net_amount, x.saturating_sub(c.total_cost));
        }

        #[test]
        fn split_is_exact(net in 0u64..=u64::MAX, total in 0u64..=u64::MAX) {
            let s = alloc().split_pools(net, total);
            prop_assert_eq!(s.development_sats + s.liquidity_sats, net);
        }

        #[test]
        fn liquidity_monotonic_and_bounded(a in 0u64..1_000 * 100_000_000, b in 0u64..1_000 * 100_000_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let al = alloc();
            prop_assert!(al.liquidity_percentage(lo) <= al.liquidity_percentage(hi));
            prop_assert!(al.liquidity_percentage(hi) >= DEFAULT_MIN_LIQUIDITY_PPB);
            prop_assert!(al.liquidity_percentage(hi) < DEFAULT_MAX_LIQUIDITY_PPB);
        }
    }
}
