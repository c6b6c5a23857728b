//! Fixed-point saturation curve.
//!
//! The liquidity curve is `1 - e^(-k x)` with `k = ln(10) / target`, which
//! is the same as `1 - 10^(-u)` for `u = x / target`. `10^(-u)` is evaluated
//! as `e^(-u ln 10)` in 18-decimal fixed point: the exponent is split into
//! `n ln 2 + r` with `0 <= r < ln 2`, `e^(-r)` comes from its Taylor series
//! and the `2^(-n)` factor is a shift. The result is rounded to
//! parts-per-billion, so it is exact at every whole `u` (90% at `u = 1`).
//! The curve never reaches 100%; it tops out one ppb short.

/// Precision of curve inputs and outputs (parts-per-billion).
pub const CURVE_PRECISION: u64 = 1_000_000_000;

/// Fixed-point scale used while evaluating the exponential.
const FIXED_ONE: u128 = 1_000_000_000_000_000_000;

/// `ln(10) * FIXED_ONE`.
const LN_10: u128 = 2_302_585_092_994_045_684;

/// `ln(2) * FIXED_ONE`.
const LN_2: u128 = 693_147_180_559_945_309;

/// Past `u = 32` the remaining `10^(-u)` is far below one ppb.
const SATURATION_LIMIT: u128 = 32 * CURVE_PRECISION as u128;

/// Largest value [`saturation`] returns.
pub const SATURATION_MAX: u64 = CURVE_PRECISION - 1;

/// Scale `value / target` into curve input units.
///
/// Returns `u128::MAX` for a zero target so the curve reads as saturated.
pub fn scaled_ratio(value: u64, target: u64) -> u128 {
    if target == 0 {
        return u128::MAX;
    }
    value as u128 * CURVE_PRECISION as u128 / target as u128
}

/// `e^(-x)` for `x` in `FIXED_ONE` units, result in `FIXED_ONE` units.
fn exp_neg(x: u128) -> u128 {
    let halvings = x / LN_2;
    if halvings >= 127 {
        return 0;
    }
    let r = x - halvings * LN_2;

    // Alternating series; terms shrink by at least r/k < 0.7 each step.
    let mut term = FIXED_ONE;
    let mut even = FIXED_ONE;
    let mut odd = 0u128;
    let mut k = 1u128;
    while term > 0 {
        term = term * r / (k * FIXED_ONE);
        if k % 2 == 1 {
            odd += term;
        } else {
            even += term;
        }
        k += 1;
    }
    (even - odd) >> halvings
}

/// Compute `(1 - 10^(-u)) * CURVE_PRECISION`, rounded to nearest.
///
/// `u_scaled` is `u * CURVE_PRECISION`. Returns a value in
/// `[0, SATURATION_MAX]`.
pub fn saturation(u_scaled: u128) -> u64 {
    if u_scaled >= SATURATION_LIMIT {
        return SATURATION_MAX;
    }
    let x = u_scaled * LN_10 / CURVE_PRECISION as u128;
    let unit = FIXED_ONE / CURVE_PRECISION as u128;
    let tail = (exp_neg(x) + unit / 2) / unit;
    (CURVE_PRECISION - tail as u64).min(SATURATION_MAX)
}
