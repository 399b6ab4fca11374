//! Constant-product AMM math on exact rationals. Never floats on the hot
//! swap-settlement path (spec §9 design note) — `f64` only shows up in
//! `scanner::quality_score`, which is a routing heuristic, not a fill price.

use num_bigint::BigUint;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AmmError {
    #[error("amount_in must be positive")]
    NonPositiveAmountIn,
    #[error("reserves must be positive")]
    NonPositiveReserve,
    #[error("fee must be in [0, 1)")]
    FeeOutOfRange,
}

fn to_rational(v: &BigUint) -> BigRational {
    BigRational::from_integer(v.clone().into())
}

fn validate(amount_in: &BigRational, reserve_in: &BigUint, reserve_out: &BigUint, fee: &BigRational) -> Result<(), AmmError> {
    if amount_in <= &BigRational::zero() {
        return Err(AmmError::NonPositiveAmountIn);
    }
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return Err(AmmError::NonPositiveReserve);
    }
    if fee.is_negative() || fee >= &BigRational::one() {
        return Err(AmmError::FeeOutOfRange);
    }
    Ok(())
}

/// `amount_out = (amount_in * (1-fee) * reserve_out) / (reserve_in + amount_in * (1-fee))`.
pub fn swap_out(
    amount_in: &BigRational,
    reserve_in: &BigUint,
    reserve_out: &BigUint,
    fee: &BigRational,
) -> Result<BigRational, AmmError> {
    validate(amount_in, reserve_in, reserve_out, fee)?;

    let reserve_in_r = to_rational(reserve_in);
    let reserve_out_r = to_rational(reserve_out);
    let in_eff = amount_in * (BigRational::one() - fee);

    Ok((&in_eff * &reserve_out_r) / (&reserve_in_r + &in_eff))
}

/// `impact = 1 - amount_out / (in_eff * reserve_out / reserve_in)`, clamped
/// to `[0, 1]`.
pub fn price_impact(
    amount_in: &BigRational,
    reserve_in: &BigUint,
    reserve_out: &BigUint,
    fee: &BigRational,
) -> Result<BigRational, AmmError> {
    let amount_out = swap_out(amount_in, reserve_in, reserve_out, fee)?;

    let reserve_in_r = to_rational(reserve_in);
    let reserve_out_r = to_rational(reserve_out);
    let in_eff = amount_in * (BigRational::one() - fee);
    let no_impact_out = (&in_eff * &reserve_out_r) / &reserve_in_r;

    if no_impact_out.is_zero() {
        return Ok(BigRational::one());
    }

    let impact = BigRational::one() - (&amount_out / &no_impact_out);
    Ok(clamp_unit(impact))
}

fn clamp_unit(r: BigRational) -> BigRational {
    if r < BigRational::zero() {
        BigRational::zero()
    } else if r > BigRational::one() {
        BigRational::one()
    } else {
        r
    }
}

/// Adaptive multiplier on the base safety multiplier: trades above 5% of
/// the input reserve get +30%, trades below 1% get -10%, otherwise 1x.
pub fn adaptive_multiplier(amount_in: &BigRational, reserve_in: &BigUint, base: &BigRational) -> BigRational {
    let reserve_in_r = to_rational(reserve_in);
    if reserve_in_r.is_zero() {
        return base.clone();
    }
    let fraction = amount_in / &reserve_in_r;
    let five_pct = BigRational::new(5.into(), 100.into());
    let one_pct = BigRational::new(1.into(), 100.into());

    if fraction > five_pct {
        base * BigRational::new(13.into(), 10.into())
    } else if fraction < one_pct {
        base * BigRational::new(9.into(), 10.into())
    } else {
        base.clone()
    }
}

/// Dynamic per-leg slippage tolerance: `impact * adaptive_multiplier`,
/// clamped to `[0.01%, 5%]`.
pub fn slippage_tolerance(
    amount_in: &BigRational,
    reserve_in: &BigUint,
    reserve_out: &BigUint,
    fee: &BigRational,
    base_multiplier: &BigRational,
) -> Result<BigRational, AmmError> {
    let impact = price_impact(amount_in, reserve_in, reserve_out, fee)?;
    let multiplier = adaptive_multiplier(amount_in, reserve_in, base_multiplier);
    let raw = impact * multiplier;

    let min_tol = BigRational::new(1.into(), 10_000.into()); // 0.01%
    let max_tol = BigRational::new(5.into(), 100.into()); // 5%

    Ok(if raw < min_tol {
        min_tol
    } else if raw > max_tol {
        max_tol
    } else {
        raw
    })
}

/// First-order two-leg tolerance: sum of the per-leg tolerances.
pub fn two_leg_tolerance(leg1: &BigRational, leg2: &BigRational) -> BigRational {
    leg1 + leg2
}

/// Binary search for the maximum `amount_in` (over `[0, 0.5 * reserve_in]`)
/// whose price impact does not exceed `cap`.
pub fn max_trade_size_for_slippage_cap(
    reserve_in: &BigUint,
    reserve_out: &BigUint,
    fee: &BigRational,
    cap: &BigRational,
    iterations: u32,
) -> BigRational {
    let mut lo = BigRational::zero();
    let mut hi = to_rational(reserve_in) * BigRational::new(1.into(), 2.into());

    // If even the tiniest positive trade exceeds the cap, there's no
    // feasible size; return zero.
    let epsilon = to_rational(reserve_in) / BigRational::from_integer(BigUint::from(1_000_000_000u64).into());
    match price_impact(&epsilon.max(smallest_positive()), reserve_in, reserve_out, fee) {
        Ok(impact) if &impact > cap => return BigRational::zero(),
        Err(_) => return BigRational::zero(),
        _ => {}
    }

    for _ in 0..iterations {
        let mid = (&lo + &hi) / BigRational::from_integer(2u32.into());
        if mid <= BigRational::zero() {
            break;
        }
        match price_impact(&mid, reserve_in, reserve_out, fee) {
            Ok(impact) if &impact <= cap => lo = mid,
            _ => hi = mid,
        }
    }

    lo
}

fn smallest_positive() -> BigRational {
    BigRational::new(1.into(), 1_000_000_000_000u64.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fee(bps: u64) -> BigRational {
        BigRational::new(bps.into(), 10_000u64.into())
    }

    fn amt(v: u64) -> BigRational {
        BigRational::from_integer(BigUint::from(v).into())
    }

    #[test]
    fn rejects_zero_amount_in() {
        let err = swap_out(&BigRational::zero(), &BigUint::from(100u64), &BigUint::from(100u64), &fee(30))
            .unwrap_err();
        assert_eq!(err, AmmError::NonPositiveAmountIn);
    }

    #[test]
    fn rejects_zero_reserves() {
        let err = swap_out(&amt(10), &BigUint::from(0u64), &BigUint::from(100u64), &fee(30)).unwrap_err();
        assert_eq!(err, AmmError::NonPositiveReserve);
    }

    #[test]
    fn rejects_fee_out_of_range() {
        let err = swap_out(&amt(10), &BigUint::from(100u64), &BigUint::from(100u64), &BigRational::one())
            .unwrap_err();
        assert_eq!(err, AmmError::FeeOutOfRange);
    }

    #[test]
    fn swap_out_matches_hand_computation() {
        // 10000/10000 pool, 0.3% fee, trade 500 in.
        let reserve_in = BigUint::from(10_000u64);
        let reserve_out = BigUint::from(10_000u64);
        let out = swap_out(&amt(500), &reserve_in, &reserve_out, &fee(30)).unwrap();
        // in_eff = 500 * 0.997 = 498.5
        // out = 498.5 * 10000 / (10000 + 498.5) = 4,751,904.76.. / 10498.5 ~ 452.66
        let expected_low = BigRational::new(452.into(), 1.into());
        let expected_high = BigRational::new(453.into(), 1.into());
        assert!(out > expected_low && out < expected_high);
    }

    #[test]
    fn monotone_and_sublinear_in_amount_in() {
        let reserve_in = BigUint::from(10_000u64);
        let reserve_out = BigUint::from(10_000u64);
        let f = fee(30);
        let out1 = swap_out(&amt(100), &reserve_in, &reserve_out, &f).unwrap();
        let out2 = swap_out(&amt(200), &reserve_in, &reserve_out, &f).unwrap();
        let out4 = swap_out(&amt(400), &reserve_in, &reserve_out, &f).unwrap();

        // Monotone: more in -> more out.
        assert!(out2 > out1);
        assert!(out4 > out2);

        // Strictly sub-linear (diminishing marginal output): doubling the
        // input less than doubles the output.
        assert!(&out2 * BigRational::from_integer(2u32.into()) > out4.clone() * BigRational::one());
        assert!(out4 < out2 * BigRational::from_integer(2u32.into()));
    }

    #[test]
    fn price_impact_is_zero_for_infinitesimal_trade_against_fee_free_pool() {
        let reserve_in = BigUint::from(1_000_000_000u64);
        let reserve_out = BigUint::from(1_000_000_000u64);
        let impact = price_impact(&amt(1), &reserve_in, &reserve_out, &BigRational::zero()).unwrap();
        assert!(impact < BigRational::new(1.into(), 1000.into()));
    }

    #[test]
    fn price_impact_clamped_to_unit_interval() {
        let reserve_in = BigUint::from(10u64);
        let reserve_out = BigUint::from(10u64);
        let impact = price_impact(&amt(1_000_000), &reserve_in, &reserve_out, &fee(30)).unwrap();
        assert!(impact <= BigRational::one());
        assert!(impact >= BigRational::zero());
    }

    #[test]
    fn adaptive_multiplier_tiers() {
        let reserve_in = BigUint::from(10_000u64);
        let base = BigRational::new(12.into(), 10.into()); // 1.2x
        let small = adaptive_multiplier(&amt(50), &reserve_in, &base); // 0.5%
        let mid = adaptive_multiplier(&amt(300), &reserve_in, &base); // 3%
        let large = adaptive_multiplier(&amt(600), &reserve_in, &base); // 6%

        assert_eq!(small, &base * BigRational::new(9.into(), 10.into()));
        assert_eq!(mid, base.clone());
        assert_eq!(large, &base * BigRational::new(13.into(), 10.into()));
    }

    #[test]
    fn slippage_tolerance_respects_bounds() {
        let reserve_in = BigUint::from(10_000u64);
        let reserve_out = BigUint::from(10_000u64);
        let base = BigRational::new(12.into(), 10.into());
        let tol = slippage_tolerance(&amt(1), &reserve_in, &reserve_out, &fee(30), &base).unwrap();
        assert!(tol >= BigRational::new(1.into(), 10_000.into()));
        assert!(tol <= BigRational::new(5.into(), 100.into()));
    }

    #[test]
    fn two_leg_tolerance_sums() {
        let a = BigRational::new(1.into(), 100.into());
        let b = BigRational::new(2.into(), 100.into());
        assert_eq!(two_leg_tolerance(&a, &b), BigRational::new(3.into(), 100.into()));
    }

    #[test]
    fn max_trade_size_respects_cap() {
        let reserve_in = BigUint::from(1_000_000u64);
        let reserve_out = BigUint::from(1_000_000u64);
        let cap = BigRational::new(1.into(), 100.into()); // 1%
        let size = max_trade_size_for_slippage_cap(&reserve_in, &reserve_out, &fee(30), &cap, 60);
        let impact_at_size = price_impact(&size, &reserve_in, &reserve_out, &fee(30)).unwrap();
        assert!(impact_at_size <= cap);

        // A noticeably larger size should breach the cap.
        let larger = &size * BigRational::new(3.into(), 2.into());
        let impact_larger = price_impact(&larger, &reserve_in, &reserve_out, &fee(30)).unwrap();
        assert!(impact_larger > cap);
    }
}
