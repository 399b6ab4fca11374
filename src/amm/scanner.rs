//! Pool quality scoring used to rank candidate AMM pools for recovery
//! routing. Unlike `math`, this is a heuristic over USD-denominated
//! estimates, so it works in `f64` rather than exact rationals.

use num_traits::ToPrimitive;

use super::pool::Pool;

/// 0-100 composite score: liquidity (0-40) + fee (0-20) + balance (0-20) +
/// stability (0-20).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScore {
    pub liquidity: f64,
    pub fee: f64,
    pub balance: f64,
    pub stability: f64,
}

impl QualityScore {
    pub fn total(&self) -> f64 {
        self.liquidity + self.fee + self.balance + self.stability
    }
}

/// `reserve_base_usd` is the USD value of `pool.reserve_base()`, supplied by
/// the caller (this module has no price oracle of its own).
pub fn quality_score(pool: &Pool, reserve_base_usd: f64) -> QualityScore {
    QualityScore {
        liquidity: liquidity_score(reserve_base_usd),
        fee: fee_score(pool),
        balance: balance_score(pool),
        stability: stability_score(pool),
    }
}

fn liquidity_score(usd: f64) -> f64 {
    if usd >= 1_000_000.0 {
        40.0
    } else if usd >= 500_000.0 {
        35.0
    } else if usd >= 100_000.0 {
        30.0
    } else if usd >= 50_000.0 {
        25.0
    } else if usd >= 10_000.0 {
        20.0
    } else {
        10.0
    }
}

fn fee_score(pool: &Pool) -> f64 {
    let bps = pool.fee.to_f64().unwrap_or(1.0) * 10_000.0;
    if bps <= 10.0 {
        20.0
    } else if bps <= 20.0 {
        18.0
    } else if bps <= 30.0 {
        15.0
    } else if bps <= 50.0 {
        10.0
    } else {
        5.0
    }
}

/// `20 / (1 + |log10(r0/r1)|)`: peaks at perfectly balanced reserves by
/// value, decays as the ratio skews in either direction.
fn balance_score(pool: &Pool) -> f64 {
    let r0 = pool.reserve0.to_f64().unwrap_or(0.0);
    let r1 = pool.reserve1.to_f64().unwrap_or(0.0);
    if r0 <= 0.0 || r1 <= 0.0 {
        return 0.0;
    }
    let log_ratio = (r0 / r1).log10().abs();
    20.0 / (1.0 + log_ratio)
}

fn stability_score(pool: &Pool) -> f64 {
    let r0 = pool.reserve0.to_f64().unwrap_or(0.0);
    let r1 = pool.reserve1.to_f64().unwrap_or(0.0);
    if r0 <= 0.0 || r1 <= 0.0 {
        return 0.0;
    }
    let ratio = (r0 / r1).max(r1 / r0);
    if ratio < 10.0 {
        20.0
    } else if ratio < 50.0 {
        15.0
    } else if ratio < 100.0 {
        10.0
    } else if ratio < 1000.0 {
        5.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;
    use num_rational::BigRational;

    fn pool(reserve0: u64, reserve1: u64, fee_bps: u64) -> Pool {
        Pool::normalized(
            "testdex",
            "0xabc",
            "BASE",
            "QUOTE",
            BigUint::from(reserve0),
            BigUint::from(reserve1),
            BigRational::new(fee_bps.into(), 10_000u64.into()),
            "BASE",
            "QUOTE",
        )
    }

    #[test]
    fn liquidity_tiers_in_order() {
        assert_eq!(liquidity_score(2_000_000.0), 40.0);
        assert_eq!(liquidity_score(600_000.0), 35.0);
        assert_eq!(liquidity_score(150_000.0), 30.0);
        assert_eq!(liquidity_score(60_000.0), 25.0);
        assert_eq!(liquidity_score(20_000.0), 20.0);
        assert_eq!(liquidity_score(1_000.0), 10.0);
    }

    #[test]
    fn fee_tiers_in_order() {
        let p5 = pool(1_000, 1_000, 5);
        let p15 = pool(1_000, 1_000, 15);
        let p25 = pool(1_000, 1_000, 25);
        let p40 = pool(1_000, 1_000, 40);
        let p100 = pool(1_000, 1_000, 100);
        assert_eq!(fee_score(&p5), 20.0);
        assert_eq!(fee_score(&p15), 18.0);
        assert_eq!(fee_score(&p25), 15.0);
        assert_eq!(fee_score(&p40), 10.0);
        assert_eq!(fee_score(&p100), 5.0);
    }

    #[test]
    fn balance_peaks_when_perfectly_matched() {
        let balanced = pool(1_000, 1_000, 30);
        let skewed = pool(10_000, 100, 30);
        assert_eq!(balance_score(&balanced), 20.0);
        assert!(balance_score(&skewed) < 20.0);
    }

    #[test]
    fn stability_tiers_in_order() {
        let calm = pool(1_000, 500, 30); // ratio 2
        let wobbly = pool(100_000, 500, 30); // ratio 200
        let chaotic = pool(10_000_000, 500, 30); // ratio 20000
        assert_eq!(stability_score(&calm), 20.0);
        assert_eq!(stability_score(&wobbly), 5.0);
        assert_eq!(stability_score(&chaotic), 0.0);
    }

    #[test]
    fn total_is_additive_and_bounded() {
        let p = pool(1_000_000, 1_000_000, 5);
        let score = quality_score(&p, 2_000_000.0);
        assert!(score.total() <= 100.0);
        assert!(score.total() > 0.0);
        assert_eq!(
            score.total(),
            score.liquidity + score.fee + score.balance + score.stability
        );
    }
}
