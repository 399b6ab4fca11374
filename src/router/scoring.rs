//! Path scoring (spec §4.8): weighted combination of slippage headroom,
//! liquidity confidence, hop count, and a composite risk term.

#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    pub w_slip: f64,
    pub w_liq: f64,
    pub w_hop: f64,
    pub w_risk: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            w_slip: 0.4,
            w_liq: 0.25,
            w_hop: 0.15,
            w_risk: 0.2,
        }
    }
}

/// `confidence = 0.95^hops`: liquidity confidence decays geometrically
/// with path length, standing in for compounding execution uncertainty.
pub fn confidence(hops: usize) -> f64 {
    0.95f64.powi(hops as i32)
}

pub fn risk(hops: usize, max_hops: usize, slippage_total_bps: f64, cap_bps: f64, confidence: f64) -> f64 {
    let hop_term = if max_hops == 0 { 0.0 } else { hops as f64 / max_hops as f64 };
    let slip_term = if cap_bps <= 0.0 { 0.0 } else { (slippage_total_bps / cap_bps).min(1.0) };
    0.3 * hop_term + 0.5 * slip_term + 0.2 * (1.0 - confidence)
}

pub fn score(weights: ScoringWeights, hops: usize, max_hops: usize, slippage_total_bps: f64, cap_bps: f64) -> f64 {
    let conf = confidence(hops);
    let r = risk(hops, max_hops, slippage_total_bps, cap_bps, conf);
    let slip_term = if cap_bps <= 0.0 { 0.0 } else { (1.0 - slippage_total_bps / cap_bps).max(0.0) };
    let hop_term = if max_hops == 0 { 0.0 } else { (1.0 - hops as f64 / max_hops as f64).max(0.0) };
    weights.w_slip * slip_term + weights.w_liq * conf + weights.w_hop * hop_term + weights.w_risk * (1.0 - r)
}

/// Approximates per-leg slippage from the venue's top-of-book ticker
/// volume, since the venue contract exposes only top-of-book quotes, not
/// a full order book to integrate against. Uses the same impact-curve
/// shape as the paper/backtest fill simulators (spec §4.1).
pub fn estimate_leg_slippage_bps(notional_usd: f64, ticker_volume_base: f64, ticker_price: f64, impact_coef: f64) -> f64 {
    let volume_usd = (ticker_volume_base * ticker_price).max(1.0);
    (impact_coef * notional_usd / volume_usd * 10_000.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_decays_with_hops() {
        assert!(confidence(3) < confidence(1));
        assert_eq!(confidence(0), 1.0);
    }

    #[test]
    fn score_prefers_fewer_hops_and_lower_slippage() {
        let weights = ScoringWeights::default();
        let short = score(weights, 1, 3, 10.0, 100.0);
        let long = score(weights, 3, 3, 80.0, 100.0);
        assert!(short > long);
    }

    #[test]
    fn risk_increases_with_slippage_ratio() {
        let low = risk(1, 3, 10.0, 100.0, confidence(1));
        let high = risk(1, 3, 90.0, 100.0, confidence(1));
        assert!(high > low);
    }
}
