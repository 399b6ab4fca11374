//! Per-leg venue-minimum validation, run once before a cycle leaves
//! VALIDATING (spec §4.7).

use std::collections::HashMap;

use crate::model::{resolve_direction, Cycle, Market};

#[derive(Debug, Clone)]
pub struct LegPlan {
    pub symbol: String,
    pub side: crate::model::Side,
}

#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Valid(Vec<LegPlan>),
    /// `leg` is the 0-based index of the first leg that failed.
    Invalid { leg: usize, reason: String },
}

/// Resolves direction for each of the three legs and checks that the
/// initial amount (propagated forward using each market's own price-free
/// minimums) clears `min_amount`/`min_notional`. Real fill-size clearance
/// at actual market prices is re-checked per leg during execution; this
/// pass only rejects cycles that could never clear even optimistically.
pub fn validate_cycle(cycle: &Cycle, initial_amount: f64, markets: &HashMap<String, Market>) -> ValidationOutcome {
    let mut plans = Vec::with_capacity(3);
    let mut amount = initial_amount;

    for step in 0..3 {
        let source = cycle.source_at(step);
        let target = cycle.target_at(step);

        let Some((symbol, side)) = resolve_direction(markets, source, target) else {
            return ValidationOutcome::Invalid {
                leg: step,
                reason: format!("no market for {source}->{target}"),
            };
        };

        let Some(market) = markets.get(&symbol) else {
            return ValidationOutcome::Invalid { leg: step, reason: format!("market {symbol} not loaded") };
        };

        if amount < market.min_amount {
            return ValidationOutcome::Invalid {
                leg: step,
                reason: format!("{amount} below venue minimum {} for {symbol}", market.min_amount),
            };
        }

        plans.push(LegPlan { symbol, side });
        // Optimistic 1:1 carry-forward; execution re-derives the real amount
        // from the fill once a price is known.
        amount = amount.max(market.min_amount);
    }

    ValidationOutcome::Valid(plans)
}
