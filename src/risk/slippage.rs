use serde::{Deserialize, Serialize};

use crate::model::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlippageMeasurement {
    pub leg_index: usize,
    pub market_symbol: String,
    pub expected_price: f64,
    pub executed_price: f64,
    pub slippage_bps: f64,
    pub side: Side,
}

/// Tracks realized vs. quoted fill price per leg, in signed basis points
/// where positive always means "worse for the trader" (spec §4.3).
#[derive(Debug, Clone)]
pub struct SlippageTracker {
    max_slippage_bps: f64,
    measurements: Vec<SlippageMeasurement>,
}

impl SlippageTracker {
    pub fn new(max_slippage_bps: f64) -> Self {
        Self {
            max_slippage_bps,
            measurements: Vec::new(),
        }
    }

    pub fn calculate_slippage(
        &mut self,
        leg_index: usize,
        market_symbol: impl Into<String>,
        expected_price: f64,
        executed_price: f64,
        side: Side,
    ) -> SlippageMeasurement {
        let slippage_bps = match side {
            Side::Buy => (executed_price - expected_price) / expected_price * 10_000.0,
            Side::Sell => (expected_price - executed_price) / expected_price * 10_000.0,
        };

        let measurement = SlippageMeasurement {
            leg_index,
            market_symbol: market_symbol.into(),
            expected_price,
            executed_price,
            slippage_bps,
            side,
        };
        self.measurements.push(measurement.clone());
        measurement
    }

    pub fn check_violation(&self, measurement: &SlippageMeasurement) -> bool {
        measurement.slippage_bps.abs() > self.max_slippage_bps
    }

    pub fn all_measurements(&self) -> &[SlippageMeasurement] {
        &self.measurements
    }

    pub fn max_slippage_bps(&self) -> f64 {
        self.max_slippage_bps
    }

    pub fn reset(&mut self) {
        self.measurements.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_slippage_is_positive_when_fill_is_worse() {
        let mut tracker = SlippageTracker::new(50.0);
        let m = tracker.calculate_slippage(0, "BTC/USDT", 100.0, 100.5, Side::Buy);
        assert!(m.slippage_bps > 0.0);
    }

    #[test]
    fn sell_slippage_is_positive_when_fill_is_worse() {
        let mut tracker = SlippageTracker::new(50.0);
        let m = tracker.calculate_slippage(0, "BTC/USDT", 100.0, 99.5, Side::Sell);
        assert!(m.slippage_bps > 0.0);
    }

    #[test]
    fn violation_uses_absolute_value() {
        let mut tracker = SlippageTracker::new(10.0);
        let m = tracker.calculate_slippage(0, "BTC/USDT", 100.0, 99.0, Side::Buy);
        assert!(m.slippage_bps < 0.0);
        assert!(tracker.check_violation(&m));
    }
}
