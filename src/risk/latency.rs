use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::model::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyMeasurement {
    pub leg_index: usize,
    pub market_symbol: String,
    pub start_time: f64,
    pub end_time: f64,
    pub latency_ms: f64,
    pub side: Side,
}

/// Tracks per-leg execution latency against a fixed ceiling (spec §4.3).
#[derive(Debug, Clone)]
pub struct LatencyMonitor {
    max_leg_latency_ms: f64,
    measurements: Vec<LatencyMeasurement>,
}

fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

impl LatencyMonitor {
    pub fn new(max_leg_latency_ms: f64) -> Self {
        Self {
            max_leg_latency_ms,
            measurements: Vec::new(),
        }
    }

    pub fn start_measurement(&self) -> f64 {
        unix_now()
    }

    pub fn end_measurement(&mut self, leg_index: usize, market_symbol: impl Into<String>, start_time: f64, side: Side) -> LatencyMeasurement {
        let end_time = unix_now();
        let measurement = LatencyMeasurement {
            leg_index,
            market_symbol: market_symbol.into(),
            start_time,
            end_time,
            latency_ms: (end_time - start_time) * 1000.0,
            side,
        };
        self.measurements.push(measurement.clone());
        measurement
    }

    pub fn check_violation(&self, measurement: &LatencyMeasurement) -> bool {
        measurement.latency_ms > self.max_leg_latency_ms
    }

    pub fn all_measurements(&self) -> &[LatencyMeasurement] {
        &self.measurements
    }

    pub fn max_leg_latency_ms(&self) -> f64 {
        self.max_leg_latency_ms
    }

    pub fn reset(&mut self) {
        self.measurements.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_latency_above_ceiling() {
        let mut monitor = LatencyMonitor::new(100.0);
        let start = monitor.start_measurement();
        let measurement = monitor.end_measurement(0, "BTC/USDT", start - 0.2, Side::Buy);
        assert!(monitor.check_violation(&measurement));
    }

    #[test]
    fn does_not_flag_latency_within_ceiling() {
        let mut monitor = LatencyMonitor::new(10_000.0);
        let start = monitor.start_measurement();
        let measurement = monitor.end_measurement(0, "BTC/USDT", start, Side::Sell);
        assert!(!monitor.check_violation(&measurement));
    }

    #[test]
    fn reset_clears_measurements() {
        let mut monitor = LatencyMonitor::new(10_000.0);
        let start = monitor.start_measurement();
        monitor.end_measurement(0, "BTC/USDT", start, Side::Buy);
        assert_eq!(monitor.all_measurements().len(), 1);
        monitor.reset();
        assert!(monitor.all_measurements().is_empty());
    }
}
