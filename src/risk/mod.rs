pub mod cooldown;
pub mod latency;
pub mod slippage;
pub mod violations;

use std::path::PathBuf;

use crate::model::Side;

pub use cooldown::{CooldownError, CooldownRegistry};
pub use latency::{LatencyMeasurement, LatencyMonitor};
pub use slippage::{SlippageMeasurement, SlippageTracker};
pub use violations::{RiskControlViolation, ViolationJournal, ViolationType};

#[derive(Debug, Clone)]
pub struct RiskControllerConfig {
    pub max_leg_latency_ms: f64,
    pub max_slippage_bps: f64,
    pub slippage_cooldown_seconds: f64,
    pub log_dir: PathBuf,
    pub duplicate_suppression_window: f64,
}

/// Ties latency/slippage monitoring, the cooldown registry, and the
/// violation journal into the single risk surface the cycle execution
/// engine calls into per leg (spec §4.3).
pub struct RiskController {
    pub latency_monitor: LatencyMonitor,
    pub slippage_tracker: SlippageTracker,
    pub cooldowns: CooldownRegistry,
    pub journal: ViolationJournal,
    max_leg_latency_ms: f64,
    max_slippage_bps: f64,
    slippage_cooldown_seconds: f64,
}

impl RiskController {
    pub fn new(config: RiskControllerConfig) -> std::io::Result<Self> {
        let state_path = config.log_dir.join("cooldowns_state.json");
        Ok(Self {
            latency_monitor: LatencyMonitor::new(config.max_leg_latency_ms),
            slippage_tracker: SlippageTracker::new(config.max_slippage_bps),
            cooldowns: CooldownRegistry::new(config.slippage_cooldown_seconds, state_path),
            journal: ViolationJournal::new(&config.log_dir, config.duplicate_suppression_window)?,
            max_leg_latency_ms: config.max_leg_latency_ms,
            max_slippage_bps: config.max_slippage_bps,
            slippage_cooldown_seconds: config.slippage_cooldown_seconds,
        })
    }

    pub fn start_leg_timing(&self) -> f64 {
        self.latency_monitor.start_measurement()
    }

    pub fn end_leg_timing(&mut self, leg_index: usize, market_symbol: &str, start_time: f64, side: Side) -> (LatencyMeasurement, bool) {
        let measurement = self.latency_monitor.end_measurement(leg_index, market_symbol, start_time, side);
        let violated = self.latency_monitor.check_violation(&measurement);
        (measurement, violated)
    }

    pub fn track_slippage(&mut self, leg_index: usize, market_symbol: &str, expected_price: f64, executed_price: f64, side: Side) -> (SlippageMeasurement, bool) {
        let measurement = self
            .slippage_tracker
            .calculate_slippage(leg_index, market_symbol, expected_price, executed_price, side);
        let violated = self.slippage_tracker.check_violation(&measurement);
        (measurement, violated)
    }

    pub fn is_cycle_in_cooldown(&mut self, cycle_path: &[String]) -> bool {
        self.cooldowns.is_in_cooldown(&cycle_path.join("->"))
    }

    pub fn cycle_cooldown_remaining(&self, cycle_path: &[String]) -> f64 {
        self.cooldowns.remaining(&cycle_path.join("->"))
    }

    pub fn log_latency_violation(
        &mut self,
        cycle_id: &str,
        strategy_name: &str,
        cycle_path: Vec<String>,
        cycle_direction: &str,
        violated_leg: &LatencyMeasurement,
    ) -> std::io::Result<()> {
        let violation = violations::latency_violation(
            cycle_id,
            strategy_name,
            cycle_path,
            cycle_direction,
            self.max_leg_latency_ms,
            violated_leg,
            self.latency_monitor.all_measurements(),
        );
        self.journal.log(&violation)
    }

    pub fn log_slippage_violation(
        &mut self,
        cycle_id: &str,
        strategy_name: &str,
        cycle_path: Vec<String>,
        cycle_direction: &str,
        violated_leg: &SlippageMeasurement,
    ) -> std::io::Result<()> {
        let cycle_key = cycle_path.join("->");
        self.cooldowns.add(cycle_key);

        let violation = violations::slippage_violation(
            cycle_id,
            strategy_name,
            cycle_path,
            cycle_direction,
            self.max_slippage_bps,
            self.slippage_cooldown_seconds,
            violated_leg,
            self.slippage_tracker.all_measurements(),
        );
        self.journal.log(&violation)
    }

    pub fn reset_cycle_measurements(&mut self) {
        self.latency_monitor.reset();
        self.slippage_tracker.reset();
    }

    pub fn cleanup_expired_cooldowns(&mut self) -> usize {
        self.cooldowns.cleanup_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(dir: &std::path::Path) -> RiskController {
        RiskController::new(RiskControllerConfig {
            max_leg_latency_ms: 500.0,
            max_slippage_bps: 20.0,
            slippage_cooldown_seconds: 300.0,
            log_dir: dir.to_path_buf(),
            duplicate_suppression_window: 2.0,
        })
        .unwrap()
    }

    #[test]
    fn slippage_violation_puts_cycle_into_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let mut rc = controller(dir.path());
        let path = vec!["BTC".to_string(), "ETH".to_string(), "USDT".to_string()];
        assert!(!rc.is_cycle_in_cooldown(&path));

        let (measurement, violated) = rc.track_slippage(0, "BTC/ETH", 100.0, 95.0, Side::Buy);
        assert!(violated);
        rc.log_slippage_violation("cyc-1", "strat", path.clone(), "forward", &measurement).unwrap();
        assert!(rc.is_cycle_in_cooldown(&path));
    }

    #[test]
    fn latency_violation_is_detected_and_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let mut rc = controller(dir.path());
        let start = rc.start_leg_timing();
        let (measurement, violated) = rc.end_leg_timing(0, "BTC/ETH", start - 1.0, Side::Buy);
        assert!(violated);
        rc.log_latency_violation("cyc-1", "strat", vec!["BTC".into(), "ETH".into()], "forward", &measurement)
            .unwrap();
        let counts = rc.journal.violation_counts_by_type().unwrap();
        assert_eq!(counts.get(&ViolationType::LatencyExceeded), Some(&1));
    }
}
