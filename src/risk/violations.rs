use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::latency::LatencyMeasurement;
use super::slippage::SlippageMeasurement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    LatencyExceeded,
    SlippageExceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskControlViolation {
    pub timestamp: f64,
    pub cycle_id: String,
    pub strategy_name: String,
    pub violation_type: ViolationType,
    pub cycle_path: Vec<String>,
    pub cycle_direction: String,
    pub expected_prices: Vec<f64>,
    pub actual_prices: Vec<f64>,
    pub latencies_ms: Vec<f64>,
    pub slippages_bps: Vec<f64>,
    pub threshold_violated: Value,
    pub leg_details: Vec<Value>,
    pub metadata: HashMap<String, String>,
}

fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

pub fn latency_violation(
    cycle_id: impl Into<String>,
    strategy_name: impl Into<String>,
    cycle_path: Vec<String>,
    cycle_direction: impl Into<String>,
    max_leg_latency_ms: f64,
    violated_leg: &LatencyMeasurement,
    all_measurements: &[LatencyMeasurement],
) -> RiskControlViolation {
    RiskControlViolation {
        timestamp: unix_now(),
        cycle_id: cycle_id.into(),
        strategy_name: strategy_name.into(),
        violation_type: ViolationType::LatencyExceeded,
        cycle_path,
        cycle_direction: cycle_direction.into(),
        expected_prices: vec![],
        actual_prices: vec![],
        latencies_ms: all_measurements.iter().map(|m| m.latency_ms).collect(),
        slippages_bps: vec![],
        threshold_violated: serde_json::json!({
            "max_leg_latency_ms": max_leg_latency_ms,
            "violated_leg": violated_leg.leg_index,
            "violated_latency_ms": violated_leg.latency_ms,
        }),
        leg_details: all_measurements
            .iter()
            .map(|m| {
                serde_json::json!({
                    "leg_index": m.leg_index,
                    "market": m.market_symbol,
                    "side": m.side.as_str(),
                    "latency_ms": m.latency_ms,
                })
            })
            .collect(),
        metadata: HashMap::new(),
    }
}

pub fn slippage_violation(
    cycle_id: impl Into<String>,
    strategy_name: impl Into<String>,
    cycle_path: Vec<String>,
    cycle_direction: impl Into<String>,
    max_slippage_bps: f64,
    cooldown_seconds: f64,
    violated_leg: &SlippageMeasurement,
    all_measurements: &[SlippageMeasurement],
) -> RiskControlViolation {
    RiskControlViolation {
        timestamp: unix_now(),
        cycle_id: cycle_id.into(),
        strategy_name: strategy_name.into(),
        violation_type: ViolationType::SlippageExceeded,
        cycle_path,
        cycle_direction: cycle_direction.into(),
        expected_prices: all_measurements.iter().map(|m| m.expected_price).collect(),
        actual_prices: all_measurements.iter().map(|m| m.executed_price).collect(),
        latencies_ms: vec![],
        slippages_bps: all_measurements.iter().map(|m| m.slippage_bps).collect(),
        threshold_violated: serde_json::json!({
            "max_slippage_bps": max_slippage_bps,
            "violated_leg": violated_leg.leg_index,
            "violated_slippage_bps": violated_leg.slippage_bps,
            "cooldown_seconds": cooldown_seconds,
        }),
        leg_details: all_measurements
            .iter()
            .map(|m| {
                serde_json::json!({
                    "leg_index": m.leg_index,
                    "market": m.market_symbol,
                    "side": m.side.as_str(),
                    "expected_price": m.expected_price,
                    "executed_price": m.executed_price,
                    "slippage_bps": m.slippage_bps,
                })
            })
            .collect(),
        metadata: HashMap::new(),
    }
}

#[derive(Debug, Clone)]
struct SuppressionEntry {
    first_timestamp: f64,
    last_timestamp: f64,
    duplicate_count: u64,
}

#[derive(Debug, Clone)]
struct SuppressedRecord {
    cycle_id: String,
    violation_type: ViolationType,
    first_seen: f64,
    last_seen: f64,
    duplicate_count: u64,
}

/// Line-delimited JSON violation journal with duplicate suppression: the
/// same `(cycle_id, violation_type)` firing repeatedly inside the
/// suppression window is counted but not re-written to disk (spec §4.3).
pub struct ViolationJournal {
    path: PathBuf,
    suppression_window: f64,
    duplicate_cache: HashMap<(String, ViolationType), SuppressionEntry>,
    suppressed_history: Vec<SuppressedRecord>,
    max_history_size: usize,
    total_duplicates_suppressed: u64,
}

impl ViolationJournal {
    pub fn new(log_dir: impl Into<PathBuf>, suppression_window: f64) -> std::io::Result<Self> {
        let log_dir = log_dir.into();
        std::fs::create_dir_all(&log_dir)?;
        Ok(Self {
            path: log_dir.join("risk_violations.jsonl"),
            suppression_window,
            duplicate_cache: HashMap::new(),
            suppressed_history: Vec::new(),
            max_history_size: 100,
            total_duplicates_suppressed: 0,
        })
    }

    fn is_duplicate(&mut self, cycle_id: &str, violation_type: ViolationType, timestamp: f64) -> bool {
        if self.suppression_window <= 0.0 {
            return false;
        }
        let key = (cycle_id.to_string(), violation_type);
        match self.duplicate_cache.get_mut(&key) {
            Some(entry) => {
                let elapsed = timestamp - entry.last_timestamp;
                if elapsed <= self.suppression_window {
                    entry.duplicate_count += 1;
                    entry.last_timestamp = timestamp;
                    self.total_duplicates_suppressed += 1;
                    let record = SuppressedRecord {
                        cycle_id: cycle_id.to_string(),
                        violation_type,
                        first_seen: entry.first_timestamp,
                        last_seen: entry.last_timestamp,
                        duplicate_count: entry.duplicate_count,
                    };
                    self.push_suppressed_history(record);
                    true
                } else {
                    entry.last_timestamp = timestamp;
                    entry.duplicate_count = 0;
                    entry.first_timestamp = timestamp;
                    false
                }
            }
            None => {
                self.duplicate_cache.insert(
                    key,
                    SuppressionEntry {
                        first_timestamp: timestamp,
                        last_timestamp: timestamp,
                        duplicate_count: 0,
                    },
                );
                false
            }
        }
    }

    fn push_suppressed_history(&mut self, record: SuppressedRecord) {
        if let Some(existing) = self
            .suppressed_history
            .iter_mut()
            .find(|r| r.cycle_id == record.cycle_id && r.violation_type == record.violation_type)
        {
            *existing = record;
        } else {
            self.suppressed_history.push(record);
            if self.suppressed_history.len() > self.max_history_size {
                self.suppressed_history.remove(0);
            }
        }
    }

    /// Appends `violation` to the journal and logs a console warning,
    /// unless it is a duplicate of a recent entry within the suppression
    /// window.
    pub fn log(&mut self, violation: &RiskControlViolation) -> std::io::Result<()> {
        if self.is_duplicate(&violation.cycle_id, violation.violation_type, violation.timestamp) {
            return Ok(());
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let line = serde_json::to_string(violation).expect("violation always serializes");
        writeln!(file, "{line}")?;

        warn!(
            violation_type = ?violation.violation_type,
            cycle_id = %violation.cycle_id,
            strategy = %violation.strategy_name,
            path = ?violation.cycle_path.join(" -> "),
            "risk control violation"
        );
        Ok(())
    }

    pub fn suppression_stats(&self) -> (u64, usize) {
        (self.total_duplicates_suppressed, self.duplicate_cache.len())
    }

    pub fn recent_suppressed(&self, limit: usize) -> Vec<(String, ViolationType, u64)> {
        let mut sorted = self.suppressed_history.clone();
        sorted.sort_by(|a, b| b.last_seen.partial_cmp(&a.last_seen).unwrap_or(std::cmp::Ordering::Equal));
        sorted
            .into_iter()
            .take(limit)
            .map(|r| (r.cycle_id, r.violation_type, r.duplicate_count))
            .collect()
    }

    /// Re-reads the journal file, counting violations by type.
    pub fn violation_counts_by_type(&self) -> std::io::Result<HashMap<ViolationType, u64>> {
        let mut counts = HashMap::new();
        let path: &Path = &self.path;
        if !path.exists() {
            return Ok(counts);
        }
        let file = std::fs::File::open(path)?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if let Ok(v) = serde_json::from_str::<RiskControlViolation>(&line) {
                *counts.entry(v.violation_type).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(cycle_id: &str, timestamp: f64) -> RiskControlViolation {
        RiskControlViolation {
            timestamp,
            cycle_id: cycle_id.to_string(),
            strategy_name: "strat".into(),
            violation_type: ViolationType::SlippageExceeded,
            cycle_path: vec!["BTC".into(), "ETH".into(), "USDT".into()],
            cycle_direction: "forward".into(),
            expected_prices: vec![],
            actual_prices: vec![],
            latencies_ms: vec![],
            slippages_bps: vec![120.0],
            threshold_violated: serde_json::json!({}),
            leg_details: vec![],
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn writes_first_occurrence_to_journal() {
        let dir = tempdir().unwrap();
        let mut journal = ViolationJournal::new(dir.path(), 2.0).unwrap();
        journal.log(&sample("cyc-1", 100.0)).unwrap();
        let counts = journal.violation_counts_by_type().unwrap();
        assert_eq!(counts.get(&ViolationType::SlippageExceeded), Some(&1));
    }

    #[test]
    fn suppresses_duplicate_within_window() {
        let dir = tempdir().unwrap();
        let mut journal = ViolationJournal::new(dir.path(), 2.0).unwrap();
        journal.log(&sample("cyc-1", 100.0)).unwrap();
        journal.log(&sample("cyc-1", 101.0)).unwrap();
        let counts = journal.violation_counts_by_type().unwrap();
        assert_eq!(counts.get(&ViolationType::SlippageExceeded), Some(&1));
        let (total, _) = journal.suppression_stats();
        assert_eq!(total, 1);
    }

    #[test]
    fn does_not_suppress_after_window_elapses() {
        let dir = tempdir().unwrap();
        let mut journal = ViolationJournal::new(dir.path(), 2.0).unwrap();
        journal.log(&sample("cyc-1", 100.0)).unwrap();
        journal.log(&sample("cyc-1", 200.0)).unwrap();
        let counts = journal.violation_counts_by_type().unwrap();
        assert_eq!(counts.get(&ViolationType::SlippageExceeded), Some(&2));
    }
}
