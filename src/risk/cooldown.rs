use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CooldownError {
    #[error("io error persisting cooldown state: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed cooldown state file: {0}")]
    Json(#[from] serde_json::Error),
}

fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Persistent cooldown registry keyed by cycle key (`"A->B->C"`), tracking
/// cooldown start times so a crash-restart doesn't immediately re-fire a
/// cycle that just blew through its slippage ceiling (spec §4.3, §4.5).
#[derive(Debug, Clone)]
pub struct CooldownRegistry {
    cooldown_seconds: f64,
    cycles: HashMap<String, f64>,
    default_state_path: PathBuf,
}

impl CooldownRegistry {
    pub fn new(cooldown_seconds: f64, default_state_path: impl Into<PathBuf>) -> Self {
        Self {
            cooldown_seconds,
            cycles: HashMap::new(),
            default_state_path: default_state_path.into(),
        }
    }

    pub fn add(&mut self, cycle_key: impl Into<String>) {
        let key = cycle_key.into();
        self.cycles.insert(key.clone(), unix_now());
        info!(cycle_key = %key, cooldown_seconds = self.cooldown_seconds, "added cycle to cooldown");
    }

    /// Mirrors the Python `is_in_cooldown`: reclaims an expired entry as a
    /// side effect of checking it.
    pub fn is_in_cooldown(&mut self, cycle_key: &str) -> bool {
        let Some(&start) = self.cycles.get(cycle_key) else {
            return false;
        };
        let elapsed = unix_now() - start;
        if elapsed >= self.cooldown_seconds {
            self.cycles.remove(cycle_key);
            return false;
        }
        true
    }

    pub fn remaining(&self, cycle_key: &str) -> f64 {
        let Some(&start) = self.cycles.get(cycle_key) else {
            return 0.0;
        };
        let elapsed = unix_now() - start;
        (self.cooldown_seconds - elapsed).max(0.0)
    }

    pub fn cleanup_expired(&mut self) -> usize {
        let now = unix_now();
        let expired: Vec<String> = self
            .cycles
            .iter()
            .filter(|(_, &start)| now - start >= self.cooldown_seconds)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.cycles.remove(key);
        }
        expired.len()
    }

    /// Active cooldowns sorted by remaining time, descending.
    pub fn active(&self) -> Vec<(String, f64)> {
        let now = unix_now();
        let mut active: Vec<(String, f64)> = self
            .cycles
            .iter()
            .filter_map(|(key, &start)| {
                let remaining = (start + self.cooldown_seconds) - now;
                (remaining > 0.0).then(|| (key.clone(), remaining))
            })
            .collect();
        active.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        active
    }

    pub fn clear(&mut self, cycle_key: &str) -> bool {
        if self.cycles.remove(cycle_key).is_some() {
            info!(cycle_key, "cleared cooldown");
            true
        } else {
            false
        }
    }

    pub fn cooldown_end(&self, cycle_key: &str) -> Option<f64> {
        self.cycles.get(cycle_key).map(|&start| start + self.cooldown_seconds)
    }

    /// Extends the cooldown by `extra_seconds`, clamping the new end to at
    /// least one second in the future so a near-zero extension can't
    /// accidentally expire it immediately.
    pub fn extend(&mut self, cycle_key: &str, extra_seconds: f64) -> bool {
        let Some(&current_start) = self.cycles.get(cycle_key) else {
            return false;
        };
        let current_end = current_start + self.cooldown_seconds;
        let new_end = current_end + extra_seconds;
        let min_end = unix_now() + 1.0;
        let clamped_end = new_end.max(min_end);
        let new_start = clamped_end - self.cooldown_seconds;
        self.cycles.insert(cycle_key.to_string(), new_start);
        info!(cycle_key, extra_seconds, clamped_end, "extended cooldown");
        true
    }

    pub fn clear_all(&mut self) -> usize {
        let count = self.cycles.len();
        self.cycles.clear();
        info!(count, "cleared all cooldowns");
        count
    }

    pub fn default_state_path(&self) -> &Path {
        &self.default_state_path
    }

    /// Serializes cooldowns still live as of now to `path` (or the default
    /// state path) via a temp-file-then-rename so a crash mid-write never
    /// leaves a truncated state file.
    pub fn save(&self, path: Option<&Path>) -> Result<(), CooldownError> {
        let path = path.unwrap_or(&self.default_state_path);
        let now = unix_now();

        let mut data = HashMap::new();
        for (key, &start) in &self.cycles {
            let end = start + self.cooldown_seconds;
            if end > now {
                data.insert(key.clone(), end);
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::Builder::new().prefix(".cooldowns_").suffix(".tmp").tempfile_in(parent)?;
        let body = serde_json::to_vec_pretty(&data)?;
        tmp.write_all(&body)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;

        info!(count = data.len(), path = %path.display(), "saved active cooldowns");
        Ok(())
    }

    /// Loads cooldowns from `path` (or the default state path), discarding
    /// already-expired entries. Returns the number restored.
    pub fn load(&mut self, path: Option<&Path>) -> Result<usize, CooldownError> {
        let path = path.unwrap_or(&self.default_state_path).to_path_buf();
        if !path.exists() {
            info!(path = %path.display(), "no cooldown state file found");
            return Ok(0);
        }

        let body = std::fs::read(&path)?;
        let data: HashMap<String, f64> = serde_json::from_slice(&body)?;

        let now = unix_now();
        let mut restored = 0;
        let mut expired = 0;
        for (key, end) in data {
            if end > now {
                self.cycles.insert(key, end - self.cooldown_seconds);
                restored += 1;
            } else {
                expired += 1;
            }
        }

        info!(restored, expired, path = %path.display(), "loaded cooldown state");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_then_is_in_cooldown() {
        let mut registry = CooldownRegistry::new(300.0, "unused");
        assert!(!registry.is_in_cooldown("BTC->ETH->USDT"));
        registry.add("BTC->ETH->USDT");
        assert!(registry.is_in_cooldown("BTC->ETH->USDT"));
    }

    #[test]
    fn is_in_cooldown_reclaims_expired_entries() {
        let mut registry = CooldownRegistry::new(0.0, "unused");
        registry.add("BTC->ETH->USDT");
        assert!(!registry.is_in_cooldown("BTC->ETH->USDT"));
    }

    #[test]
    fn clear_removes_entry() {
        let mut registry = CooldownRegistry::new(300.0, "unused");
        registry.add("BTC->ETH->USDT");
        assert!(registry.clear("BTC->ETH->USDT"));
        assert!(!registry.is_in_cooldown("BTC->ETH->USDT"));
        assert!(!registry.clear("BTC->ETH->USDT"));
    }

    #[test]
    fn extend_clamps_to_at_least_one_second_future() {
        let mut registry = CooldownRegistry::new(1.0, "unused");
        registry.add("BTC->ETH->USDT");
        assert!(registry.extend("BTC->ETH->USDT", -1000.0));
        let end = registry.cooldown_end("BTC->ETH->USDT").unwrap();
        assert!(end >= unix_now());
    }

    #[test]
    fn clear_all_empties_registry() {
        let mut registry = CooldownRegistry::new(300.0, "unused");
        registry.add("A->B->C");
        registry.add("D->E->F");
        assert_eq!(registry.clear_all(), 2);
        assert!(registry.active().is_empty());
    }

    #[test]
    fn save_then_load_round_trips_active_cooldowns() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("cooldowns.json");

        let mut registry = CooldownRegistry::new(300.0, state_path.clone());
        registry.add("BTC->ETH->USDT");
        registry.save(None).unwrap();

        let mut reloaded = CooldownRegistry::new(300.0, state_path);
        let restored = reloaded.load(None).unwrap();
        assert_eq!(restored, 1);
        assert!(reloaded.is_in_cooldown("BTC->ETH->USDT"));
    }

    #[test]
    fn load_skips_already_expired_entries() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("cooldowns.json");

        let mut registry = CooldownRegistry::new(0.0, state_path.clone());
        registry.add("BTC->ETH->USDT");
        // cooldown_seconds = 0 means end == start, already expired by the
        // time save() computes "now".
        registry.save(None).unwrap();

        let mut reloaded = CooldownRegistry::new(0.0, state_path);
        let restored = reloaded.load(None).unwrap();
        assert_eq!(restored, 0);
    }

    #[test]
    fn active_sorted_by_remaining_descending() {
        let mut registry = CooldownRegistry::new(300.0, "unused");
        registry.add("short");
        registry.extend("short", -200.0);
        registry.add("long");
        let active = registry.active();
        assert_eq!(active.len(), 2);
        assert!(active[0].1 >= active[1].1);
    }
}
