use std::collections::VecDeque;

/// Fixed-capacity rolling window of realized net-profit percentages.
///
/// Keeps running sums for mean/variance so each `observe` is O(1), per the
/// "Rolling volatility window" design note: fixed-capacity ring buffer +
/// running sums rather than re-scanning the whole window on every update.
#[derive(Debug, Clone)]
pub struct VolatilityWindow {
    capacity: usize,
    observations: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
}

impl VolatilityWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            observations: VecDeque::with_capacity(capacity.max(1)),
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    pub fn observe(&mut self, net_pct: f64) {
        if self.observations.len() == self.capacity {
            if let Some(evicted) = self.observations.pop_front() {
                self.sum -= evicted;
                self.sum_sq -= evicted * evicted;
            }
        }
        self.observations.push_back(net_pct);
        self.sum += net_pct;
        self.sum_sq += net_pct * net_pct;
    }

    pub fn count(&self) -> usize {
        self.observations.len()
    }

    pub fn is_ready(&self) -> bool {
        self.observations.len() >= self.capacity
    }

    pub fn mean(&self) -> Option<f64> {
        if self.observations.len() < 2 {
            return None;
        }
        Some(self.sum / self.observations.len() as f64)
    }

    /// Population standard deviation.
    pub fn sigma(&self) -> Option<f64> {
        let n = self.observations.len();
        if n < 2 {
            return None;
        }
        let mean = self.sum / n as f64;
        let variance = (self.sum_sq / n as f64) - mean * mean;
        Some(variance.max(0.0).sqrt())
    }

    /// `mean + k * sigma`, or `None` if fewer than 2 observations.
    pub fn dynamic_threshold(&self, k: f64) -> Option<f64> {
        let mean = self.mean()?;
        let sigma = self.sigma()?;
        Some(mean + k * sigma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_capacity_filled() {
        let mut w = VolatilityWindow::new(3);
        w.observe(1.0);
        assert!(!w.is_ready());
        w.observe(2.0);
        assert!(!w.is_ready());
        w.observe(3.0);
        assert!(w.is_ready());
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut w = VolatilityWindow::new(2);
        w.observe(1.0);
        w.observe(2.0);
        w.observe(10.0);
        // Window now holds [2.0, 10.0]
        assert_eq!(w.count(), 2);
        assert!((w.mean().unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn mean_and_sigma_match_naive_computation() {
        let mut w = VolatilityWindow::new(5);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            w.observe(v);
        }
        let mean = w.mean().unwrap();
        assert!((mean - 3.0).abs() < 1e-9);
        let naive_var = [1.0, 2.0, 3.0, 4.0, 5.0]
            .iter()
            .map(|x| (x - mean).powi(2))
            .sum::<f64>()
            / 5.0;
        assert!((w.sigma().unwrap() - naive_var.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn dynamic_threshold_none_below_two_observations() {
        let mut w = VolatilityWindow::new(10);
        assert!(w.dynamic_threshold(1.5).is_none());
        w.observe(1.0);
        assert!(w.dynamic_threshold(1.5).is_none());
        w.observe(2.0);
        assert!(w.dynamic_threshold(1.5).is_some());
    }
}
