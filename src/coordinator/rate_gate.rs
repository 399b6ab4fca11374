//! Sliding-window rate gate in front of venue polling (spec §4.6, §5).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;

/// Keeps the last `window_size` request timestamps per key and makes the
/// caller wait whenever the implied rate would exceed
/// `rate_limit_buffer * venue_rate_limit` requests per second.
pub struct RateGate {
    window_size: usize,
    venue_rate_limit: f64,
    rate_limit_buffer: f64,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateGate {
    pub fn new(venue_rate_limit: f64, rate_limit_buffer: f64, window_size: usize) -> Self {
        Self {
            window_size,
            venue_rate_limit,
            rate_limit_buffer,
            timestamps: Mutex::new(VecDeque::with_capacity(window_size)),
        }
    }

    fn budget_interval(&self) -> Duration {
        let allowed_rate = self.venue_rate_limit * self.rate_limit_buffer;
        if allowed_rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(1.0 / allowed_rate)
    }

    /// Blocks the caller until issuing a request now would keep the
    /// observed rate within budget, then records the request.
    pub async fn acquire(&self) {
        let min_interval = self.budget_interval();
        loop {
            let wait = {
                let mut stamps = self.timestamps.lock().await;
                let now = Instant::now();
                while stamps.len() >= self.window_size {
                    stamps.pop_front();
                }
                match stamps.back() {
                    Some(last) if now.duration_since(*last) < min_interval => Some(min_interval - now.duration_since(*last)),
                    _ => {
                        stamps.push_back(now);
                        None
                    }
                }
            };
            match wait {
                Some(duration) => sleep(duration).await,
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_spaces_requests_to_respect_budget() {
        let gate = RateGate::new(10.0, 1.0, 8);
        let start = Instant::now();
        for _ in 0..3 {
            gate.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(180));
    }

    #[tokio::test]
    async fn unlimited_rate_never_waits() {
        let gate = RateGate::new(1_000_000.0, 1.0, 8);
        let start = Instant::now();
        for _ in 0..5 {
            gate.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
