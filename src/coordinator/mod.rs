//! Order placement with retry/backoff, and order monitoring with a
//! rapid-then-backoff poll schedule gated by a sliding-window rate limit
//! (spec §4.6).

pub mod rate_gate;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::warn;

use crate::model::{OrderRecord, OrderState, OrderType, Side};
use crate::venues::{Venue, VenueError};

pub use rate_gate::RateGate;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub rapid_check_threshold: Duration,
    pub rapid_check_interval: Duration,
    pub initial_delay: Duration,
    pub backoff_mul: f64,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub min_request_interval: Duration,
    pub cache_ttl: Duration,
    pub min_partial_fill_ratio: f64,
    pub allow_partial_fills: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(200),
            rapid_check_threshold: Duration::from_secs(2),
            rapid_check_interval: Duration::from_millis(100),
            initial_delay: Duration::from_millis(250),
            backoff_mul: 1.6,
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.2,
            min_request_interval: Duration::from_millis(50),
            cache_ttl: Duration::from_millis(200),
            min_partial_fill_ratio: 0.5,
            allow_partial_fills: true,
        }
    }
}

struct CachedStatus {
    fetched_at: Instant,
    order: OrderRecord,
}

/// Places and monitors orders against a single [`Venue`]. Shared across
/// concurrently executing legs of different cycles.
pub struct OrderCoordinator {
    config: CoordinatorConfig,
    rate_gate: RateGate,
    status_cache: Mutex<HashMap<String, CachedStatus>>,
}

impl OrderCoordinator {
    pub fn new(config: CoordinatorConfig, venue_rate_limit: f64, rate_limit_buffer: f64) -> Self {
        Self {
            rate_gate: RateGate::new(venue_rate_limit, rate_limit_buffer, 32),
            config,
            status_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Retries up to `max_retries` times with backoff `base * 2^attempt`.
    /// Returns a PLACED order on success, or a FAILED record carrying the
    /// last venue error.
    pub async fn place_order(
        &self,
        venue: &Mutex<Box<dyn Venue>>,
        symbol: &str,
        side: Side,
        amount: f64,
        order_type: OrderType,
        limit_price: Option<f64>,
    ) -> OrderRecord {
        let mut last_error: Option<VenueError> = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.base_backoff * 2u32.pow(attempt - 1);
                sleep(backoff).await;
            }

            let result = {
                let mut guard = venue.lock().await;
                match order_type {
                    OrderType::Market => guard.place_market(symbol, side, amount).await,
                    OrderType::Limit => {
                        let price = limit_price.unwrap_or(0.0);
                        guard.place_limit(symbol, side, amount, price).await
                    }
                }
            };

            match result {
                Ok(mut order) => {
                    order.mark_state(OrderState::Placed);
                    return order;
                }
                Err(err) => {
                    warn!(symbol, attempt, error = %err, "order placement attempt failed");
                    last_error = Some(err);
                }
            }
        }

        let mut order = OrderRecord::new(symbol, side, order_type, amount, limit_price);
        order.retry_count = self.config.max_retries;
        order.error_message = last_error.map(|e| e.to_string());
        order.mark_state(OrderState::Failed);
        order
    }

    async fn fetch_status(&self, venue: &Mutex<Box<dyn Venue>>, order: &OrderRecord) -> Result<OrderRecord, VenueError> {
        let key = order.id.to_string();
        {
            let cache = self.status_cache.lock().await;
            if let Some(cached) = cache.get(&key) {
                if cached.fetched_at.elapsed() < self.config.cache_ttl {
                    return Ok(cached.order.clone());
                }
            }
        }

        self.rate_gate.acquire().await;
        let venue_order_id = order.venue_order_id.as_deref().unwrap_or_default();
        let fetched = venue.lock().await.fetch_order(venue_order_id, &order.symbol).await?;

        let mut cache = self.status_cache.lock().await;
        cache.insert(
            key,
            CachedStatus {
                fetched_at: Instant::now(),
                order: fetched.clone(),
            },
        );
        Ok(fetched)
    }

    /// Polls until the order reaches a terminal state, an acceptable
    /// partial fill, or `timeout` elapses.
    pub async fn monitor_order(&self, venue: &Mutex<Box<dyn Venue>>, order: &OrderRecord, timeout: Duration) -> OrderRecord {
        let start = Instant::now();
        let mut current = order.clone();
        let mut backoff_step: u32 = 0;

        loop {
            match self.fetch_status(venue, &current).await {
                Ok(fetched) => current = fetched,
                Err(err) => {
                    warn!(symbol = %current.symbol, error = %err, "order status poll failed");
                }
            }

            if current.state == OrderState::Filled || current.state == OrderState::Cancelled {
                return current;
            }
            if self.config.allow_partial_fills
                && current.state == OrderState::PartiallyFilled
                && current.filled_amount >= self.config.min_partial_fill_ratio * current.requested_amount
            {
                return current;
            }

            if start.elapsed() >= timeout {
                if current.filled_amount > 0.0 {
                    current.mark_state(OrderState::PartiallyFilled);
                } else {
                    current.mark_state(OrderState::Failed);
                }
                return current;
            }

            let delay = if start.elapsed() < self.config.rapid_check_threshold {
                self.config.rapid_check_interval
            } else {
                let raw = self.config.initial_delay.as_secs_f64() * self.config.backoff_mul.powi(backoff_step as i32);
                let capped = raw.min(self.config.max_delay.as_secs_f64());
                let jitter_span = capped * self.config.jitter_factor;
                let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
                let with_jitter = (capped + jitter).max(self.config.min_request_interval.as_secs_f64());
                backoff_step += 1;
                Duration::from_secs_f64(with_jitter)
            };
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Market;
    use async_trait::async_trait;
    use std::collections::HashMap as Map;

    struct FlakyVenue {
        fail_times: u32,
        calls: u32,
    }

    #[async_trait]
    impl Venue for FlakyVenue {
        async fn load_markets(&mut self) -> Result<Map<String, Market>, VenueError> {
            Ok(Map::new())
        }
        async fn fetch_ticker(&self, _symbol: &str) -> Result<crate::venues::Ticker, VenueError> {
            unimplemented!()
        }
        async fn fetch_balance(&self) -> Result<crate::venues::Balances, VenueError> {
            Ok(Map::new())
        }
        async fn place_market(&mut self, symbol: &str, side: Side, amount: f64) -> Result<OrderRecord, VenueError> {
            self.calls += 1;
            if self.calls <= self.fail_times {
                return Err(VenueError::Network("timeout".into()));
            }
            Ok(OrderRecord::new(symbol, side, OrderType::Market, amount, None))
        }
        async fn place_limit(&mut self, symbol: &str, side: Side, amount: f64, price: f64) -> Result<OrderRecord, VenueError> {
            Ok(OrderRecord::new(symbol, side, OrderType::Limit, amount, Some(price)))
        }
        async fn fetch_order(&self, _order_id: &str, _symbol: &str) -> Result<OrderRecord, VenueError> {
            unimplemented!()
        }
        async fn cancel_order(&mut self, _order_id: &str, _symbol: &str) -> Result<bool, VenueError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn place_order_retries_then_succeeds() {
        let venue: Mutex<Box<dyn Venue>> = Mutex::new(Box::new(FlakyVenue { fail_times: 2, calls: 0 }));
        let coordinator = OrderCoordinator::new(CoordinatorConfig::default(), 100.0, 1.0);
        let order = coordinator.place_order(&venue, "BTC/USDT", Side::Buy, 1.0, OrderType::Market, None).await;
        assert_eq!(order.state, OrderState::Placed);
    }

    #[tokio::test]
    async fn place_order_fails_after_exhausting_retries() {
        let venue: Mutex<Box<dyn Venue>> = Mutex::new(Box::new(FlakyVenue { fail_times: 10, calls: 0 }));
        let mut config = CoordinatorConfig::default();
        config.max_retries = 2;
        config.base_backoff = Duration::from_millis(1);
        let coordinator = OrderCoordinator::new(config, 100.0, 1.0);
        let order = coordinator.place_order(&venue, "BTC/USDT", Side::Buy, 1.0, OrderType::Market, None).await;
        assert_eq!(order.state, OrderState::Failed);
        assert!(order.error_message.is_some());
    }
}
