//! Deterministic paper-trading backend: real live tickers, simulated fills
//! (spec §4.1 "Paper implementation").

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{Market, OrderRecord, OrderState, OrderType, Side};

use super::live::LiveVenue;
use super::{Balances, ExecutionMetrics, Ticker, Venue, VenueError};

#[derive(Debug, Clone)]
pub struct PaperConfig {
    pub seed: u64,
    pub base_slippage_bps: f64,
    pub impact_coef: f64,
    pub impact_cap_bps: f64,
    pub padding_bps: f64,
    pub random_component_bps: f64,
    pub adverse_selection_bps: f64,
    pub fill_ratio: f64,
    pub partial_fill_notional_threshold: f64,
    pub taker_fee: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            base_slippage_bps: 2.0,
            impact_coef: 0.5,
            impact_cap_bps: 50.0,
            padding_bps: 1.0,
            random_component_bps: 3.0,
            adverse_selection_bps: 1.0,
            fill_ratio: 0.97,
            partial_fill_notional_threshold: 5_000.0,
            taker_fee: 0.001,
        }
    }
}

struct Inner {
    rng: StdRng,
    balances: Balances,
    orders: HashMap<String, OrderRecord>,
    metrics: ExecutionMetrics,
}

/// Uses a [`LiveVenue`] purely for ticker/market data; all execution is
/// simulated locally and never touches the live order-entry endpoints.
pub struct PaperVenue {
    quote_source: LiveVenue,
    config: PaperConfig,
    inner: Mutex<Inner>,
}

impl PaperVenue {
    pub fn new(quote_source: LiveVenue, config: PaperConfig, starting_balances: Balances) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            quote_source,
            config,
            inner: Mutex::new(Inner {
                rng,
                balances: starting_balances.clone(),
                orders: HashMap::new(),
                metrics: ExecutionMetrics {
                    final_balances: starting_balances,
                    ..Default::default()
                },
            }),
        }
    }

    /// Applies base slippage, market impact, padding, jitter, and adverse
    /// selection, all signed so the result is always worse for the trader.
    fn simulated_fill_price(&self, mid_or_touch: f64, side: Side, notional: f64, rng: &mut StdRng) -> f64 {
        let impact_bps = (self.config.impact_coef * notional / 1_000.0).min(self.config.impact_cap_bps);
        let jitter_bps: f64 = rng.gen_range(-self.config.random_component_bps..=self.config.random_component_bps);
        let total_bps = self.config.base_slippage_bps + impact_bps + self.config.padding_bps + jitter_bps.abs() + self.config.adverse_selection_bps;

        let sign = match side {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        };
        mid_or_touch * (1.0 + sign * total_bps / 10_000.0)
    }

    fn child_fills(&self, amount: f64, rng: &mut StdRng) -> Vec<f64> {
        let n = rng.gen_range(2..=5);
        let mut remaining = amount;
        let mut fills = Vec::with_capacity(n);
        for i in 0..n {
            if i == n - 1 {
                fills.push(remaining);
                break;
            }
            let share = remaining * rng.gen_range(0.1..0.5);
            fills.push(share);
            remaining -= share;
        }
        fills
    }
}

#[async_trait]
impl Venue for PaperVenue {
    async fn load_markets(&mut self) -> Result<HashMap<String, Market>, VenueError> {
        self.quote_source.load_markets().await
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, VenueError> {
        self.quote_source.fetch_ticker(symbol).await
    }

    async fn fetch_balance(&self) -> Result<Balances, VenueError> {
        Ok(self.inner.lock().expect("paper venue mutex poisoned").balances.clone())
    }

    async fn place_market(&mut self, symbol: &str, side: Side, amount: f64) -> Result<OrderRecord, VenueError> {
        let ticker = self.fetch_ticker(symbol).await?;
        let touch = match side {
            Side::Buy => ticker.ask,
            Side::Sell => ticker.bid,
        };

        let mut order = OrderRecord::new(symbol, side, OrderType::Market, amount, None);
        let notional = amount * touch;

        let mut inner = self.inner.lock().expect("paper venue mutex poisoned");
        inner.metrics.orders_created += 1;

        let fill_roll: f64 = inner.rng.gen_range(0.0..1.0);
        let target_fill_fraction = if fill_roll < self.config.fill_ratio { 1.0 } else { inner.rng.gen_range(0.1..0.95) };
        let to_fill = amount * target_fill_fraction;

        let fills = if notional >= self.config.partial_fill_notional_threshold {
            self.child_fills(to_fill, &mut inner.rng)
        } else {
            vec![to_fill]
        };

        let mut filled_total = 0.0;
        let mut notional_total = 0.0;
        for fill_amount in &fills {
            let price = self.simulated_fill_price(touch, side, fill_amount * touch, &mut inner.rng);
            filled_total += fill_amount;
            notional_total += fill_amount * price;
        }
        let average_price = if filled_total > 0.0 { notional_total / filled_total } else { touch };
        let fee = notional_total * self.config.taker_fee;

        order.filled_amount = filled_total;
        order.remaining_amount = (amount - filled_total).max(0.0);
        order.average_fill_price = Some(average_price);
        order.venue_order_id = Some(super::live::synthetic_order_id());
        order.mark_state(if order.remaining_amount <= 1e-12 { OrderState::Filled } else { OrderState::PartiallyFilled });

        inner.metrics.total_volume += notional_total;
        inner.metrics.total_fees += fee;
        inner.metrics.fill_count += fills.len() as u64;
        match order.state {
            OrderState::Filled => inner.metrics.orders_filled += 1,
            OrderState::PartiallyFilled => inner.metrics.orders_partial += 1,
            _ => {}
        }

        inner.orders.insert(order.id.to_string(), order.clone());
        Ok(order)
    }

    async fn place_limit(&mut self, symbol: &str, side: Side, amount: f64, price: f64) -> Result<OrderRecord, VenueError> {
        // Simplification consistent with paper semantics: a limit order
        // that crosses the touch fills like a market order at the limit.
        let ticker = self.fetch_ticker(symbol).await?;
        let crosses = match side {
            Side::Buy => price >= ticker.ask,
            Side::Sell => price <= ticker.bid,
        };
        if !crosses {
            let mut order = OrderRecord::new(symbol, side, OrderType::Limit, amount, Some(price));
            order.venue_order_id = Some(super::live::synthetic_order_id());
            order.mark_state(OrderState::Placed);
            self.inner.lock().expect("paper venue mutex poisoned").orders.insert(order.id.to_string(), order.clone());
            return Ok(order);
        }
        self.place_market(symbol, side, amount).await
    }

    async fn fetch_order(&self, order_id: &str, _symbol: &str) -> Result<OrderRecord, VenueError> {
        self.inner
            .lock()
            .expect("paper venue mutex poisoned")
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| VenueError::Other(format!("unknown paper order {order_id}")))
    }

    async fn cancel_order(&mut self, order_id: &str, _symbol: &str) -> Result<bool, VenueError> {
        let mut inner = self.inner.lock().expect("paper venue mutex poisoned");
        if let Some(order) = inner.orders.get_mut(order_id) {
            if !order.state.is_terminal() {
                order.mark_state(OrderState::Cancelled);
                inner.metrics.orders_cancelled += 1;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn execution_metrics(&self) -> Option<ExecutionMetrics> {
        let inner = self.inner.lock().expect("paper venue mutex poisoned");
        let mut metrics = inner.metrics.clone();
        metrics.final_balances = inner.balances.clone();
        Some(metrics)
    }
}
