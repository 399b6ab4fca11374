//! CSV-fed backtest backend with a simulated clock (spec §4.1 "Backtest
//! implementation"). Fills reuse Paper's slippage/partial-fill model but
//! seed the RNG deterministically from clock + symbol + order sequence so
//! a replay of the same feed always produces the same fills.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::model::{Market, OrderRecord, OrderState, OrderType, Side};

use super::paper::PaperConfig;
use super::{Balances, ExecutionMetrics, Ticker, Venue, VenueError};

#[derive(Debug, Clone, Deserialize)]
struct CsvRow {
    timestamp: f64,
    symbol: String,
    bid: f64,
    ask: f64,
    last: f64,
    volume: f64,
}

struct Inner {
    clock: f64,
    sequence: u64,
    balances: Balances,
    orders: HashMap<String, OrderRecord>,
    metrics: ExecutionMetrics,
}

/// Indexed by symbol, each series sorted ascending by timestamp.
pub struct BacktestVenue {
    series: HashMap<String, Vec<CsvRow>>,
    markets: HashMap<String, Market>,
    config: PaperConfig,
    inner: Mutex<Inner>,
}

impl BacktestVenue {
    pub fn from_csv(path: &Path, markets: HashMap<String, Market>, config: PaperConfig, starting_balances: Balances) -> Result<Self, VenueError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| VenueError::Other(e.to_string()))?;
        let mut series: HashMap<String, Vec<CsvRow>> = HashMap::new();
        for result in reader.deserialize() {
            let row: CsvRow = result.map_err(|e| VenueError::Other(e.to_string()))?;
            series.entry(row.symbol.clone()).or_default().push(row);
        }
        for rows in series.values_mut() {
            rows.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap_or(std::cmp::Ordering::Equal));
        }

        Ok(Self {
            series,
            markets,
            config,
            inner: Mutex::new(Inner {
                clock: 0.0,
                sequence: 0,
                balances: starting_balances.clone(),
                orders: HashMap::new(),
                metrics: ExecutionMetrics {
                    final_balances: starting_balances,
                    ..Default::default()
                },
            }),
        })
    }

    /// Moves the simulated clock forward. Async `sleep` in the engine
    /// yields zero wall time in this backend; the clock only advances here.
    pub fn advance_time_to(&self, t: f64) {
        let mut inner = self.inner.lock().expect("backtest venue mutex poisoned");
        if t > inner.clock {
            inner.clock = t;
        }
    }

    fn row_at_or_before(&self, symbol: &str, clock: f64) -> Result<&CsvRow, VenueError> {
        let rows = self.series.get(symbol).ok_or_else(|| VenueError::SymbolUnknown(symbol.to_string()))?;
        match rows.binary_search_by(|r| r.timestamp.partial_cmp(&clock).unwrap_or(std::cmp::Ordering::Less)) {
            Ok(idx) => Ok(&rows[idx]),
            Err(0) => Err(VenueError::Other(format!("no data for {symbol} at or before t={clock}"))),
            Err(idx) => Ok(&rows[idx - 1]),
        }
    }

    fn seeded_rng(&self, symbol: &str, clock: f64, sequence: u64) -> StdRng {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        clock.to_bits().hash(&mut hasher);
        sequence.hash(&mut hasher);
        self.config.seed.hash(&mut hasher);
        StdRng::seed_from_u64(hasher.finish())
    }

    fn simulated_fill_price(&self, touch: f64, side: Side, notional: f64, rng: &mut StdRng) -> f64 {
        let impact_bps = (self.config.impact_coef * notional / 1_000.0).min(self.config.impact_cap_bps);
        let jitter_bps: f64 = rng.gen_range(-self.config.random_component_bps..=self.config.random_component_bps);
        let total_bps = self.config.base_slippage_bps + impact_bps + self.config.padding_bps + jitter_bps.abs() + self.config.adverse_selection_bps;
        let sign = match side {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        };
        touch * (1.0 + sign * total_bps / 10_000.0)
    }
}

fn epoch_to_datetime(secs: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0).single().unwrap_or_else(Utc::now)
}

#[async_trait]
impl Venue for BacktestVenue {
    async fn load_markets(&mut self) -> Result<HashMap<String, Market>, VenueError> {
        Ok(self.markets.clone())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, VenueError> {
        let clock = self.inner.lock().expect("backtest venue mutex poisoned").clock;
        let row = self.row_at_or_before(symbol, clock)?;
        Ok(Ticker {
            bid: row.bid,
            ask: row.ask,
            last: row.last,
            volume: row.volume,
            timestamp: epoch_to_datetime(row.timestamp),
        })
    }

    async fn fetch_balance(&self) -> Result<Balances, VenueError> {
        Ok(self.inner.lock().expect("backtest venue mutex poisoned").balances.clone())
    }

    async fn place_market(&mut self, symbol: &str, side: Side, amount: f64) -> Result<OrderRecord, VenueError> {
        let (clock, sequence) = {
            let inner = self.inner.lock().expect("backtest venue mutex poisoned");
            (inner.clock, inner.sequence)
        };
        let row = self.row_at_or_before(symbol, clock)?.clone();
        let touch = match side {
            Side::Buy => row.ask,
            Side::Sell => row.bid,
        };

        let mut rng = self.seeded_rng(symbol, clock, sequence);
        let mut order = OrderRecord::new(symbol, side, OrderType::Market, amount, None);

        let notional = amount * touch;
        let fill_roll: f64 = rng.gen_range(0.0..1.0);
        let fraction = if fill_roll < self.config.fill_ratio { 1.0 } else { rng.gen_range(0.1..0.95) };
        let to_fill = amount * fraction;

        let price = self.simulated_fill_price(touch, side, notional, &mut rng);
        let fee = to_fill * price * self.config.taker_fee;

        order.filled_amount = to_fill;
        order.remaining_amount = (amount - to_fill).max(0.0);
        order.average_fill_price = Some(price);
        order.venue_order_id = Some(format!("bt-{sequence}"));
        order.mark_state(if order.remaining_amount <= 1e-12 { OrderState::Filled } else { OrderState::PartiallyFilled });

        let mut inner = self.inner.lock().expect("backtest venue mutex poisoned");
        inner.sequence += 1;
        inner.metrics.orders_created += 1;
        inner.metrics.total_volume += to_fill * price;
        inner.metrics.total_fees += fee;
        inner.metrics.fill_count += 1;
        match order.state {
            OrderState::Filled => inner.metrics.orders_filled += 1,
            OrderState::PartiallyFilled => inner.metrics.orders_partial += 1,
            _ => {}
        }
        inner.orders.insert(order.id.to_string(), order.clone());
        Ok(order)
    }

    async fn place_limit(&mut self, symbol: &str, side: Side, amount: f64, price: f64) -> Result<OrderRecord, VenueError> {
        let ticker = self.fetch_ticker(symbol).await?;
        let crosses = match side {
            Side::Buy => price >= ticker.ask,
            Side::Sell => price <= ticker.bid,
        };
        if crosses {
            return self.place_market(symbol, side, amount).await;
        }
        let mut order = OrderRecord::new(symbol, side, OrderType::Limit, amount, Some(price));
        order.venue_order_id = Some(format!("bt-{}", self.inner.lock().expect("backtest venue mutex poisoned").sequence));
        order.mark_state(OrderState::Placed);
        self.inner.lock().expect("backtest venue mutex poisoned").orders.insert(order.id.to_string(), order.clone());
        Ok(order)
    }

    async fn fetch_order(&self, order_id: &str, _symbol: &str) -> Result<OrderRecord, VenueError> {
        self.inner
            .lock()
            .expect("backtest venue mutex poisoned")
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| VenueError::Other(format!("unknown backtest order {order_id}")))
    }

    async fn cancel_order(&mut self, order_id: &str, _symbol: &str) -> Result<bool, VenueError> {
        let mut inner = self.inner.lock().expect("backtest venue mutex poisoned");
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
        let inner = self.inner.lock().expect("backtest venue mutex poisoned");
        let mut metrics = inner.metrics.clone();
        metrics.final_balances = inner.balances.clone();
        Some(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_feed(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("feed.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "timestamp,symbol,bid,ask,last,volume").unwrap();
        writeln!(f, "1000,ETH/USDT,2000.0,2001.0,2000.5,10.0").unwrap();
        writeln!(f, "2000,ETH/USDT,2010.0,2011.0,2010.5,12.0").unwrap();
        path
    }

    #[tokio::test]
    async fn fetch_ticker_returns_row_at_or_before_clock() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_feed(dir.path());
        let venue = BacktestVenue::from_csv(&path, HashMap::new(), PaperConfig::default(), Balances::new()).unwrap();
        venue.advance_time_to(1500.0);
        let ticker = venue.fetch_ticker("ETH/USDT").await.unwrap();
        assert_eq!(ticker.bid, 2000.0);

        venue.advance_time_to(2500.0);
        let ticker = venue.fetch_ticker("ETH/USDT").await.unwrap();
        assert_eq!(ticker.bid, 2010.0);
    }

    #[tokio::test]
    async fn fetch_ticker_errors_before_first_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_feed(dir.path());
        let venue = BacktestVenue::from_csv(&path, HashMap::new(), PaperConfig::default(), Balances::new()).unwrap();
        venue.advance_time_to(500.0);
        assert!(venue.fetch_ticker("ETH/USDT").await.is_err());
    }

    #[tokio::test]
    async fn same_clock_and_sequence_produce_identical_fills() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_feed(dir.path());
        let mut venue_a = BacktestVenue::from_csv(&path, HashMap::new(), PaperConfig::default(), Balances::new()).unwrap();
        let mut venue_b = BacktestVenue::from_csv(&path, HashMap::new(), PaperConfig::default(), Balances::new()).unwrap();
        venue_a.advance_time_to(1000.0);
        venue_b.advance_time_to(1000.0);

        let order_a = venue_a.place_market("ETH/USDT", Side::Buy, 1.0).await.unwrap();
        let order_b = venue_b.place_market("ETH/USDT", Side::Buy, 1.0).await.unwrap();
        assert_eq!(order_a.average_fill_price, order_b.average_fill_price);
        assert_eq!(order_a.filled_amount, order_b.filled_amount);
    }
}
