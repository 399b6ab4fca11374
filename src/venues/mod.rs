pub mod backtest;
pub mod live;
pub mod paper;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Market, OrderRecord, Side};

pub use backtest::BacktestVenue;
pub use live::LiveVenue;
pub use paper::PaperVenue;

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("rate limited")]
    RateLimited,
    #[error("transient network error: {0}")]
    Network(String),
    #[error("insufficient balance: need {needed} {currency}, have {available}")]
    InsufficientBalance {
        currency: String,
        needed: f64,
        available: f64,
    },
    #[error("below venue minimum for {symbol}")]
    BelowMinimum { symbol: String },
    #[error("unknown symbol: {0}")]
    SymbolUnknown(String),
    #[error("venue error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy)]
pub struct Ticker {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    /// Absolute 24h price change as a fraction, used by the recovery
    /// router's VOLATILE/EXTREME classification.
    pub fn change_24h_abs(&self, price_24h_ago: f64) -> f64 {
        if price_24h_ago <= 0.0 {
            return 0.0;
        }
        ((self.last - price_24h_ago) / price_24h_ago).abs()
    }
}

pub type Balances = HashMap<String, f64>;

/// Side-channel metrics the two simulator backends expose for ops
/// visibility (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    pub orders_created: u64,
    pub orders_filled: u64,
    pub orders_partial: u64,
    pub orders_cancelled: u64,
    pub total_volume: f64,
    pub total_fees: f64,
    pub fill_count: u64,
    pub final_balances: Balances,
}

impl ExecutionMetrics {
    pub fn average_fee_bps(&self) -> f64 {
        if self.total_volume <= 0.0 {
            0.0
        } else {
            self.total_fees / self.total_volume * 10_000.0
        }
    }

    pub fn fills_per_order(&self) -> f64 {
        if self.orders_created == 0 {
            0.0
        } else {
            self.fill_count as f64 / self.orders_created as f64
        }
    }
}

/// Contract every execution backend (Live, Paper, Backtest) implements
/// identically so the cycle execution engine is backend-agnostic
/// (spec §4.1).
#[async_trait]
pub trait Venue: Send + Sync {
    async fn load_markets(&mut self) -> Result<HashMap<String, Market>, VenueError>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, VenueError>;

    async fn fetch_balance(&self) -> Result<Balances, VenueError>;

    async fn place_market(&mut self, symbol: &str, side: Side, amount: f64) -> Result<OrderRecord, VenueError>;

    async fn place_limit(&mut self, symbol: &str, side: Side, amount: f64, price: f64) -> Result<OrderRecord, VenueError>;

    async fn fetch_order(&self, order_id: &str, symbol: &str) -> Result<OrderRecord, VenueError>;

    async fn cancel_order(&mut self, order_id: &str, symbol: &str) -> Result<bool, VenueError>;

    /// `None` for Live (no synthetic fill model to report on).
    fn execution_metrics(&self) -> Option<ExecutionMetrics> {
        None
    }
}
