//! Thin wrapper over a CEX HTTP/WS client (spec §4.1 "Live implementation").
//! HMAC-SHA256 request signing and reqwest-based transport, in the shape of
//! a Binance-style REST client.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::model::{Currency, Market, OrderRecord, OrderState, OrderType, Side};

use super::{Balances, ExecutionMetrics, Ticker, Venue, VenueError};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW_MS: u64 = 5_000;

pub struct LiveVenue {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    markets: RwLock<HashMap<String, Market>>,
}

impl LiveVenue {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("reqwest client builds with static config"),
            markets: RwLock::new(HashMap::new()),
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW_MS}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW_MS}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> VenueError {
        if status.as_u16() == 429 {
            VenueError::RateLimited
        } else if status.is_server_error() {
            VenueError::Network(format!("{status}: {body}"))
        } else {
            VenueError::Other(format!("{status}: {body}"))
        }
    }

    async fn get_signed(&self, path: &str, params: &str) -> Result<serde_json::Value, VenueError> {
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, path, qs);
        let resp = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| VenueError::Network(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| VenueError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }
        serde_json::from_str(&text).map_err(|e| VenueError::Other(e.to_string()))
    }

    async fn post_signed(&self, path: &str, params: &str) -> Result<serde_json::Value, VenueError> {
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, path, qs);
        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| VenueError::Network(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| VenueError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }
        serde_json::from_str(&text).map_err(|e| VenueError::Other(e.to_string()))
    }

    async fn delete_signed(&self, path: &str, params: &str) -> Result<serde_json::Value, VenueError> {
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, path, qs);
        let resp = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| VenueError::Network(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| VenueError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }
        serde_json::from_str(&text).map_err(|e| VenueError::Other(e.to_string()))
    }
}

#[async_trait]
impl Venue for LiveVenue {
    #[instrument(skip(self), name = "live::load_markets")]
    async fn load_markets(&mut self) -> Result<HashMap<String, Market>, VenueError> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(|e| VenueError::Network(e.to_string()))?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| VenueError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::classify_status(status, &body.to_string()));
        }

        let mut markets = HashMap::new();
        if let Some(symbols) = body["symbols"].as_array() {
            for entry in symbols {
                let base = entry["baseAsset"].as_str().unwrap_or_default();
                let quote = entry["quoteAsset"].as_str().unwrap_or_default();
                let (Ok(base), Ok(quote)) = (Currency::new(base), Currency::new(quote)) else {
                    continue;
                };
                let market = Market {
                    base: base.clone(),
                    quote: quote.clone(),
                    min_amount: entry["filters"][1]["minQty"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
                    min_notional: entry["filters"][3]["minNotional"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
                    taker_fee: 0.001,
                    maker_fee: 0.0008,
                    price_precision: 8,
                    amount_precision: 8,
                };
                markets.insert(format!("{base}/{quote}"), market);
            }
        }

        debug!(count = markets.len(), "loaded markets from live venue");
        *self.markets.write().expect("markets lock poisoned") = markets.clone();
        Ok(markets)
    }

    #[instrument(skip(self), name = "live::fetch_ticker")]
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, VenueError> {
        let raw_symbol = symbol.replace('/', "");
        let url = format!("{}/api/v3/ticker/bookTicker?symbol={}", self.base_url, raw_symbol);
        let resp = self.client.get(&url).send().await.map_err(|e| VenueError::Network(e.to_string()))?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| VenueError::Network(e.to_string()))?;
        if !status.is_success() {
            if status.as_u16() == 400 {
                return Err(VenueError::SymbolUnknown(symbol.to_string()));
            }
            return Err(Self::classify_status(status, &body.to_string()));
        }

        let bid: f64 = body["bidPrice"].as_str().and_then(|s| s.parse().ok()).ok_or_else(|| VenueError::SymbolUnknown(symbol.to_string()))?;
        let ask: f64 = body["askPrice"].as_str().and_then(|s| s.parse().ok()).unwrap_or(bid);
        Ok(Ticker {
            bid,
            ask,
            last: (bid + ask) / 2.0,
            volume: 0.0,
            timestamp: Utc::now(),
        })
    }

    #[instrument(skip(self), name = "live::fetch_balance")]
    async fn fetch_balance(&self) -> Result<Balances, VenueError> {
        let account = self.get_signed("/api/v3/account", "").await?;
        let mut balances = Balances::new();
        if let Some(entries) = account["balances"].as_array() {
            for entry in entries {
                if let Some(asset) = entry["asset"].as_str() {
                    let free: f64 = entry["free"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                    balances.insert(asset.to_string(), free);
                }
            }
        }
        Ok(balances)
    }

    #[instrument(skip(self), name = "live::place_market")]
    async fn place_market(&mut self, symbol: &str, side: Side, amount: f64) -> Result<OrderRecord, VenueError> {
        let raw_symbol = symbol.replace('/', "");
        let side_str = match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let params = format!("symbol={raw_symbol}&side={side_str}&type=MARKET&quantity={amount}");
        let body = self.post_signed("/api/v3/order", &params).await?;

        let mut order = OrderRecord::new(symbol, side, OrderType::Market, amount, None);
        order.venue_order_id = body["orderId"].as_u64().map(|id| id.to_string());
        let filled: f64 = body["executedQty"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
        order.filled_amount = filled;
        order.remaining_amount = (amount - filled).max(0.0);
        order.mark_state(if filled >= amount { OrderState::Filled } else { OrderState::Placed });
        Ok(order)
    }

    #[instrument(skip(self), name = "live::place_limit")]
    async fn place_limit(&mut self, symbol: &str, side: Side, amount: f64, price: f64) -> Result<OrderRecord, VenueError> {
        let raw_symbol = symbol.replace('/', "");
        let side_str = match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let params = format!("symbol={raw_symbol}&side={side_str}&type=LIMIT&quantity={amount}&price={price}&timeInForce=GTC");
        let body = self.post_signed("/api/v3/order", &params).await?;

        let mut order = OrderRecord::new(symbol, side, OrderType::Limit, amount, Some(price));
        order.venue_order_id = body["orderId"].as_u64().map(|id| id.to_string());
        order.mark_state(OrderState::Placed);
        Ok(order)
    }

    #[instrument(skip(self), name = "live::fetch_order")]
    async fn fetch_order(&self, order_id: &str, symbol: &str) -> Result<OrderRecord, VenueError> {
        let raw_symbol = symbol.replace('/', "");
        let params = format!("symbol={raw_symbol}&orderId={order_id}");
        let body = self.get_signed("/api/v3/order", &params).await?;

        let side = if body["side"].as_str() == Some("BUY") { Side::Buy } else { Side::Sell };
        let order_type = if body["type"].as_str() == Some("LIMIT") { OrderType::Limit } else { OrderType::Market };
        let requested: f64 = body["origQty"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let filled: f64 = body["executedQty"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let price = body["price"].as_str().and_then(|s| s.parse::<f64>().ok()).filter(|p| *p > 0.0);

        let mut order = OrderRecord::new(symbol, side, order_type, requested, price);
        order.venue_order_id = Some(order_id.to_string());
        order.filled_amount = filled;
        order.remaining_amount = (requested - filled).max(0.0);

        let state = match body["status"].as_str() {
            Some("FILLED") => OrderState::Filled,
            Some("PARTIALLY_FILLED") => OrderState::PartiallyFilled,
            Some("CANCELED") | Some("EXPIRED") => OrderState::Cancelled,
            Some("REJECTED") => OrderState::Failed,
            _ => OrderState::Placed,
        };
        order.mark_state(state);
        Ok(order)
    }

    #[instrument(skip(self), name = "live::cancel_order")]
    async fn cancel_order(&mut self, order_id: &str, symbol: &str) -> Result<bool, VenueError> {
        let raw_symbol = symbol.replace('/', "");
        let params = format!("symbol={raw_symbol}&orderId={order_id}");
        match self.delete_signed("/api/v3/order", &params).await {
            Ok(_) => Ok(true),
            Err(VenueError::Other(msg)) if msg.contains("Unknown order") => Ok(false),
            Err(e) => {
                warn!(order_id, symbol, error = %e, "cancel_order failed");
                Err(e)
            }
        }
    }
}

/// Placeholder id generator for venues that don't yet echo one back
/// (kept out of the hot path; only used by simulators).
pub fn synthetic_order_id() -> String {
    Uuid::new_v4().to_string()
}
