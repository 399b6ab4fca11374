use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::market::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Pending,
    Placed,
    PartiallyFilled,
    Filled,
    Cancelled,
    Failed,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Failed
        )
    }
}

/// One leg's order, owned by exactly one [`crate::model::cycle::CycleRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    /// Venue-assigned order id, once placed.
    pub venue_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub requested_amount: f64,
    pub limit_price: Option<f64>,
    pub state: OrderState,
    pub filled_amount: f64,
    pub remaining_amount: f64,
    pub average_fill_price: Option<f64>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn new(symbol: impl Into<String>, side: Side, order_type: OrderType, amount: f64, limit_price: Option<f64>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            venue_order_id: None,
            symbol: symbol.into(),
            side,
            order_type,
            requested_amount: amount,
            limit_price,
            state: OrderState::Pending,
            filled_amount: 0.0,
            remaining_amount: amount,
            average_fill_price: None,
            retry_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn fill_ratio(&self) -> f64 {
        if self.requested_amount <= 0.0 {
            return 0.0;
        }
        self.filled_amount / self.requested_amount
    }

    pub fn mark_state(&mut self, state: OrderState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_ratio_is_zero_for_unfilled() {
        let o = OrderRecord::new("BTC/USDT", Side::Buy, OrderType::Market, 1.0, None);
        assert_eq!(o.fill_ratio(), 0.0);
    }

    #[test]
    fn terminal_states() {
        assert!(OrderState::Filled.is_terminal());
        assert!(OrderState::Cancelled.is_terminal());
        assert!(OrderState::Failed.is_terminal());
        assert!(!OrderState::Placed.is_terminal());
        assert!(!OrderState::PartiallyFilled.is_terminal());
    }
}
