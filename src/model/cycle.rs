use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::currency::Currency;
use super::order::OrderRecord;

/// The logical trade path `A -> B -> C -> A`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cycle(pub [Currency; 3]);

impl Cycle {
    pub fn new(a: Currency, b: Currency, c: Currency) -> Self {
        Self([a, b, c])
    }

    /// Currency held at the start of leg `step` (0, 1, or 2).
    pub fn source_at(&self, step: usize) -> &Currency {
        &self.0[step % 3]
    }

    /// Currency the leg at `step` should end holding.
    pub fn target_at(&self, step: usize) -> &Currency {
        &self.0[(step + 1) % 3]
    }

    /// The canonical string key used for cooldown lookups: `"A->B->C"`.
    pub fn key(&self) -> String {
        self.0
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join("->")
    }

    pub fn starting_currency(&self) -> &Currency {
        &self.0[0]
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Pending,
    Validating,
    Active,
    PartiallyFilled,
    Recovering,
    PanicSelling,
    Completed,
    Failed,
}

impl CycleState {
    /// States for which the write-through cache must flush immediately
    /// (spec §4.5).
    pub fn is_terminal_for_flush(self) -> bool {
        matches!(
            self,
            CycleState::Completed | CycleState::Failed | CycleState::PanicSelling
        )
    }

    /// States the recovery reader considers "in flight" (spec §4.5).
    pub fn is_active_for_recovery(self) -> bool {
        matches!(
            self,
            CycleState::Active
                | CycleState::PartiallyFilled
                | CycleState::Recovering
                | CycleState::PanicSelling
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Completed | CycleState::Failed)
    }
}

/// The full stateful record of one in-flight or completed cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub id: Uuid,
    pub strategy: String,
    pub cycle: Cycle,

    pub initial_amount: f64,
    pub current_amount: f64,
    pub current_currency: Currency,

    pub state: CycleState,
    pub current_step: usize,

    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub realized_pnl: Option<f64>,
    pub error_message: Option<String>,
    pub metadata: HashMap<String, String>,

    pub orders: Vec<OrderRecord>,
}

impl CycleRecord {
    pub fn new(strategy: impl Into<String>, cycle: Cycle, initial_amount: f64) -> Self {
        let starting = cycle.starting_currency().clone();
        Self {
            id: Uuid::new_v4(),
            strategy: strategy.into(),
            cycle,
            initial_amount,
            current_amount: initial_amount,
            current_currency: starting,
            state: CycleState::Pending,
            current_step: 0,
            started_at: Utc::now(),
            ended_at: None,
            realized_pnl: None,
            error_message: None,
            metadata: HashMap::new(),
            orders: Vec::new(),
        }
    }

    pub fn transition(&mut self, state: CycleState) {
        self.state = state;
        if state.is_terminal() || state == CycleState::PanicSelling {
            self.ended_at = self.ended_at.or_else(|| Some(Utc::now()));
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.error_message = Some(reason.into());
        self.transition(CycleState::Failed);
    }

    pub fn complete(&mut self) {
        self.realized_pnl = Some(self.current_amount - self.initial_amount);
        self.transition(CycleState::Completed);
    }

    /// Invariant 1 (spec §8): on completion, `current_currency == cycle[0]`
    /// and realized P&L is defined.
    pub fn check_completion_invariant(&self) -> bool {
        if self.state != CycleState::Completed {
            return true;
        }
        self.current_currency == *self.cycle.starting_currency() && self.realized_pnl.is_some()
    }

    /// Invariant 2 (spec §8): number of persisted orders equals
    /// `current_step`, or `current_step + 1` if the next leg's order has
    /// been placed but not yet resolved.
    pub fn check_order_count_invariant(&self) -> bool {
        let n = self.orders.len();
        n == self.current_step || n == self.current_step + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cur(s: &str) -> Currency {
        Currency::new(s).unwrap()
    }

    fn sample_cycle() -> Cycle {
        Cycle::new(cur("BTC"), cur("ETH"), cur("USDT"))
    }

    #[test]
    fn key_join() {
        assert_eq!(sample_cycle().key(), "BTC->ETH->USDT");
    }

    #[test]
    fn source_and_target_wrap_around() {
        let c = sample_cycle();
        assert_eq!(c.source_at(2), &cur("USDT"));
        assert_eq!(c.target_at(2), &cur("BTC"));
    }

    #[test]
    fn completion_invariant_requires_starting_currency_and_pnl() {
        let mut rec = CycleRecord::new("s1", sample_cycle(), 1.0);
        rec.current_amount = 1.01;
        rec.current_currency = cur("BTC");
        rec.complete();
        assert!(rec.check_completion_invariant());
        assert_eq!(rec.realized_pnl, Some(0.01_f64));
    }

    #[test]
    fn completion_invariant_fails_on_wrong_currency() {
        let mut rec = CycleRecord::new("s1", sample_cycle(), 1.0);
        rec.current_currency = cur("ETH");
        rec.state = CycleState::Completed;
        rec.realized_pnl = Some(0.0);
        assert!(!rec.check_completion_invariant());
    }

    #[test]
    fn order_count_invariant() {
        let mut rec = CycleRecord::new("s1", sample_cycle(), 1.0);
        rec.current_step = 1;
        assert!(!rec.check_order_count_invariant());
        rec.orders.push(crate::model::order::OrderRecord::new(
            "BTC/ETH",
            crate::model::market::Side::Sell,
            crate::model::order::OrderType::Market,
            1.0,
            None,
        ));
        assert!(rec.check_order_count_invariant());
    }
}
