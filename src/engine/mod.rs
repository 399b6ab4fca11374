//! Cycle execution engine (spec §4.7): drives one triangular cycle through
//! its state machine, leg by leg, with latency/slippage enforcement and
//! panic-sell fallback on failure.

pub mod recovery;
pub mod validate;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::coordinator::OrderCoordinator;
use crate::model::{Cycle, CycleRecord, CycleState, Market, OrderState, Side};
use crate::risk::RiskController;
use crate::router::{MarketCondition, Router};
use crate::store::StateStore;
use crate::venues::Venue;

pub use validate::{validate_cycle, LegPlan, ValidationOutcome};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_open_cycles: u32,
    pub reservation_ttl: Duration,
    pub max_consecutive_losses: u32,
    pub order_timeout: Duration,
    /// Age past which a crash-recovered cycle panic-sells instead of
    /// resuming (spec §4.7 "too old").
    pub max_cycle_age: Duration,
    /// Age past which a PENDING/PLACED order is "stale" during recovery.
    pub stale_order_age: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_open_cycles: 3,
            reservation_ttl: Duration::from_secs(30),
            max_consecutive_losses: 5,
            order_timeout: Duration::from_secs(30),
            max_cycle_age: Duration::from_secs(3_600),
            stale_order_age: Duration::from_secs(300),
        }
    }
}

pub struct CycleExecutionEngine {
    config: EngineConfig,
    strategy: String,
    venue: Arc<Mutex<Box<dyn Venue>>>,
    coordinator: Arc<OrderCoordinator>,
    store: Arc<StateStore>,
    risk: Arc<Mutex<RiskController>>,
    router: Arc<Router>,
    markets: RwLock<HashMap<String, Market>>,
    consecutive_losses: AtomicU32,
}

impl CycleExecutionEngine {
    pub fn new(
        config: EngineConfig,
        strategy: impl Into<String>,
        venue: Arc<Mutex<Box<dyn Venue>>>,
        coordinator: Arc<OrderCoordinator>,
        store: Arc<StateStore>,
        risk: Arc<Mutex<RiskController>>,
        router: Arc<Router>,
    ) -> Self {
        Self {
            config,
            strategy: strategy.into(),
            venue,
            coordinator,
            store,
            risk,
            router,
            markets: RwLock::new(HashMap::new()),
            consecutive_losses: AtomicU32::new(0),
        }
    }

    pub async fn refresh_markets(&self) -> Result<(), crate::venues::VenueError> {
        let loaded = self.venue.lock().await.load_markets().await?;
        *self.markets.write().await = loaded;
        Ok(())
    }

    /// Runs one cycle end to end: reservation, validation, leg-by-leg
    /// execution, completion or panic-sell. Always returns a terminal
    /// `CycleRecord` and always persists it.
    pub async fn run_cycle(&self, cycle: Cycle, initial_amount: f64) -> CycleRecord {
        if self.consecutive_losses.load(Ordering::Relaxed) >= self.config.max_consecutive_losses {
            let mut record = CycleRecord::new(&self.strategy, cycle, initial_amount);
            record.fail("rejected: consecutive loss limit reached");
            self.store.save(record.clone()).await.ok();
            return record;
        }

        let reservation = match crate::store::reservation::reserve_slot(self.store.pool(), &self.strategy, self.config.max_open_cycles, self.config.reservation_ttl).await {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "reservation lookup failed");
                None
            }
        };

        let Some(reservation_id) = reservation else {
            let mut record = CycleRecord::new(&self.strategy, cycle, initial_amount);
            record.fail("rejected: max cycles");
            self.store.save(record.clone()).await.ok();
            return record;
        };

        let mut record = CycleRecord::new(&self.strategy, cycle.clone(), initial_amount);
        record.transition(CycleState::Validating);
        self.store.save(record.clone()).await.ok();

        let markets = self.markets.read().await.clone();
        match validate_cycle(&cycle, initial_amount, &markets) {
            ValidationOutcome::Invalid { leg, reason } => {
                crate::store::reservation::release(self.store.pool(), reservation_id).await.ok();
                record.fail(format!("leg {leg} failed validation: {reason}"));
                self.store.save(record.clone()).await.ok();
                return record;
            }
            ValidationOutcome::Valid(plans) => {
                crate::store::reservation::confirm(self.store.pool(), reservation_id, record.id).await.ok();
                record.transition(CycleState::Active);
                self.store.save(record.clone()).await.ok();
                self.execute_legs(&mut record, &plans, &markets).await;
            }
        }

        self.finalize(&mut record).await;
        self.store.save(record.clone()).await.ok();
        record
    }

    async fn execute_legs(&self, record: &mut CycleRecord, plans: &[LegPlan], markets: &HashMap<String, Market>) {
        let cycle_path: Vec<String> = record.cycle.0.iter().map(|c| c.as_str().to_string()).collect();

        for (leg_index, plan) in plans.iter().enumerate() {
            let market = markets.get(&plan.symbol);
            let Some(market) = market else {
                record.fail(format!("market {} disappeared mid-cycle", plan.symbol));
                self.begin_panic_sell(record, &cycle_path).await;
                return;
            };
            let _ = market;

            let ticker = match self.venue.lock().await.fetch_ticker(&plan.symbol).await {
                Ok(t) => t,
                Err(err) => {
                    record.fail(format!("leg {leg_index} ticker fetch failed: {err}"));
                    self.begin_panic_sell(record, &cycle_path).await;
                    return;
                }
            };
            let expected_price = match plan.side {
                Side::Buy => ticker.ask,
                Side::Sell => ticker.bid,
            };

            let order_amount = match plan.side {
                Side::Buy => record.current_amount / expected_price,
                Side::Sell => record.current_amount,
            };

            let leg_start = self.risk.lock().await.start_leg_timing();
            let placed = self.coordinator.place_order(&self.venue, &plan.symbol, plan.side, order_amount, crate::model::OrderType::Market, None).await;
            record.orders.push(placed.clone());

            if placed.state == OrderState::Failed {
                record.fail(format!("leg {leg_index} order placement failed: {}", placed.error_message.as_deref().unwrap_or("unknown")));
                self.begin_panic_sell(record, &cycle_path).await;
                return;
            }

            let filled = self.coordinator.monitor_order(&self.venue, &placed, self.config.order_timeout).await;
            if let Some(last) = record.orders.last_mut() {
                *last = filled.clone();
            }

            let (latency_measurement, latency_violated) = self.risk.lock().await.end_leg_timing(leg_index, &plan.symbol, leg_start, plan.side);
            if latency_violated {
                let mut risk = self.risk.lock().await;
                risk.log_latency_violation(&record.id.to_string(), &record.strategy, cycle_path.clone(), "forward", &latency_measurement).ok();
                drop(risk);
                record.fail(format!("leg {leg_index} latency violation"));
                self.begin_panic_sell(record, &cycle_path).await;
                return;
            }

            let executed_price = filled.average_fill_price.unwrap_or(expected_price);
            let (slip_measurement, slip_violated) = self.risk.lock().await.track_slippage(leg_index, &plan.symbol, expected_price, executed_price, plan.side);
            if slip_violated {
                let mut risk = self.risk.lock().await;
                risk.log_slippage_violation(&record.id.to_string(), &record.strategy, cycle_path.clone(), "forward", &slip_measurement).ok();
                drop(risk);
                record.fail(format!("leg {leg_index} slippage violation"));
                self.begin_panic_sell(record, &cycle_path).await;
                return;
            }

            if filled.state == OrderState::Failed || filled.filled_amount <= 0.0 {
                record.fail(format!("leg {leg_index} produced no fill"));
                self.begin_panic_sell(record, &cycle_path).await;
                return;
            }

            record.current_amount = match plan.side {
                Side::Buy => filled.filled_amount,
                Side::Sell => filled.filled_amount * executed_price,
            };
            record.current_currency = record.cycle.target_at(leg_index).clone();
            record.current_step = leg_index + 1;
            record.state = if filled.state == OrderState::PartiallyFilled { CycleState::PartiallyFilled } else { CycleState::Active };
            self.store.save(record.clone()).await.ok();
        }
    }

    async fn begin_panic_sell(&self, record: &mut CycleRecord, cycle_path: &[String]) {
        record.transition(CycleState::PanicSelling);
        self.store.save(record.clone()).await.ok();

        let markets = self.markets.read().await.clone();
        let result = self
            .router
            .convert(&self.venue, &self.coordinator, &markets, record.current_currency.clone(), record.current_amount, MarketCondition::Normal)
            .await;

        if result.success {
            record.current_amount = result.final_amount;
            record.current_currency = result.final_currency;
            record.metadata.insert("panic_sell".to_string(), "converted".to_string());
            info!(cycle_id = %record.id, "panic-sell converted stranded balance");
        } else {
            record.metadata.insert("panic_sell".to_string(), "stuck".to_string());
            warn!(cycle_id = %record.id, "panic-sell failed to find a safe path, holdings stuck");
        }
        // Panic-sell is a recovery action, not a success path: the cycle
        // still ends FAILED, it just fails holding a stable currency
        // instead of a stranded one. `error_message` from the triggering
        // leg failure is preserved.
        record.transition(CycleState::Failed);
        let _ = cycle_path;
    }

    async fn finalize(&self, record: &mut CycleRecord) {
        // A leg failure already transitions to Failed via begin_panic_sell;
        // only a cycle that ran all three legs still needs a completion
        // verdict. Either way the consecutive-loss counter below must see
        // every outcome, not just the ones that reach this branch.
        if record.state != CycleState::Failed && record.current_step >= 3 {
            if record.current_currency == *record.cycle.starting_currency() {
                record.complete();
            } else {
                record.fail("ended in wrong currency");
            }
        }

        match record.realized_pnl {
            Some(pnl) if pnl > 0.0 => {
                self.consecutive_losses.store(0, Ordering::Relaxed);
            }
            Some(_) => {
                self.consecutive_losses.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.consecutive_losses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
