//! Crash recovery (spec §4.7 `recover_active_cycles`): classifies every
//! non-terminal cycle found in the state store and decides whether to
//! resume it, panic-sell it, or mark it failed outright.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::coordinator::OrderCoordinator;
use crate::model::{CycleRecord, CycleState, OrderState};
use crate::router::{MarketCondition, Router};
use crate::store::StateStore;
use crate::venues::Venue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Old enough, or already panic-selling: convert current holdings and
    /// close the cycle out as failed.
    PanicSell,
    /// Re-validate against live markets and continue from `current_step`.
    Resume,
    /// Never made it past reservation; no capital was ever committed.
    MarkFailed,
}

pub fn classify(record: &CycleRecord, now: chrono::DateTime<Utc>, max_cycle_age: Duration, stale_order_age: Duration) -> RecoveryAction {
    let age = now.signed_duration_since(record.started_at);
    if age > chrono::Duration::from_std(max_cycle_age).unwrap_or(chrono::Duration::hours(1)) {
        return RecoveryAction::PanicSell;
    }
    if record.state == CycleState::PanicSelling {
        return RecoveryAction::PanicSell;
    }
    if record.state == CycleState::Pending || record.state == CycleState::Validating {
        return RecoveryAction::MarkFailed;
    }

    let last_order_stale = record.orders.last().is_some_and(|o| {
        !o.state.is_terminal()
            && now.signed_duration_since(o.updated_at) > chrono::Duration::from_std(stale_order_age).unwrap_or(chrono::Duration::minutes(5))
    });
    if record.state == CycleState::Recovering || last_order_stale {
        return RecoveryAction::Resume;
    }

    RecoveryAction::Resume
}

/// Runs at startup: flushes the cache, drops expired reservations, repairs
/// any orphaned order rows, then classifies and acts on every in-flight
/// cycle it finds.
pub async fn recover_active_cycles(
    store: &Arc<StateStore>,
    venue: &tokio::sync::Mutex<Box<dyn Venue>>,
    coordinator: &OrderCoordinator,
    router: &Router,
    markets: &std::collections::HashMap<String, crate::model::Market>,
    max_cycle_age: Duration,
    stale_order_age: Duration,
) -> Result<Vec<CycleRecord>, crate::store::StoreError> {
    crate::store::reservation::cleanup_expired(store.pool()).await?;
    store.validate_integrity().await?;

    let active = store.get_active_cycles(None).await?;
    info!(count = active.len(), "starting crash recovery pass");

    let mut resolved = Vec::with_capacity(active.len());
    for mut record in active {
        let now = Utc::now();
        match classify(&record, now, max_cycle_age, stale_order_age) {
            RecoveryAction::MarkFailed => {
                record.fail("recovered: abandoned before validation completed");
                store.save(record.clone()).await?;
            }
            RecoveryAction::PanicSell => {
                record = panic_sell(record, venue, coordinator, router, markets).await;
                store.save(record.clone()).await?;
            }
            RecoveryAction::Resume => {
                record = reconcile_last_order(record, venue, coordinator).await;
                record.transition(CycleState::Recovering);
                store.save(record.clone()).await?;
            }
        }
        resolved.push(record);
    }
    Ok(resolved)
}

/// Re-fetches the live status of the last order before resuming, so a fill
/// that happened while the process was down isn't lost.
async fn reconcile_last_order(mut record: CycleRecord, venue: &tokio::sync::Mutex<Box<dyn Venue>>, coordinator: &OrderCoordinator) -> CycleRecord {
    let Some(last) = record.orders.last().cloned() else {
        return record;
    };
    if last.state.is_terminal() {
        return record;
    }

    let fresh = coordinator.monitor_order(venue, &last, Duration::from_secs(5)).await;
    if let Some(slot) = record.orders.last_mut() {
        *slot = fresh.clone();
    }

    if fresh.state == OrderState::Filled {
        record.current_amount = match fresh.side {
            crate::model::Side::Buy => fresh.filled_amount,
            crate::model::Side::Sell => fresh.filled_amount * fresh.average_fill_price.unwrap_or(record.current_amount),
        };
        record.current_step = record.current_step.max(record.orders.len());
    }
    record
}

async fn panic_sell(
    mut record: CycleRecord,
    venue: &tokio::sync::Mutex<Box<dyn Venue>>,
    coordinator: &OrderCoordinator,
    router: &Router,
    markets: &std::collections::HashMap<String, crate::model::Market>,
) -> CycleRecord {
    record.transition(CycleState::PanicSelling);
    let result = router
        .convert(venue, coordinator, markets, record.current_currency.clone(), record.current_amount, MarketCondition::Normal)
        .await;
    if result.success {
        record.current_amount = result.final_amount;
        record.current_currency = result.final_currency;
        record.metadata.insert("recovery_panic_sell".to_string(), "converted".to_string());
    } else {
        record.metadata.insert("recovery_panic_sell".to_string(), "stuck".to_string());
        warn!(cycle_id = %record.id, "recovery panic-sell failed to find a safe path");
    }
    record.fail("recovered: cycle was abandoned mid-flight");
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Currency, Cycle};

    fn base_record(state: CycleState) -> CycleRecord {
        let cycle = Cycle::new(Currency::new("BTC").unwrap(), Currency::new("ETH").unwrap(), Currency::new("USDT").unwrap());
        let mut r = CycleRecord::new("s1", cycle, 1.0);
        r.state = state;
        r
    }

    #[test]
    fn old_cycles_always_panic_sell() {
        let mut r = base_record(CycleState::Active);
        r.started_at = Utc::now() - chrono::Duration::hours(2);
        assert_eq!(classify(&r, Utc::now(), Duration::from_secs(3600), Duration::from_secs(300)), RecoveryAction::PanicSell);
    }

    #[test]
    fn panic_selling_state_continues_panic_selling() {
        let r = base_record(CycleState::PanicSelling);
        assert_eq!(classify(&r, Utc::now(), Duration::from_secs(3600), Duration::from_secs(300)), RecoveryAction::PanicSell);
    }

    #[test]
    fn pending_cycles_are_marked_failed() {
        let r = base_record(CycleState::Pending);
        assert_eq!(classify(&r, Utc::now(), Duration::from_secs(3600), Duration::from_secs(300)), RecoveryAction::MarkFailed);
    }

    #[test]
    fn fresh_active_cycle_resumes() {
        let r = base_record(CycleState::Active);
        assert_eq!(classify(&r, Utc::now(), Duration::from_secs(3600), Duration::from_secs(300)), RecoveryAction::Resume);
    }
}
