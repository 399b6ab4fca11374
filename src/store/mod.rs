//! Durable journal for cycle execution: connection pool, write-through
//! cache, reservation protocol, and crash-recovery reads (spec §4.5).

pub mod cache;
pub mod reservation;
pub mod schema;

use std::sync::Arc;
use std::time::Duration;

use rusqlite::params;
use tokio::time::interval;
use tracing::{error, info};
use uuid::Uuid;

use crate::model::{Currency, Cycle, CycleRecord, CycleState, OrderRecord, OrderState, OrderType, Side};

pub use schema::{ConnectionPool, PooledConnection, StoreError};

fn state_to_str(state: CycleState) -> &'static str {
    match state {
        CycleState::Pending => "pending",
        CycleState::Validating => "validating",
        CycleState::Active => "active",
        CycleState::PartiallyFilled => "partially_filled",
        CycleState::Recovering => "recovering",
        CycleState::PanicSelling => "panic_selling",
        CycleState::Completed => "completed",
        CycleState::Failed => "failed",
    }
}

fn state_from_str(s: &str) -> Option<CycleState> {
    Some(match s {
        "pending" => CycleState::Pending,
        "validating" => CycleState::Validating,
        "active" => CycleState::Active,
        "partially_filled" => CycleState::PartiallyFilled,
        "recovering" => CycleState::Recovering,
        "panic_selling" => CycleState::PanicSelling,
        "completed" => CycleState::Completed,
        "failed" => CycleState::Failed,
        _ => return None,
    })
}

/// Reads a full `CycleRecord` plus its orders back out of the two tables.
fn load_cycle_row(conn: &rusqlite::Connection, id: &str) -> Result<Option<CycleRecord>, StoreError> {
    let row = conn.query_row(
        "SELECT id, strategy, cycle_key, initial_amount, current_amount, current_currency, state,
                current_step, started_at, ended_at, realized_pnl, error_message, metadata_json
         FROM cycles WHERE id = ?1",
        params![id],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, f64>(3)?,
                r.get::<_, f64>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, i64>(7)?,
                r.get::<_, String>(8)?,
                r.get::<_, Option<String>>(9)?,
                r.get::<_, Option<f64>>(10)?,
                r.get::<_, Option<String>>(11)?,
                r.get::<_, String>(12)?,
            ))
        },
    );

    let (id, strategy, cycle_key, initial_amount, current_amount, current_currency, state, current_step, started_at, ended_at, realized_pnl, error_message, metadata_json) = match row {
        Ok(v) => v,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let parts: Vec<Currency> = cycle_key.split("->").filter_map(|c| Currency::new(c).ok()).collect();
    if parts.len() != 3 {
        return Err(StoreError::Json(serde_json::Error::io(std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed cycle_key"))));
    }

    let mut stmt = conn.prepare(
        "SELECT id, venue_order_id, symbol, side, order_type, requested_amount, limit_price, state,
                filled_amount, remaining_amount, average_fill_price, retry_count, error_message, created_at, updated_at
         FROM orders WHERE cycle_id = ?1 ORDER BY created_at ASC",
    )?;
    let orders = stmt
        .query_map(params![id], |r| {
            let side_str: String = r.get(3)?;
            let order_type_str: String = r.get(4)?;
            let state_str: String = r.get(7)?;
            Ok(OrderRecord {
                id: Uuid::parse_str(&r.get::<_, String>(0)?).unwrap_or_default(),
                venue_order_id: r.get(1)?,
                symbol: r.get(2)?,
                side: if side_str == "buy" { Side::Buy } else { Side::Sell },
                order_type: if order_type_str == "market" { OrderType::Market } else { OrderType::Limit },
                requested_amount: r.get(5)?,
                limit_price: r.get(6)?,
                state: match state_str.as_str() {
                    "placed" => OrderState::Placed,
                    "partially_filled" => OrderState::PartiallyFilled,
                    "filled" => OrderState::Filled,
                    "cancelled" => OrderState::Cancelled,
                    "failed" => OrderState::Failed,
                    _ => OrderState::Pending,
                },
                filled_amount: r.get(8)?,
                remaining_amount: r.get(9)?,
                average_fill_price: r.get(10)?,
                retry_count: r.get::<_, i64>(11)? as u32,
                error_message: r.get(12)?,
                created_at: r.get::<_, String>(13)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
                updated_at: r.get::<_, String>(14)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(CycleRecord {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        strategy,
        cycle: Cycle::new(parts[0].clone(), parts[1].clone(), parts[2].clone()),
        initial_amount,
        current_amount,
        current_currency: Currency::new(current_currency).unwrap_or_else(|_| parts[0].clone()),
        state: state_from_str(&state).unwrap_or(CycleState::Failed),
        current_step: current_step as usize,
        started_at: started_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
        ended_at: ended_at.and_then(|s| s.parse().ok()),
        realized_pnl,
        error_message,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        orders,
    }))
}

fn write_cycle_row(conn: &rusqlite::Connection, record: &CycleRecord) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO cycles (id, strategy, cycle_key, initial_amount, current_amount, current_currency, state,
                              current_step, started_at, ended_at, realized_pnl, error_message, metadata_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(id) DO UPDATE SET
            current_amount = excluded.current_amount,
            current_currency = excluded.current_currency,
            state = excluded.state,
            current_step = excluded.current_step,
            ended_at = excluded.ended_at,
            realized_pnl = excluded.realized_pnl,
            error_message = excluded.error_message,
            metadata_json = excluded.metadata_json,
            updated_at = unixepoch()",
        params![
            record.id.to_string(),
            record.strategy,
            record.cycle.key(),
            record.initial_amount,
            record.current_amount,
            record.current_currency.as_str(),
            state_to_str(record.state),
            record.current_step as i64,
            record.started_at.to_rfc3339(),
            record.ended_at.map(|t| t.to_rfc3339()),
            record.realized_pnl,
            record.error_message,
            serde_json::to_string(&record.metadata)?,
        ],
    )?;

    conn.execute("DELETE FROM orders WHERE cycle_id = ?1", params![record.id.to_string()])?;
    for order in &record.orders {
        conn.execute(
            "INSERT INTO orders (id, cycle_id, venue_order_id, symbol, side, order_type, requested_amount, limit_price,
                                  state, filled_amount, remaining_amount, average_fill_price, retry_count, error_message,
                                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                order.id.to_string(),
                record.id.to_string(),
                order.venue_order_id,
                order.symbol,
                order.side.as_str(),
                match order.order_type {
                    OrderType::Market => "market",
                    OrderType::Limit => "limit",
                },
                order.requested_amount,
                order.limit_price,
                match order.state {
                    OrderState::Pending => "pending",
                    OrderState::Placed => "placed",
                    OrderState::PartiallyFilled => "partially_filled",
                    OrderState::Filled => "filled",
                    OrderState::Cancelled => "cancelled",
                    OrderState::Failed => "failed",
                },
                order.filled_amount,
                order.remaining_amount,
                order.average_fill_price,
                order.retry_count as i64,
                order.error_message,
                order.created_at.to_rfc3339(),
                order.updated_at.to_rfc3339(),
            ],
        )?;
    }
    Ok(())
}

pub struct StateStoreConfig {
    pub pool_size: usize,
    pub max_batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            max_batch_size: 50,
            flush_interval: Duration::from_secs(2),
        }
    }
}

pub struct StateStore {
    pool: Arc<ConnectionPool>,
    cache: Arc<cache::WriteThroughCache>,
}

impl StateStore {
    pub fn open(path: &std::path::Path, config: StateStoreConfig) -> Result<Self, StoreError> {
        Ok(Self {
            pool: Arc::new(ConnectionPool::open(path, config.pool_size)?),
            cache: Arc::new(cache::WriteThroughCache::new(config.max_batch_size, config.flush_interval)),
        })
    }

    pub fn open_in_memory(config: StateStoreConfig) -> Result<Self, StoreError> {
        Ok(Self {
            pool: Arc::new(ConnectionPool::open_in_memory(config.pool_size)?),
            cache: Arc::new(cache::WriteThroughCache::new(config.max_batch_size, config.flush_interval)),
        })
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Updates the cache and flushes immediately if the cache says to.
    pub async fn save(&self, record: CycleRecord) -> Result<(), StoreError> {
        if self.cache.save(record).await {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Option<CycleRecord> {
        self.cache.get(id).await
    }

    /// Single transaction batching every dirty cycle and its orders. On
    /// failure the dirty set is left intact so the next flush retries.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let dirty = self.cache.dirty_records().await;
        if dirty.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = dirty.iter().map(|r| r.id).collect();

        let mut conn = self.pool.acquire().await?;
        let result: Result<(), StoreError> = (|| {
            let tx = conn.transaction()?;
            for record in &dirty {
                write_cycle_row(&tx, record)?;
            }
            tx.commit()?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.cache.mark_clean(&ids).await;
                self.cache.evict_stale().await;
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "cycle flush failed, retaining dirty set for retry");
                Err(err)
            }
        }
    }

    /// Spawns the periodic flush task; the caller keeps the returned handle
    /// to abort it during shutdown.
    pub fn spawn_flush_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        let period = self.cache.flush_interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                if let Err(err) = store.flush().await {
                    error!(error = %err, "periodic flush failed");
                }
            }
        })
    }

    /// Flushes, then returns all cycles in {ACTIVE, PARTIALLY_FILLED,
    /// RECOVERING, PANIC_SELLING}, merging cached records over DB records
    /// of the same id.
    pub async fn get_active_cycles(&self, strategy: Option<&str>) -> Result<Vec<CycleRecord>, StoreError> {
        self.flush().await?;

        let conn = self.pool.acquire().await?;
        let query = match strategy {
            Some(_) => "SELECT id FROM cycles WHERE strategy = ?1 AND state IN ('active','partially_filled','recovering','panic_selling')",
            None => "SELECT id FROM cycles WHERE state IN ('active','partially_filled','recovering','panic_selling')",
        };
        let mut stmt = conn.prepare(query)?;
        let ids: Vec<String> = if let Some(s) = strategy {
            stmt.query_map(params![s], |r| r.get(0))?.collect::<Result<_, _>>()?
        } else {
            stmt.query_map([], |r| r.get(0))?.collect::<Result<_, _>>()?
        };
        drop(stmt);

        let mut merged = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for id in ids {
            if let Some(record) = load_cycle_row(&conn, &id)? {
                seen.insert(record.id);
                merged.push(record);
            }
        }
        drop(conn);

        for cached in self.cache.active().await {
            if strategy.is_some_and(|s| s != cached.strategy) {
                continue;
            }
            if seen.insert(cached.id) {
                merged.push(cached);
            } else if let Some(slot) = merged.iter_mut().find(|r| r.id == cached.id) {
                *slot = cached;
            }
        }

        info!(count = merged.len(), "recovered active cycles");
        Ok(merged)
    }

    /// Drops orphaned order rows whose cycle no longer exists.
    pub async fn validate_integrity(&self) -> Result<usize, StoreError> {
        let conn = self.pool.acquire().await?;
        let removed = conn.execute("DELETE FROM orders WHERE cycle_id NOT IN (SELECT id FROM cycles)", [])?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Currency;

    fn sample_cycle() -> CycleRecord {
        let cycle = Cycle::new(Currency::new("BTC").unwrap(), Currency::new("ETH").unwrap(), Currency::new("USDT").unwrap());
        let mut record = CycleRecord::new("s1", cycle, 1.0);
        record.transition(CycleState::Active);
        record
    }

    #[tokio::test]
    async fn save_then_flush_persists_to_db() {
        let store = StateStore::open_in_memory(StateStoreConfig::default()).unwrap();
        let record = sample_cycle();
        let id = record.id;
        store.save(record).await.unwrap();
        store.flush().await.unwrap();

        let conn = store.pool().acquire().await.unwrap();
        let found = load_cycle_row(&conn, &id.to_string()).unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn terminal_state_flushes_immediately() {
        let store = StateStore::open_in_memory(StateStoreConfig::default()).unwrap();
        let mut record = sample_cycle();
        record.complete();
        let id = record.id;
        store.save(record).await.unwrap();

        assert_eq!(store.cache.dirty_count().await, 0);
        let conn = store.pool().acquire().await.unwrap();
        assert!(load_cycle_row(&conn, &id.to_string()).unwrap().is_some());
    }

    #[tokio::test]
    async fn get_active_cycles_merges_cache_over_db() {
        let store = StateStore::open_in_memory(StateStoreConfig::default()).unwrap();
        let mut record = sample_cycle();
        let id = record.id;
        store.save(record.clone()).await.unwrap();
        store.flush().await.unwrap();

        record.current_step = 1;
        store.save(record).await.unwrap();

        let active = store.get_active_cycles(None).await.unwrap();
        let found = active.iter().find(|r| r.id == id).unwrap();
        assert_eq!(found.current_step, 1);
    }
}
