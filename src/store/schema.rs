//! Connection pool and schema migration (spec §4.5), grounded in the
//! teacher's `api/db.rs` pragma/migration style.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use rusqlite::{Connection, OpenFlags};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connection pool exhausted")]
    PoolExhausted,
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cycles (
            id                TEXT PRIMARY KEY,
            strategy          TEXT NOT NULL,
            cycle_key         TEXT NOT NULL,
            initial_amount    REAL NOT NULL,
            current_amount    REAL NOT NULL,
            current_currency  TEXT NOT NULL,
            state             TEXT NOT NULL,
            current_step      INTEGER NOT NULL,
            started_at        TEXT NOT NULL,
            ended_at          TEXT,
            realized_pnl      REAL,
            error_message     TEXT,
            metadata_json     TEXT NOT NULL,
            updated_at        INTEGER DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS orders (
            id                  TEXT PRIMARY KEY,
            cycle_id            TEXT NOT NULL REFERENCES cycles(id) ON DELETE CASCADE,
            venue_order_id      TEXT,
            symbol              TEXT NOT NULL,
            side                TEXT NOT NULL,
            order_type          TEXT NOT NULL,
            requested_amount    REAL NOT NULL,
            limit_price         REAL,
            state               TEXT NOT NULL,
            filled_amount       REAL NOT NULL,
            remaining_amount    REAL NOT NULL,
            average_fill_price  REAL,
            retry_count         INTEGER NOT NULL,
            error_message       TEXT,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cycle_updates (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            cycle_id    TEXT NOT NULL,
            field       TEXT NOT NULL,
            old_value   TEXT,
            new_value   TEXT,
            recorded_at INTEGER DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS cycle_reservations (
            id          TEXT PRIMARY KEY,
            strategy    TEXT NOT NULL,
            cycle_id    TEXT,
            status      TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            expires_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_orders_cycle_id ON orders(cycle_id);
        CREATE INDEX IF NOT EXISTS idx_cycles_state ON cycles(state);
        CREATE INDEX IF NOT EXISTS idx_reservations_strategy ON cycle_reservations(strategy);
        ",
    )?;
    Ok(())
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;
         PRAGMA cache_size = -16000;",
    )?;
    migrate(&conn)?;
    Ok(conn)
}

/// A bounded pool of pre-configured connections. Checkouts block (via a
/// semaphore) rather than fail when the pool is momentarily exhausted.
pub struct ConnectionPool {
    idle: Arc<Mutex<VecDeque<Connection>>>,
    semaphore: Arc<Semaphore>,
}

impl ConnectionPool {
    pub fn open(path: &Path, pool_size: usize) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut idle = VecDeque::with_capacity(pool_size);
        for _ in 0..pool_size {
            idle.push_back(open_connection(path)?);
        }
        Ok(Self {
            idle: Arc::new(Mutex::new(idle)),
            semaphore: Arc::new(Semaphore::new(pool_size)),
        })
    }

    /// In-memory pool for tests. A plain `Connection::open_in_memory()`
    /// gives every connection its own private database, which breaks
    /// pool semantics the moment a write lands on one connection and a
    /// read pops a different one. Name the memory database explicitly
    /// and open with `cache=shared` so every connection in the pool sees
    /// the same data; the unique name keeps concurrently running tests
    /// from colliding on the same shared database.
    pub fn open_in_memory(pool_size: usize) -> Result<Self, StoreError> {
        let uri = format!("file:triarb-{}?mode=memory&cache=shared", Uuid::new_v4());
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI;
        let mut idle = VecDeque::with_capacity(pool_size);
        for _ in 0..pool_size {
            let conn = Connection::open_with_flags(&uri, flags)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            migrate(&conn)?;
            idle.push_back(conn);
        }
        Ok(Self {
            idle: Arc::new(Mutex::new(idle)),
            semaphore: Arc::new(Semaphore::new(pool_size)),
        })
    }

    pub async fn acquire(&self) -> Result<PooledConnection, StoreError> {
        let permit = self.semaphore.clone().acquire_owned().await.map_err(|_| StoreError::PoolExhausted)?;
        let conn = self.idle.lock().await.pop_front().ok_or(StoreError::PoolExhausted)?;
        Ok(PooledConnection {
            conn: Some(conn),
            idle: self.idle.clone(),
            _permit: permit,
        })
    }
}

pub struct PooledConnection {
    conn: Option<Connection>,
    idle: Arc<Mutex<VecDeque<Connection>>>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let idle = self.idle.clone();
            tokio::spawn(async move {
                idle.lock().await.push_back(conn);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_round_trips_a_connection() {
        let pool = ConnectionPool::open_in_memory(2).unwrap();
        {
            let conn = pool.acquire().await.unwrap();
            conn.execute("INSERT INTO cycle_reservations (id, strategy, status, created_at, expires_at) VALUES ('a','s','pending','now','later')", []).unwrap();
        }
        let conn = pool.acquire().await.unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cycle_reservations", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn acquiring_beyond_pool_size_waits_for_release() {
        let pool = ConnectionPool::open_in_memory(1).unwrap();
        let first = pool.acquire().await.unwrap();
        drop(first);
        let second = pool.acquire().await.unwrap();
        drop(second);
    }
}
