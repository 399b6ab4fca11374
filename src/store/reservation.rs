//! Atomic per-strategy concurrency reservation protocol (spec §4.5).

use std::time::Duration;

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use super::schema::{ConnectionPool, StoreError};

/// Steps, all inside one transaction:
/// 1. expire reservations past their TTL,
/// 2. count active cycles + pending reservations for the strategy,
/// 3. abort (return `None`) if that count already meets `max_open_cycles`,
/// 4. otherwise insert a new pending reservation and return its id.
pub async fn reserve_slot(pool: &ConnectionPool, strategy: &str, max_open_cycles: u32, ttl: Duration) -> Result<Option<Uuid>, StoreError> {
    let mut conn = pool.acquire().await?;
    let tx = conn.transaction()?;
    let now = Utc::now();

    tx.execute("DELETE FROM cycle_reservations WHERE expires_at < ?1", params![now.to_rfc3339()])?;

    let active_cycles: i64 = tx.query_row(
        "SELECT COUNT(*) FROM cycles WHERE strategy = ?1 AND state NOT IN ('completed', 'failed')",
        params![strategy],
        |r| r.get(0),
    )?;
    let pending_reservations: i64 = tx.query_row(
        "SELECT COUNT(*) FROM cycle_reservations WHERE strategy = ?1",
        params![strategy],
        |r| r.get(0),
    )?;

    if (active_cycles + pending_reservations) as u32 >= max_open_cycles {
        tx.rollback()?;
        return Ok(None);
    }

    let id = Uuid::new_v4();
    let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(30));
    tx.execute(
        "INSERT INTO cycle_reservations (id, strategy, cycle_id, status, created_at, expires_at) VALUES (?1, ?2, NULL, 'pending', ?3, ?4)",
        params![id.to_string(), strategy, now.to_rfc3339(), expires_at.to_rfc3339()],
    )?;
    tx.commit()?;
    Ok(Some(id))
}

/// Associates a confirmed reservation with the cycle it authorized, once
/// the `CycleRecord` exists.
pub async fn confirm(pool: &ConnectionPool, reservation_id: Uuid, cycle_id: Uuid) -> Result<(), StoreError> {
    let conn = pool.acquire().await?;
    conn.execute(
        "UPDATE cycle_reservations SET status = 'confirmed', cycle_id = ?2 WHERE id = ?1",
        params![reservation_id.to_string(), cycle_id.to_string()],
    )?;
    Ok(())
}

/// Releases a reservation, e.g. because validation failed before the cycle
/// was ever created.
pub async fn release(pool: &ConnectionPool, reservation_id: Uuid) -> Result<(), StoreError> {
    let conn = pool.acquire().await?;
    conn.execute("DELETE FROM cycle_reservations WHERE id = ?1", params![reservation_id.to_string()])?;
    Ok(())
}

pub async fn cleanup_expired(pool: &ConnectionPool) -> Result<usize, StoreError> {
    let conn = pool.acquire().await?;
    let now = Utc::now();
    let removed = conn.execute("DELETE FROM cycle_reservations WHERE expires_at < ?1", params![now.to_rfc3339()])?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_slot_blocks_once_limit_reached() {
        let pool = super::super::schema::ConnectionPool::open_in_memory(2).unwrap();
        let first = reserve_slot(&pool, "s1", 1, Duration::from_secs(30)).await.unwrap();
        assert!(first.is_some());

        let second = reserve_slot(&pool, "s1", 1, Duration::from_secs(30)).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn expired_reservations_are_evicted_before_counting() {
        let pool = super::super::schema::ConnectionPool::open_in_memory(2).unwrap();
        let first = reserve_slot(&pool, "s1", 1, Duration::from_millis(1)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = reserve_slot(&pool, "s1", 1, Duration::from_secs(30)).await.unwrap();
        assert!(second.is_some());
        assert_ne!(first, second.unwrap());
    }

    #[tokio::test]
    async fn release_frees_the_slot() {
        let pool = super::super::schema::ConnectionPool::open_in_memory(2).unwrap();
        let id = reserve_slot(&pool, "s1", 1, Duration::from_secs(30)).await.unwrap().unwrap();
        release(&pool, id).await.unwrap();
        let second = reserve_slot(&pool, "s1", 1, Duration::from_secs(30)).await.unwrap();
        assert!(second.is_some());
    }
}
