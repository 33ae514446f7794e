//! Postgres-backed `Storage`, following the teacher's
//! `TimeSeriesManager`/`RedisManager` shape: a struct wrapping a
//! `deadpool_postgres::Pool`, built once at startup, cheaply cloned
//! through an `Arc` by callers.
//!
//! Transactions are driven with raw `BEGIN`/`COMMIT`/`ROLLBACK` over an
//! owned pooled connection rather than `tokio_postgres::Transaction<'_>`,
//! which borrows its client and so can't be boxed into a lifetime-free
//! trait object — the same reason the teacher's `store_message`/
//! `query_range` issue plain statements against `self.pool.get().await?`
//! rather than wrapping every call in the typed transaction API.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use num_bigint::BigUint;
use tokio_postgres::NoTls;

use crate::catalog::{Catalog, CatalogItem};
use crate::error::StorageError;
use crate::storage::traits::{AddingRow, BuyingRow, Clock, RoomTransaction, Storage};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS m_item (
    item_id BIGINT PRIMARY KEY,
    power1 BIGINT NOT NULL,
    power2 BIGINT NOT NULL,
    power3 BIGINT NOT NULL,
    power4 BIGINT NOT NULL,
    price1 BIGINT NOT NULL,
    price2 BIGINT NOT NULL,
    price3 BIGINT NOT NULL,
    price4 BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS adding (
    room_name TEXT NOT NULL,
    time BIGINT NOT NULL,
    isu TEXT NOT NULL,
    PRIMARY KEY (room_name, time)
);

CREATE TABLE IF NOT EXISTS buying (
    room_name TEXT NOT NULL,
    item_id BIGINT NOT NULL,
    ordinal BIGINT NOT NULL,
    time BIGINT NOT NULL,
    PRIMARY KEY (room_name, item_id, ordinal)
);

CREATE TABLE IF NOT EXISTS room_time (
    room_name TEXT PRIMARY KEY,
    time BIGINT NOT NULL
);
"#;

pub struct PostgresStorage {
    pool: Pool,
}

impl PostgresStorage {
    pub fn new(config: tokio_postgres::Config, max_pool_size: usize) -> Result<Self, StorageError> {
        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = Manager::from_config(config, NoTls, manager_config);
        let pool = Pool::builder(manager).max_size(max_pool_size).build()?;
        Ok(Self { pool })
    }

    /// `adding`/`buying`/`room_time` are this crate's own tables (unlike
    /// `m_item`, whose DDL/loading is the catalog loader's job per §1's
    /// "treated as external collaborators" — `m_item` is only *read*
    /// here, via [`PostgresStorage::load_catalog`]).
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA_SQL).await?;
        Ok(())
    }

    pub async fn load_catalog(&self) -> Result<Catalog, StorageError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT item_id, power1, power2, power3, power4, price1, price2, price3, price4 \
                 FROM m_item",
                &[],
            )
            .await?;

        let items = rows.into_iter().map(|row| CatalogItem {
            item_id: row.get::<_, i64>(0) as u32,
            p1: row.get::<_, i64>(1) as u64,
            p2: row.get::<_, i64>(2) as u64,
            p3: row.get::<_, i64>(3) as u64,
            p4: row.get::<_, i64>(4) as u64,
            q1: row.get::<_, i64>(5) as u64,
            q2: row.get::<_, i64>(6) as u64,
            q3: row.get::<_, i64>(7) as u64,
            q4: row.get::<_, i64>(8) as u64,
        });
        Ok(Catalog::from_items(items))
    }
}

#[async_trait]
impl Clock for PostgresStorage {
    /// Reads the *database server's* clock, not the app process's, so a
    /// skewed app host can never make `room_time` appear to run ahead of
    /// `Now()` (spec §4.4's `RoomTimeFuture` check depends on this).
    async fn now_ms(&self) -> i64 {
        match self.pool.get().await {
            Ok(client) => {
                match client
                    .query_one(
                        "SELECT floor(extract(epoch from clock_timestamp()) * 1000)::bigint",
                        &[],
                    )
                    .await
                {
                    Ok(row) => row.get(0),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to read server clock");
                        local_now_ms()
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to acquire connection for clock read");
                local_now_ms()
            }
        }
    }
}

fn local_now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn begin(&self) -> Result<Box<dyn RoomTransaction>, StorageError> {
        let client = self.pool.get().await?;
        client.batch_execute("BEGIN ISOLATION LEVEL REPEATABLE READ").await?;
        Ok(Box::new(PostgresTransaction { client: Some(client) }))
    }

    async fn truncate_all(&self) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        client.batch_execute("TRUNCATE adding, buying, room_time").await?;
        Ok(())
    }
}

/// Holds its pooled client in an `Option` so `commit`/`rollback` can move it
/// out to issue the final statement, leaving `Drop` able to tell "finished
/// cleanly" (`None`) apart from "abandoned mid-transaction" (`Some`).
struct PostgresTransaction {
    client: Option<Object>,
}

impl PostgresTransaction {
    fn conn(&mut self) -> &mut Object {
        self.client.as_mut().expect("transaction used after commit/rollback")
    }
}

fn parse_biguint(value: &str, column: &'static str) -> Result<BigUint, StorageError> {
    value
        .parse()
        .map_err(|_| StorageError::MalformedDecimal { column, value: value.to_string() })
}

#[async_trait]
impl RoomTransaction for PostgresTransaction {
    async fn ensure_room(&mut self, room: &str) -> Result<(), StorageError> {
        self.conn()
            .execute(
                "INSERT INTO room_time(room_name, time) VALUES ($1, 0) ON CONFLICT (room_name) DO NOTHING",
                &[&room],
            )
            .await?;
        Ok(())
    }

    async fn room_time_exclusive(&mut self, room: &str) -> Result<i64, StorageError> {
        let row = self
            .conn()
            .query_one("SELECT time FROM room_time WHERE room_name = $1 FOR UPDATE", &[&room])
            .await?;
        Ok(row.get(0))
    }

    async fn room_time_shared(&mut self, room: &str) -> Result<i64, StorageError> {
        let row = self
            .conn()
            .query_one("SELECT time FROM room_time WHERE room_name = $1 FOR SHARE", &[&room])
            .await?;
        Ok(row.get(0))
    }

    async fn set_room_time(&mut self, room: &str, time: i64) -> Result<(), StorageError> {
        self.conn()
            .execute("UPDATE room_time SET time = $1 WHERE room_name = $2", &[&time, &room])
            .await?;
        Ok(())
    }

    async fn accumulate_adding(
        &mut self,
        room: &str,
        time: i64,
        isu: &BigUint,
    ) -> Result<(), StorageError> {
        self.conn()
            .execute(
                "INSERT INTO adding(room_name, time, isu) VALUES ($1, $2, '0') \
                 ON CONFLICT (room_name, time) DO NOTHING",
                &[&room, &time],
            )
            .await?;

        let row = self
            .conn()
            .query_one(
                "SELECT isu FROM adding WHERE room_name = $1 AND time = $2 FOR UPDATE",
                &[&room, &time],
            )
            .await?;
        let current: String = row.get(0);
        let updated = parse_biguint(&current, "adding.isu")? + isu;

        self.conn()
            .execute(
                "UPDATE adding SET isu = $1 WHERE room_name = $2 AND time = $3",
                &[&updated.to_string(), &room, &time],
            )
            .await?;
        Ok(())
    }

    async fn count_buying(&mut self, room: &str, item_id: u32) -> Result<i64, StorageError> {
        let item_id = item_id as i64;
        let row = self
            .conn()
            .query_one(
                "SELECT COUNT(*) FROM buying WHERE room_name = $1 AND item_id = $2",
                &[&room, &item_id],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn insert_buying(
        &mut self,
        room: &str,
        item_id: u32,
        ordinal: i64,
        time: i64,
    ) -> Result<(), StorageError> {
        let item_id = item_id as i64;
        self.conn()
            .execute(
                "INSERT INTO buying(room_name, item_id, ordinal, time) VALUES ($1, $2, $3, $4)",
                &[&room, &item_id, &ordinal, &time],
            )
            .await?;
        Ok(())
    }

    async fn adding_up_to(&mut self, room: &str, at: i64) -> Result<Vec<AddingRow>, StorageError> {
        let rows = self
            .conn()
            .query(
                "SELECT time, isu FROM adding WHERE room_name = $1 AND time <= $2",
                &[&room, &at],
            )
            .await?;
        rows_to_adding(rows)
    }

    async fn all_buying(&mut self, room: &str) -> Result<Vec<BuyingRow>, StorageError> {
        let rows = self
            .conn()
            .query(
                "SELECT item_id, ordinal, time FROM buying WHERE room_name = $1",
                &[&room],
            )
            .await?;
        Ok(rows_to_buying(rows))
    }

    async fn adding_after(&mut self, room: &str, after: i64) -> Result<Vec<AddingRow>, StorageError> {
        let rows = self
            .conn()
            .query(
                "SELECT time, isu FROM adding WHERE room_name = $1 AND time > $2",
                &[&room, &after],
            )
            .await?;
        rows_to_adding(rows)
    }

    async fn buying_after(&mut self, room: &str, after: i64) -> Result<Vec<BuyingRow>, StorageError> {
        let rows = self
            .conn()
            .query(
                "SELECT item_id, ordinal, time FROM buying WHERE room_name = $1 AND time > $2",
                &[&room, &after],
            )
            .await?;
        Ok(rows_to_buying(rows))
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        let client = self.client.take().expect("transaction used after commit/rollback");
        client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        let client = self.client.take().expect("transaction used after commit/rollback");
        client.batch_execute("ROLLBACK").await?;
        Ok(())
    }
}

fn rows_to_adding(rows: Vec<tokio_postgres::Row>) -> Result<Vec<AddingRow>, StorageError> {
    rows.into_iter()
        .map(|row| {
            let isu: String = row.get(1);
            Ok(AddingRow {
                time: row.get(0),
                isu: parse_biguint(&isu, "adding.isu")?,
            })
        })
        .collect()
}

fn rows_to_buying(rows: Vec<tokio_postgres::Row>) -> Vec<BuyingRow> {
    rows.into_iter()
        .map(|row| BuyingRow {
            item_id: row.get::<_, i64>(0) as u32,
            ordinal: row.get(1),
            time: row.get(2),
        })
        .collect()
}

/// Mirrors `tokio_postgres::Transaction`'s own `Drop`: a connection dropped
/// mid-transaction must not go back to the pool still `BEGIN`'d, so a
/// best-effort `ROLLBACK` is spawned onto the runtime (`Drop` itself can't
/// `.await`). Every `RoomOps` call path is expected to reach `commit` or
/// `rollback` explicitly; this only fires on a bug or a task abort.
impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            tracing::warn!("room transaction dropped without explicit commit/rollback; issuing ROLLBACK");
            tokio::spawn(async move {
                if let Err(e) = client.batch_execute("ROLLBACK").await {
                    tracing::error!(error = %e, "failed to roll back dropped transaction");
                }
            });
        }
    }
}
