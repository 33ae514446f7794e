//! The persistence capability set (spec §4.3), expressed as traits so
//! `PostgresStorage` (production) and `MemoryStorage` (tests) can satisfy
//! the same contract. The teacher's `RedisManager`/`TimeSeriesManager`
//! don't need this split since each wraps exactly one backend; this crate
//! needs it because §8's monotonic-clock and rollback scenarios must be
//! testable without a live database.

use async_trait::async_trait;
use num_bigint::BigUint;

use crate::error::StorageError;

/// A future-or-present `adding` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddingRow {
    pub time: i64,
    pub isu: BigUint,
}

/// A `buying` row. `ordinal` is 1-based and dense per `(room, item_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyingRow {
    pub item_id: u32,
    pub ordinal: i64,
    pub time: i64,
}

/// Server wall-clock source, millisecond resolution, matching the
/// reference implementation's `floor(unix_timestamp(current_timestamp(3))
/// * 1000)`. Asynchronous because the canonical source of truth is the
/// database server's own clock (`SELECT floor(extract(epoch from
/// clock_timestamp())*1000)`), not the application process's — the
/// reference implementation deliberately reads `current_timestamp(3)`
/// from the same MySQL connection used for the room lock, so that a
/// skewed app-server clock can never violate room-time monotonicity.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn now_ms(&self) -> i64;
}

/// One open transaction against `adding`/`buying`/`room_time`. Methods
/// mirror the statements spec §4.3 lists. Dropping a transaction without
/// calling `commit` must roll it back (true of both `PostgresStorage`'s
/// `tokio_postgres::Transaction`, which rolls back on drop, and
/// `MemoryStorage`'s in-memory snapshot-copy).
#[async_trait]
pub trait RoomTransaction: Send {
    /// Insert `(room, time=0)` into `room_time` if absent.
    async fn ensure_room(&mut self, room: &str) -> Result<(), StorageError>;

    /// Exclusive read (`FOR UPDATE`) of `room_time.time`.
    async fn room_time_exclusive(&mut self, room: &str) -> Result<i64, StorageError>;

    /// Shared read (`FOR SHARE`) of `room_time.time`.
    async fn room_time_shared(&mut self, room: &str) -> Result<i64, StorageError>;

    /// Write `room_time.time`.
    async fn set_room_time(&mut self, room: &str, time: i64) -> Result<(), StorageError>;

    /// Upsert-accumulate: `adding(room, time, isu)` merges additively on
    /// `(room, time)` collision.
    async fn accumulate_adding(
        &mut self,
        room: &str,
        time: i64,
        isu: &BigUint,
    ) -> Result<(), StorageError>;

    /// Count of `buying` rows for `(room, item_id)` — the persisted
    /// "already bought" count.
    async fn count_buying(&mut self, room: &str, item_id: u32) -> Result<i64, StorageError>;

    /// Insert a new `buying` row. Callers must pass `ordinal =
    /// prev_count + 1` (spec §9's dense-ordinal identity).
    async fn insert_buying(
        &mut self,
        room: &str,
        item_id: u32,
        ordinal: i64,
        time: i64,
    ) -> Result<(), StorageError>;

    /// All `adding` rows for `room` with `time <= at`.
    async fn adding_up_to(&mut self, room: &str, at: i64) -> Result<Vec<AddingRow>, StorageError>;

    /// All `buying` rows for `room` (every ordinal, regardless of time —
    /// `BuyItem`'s admission replay needs the full history).
    async fn all_buying(&mut self, room: &str) -> Result<Vec<BuyingRow>, StorageError>;

    /// `adding` rows for `room` strictly after `after`.
    async fn adding_after(&mut self, room: &str, after: i64) -> Result<Vec<AddingRow>, StorageError>;

    /// `buying` rows for `room` strictly after `after`.
    async fn buying_after(&mut self, room: &str, after: i64) -> Result<Vec<BuyingRow>, StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// Top-level storage capability: open transactions, get the wall clock,
/// and the destructive `Initialize` truncation.
#[async_trait]
pub trait Storage: Clock + Send + Sync {
    async fn begin(&self) -> Result<Box<dyn RoomTransaction>, StorageError>;

    /// `TRUNCATE adding, buying, room_time` — the sole destructive
    /// operation (spec §3 "Lifecycles").
    async fn truncate_all(&self) -> Result<(), StorageError>;
}
