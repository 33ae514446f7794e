//! Error kinds for the persistence and room-operation layers (spec §7).
//!
//! Follows the teacher's `MarketDataError` (`store/global_market_data.rs`):
//! a `thiserror::Error` enum per layer, `anyhow::Result` at the edges that
//! don't need to distinguish kinds (the CLI/server boot path).

use thiserror::Error;

/// Failures from the storage layer: lost connection, deadlock,
/// serialization failure, or a row shape the application invariants
/// didn't expect. All are the `Storage` kind of §7 — rollback, no retry
/// logic here (the caller may retry once if it chooses).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("build pool error: {0}")]
    BuildPool(#[from] deadpool_postgres::BuildError),

    #[error("malformed decimal in column {column}: {value}")]
    MalformedDecimal { column: &'static str, value: String },

    #[error("room {room} item {item_id}: buying ordinals are not a dense prefix (got {ordinal}, expected {expected})")]
    NonDenseOrdinal {
        room: String,
        item_id: u32,
        ordinal: i64,
        expected: i64,
    },
}

/// Op-level failures surfaced by `RoomOps` (spec §7). `BadRequest` is not
/// a member here: it is detected before a transaction is opened, at the
/// session decode layer (`session.rs`), and closes the socket rather than
/// rolling anything back.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room_time is in the future")]
    RoomTimeFuture,

    #[error("requested time is in the past")]
    ReqTimePast,

    #[error("item already bought: expected prev_count to match persisted count")]
    AlreadyBought,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("unknown item_id {0}")]
    UnknownItem(u32),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
