//! Per-room locking discipline (spec §4.4). Two entry points operate on an
//! already-open transaction: `acquire_exclusive` (read-modify-write
//! operations) and the `acquire_shared`/`release_shared` pair (read-only
//! status queries, which don't block each other but still advance
//! `room_time` to the observed clock value on release).

use crate::error::RoomError;
use crate::storage::{Clock, RoomTransaction};

/// Exclusive-lock `room_time`, validate it against the server clock and
/// the caller's requested time, and advance it. Returns the validated
/// current time — callers use this, not their own clock read, for every
/// subsequent computation in the operation.
pub async fn acquire_exclusive(
    tx: &mut dyn RoomTransaction,
    clock: &dyn Clock,
    room: &str,
    req_time: i64,
) -> Result<i64, RoomError> {
    tx.ensure_room(room).await?;
    let room_time = tx.room_time_exclusive(room).await?;
    let current_time = clock.now_ms().await;

    if room_time > current_time {
        return Err(RoomError::RoomTimeFuture);
    }
    if req_time > 0 && req_time < current_time {
        return Err(RoomError::ReqTimePast);
    }

    tx.set_room_time(room, current_time).await?;
    Ok(current_time)
}

/// Shared-lock `room_time` for a read-only query. The clock write is
/// deferred to [`release_shared`] — concurrent shared readers may all
/// observe the same `current_time` and each write it back harmlessly.
pub async fn acquire_shared(
    tx: &mut dyn RoomTransaction,
    clock: &dyn Clock,
    room: &str,
) -> Result<i64, RoomError> {
    tx.ensure_room(room).await?;
    let room_time = tx.room_time_shared(room).await?;
    let current_time = clock.now_ms().await;

    if room_time > current_time {
        return Err(RoomError::RoomTimeFuture);
    }
    Ok(current_time)
}

pub async fn release_shared(
    tx: &mut dyn RoomTransaction,
    room: &str,
    current_time: i64,
) -> Result<(), RoomError> {
    tx.set_room_time(room, current_time).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::{MemoryStorage, ScriptedClock, Storage};

    #[tokio::test]
    async fn exclusive_advances_room_time_to_current() {
        let storage = MemoryStorage::new(Arc::new(ScriptedClock::new(vec![1000])));
        let mut tx = storage.begin().await.unwrap();

        let t = acquire_exclusive(&mut *tx, &storage, "A", 0).await.unwrap();
        assert_eq!(t, 1000);
        assert_eq!(tx.room_time_exclusive("A").await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn req_time_in_the_past_is_rejected() {
        let storage = MemoryStorage::new(Arc::new(ScriptedClock::new(vec![1000])));
        let mut tx = storage.begin().await.unwrap();

        let err = acquire_exclusive(&mut *tx, &storage, "A", 500).await.unwrap_err();
        assert!(matches!(err, RoomError::ReqTimePast));
    }

    #[tokio::test]
    async fn zero_req_time_bypasses_the_past_check() {
        let storage = MemoryStorage::new(Arc::new(ScriptedClock::new(vec![1000])));
        let mut tx = storage.begin().await.unwrap();

        let t = acquire_exclusive(&mut *tx, &storage, "A", 0).await.unwrap();
        assert_eq!(t, 1000);
    }

    #[tokio::test]
    async fn room_time_ahead_of_clock_fails_before_any_write() {
        // Scenario 6 (§8): Now() yields 1000, 1001, 1000 — the third
        // acquire must fail with RoomTimeFuture and leave room_time at 1001.
        let storage = MemoryStorage::new(Arc::new(ScriptedClock::new(vec![1000, 1001, 1000])));

        {
            let mut tx = storage.begin().await.unwrap();
            acquire_exclusive(&mut *tx, &storage, "A", 0).await.unwrap();
            tx.commit().await.unwrap();
        }
        {
            let mut tx = storage.begin().await.unwrap();
            acquire_exclusive(&mut *tx, &storage, "A", 0).await.unwrap();
            tx.commit().await.unwrap();
        }
        {
            let mut tx = storage.begin().await.unwrap();
            let err = acquire_exclusive(&mut *tx, &storage, "A", 0).await.unwrap_err();
            assert!(matches!(err, RoomError::RoomTimeFuture));
            tx.rollback().await.unwrap();
        }

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.room_time_exclusive("A").await.unwrap(), 1001);
    }
}
