//! In-memory `Storage` implementation for unit tests. No external service
//! required; exclusive/shared locking is approximated with a single
//! per-room `tokio::sync::Mutex` (real concurrent-shared-reader semantics
//! are `PostgresStorage`'s job — these tests assert sequencing and
//! rollback atomicity, not reader parallelism).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use num_bigint::BigUint;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::StorageError;
use crate::storage::traits::{AddingRow, BuyingRow, Clock, RoomTransaction, Storage};

#[derive(Debug, Clone, Default)]
struct RoomRecord {
    room_time: i64,
    adding: HashMap<i64, BigUint>,
    buying: Vec<BuyingRow>,
}

/// Real wall clock, millisecond resolution.
#[derive(Debug, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    async fn now_ms(&self) -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as i64
    }
}

/// A pre-programmed sequence of clock readings, consumed one per call and
/// repeating the last value once exhausted. Used to reproduce scenario 6
/// in §8 ("inject `Now()` that returns 1000, 1001, 1000").
#[derive(Debug)]
pub struct ScriptedClock {
    readings: Vec<i64>,
    next: AtomicUsize,
}

impl ScriptedClock {
    pub fn new(readings: impl Into<Vec<i64>>) -> Self {
        Self {
            readings: readings.into(),
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Clock for ScriptedClock {
    async fn now_ms(&self) -> i64 {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        *self
            .readings
            .get(i)
            .unwrap_or_else(|| self.readings.last().expect("ScriptedClock needs >=1 reading"))
    }
}

pub struct MemoryStorage {
    rooms: DashMap<String, Arc<AsyncMutex<RoomRecord>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: DashMap::new(),
            clock,
        }
    }

    fn room_mutex(&self, room: &str) -> Arc<AsyncMutex<RoomRecord>> {
        self.rooms
            .entry(room.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(RoomRecord::default())))
            .clone()
    }
}

#[async_trait]
impl Clock for MemoryStorage {
    async fn now_ms(&self) -> i64 {
        self.clock.now_ms().await
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn RoomTransaction>, StorageError> {
        Ok(Box::new(MemoryTransaction {
            storage: self.rooms.clone(),
            state: TxState::Unopened,
        }))
    }

    async fn truncate_all(&self) -> Result<(), StorageError> {
        self.rooms.clear();
        Ok(())
    }
}

enum TxState {
    Unopened,
    Open {
        room: String,
        guard: OwnedMutexGuard<RoomRecord>,
        snapshot: RoomRecord,
    },
}

struct MemoryTransaction {
    // Cloning the DashMap handle is cheap (it's sharded internally, each
    // shard behind its own lock) and lets the transaction look up the
    // room's mutex lazily on first use.
    storage: DashMap<String, Arc<AsyncMutex<RoomRecord>>>,
    state: TxState,
}

impl MemoryTransaction {
    async fn open(&mut self, room: &str) -> &mut RoomRecord {
        if let TxState::Open { room: open_room, .. } = &self.state {
            assert_eq!(open_room, room, "a transaction touches exactly one room");
        } else {
            let mutex = self
                .storage
                .entry(room.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(RoomRecord::default())))
                .clone();
            let guard = mutex.lock_owned().await;
            let snapshot = guard.clone();
            self.state = TxState::Open {
                room: room.to_string(),
                guard,
                snapshot,
            };
        }
        match &mut self.state {
            TxState::Open { snapshot, .. } => snapshot,
            TxState::Unopened => unreachable!(),
        }
    }
}

#[async_trait]
impl RoomTransaction for MemoryTransaction {
    async fn ensure_room(&mut self, room: &str) -> Result<(), StorageError> {
        self.open(room).await;
        Ok(())
    }

    async fn room_time_exclusive(&mut self, room: &str) -> Result<i64, StorageError> {
        Ok(self.open(room).await.room_time)
    }

    async fn room_time_shared(&mut self, room: &str) -> Result<i64, StorageError> {
        Ok(self.open(room).await.room_time)
    }

    async fn set_room_time(&mut self, room: &str, time: i64) -> Result<(), StorageError> {
        self.open(room).await.room_time = time;
        Ok(())
    }

    async fn accumulate_adding(
        &mut self,
        room: &str,
        time: i64,
        isu: &BigUint,
    ) -> Result<(), StorageError> {
        let record = self.open(room).await;
        record
            .adding
            .entry(time)
            .and_modify(|v| *v += isu.clone())
            .or_insert_with(|| isu.clone());
        Ok(())
    }

    async fn count_buying(&mut self, room: &str, item_id: u32) -> Result<i64, StorageError> {
        let record = self.open(room).await;
        Ok(record.buying.iter().filter(|b| b.item_id == item_id).count() as i64)
    }

    async fn insert_buying(
        &mut self,
        room: &str,
        item_id: u32,
        ordinal: i64,
        time: i64,
    ) -> Result<(), StorageError> {
        self.open(room).await.buying.push(BuyingRow { item_id, ordinal, time });
        Ok(())
    }

    async fn adding_up_to(&mut self, room: &str, at: i64) -> Result<Vec<AddingRow>, StorageError> {
        let record = self.open(room).await;
        Ok(record
            .adding
            .iter()
            .filter(|(t, _)| **t <= at)
            .map(|(t, isu)| AddingRow { time: *t, isu: isu.clone() })
            .collect())
    }

    async fn all_buying(&mut self, room: &str) -> Result<Vec<BuyingRow>, StorageError> {
        Ok(self.open(room).await.buying.clone())
    }

    async fn adding_after(&mut self, room: &str, after: i64) -> Result<Vec<AddingRow>, StorageError> {
        let record = self.open(room).await;
        Ok(record
            .adding
            .iter()
            .filter(|(t, _)| **t > after)
            .map(|(t, isu)| AddingRow { time: *t, isu: isu.clone() })
            .collect())
    }

    async fn buying_after(&mut self, room: &str, after: i64) -> Result<Vec<BuyingRow>, StorageError> {
        let record = self.open(room).await;
        Ok(record.buying.iter().filter(|b| b.time > after).copied().collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        if let TxState::Open { mut guard, snapshot, .. } = self.state {
            *guard = snapshot;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        // Dropping the guard without writing the snapshot back discards
        // every change the transaction made.
        drop(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_persists_writes_rollback_discards_them() {
        let storage = MemoryStorage::new(Arc::new(SystemClock));

        let mut tx = storage.begin().await.unwrap();
        tx.ensure_room("A").await.unwrap();
        tx.set_room_time("A", 42).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.room_time_exclusive("A").await.unwrap(), 42);
        tx.set_room_time("A", 99).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.room_time_exclusive("A").await.unwrap(), 42);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn scripted_clock_replays_then_repeats_last() {
        let clock = ScriptedClock::new(vec![1000, 1001, 1000]);
        assert_eq!(clock.now_ms().await, 1000);
        assert_eq!(clock.now_ms().await, 1001);
        assert_eq!(clock.now_ms().await, 1000);
        assert_eq!(clock.now_ms().await, 1000);
    }
}
