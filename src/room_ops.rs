//! Room-level operations (spec §4.6), each wrapped in a single transaction
//! that rolls back on any failure: `add_isu`, `buy_item`, `get_status`.
//! Built directly on [`crate::room_lock`] (locking/monotonicity) and
//! [`crate::status::compute_status`] (the pure projection).

use num_bigint::{BigInt, BigUint};
use num_traits::Zero;

use crate::error::RoomError;
use crate::room_lock::{acquire_exclusive, acquire_shared, release_shared};
use crate::status::{compute_status, GameStatus};
use crate::storage::{RoomTransaction, Storage};
use crate::{Catalog, CatalogItem};

pub struct RoomOps<S> {
    storage: S,
    catalog: Catalog,
}

impl<S: Storage> RoomOps<S> {
    pub fn new(storage: S, catalog: Catalog) -> Self {
        Self { storage, catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn item(&self, item_id: u32) -> Result<&CatalogItem, RoomError> {
        self.catalog.get(item_id).ok_or(RoomError::UnknownItem(item_id))
    }

    /// Every op funnels its transaction through here so neither branch can
    /// leave it dangling for `Drop` to find: success commits, any failure
    /// — `AlreadyBought`/`InsufficientFunds` included, not just storage
    /// faults — rolls back explicitly before the error propagates.
    async fn finish<T>(
        &self,
        tx: Box<dyn RoomTransaction>,
        result: Result<T, RoomError>,
    ) -> Result<T, RoomError> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "failed to roll back transaction after operation error");
                }
                Err(err)
            }
        }
    }

    /// Truncates `adding`/`buying`/`room_time`. The sole destructive
    /// operation; safe to call repeatedly (spec §8 "idempotence of
    /// Initialize").
    pub async fn initialize(&self) -> Result<(), RoomError> {
        self.storage.truncate_all().await?;
        Ok(())
    }

    /// Returns `false` on any failure rather than propagating an error —
    /// per §7, op-level failures surface to the client solely as
    /// `is_success=false`.
    pub async fn add_isu(&self, room: &str, req_time: i64, isu: BigUint) -> bool {
        match self.try_add_isu(room, req_time, isu).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(room, req_time, error = %e, "add_isu failed");
                false
            }
        }
    }

    async fn try_add_isu(&self, room: &str, req_time: i64, isu: BigUint) -> Result<(), RoomError> {
        let mut tx = self.storage.begin().await?;
        let result = self.do_add_isu(&mut *tx, room, req_time, &isu).await;
        self.finish(tx, result).await
    }

    async fn do_add_isu(
        &self,
        tx: &mut dyn RoomTransaction,
        room: &str,
        req_time: i64,
        isu: &BigUint,
    ) -> Result<(), RoomError> {
        acquire_exclusive(tx, &self.storage, room, req_time).await?;
        tx.accumulate_adding(room, req_time, isu).await?;
        Ok(())
    }

    pub async fn buy_item(&self, room: &str, req_time: i64, item_id: u32, prev_count: i64) -> bool {
        match self.try_buy_item(room, req_time, item_id, prev_count).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(room, req_time, item_id, prev_count, error = %e, "buy_item failed");
                false
            }
        }
    }

    async fn try_buy_item(
        &self,
        room: &str,
        req_time: i64,
        item_id: u32,
        prev_count: i64,
    ) -> Result<(), RoomError> {
        let mut tx = self.storage.begin().await?;
        let result = self.do_buy_item(&mut *tx, room, req_time, item_id, prev_count).await;
        self.finish(tx, result).await
    }

    async fn do_buy_item(
        &self,
        tx: &mut dyn RoomTransaction,
        room: &str,
        req_time: i64,
        item_id: u32,
        prev_count: i64,
    ) -> Result<(), RoomError> {
        let item = self.item(item_id)?;
        acquire_exclusive(tx, &self.storage, room, req_time).await?;

        let persisted_count = tx.count_buying(room, item_id).await?;
        if persisted_count != prev_count {
            return Err(RoomError::AlreadyBought);
        }

        // Replay Phase A of ComputeStatus as of req_time, restricted to
        // adding rows at-or-before req_time and every buying row ever
        // recorded for the room (cost of a purchase is charged in full
        // regardless of when its production starts).
        let addings = tx.adding_up_to(room, req_time).await?;
        let buyings = tx.all_buying(room).await?;

        let mut milli_isu = BigInt::zero();
        for a in &addings {
            milli_isu += BigInt::from(a.isu.clone()) * 1000;
        }
        for b in &buyings {
            let bought_item = self.item(b.item_id)?;
            milli_isu -= BigInt::from(bought_item.price(b.ordinal as u64)) * 1000;
            if b.time <= req_time {
                let power = bought_item.power(b.ordinal as u64);
                milli_isu += BigInt::from(power) * (req_time - b.time);
            }
        }

        let ordinal = prev_count + 1;
        let cost = BigInt::from(item.price(ordinal as u64)) * 1000;
        if milli_isu < cost {
            return Err(RoomError::InsufficientFunds);
        }

        tx.insert_buying(room, item_id, ordinal, req_time).await?;
        Ok(())
    }

    pub async fn get_status(&self, room: &str) -> Result<GameStatus, RoomError> {
        let mut tx = self.storage.begin().await?;
        let result = self.do_get_status(&mut *tx, room).await;
        self.finish(tx, result).await
    }

    async fn do_get_status(&self, tx: &mut dyn RoomTransaction, room: &str) -> Result<GameStatus, RoomError> {
        let current = acquire_shared(tx, &self.storage, room).await?;
        // No per-room hot-path cache (§9's optional collaborator) is
        // carried, so "all adding/buying for the room" is every row
        // strictly after the sentinel `last_updated_at = 0`.
        let addings = tx.adding_after(room, 0).await?;
        let buyings = tx.buying_after(room, 0).await?;
        release_shared(tx, room, current).await?;

        let mut status = compute_status(&self.catalog, current, &addings, &buyings)?;
        status.time = self.storage.now_ms().await;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bigint::Exp;
    use crate::storage::{MemoryStorage, ScriptedClock};

    fn two_item_catalog() -> Catalog {
        Catalog::from_items([
            CatalogItem { item_id: 1, p1: 0, p2: 1, p3: 0, p4: 1, q1: 0, q2: 1, q3: 1, q4: 1 },
            CatalogItem { item_id: 2, p1: 0, p2: 1, p3: 0, p4: 2, q1: 0, q2: 1, q3: 1, q4: 2 },
        ])
    }

    fn ops(readings: Vec<i64>) -> RoomOps<MemoryStorage> {
        let storage = MemoryStorage::new(Arc::new(ScriptedClock::new(readings)));
        RoomOps::new(storage, two_item_catalog())
    }

    #[tokio::test]
    async fn add_then_wait_makes_item_one_affordable() {
        // scenario 2: AddIsu("A", 500, 1) at Now=500; GetStatus at Now=600.
        let ops = ops(vec![500, 600]);
        assert!(ops.add_isu("A", 500, BigUint::from(1u32)).await);

        let status = ops.get_status("A").await.unwrap();
        assert_eq!(status.schedule[0].milli_isu, Exp(1000, 0));
        assert_eq!(status.on_sale, vec![crate::status::OnSaleEntry { item_id: 1, time: 0 }]);
    }

    #[tokio::test]
    async fn buy_consumes_then_produces() {
        // scenario 4.
        let ops = ops(vec![500, 500, 1500]);
        assert!(ops.add_isu("A", 500, BigUint::from(2u32)).await);
        assert!(ops.buy_item("A", 500, 1, 0).await);

        let status = ops.get_status("A").await.unwrap();
        assert_eq!(status.schedule[0].milli_isu, Exp(2000, 0));
        assert_eq!(status.schedule[0].total_power, Exp(1, 0));
        let item1 = status.items.iter().find(|i| i.item_id == 1).unwrap();
        assert_eq!(item1.count_built, 1);
        assert_eq!(item1.count_bought, 1);
        assert_eq!(item1.next_price, Exp(2, 0));
    }

    #[tokio::test]
    async fn insufficient_funds_rejects_and_leaves_buying_empty() {
        // scenario 5: empty room, Now=500, BuyItem("A",500,1,0) must fail
        // and leave `buying` empty.
        let ops = ops(vec![500, 500]);
        assert!(!ops.buy_item("A", 500, 1, 0).await);

        let status = ops.get_status("A").await.unwrap();
        let item1 = status.items.iter().find(|i| i.item_id == 1).unwrap();
        assert_eq!(item1.count_bought, 0);
        assert_eq!(item1.count_built, 0);
    }

    #[tokio::test]
    async fn already_bought_mismatch_is_rejected() {
        let ops = ops(vec![500, 500, 500]);
        assert!(ops.buy_item("A", 500, 1, 0).await);
        // prev_count is stale now (should be 1), so this must fail.
        assert!(!ops.buy_item("A", 500, 1, 0).await);
    }
}
