//! `ComputeStatus`: a pure, deterministic replay of a room's persisted
//! `adding`/`buying` rows against the catalog's exponential price/power
//! model, producing the wire-ready [`GameStatus`].
//!
//! Grounded directly on the reference implementation's `calc_status`
//! (`game.py`): Phase A folds every row at-or-before `current_time` into
//! running totals; Phase B walks the future event times up to the
//! 1000&nbsp;ms schedule horizon, discovering for each item the earliest
//! millisecond a binary search shows it becomes affordable. No I/O, no
//! locking — everything here is plain arithmetic over its arguments.

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use serde::Serialize;

use crate::bigint::{to_exp, to_signed_exp, Exp};
use crate::catalog::Catalog;
use crate::error::RoomError;
use crate::storage::{AddingRow, BuyingRow};

/// How far into the future the schedule projects, in milliseconds.
pub const SCHEDULE_HORIZON_MS: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameStatus {
    pub time: i64,
    pub adding: Vec<AddingEntry>,
    pub schedule: Vec<SchedulePoint>,
    pub items: Vec<ItemStatus>,
    pub on_sale: Vec<OnSaleEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddingEntry {
    pub time: i64,
    pub isu: Exp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulePoint {
    pub time: i64,
    /// Signed: a buy's cost is charged at insertion time, so a point taken
    /// before that buy's funding add has been folded in can be negative.
    pub milli_isu: Exp,
    pub total_power: Exp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Building {
    pub time: i64,
    pub count_built: i64,
    pub power: Exp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemStatus {
    pub item_id: u32,
    pub count_bought: i64,
    pub count_built: i64,
    pub next_price: Exp,
    pub power: Exp,
    pub building: Vec<Building>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OnSaleEntry {
    pub item_id: u32,
    pub time: i64,
}

pub fn compute_status(
    catalog: &Catalog,
    current_time: i64,
    addings: &[AddingRow],
    buyings: &[BuyingRow],
) -> Result<GameStatus, RoomError> {
    let mut item_ids: Vec<u32> = catalog.item_ids().collect();
    item_ids.sort_unstable();

    let mut milli_isu = BigInt::zero();
    let mut total_power = BigUint::zero();
    let mut bought: BTreeMap<u32, i64> = item_ids.iter().map(|id| (*id, 0)).collect();
    let mut built: BTreeMap<u32, i64> = item_ids.iter().map(|id| (*id, 0)).collect();
    let mut item_power: BTreeMap<u32, BigUint> = item_ids.iter().map(|id| (*id, BigUint::zero())).collect();
    let mut building: BTreeMap<u32, Vec<Building>> = item_ids.iter().map(|id| (*id, Vec::new())).collect();

    let mut adding_at: BTreeMap<i64, AddingRow> = BTreeMap::new();
    let mut buying_at: BTreeMap<i64, Vec<BuyingRow>> = BTreeMap::new();

    // Phase A: fold the past.
    for a in addings {
        if a.time <= current_time {
            milli_isu += BigInt::from(a.isu.clone()) * 1000;
        } else {
            adding_at.insert(a.time, a.clone());
        }
    }

    for b in buyings {
        let item = catalog.get(b.item_id).ok_or(RoomError::UnknownItem(b.item_id))?;
        *bought.get_mut(&b.item_id).expect("seeded from catalog") += 1;
        milli_isu -= BigInt::from(item.price(b.ordinal as u64)) * 1000;

        if b.time <= current_time {
            *built.get_mut(&b.item_id).expect("seeded from catalog") += 1;
            let p = item.power(b.ordinal as u64);
            *item_power.get_mut(&b.item_id).expect("seeded from catalog") += &p;
            total_power += &p;
            milli_isu += BigInt::from(p) * (current_time - b.time);
        } else {
            buying_at.entry(b.time).or_default().push(*b);
        }
    }

    let power0: BTreeMap<u32, Exp> = item_power.iter().map(|(id, p)| (*id, to_exp(p))).collect();
    let built0 = built.clone();

    let mut price: BTreeMap<u32, BigUint> = BTreeMap::new();
    let mut on_sale: BTreeMap<u32, i64> = BTreeMap::new();
    for &id in &item_ids {
        let item = catalog.get(id).expect("item_ids() only yields present ids");
        let next_ordinal = bought[&id] as u64 + 1;
        let p = item.price(next_ordinal);
        if BigInt::from(p.clone()) * 1000 <= milli_isu {
            on_sale.insert(id, 0);
        }
        price.insert(id, p);
    }

    let mut schedule = vec![SchedulePoint {
        time: current_time,
        milli_isu: to_signed_exp(&milli_isu),
        total_power: to_exp(&total_power),
    }];

    // Phase B: project forward to the schedule horizon.
    let mut ts: Vec<i64> = std::iter::once(current_time)
        .chain(adding_at.keys().copied().filter(|t| *t <= current_time + SCHEDULE_HORIZON_MS))
        .chain(buying_at.keys().copied().filter(|t| *t <= current_time + SCHEDULE_HORIZON_MS))
        .collect();
    ts.sort_unstable();
    ts.dedup();

    let n = ts.len();
    let mut ct = current_time;
    for i in 0..n {
        let t = ts[i];
        let nt = if i + 1 < n { ts[i + 1] } else { current_time + SCHEDULE_HORIZON_MS + 1 };

        milli_isu += BigInt::from(total_power.clone()) * (t - ct);
        ct = t;

        let mut updated = false;

        if let Some(a) = adding_at.get(&t) {
            updated = true;
            milli_isu += BigInt::from(a.isu.clone()) * 1000;
        }

        if let Some(bucket) = buying_at.get(&t) {
            updated = true;
            let mut touched = BTreeSet::new();
            for b in bucket {
                touched.insert(b.item_id);
                *built.get_mut(&b.item_id).expect("seeded from catalog") += 1;
                let p = catalog
                    .get(b.item_id)
                    .ok_or(RoomError::UnknownItem(b.item_id))?
                    .power(b.ordinal as u64);
                *item_power.get_mut(&b.item_id).expect("seeded from catalog") += &p;
                total_power += p;
            }
            for id in touched {
                building.get_mut(&id).expect("seeded from catalog").push(Building {
                    time: t,
                    count_built: built[&id],
                    power: to_exp(&item_power[&id]),
                });
            }
        }

        if updated {
            schedule.push(SchedulePoint {
                time: t,
                milli_isu: to_signed_exp(&milli_isu),
                total_power: to_exp(&total_power),
            });
        }

        // On-sale discovery: for every item not yet resolved, check whether
        // the best case at the end of this bucket reaches its price; if so,
        // binary-search the exact millisecond within (t, nt).
        for &id in &item_ids {
            if on_sale.contains_key(&id) {
                continue;
            }
            let cost = BigInt::from(price[&id].clone()) * 1000;
            let headroom = &milli_isu + BigInt::from(total_power.clone()) * (nt - 1 - t);
            if headroom >= cost {
                let mut l = t - 1;
                let mut r = nt - 1;
                while r - l > 1 {
                    let mid = l + (r - l) / 2;
                    let reached = &milli_isu + BigInt::from(total_power.clone()) * (mid - t);
                    if reached >= cost {
                        r = mid;
                    } else {
                        l = mid;
                    }
                }
                on_sale.insert(id, r);
            }
        }
    }

    let adding = adding_at
        .into_values()
        .map(|a| AddingEntry { time: a.time, isu: to_exp(&a.isu) })
        .collect();

    let items = item_ids
        .iter()
        .map(|id| ItemStatus {
            item_id: *id,
            count_bought: bought[id],
            count_built: built0[id],
            next_price: to_exp(&price[id]),
            power: power0[id],
            building: building.remove(id).unwrap_or_default(),
        })
        .collect();

    let on_sale = on_sale.into_iter().map(|(item_id, time)| OnSaleEntry { item_id, time }).collect();

    Ok(GameStatus {
        time: 0,
        adding,
        schedule,
        items,
        on_sale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogItem;

    fn item1() -> CatalogItem {
        CatalogItem { item_id: 1, p1: 0, p2: 1, p3: 0, p4: 1, q1: 0, q2: 1, q3: 1, q4: 1 }
    }

    fn item2() -> CatalogItem {
        CatalogItem { item_id: 2, p1: 0, p2: 1, p3: 0, p4: 2, q1: 0, q2: 1, q3: 1, q4: 2 }
    }

    fn two_item_catalog() -> Catalog {
        Catalog::from_items([item1(), item2()])
    }

    #[test]
    fn empty_room_has_zero_state_and_nothing_on_sale() {
        let catalog = two_item_catalog();
        let status = compute_status(&catalog, 1000, &[], &[]).unwrap();

        assert_eq!(status.schedule[0].milli_isu, Exp(0, 0));
        assert_eq!(status.schedule[0].total_power, Exp(0, 0));
        let item1 = status.items.iter().find(|i| i.item_id == 1).unwrap();
        let item2 = status.items.iter().find(|i| i.item_id == 2).unwrap();
        assert_eq!(item1.next_price, Exp(1, 0));
        assert_eq!(item2.next_price, Exp(2, 0));
        assert!(status.on_sale.is_empty());
    }

    #[test]
    fn buy_consumes_then_produces() {
        let catalog = two_item_catalog();
        let addings = [AddingRow { time: 500, isu: BigUint::from(2u32) }];
        let buyings = [BuyingRow { item_id: 1, ordinal: 1, time: 500 }];

        let status = compute_status(&catalog, 1500, &addings, &buyings).unwrap();

        assert_eq!(status.schedule[0].milli_isu, Exp(2000, 0));
        assert_eq!(status.schedule[0].total_power, Exp(1, 0));
        let item1 = status.items.iter().find(|i| i.item_id == 1).unwrap();
        assert_eq!(item1.count_built, 1);
        assert_eq!(item1.count_bought, 1);
        assert_eq!(item1.next_price, Exp(2, 0));
    }

    #[test]
    fn on_sale_binary_search_finds_exact_millisecond() {
        // power(n) = 999n + 1, so power(1) = 1000; price is the constant
        // 500 for every ordinal (a=0 collapses the exponent to the fixed b).
        let item = CatalogItem { item_id: 1, p1: 0, p2: 0, p3: 999, p4: 1, q1: 0, q2: 1, q3: 0, q4: 500 };
        let catalog = Catalog::from_items([item]);

        // One already-built copy nets milli_isu back to zero: the add
        // exactly offsets the purchase's own cost.
        let addings = [AddingRow { time: 0, isu: BigUint::from(500u32) }];
        let buyings = [BuyingRow { item_id: 1, ordinal: 1, time: 0 }];

        let status = compute_status(&catalog, 0, &addings, &buyings).unwrap();

        assert_eq!(status.schedule[0].milli_isu, Exp(0, 0));
        assert_eq!(status.schedule[0].total_power, Exp(1000, 0));
        assert_eq!(status.on_sale, vec![OnSaleEntry { item_id: 1, time: 500 }]);
    }

    #[test]
    fn future_add_is_projected_into_the_schedule() {
        // scenario: AddIsu("A", 1200, 5) at Now=500, then GetStatus.
        let catalog = two_item_catalog();
        let addings = [AddingRow { time: 1200, isu: BigUint::from(5u32) }];

        let status = compute_status(&catalog, 500, &addings, &[]).unwrap();

        assert_eq!(status.adding, vec![AddingEntry { time: 1200, isu: Exp(5, 0) }]);
        assert_eq!(
            status.schedule,
            vec![
                SchedulePoint { time: 500, milli_isu: Exp(0, 0), total_power: Exp(0, 0) },
                SchedulePoint { time: 1200, milli_isu: Exp(5000, 0), total_power: Exp(0, 0) },
            ]
        );
    }

    #[test]
    fn cost_charged_before_its_funding_add_reports_a_negative_ledger() {
        // A buy's cost is subtracted unconditionally (spec §4.5 Phase A
        // step 2), even when its own `time` is still in the future relative
        // to `current_time` — only the power accrual is gated on
        // `b.time <= current_time`. So a buy at time=1000 funded by an add
        // at time=900 can leave a `GetStatus` taken at current_time=500
        // looking at a transient deficit: the cost already landed, the add
        // hasn't been folded in yet because it's itself still future.
        let catalog = two_item_catalog();
        let addings = [AddingRow { time: 900, isu: BigUint::from(1u32) }];
        let buyings = [BuyingRow { item_id: 1, ordinal: 1, time: 1000 }];

        let status = compute_status(&catalog, 500, &addings, &buyings).unwrap();

        assert_eq!(status.schedule[0].milli_isu, Exp(-1000, 0));
    }

    #[test]
    fn unknown_item_in_persisted_rows_surfaces_as_an_error() {
        let catalog = two_item_catalog();
        let buyings = [BuyingRow { item_id: 99, ordinal: 1, time: 0 }];
        let err = compute_status(&catalog, 0, &[], &buyings).unwrap_err();
        assert!(matches!(err, RoomError::UnknownItem(99)));
    }
}
