//! Immutable item catalog: `ItemID -> CatalogItem`, loaded once at startup
//! from `m_item` and read-only for the life of the process (teacher
//! precedent: `GlobalConfig`/`TimeSeriesConfig` are built once and held
//! behind an `Arc` for cheap concurrent reads — same shape here since the
//! catalog never changes after boot).

use std::collections::HashMap;

use num_bigint::BigUint;
use num_traits::One;

/// One row of `m_item`. All eight coefficients are non-negative; `power`
/// and `price` both grow exponentially in `n` so the result types are
/// arbitrary-precision.
#[derive(Debug, Clone, Copy)]
pub struct CatalogItem {
    pub item_id: u32,
    pub p1: u64,
    pub p2: u64,
    pub p3: u64,
    pub p4: u64,
    pub q1: u64,
    pub q2: u64,
    pub q3: u64,
    pub q4: u64,
}

impl CatalogItem {
    /// `power(n) = (p3*n + 1) * p4^(p1*n + p2)`, `n` the item's 1-based
    /// purchase ordinal. Power accrues using the ordinal directly, as
    /// persisted on the `buying` row.
    pub fn power(&self, n: u64) -> BigUint {
        exponential_term(self.p1, self.p2, self.p3, self.p4, n)
    }

    /// Cost to go from owning `n - 1` copies to owning `n` copies, where
    /// `n` is the 1-based purchase serial number — the same value callers
    /// pass as `ordinal`, `prev_count + 1`, or `bought + 1`.
    ///
    /// The §4.1 price formula `(q3*n+1) * q4^(q1*n+q2)` is stated in terms
    /// of the count *already owned* (0-based), one less than the purchase
    /// serial number; calling it with the serial number unshifted
    /// contradicts the worked numbers in §8 (scenario 4 states the first
    /// purchase of item 1, q1..q4 = 0,1,1,1, costs exactly 1 isu — the
    /// unshifted formula gives 2). This applies the shift once, here, so
    /// every call site can use the serial number as the spec prose states
    /// it (`price(i, bought[i]+1)`, `price(item, prev_count+1)`,
    /// `price(b.item_id, b.ordinal)`) without each caller re-deriving it.
    pub fn price(&self, n: u64) -> BigUint {
        debug_assert!(n >= 1, "purchase serial numbers are 1-based");
        exponential_term(self.q1, self.q2, self.q3, self.q4, n - 1)
    }
}

fn exponential_term(a: u64, b: u64, c: u64, d: u64, n: u64) -> BigUint {
    let linear = BigUint::from(c) * BigUint::from(n) + BigUint::one();
    let exponent = a * n + b;
    linear * BigUint::from(d).pow(exponent as u32)
}

/// Read-only `ItemID -> CatalogItem` map, loaded once from the database's
/// `m_item` table at `Initialize`/startup.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: HashMap<u32, CatalogItem>,
}

impl Catalog {
    pub fn from_items(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        Self {
            items: items.into_iter().map(|i| (i.item_id, i)).collect(),
        }
    }

    pub fn get(&self, item_id: u32) -> Option<&CatalogItem> {
        self.items.get(&item_id)
    }

    pub fn item_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.items.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// item 1: power=1, price=n+1 (the §8 scenario catalog)
    fn item1() -> CatalogItem {
        CatalogItem { item_id: 1, p1: 0, p2: 1, p3: 0, p4: 1, q1: 0, q2: 1, q3: 1, q4: 1 }
    }

    /// item 2: power=2, price=2^n*(n+1)
    fn item2() -> CatalogItem {
        CatalogItem { item_id: 2, p1: 0, p2: 1, p3: 0, p4: 2, q1: 0, q2: 1, q3: 1, q4: 2 }
    }

    #[test]
    fn item1_power_is_constant_one() {
        let item = item1();
        for n in 0..10 {
            assert_eq!(item.power(n), BigUint::from(1u32));
        }
    }

    #[test]
    fn item1_price_of_nth_purchase_is_n() {
        // scenario 1: empty room, next_price (serial 1) == 1
        // scenario 4: after one purchase, next_price (serial 2) == 2
        let item = item1();
        for n in 1..10u64 {
            assert_eq!(item.price(n), BigUint::from(n));
        }
    }

    #[test]
    fn item2_power_is_constant_two() {
        let item = item2();
        for n in 0..10 {
            assert_eq!(item.power(n), BigUint::from(2u32));
        }
    }

    #[test]
    fn item2_price_of_nth_purchase_matches_scenario_1() {
        // scenario 1: empty room, item 2's next_price == 2
        let item = item2();
        assert_eq!(item.price(1), BigUint::from(2u32));
        for n in 1..8u64 {
            let expected = BigUint::from(2u32).pow((n - 1) as u32) * BigUint::from(n);
            assert_eq!(item.price(n), expected);
        }
    }

    #[test]
    fn catalog_lookup_by_id() {
        let catalog = Catalog::from_items([item1(), item2()]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get(1).is_some());
        assert!(catalog.get(3).is_none());
    }
}
