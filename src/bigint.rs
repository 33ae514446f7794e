//! Arbitrary-precision integers and their wire-format truncation.
//!
//! `isu` quantities, prices and production rates overflow 64 bits within a
//! few tens of purchases (`price4^(price1*n+price2)` grows exponentially),
//! so internal accounting uses [`num_bigint::BigInt`] (signed, since
//! intermediate sums in `ComputeStatus` can dip negative before later terms
//! bring them back up) and [`num_bigint::BigUint`] for quantities that are
//! non-negative by construction (catalog power/price, persisted `isu`).

use num_bigint::{BigInt, BigUint};
use num_traits::{Signed, ToPrimitive, Zero};
use serde::Serialize;

/// `mantissa * 10^exponent`, the wire encoding for a big integer.
/// `mantissa` always fits in 15 decimal digits of magnitude, hence in an
/// `i64`. Negative mantissas occur only for the signed milli-isu ledger
/// (see [`to_signed_exp`]) — production/price/count quantities are
/// non-negative by construction and only ever go through [`to_exp`].
/// Serializes as a two-element JSON array, matching `[m, e]` in the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Exp(pub i64, pub i32);

const EXP_DIGITS: usize = 15;

/// Truncate a non-negative `x` to its wire representation.
///
/// `to_exp(0) == Exp(0, 0)`. For `x` with at most 15 decimal digits,
/// `to_exp(x) == Exp(x, 0)` exactly. Otherwise the mantissa is the first 15
/// decimal digits of `x` and the exponent is `digits(x) - 15`; this is the
/// only lossy operation in the system and must only be applied at the
/// `GameStatus` serialization boundary.
pub fn to_exp(x: &BigUint) -> Exp {
    if x.is_zero() {
        return Exp(0, 0);
    }

    let digits = x.to_string();
    if digits.len() <= EXP_DIGITS {
        return Exp(x.to_i64().expect("<=15 decimal digits fits in i64"), 0);
    }

    let mantissa: i64 = digits[..EXP_DIGITS]
        .parse()
        .expect("first 15 digits of a decimal string parse as i64");
    let exponent = (digits.len() - EXP_DIGITS) as i32;
    Exp(mantissa, exponent)
}

/// Truncate a signed `x` the same way, preserving sign in the mantissa.
///
/// `milli_isu` is charged for a buy's cost at insertion time regardless of
/// whether that buy's funding add has been folded in yet relative to a
/// given `current_time` — a `GetStatus` taken before the funding add's
/// time can therefore observe a genuinely negative running ledger. The
/// reference implementation's `int2exp` reports that value unclamped
/// rather than hiding it, and this does the same: the magnitude is
/// truncated exactly as [`to_exp`] does, with the sign carried on the
/// mantissa.
pub fn to_signed_exp(x: &BigInt) -> Exp {
    if x.is_zero() {
        return Exp(0, 0);
    }

    let magnitude = x.abs().to_biguint().expect("abs of a BigInt is non-negative");
    let Exp(m, e) = to_exp(&magnitude);
    if x.is_negative() {
        Exp(-m, e)
    } else {
        Exp(m, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_zero_zero() {
        assert_eq!(to_exp(&BigUint::from(0u32)), Exp(0, 0));
    }

    #[test]
    fn small_values_round_trip_exactly() {
        assert_eq!(to_exp(&BigUint::from(1u32)), Exp(1, 0));
        assert_eq!(to_exp(&BigUint::from(999_999_999_999_999u64)), Exp(999_999_999_999_999, 0));
    }

    #[test]
    fn large_values_truncate_to_15_digit_mantissa() {
        // 16 digits: 1_234_567_890_123_456
        let x = BigUint::from(1_234_567_890_123_456u64);
        let Exp(m, e) = to_exp(&x);
        assert_eq!(e, 1);
        assert_eq!(m, 123_456_789_012_345);

        // m * 10^e <= x < (m+1) * 10^e
        let lo = BigUint::from(m as u64) * BigUint::from(10u32).pow(e as u32);
        let hi = BigUint::from(m as u64 + 1) * BigUint::from(10u32).pow(e as u32);
        assert!(lo <= x);
        assert!(x < hi);
    }

    #[test]
    fn truncation_bounds_hold_for_many_magnitudes() {
        let mut x = BigUint::from(7u32);
        for _ in 0..40 {
            x = &x * BigUint::from(13u32) + BigUint::from(1u32);
            let Exp(m, e) = to_exp(&x);
            let lo = BigUint::from(m as u64) * BigUint::from(10u32).pow(e as u32);
            let hi = BigUint::from(m as u64 + 1) * BigUint::from(10u32).pow(e as u32);
            assert!(lo <= x);
            assert!(x < hi);
        }
    }

    #[test]
    fn signed_zero_is_zero_zero() {
        assert_eq!(to_signed_exp(&BigInt::from(0)), Exp(0, 0));
    }

    #[test]
    fn signed_negative_values_carry_the_sign_on_the_mantissa() {
        assert_eq!(to_signed_exp(&BigInt::from(-1)), Exp(-1, 0));
        assert_eq!(to_signed_exp(&BigInt::from(-1_234_567_890_123_456i64)), Exp(-123_456_789_012_345, 1));
    }

    #[test]
    fn signed_matches_unsigned_for_non_negative_values() {
        let x = BigUint::from(1_234_567_890_123_456u64);
        let Exp(um, ue) = to_exp(&x);
        let Exp(sm, se) = to_signed_exp(&BigInt::from(x));
        assert_eq!((um, ue), (sm, se));
    }
}
