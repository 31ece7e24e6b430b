//! Factorial extended to non-integer arguments by linear interpolation.
//!
//! `u = n + r` with `0 < r < 1` maps to `(1 - r) * n! + r * (n + 1)!`. Non-positive arguments
//! map to `0! = 1`. Used to normalise power-law rate terms when a stoichiometric coefficient is
//! not a whole number.

use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive};

use super::decimal::Decimal;

pub fn probabilistic_factorial(u: f64) -> f64 {
    if u <= 0.0 {
        return 1.0;
    }
    let whole = u.floor();
    let fraction = u - whole;
    let lower = factorial(whole);
    if fraction == 0.0 {
        return lower;
    }
    let upper = lower * (whole + 1.0);
    (1.0 - fraction) * lower + fraction * upper
}

fn factorial(n: f64) -> f64 {
    let mut result: f64 = 1.0;
    let mut k = 2.0;
    // past 170! the product is infinite
    while k <= n && result.is_finite() {
        result *= k;
        k += 1.0;
    }
    result
}

/// Decimal counterpart of [`probabilistic_factorial`]. The interpolation is exact: the
/// fractional part of `u` has finitely many digits, so no rounding is involved.
pub fn probabilistic_factorial_decimal(u: &Decimal) -> Decimal {
    if !u.is_positive() {
        return Decimal::one();
    }
    let whole = u.floor();
    let lower = Decimal::from_bigint(big_factorial(&whole));
    let fraction = u - &Decimal::from_bigint(whole.clone());
    if fraction.is_zero() {
        return lower;
    }
    let upper = &lower * &Decimal::from_bigint(whole + 1);
    &(&(Decimal::one() - &fraction) * &lower) + &(&fraction * &upper)
}

fn big_factorial(n: &BigInt) -> BigInt {
    let limit = if n.is_negative() { 0 } else { n.to_u64().unwrap_or(u64::MAX) };
    let mut result = BigInt::one();
    for k in 2..=limit {
        result *= k;
    }
    result
}
