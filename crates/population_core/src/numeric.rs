//! Arbitrary-precision decimal kernel.
//!
//! Every function takes the target scale (fractional digits) of its result and works internally
//! with guard digits, so that results are correct to the last requested digit up to one unit of
//! rounding. The transcendental functions follow the classic series-plus-reduction scheme:
//!
//! - `exponent`: Taylor series on `1 + f/n`, raised to the `n`-th power for `x = n + f`.
//! - `natural_logarithm`: `x = r * 2^j * 10^k` with `1 <= r < 2`, read off the digit count, then
//!   the series `ln r = 2 * atanh((r - 1) / (r + 1))`. `ln 2` and `ln 10` come from the same
//!   series at `1/3` and `1/9`.
//! - `root`: Newton iteration for `y^k = x`.

pub mod decimal;
pub mod factorial;

pub use decimal::{Decimal, RoundingMode};
use decimal::ten_pow;
pub use factorial::{probabilistic_factorial, probabilistic_factorial_decimal};

use num_traits::{Signed, ToPrimitive, Zero};

use crate::error::NumericError;

/// Scale used by the higher-accuracy calculation path.
pub const HIGHER_ACCURACY_SCALE: u32 = 200;

const GUARD_DIGITS: u32 = 10;
const MAX_NEWTON_ITERATIONS: usize = 200;

/// `a / b` rounded half-even to `scale` digits.
pub fn divide(a: &Decimal, b: &Decimal, scale: u32) -> Result<Decimal, NumericError> {
    a.div_scaled(b, scale, RoundingMode::HalfEven)
}

/// `a * b` rounded half-even to `scale` digits.
pub fn multiply(a: &Decimal, b: &Decimal, scale: u32) -> Decimal {
    (a * b).with_scale(scale, RoundingMode::HalfEven)
}

/// Integer power by repeated squaring. Negative exponents take the reciprocal of the
/// positive power.
pub fn power_int(base: &Decimal, exponent: i64, scale: u32) -> Result<Decimal, NumericError> {
    let magnitude = exponent.unsigned_abs();
    if exponent < 0 {
        // 1/P loses as many digits as P has leading fractional zeros, twice over.
        let leading_zeros = (-log10_floor(base)).max(0);
        let extra = checked_digits(magnitude, leading_zeros.saturating_mul(2))?;
        let positive = power_int(base, magnitude as i64, working_scale(scale, extra)?)?;
        return divide(&Decimal::one(), &positive, scale);
    }
    if magnitude == 0 {
        return Ok(Decimal::one().with_scale(scale, RoundingMode::HalfEven));
    }
    if base.is_zero() {
        return Ok(Decimal::zero().with_scale(scale, RoundingMode::HalfEven));
    }

    let growth = checked_digits(magnitude, (log10_floor(base) + 1).max(0))?;
    let work = working_scale(scale, growth + decimal_digits(magnitude) as i64)?;

    let mut result = Decimal::one();
    let mut square = base.clone();
    let mut remaining = magnitude;
    while remaining > 0 {
        if remaining & 1 == 1 {
            result = multiply(&result, &square, work);
        }
        remaining >>= 1;
        if remaining > 0 {
            square = multiply(&square, &square, work);
        }
    }
    Ok(result.with_scale(scale, RoundingMode::HalfEven))
}

/// Real power. Integral exponents go through [`power_int`]; everything else is
/// `exp(exponent * ln(base))` and therefore requires a positive base.
pub fn power(base: &Decimal, exponent: &Decimal, scale: u32) -> Result<Decimal, NumericError> {
    if let Some(integral) = exponent.to_i64() {
        return power_int(base, integral, scale);
    }
    if base.is_zero() {
        return if exponent.is_positive() {
            Ok(Decimal::zero().with_scale(scale, RoundingMode::HalfEven))
        } else {
            Err(NumericError::DivisionByZero)
        };
    }
    if base.is_negative() {
        return Err(NumericError::LogarithmDomain(base.to_string()));
    }

    let estimate = exponent.to_f64() * base.to_f64().log10();
    if !estimate.is_finite() || estimate > u32::MAX as f64 / 4.0 {
        return Err(NumericError::ExponentOverflow(exponent.to_string()));
    }
    let result_digits = estimate.max(0.0).ceil() as i64 + 1;
    let work = working_scale(scale, result_digits)?;
    let log_work = working_scale(work, exponent.integer_digits() as i64)?;

    let logarithm = natural_logarithm(base, log_work)?;
    let product = multiply(exponent, &logarithm, log_work);
    exponent_with_scale(&product, scale)
}

/// `e^x`.
pub fn exponent(x: &Decimal, scale: u32) -> Result<Decimal, NumericError> {
    exponent_with_scale(x, scale)
}

fn exponent_with_scale(x: &Decimal, scale: u32) -> Result<Decimal, NumericError> {
    if x.is_zero() {
        return Ok(Decimal::one().with_scale(scale, RoundingMode::HalfEven));
    }
    if x.is_negative() {
        let positive = exponent_with_scale(&-x, working_scale(scale, 0)?)?;
        return divide(&Decimal::one(), &positive, scale);
    }

    let whole = x.trunc();
    if whole.is_zero() {
        return exp_taylor(x, scale);
    }
    let n = whole
        .to_i64()
        .ok_or_else(|| NumericError::ExponentOverflow(x.to_string()))?;

    let result_digits = (n as f64 * std::f64::consts::LOG10_E).ceil() as i64 + 1;
    let work = working_scale(scale, result_digits + decimal_digits(n as u64) as i64)?;

    let fraction = x - &Decimal::from_bigint(whole);
    let reduced = &Decimal::one() + &divide(&fraction, &Decimal::from_i64(n), work)?;
    let base = exp_taylor(&reduced, work)?;
    power_int(&base, n, scale)
}

fn exp_taylor(x: &Decimal, scale: u32) -> Result<Decimal, NumericError> {
    let work = working_scale(scale, 0)?;
    let mut sum = Decimal::one();
    let mut term = Decimal::one();
    let mut index = 1i64;
    loop {
        term = divide(&multiply(&term, x, work), &Decimal::from_i64(index), work)?;
        if term.is_zero() {
            break;
        }
        sum = sum + &term;
        index += 1;
    }
    Ok(sum.with_scale(scale, RoundingMode::HalfEven))
}

/// `ln(x)` for `x > 0`.
pub fn natural_logarithm(x: &Decimal, scale: u32) -> Result<Decimal, NumericError> {
    if !x.is_positive() {
        return Err(NumericError::LogarithmDomain(x.to_string()));
    }
    if *x == Decimal::one() {
        return Ok(Decimal::zero().with_scale(scale, RoundingMode::HalfEven));
    }

    let decade = log10_floor(x);
    // decade * ln 10 scales the error of ln 10 by the decade.
    let work = working_scale(scale, decimal_digits(decade.unsigned_abs()) as i64 + 1)?;
    let two = Decimal::from_i64(2);
    let mut mantissa = shift_decimal_point(x, decade)?;
    let mut halvings = 0i64;
    while mantissa >= two {
        mantissa = divide(&mantissa, &two, work)?;
        halvings += 1;
    }

    let mut logarithm = atanh_logarithm(&mantissa, work)?;
    if halvings != 0 || decade != 0 {
        let ln_two = atanh_logarithm(&two, work)?;
        logarithm = logarithm + &multiply(&ln_two, &Decimal::from_i64(halvings), work);
        if decade != 0 {
            // ln 10 = 3 ln 2 + ln 1.25
            let ln_ten = multiply(&ln_two, &Decimal::from_i64(3), work)
                + &atanh_logarithm(&Decimal::new(125.into(), 2), work)?;
            logarithm = logarithm + &multiply(&ln_ten, &Decimal::from_i64(decade), work);
        }
    }
    Ok(logarithm.with_scale(scale, RoundingMode::HalfEven))
}

/// `ln(x) = 2 * sum z^(2n+1) / (2n+1)` with `z = (x - 1) / (x + 1)`. Converges for any
/// positive `x`, fast when `x` is near 1.
fn atanh_logarithm(x: &Decimal, scale: u32) -> Result<Decimal, NumericError> {
    let work = working_scale(scale, 0)?;
    let one = Decimal::one();
    let z = divide(&(x - &one), &(x + &one), work)?;
    let z_squared = multiply(&z, &z, work);
    let mut power = z.clone();
    let mut sum = z;
    let mut denominator = 1i64;
    loop {
        power = multiply(&power, &z_squared, work);
        denominator += 2;
        let term = divide(&power, &Decimal::from_i64(denominator), work)?;
        if term.is_zero() {
            break;
        }
        sum = sum + &term;
    }
    Ok(multiply(&sum, &Decimal::from_i64(2), scale))
}

/// `x * 10^-shift`, exact.
fn shift_decimal_point(x: &Decimal, shift: i64) -> Result<Decimal, NumericError> {
    let overflow = || NumericError::ExponentOverflow(shift.to_string());
    let digits = u32::try_from(shift.unsigned_abs()).map_err(|_| overflow())?;
    if shift >= 0 {
        let scale = x.scale().checked_add(digits).ok_or_else(overflow)?;
        Ok(Decimal::new(x.unscaled().clone(), scale))
    } else {
        Ok(Decimal::new(x.unscaled() * ten_pow(digits), x.scale()))
    }
}

/// `index`-th root of a non-negative `x`.
pub fn root(x: &Decimal, index: u32, scale: u32) -> Result<Decimal, NumericError> {
    if index == 0 || x.is_negative() {
        return Err(NumericError::RootDomain {
            value: x.to_string(),
            index,
        });
    }
    if x.is_zero() || index == 1 {
        return Ok(x.with_scale(scale, RoundingMode::HalfEven));
    }

    let work = working_scale(scale, 0)?;
    let tolerance = Decimal::new(1.into(), work - 2);
    let index_minus_one = Decimal::from_i64(index as i64 - 1);
    let index_decimal = Decimal::from_i64(index as i64);

    let seed = x.to_f64().powf(1.0 / index as f64);
    let mut estimate = if seed.is_finite() && seed > 0.0 {
        Decimal::from_f64(seed)?
    } else {
        Decimal::one()
    };
    for _ in 0..MAX_NEWTON_ITERATIONS {
        // y' = (x + (k - 1) y^k) / (k y^(k-1))
        let lower_power = power_int(&estimate, index as i64 - 1, work)?;
        let full_power = multiply(&estimate, &lower_power, work);
        let numerator = x + &(&index_minus_one * &full_power);
        let denominator = &index_decimal * &lower_power;
        let next = divide(&numerator, &denominator, work)?;
        let delta = (&next - &estimate).abs();
        estimate = next;
        if delta <= tolerance {
            break;
        }
    }
    Ok(estimate.with_scale(scale, RoundingMode::HalfEven))
}

/// `floor(log10(|x|))` for non-zero `x`, read off the digit count.
fn log10_floor(x: &Decimal) -> i64 {
    if x.is_zero() {
        return 0;
    }
    x.unscaled().abs().to_string().len() as i64 - 1 - x.scale() as i64
}

fn decimal_digits(n: u64) -> u32 {
    n.checked_ilog10().map_or(1, |digits| digits + 1)
}

fn checked_digits(magnitude: u64, per_factor: i64) -> Result<i64, NumericError> {
    i64::try_from(magnitude)
        .ok()
        .and_then(|m| m.checked_mul(per_factor))
        .ok_or_else(|| NumericError::ExponentOverflow(magnitude.to_string()))
}

fn working_scale(scale: u32, extra: i64) -> Result<u32, NumericError> {
    let total = scale as i64 + GUARD_DIGITS as i64 + extra.max(0);
    u32::try_from(total).map_err(|_| NumericError::ExponentOverflow(extra.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{
        divide, exponent, multiply, natural_logarithm, power, power_int, root, Decimal,
    };
    use crate::error::NumericError;
    use proptest::prelude::*;

    const E_40: &str = "2.7182818284590452353602874713526624977572";
    const LN2_40: &str = "0.6931471805599453094172321214581765680755";
    const LN10_40: &str = "2.3025850929940456840179914546843642076011";
    const SQRT2_40: &str = "1.4142135623730950488016887242096980785697";

    fn dec(text: &str) -> Decimal {
        text.parse().expect("decimal literal")
    }

    fn assert_close(actual: &Decimal, expected: &str, tolerance: &str) {
        let diff = (actual - &dec(expected)).abs();
        assert!(
            diff <= dec(tolerance),
            "expected {expected}, got {actual} (difference {diff})"
        );
    }

    #[test]
    fn divide_and_multiply_round_half_even() {
        assert_eq!(divide(&dec("1"), &dec("8"), 2).expect("divide"), dec("0.12"));
        assert_eq!(divide(&dec("3"), &dec("8"), 2).expect("divide"), dec("0.38"));
        assert_eq!(multiply(&dec("0.25"), &dec("0.5"), 2), dec("0.12"));
        assert_eq!(
            divide(&dec("1"), &Decimal::zero(), 5),
            Err(NumericError::DivisionByZero)
        );
    }

    #[test]
    fn integer_powers() {
        assert_eq!(power_int(&dec("2"), 10, 0).expect("power"), dec("1024"));
        assert_eq!(power_int(&dec("2"), -2, 4).expect("power"), dec("0.25"));
        assert_eq!(power_int(&dec("1.5"), 0, 3).expect("power"), dec("1"));
        assert_eq!(power_int(&dec("0.1"), 3, 3).expect("power"), dec("0.001"));
        assert_eq!(power_int(&dec("0.5"), -20, 0).expect("power"), dec("1048576"));
        assert_eq!(
            power_int(&Decimal::zero(), -1, 5),
            Err(NumericError::DivisionByZero)
        );
    }

    #[test]
    fn exponent_matches_reference_digits() {
        assert_close(&exponent(&dec("1"), 40).expect("exp"), E_40, "1e-39");
        assert_eq!(exponent(&Decimal::zero(), 10).expect("exp"), dec("1"));
        let inverse = exponent(&dec("-1"), 40).expect("exp");
        let product = multiply(&inverse, &dec(E_40), 40);
        assert_close(&product, "1", "1e-38");
    }

    #[test]
    fn exponent_tracks_float_path() {
        for x in [-7.25, -0.5, 0.3, 2.5, 10.75, 42.0] {
            let value = exponent(&Decimal::from_f64(x).expect("finite"), 30).expect("exp");
            let expected = x.exp();
            assert!(
                (value.to_f64() - expected).abs() <= 1e-14 * expected,
                "exp({x}) = {value}, float {expected}"
            );
        }
    }

    #[test]
    fn logarithm_matches_reference_digits() {
        assert_close(&natural_logarithm(&dec("2"), 40).expect("ln"), LN2_40, "1e-39");
        assert_close(&natural_logarithm(&dec("10"), 40).expect("ln"), LN10_40, "1e-39");
        // Three integer digits: ln(1000) = 3 ln 10 with no mantissa left over.
        let ln_1000 = natural_logarithm(&dec("1000"), 40).expect("ln");
        let expected = multiply(&dec(LN10_40), &dec("3"), 40);
        assert_close(&ln_1000, &expected.to_string(), "1e-38");
        let ln_half = natural_logarithm(&dec("0.5"), 40).expect("ln");
        assert_close(&(-ln_half), LN2_40, "1e-39");
        assert_eq!(natural_logarithm(&dec("1"), 5).expect("ln"), Decimal::zero());
    }

    #[test]
    fn logarithm_reduces_by_decades_and_halvings() {
        let tiny = natural_logarithm(&dec("0.00000000000000000001"), 40).expect("ln");
        assert_close(&tiny, "-46.0517018598809136803598290936872841520220", "1e-38");
        // 7 = 1.75 * 2^2
        let seven = natural_logarithm(&dec("7"), 40).expect("ln");
        assert_close(&seven, "1.9459101490553133051053527434431797296371", "1e-39");
    }

    #[test]
    fn logarithm_rejects_non_positive_arguments() {
        assert!(matches!(
            natural_logarithm(&Decimal::zero(), 10),
            Err(NumericError::LogarithmDomain(_))
        ));
        assert!(matches!(
            natural_logarithm(&dec("-3"), 10),
            Err(NumericError::LogarithmDomain(_))
        ));
    }

    #[test]
    fn roots_converge() {
        assert_close(&root(&dec("2"), 2, 40).expect("root"), SQRT2_40, "1e-39");
        assert_close(&root(&dec("27"), 3, 20).expect("root"), "3", "1e-19");
        assert_close(&root(&dec("0.0001"), 4, 20).expect("root"), "0.1", "1e-19");
        assert_eq!(root(&Decimal::zero(), 3, 5).expect("root"), Decimal::zero());
        assert!(matches!(
            root(&dec("-1"), 2, 5),
            Err(NumericError::RootDomain { .. })
        ));
        assert!(root(&dec("4"), 0, 5).is_err());
    }

    #[test]
    fn real_powers() {
        assert_close(&power(&dec("2"), &dec("0.5"), 40).expect("power"), SQRT2_40, "1e-38");
        assert_eq!(power(&dec("3"), &dec("2.0"), 0).expect("power"), dec("9"));
        assert_eq!(power(&Decimal::zero(), &dec("1.5"), 3).expect("power"), Decimal::zero());
        assert!(power(&dec("-2"), &dec("1.5"), 10).is_err());
        let large = power(&dec("100"), &dec("2.5"), 10).expect("power");
        assert_close(&large, "100000", "1e-9");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn exponent_inverts_logarithm(x in 0.01f64..5000.0) {
            let value = Decimal::from_f64(x).expect("finite");
            let logarithm = natural_logarithm(&value, 40).expect("ln");
            let back = exponent(&logarithm, 40).expect("exp");
            let diff = (&back - &value).abs();
            prop_assert!(diff <= multiply(&value, &dec("1e-30"), 40) + dec("1e-38"));
        }

        #[test]
        fn logarithm_agrees_with_float(x in 0.001f64..1.0e6) {
            let value = natural_logarithm(&Decimal::from_f64(x).expect("finite"), 30)
                .expect("ln")
                .to_f64();
            prop_assert!((value - x.ln()).abs() <= 1e-13 * x.ln().abs().max(1.0));
        }
    }
}
