use std::fmt::Debug;

use crate::error::NumericError;
use crate::numeric::{
    self, probabilistic_factorial, probabilistic_factorial_decimal, Decimal,
    HIGHER_ACCURACY_SCALE,
};

/// A type that can hold state counts while stepping a task.
/// `f64` drives the standard path, [`Decimal`] the higher-accuracy one; the stepping
/// algorithm is written once against this trait.
pub trait Count: Clone + Debug + PartialOrd + Send + Sync + 'static {
    fn zero() -> Self;
    fn from_f64(value: f64) -> Self;
    fn to_f64(&self) -> f64;
    fn add(&self, rhs: &Self) -> Self;
    fn sub(&self, rhs: &Self) -> Self;
    fn mul(&self, rhs: &Self) -> Self;
    fn div(&self, rhs: &Self) -> Result<Self, NumericError>;
    /// Real power. Fractional exponents of negative values are a domain error on both paths.
    fn powf(&self, exponent: f64) -> Result<Self, NumericError>;
    fn probabilistic_factorial(u: f64) -> Self;
    fn is_zero(&self) -> bool;
    fn is_positive(&self) -> bool;
    fn is_negative(&self) -> bool;

    fn min_of(self, other: Self) -> Self {
        if other < self {
            other
        } else {
            self
        }
    }

    fn clamp_non_negative(self) -> Self {
        if self.is_negative() {
            Self::zero()
        } else {
            self
        }
    }
}

impl Count for f64 {
    fn zero() -> Self {
        0.0
    }

    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(&self) -> f64 {
        *self
    }

    fn add(&self, rhs: &Self) -> Self {
        self + rhs
    }

    fn sub(&self, rhs: &Self) -> Self {
        self - rhs
    }

    fn mul(&self, rhs: &Self) -> Self {
        self * rhs
    }

    fn div(&self, rhs: &Self) -> Result<Self, NumericError> {
        if *rhs == 0.0 {
            return Err(NumericError::DivisionByZero);
        }
        Ok(self / rhs)
    }

    fn powf(&self, exponent: f64) -> Result<Self, NumericError> {
        if exponent.fract() != 0.0 && *self < 0.0 {
            return Err(NumericError::LogarithmDomain(self.to_string()));
        }
        if *self == 0.0 && exponent < 0.0 {
            return Err(NumericError::DivisionByZero);
        }
        Ok(f64::powf(*self, exponent))
    }

    fn probabilistic_factorial(u: f64) -> Self {
        probabilistic_factorial(u)
    }

    fn is_zero(&self) -> bool {
        *self == 0.0
    }

    fn is_positive(&self) -> bool {
        *self > 0.0
    }

    fn is_negative(&self) -> bool {
        *self < 0.0
    }
}

impl Count for Decimal {
    fn zero() -> Self {
        Decimal::zero()
    }

    /// Non-finite inputs are rejected by task validation before a run starts.
    fn from_f64(value: f64) -> Self {
        Decimal::from_f64(value).unwrap_or_default()
    }

    fn to_f64(&self) -> f64 {
        Decimal::to_f64(self)
    }

    fn add(&self, rhs: &Self) -> Self {
        self + rhs
    }

    fn sub(&self, rhs: &Self) -> Self {
        self - rhs
    }

    fn mul(&self, rhs: &Self) -> Self {
        numeric::multiply(self, rhs, HIGHER_ACCURACY_SCALE)
    }

    fn div(&self, rhs: &Self) -> Result<Self, NumericError> {
        numeric::divide(self, rhs, HIGHER_ACCURACY_SCALE)
    }

    fn powf(&self, exponent: f64) -> Result<Self, NumericError> {
        numeric::power(self, &Decimal::from_f64(exponent)?, HIGHER_ACCURACY_SCALE)
    }

    fn probabilistic_factorial(u: f64) -> Self {
        probabilistic_factorial_decimal(&<Decimal as Count>::from_f64(u))
    }

    fn is_zero(&self) -> bool {
        Decimal::is_zero(self)
    }

    fn is_positive(&self) -> bool {
        Decimal::is_positive(self)
    }

    fn is_negative(&self) -> bool {
        Decimal::is_negative(self)
    }
}

/// Read access to already computed rows of the state-count matrix.
pub trait RowHistory<T: Count>: Sync {
    /// Row at `step`. Callers never ask for a step older than the retained window.
    fn row(&self, step: usize) -> &[T];
}

impl<T: Count> RowHistory<T> for [Vec<T>] {
    fn row(&self, step: usize) -> &[T] {
        &self[step]
    }
}

/// Receives progress fractions in `[0, 1]` from a running calculation.
pub trait ProgressListener {
    fn on_progress(&self, fraction: f64);
}

impl<F: Fn(f64)> ProgressListener for F {
    fn on_progress(&self, fraction: f64) {
        self(fraction)
    }
}

/// Listener for callers that do not track progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn on_progress(&self, _fraction: f64) {}
}

#[cfg(test)]
mod tests {
    use super::Count;
    use crate::error::NumericError;
    use crate::numeric::Decimal;

    #[test]
    fn float_and_decimal_counts_share_error_semantics() {
        assert_eq!(1.0f64.div(&0.0), Err(NumericError::DivisionByZero));
        assert_eq!(
            Decimal::from_i64(1).div(&Decimal::zero()),
            Err(NumericError::DivisionByZero)
        );
        assert!(Count::powf(&-2.0f64, 0.5).is_err());
        assert!(<Decimal as Count>::from_f64(-2.0).powf(0.5).is_err());
        assert_eq!(Count::powf(&-2.0f64, 2.0), Ok(4.0));
        assert_eq!(Count::powf(&0.0f64, -1.0), Err(NumericError::DivisionByZero));
        assert_eq!(
            <Decimal as Count>::from_f64(-2.0).powf(2.0),
            Ok(Decimal::from_i64(4))
        );
    }

    #[test]
    fn decimal_count_keeps_short_decimal_inputs_exact() {
        let third = <Decimal as Count>::from_f64(0.1).add(&<Decimal as Count>::from_f64(0.2));
        assert_eq!(third, "0.3".parse::<Decimal>().expect("literal"));
        assert_eq!(Count::to_f64(&third), 0.3);
    }

    #[test]
    fn helpers_pick_and_clamp() {
        assert_eq!(3.0f64.min_of(2.0), 2.0);
        assert_eq!((-1.5f64).clamp_non_negative(), 0.0);
        assert_eq!(
            <Decimal as Count>::from_f64(-4.0).clamp_non_negative(),
            Decimal::zero()
        );
    }
}
