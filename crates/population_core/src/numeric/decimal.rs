use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::str::FromStr;

use crate::error::NumericError;

/// How discarded digits are resolved when a value is brought to a smaller scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundingMode {
    /// Ties go away from zero.
    HalfUp,
    /// Ties go to the even neighbour.
    HalfEven,
    /// Truncation toward zero.
    Down,
}

/// Arbitrary-precision decimal: `unscaled * 10^-scale`.
///
/// Addition, subtraction and multiplication are exact; anything that can produce an infinite
/// expansion (division, the transcendental functions in [`crate::numeric`]) takes an explicit
/// target scale.
#[derive(Debug, Clone, Default)]
pub struct Decimal {
    unscaled: BigInt,
    scale: u32,
}

pub(crate) fn ten_pow(exponent: u32) -> BigInt {
    BigInt::from(10u32).pow(exponent)
}

/// Integer division rounded according to `mode`.
fn divide_rounded(numerator: &BigInt, denominator: &BigInt, mode: RoundingMode) -> BigInt {
    let (quotient, remainder) = numerator.div_rem(denominator);
    if remainder.is_zero() {
        return quotient;
    }
    let twice: BigInt = remainder.abs() * 2;
    let away = match twice.cmp(&denominator.abs()) {
        Ordering::Greater => mode != RoundingMode::Down,
        Ordering::Less => false,
        Ordering::Equal => match mode {
            RoundingMode::HalfUp => true,
            RoundingMode::HalfEven => quotient.is_odd(),
            RoundingMode::Down => false,
        },
    };
    if !away {
        return quotient;
    }
    if numerator.is_negative() != denominator.is_negative() {
        quotient - 1
    } else {
        quotient + 1
    }
}

impl Decimal {
    pub fn new(unscaled: BigInt, scale: u32) -> Self {
        Self { unscaled, scale }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn one() -> Self {
        Self::from_i64(1)
    }

    pub fn from_i64(value: i64) -> Self {
        Self::new(BigInt::from(value), 0)
    }

    pub fn from_bigint(value: BigInt) -> Self {
        Self::new(value, 0)
    }

    /// Converts through the shortest decimal representation that round-trips to `value`,
    /// so `0.1` becomes exactly `0.1` rather than its binary expansion.
    pub fn from_f64(value: f64) -> Result<Self, NumericError> {
        if !value.is_finite() {
            return Err(NumericError::Parse(value.to_string()));
        }
        format!("{value}").parse()
    }

    pub fn to_f64(&self) -> f64 {
        self.to_string().parse().unwrap_or(f64::NAN)
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn unscaled(&self) -> &BigInt {
        &self.unscaled
    }

    pub fn is_zero(&self) -> bool {
        self.unscaled.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.unscaled.is_negative()
    }

    pub fn is_positive(&self) -> bool {
        self.unscaled.is_positive()
    }

    pub fn abs(&self) -> Self {
        Self::new(self.unscaled.abs(), self.scale)
    }

    pub fn is_integer(&self) -> bool {
        self.scale == 0 || self.unscaled.mod_floor(&ten_pow(self.scale)).is_zero()
    }

    /// Integer part, truncated toward zero.
    pub fn trunc(&self) -> BigInt {
        if self.scale == 0 {
            return self.unscaled.clone();
        }
        &self.unscaled / ten_pow(self.scale)
    }

    pub fn floor(&self) -> BigInt {
        if self.scale == 0 {
            return self.unscaled.clone();
        }
        self.unscaled.div_floor(&ten_pow(self.scale))
    }

    /// Number of digits left of the decimal point (0 when `|self| < 1`).
    pub fn integer_digits(&self) -> u32 {
        let whole = self.trunc().abs();
        if whole.is_zero() {
            0
        } else {
            whole.to_string().len() as u32
        }
    }

    pub fn with_scale(&self, scale: u32, mode: RoundingMode) -> Self {
        match scale.cmp(&self.scale) {
            Ordering::Equal => self.clone(),
            Ordering::Greater => Self::new(&self.unscaled * ten_pow(scale - self.scale), scale),
            Ordering::Less => Self::new(
                divide_rounded(&self.unscaled, &ten_pow(self.scale - scale), mode),
                scale,
            ),
        }
    }

    /// Drops trailing fractional zeros without changing the value.
    pub fn normalized(&self) -> Self {
        let mut unscaled = self.unscaled.clone();
        let mut scale = self.scale;
        let ten = BigInt::from(10u32);
        while scale > 0 {
            let (quotient, remainder) = unscaled.div_rem(&ten);
            if !remainder.is_zero() {
                break;
            }
            unscaled = quotient;
            scale -= 1;
        }
        Self::new(unscaled, scale)
    }

    pub fn div_scaled(
        &self,
        divisor: &Decimal,
        scale: u32,
        mode: RoundingMode,
    ) -> Result<Self, NumericError> {
        if divisor.is_zero() {
            return Err(NumericError::DivisionByZero);
        }
        // self / divisor * 10^scale = a * 10^(scale - sa + sb) / b
        let shift = scale as i64 - self.scale as i64 + divisor.scale as i64;
        let (numerator, denominator) = if shift >= 0 {
            (&self.unscaled * ten_pow(shift as u32), divisor.unscaled.clone())
        } else {
            (self.unscaled.clone(), &divisor.unscaled * ten_pow((-shift) as u32))
        };
        Ok(Self::new(
            divide_rounded(&numerator, &denominator, mode),
            scale,
        ))
    }

    pub fn to_i64(&self) -> Option<i64> {
        if !self.is_integer() {
            return None;
        }
        self.trunc().to_i64()
    }

    fn aligned(&self, other: &Decimal) -> (BigInt, BigInt, u32) {
        match self.scale.cmp(&other.scale) {
            Ordering::Equal => (self.unscaled.clone(), other.unscaled.clone(), self.scale),
            Ordering::Less => (
                &self.unscaled * ten_pow(other.scale - self.scale),
                other.unscaled.clone(),
                other.scale,
            ),
            Ordering::Greater => (
                self.unscaled.clone(),
                &other.unscaled * ten_pow(self.scale - other.scale),
                self.scale,
            ),
        }
    }
}

impl FromStr for Decimal {
    type Err = NumericError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || NumericError::Parse(text.to_string());
        let trimmed = text.trim();
        let (mantissa, exponent) = match trimmed.find(['e', 'E']) {
            Some(idx) => (
                &trimmed[..idx],
                trimmed[idx + 1..].parse::<i64>().map_err(|_| invalid())?,
            ),
            None => (trimmed, 0),
        };
        let (negative, body) = match mantissa.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, mantissa.strip_prefix('+').unwrap_or(mantissa)),
        };
        let (whole, fraction) = body.split_once('.').unwrap_or((body, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let digits = format!("{whole}{fraction}");
        let mut unscaled = BigInt::parse_bytes(digits.as_bytes(), 10).ok_or_else(invalid)?;
        let mut scale = fraction.len() as i64 - exponent;
        if scale < 0 {
            unscaled *= ten_pow(u32::try_from(-scale).map_err(|_| invalid())?);
            scale = 0;
        }
        if negative {
            unscaled = -unscaled;
        }
        Ok(Self::new(
            unscaled,
            u32::try_from(scale).map_err(|_| invalid())?,
        ))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.is_negative() { "-" } else { "" };
        let digits = self.unscaled.abs().to_string();
        if self.scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let scale = self.scale as usize;
        let padded = if digits.len() <= scale {
            format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
        } else {
            digits
        };
        let (whole, fraction) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{whole}.{fraction}")
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b, _) = self.aligned(other);
        a.cmp(&b)
    }
}

impl Add for &Decimal {
    type Output = Decimal;
    fn add(self, rhs: &Decimal) -> Decimal {
        let (a, b, scale) = self.aligned(rhs);
        Decimal::new(a + b, scale)
    }
}

impl Sub for &Decimal {
    type Output = Decimal;
    fn sub(self, rhs: &Decimal) -> Decimal {
        let (a, b, scale) = self.aligned(rhs);
        Decimal::new(a - b, scale)
    }
}

impl Mul for &Decimal {
    type Output = Decimal;
    fn mul(self, rhs: &Decimal) -> Decimal {
        Decimal::new(&self.unscaled * &rhs.unscaled, self.scale + rhs.scale)
    }
}

impl Neg for &Decimal {
    type Output = Decimal;
    fn neg(self) -> Decimal {
        Decimal::new(-&self.unscaled, self.scale)
    }
}

impl Neg for Decimal {
    type Output = Decimal;
    fn neg(self) -> Decimal {
        Decimal::new(-self.unscaled, self.scale)
    }
}

macro_rules! forward_owned_binop {
    ($trait:ident, $method:ident) => {
        impl $trait for Decimal {
            type Output = Decimal;
            fn $method(self, rhs: Decimal) -> Decimal {
                (&self).$method(&rhs)
            }
        }

        impl $trait<&Decimal> for Decimal {
            type Output = Decimal;
            fn $method(self, rhs: &Decimal) -> Decimal {
                (&self).$method(rhs)
            }
        }
    };
}

forward_owned_binop!(Add, add);
forward_owned_binop!(Sub, sub);
forward_owned_binop!(Mul, mul);
