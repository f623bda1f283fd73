//! Fixed-point arithmetic and ratio calculations.
//!
//! Every amount in the ledger is a [`FixedPoint`] with 18 decimals. The
//! accounting path only uses checked operations: an overflow, underflow or
//! division by zero is an [`Error::ArithmeticInvariantViolation`] and is never
//! clamped. Products are formed in 256 bits before dividing, so `a * b / c`
//! only fails when the final quotient does not fit.

use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::utils::constants::{DECIMALS, DECIMAL_PRECISION};

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED POINT TYPE
// ═══════════════════════════════════════════════════════════════════════════════

/// Unsigned fixed-point number with 18 decimal places
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedPoint(u128);

impl FixedPoint {
    /// Scale factor: 10^18
    pub const SCALE: u128 = DECIMAL_PRECISION;

    /// Zero value
    pub const ZERO: Self = Self(0);

    /// One (1.0)
    pub const ONE: Self = Self(Self::SCALE);

    /// Largest representable value, used as the "infinite ratio" sentinel
    pub const MAX: Self = Self(u128::MAX);

    /// Create a new FixedPoint from raw value
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Get the raw underlying value
    pub const fn raw(&self) -> u128 {
        self.0
    }

    /// Create from an integer (scales up)
    pub fn from_integer(value: u64) -> Self {
        Self((value as u128) * Self::SCALE)
    }

    /// Create from a fraction `numerator / denominator`
    pub fn from_ratio(numerator: u64, denominator: u64) -> Result<Self> {
        Self::from_integer(numerator).mul_div(Self::ONE, Self::from_integer(denominator))
    }

    /// Check if value is zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Lossy conversion for display and statistics only
    pub fn to_f64(&self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CHECKED ARITHMETIC
    // ═══════════════════════════════════════════════════════════════════════════

    /// Checked addition
    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or_else(|| Error::arithmetic(format!("{} + {}", self, rhs)))
    }

    /// Checked subtraction
    pub fn checked_sub(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_sub(rhs.0)
            .map(Self)
            .ok_or_else(|| Error::arithmetic(format!("{} - {}", self, rhs)))
    }

    /// Fixed-point multiplication, rounding down
    pub fn checked_mul(self, rhs: Self) -> Result<Self> {
        self.mul_div(rhs, Self::ONE)
    }

    /// Fixed-point division, rounding down
    pub fn checked_div(self, rhs: Self) -> Result<Self> {
        self.mul_div(Self::ONE, rhs)
    }

    /// Computes `self * b / c` with a 256-bit intermediate, rounding down
    pub fn mul_div(self, b: Self, c: Self) -> Result<Self> {
        if c.is_zero() {
            return Err(Error::arithmetic(format!("({} * {}) / 0", self, b)));
        }
        let quotient = U256::from(self.0) * U256::from(b.0) / U256::from(c.0);
        narrow(quotient)
            .map(Self)
            .ok_or_else(|| Error::arithmetic(format!("({} * {}) / {}", self, b, c)))
    }

    /// Computes `self * b / c` with a 256-bit intermediate, rounding up
    pub fn mul_div_up(self, b: Self, c: Self) -> Result<Self> {
        if c.is_zero() {
            return Err(Error::arithmetic(format!("ceil(({} * {}) / 0)", self, b)));
        }
        let divisor = U256::from(c.0);
        let quotient = (U256::from(self.0) * U256::from(b.0) + divisor - U256::one()) / divisor;
        narrow(quotient)
            .map(Self)
            .ok_or_else(|| Error::arithmetic(format!("ceil(({} * {}) / {})", self, b, c)))
    }

    /// Fixed-point `(self + carry) / divisor` where `carry` is the raw remainder
    /// left over by a previous division; returns the quotient and the new
    /// remainder
    pub fn div_with_carry(self, divisor: Self, carry: Self) -> Result<(Self, Self)> {
        if divisor.is_zero() {
            return Err(Error::arithmetic(format!("({} + carry) / 0", self)));
        }
        let numerator = U256::from(self.0) * U256::from(Self::SCALE) + U256::from(carry.0);
        let divisor_wide = U256::from(divisor.0);
        let quotient = narrow(numerator / divisor_wide)
            .ok_or_else(|| Error::arithmetic(format!("({} + carry) / {}", self, divisor)))?;
        let remainder = (numerator % divisor_wide).low_u128();
        Ok((Self(quotient), Self(remainder)))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REPORTING HELPERS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Saturating addition
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Minimum of two values
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    /// Maximum of two values
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    /// Absolute difference
    pub fn abs_diff(self, other: Self) -> Self {
        Self(self.0.abs_diff(other.0))
    }
}

fn narrow(value: U256) -> Option<u128> {
    if value.bits() > 128 {
        None
    } else {
        Some(value.low_u128())
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::MAX {
            return write!(f, "inf");
        }
        let int = self.0 / Self::SCALE;
        let frac = self.0 % Self::SCALE;
        if frac == 0 {
            return write!(f, "{}", int);
        }
        let digits = format!("{:018}", frac);
        write!(f, "{}.{}", int, digits.trim_end_matches('0'))
    }
}

impl FromStr for FixedPoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = |reason: &str| Error::InvalidParameter {
            name: "decimal".into(),
            reason: format!("{:?}: {}", s, reason),
        };

        if s == "inf" {
            return Ok(Self::MAX);
        }

        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid("empty"));
        }
        if frac_part.len() > DECIMALS as usize {
            return Err(invalid("more than 18 decimals"));
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid("not a decimal number"));
        }

        let int: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid("integer part too large"))?
        };
        let frac: u128 = if frac_part.is_empty() {
            0
        } else {
            let padded = format!("{:0<18}", frac_part);
            padded.parse().map_err(|_| invalid("bad fraction"))?
        };

        int.checked_mul(Self::SCALE)
            .and_then(|v| v.checked_add(frac))
            .map(Self)
            .ok_or_else(|| invalid("out of range"))
    }
}

impl Serialize for FixedPoint {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FixedPoint {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERALIZATION CALCULATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Nominal collateral ratio (collateral / debt), independent of price
///
/// Returns [`FixedPoint::MAX`] when there is no debt.
pub fn nominal_ratio(collateral: FixedPoint, debt: FixedPoint) -> Result<FixedPoint> {
    if debt.is_zero() {
        return Ok(FixedPoint::MAX);
    }
    collateral.checked_div(debt)
}

/// Price-adjusted collateral ratio (collateral * price / debt)
///
/// Returns [`FixedPoint::MAX`] when there is no debt.
pub fn collateral_ratio(
    collateral: FixedPoint,
    debt: FixedPoint,
    price: FixedPoint,
) -> Result<FixedPoint> {
    if debt.is_zero() {
        return Ok(FixedPoint::MAX);
    }
    collateral.mul_div(price, debt)
}

/// Total collateralization ratio of the whole ledger
pub fn system_ratio(
    total_collateral: FixedPoint,
    total_debt: FixedPoint,
    price: FixedPoint,
) -> Result<FixedPoint> {
    collateral_ratio(total_collateral, total_debt, price)
}

/// Collateral worth `debt` at `price`, rounding down
pub fn collateral_for_debt(debt: FixedPoint, price: FixedPoint) -> Result<FixedPoint> {
    if price.is_zero() {
        return Err(Error::InvalidPrice("price cannot be zero".into()));
    }
    debt.mul_div(FixedPoint::ONE, price)
}

/// Share of `amount` proportional to `part / whole`, rounding down
pub fn proportional_share(
    amount: FixedPoint,
    part: FixedPoint,
    whole: FixedPoint,
) -> Result<FixedPoint> {
    if part == whole {
        return Ok(amount);
    }
    amount.mul_div(part, whole)
}
