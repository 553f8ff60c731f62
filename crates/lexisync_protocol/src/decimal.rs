//! Fixed-precision decimals.
//!
//! The server stores some numeric fields with a declared precision and scale
//! (`DECIMAL(p, s)`). Client values arrive as floating point and are rounded
//! half away from zero to `scale` digits before storage.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Digits after the point for ease factors.
pub const EASE_FACTOR_SCALE: u8 = 2;

/// Total significant digits for ease factors.
pub const EASE_FACTOR_PRECISION: u8 = 4;

/// A decimal number stored as an integer count of `10^-scale` units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedDecimal {
    units: i64,
    scale: u8,
}

impl FixedDecimal {
    /// Converts `value` to `DECIMAL(precision, scale)`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DecimalOverflow`] if `value` is not finite
    /// or has more than `precision - scale` integer digits after rounding.
    pub fn from_f64(value: f64, precision: u8, scale: u8) -> ProtocolResult<Self> {
        let overflow = || ProtocolError::DecimalOverflow {
            value,
            precision,
            scale,
        };
        if !value.is_finite() || scale > precision || precision > 18 {
            return Err(overflow());
        }

        let factor = 10f64.powi(i32::from(scale));
        let scaled = (value * factor).round();
        let limit = 10i64.pow(u32::from(precision));
        if scaled.abs() >= limit as f64 {
            return Err(overflow());
        }

        Ok(Self {
            units: scaled as i64,
            scale,
        })
    }

    /// Converts an ease factor to its stored form.
    pub fn ease_factor(value: f64) -> ProtocolResult<Self> {
        Self::from_f64(value, EASE_FACTOR_PRECISION, EASE_FACTOR_SCALE)
    }

    /// Returns the value as floating point.
    pub fn to_f64(&self) -> f64 {
        self.units as f64 / 10f64.powi(i32::from(self.scale))
    }

    /// Returns the raw unit count.
    pub fn units(&self) -> i64 {
        self.units
    }

    /// Returns the number of digits after the point.
    pub fn scale(&self) -> u8 {
        self.scale
    }
}

impl fmt::Display for FixedDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.units);
        }
        let divisor = 10i64.pow(u32::from(self.scale));
        let sign = if self.units < 0 { "-" } else { "" };
        let abs = self.units.unsigned_abs();
        let divisor = divisor.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:0width$}",
            abs / divisor,
            abs % divisor,
            width = usize::from(self.scale)
        )
    }
}
