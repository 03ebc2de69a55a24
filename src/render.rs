//!
//! Rendering of quantized settings into the tokens the instrument parses.
//!
//! The firmware does not accept scientific notation and wants the unit glued
//! to the number (`:HORI:SCAL 200us`). Some round time values are only
//! accepted with one decimal, `1.0s` instead of `1s`; those are listed in the
//! zero-pad set of a [`Renderer`].
//!

use crate::error::DomainError;
use crate::proto::conv::{unit_prefix, MAX_PREFIX_EXPONENT, MIN_PREFIX_EXPONENT};
use crate::scale::{compose, split_scientific};

/// Fractional digits kept when no zero padding applies.
pub const DEFAULT_PRECISION: usize = 4;

/// Timebase settings the instrument only takes with one decimal digit.
pub const TIME_ZERO_PAD: [f64; 12] = [
    1e-9, 2e-9, 5e-9, //
    1e-6, 2e-6, 5e-6, //
    1e-3, 2e-3, 5e-3, //
    1.0, 2.0, 5.0,
];

#[derive(Debug, Clone, PartialEq)]
pub struct Renderer {
    zero_pad: Vec<f64>,
    precision: usize,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Renderer {
    pub fn new(zero_pad: impl Into<Vec<f64>>) -> Self {
        Self {
            zero_pad: zero_pad.into(),
            precision: DEFAULT_PRECISION,
        }
    }

    /// Renderer for timebase values.
    pub fn time() -> Self {
        Self::new(TIME_ZERO_PAD)
    }

    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    pub fn zero_pad(&self) -> &[f64] {
        &self.zero_pad
    }

    /// Render `value` with an SI prefix and `unit`, e.g. `200us`.
    pub fn render(&self, value: f64, unit: &str) -> Result<String, DomainError> {
        if !value.is_finite() {
            return Err(DomainError::NotFinite(value));
        }
        let (prec, strip_zeros) = if self.zero_pad.contains(&value) {
            (1, false)
        } else {
            (self.precision, true)
        };

        let magnitude = value.abs();
        let (mantissa, exponent) =
            split_scientific(magnitude).ok_or(DomainError::NotFinite(value))?;
        let mut eng = if magnitude == 0.0 {
            0
        } else {
            (exponent.div_euclid(3) * 3).clamp(MIN_PREFIX_EXPONENT, MAX_PREFIX_EXPONENT)
        };

        let format_scaled = |eng: i32| -> Result<String, DomainError> {
            let scaled = compose(&mantissa, exponent - eng).ok_or(DomainError::NotFinite(value))?;
            Ok(format!("{:.prec$}", scaled))
        };
        let mut number = format_scaled(eng)?;
        // Rounding may carry over into the next prefix: 999.99996 -> 1000.0000
        if eng < MAX_PREFIX_EXPONENT && number.parse::<f64>().map_or(false, |n| n >= 1000.0) {
            eng += 3;
            number = format_scaled(eng)?;
        }
        if strip_zeros && number.contains('.') {
            number = number.trim_end_matches('0').trim_end_matches('.').to_string();
        }

        let sign = if value < 0.0 { "-" } else { "" };
        let token = format!("{}{}{}{}", sign, number, unit_prefix(eng), unit);
        Ok(token.split_whitespace().collect())
    }
}

/// Render with the timebase zero-pad set.
pub fn render(value: f64, unit: &str) -> Result<String, DomainError> {
    Renderer::time().render(value, unit)
}
