//!
//! Quantization of requested settings onto the steps the instrument accepts.
//!
//! The firmware only takes values of the form `mantissa * 10^exponent`, e.g.
//! the classic 1-2-5 ladder `1ns, 2ns, 5ns, 10ns, ...`. A [`StepSequence`]
//! holds every such value inside a range, and [`StepSequence::resolve`] snaps
//! an arbitrary request onto the nearest step.
//!
//! Steps are composed as decimal literals (`"5e-3"`) and parsed, so a long
//! ladder never accumulates binary floating point drift.
//!

use std::fmt::Display;

use crate::error::DomainError;

/// The 1-2-5 ladder used by timebase and vertical scale settings.
pub const MANTISSAS_1_2_5: [u32; 3] = [1, 2, 5];

/// Split a value into its shortest round-trip scientific form,
/// e.g. `0.0025` into `("2.5", -3)`.
pub(crate) fn split_scientific(value: f64) -> Option<(String, i32)> {
    let repr = format!("{:e}", value);
    let (mantissa, exponent) = repr.split_once('e')?;
    Some((mantissa.to_string(), exponent.parse().ok()?))
}

/// Build `mantissa * 10^exponent` through its decimal literal.
pub(crate) fn compose(mantissa: impl Display, exponent: i32) -> Option<f64> {
    format!("{}e{}", mantissa, exponent).parse().ok()
}

/// Leading significant digit and decimal exponent of a positive value.
fn decompose(value: f64) -> Option<(u32, i32)> {
    let (mantissa, exponent) = split_scientific(value)?;
    let digit = mantissa.chars().next()?.to_digit(10)?;
    Some((digit, exponent))
}

fn validate_mantissas(mantissas: &[u32]) -> Result<(), DomainError> {
    let ordered = mantissas.windows(2).all(|w| w[0] < w[1]);
    if mantissas.is_empty() || mantissas[0] == 0 || !ordered {
        return Err(DomainError::InvalidMantissas(mantissas.to_vec()));
    }
    Ok(())
}

/// Lazy iterator over the steps of a range.
///
/// A clone taken before iteration replays the whole sequence.
#[derive(Debug, Clone)]
pub struct Steps<'a> {
    mantissas: &'a [u32],
    index: usize,
    exponent: i32,
    pending: Option<f64>,
    last: Option<f64>,
    max: f64,
}

impl<'a> Steps<'a> {
    pub fn new(min: f64, max: f64, mantissas: &'a [u32]) -> Result<Self, DomainError> {
        if !(min.is_finite() && max.is_finite()) || min <= 0.0 || min > max {
            return Err(DomainError::InvalidRange { min, max });
        }
        validate_mantissas(mantissas)?;

        let leading_digit = || DomainError::LeadingDigit {
            value: min,
            mantissas: mantissas.to_vec(),
        };
        let (digit, exponent) = decompose(min).ok_or_else(leading_digit)?;
        let index = mantissas
            .iter()
            .position(|m| *m == digit)
            .ok_or_else(leading_digit)?;

        Ok(Self {
            mantissas,
            index,
            exponent,
            pending: Some(min),
            last: None,
            max,
        })
    }

    fn advance(&mut self) {
        self.index = (self.index + 1) % self.mantissas.len();
        if self.index == 0 {
            self.exponent += 1;
        }
        self.pending = compose(self.mantissas[self.index], self.exponent);
    }
}

impl Iterator for Steps<'_> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        loop {
            let value = self.pending.take()?;
            if value > self.max {
                return None;
            }
            self.advance();
            // Multi-digit mantissas (e.g. 10 in [1, 3, 10]) can repeat a step.
            if self.last.map_or(true, |last| value > last) {
                self.last = Some(value);
                return Some(value);
            }
        }
    }
}

/// Ascending, deduplicated set of legal values for a setting.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepSequence {
    values: Vec<f64>,
}

impl StepSequence {
    /// All `mantissa * 10^exponent` values in `min ..= max`.
    ///
    /// The leading digit of `min` must be one of `mantissas`.
    pub fn generate(min: f64, max: f64, mantissas: &[u32]) -> Result<Self, DomainError> {
        Ok(Self {
            values: Steps::new(min, max, mantissas)?.collect(),
        })
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn first(&self) -> Option<f64> {
        self.values.first().copied()
    }

    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    pub fn position(&self, value: f64) -> Option<usize> {
        self.values.iter().position(|v| *v == value)
    }

    pub fn contains(&self, value: f64) -> bool {
        self.position(value).is_some()
    }

    /// Member closest to `target`. On a tie the smaller step wins.
    pub fn resolve(&self, target: f64) -> Result<f64, DomainError> {
        if !target.is_finite() {
            return Err(DomainError::NotFinite(target));
        }
        resolve_by(&self.values, |candidate| (candidate - target).abs())
    }

    /// Next step that fully encompasses `target`, starting from its
    /// resolved value.
    ///
    /// Returns `resolved` when it already covers `target` or when nothing in
    /// the sequence does.
    pub fn ceiling_bound(&self, target: f64, resolved: f64) -> Result<f64, DomainError> {
        let index = self
            .position(resolved)
            .ok_or(DomainError::NotInSequence(resolved))?;
        if !target.is_finite() {
            return Err(DomainError::NotFinite(target));
        }
        if target <= resolved {
            return Ok(resolved);
        }
        match self.last() {
            Some(max) if target > max => Ok(resolved),
            _ => Ok(self.values.get(index + 1).copied().unwrap_or(resolved)),
        }
    }
}

impl FromIterator<f64> for StepSequence {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut values: Vec<f64> = iter.into_iter().filter(|v| v.is_finite()).collect();
        values.sort_by(f64::total_cmp);
        values.dedup();
        Self { values }
    }
}

impl<'a> IntoIterator for &'a StepSequence {
    type Item = &'a f64;
    type IntoIter = std::slice::Iter<'a, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Scan `values` in order for the smallest distance. A zero distance stops
/// the scan at once.
pub(crate) fn resolve_by<F>(values: &[f64], mut distance: F) -> Result<f64, DomainError>
where
    F: FnMut(f64) -> f64,
{
    let mut best: Option<(f64, f64)> = None;
    for &candidate in values {
        let delta = distance(candidate);
        if delta == 0.0 {
            return Ok(candidate);
        }
        match best {
            Some((_, min_delta)) if delta >= min_delta => {}
            _ => best = Some((candidate, delta)),
        }
    }
    best.map(|(candidate, _)| candidate)
        .ok_or(DomainError::EmptySequence)
}

/// Generate the steps of `min ..= max` and snap `target` onto them.
pub fn closest_value(
    target: f64,
    min: f64,
    max: f64,
    mantissas: &[u32],
) -> Result<f64, DomainError> {
    StepSequence::generate(min, max, mantissas)?.resolve(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vscale() -> StepSequence {
        StepSequence::generate(2e-3, 10.0, &MANTISSAS_1_2_5).unwrap()
    }

    #[test]
    fn test_generate_vscale_ladder() {
        assert_eq!(
            vscale().as_slice(),
            &[0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0]
        );
    }

    #[test]
    fn test_generate_timebase_ladder() {
        let seq = StepSequence::generate(1e-9, 100.0, &MANTISSAS_1_2_5).unwrap();
        assert_eq!(seq.len(), 34);
        assert_eq!(seq.first(), Some(1e-9));
        assert_eq!(seq.last(), Some(100.0));
        assert!(seq.contains(2e-4));
        assert!(seq.contains(5e-6));
    }

    #[test]
    fn test_generate_properties() {
        for (min, max, mantissas) in [
            (1e-9, 100.0, &[1, 2, 5][..]),
            (2e-3, 5.0, &[1, 2, 5][..]),
            (1.0, 1e6, &[1, 3][..]),
            (5e-12, 3e-3, &[1, 2, 5][..]),
        ] {
            let seq = StepSequence::generate(min, max, mantissas).unwrap();
            assert_eq!(seq.first(), Some(min));
            assert!(seq.last().unwrap() <= max);
            assert!(seq.as_slice().windows(2).all(|w| w[0] < w[1]));
            for value in &seq {
                let (digit, _) = decompose(*value).unwrap();
                assert!(mantissas.contains(&digit), "{} not on ladder", value);
            }
        }
    }

    #[test]
    fn test_generate_single_element() {
        let seq = StepSequence::generate(0.5, 0.5, &MANTISSAS_1_2_5).unwrap();
        assert_eq!(seq.as_slice(), &[0.5]);
    }

    #[test]
    fn test_generate_skips_repeated_steps() {
        let seq = StepSequence::generate(1.0, 1000.0, &[1, 3, 10]).unwrap();
        assert_eq!(seq.as_slice(), &[1.0, 3.0, 10.0, 30.0, 100.0, 300.0, 1000.0]);
    }

    #[test]
    fn test_generate_starts_off_ladder() {
        let seq = StepSequence::generate(1.5e-3, 0.01, &MANTISSAS_1_2_5).unwrap();
        assert_eq!(seq.as_slice(), &[1.5e-3, 2e-3, 5e-3, 0.01]);
    }

    #[test]
    fn test_generate_rejects_invalid_input() {
        assert!(matches!(
            StepSequence::generate(0.0, 1.0, &MANTISSAS_1_2_5),
            Err(DomainError::InvalidRange { .. })
        ));
        assert!(matches!(
            StepSequence::generate(-1.0, 1.0, &MANTISSAS_1_2_5),
            Err(DomainError::InvalidRange { .. })
        ));
        assert!(matches!(
            StepSequence::generate(2.0, 1.0, &MANTISSAS_1_2_5),
            Err(DomainError::InvalidRange { .. })
        ));
        assert!(matches!(
            StepSequence::generate(1.0, f64::INFINITY, &MANTISSAS_1_2_5),
            Err(DomainError::InvalidRange { .. })
        ));
        assert!(matches!(
            StepSequence::generate(3e-3, 1.0, &MANTISSAS_1_2_5),
            Err(DomainError::LeadingDigit { .. })
        ));
        assert!(matches!(
            StepSequence::generate(1.0, 10.0, &[]),
            Err(DomainError::InvalidMantissas(_))
        ));
        assert!(matches!(
            StepSequence::generate(1.0, 10.0, &[5, 2, 1]),
            Err(DomainError::InvalidMantissas(_))
        ));
    }

    #[test]
    fn test_steps_are_restartable() {
        let steps = Steps::new(1e-3, 1.0, &MANTISSAS_1_2_5).unwrap();
        let first: Vec<f64> = steps.clone().collect();
        let second: Vec<f64> = steps.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 10);
    }

    #[test]
    fn test_resolve_nearest() {
        let seq = vscale();
        assert_eq!(seq.resolve(0.250).unwrap(), 0.2);
        assert_eq!(seq.resolve(0.0001).unwrap(), 0.002);
        assert_eq!(seq.resolve(1000.0).unwrap(), 10.0);
        assert_eq!(seq.resolve(0.004).unwrap(), 0.005);
    }

    #[test]
    fn test_resolve_tie_takes_first() {
        let seq: StepSequence = [1.0, 2.0, 5.0].into_iter().collect();
        assert_eq!(seq.resolve(1.5).unwrap(), 1.0);
        assert_eq!(seq.resolve(3.5).unwrap(), 2.0);
    }

    #[test]
    fn test_resolve_exact_match_stops_scan() {
        let seq = vscale();
        let mut calls = 0;
        let found = resolve_by(seq.as_slice(), |candidate| {
            calls += 1;
            (candidate - 0.01).abs()
        })
        .unwrap();
        assert_eq!(found, 0.01);
        assert_eq!(calls, seq.position(0.01).unwrap() + 1);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let seq = StepSequence::generate(1e-9, 100.0, &MANTISSAS_1_2_5).unwrap();
        for target in [3e-9, 0.00023, 7.7e-5, 0.15, 3.0, 42.0, 1e9] {
            let once = seq.resolve(target).unwrap();
            assert_eq!(seq.resolve(once).unwrap(), once);
        }
    }

    #[test]
    fn test_resolve_errors() {
        assert_eq!(
            StepSequence::default().resolve(1.0),
            Err(DomainError::EmptySequence)
        );
        assert!(matches!(
            vscale().resolve(f64::NAN),
            Err(DomainError::NotFinite(_))
        ));
    }

    #[test]
    fn test_ceiling_bound() {
        let seq: StepSequence = [1.0, 2.0, 5.0, 10.0, 20.0, 50.0].into_iter().collect();
        // covered already
        assert_eq!(seq.ceiling_bound(9.0, 10.0).unwrap(), 10.0);
        assert_eq!(seq.ceiling_bound(10.0, 10.0).unwrap(), 10.0);
        // between two steps: round up to the next one
        assert_eq!(seq.ceiling_bound(10.1, 10.0).unwrap(), 20.0);
        // beyond the ladder
        assert_eq!(seq.ceiling_bound(60.0, 50.0).unwrap(), 50.0);
        assert_eq!(
            seq.ceiling_bound(3.0, 3.0),
            Err(DomainError::NotInSequence(3.0))
        );
    }

    #[test]
    fn test_ceiling_bound_non_finite_target() {
        let seq: StepSequence = [1.0, 2.0, 5.0].into_iter().collect();
        assert!(matches!(
            seq.ceiling_bound(f64::NAN, 2.0),
            Err(DomainError::NotFinite(_))
        ));
        assert_eq!(
            seq.ceiling_bound(f64::INFINITY, 2.0),
            Err(DomainError::NotFinite(f64::INFINITY))
        );
    }

    #[test]
    fn test_closest_value() {
        assert_eq!(closest_value(0.00023, 1e-9, 100.0, &MANTISSAS_1_2_5).unwrap(), 2e-4);
    }
}
