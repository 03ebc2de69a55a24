use thiserror::Error;

/// An input value violates the precondition of an operation.
///
/// These are raised synchronously and never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Invalid range {min} .. {max}: bounds must be finite, positive and ordered")]
    InvalidRange { min: f64, max: f64 },
    #[error("Mantissa set must be non-empty, positive and strictly ascending: {0:?}")]
    InvalidMantissas(Vec<u32>),
    #[error("Leading digit of {value} is not one of the mantissas {mantissas:?}")]
    LeadingDigit { value: f64, mantissas: Vec<u32> },
    #[error("Cannot resolve against an empty step sequence")]
    EmptySequence,
    #[error("Value {0} is not a member of the step sequence")]
    NotInSequence(f64),
    #[error("Value is not a finite number: {0}")]
    NotFinite(f64),
    #[error("Invalid channel: {0}")]
    InvalidChannel(u8),
    #[error("Unsupported {kind}: {token:?}")]
    UnsupportedSelector { kind: &'static str, token: String },
    #[error("{what} {value} out of range {min} .. {max}")]
    OutOfRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(&'static str),
}
