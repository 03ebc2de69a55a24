//!
//! Conversion of raw ADC codes into physical samples.
//!
//! The instrument delivers one signed code per sample point. A code of
//! [`ADC_CODES_PER_DIVISION`] is one vertical division above the screen
//! center, the channel's vertical offset (in divisions) and scale (volts per
//! division) turn it into volts:
//!
//! ```text
//! voltage = (code / 6400 - offset_divisions) * scale
//! time    = sample_period * index
//! ```
//!

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::io::{self, Cursor};

use crate::error::DomainError;
use crate::proto::command::Channel;

/// ADC codes per vertical division.
pub const ADC_CODES_PER_DIVISION: f64 = 6400.0;

/// Bit width of one raw sample on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleWidth {
    Bits8,
    #[default]
    Bits16,
}

impl SampleWidth {
    pub fn bytes(self) -> usize {
        match self {
            Self::Bits8 => 1,
            Self::Bits16 => 2,
        }
    }

    /// Smallest and largest code representable with this width.
    pub fn code_range(self) -> (i16, i16) {
        match self {
            Self::Bits8 => (i8::MIN as i16, i8::MAX as i16),
            Self::Bits16 => (i16::MIN, i16::MAX),
        }
    }
}

/// Vertical calibration of a channel at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelCalibration {
    /// Volts per division
    pub scale: f64,
    /// Vertical offset in divisions
    pub offset_divisions: f64,
}

impl ChannelCalibration {
    pub fn new(scale: f64, offset_divisions: f64) -> Result<Self, DomainError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(DomainError::InvalidCalibration(
                "scale must be finite and positive",
            ));
        }
        if !offset_divisions.is_finite() {
            return Err(DomainError::InvalidCalibration("offset must be finite"));
        }
        Ok(Self {
            scale,
            offset_divisions,
        })
    }

    pub fn voltage(&self, code: i16) -> f64 {
        (code as f64 / ADC_CODES_PER_DIVISION - self.offset_divisions) * self.scale
    }

    /// Inverse of [`Self::voltage`], `None` if the code does not fit `width`.
    pub fn code_for_voltage(&self, voltage: f64, width: SampleWidth) -> Option<i16> {
        let code = ((voltage / self.scale + self.offset_divisions) * ADC_CODES_PER_DIVISION).round();
        let (min, max) = width.code_range();
        if code.is_finite() && code >= min as f64 && code <= max as f64 {
            Some(code as i16)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSample {
    /// Seconds since the first sample
    pub time: f64,
    /// Volts
    pub voltage: f64,
}

impl Display for PhysicalSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prec = f.precision().unwrap_or(6);
        f.write_fmt(format_args!(
            "{:>14.prec$e} s  {:>12.prec$} V",
            self.time, self.voltage
        ))
    }
}

/// Raw 16 bit code that decodes to `voltage`, `None` outside the code range.
pub fn code_for_voltage(voltage: f64, calibration: &ChannelCalibration) -> Option<i16> {
    calibration.code_for_voltage(voltage, SampleWidth::Bits16)
}

/// Decode raw codes into `(time, voltage)` samples.
pub fn decode(
    raw: &[i16],
    scale: f64,
    offset_divisions: f64,
    sample_period: f64,
) -> Result<Vec<PhysicalSample>, DomainError> {
    let calibration = ChannelCalibration::new(scale, offset_divisions)?;
    decode_calibrated(raw, &calibration, sample_period)
}

pub fn decode_calibrated(
    raw: &[i16],
    calibration: &ChannelCalibration,
    sample_period: f64,
) -> Result<Vec<PhysicalSample>, DomainError> {
    if !sample_period.is_finite() || sample_period < 0.0 {
        return Err(DomainError::InvalidCalibration(
            "sample period must be finite and not negative",
        ));
    }
    Ok(raw
        .iter()
        .enumerate()
        .map(|(index, code)| PhysicalSample {
            time: sample_period * index as f64,
            voltage: calibration.voltage(*code),
        })
        .collect())
}

/// Unpack little endian codes from a waveform block.
pub fn codes_from_le_bytes(bytes: &[u8], width: SampleWidth) -> io::Result<Vec<i16>> {
    if bytes.len() % width.bytes() != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Waveform block of {} bytes is not a multiple of {} byte samples",
                bytes.len(),
                width.bytes()
            ),
        ));
    }
    match width {
        SampleWidth::Bits8 => Ok(bytes.iter().map(|b| *b as i8 as i16).collect()),
        SampleWidth::Bits16 => {
            let mut codes = vec![0; bytes.len() / 2];
            Cursor::new(bytes).read_i16_into::<LittleEndian>(&mut codes)?;
            Ok(codes)
        }
    }
}

/// One decoded waveform acquisition.
#[derive(Debug, Clone, Serialize)]
pub struct Capture {
    pub channel: Channel,
    pub captured_at: DateTime<Local>,
    pub calibration: ChannelCalibration,
    pub sample_period: f64,
    pub raw: Vec<i16>,
    pub samples: Vec<PhysicalSample>,
}

impl Capture {
    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.time)
    }

    pub fn voltages(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.voltage)
    }
}

impl Display for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {}  {} V/div  offset {} div  {} samples",
            self.captured_at.format("%H:%M:%S"),
            self.channel,
            self.calibration.scale,
            self.calibration.offset_divisions,
            self.samples.len()
        )?;
        for sample in &self.samples {
            writeln!(f, "{}", sample)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_zero_code() {
        let samples = decode(&[0], 0.2, 0.0, 1e-6).unwrap();
        assert_eq!(
            samples,
            vec![PhysicalSample {
                time: 0.0,
                voltage: 0.0
            }]
        );
    }

    #[test]
    fn test_decode_one_division() {
        let samples = decode(&[6400], 1.0, 0.0, 1.0).unwrap();
        assert_eq!(
            samples,
            vec![PhysicalSample {
                time: 0.0,
                voltage: 1.0
            }]
        );
    }

    #[test]
    fn test_decode_offset_and_time_axis() {
        let samples = decode(&[0, 3200, -6400, 12800], 0.5, 1.0, 0.5).unwrap();
        assert_eq!(samples.len(), 4);
        let voltages: Vec<f64> = samples.iter().map(|s| s.voltage).collect();
        assert_eq!(voltages, vec![-0.5, -0.25, -1.0, 0.5]);
        assert_eq!(samples[3].time, 1.5);
        assert!(decode(&[], 0.5, 1.0, 2e-6).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_calibration() {
        assert!(decode(&[1], 0.0, 0.0, 1.0).is_err());
        assert!(decode(&[1], 1.0, f64::NAN, 1.0).is_err());
        assert!(decode(&[1], 1.0, 0.0, -1.0).is_err());
    }

    #[test]
    fn test_code_round_trip() {
        let cal = ChannelCalibration::new(0.2, 0.25).unwrap();
        for code in (i16::MIN..=i16::MAX).step_by(97) {
            let voltage = cal.voltage(code);
            assert_eq!(code_for_voltage(voltage, &cal), Some(code));
        }
        assert_eq!(code_for_voltage(1000.0, &cal), None);
        assert_eq!(cal.code_for_voltage(cal.voltage(100), SampleWidth::Bits8), Some(100));
        assert_eq!(cal.code_for_voltage(cal.voltage(200), SampleWidth::Bits8), None);
    }

    #[test]
    fn test_codes_from_le_bytes() {
        let codes = codes_from_le_bytes(&[0x00, 0x19, 0xff, 0xff], SampleWidth::Bits16).unwrap();
        assert_eq!(codes, vec![6400, -1]);
        let codes = codes_from_le_bytes(&[0x7f, 0x80], SampleWidth::Bits8).unwrap();
        assert_eq!(codes, vec![127, -128]);
        assert!(codes_from_le_bytes(&[0x00], SampleWidth::Bits16).is_err());
    }
}
