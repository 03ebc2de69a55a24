use serde::{Deserialize, Serialize};
use std::io::Read;
use std::time::Duration;

use crate::error::DomainError;
use crate::render::{Renderer, TIME_ZERO_PAD};
use crate::scale::{StepSequence, MANTISSAS_1_2_5};
use crate::waveform::SampleWidth;

/// Limits and settings of one oscilloscope model.
///
/// The default describes the VDS6104. Missing fields of a JSON profile fall
/// back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeProfile {
    /// Model name expected in the `*IDN?` reply
    pub model: String,
    pub channels: u8,
    /// Leading digits of timebase and scale steps
    pub mantissas: Vec<u32>,
    /// Seconds per division
    pub timebase_min: f64,
    pub timebase_max: f64,
    /// Timebase values the firmware only accepts with one decimal digit
    pub timebase_zero_pad: Vec<f64>,
    /// Volts per division
    pub scale_min: f64,
    pub scale_max: f64,
    /// Seconds
    pub trigger_holdoff_min: f64,
    pub trigger_holdoff_max: f64,
    /// Shortest measurement gate time (20ms, SDK manual p. 42)
    pub min_measurement_time: f64,
    pub reply_timeout_ms: u64,
    pub sample_width: SampleWidth,
    /// First and last point fetched by a waveform capture
    pub waveform_range: (u32, u32),
}

impl Default for ScopeProfile {
    fn default() -> Self {
        Self {
            model: String::from("VDS6104"),
            channels: 4,
            mantissas: MANTISSAS_1_2_5.to_vec(),
            timebase_min: 1e-9,
            timebase_max: 100.0,
            timebase_zero_pad: TIME_ZERO_PAD.to_vec(),
            scale_min: 2e-3,
            scale_max: 5.0,
            trigger_holdoff_min: 100e-9,
            trigger_holdoff_max: 10.0,
            min_measurement_time: 0.02,
            reply_timeout_ms: 2000,
            sample_width: SampleWidth::Bits16,
            waveform_range: (0, 1000),
        }
    }
}

impl ScopeProfile {
    pub fn from_json(reader: impl Read) -> serde_json::Result<Self> {
        serde_json::from_reader(reader)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn timebase_steps(&self) -> Result<StepSequence, DomainError> {
        StepSequence::generate(self.timebase_min, self.timebase_max, &self.mantissas)
    }

    pub fn scale_steps(&self) -> Result<StepSequence, DomainError> {
        StepSequence::generate(self.scale_min, self.scale_max, &self.mantissas)
    }

    pub fn time_renderer(&self) -> Renderer {
        Renderer::new(self.timebase_zero_pad.clone())
    }

    pub fn volt_renderer(&self) -> Renderer {
        Renderer::default()
    }
}
