//!
//! This library provides communication with an OWON VDS6104 PC oscilloscope.
//!
//! <br>
//!
//! # Details
//!
//! - Settings such as timebase and vertical scale only take values from a
//!   1-2-5 ladder. Requested values are snapped to the closest legal step
//!   ([`StepSequence`]) and rendered into the token the firmware parses
//!   ([`Renderer`]).
//!
//! - Waveforms are fetched as raw ADC codes and decoded into time and voltage
//!   samples ([`waveform::decode`]).
//!
//! - Basic setup and connection
//!
//!   ```no_run
//!   use vds6104ctrl::{proto::command::Channel, Device, DEFAULT_PORT};
//!   #[tokio::main]
//!   async fn main() -> vds6104ctrl::Result<()> {
//!       let mut device = Device::connect("192.168.1.72", DEFAULT_PORT).await?;
//!       eprintln!("Connected to: {}\n", device.check_model().await?.model);
//!       let applied = device.set_timebase(230e-6).await?;
//!       eprintln!("Timebase: {} s/div", applied);
//!       let capture = device.capture(Channel::Ch1).await?;
//!       eprintln!("{} samples", capture.samples.len());
//!       Ok(())
//!   }
//!   ```
//!
//! # Supported devices
//!
//!  * OWON VDS6104
//!  * OWON VDS6104P (same command set, profile via JSON)
//!

pub mod device;
pub mod error;
pub mod profile;
pub mod proto;
pub mod render;
pub mod scale;
pub mod waveform;

pub use device::Device;
pub use error::DomainError;
pub use profile::ScopeProfile;
pub use proto::Result;
pub use render::Renderer;
pub use scale::{closest_value, StepSequence};
pub use waveform::{code_for_voltage, decode, Capture, PhysicalSample};

#[cfg(unix)]
pub const DEFAULT_TTY: &str = "/dev/ttyACM0";
#[cfg(windows)]
pub const DEFAULT_TTY: &str = "COM1";

/// Default Baudrate of the USB CDC interface.
pub const DEFAULT_BAUDRATE: u32 = 115200;

/// Default SCPI port of the LAN interface.
pub const DEFAULT_PORT: u16 = 3000;
