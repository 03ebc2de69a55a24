use bytes::Bytes;
use chrono::Local;
use futures::{SinkExt, StreamExt};
use std::{pin::Pin, time::Duration};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::Decoder;

use super::proto::{
    codec::ScpiCodec,
    command::{
        on_off, AcquireMode, Channel, Command, Coupling, Measurement, MemoryDepth, Precision,
        TriggerCoupling, TriggerMode, TriggerSlope, TriggerStatus,
    },
    conv::parse_quantity,
    response::{Ident, Response},
    ProtoError,
};
use crate::error::DomainError;
use crate::profile::ScopeProfile;
use crate::proto::Result;
use crate::render::Renderer;
use crate::scale::StepSequence;
use crate::waveform::{codes_from_le_bytes, decode_calibrated, Capture, ChannelCalibration};

/// Unit suffix of timebase tokens
const TIME_UNIT: &str = "s";
/// Unit suffix of vertical scale tokens
const VOLT_UNIT: &str = "v";

trait AsyncReadWrite<S>: futures::Sink<S> + futures::Stream {}

impl<T, S> AsyncReadWrite<S> for T where T: futures::Sink<S> + futures::Stream {}

/// Connection to one oscilloscope.
///
/// All operations take `&mut self`, so only one command is in flight on the
/// connection at any time. After a reply timed out the replies can no longer
/// be matched to their commands; every later call fails with
/// [`ProtoError::Abort`] until the device is reconnected.
#[allow(clippy::type_complexity)]
pub struct Device {
    stream: Pin<
        Box<
            dyn AsyncReadWrite<
                    Command,
                    Error = std::io::Error,
                    Item = std::result::Result<Response, std::io::Error>,
                > + Send,
        >,
    >,
    profile: ScopeProfile,
    timebase_steps: StepSequence,
    scale_steps: StepSequence,
    time_renderer: Renderer,
    volt_renderer: Renderer,
    desynced: bool,
}

impl Device {
    /// Open a serial (USB CDC) connection.
    pub fn new(com: impl AsRef<str>, baudrate: u32) -> Result<Self> {
        let mut port = tokio_serial::new(com.as_ref(), baudrate).open_native_async()?;

        #[cfg(unix)]
        port.set_exclusive(false)?;

        Self::from_transport(port)
    }

    /// Open a LAN connection to the SCPI socket of the instrument.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Self::from_transport(stream)
    }

    /// Run the protocol over any byte stream.
    pub fn from_transport<T>(transport: T) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let profile = ScopeProfile::default();
        let stream = ScpiCodec::default().framed(transport);

        Ok(Self {
            stream: Box::pin(stream),
            timebase_steps: profile.timebase_steps()?,
            scale_steps: profile.scale_steps()?,
            time_renderer: profile.time_renderer(),
            volt_renderer: profile.volt_renderer(),
            profile,
            desynced: false,
        })
    }

    #[cfg(test)]
    pub(crate) fn new_faked(
        response_buf: impl AsRef<[u8]>,
    ) -> (Self, std::sync::Arc<std::sync::Mutex<Vec<u8>>>) {
        let fake = super::proto::fake::FakeBuffer::new(response_buf.as_ref().to_vec());
        let written = fake.written();
        let device = Self::from_transport(fake).expect("default profile is valid");
        (device, written)
    }

    /// Replace the model profile, regenerating the legal setting steps.
    pub fn with_profile(mut self, profile: ScopeProfile) -> Result<Self> {
        self.timebase_steps = profile.timebase_steps()?;
        self.scale_steps = profile.scale_steps()?;
        self.time_renderer = profile.time_renderer();
        self.volt_renderer = profile.volt_renderer();
        self.profile = profile;
        Ok(self)
    }

    pub fn profile(&self) -> &ScopeProfile {
        &self.profile
    }

    /// Legal timebase settings, seconds per division
    pub fn timebase_steps(&self) -> &StepSequence {
        &self.timebase_steps
    }

    /// Legal vertical scale settings, volts per division
    pub fn scale_steps(&self) -> &StepSequence {
        &self.scale_steps
    }

    fn reply_timeout(&self) -> Duration {
        self.profile.reply_timeout()
    }

    fn check_channel(&self, channel: Channel) -> Result<Channel> {
        if channel.number() > self.profile.channels {
            Err(DomainError::InvalidChannel(channel.number()).into())
        } else {
            Ok(channel)
        }
    }

    async fn execute(&mut self, command: Command) -> Result<Option<Response>> {
        if self.desynced {
            log::warn!("Refusing {:?}, connection lost sync after a timeout", command.text());
            return Err(ProtoError::Abort);
        }
        let expects_reply = command.expects_reply();
        self.stream.send(command).await?;
        if !expects_reply {
            return Ok(None);
        }
        let timeout = self.reply_timeout();
        match tokio::time::timeout(timeout, self.stream.next()).await {
            Ok(Some(Ok(response))) => Ok(Some(response)),
            Ok(Some(Err(ioerr))) => Err(ioerr.into()),
            Ok(None) => Err(ProtoError::Abort),
            Err(_) => {
                // A late reply would be taken as the answer to the next query.
                self.desynced = true;
                Err(ProtoError::Timeout(timeout))
            }
        }
    }

    async fn write(&mut self, command: Command) -> Result<()> {
        self.execute(command).await.map(|_| ())
    }

    /// Write a command, no reply expected
    pub async fn send(&mut self, command: impl Into<String>) -> Result<()> {
        self.write(Command::Write(command.into())).await
    }

    /// Write a command and read one reply line, surrounding whitespace removed
    pub async fn query(&mut self, command: impl Into<String>) -> Result<String> {
        match self.execute(Command::Query(command.into())).await? {
            Some(Response::Line(line)) => Ok(line.trim().to_string()),
            Some(response) => Err(ProtoError::Unexpected(response)),
            None => Err(ProtoError::Abort),
        }
    }

    /// Write a command and read a binary block reply
    pub async fn query_block(&mut self, command: impl Into<String>) -> Result<Bytes> {
        match self.execute(Command::QueryBlock(command.into())).await? {
            Some(Response::Block(data)) => Ok(data),
            Some(response) => Err(ProtoError::Unexpected(response)),
            None => Err(ProtoError::Abort),
        }
    }

    /// Write a command and read a block of raw ADC codes
    pub async fn query_binary(&mut self, command: impl Into<String>) -> Result<Vec<i16>> {
        let block = self.query_block(command).await?;
        Ok(codes_from_le_bytes(&block, self.profile.sample_width)?)
    }

    async fn query_parsed<T, E>(
        &mut self,
        command: String,
        parse: impl FnOnce(&str) -> std::result::Result<T, E>,
    ) -> Result<T> {
        let reply = self.query(command.clone()).await?;
        parse(&reply).map_err(|_| ProtoError::InvalidReply { command, reply })
    }

    async fn query_number(&mut self, command: String) -> Result<f64> {
        self.query_parsed(command, |reply| parse_quantity(reply).ok_or(()))
            .await
    }

    async fn query_percent(&mut self, command: String) -> Result<u8> {
        self.query_parsed(command, |reply| reply.parse::<u8>()).await
    }

    async fn query_switch(&mut self, command: String, on: &str) -> Result<bool> {
        let reply = self.query(command).await?;
        Ok(reply.eq_ignore_ascii_case(on))
    }

    fn finite(value: f64) -> Result<f64> {
        if value.is_finite() {
            Ok(value)
        } else {
            Err(DomainError::NotFinite(value).into())
        }
    }

    /// Query device identification
    pub async fn ident(&mut self) -> Result<Ident> {
        let reply = self.query("*IDN?").await?;
        Ident::try_from(reply.as_str())
    }

    /// Query identification and verify the model matches the profile
    pub async fn check_model(&mut self) -> Result<Ident> {
        let ident = self.ident().await?;
        if ident.is_model(&self.profile.model) {
            Ok(ident)
        } else {
            Err(ProtoError::UnsupportedModel(ident.to_string()))
        }
    }

    /// Query horizontal timebase, seconds per division
    pub async fn timebase(&mut self) -> Result<f64> {
        self.query_number(":HORI:SCAL?".into()).await
    }

    /// Set horizontal timebase to the closest legal step.
    ///
    /// Returns the step that was applied.
    pub async fn set_timebase(&mut self, seconds: f64) -> Result<f64> {
        let value = self.timebase_steps.resolve(seconds)?;
        let token = self.time_renderer.render(value, TIME_UNIT)?;
        self.write(Command::set(":HORI:SCAL", token)).await?;
        Ok(value)
    }

    /// Query horizontal trigger position, divisions
    pub async fn timebase_offset(&mut self) -> Result<f64> {
        self.query_number(":HORI:OFFS?".into()).await
    }

    /// Move the horizontal trigger position, divisions.
    /// Negative values move rightwards.
    pub async fn set_timebase_offset(&mut self, divisions: f64) -> Result<()> {
        let divisions = Self::finite(divisions)?;
        self.write(Command::set(":HORI:OFFS", divisions)).await
    }

    /// Query vertical scale, volts per division
    pub async fn scale(&mut self, channel: Channel) -> Result<f64> {
        let channel = self.check_channel(channel)?;
        self.query_number(format!(":{}:SCAL?", channel)).await
    }

    /// Set vertical scale to the closest legal step.
    ///
    /// Returns the step that was applied.
    pub async fn set_scale(&mut self, channel: Channel, volts: f64) -> Result<f64> {
        let channel = self.check_channel(channel)?;
        let value = self.scale_steps.resolve(volts)?;
        let token = self.volt_renderer.render(value, VOLT_UNIT)?;
        self.write(Command::set(format!(":{}:SCAL", channel), token))
            .await?;
        Ok(value)
    }

    /// Query vertical offset, divisions.
    ///
    /// Multiply with the scale for the offset in volts.
    pub async fn vertical_offset(&mut self, channel: Channel) -> Result<f64> {
        let channel = self.check_channel(channel)?;
        self.query_number(format!(":{}:OFFS?", channel)).await
    }

    /// Set vertical offset, divisions. The allowed range depends on the scale,
    /// from +/-1000 at 2mV down to +/-8 at 5V.
    pub async fn set_vertical_offset(&mut self, channel: Channel, divisions: f64) -> Result<()> {
        let channel = self.check_channel(channel)?;
        let divisions = Self::finite(divisions)?;
        self.write(Command::set(format!(":{}:OFFS", channel), divisions))
            .await
    }

    pub async fn coupling(&mut self, channel: Channel) -> Result<Coupling> {
        let channel = self.check_channel(channel)?;
        self.query_parsed(format!(":{}:COUP?", channel), Coupling::from_reply)
            .await
    }

    pub async fn set_coupling(&mut self, channel: Channel, coupling: Coupling) -> Result<()> {
        let channel = self.check_channel(channel)?;
        self.write(Command::set(format!(":{}:COUP", channel), coupling))
            .await
    }

    /// Query if the channel trace is displayed
    pub async fn channel_display(&mut self, channel: Channel) -> Result<bool> {
        let channel = self.check_channel(channel)?;
        self.query_switch(format!(":{}:DISP?", channel), "ON").await
    }

    pub async fn set_channel_display(&mut self, channel: Channel, state: bool) -> Result<()> {
        let channel = self.check_channel(channel)?;
        self.write(Command::set(format!(":{}:DISP", channel), on_off(state)))
            .await
    }

    /// Query 20MHz bandwidth limit
    pub async fn bandwidth_limit(&mut self, channel: Channel) -> Result<bool> {
        let channel = self.check_channel(channel)?;
        self.query_switch(format!(":{}:BAND?", channel), "20M").await
    }

    pub async fn set_bandwidth_limit(&mut self, channel: Channel, state: bool) -> Result<()> {
        let channel = self.check_channel(channel)?;
        let limit = if state { "20M" } else { "OFF" };
        self.write(Command::set(format!(":{}:BAND", channel), limit))
            .await
    }

    pub async fn memory_depth(&mut self) -> Result<MemoryDepth> {
        self.query_parsed(":ACQ:DEPMEM?".into(), MemoryDepth::from_reply)
            .await
    }

    pub async fn set_memory_depth(&mut self, depth: MemoryDepth) -> Result<()> {
        self.write(Command::set(":ACQ:DEPMEM", depth)).await
    }

    /// Query ADC precision
    pub async fn precision(&mut self) -> Result<Precision> {
        self.query_parsed(":ACQ:PREC?".into(), str::parse::<Precision>)
            .await
    }

    pub async fn set_precision(&mut self, precision: Precision) -> Result<()> {
        self.write(Command::set(":ACQ:PREC", precision)).await
    }

    pub async fn acquire_mode(&mut self) -> Result<AcquireMode> {
        self.query_parsed(":ACQ:MODE?".into(), AcquireMode::from_reply)
            .await
    }

    pub async fn set_acquire_mode(&mut self, mode: AcquireMode) -> Result<()> {
        self.write(Command::set(":ACQ:MODE", mode)).await
    }

    pub async fn trigger_status(&mut self) -> Result<TriggerStatus> {
        self.query_parsed(":TRIG:STATUS?".into(), TriggerStatus::from_reply)
            .await
    }

    /// Force an acquisition trigger
    pub async fn force_trigger(&mut self) -> Result<()> {
        self.send(":TRIG:FORC").await
    }

    /// Set the trigger level to the vertical mid-point
    pub async fn trigger_half(&mut self) -> Result<()> {
        self.send(":TRIG:HALF").await
    }

    /// Query edge trigger level, volts
    pub async fn trigger_level(&mut self) -> Result<f64> {
        self.query_number(":TRIGGER:SINGLE:EDGE:LEVEL?".into()).await
    }

    pub async fn set_trigger_level(&mut self, volts: f64) -> Result<()> {
        let volts = Self::finite(volts)?;
        self.write(Command::set(":TRIGGER:SINGLE:EDGE:LEVEL", volts))
            .await
    }

    pub async fn trigger_mode(&mut self) -> Result<TriggerMode> {
        self.query_parsed(":TRIG:SING:MODE?".into(), TriggerMode::from_reply)
            .await
    }

    pub async fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<()> {
        self.write(Command::set(":TRIG:SING:MODE", mode)).await
    }

    /// Query trigger holdoff, seconds
    pub async fn trigger_holdoff(&mut self) -> Result<f64> {
        self.query_number(":TRIG:SING:HOLD?".into()).await
    }

    /// Set trigger holdoff, seconds. Supported range is 100ns to 10s.
    pub async fn set_trigger_holdoff(&mut self, seconds: f64) -> Result<()> {
        let (min, max) = (
            self.profile.trigger_holdoff_min,
            self.profile.trigger_holdoff_max,
        );
        if !(min..=max).contains(&seconds) {
            return Err(DomainError::OutOfRange {
                what: "trigger holdoff",
                value: seconds,
                min,
                max,
            }
            .into());
        }
        self.write(Command::set(":TRIG:SING:HOLD", seconds)).await
    }

    pub async fn trigger_source(&mut self) -> Result<Channel> {
        self.query_parsed(":TRIG:SING:EDGE:SOUR?".into(), Channel::from_reply)
            .await
    }

    pub async fn set_trigger_source(&mut self, channel: Channel) -> Result<()> {
        let channel = self.check_channel(channel)?;
        self.write(Command::set(":TRIG:SING:EDGE:SOUR", channel))
            .await
    }

    pub async fn trigger_coupling(&mut self) -> Result<TriggerCoupling> {
        self.query_parsed(":TRIG:SING:EDGE:COUP?".into(), TriggerCoupling::from_reply)
            .await
    }

    pub async fn set_trigger_coupling(&mut self, coupling: TriggerCoupling) -> Result<()> {
        self.write(Command::set(":TRIG:SING:EDGE:COUP", coupling))
            .await
    }

    pub async fn trigger_slope(&mut self) -> Result<TriggerSlope> {
        self.query_parsed(":TRIG:SING:EDGE:SLOP?".into(), TriggerSlope::from_reply)
            .await
    }

    pub async fn set_trigger_slope(&mut self, slope: TriggerSlope) -> Result<()> {
        self.write(Command::set(":TRIG:SING:EDGE:SLOP", slope))
            .await
    }

    /// Start autoset. This takes a while, poll `autoset_progress`.
    pub async fn autoset(&mut self) -> Result<()> {
        self.send(":AUT").await
    }

    /// Autoset progress in percent
    pub async fn autoset_progress(&mut self) -> Result<u8> {
        self.query_percent(":AUT:PROG?".into()).await
    }

    /// Start self calibration
    pub async fn self_calibrate(&mut self) -> Result<()> {
        self.send(":CAL").await
    }

    /// Self calibration progress in percent
    pub async fn calibration_progress(&mut self) -> Result<u8> {
        self.query_percent(":CAL:PROG?".into()).await
    }

    pub async fn run(&mut self) -> Result<()> {
        self.send(":RUN").await
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.send(":STOP").await
    }

    /// Query the source channel of measurements
    pub async fn measurement_source(&mut self) -> Result<Channel> {
        self.query_parsed(":MEAS:SOUR?".into(), Channel::from_reply)
            .await
    }

    pub async fn set_measurement_source(&mut self, channel: Channel) -> Result<()> {
        let channel = self.check_channel(channel)?;
        self.write(Command::set(":MEAS:SOUR", channel)).await
    }

    pub async fn measurement_display(&mut self) -> Result<bool> {
        self.query_switch(":MEAS:DISP?".into(), "ON").await
    }

    pub async fn set_measurement_display(&mut self, state: bool) -> Result<()> {
        self.write(Command::set(":MEAS:DISP", on_off(state))).await
    }

    /// Query ADC overflow of the measurement source
    pub async fn measurement_overflow(&mut self) -> Result<bool> {
        self.query_switch(":MEAS:OVER?".into(), "TRUE").await
    }

    /// Query measurement gate time, seconds
    pub async fn measurement_gate_time(&mut self) -> Result<f64> {
        self.query_number(":MEAS:TIM?".into()).await
    }

    pub async fn set_measurement_gate_time(&mut self, seconds: f64) -> Result<()> {
        let min = self.profile.min_measurement_time;
        if !seconds.is_finite() || seconds < min {
            return Err(DomainError::OutOfRange {
                what: "measurement gate time",
                value: seconds,
                min,
                max: f64::MAX,
            }
            .into());
        }
        self.write(Command::set(":MEAS:TIM", seconds)).await
    }

    /// Run a hardware measurement on `channel` and return the raw reply.
    ///
    /// Selects the measurement source and enables the measurement display
    /// first.
    pub async fn measure(&mut self, channel: Channel, function: Measurement) -> Result<String> {
        self.set_measurement_source(channel).await?;
        self.set_measurement_display(true).await?;
        self.query(format!(":MEAS:{}?", function)).await
    }

    /// Like [`Self::measure`], parsed into a number in base units.
    pub async fn measure_value(&mut self, channel: Channel, function: Measurement) -> Result<f64> {
        let reply = self.measure(channel, function).await?;
        // Some firmware prefixes the reply with the function name.
        let value = reply.rsplit([':', '=']).next().unwrap_or(&reply);
        parse_quantity(value).ok_or_else(|| ProtoError::InvalidReply {
            command: format!(":MEAS:{}?", function),
            reply: reply.clone(),
        })
    }

    /// Capture the waveform of `channel`.
    ///
    /// The time axis uses the timebase reading as sample period.
    pub async fn capture(&mut self, channel: Channel) -> Result<Capture> {
        let channel = self.check_channel(channel)?;
        let sample_period = self.timebase().await?;
        let calibration = ChannelCalibration::new(
            self.scale(channel).await?,
            self.vertical_offset(channel).await?,
        )?;

        let (first, last) = self.profile.waveform_range;
        self.write(Command::set(":WAV:BEG", channel)).await?;
        self.write(Command::set(":WAV:RANG", format!("{},{}", first, last)))
            .await?;
        let fetched = self.query_binary(":WAV:FETC?").await;
        let ended = self.send(":WAV:END").await;
        let raw = fetched?;
        ended?;

        let samples = decode_calibrated(&raw, &calibration, sample_period)?;
        log::debug!("Captured {} samples from {}", samples.len(), channel);
        Ok(Capture {
            channel,
            captured_at: Local::now(),
            calibration,
            sample_period,
            raw,
            samples,
        })
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn written(log: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(log.lock().unwrap().clone()).unwrap()
    }

    #[tokio::test]
    async fn test_get_id() {
        let (mut device, log) = Device::new_faked("OWON VDS6104 2052100 V3.0.1\n");
        let ident = device.check_model().await.unwrap();
        assert_eq!(ident.serial, "2052100");
        assert_eq!(written(&log), "*IDN?\n");
    }

    #[tokio::test]
    async fn test_check_model_rejects_other_device() {
        let (mut device, _) = Device::new_faked("RIGOL DS1054Z 1234 00.04\n");
        assert!(matches!(
            device.check_model().await,
            Err(ProtoError::UnsupportedModel(_))
        ));
    }

    #[tokio::test]
    async fn test_set_timebase_snaps_and_renders() {
        let (mut device, log) = Device::new_faked("");
        assert_eq!(device.set_timebase(0.00023).await.unwrap(), 2e-4);
        assert_eq!(device.set_timebase(1.1).await.unwrap(), 1.0);
        assert_eq!(device.set_timebase(3e-9).await.unwrap(), 2e-9);
        assert_eq!(device.set_timebase(1e6).await.unwrap(), 100.0);
        assert_eq!(
            written(&log),
            ":HORI:SCAL 200us\n:HORI:SCAL 1.0s\n:HORI:SCAL 2.0ns\n:HORI:SCAL 100s\n"
        );
    }

    #[tokio::test]
    async fn test_get_timebase() {
        let (mut device, _) = Device::new_faked("500us\r\n");
        assert_eq!(device.timebase().await.unwrap(), 5e-4);
    }

    #[tokio::test]
    async fn test_set_scale() {
        let (mut device, log) = Device::new_faked("");
        assert_eq!(device.set_scale(Channel::Ch2, 0.25).await.unwrap(), 0.2);
        assert_eq!(device.set_scale(Channel::Ch1, 0.001).await.unwrap(), 0.002);
        assert_eq!(written(&log), ":CH2:SCAL 200mv\n:CH1:SCAL 2mv\n");
    }

    #[tokio::test]
    async fn test_channel_outside_profile() {
        let (device, log) = Device::new_faked("");
        let profile = ScopeProfile {
            channels: 2,
            ..ScopeProfile::default()
        };
        let mut device = device.with_profile(profile).unwrap();
        assert!(matches!(
            device.set_scale(Channel::Ch3, 1.0).await,
            Err(ProtoError::Domain(DomainError::InvalidChannel(3)))
        ));
        assert!(written(&log).is_empty());
    }

    #[tokio::test]
    async fn test_coupling_from_string() {
        let (mut device, log) = Device::new_faked("GND\n");
        let coupling: Coupling = "gnd".parse().unwrap();
        device.set_coupling(Channel::Ch2, coupling).await.unwrap();
        assert_eq!(device.coupling(Channel::Ch2).await.unwrap(), Coupling::Gnd);
        assert_eq!(written(&log), ":CH2:COUP GND\n:CH2:COUP?\n");
    }

    #[tokio::test]
    async fn test_trigger_mode_long_reply() {
        let (mut device, log) = Device::new_faked("VIDeo\n");
        assert_eq!(device.trigger_mode().await.unwrap(), TriggerMode::Video);
        device.set_trigger_mode(TriggerMode::Slope).await.unwrap();
        assert_eq!(written(&log), ":TRIG:SING:MODE?\n:TRIG:SING:MODE SLOP\n");
    }

    #[tokio::test]
    async fn test_trigger_holdoff_range() {
        let (mut device, log) = Device::new_faked("");
        assert!(matches!(
            device.set_trigger_holdoff(20.0).await,
            Err(ProtoError::Domain(DomainError::OutOfRange { .. }))
        ));
        assert!(written(&log).is_empty());
        device.set_trigger_holdoff(0.5).await.unwrap();
        assert_eq!(written(&log), ":TRIG:SING:HOLD 0.5\n");
    }

    #[tokio::test]
    async fn test_measure() {
        let (mut device, log) = Device::new_faked("1.25V\n");
        let value = device
            .measure_value(Channel::Ch1, Measurement::Vrms)
            .await
            .unwrap();
        assert_eq!(value, 1.25);
        assert_eq!(
            written(&log),
            ":MEAS:SOUR CH1\n:MEAS:DISP ON\n:MEAS:VRMS?\n"
        );
    }

    #[tokio::test]
    async fn test_invalid_reply() {
        let (mut device, _) = Device::new_faked("garbage\n");
        assert!(matches!(
            device.timebase().await,
            Err(ProtoError::InvalidReply { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_reply_aborts() {
        let (mut device, _) = Device::new_faked("");
        assert!(matches!(device.timebase().await, Err(ProtoError::Abort)));
    }

    fn duplex_device(timeout_ms: u64) -> (Device, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(256);
        let profile = ScopeProfile {
            reply_timeout_ms: timeout_ms,
            ..ScopeProfile::default()
        };
        let device = Device::from_transport(client)
            .unwrap()
            .with_profile(profile)
            .unwrap();
        (device, server)
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let (mut device, mut server) = duplex_device(50);
        assert!(matches!(
            device.timebase().await,
            Err(ProtoError::Timeout(t)) if t == Duration::from_millis(50)
        ));

        let mut sent = vec![0; 64];
        let n = server.read(&mut sent).await.unwrap();
        assert_eq!(&sent[..n], b":HORI:SCAL?\n");
    }

    #[tokio::test]
    async fn test_late_reply_after_timeout() {
        let (mut device, mut server) = duplex_device(50);
        assert!(matches!(
            device.timebase().await,
            Err(ProtoError::Timeout(_))
        ));

        // The timebase reply arrives late, followed by a scale reply.
        server.write_all(b"500us\n200mV\n").await.unwrap();
        assert!(matches!(
            device.scale(Channel::Ch1).await,
            Err(ProtoError::Abort)
        ));
        assert!(matches!(device.run().await, Err(ProtoError::Abort)));

        // Nothing after the timed out query reaches the instrument.
        let mut sent = vec![0; 64];
        let n = server.read(&mut sent).await.unwrap();
        assert_eq!(&sent[..n], b":HORI:SCAL?\n");
    }

    #[tokio::test]
    async fn test_capture() {
        let (mut device, log) =
            Device::new_faked(&b"1.0us\n200mV\n0.5\n#14\x00\x19\x00\x00\n"[..]);
        let capture = device.capture(Channel::Ch1).await.unwrap();
        assert_eq!(capture.raw, vec![6400, 0]);
        assert_eq!(capture.voltages().collect::<Vec<_>>(), vec![0.1, -0.1]);
        assert_eq!(capture.times().collect::<Vec<_>>(), vec![0.0, 1e-6]);
        assert_eq!(
            written(&log),
            ":HORI:SCAL?\n:CH1:SCAL?\n:CH1:OFFS?\n:WAV:BEG CH1\n:WAV:RANG 0,1000\n:WAV:FETC?\n:WAV:END\n"
        );
    }
}
