#![deny(clippy::unwrap_used)]

use clap::builder::BoolishValueParser;
use clap::{arg, command, value_parser, ArgMatches};
use log::LevelFilter;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;
use vds6104ctrl::device::Device;
use vds6104ctrl::proto::command::{
    AcquireMode, Channel, Coupling, Measurement, MemoryDepth, Precision, TriggerCoupling,
    TriggerMode, TriggerSlope,
};
use vds6104ctrl::proto::conv::parse_quantity;
use vds6104ctrl::proto::{self, Result};
use vds6104ctrl::render::Renderer;
use vds6104ctrl::waveform::Capture;
use vds6104ctrl::{ScopeProfile, DEFAULT_BAUDRATE, DEFAULT_PORT, DEFAULT_TTY};

#[derive(Debug, Copy, Clone)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
            Self::Csv => f.write_str("csv"),
        }
    }
}

impl clap::ValueEnum for OutputFormat {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Text, Self::Json, Self::Csv]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Text => clap::builder::PossibleValue::new("text"),
            Self::Json => clap::builder::PossibleValue::new("json"),
            Self::Csv => clap::builder::PossibleValue::new("csv"),
        })
    }
}

/// Accepts plain numbers and SI prefixed values like `200us` or `5mV`.
fn quantity(s: &str) -> std::result::Result<f64, String> {
    parse_quantity(s)
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("Invalid value: {}", s))
}

fn channel_arg() -> clap::Arg {
    arg!(<channel> "Channel number").value_parser(value_parser!(Channel))
}

fn channel(args: &ArgMatches) -> Channel {
    *args
        .get_one::<Channel>("channel")
        .expect("Requires channel argument")
}

fn cli() -> clap::Command {
    command!() // requires `cargo` feature
        .arg(
            arg!(
                -p --device <PORT> "Serial port of the USB interface"
            )
            .default_value(DEFAULT_TTY)
            .required(false)
            .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(
                -b --baudrate <BAUDRATE> "Baudrate"
            )
            .default_value(DEFAULT_BAUDRATE.to_string())
            .value_parser(value_parser!(u32)),
        )
        .arg(arg!(--host <HOST> "Connect over LAN instead of USB"))
        .arg(
            arg!(--port <PORT> "SCPI port of the LAN interface")
                .default_value(DEFAULT_PORT.to_string())
                .value_parser(value_parser!(u16)),
        )
        .arg(
            arg!(--profile <PATH> "Model profile (JSON)").value_parser(value_parser!(PathBuf)),
        )
        .arg(arg!(
            -d --debug ... "Turn debugging information on"
        ))
        .subcommand(clap::Command::new("ident").about("Device identification"))
        .subcommand(
            clap::Command::new("timebase")
                .about("Horizontal timebase in s/div")
                .arg(arg!([seconds] "Set timebase, e.g. 200us").value_parser(quantity)),
        )
        .subcommand(
            clap::Command::new("scale")
                .about("Vertical scale in V/div")
                .arg(channel_arg())
                .arg(arg!([volts] "Set scale, e.g. 500mV").value_parser(quantity)),
        )
        .subcommand(
            clap::Command::new("offset")
                .about("Vertical offset in divisions")
                .arg(channel_arg())
                .arg(
                    arg!([divisions] "Set offset")
                        .allow_negative_numbers(true)
                        .value_parser(value_parser!(f64)),
                ),
        )
        .subcommand(
            clap::Command::new("coupling")
                .about("Input coupling")
                .arg(channel_arg())
                .arg(arg!([mode] "Set coupling").value_parser(value_parser!(Coupling))),
        )
        .subcommand(
            clap::Command::new("display")
                .about("Channel trace display")
                .arg(channel_arg())
                .arg(arg!([state] "Show or hide").value_parser(BoolishValueParser::new())),
        )
        .subcommand(
            clap::Command::new("bandwidth-limit")
                .about("20MHz bandwidth limit")
                .arg(channel_arg())
                .arg(arg!([state] "Set limit").value_parser(BoolishValueParser::new())),
        )
        .subcommand(
            clap::Command::new("trigger")
                .about("Trigger settings")
                .subcommand_required(true)
                .subcommand(
                    clap::Command::new("mode")
                        .about("Trigger type")
                        .arg(arg!([mode] "Set type").value_parser(value_parser!(TriggerMode))),
                )
                .subcommand(
                    clap::Command::new("source")
                        .about("Edge trigger source")
                        .arg(arg!([channel] "Set source").value_parser(value_parser!(Channel))),
                )
                .subcommand(
                    clap::Command::new("coupling").about("Edge trigger coupling").arg(
                        arg!([coupling] "Set coupling").value_parser(value_parser!(TriggerCoupling)),
                    ),
                )
                .subcommand(
                    clap::Command::new("slope")
                        .about("Edge trigger slope")
                        .arg(arg!([slope] "Set slope").value_parser(value_parser!(TriggerSlope))),
                )
                .subcommand(
                    clap::Command::new("level").about("Edge trigger level in V").arg(
                        arg!([volts] "Set level")
                            .allow_negative_numbers(true)
                            .value_parser(quantity),
                    ),
                )
                .subcommand(
                    clap::Command::new("holdoff")
                        .about("Trigger holdoff in s")
                        .arg(arg!([seconds] "Set holdoff, e.g. 100ns").value_parser(quantity)),
                )
                .subcommand(clap::Command::new("status").about("Trigger status"))
                .subcommand(clap::Command::new("force").about("Force a trigger"))
                .subcommand(clap::Command::new("half").about("Trigger level to 50%")),
        )
        .subcommand(
            clap::Command::new("depth")
                .about("Acquisition memory depth")
                .arg(arg!([depth] "Set depth").value_parser(value_parser!(MemoryDepth))),
        )
        .subcommand(
            clap::Command::new("precision")
                .about("ADC precision in bits")
                .arg(arg!([bits] "Set precision").value_parser(value_parser!(Precision))),
        )
        .subcommand(
            clap::Command::new("acquire")
                .about("Acquisition mode")
                .arg(arg!([mode] "Set mode").value_parser(value_parser!(AcquireMode))),
        )
        .subcommand(clap::Command::new("run").about("Start acquisition"))
        .subcommand(clap::Command::new("stop").about("Stop acquisition"))
        .subcommand(
            clap::Command::new("autoset")
                .about("Autoset")
                .arg(arg!(--"wait" "Wait until autoset is done")),
        )
        .subcommand(
            clap::Command::new("calibrate")
                .about("Self calibration, disconnect all probes first")
                .arg(arg!(--"wait" "Wait until calibration is done")),
        )
        .subcommand(
            clap::Command::new("measure")
                .about("Hardware measurement")
                .arg(channel_arg())
                .arg(arg!(<kind> "Measurement function").value_parser(value_parser!(Measurement)))
                .arg(arg!(
                    --"loop" "Poll measurement forever"
                )),
        )
        .subcommand(
            clap::Command::new("capture")
                .about("Capture waveform")
                .arg(channel_arg())
                .arg(
                    arg!(output: --"output" <PATH> "Output path")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    arg!(format: --"format" <fmt> "Output format")
                        .value_parser(value_parser!(OutputFormat)),
                ),
        )
        .subcommand_required(true)
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let level = match matches.get_count("debug") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if let Err(e) = handle_args(&matches).await {
        let target = target(&matches);
        match e {
            proto::ProtoError::Serial(err) => {
                if err.kind() == tokio_serial::ErrorKind::NoDevice
                    || matches!(err.kind(), tokio_serial::ErrorKind::Io(ErrorKind::NotFound))
                {
                    eprintln!("{}: File not found", target);
                } else {
                    eprintln!("I/O Error: {} [device: {}]", err, target);
                }
                exit(-1);
            }
            proto::ProtoError::Io(err) => {
                if err.kind() == ErrorKind::NotFound {
                    eprintln!("{}: File not found", target);
                } else {
                    eprintln!("I/O Error: {} [device: {}]", err, target);
                }
                exit(-1);
            }
            proto::ProtoError::Timeout(timeout) => {
                eprintln!("No reply from device within {:?}, aborting!", timeout);
                exit(-1);
            }
            proto::ProtoError::Abort => {
                eprintln!("Failed to communicate with device, aborting!");
                exit(-1);
            }
            proto::ProtoError::UnsupportedModel(ident) => {
                eprintln!("Connected device is not supported: {}", ident);
                exit(-1);
            }
            err @ (proto::ProtoError::Unexpected(_) | proto::ProtoError::InvalidReply { .. }) => {
                eprintln!(
                    "Received an unexpected response from device, aborting!: {}",
                    err
                );
                exit(-1);
            }
            proto::ProtoError::Domain(err) => {
                eprintln!("Invalid argument: {}", err);
                exit(-2);
            }
        }
    }
}

fn target(matches: &ArgMatches) -> String {
    match matches.get_one::<String>("host") {
        Some(host) => host.clone(),
        None => matches
            .get_one::<PathBuf>("device")
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| DEFAULT_TTY.to_string()),
    }
}

async fn open(matches: &ArgMatches) -> Result<Device> {
    let device = if let Some(host) = matches.get_one::<String>("host") {
        let port = matches.get_one::<u16>("port").unwrap_or(&DEFAULT_PORT);
        Device::connect(host, *port).await?
    } else {
        let baud_rate = matches
            .get_one::<u32>("baudrate")
            .unwrap_or(&DEFAULT_BAUDRATE);
        let port_path = matches
            .get_one::<PathBuf>("device")
            .cloned()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TTY));
        Device::new(port_path.to_string_lossy(), *baud_rate)?
    };

    match matches.get_one::<PathBuf>("profile") {
        Some(path) => {
            let profile = ScopeProfile::from_json(File::open(path)?).map_err(io::Error::from)?;
            device.with_profile(profile)
        }
        None => Ok(device),
    }
}

async fn wait_for_progress(device: &mut Device, calibration: bool) -> Result<()> {
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let progress = if calibration {
            device.calibration_progress().await?
        } else {
            device.autoset_progress().await?
        };
        eprint!("\r{:>3}%", progress);
        if progress >= 100 {
            eprintln!();
            return Ok(());
        }
    }
}

fn write_capture(capture: &Capture, format: OutputFormat, output: impl Write) -> io::Result<()> {
    let mut output = output;
    match format {
        OutputFormat::Text => {
            output.write_fmt(format_args!("{}", capture))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut output, capture)?;
            output.write_fmt(format_args!("\n"))?;
        }
        OutputFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(output);
            for sample in &capture.samples {
                wtr.serialize(sample)?;
            }
            wtr.flush()?;
        }
    }
    Ok(())
}

async fn handle_args(matches: &ArgMatches) -> Result<()> {
    let mut device = open(matches).await?;
    let ident = device.check_model().await?;
    log::info!("Connected to: {} ({})", ident.model, target(matches));

    let time = device.profile().time_renderer();
    let volt = Renderer::default();

    match matches.subcommand() {
        Some(("ident", _args)) => {
            println!("Model: {}", ident.model);
            println!("Firmware: {}", ident.firmware);
            println!("Serial: {}", ident.serial);
        }
        Some(("timebase", args)) => {
            if let Some(seconds) = args.get_one::<f64>("seconds") {
                let applied = device.set_timebase(*seconds).await?;
                println!("Timebase: {}/div", time.render(applied, "s")?);
            } else {
                let timebase = device.timebase().await?;
                println!("Timebase: {}/div", time.render(timebase, "s")?);
            }
        }
        Some(("scale", args)) => {
            let channel = channel(args);
            if let Some(volts) = args.get_one::<f64>("volts") {
                let applied = device.set_scale(channel, *volts).await?;
                println!("{} scale: {}/div", channel, volt.render(applied, "V")?);
            } else {
                let scale = device.scale(channel).await?;
                println!("{} scale: {}/div", channel, volt.render(scale, "V")?);
            }
        }
        Some(("offset", args)) => {
            let channel = channel(args);
            if let Some(divisions) = args.get_one::<f64>("divisions") {
                device.set_vertical_offset(channel, *divisions).await?;
                println!("OK");
            } else {
                let offset = device.vertical_offset(channel).await?;
                println!("{} offset: {} div", channel, offset);
            }
        }
        Some(("coupling", args)) => {
            let channel = channel(args);
            if let Some(mode) = args.get_one::<Coupling>("mode") {
                device.set_coupling(channel, *mode).await?;
                println!("OK");
            } else {
                let coupling = device.coupling(channel).await?;
                println!("{} coupling: {}", channel, coupling);
            }
        }
        Some(("display", args)) => {
            let channel = channel(args);
            if let Some(state) = args.get_one::<bool>("state") {
                device.set_channel_display(channel, *state).await?;
                println!("OK");
            } else {
                let state = device.channel_display(channel).await?;
                println!("{} display: {}", channel, state);
            }
        }
        Some(("bandwidth-limit", args)) => {
            let channel = channel(args);
            if let Some(state) = args.get_one::<bool>("state") {
                device.set_bandwidth_limit(channel, *state).await?;
                println!("OK");
            } else {
                let state = device.bandwidth_limit(channel).await?;
                println!("{} bandwidth limit: {}", channel, state);
            }
        }
        Some(("trigger", args)) => handle_trigger(&mut device, args, &volt, &time).await?,
        Some(("depth", args)) => {
            if let Some(depth) = args.get_one::<MemoryDepth>("depth") {
                device.set_memory_depth(*depth).await?;
                println!("OK");
            } else {
                println!("Memory depth: {}", device.memory_depth().await?);
            }
        }
        Some(("precision", args)) => {
            if let Some(bits) = args.get_one::<Precision>("bits") {
                device.set_precision(*bits).await?;
                println!("OK");
            } else {
                println!("Precision: {} bit", device.precision().await?);
            }
        }
        Some(("acquire", args)) => {
            if let Some(mode) = args.get_one::<AcquireMode>("mode") {
                device.set_acquire_mode(*mode).await?;
                println!("OK");
            } else {
                println!("Acquisition mode: {}", device.acquire_mode().await?.name());
            }
        }
        Some(("run", _)) => {
            device.run().await?;
            println!("OK");
        }
        Some(("stop", _)) => {
            device.stop().await?;
            println!("OK");
        }
        Some(("autoset", args)) => {
            device.autoset().await?;
            if args.get_flag("wait") {
                wait_for_progress(&mut device, false).await?;
            }
            println!("OK");
        }
        Some(("calibrate", args)) => {
            device.self_calibrate().await?;
            if args.get_flag("wait") {
                wait_for_progress(&mut device, true).await?;
            }
            println!("OK");
        }
        Some(("measure", args)) => {
            let channel = channel(args);
            let kind = *args
                .get_one::<Measurement>("kind")
                .expect("Requires kind argument");
            let endless_loop = args.get_flag("loop");
            let mut c = 1;
            loop {
                match device.measure(channel, kind).await {
                    Ok(reply) => println!("#{:0>4} {} {}: {}", c, channel, kind.name(), reply),
                    Err(err) if endless_loop => eprintln!("Error: {}", err),
                    Err(err) => return Err(err),
                }
                if !endless_loop {
                    break;
                }
                if device.measurement_overflow().await? {
                    eprintln!("Warning: ADC overflow on {}", channel);
                }
                tokio::time::sleep(Duration::from_millis(1000)).await;
                c += 1;
            }
        }
        Some(("capture", args)) => {
            let channel = channel(args);
            let capture = device.capture(channel).await?;

            let format = args
                .get_one::<OutputFormat>("format")
                .unwrap_or(&OutputFormat::Text);

            let output = if let Some(fpath) = args.get_one::<PathBuf>("output") {
                BufWriter::new(Box::from(File::create(fpath)?) as Box<dyn Write>)
            } else {
                BufWriter::new(Box::from(std::io::stdout().lock()) as Box<dyn Write>)
            };
            write_capture(&capture, *format, output)?;
        }
        _ => {
            return Err(std::io::Error::new(
                ErrorKind::Unsupported,
                "Unsupported command line argument",
            )
            .into());
        }
    }

    Ok(())
}

async fn handle_trigger(
    device: &mut Device,
    matches: &ArgMatches,
    volt: &Renderer,
    time: &Renderer,
) -> Result<()> {
    match matches.subcommand() {
        Some(("mode", args)) => {
            if let Some(mode) = args.get_one::<TriggerMode>("mode") {
                device.set_trigger_mode(*mode).await?;
                println!("OK");
            } else {
                println!("Trigger mode: {}", device.trigger_mode().await?.name());
            }
        }
        Some(("source", args)) => {
            if let Some(channel) = args.get_one::<Channel>("channel") {
                device.set_trigger_source(*channel).await?;
                println!("OK");
            } else {
                println!("Trigger source: {}", device.trigger_source().await?);
            }
        }
        Some(("coupling", args)) => {
            if let Some(coupling) = args.get_one::<TriggerCoupling>("coupling") {
                device.set_trigger_coupling(*coupling).await?;
                println!("OK");
            } else {
                println!("Trigger coupling: {}", device.trigger_coupling().await?);
            }
        }
        Some(("slope", args)) => {
            if let Some(slope) = args.get_one::<TriggerSlope>("slope") {
                device.set_trigger_slope(*slope).await?;
                println!("OK");
            } else {
                println!("Trigger slope: {}", device.trigger_slope().await?.name());
            }
        }
        Some(("level", args)) => {
            if let Some(volts) = args.get_one::<f64>("volts") {
                device.set_trigger_level(*volts).await?;
                println!("OK");
            } else {
                let level = device.trigger_level().await?;
                println!("Trigger level: {}", volt.render(level, "V")?);
            }
        }
        Some(("holdoff", args)) => {
            if let Some(seconds) = args.get_one::<f64>("seconds") {
                device.set_trigger_holdoff(*seconds).await?;
                println!("OK");
            } else {
                let holdoff = device.trigger_holdoff().await?;
                println!("Trigger holdoff: {}", time.render(holdoff, "s")?);
            }
        }
        Some(("status", _)) => {
            println!("Trigger status: {}", device.trigger_status().await?.name());
        }
        Some(("force", _)) => {
            device.force_trigger().await?;
            println!("OK");
        }
        Some(("half", _)) => {
            device.trigger_half().await?;
            println!("OK");
        }
        _ => {
            return Err(std::io::Error::new(
                ErrorKind::Unsupported,
                "Unsupported trigger argument",
            )
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        cli().debug_assert();
    }

    #[test]
    fn test_quantity_arguments() {
        let matches = cli()
            .try_get_matches_from(["vds6104cmd", "timebase", "200us"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(args.get_one::<f64>("seconds"), Some(&2e-4));

        let matches = cli()
            .try_get_matches_from(["vds6104cmd", "scale", "2", "500mV"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(args.get_one::<Channel>("channel"), Some(&Channel::Ch2));
        assert_eq!(args.get_one::<f64>("volts"), Some(&0.5));

        assert!(cli()
            .try_get_matches_from(["vds6104cmd", "timebase", "fast"])
            .is_err());
    }

    #[test]
    fn test_capture_csv() {
        let capture = Capture {
            channel: Channel::Ch1,
            captured_at: chrono::Local::now(),
            calibration: vds6104ctrl::waveform::ChannelCalibration::new(0.2, 0.5).unwrap(),
            sample_period: 0.5,
            raw: vec![6400, 0],
            samples: vds6104ctrl::decode(&[6400, 0], 0.2, 0.5, 0.5).unwrap(),
        };
        let mut out = Vec::new();
        write_capture(&capture, OutputFormat::Csv, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "time,voltage\n0.0,0.1\n0.5,-0.1\n"
        );
    }
}
