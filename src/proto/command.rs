use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::error::DomainError;

/// Declares a closed selector type together with its single token table.
///
/// Each variant maps to the wire token the instrument expects and a lowercase
/// name used on the command line. Both directions go through the table:
/// `token()` for commands, `from_reply()` and `FromStr` for input.
macro_rules! selector {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($kind:literal) {
            $( $(#[$vmeta:meta])* $variant:ident => ($token:literal, $value:literal), )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            const TABLE: &'static [(Self, &'static str, &'static str)] = &[
                $( (Self::$variant, $token, $value), )+
            ];

            pub const ALL: &'static [Self] = &[ $( Self::$variant, )+ ];

            fn entry(self) -> &'static (Self, &'static str, &'static str) {
                // Every variant has exactly one row.
                &Self::TABLE[self as usize]
            }

            /// Wire token
            pub fn token(self) -> &'static str {
                self.entry().1
            }

            /// Lowercase name
            pub fn name(self) -> &'static str {
                self.entry().2
            }

            /// Parse an instrument reply. Replies may use the long SCPI form
            /// (`VIDeo` for `VID`), so the longest token prefix wins.
            pub fn from_reply(reply: &str) -> Result<Self, DomainError> {
                let reply = reply.trim().to_ascii_uppercase();
                Self::TABLE
                    .iter()
                    .filter(|(_, token, _)| reply.starts_with(token))
                    .max_by_key(|(_, token, _)| token.len())
                    .map(|(variant, _, _)| *variant)
                    .ok_or_else(|| DomainError::UnsupportedSelector {
                        kind: $kind,
                        token: reply,
                    })
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                Self::TABLE
                    .iter()
                    .find(|(_, token, value)| {
                        s.eq_ignore_ascii_case(value) || s.eq_ignore_ascii_case(token)
                    })
                    .map(|(variant, _, _)| *variant)
                    .ok_or_else(|| DomainError::UnsupportedSelector {
                        kind: $kind,
                        token: s.to_string(),
                    })
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.token())
            }
        }

        impl clap::ValueEnum for $name {
            fn value_variants<'a>() -> &'a [Self] {
                Self::ALL
            }

            fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
                Some(clap::builder::PossibleValue::new(self.name()))
            }
        }
    };
}

selector! {
    /// Input channel
    pub enum Channel ("channel") {
        Ch1 => ("CH1", "1"),
        Ch2 => ("CH2", "2"),
        Ch3 => ("CH3", "3"),
        Ch4 => ("CH4", "4"),
    }
}

impl Channel {
    pub fn number(self) -> u8 {
        self as u8 + 1
    }
}

impl TryFrom<u8> for Channel {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Ch1),
            2 => Ok(Self::Ch2),
            3 => Ok(Self::Ch3),
            4 => Ok(Self::Ch4),
            n => Err(DomainError::InvalidChannel(n)),
        }
    }
}

selector! {
    /// Channel input coupling
    pub enum Coupling ("coupling") {
        Ac => ("AC", "ac"),
        Dc => ("DC", "dc"),
        Gnd => ("GND", "gnd"),
    }
}

selector! {
    /// Automatic measurement functions
    pub enum Measurement ("measurement") {
        /// Maximum, volts
        Vmax => ("VMAX", "vmax"),
        /// Minimum, volts
        Vmin => ("VMIN", "vmin"),
        /// Peak to peak, volts
        Vpp => ("VPP", "vpp"),
        /// Top value, volts
        Vtop => ("VTOP", "vtop"),
        /// Base value, volts
        Vbase => ("VBASE", "vbase"),
        /// Amplitude, volts
        Vamp => ("VAMP", "vamp"),
        /// Average, volts
        Vavg => ("VAVG", "vavg"),
        /// RMS, volts
        Vrms => ("VRMS", "vrms"),
        /// Cycle RMS, volts
        Crms => ("CRMS", "crms"),
        /// Overshoot, percent
        Overshoot => ("OVER", "overshoot"),
        /// Preshoot, percent
        Preshoot => ("PRES", "preshoot"),
        /// Positive duty cycle, percent
        PosDuty => ("PDUT", "pos-duty"),
        /// Negative duty cycle, percent
        NegDuty => ("NDUT", "neg-duty"),
        /// Cycle time, seconds
        Period => ("PER", "period"),
        /// Frequency, hertz
        Frequency => ("FREQ", "freq"),
        /// Rise time, seconds
        RiseTime => ("RTIM", "rise-time"),
        /// Fall time, seconds
        FallTime => ("FTIM", "fall-time"),
        /// Positive pulse width, seconds
        PosWidth => ("PWID", "pos-width"),
        /// Negative pulse width, seconds
        NegWidth => ("NWID", "neg-width"),
        /// Area, volt-seconds
        Area => ("AREA", "area"),
        /// Cycle area, volt-seconds
        CycleArea => ("CAR", "cycle-area"),
        /// Positive pulse count
        PosPulses => ("PPUL", "pos-pulses"),
        /// Negative pulse count
        NegPulses => ("NPUL", "neg-pulses"),
        /// Rising edge count
        RiseEdges => ("REDG", "rise-edges"),
        /// Falling edge count
        FallEdges => ("FEDG", "fall-edges"),
    }
}

selector! {
    pub enum AcquireMode ("acquisition mode") {
        Sample => ("SAMP", "sample"),
        Peak => ("PEAK", "peak"),
    }
}

selector! {
    pub enum MemoryDepth ("memory depth") {
        Depth1K => ("1K", "1k"),
        Depth10K => ("10K", "10k"),
        Depth100K => ("100K", "100k"),
        Depth1M => ("1M", "1m"),
        Depth10M => ("10M", "10m"),
        Depth25M => ("25M", "25m"),
        Depth50M => ("50M", "50m"),
        Depth100M => ("100M", "100m"),
        Depth250M => ("250M", "250m"),
    }
}

selector! {
    pub enum TriggerMode ("trigger mode") {
        Edge => ("EDGE", "edge"),
        Video => ("VID", "video"),
        Pulse => ("PULS", "pulse"),
        Slope => ("SLOP", "slope"),
    }
}

selector! {
    pub enum TriggerCoupling ("trigger coupling") {
        Ac => ("AC", "ac"),
        Dc => ("DC", "dc"),
        Hf => ("HF", "hf"),
    }
}

selector! {
    pub enum TriggerSlope ("trigger slope") {
        Rise => ("RISE", "rise"),
        Fall => ("FALL", "fall"),
    }
}

selector! {
    pub enum TriggerStatus ("trigger status") {
        Auto => ("AUTO", "auto"),
        Stop => ("STOP", "stop"),
        Scan => ("SCAN", "scan"),
        Triggered => ("TRIG", "trig"),
    }
}

/// ADC resolution. The VDS6104 only supports 8 bit, the 6104P also 12 and 14.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum Precision {
    Bits8 = 8,
    Bits12 = 12,
    Bits14 = 14,
}

impl Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}", u8::from(*self)))
    }
}

impl FromStr for Precision {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || DomainError::UnsupportedSelector {
            kind: "precision",
            token: s.to_string(),
        };
        let bits: u8 = s.trim().parse().map_err(|_| unsupported())?;
        Self::try_from(bits).map_err(|_| unsupported())
    }
}

impl clap::ValueEnum for Precision {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Bits8, Self::Bits12, Self::Bits14]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Bits8 => clap::builder::PossibleValue::new("8"),
            Self::Bits12 => clap::builder::PossibleValue::new("12"),
            Self::Bits14 => clap::builder::PossibleValue::new("14"),
        })
    }
}

/// `ON`/`OFF` argument of display switches.
pub fn on_off(state: bool) -> &'static str {
    if state {
        "ON"
    } else {
        "OFF"
    }
}

/// A single line of the instrument protocol, tagged with the reply it expects.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// No reply
    Write(String),
    /// One text line as reply
    Query(String),
    /// A definite length binary block as reply
    QueryBlock(String),
}

impl Command {
    /// `<header> <argument>`
    pub fn set(header: impl Display, argument: impl Display) -> Self {
        Self::Write(format!("{} {}", header, argument))
    }

    /// `<header>?`
    pub fn query(header: impl Display) -> Self {
        Self::Query(format!("{}?", header))
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Write(text) | Self::Query(text) | Self::QueryBlock(text) => text,
        }
    }

    pub fn expects_reply(&self) -> bool {
        !matches!(self, Self::Write(_))
    }
}
