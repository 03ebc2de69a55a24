use bytes::Bytes;
use serde::Serialize;
use std::fmt::{self, Display};

use super::ProtoError;

/// A decoded reply. Text replies are one line with the line terminator
/// removed; waveform replies are the payload of a definite length block.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Line(String),
    Block(Bytes),
}

/// Reply to `*IDN?`, e.g. `OWON VDS6104 2052100 V1.2.3`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ident {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

impl Ident {
    pub fn is_model(&self, model: &str) -> bool {
        self.manufacturer.eq_ignore_ascii_case("OWON") && self.model.starts_with(model)
    }
}

impl TryFrom<&str> for Ident {
    type Error = ProtoError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim();
        let values: Vec<&str> = if value.contains(',') {
            value.split(',').map(str::trim).collect()
        } else {
            value.split_whitespace().collect()
        };
        if values.len() == 4 {
            Ok(Self {
                manufacturer: String::from(values[0]),
                model: String::from(values[1]),
                serial: String::from(values[2]),
                firmware: String::from(values[3]),
            })
        } else {
            Err(ProtoError::InvalidReply {
                command: String::from("*IDN?"),
                reply: value.to_string(),
            })
        }
    }
}

impl Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "Manufacturer:{} Model:{} S/N:{} Version:{}",
            self.manufacturer, self.model, self.serial, self.firmware
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_space_separated() {
        let id = Ident::try_from("OWON VDS6104 2052100 V3.0.1\n").unwrap();
        assert_eq!(id.model, "VDS6104");
        assert_eq!(id.serial, "2052100");
        assert!(id.is_model("VDS6104"));
        assert_eq!(
            id.to_string(),
            "Manufacturer:OWON Model:VDS6104 S/N:2052100 Version:V3.0.1"
        );
    }

    #[test]
    fn test_ident_comma_separated() {
        let id = Ident::try_from("OWON,VDS6104P,1234,V1.0").unwrap();
        assert_eq!(id.firmware, "V1.0");
        assert!(id.is_model("VDS6104"));
        assert!(!id.is_model("SDS1202X"));
    }

    #[test]
    fn test_ident_invalid() {
        assert!(matches!(
            Ident::try_from("OWON VDS6104"),
            Err(ProtoError::InvalidReply { .. })
        ));
    }
}
