//! Connection parameters and device identity.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    /// 5 data bits
    Five,
    /// 6 data bits
    Six,
    /// 7 data bits
    Seven,
    /// 8 data bits
    #[default]
    Eight,
}

impl DataBits {
    /// Numeric value.
    pub fn value(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            other => Err(format!("data bits must be 5-8, got {other}")),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        bits.value()
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    /// One stop bit
    #[default]
    One,
    /// Two stop bits
    Two,
}

impl StopBits {
    /// Numeric value.
    pub fn value(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(format!("stop bits must be 1 or 2, got {other}")),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        bits.value()
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

impl Parity {
    /// Single-letter label used in `8N1` style shorthands.
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "N",
            Self::Even => "E",
            Self::Odd => "O",
        }
    }
}

/// Line settings used to open a port.
///
/// Supplied at connect time and reused verbatim when the session reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Baud rate in bits per second
    pub baud_rate: u32,
    /// Data bits per character
    #[serde(default)]
    pub data_bits: DataBits,
    /// Stop bits
    #[serde(default)]
    pub stop_bits: StopBits,
    /// Parity mode
    #[serde(default)]
    pub parity: Parity,
}

impl ConnectionConfig {
    /// Create an 8N1 configuration at the given baud rate.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::InvalidInput("baud rate must be > 0".to_string()));
        }
        Ok(())
    }

    /// Compact notation such as `115200 8N1`.
    pub fn shorthand(&self) -> String {
        format!(
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits.value(),
            self.parity.label(),
            self.stop_bits.value()
        )
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(115_200)
    }
}

/// Stable fingerprint of a physical device (USB vendor and product id).
///
/// Used only to recognise the same device when it comes back after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct DeviceIdentity {
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
}

impl DeviceIdentity {
    /// Create a new identity.
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// How received bytes are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DisplayFormat {
    /// Decode as UTF-8 and split into lines
    #[default]
    Text,
    /// Hex dump each chunk as it arrives
    Binary,
}

/// Which wire sequence ends an inbound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NewlinePolicy {
    /// `\n` only
    Lf,
    /// `\r` only
    Cr,
    /// The `\r\n` pair only
    CrLf,
    /// Any of `\r\n`, `\r` or `\n`
    #[default]
    Any,
}

/// Terminator appended to outbound text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LineTerminator {
    /// Send text as-is
    None,
    /// Append `\n`
    #[default]
    Lf,
    /// Append `\r`
    Cr,
    /// Append `\r\n`
    CrLf,
}

impl LineTerminator {
    /// Bytes appended after the payload.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::None => b"",
            Self::Lf => b"\n",
            Self::Cr => b"\r",
            Self::CrLf => b"\r\n",
        }
    }

    /// Encode `text` followed by the terminator.
    pub fn apply(self, text: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(text.len() + 2);
        bytes.extend_from_slice(text.as_bytes());
        bytes.extend_from_slice(self.as_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_8n1() {
        let config = ConnectionConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.shorthand(), "115200 8N1");
    }

    #[test]
    fn test_shorthand_variants() {
        let config = ConnectionConfig {
            baud_rate: 9600,
            data_bits: DataBits::Seven,
            stop_bits: StopBits::Two,
            parity: Parity::Even,
        };
        assert_eq!(config.shorthand(), "9600 7E2");
    }

    #[test]
    fn test_zero_baud_rejected() {
        let config = ConnectionConfig::new(0);
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_data_bits_serde_numeric() {
        let json = serde_json::to_string(&DataBits::Seven).unwrap();
        assert_eq!(json, "7");
        let bits: DataBits = serde_json::from_str("5").unwrap();
        assert_eq!(bits, DataBits::Five);
        assert!(serde_json::from_str::<DataBits>("9").is_err());
    }

    #[test]
    fn test_stop_bits_serde_numeric() {
        let bits: StopBits = serde_json::from_str("2").unwrap();
        assert_eq!(bits, StopBits::Two);
        assert!(serde_json::from_str::<StopBits>("3").is_err());
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: ConnectionConfig = serde_json::from_str(r#"{"baud_rate": 9600}"#).unwrap();
        assert_eq!(config, ConnectionConfig::new(9600));

        let config: ConnectionConfig =
            serde_json::from_str(r#"{"baud_rate": 9600, "parity": "odd"}"#).unwrap();
        assert_eq!(config.parity, Parity::Odd);
    }

    #[test]
    fn test_identity_display() {
        let identity = DeviceIdentity::new(0x2341, 0x43);
        assert_eq!(identity.to_string(), "2341:0043");
    }

    #[test]
    fn test_line_terminator_apply() {
        assert_eq!(LineTerminator::None.apply("at"), b"at");
        assert_eq!(LineTerminator::Lf.apply("at"), b"at\n");
        assert_eq!(LineTerminator::Cr.apply("at"), b"at\r");
        assert_eq!(LineTerminator::CrLf.apply("at"), b"at\r\n");
    }
}
