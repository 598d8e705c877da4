//! Data model shared by requests, responses and notifications

use std::fmt;

use serde::{Serialize, Serializer};

use crate::request::keys;
use crate::value::{Value, ValueError};

// ==================== Hex ====================

/// Invalid character in a hex string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hex digit {digit:?} at offset {offset}")]
pub struct HexError {
    pub digit: char,
    pub offset: usize,
}

/// Decode a hex string two characters per byte, high nibble first
///
/// A trailing unpaired character is dropped.
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, HexError> {
    let chars: Vec<char> = hex.chars().collect();
    chars
        .chunks_exact(2)
        .enumerate()
        .map(|(i, pair)| {
            let high = nibble(pair[0], i * 2)?;
            let low = nibble(pair[1], i * 2 + 1)?;
            Ok((high << 4) | low)
        })
        .collect()
}

fn nibble(digit: char, offset: usize) -> Result<u8, HexError> {
    digit
        .to_digit(16)
        .map(|d| d as u8)
        .ok_or(HexError { digit, offset })
}

/// Encode bytes as an uppercase hex string
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes_to_hex_separated(bytes, "")
}

/// Uppercase hex with `separator` between bytes, e.g. `AB-CD`
pub fn bytes_to_hex_separated(bytes: &[u8], separator: &str) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(separator)
}

// ==================== Device ====================

/// A device attached through usbmuxd
///
/// Devices compare and hash by `id`, which is only meaningful within one
/// daemon session.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    id: u32,
    product_id: u16,
    #[serde(serialize_with = "serialize_hex")]
    serial_number: Vec<u8>,
    location: u32,
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&bytes_to_hex(bytes))
}

impl Device {
    pub fn new(id: u32, product_id: u16, serial_number: Vec<u8>, location: u32) -> Self {
        Self {
            id,
            product_id,
            serial_number,
            location,
        }
    }

    /// Parse a device record: `DeviceID` plus the `Properties` dictionary
    ///
    /// Used for both `ListDevices` entries and `Attached` notifications.
    pub fn from_record(record: &Value) -> Result<Self, ValueError> {
        let id = record.uint_field::<u32>(keys::DEVICE_ID)?;
        let properties = record.field(keys::PROPERTIES)?;

        let serial = properties.string_field(keys::SERIAL_NUMBER)?;
        let serial_number = hex_to_bytes(serial).map_err(|source| ValueError::InvalidHex {
            key: keys::SERIAL_NUMBER.to_string(),
            source,
        })?;

        Ok(Self {
            id,
            product_id: properties.uint_field(keys::PRODUCT_ID)?,
            serial_number,
            location: properties.uint_field(keys::LOCATION_ID)?,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn serial_number(&self) -> &[u8] {
        &self.serial_number
    }

    pub fn location(&self) -> u32 {
        self.location
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Device {}

impl std::hash::Hash for Device {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ DeviceID: {}, ProductID: {}, SerialNumber: {}, Location: {} }}",
            self.id,
            self.product_id,
            bytes_to_hex_separated(&self.serial_number, "-"),
            self.location
        )
    }
}

/// `Properties.ConnectionType` of a device record
pub fn connection_type(record: &Value) -> Result<&str, ValueError> {
    record
        .field(keys::PROPERTIES)?
        .string_field(keys::CONNECTION_TYPE)
}

// ==================== Result Codes ====================

/// Result code returned in the `Number` field of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    BadCommand,
    BadDevice,
    ConnectionRefused,
    BadVersion,
    /// Structurally valid but not a code this client knows
    Unrecognized(i64),
}

impl ResultCode {
    /// Read the `Number` field of a response payload
    pub fn from_response(response: &Value) -> Result<Self, ValueError> {
        Ok(Self::from(response.integer_field(keys::NUMBER)?))
    }

    pub fn code(self) -> i64 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::BadCommand => 1,
            ResultCode::BadDevice => 2,
            ResultCode::ConnectionRefused => 3,
            ResultCode::BadVersion => 6,
            ResultCode::Unrecognized(code) => code,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }
}

impl From<i64> for ResultCode {
    fn from(code: i64) -> Self {
        match code {
            0 => ResultCode::Ok,
            1 => ResultCode::BadCommand,
            2 => ResultCode::BadDevice,
            3 => ResultCode::ConnectionRefused,
            6 => ResultCode::BadVersion,
            other => ResultCode::Unrecognized(other),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Unrecognized(code) => write!(f, "Unrecognized ({})", code),
            known => write!(f, "{:?} ({})", known, known.code()),
        }
    }
}

// ==================== Notifications ====================

/// Unsolicited message received on a Listen connection
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Attached(Device),
    Detached { device_id: u32 },
    /// Any other message type, kept so callers can log it
    Other(String),
}

impl Notification {
    pub fn from_value(message: &Value) -> Result<Self, ValueError> {
        match message.string_field(keys::MESSAGE_TYPE)? {
            "Attached" => Ok(Notification::Attached(Device::from_record(message)?)),
            "Detached" => Ok(Notification::Detached {
                device_id: message.uint_field(keys::DEVICE_ID)?,
            }),
            other => Ok(Notification::Other(other.to_string())),
        }
    }
}
