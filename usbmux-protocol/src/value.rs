//! Structured values carried in frame payloads
//!
//! usbmuxd speaks property lists. [`Value`] is the in-memory tree the rest of
//! the crate works with; [`ValueCodec`] is the only place that knows how the
//! tree is serialized.

use std::io::Cursor;

use crate::types::HexError;

/// Structured value error
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    #[error("Missing key '{0}'")]
    MissingKey(String),

    #[error("Expected {expected} for '{key}', found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Integer {value} for '{key}' is out of range")]
    OutOfRange { key: String, value: i64 },

    #[error("Invalid hex string for '{key}': {source}")]
    InvalidHex { key: String, source: HexError },

    #[error("Unsupported value: {0}")]
    Unsupported(String),

    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),
}

/// Tagged value tree
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Ordered key/value pairs
    Dictionary(Vec<(String, Value)>),
    Array(Vec<Value>),
    String(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Data(Vec<u8>),
}

impl Value {
    /// Empty dictionary
    pub fn dictionary() -> Self {
        Value::Dictionary(Vec::new())
    }

    /// Name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Dictionary(_) => "dictionary",
            Value::Array(_) => "array",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Boolean(_) => "boolean",
            Value::Data(_) => "data",
        }
    }

    /// Look up a key if this is a dictionary
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dictionary(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Value::Data(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Required dictionary entry
    pub fn field(&self, key: &str) -> Result<&Value, ValueError> {
        match self {
            Value::Dictionary(_) => self
                .get(key)
                .ok_or_else(|| ValueError::MissingKey(key.to_string())),
            other => Err(ValueError::TypeMismatch {
                key: key.to_string(),
                expected: "dictionary",
                found: other.kind(),
            }),
        }
    }

    /// Required string entry
    pub fn string_field(&self, key: &str) -> Result<&str, ValueError> {
        let value = self.field(key)?;
        value.as_str().ok_or_else(|| mismatch(key, "string", value))
    }

    /// Required integer entry
    pub fn integer_field(&self, key: &str) -> Result<i64, ValueError> {
        let value = self.field(key)?;
        value.as_integer().ok_or_else(|| mismatch(key, "integer", value))
    }

    /// Required integer entry narrowed to `T`
    pub fn uint_field<T: TryFrom<i64>>(&self, key: &str) -> Result<T, ValueError> {
        let value = self.integer_field(key)?;
        T::try_from(value).map_err(|_| ValueError::OutOfRange {
            key: key.to_string(),
            value,
        })
    }

    /// Required array entry
    pub fn array_field(&self, key: &str) -> Result<&[Value], ValueError> {
        let value = self.field(key)?;
        value.as_array().ok_or_else(|| mismatch(key, "array", value))
    }
}

fn mismatch(key: &str, expected: &'static str, found: &Value) -> ValueError {
    ValueError::TypeMismatch {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Self {
        Value::Integer(n.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Data(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

// ==================== Plist boundary ====================

impl From<&Value> for plist::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Dictionary(entries) => {
                let mut dict = plist::Dictionary::new();
                for (key, item) in entries {
                    dict.insert(key.clone(), item.into());
                }
                plist::Value::Dictionary(dict)
            }
            Value::Array(items) => plist::Value::Array(items.iter().map(Into::into).collect()),
            Value::String(s) => plist::Value::String(s.clone()),
            Value::Integer(n) => plist::Value::Integer((*n).into()),
            Value::Real(r) => plist::Value::Real(*r),
            Value::Boolean(b) => plist::Value::Boolean(*b),
            Value::Data(bytes) => plist::Value::Data(bytes.clone()),
        }
    }
}

impl TryFrom<plist::Value> for Value {
    type Error = ValueError;

    fn try_from(value: plist::Value) -> Result<Self, Self::Error> {
        Ok(match value {
            plist::Value::Dictionary(dict) => Value::Dictionary(
                dict.into_iter()
                    .map(|(key, item)| Ok((key, Value::try_from(item)?)))
                    .collect::<Result<_, ValueError>>()?,
            ),
            plist::Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            plist::Value::String(s) => Value::String(s),
            plist::Value::Integer(n) => match n.as_signed() {
                Some(n) => Value::Integer(n),
                None => return Err(ValueError::Unsupported(format!("integer {:?}", n))),
            },
            plist::Value::Real(r) => Value::Real(r),
            plist::Value::Boolean(b) => Value::Boolean(b),
            plist::Value::Data(bytes) => Value::Data(bytes),
            plist::Value::Date(date) => Value::String(date.to_xml_format()),
            plist::Value::Uid(uid) => {
                let raw = uid.get();
                match i64::try_from(raw) {
                    Ok(n) => Value::Integer(n),
                    Err(_) => return Err(ValueError::Unsupported(format!("uid {}", raw))),
                }
            }
            other => return Err(ValueError::Unsupported(format!("{:?}", other))),
        })
    }
}

/// Conversion between a [`Value`] tree and its serialized bytes
pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, ValueError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, ValueError>;
}

/// XML property-list codec (the format usbmuxd expects from clients)
///
/// Decoding also accepts binary plists.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlPlistCodec;

impl ValueCodec for XmlPlistCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, ValueError> {
        let mut buf = Vec::new();
        plist::Value::from(value).to_writer_xml(&mut buf)?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, ValueError> {
        let value = plist::Value::from_reader(Cursor::new(bytes))?;
        Value::try_from(value)
    }
}
