// Typed transaction values and their wire encodings
//
// Every transaction carries one value. On the wire it is a one-byte type tag
// followed by a payload whose layout depends on the tag. All multi-byte
// numbers are big-endian.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_cbor::Value as CborValue;

/// Wire type tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Null = 0xFF,
    Reserved = 0xFE,
    Float = 0xFC,
    Double = 0xFB,
    SignedInt = 0xFA,
    UnsignedInt = 0xF9,
    Boolean = 0xF8,
    String = 0xF7,
    Packed = 0xF6,
}

impl DataType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0xFF => Some(Self::Null),
            0xFE => Some(Self::Reserved),
            0xFC => Some(Self::Float),
            0xFB => Some(Self::Double),
            0xFA => Some(Self::SignedInt),
            0xF9 => Some(Self::UnsignedInt),
            0xF8 => Some(Self::Boolean),
            0xF7 => Some(Self::String),
            0xF6 => Some(Self::Packed),
            _ => None,
        }
    }
}

/// Errors produced while encoding or decoding transaction values
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Unsigned integer size must be 1, 2, or 4 bytes, got {size}")]
    InvalidUnsignedSize { size: u8 },

    #[error("Unsigned integer value must be non-negative, got {value}")]
    NegativeUnsigned { value: i64 },

    #[error("Unsigned integer value {value} does not fit in {size} byte(s)")]
    UnsignedOutOfRange { value: u64, size: u8 },

    #[error("Payload of {len} bytes exceeds the 16-bit length field")]
    PayloadTooLong { len: usize },

    #[error("Invalid {kind} payload width: {len} bytes")]
    InvalidWidth { kind: &'static str, len: usize },

    #[error("Invalid UTF-8 in string payload: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("CBOR error: {0}")]
    Cbor(#[from] serde_cbor::Error),

    #[error("Unsupported packed payload: {0}")]
    UnsupportedPacked(String),
}

/// Scalar carried inside a packed (CBOR map) value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackedValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl PackedValue {
    fn to_cbor(&self) -> CborValue {
        match self {
            PackedValue::Bool(b) => CborValue::Bool(*b),
            PackedValue::Integer(i) => CborValue::Integer(*i as i128),
            PackedValue::Float(f) => CborValue::Float(*f),
            PackedValue::Text(s) => CborValue::Text(s.clone()),
        }
    }

    fn from_cbor(value: CborValue) -> Result<Self, CodecError> {
        match value {
            CborValue::Bool(b) => Ok(PackedValue::Bool(b)),
            CborValue::Integer(i) => i64::try_from(i)
                .map(PackedValue::Integer)
                .map_err(|_| CodecError::UnsupportedPacked(format!("integer {} out of range", i))),
            CborValue::Float(f) => Ok(PackedValue::Float(f)),
            CborValue::Text(s) => Ok(PackedValue::Text(s)),
            other => Err(CodecError::UnsupportedPacked(format!("{:?}", other))),
        }
    }
}

impl From<bool> for PackedValue {
    fn from(value: bool) -> Self {
        PackedValue::Bool(value)
    }
}

impl From<i64> for PackedValue {
    fn from(value: i64) -> Self {
        PackedValue::Integer(value)
    }
}

impl From<i32> for PackedValue {
    fn from(value: i32) -> Self {
        PackedValue::Integer(value as i64)
    }
}

impl From<u32> for PackedValue {
    fn from(value: u32) -> Self {
        PackedValue::Integer(value as i64)
    }
}

impl From<f64> for PackedValue {
    fn from(value: f64) -> Self {
        PackedValue::Float(value)
    }
}

impl From<f32> for PackedValue {
    fn from(value: f32) -> Self {
        PackedValue::Float(value as f64)
    }
}

impl From<&str> for PackedValue {
    fn from(value: &str) -> Self {
        PackedValue::Text(value.to_string())
    }
}

impl From<String> for PackedValue {
    fn from(value: String) -> Self {
        PackedValue::Text(value)
    }
}

/// A value carried by one transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionValue {
    Empty,
    Float(f32),
    /// `size` is the wire width in bytes (1, 2 or 4 when encoding)
    UnsignedInt { value: u64, size: u8 },
    Boolean(bool),
    String(String),
    Packed(BTreeMap<String, PackedValue>),
}

impl TransactionValue {
    /// Checked constructor for unsigned values, rejecting bad sizes and ranges up front
    pub fn unsigned(value: i64, size: u8) -> Result<Self, CodecError> {
        if value < 0 {
            return Err(CodecError::NegativeUnsigned { value });
        }
        let value = TransactionValue::UnsignedInt {
            value: value as u64,
            size,
        };
        value.encode()?;
        Ok(value)
    }

    /// Build a packed value holding a single key
    pub fn packed_single(key: impl Into<String>, value: impl Into<PackedValue>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(key.into(), value.into());
        TransactionValue::Packed(map)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            TransactionValue::Empty => DataType::Null,
            TransactionValue::Float(_) => DataType::Float,
            TransactionValue::UnsignedInt { .. } => DataType::UnsignedInt,
            TransactionValue::Boolean(_) => DataType::Boolean,
            TransactionValue::String(_) => DataType::String,
            TransactionValue::Packed(_) => DataType::Packed,
        }
    }

    /// Encode to `(type tag, payload)`
    pub fn encode(&self) -> Result<(u8, Vec<u8>), CodecError> {
        let payload = match self {
            TransactionValue::Empty => Vec::new(),
            TransactionValue::Float(v) => v.to_be_bytes().to_vec(),
            TransactionValue::UnsignedInt { value, size } => encode_unsigned(*value, *size)?,
            TransactionValue::Boolean(b) => vec![u8::from(*b)],
            TransactionValue::String(s) => s.as_bytes().to_vec(),
            TransactionValue::Packed(map) => {
                // serde_cbor orders Value map keys canonically (length first, then bytewise)
                let canonical: BTreeMap<CborValue, CborValue> = map
                    .iter()
                    .map(|(k, v)| (CborValue::Text(k.clone()), v.to_cbor()))
                    .collect();
                serde_cbor::to_vec(&CborValue::Map(canonical))?
            }
        };
        Ok((self.data_type() as u8, payload))
    }

    /// Decode a payload for the given type tag. Unknown or unsupported tags decode to `Empty`.
    pub fn decode(tag: u8, payload: &[u8]) -> Result<Self, CodecError> {
        let Some(data_type) = DataType::from_u8(tag) else {
            return Ok(TransactionValue::Empty);
        };

        match data_type {
            DataType::Float => {
                let bytes: [u8; 4] = payload.try_into().map_err(|_| CodecError::InvalidWidth {
                    kind: "float",
                    len: payload.len(),
                })?;
                Ok(TransactionValue::Float(f32::from_be_bytes(bytes)))
            }
            DataType::UnsignedInt => {
                if payload.len() > 8 {
                    return Err(CodecError::InvalidWidth {
                        kind: "unsigned",
                        len: payload.len(),
                    });
                }
                let value = payload.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
                Ok(TransactionValue::UnsignedInt {
                    value,
                    size: payload.len() as u8,
                })
            }
            DataType::Boolean => {
                let value = payload.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
                Ok(TransactionValue::Boolean(value == 1))
            }
            DataType::String => Ok(TransactionValue::String(String::from_utf8(payload.to_vec())?)),
            DataType::Packed => decode_packed(payload),
            DataType::Null | DataType::Reserved | DataType::Double | DataType::SignedInt => {
                Ok(TransactionValue::Empty)
            }
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            TransactionValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TransactionValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            TransactionValue::UnsignedInt { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TransactionValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the value case, used in fault messages
    pub fn kind(&self) -> &'static str {
        match self {
            TransactionValue::Empty => "Empty",
            TransactionValue::Float(_) => "Float",
            TransactionValue::UnsignedInt { .. } => "UnsignedInt",
            TransactionValue::Boolean(_) => "Boolean",
            TransactionValue::String(_) => "String",
            TransactionValue::Packed(_) => "Packed",
        }
    }
}

impl fmt::Display for TransactionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionValue::Empty => write!(f, "<Empty>"),
            TransactionValue::Float(v) => write!(f, "<Float {}>", v),
            TransactionValue::UnsignedInt { value, size } => {
                write!(f, "<UnsignedInt value={} size={}>", value, size)
            }
            TransactionValue::Boolean(b) => write!(f, "<Boolean {}>", b),
            TransactionValue::String(s) => write!(f, "<String {:?}>", s),
            TransactionValue::Packed(map) => write!(f, "<Packed {:?}>", map),
        }
    }
}

fn encode_unsigned(value: u64, size: u8) -> Result<Vec<u8>, CodecError> {
    let max = match size {
        1 => u8::MAX as u64,
        2 => u16::MAX as u64,
        4 => u32::MAX as u64,
        _ => return Err(CodecError::InvalidUnsignedSize { size }),
    };
    if value > max {
        return Err(CodecError::UnsignedOutOfRange { value, size });
    }
    let bytes = value.to_be_bytes();
    Ok(bytes[8 - size as usize..].to_vec())
}

fn decode_packed(payload: &[u8]) -> Result<TransactionValue, CodecError> {
    let CborValue::Map(entries) = serde_cbor::from_slice::<CborValue>(payload)? else {
        return Err(CodecError::UnsupportedPacked("top level is not a map".to_string()));
    };

    let mut map = BTreeMap::new();
    for (key, value) in entries {
        let CborValue::Text(key) = key else {
            return Err(CodecError::UnsupportedPacked(format!("non-string key {:?}", key)));
        };
        map.insert(key, PackedValue::from_cbor(value)?);
    }
    Ok(TransactionValue::Packed(map))
}
