//! MMDB data section decoding
//!
//! Implements the MaxMind DB data type specification for reading the values
//! that search tree records point at, and for the metadata map at the end of
//! the file.
//!
//! # Supported Types
//!
//! - **Pointer**: Reference to another data item (followed transparently)
//! - **String**: UTF-8 text data
//! - **Double**: 64-bit floating point (IEEE 754)
//! - **Bytes**: Raw byte arrays
//! - **Uint16** / **Uint32** / **Uint64** / **Uint128**: Unsigned integers
//! - **Map**: Key-value pairs (string keys)
//! - **Int32**: Signed 32-bit integers
//! - **Array**: Ordered lists of values
//! - **Bool**: Boolean values
//! - **Float**: 32-bit floating point (IEEE 754)
//!
//! # Format
//!
//! Each value starts with a control byte. The top 3 bits hold the type and
//! the low 5 bits the size (or a size-extension selector). Type 0 marks an
//! extended type whose number minus 7 is stored in the following byte.
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use crate::error::{MmdbError, Result};
use serde_json::json;
use std::collections::HashMap;

/// Maximum nesting of maps, arrays and pointers before decoding is aborted
const MAX_DEPTH: usize = 512;

/// Decoded data value
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only per MMDB spec)
    Map(HashMap<String, DataValue>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Look up a key when this value is a map
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        match self {
            DataValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Borrow the string payload, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Widen any unsigned integer type that fits into a `u64`
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Uint16(n) => Some(*n as u64),
            DataValue::Uint32(n) => Some(*n as u64),
            DataValue::Uint64(n) => Some(*n),
            DataValue::Uint128(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Convert to a JSON value for display
    ///
    /// `Uint128` has no lossless JSON number form and is rendered as a
    /// decimal string. Use [`deserialize_into`](DataValue::deserialize_into)
    /// to decode into typed fields.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DataValue::String(s) => json!(s),
            DataValue::Double(d) => json!(d),
            DataValue::Bytes(b) => json!(b),
            DataValue::Uint16(u) => json!(u),
            DataValue::Uint32(u) => json!(u),
            DataValue::Uint64(u) => json!(u),
            DataValue::Uint128(u) => json!(u.to_string()),
            DataValue::Int32(i) => json!(i),
            DataValue::Bool(b) => json!(b),
            DataValue::Float(f) => json!(f),
            DataValue::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
            DataValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(DataValue::to_json).collect())
            }
        }
    }

    /// Deserialize this value into any serde target shape
    pub fn deserialize_into<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        <T as serde::Deserialize>::deserialize(self.clone())
    }
}

/// Data section decoder
///
/// Decodes values from a data section buffer. Pointer offsets are relative
/// to the start of `buffer`.
pub struct DataDecoder<'a> {
    buffer: &'a [u8],
}

impl<'a> DataDecoder<'a> {
    /// Create a decoder over a data section (or the metadata section)
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Decode the value at the given offset
    pub fn decode(&self, offset: usize) -> Result<DataValue> {
        let mut cursor = offset;
        self.decode_at(&mut cursor, 0)
    }

    fn decode_at(&self, cursor: &mut usize, depth: usize) -> Result<DataValue> {
        if depth > MAX_DEPTH {
            return Err(decode_err("maximum data structure depth exceeded"));
        }

        let (type_id, payload) = self.read_control(cursor)?;

        if type_id == 1 {
            let target = self.decode_pointer(cursor, payload)?;
            let mut target_cursor = target;
            let (target_type, _) = self.read_control(&mut target_cursor)?;
            if target_type == 1 {
                return Err(decode_err("pointer points to another pointer"));
            }
            let mut target_cursor = target;
            return self.decode_at(&mut target_cursor, depth + 1);
        }

        let size = self.decode_size(cursor, payload)?;

        match type_id {
            2 => self.decode_string(cursor, size),
            3 => self.decode_double(cursor, size),
            4 => self.decode_bytes(cursor, size),
            5 => Ok(DataValue::Uint16(self.read_uint(cursor, size, 2)? as u16)),
            6 => Ok(DataValue::Uint32(self.read_uint(cursor, size, 4)? as u32)),
            7 => self.decode_map(cursor, size, depth),
            8 => Ok(DataValue::Int32(self.read_uint(cursor, size, 4)? as u32 as i32)),
            9 => Ok(DataValue::Uint64(self.read_uint(cursor, size, 8)? as u64)),
            10 => Ok(DataValue::Uint128(self.read_uint(cursor, size, 16)?)),
            11 => self.decode_array(cursor, size, depth),
            12 => Err(decode_err("data cache containers are not supported")),
            13 => Err(decode_err("unexpected end marker")),
            14 => match size {
                0 | 1 => Ok(DataValue::Bool(size == 1)),
                _ => Err(decode_err(format!("invalid bool size {}", size))),
            },
            15 => self.decode_float(cursor, size),
            _ => Err(decode_err(format!("unknown data type {}", type_id))),
        }
    }

    /// Read a control byte (plus the extended type byte if present)
    ///
    /// Returns the resolved type number and the 5-bit size payload.
    fn read_control(&self, cursor: &mut usize) -> Result<(u8, u8)> {
        let ctrl = self.read_byte(cursor)?;
        let mut type_id = ctrl >> 5;
        let payload = ctrl & 0x1F;

        if type_id == 0 {
            let ext = self.read_byte(cursor)?;
            type_id = ext
                .checked_add(7)
                .filter(|t| *t >= 8)
                .ok_or_else(|| decode_err(format!("invalid extended type {}", ext)))?;
        }

        Ok((type_id, payload))
    }

    fn decode_pointer(&self, cursor: &mut usize, payload: u8) -> Result<usize> {
        let size_bits = (payload >> 3) & 0x3;
        let high = (payload & 0x7) as usize;
        let bytes = self.take(cursor, size_bits as usize + 1)?;

        let offset = match size_bits {
            0 => (high << 8) | bytes[0] as usize,
            1 => 0x800 + ((high << 16) | be_usize(bytes)),
            2 => 0x80800 + ((high << 24) | be_usize(bytes)),
            _ => be_usize(bytes),
        };

        Ok(offset)
    }

    fn decode_size(&self, cursor: &mut usize, size_bits: u8) -> Result<usize> {
        match size_bits {
            0..=28 => Ok(size_bits as usize),
            29 => Ok(29 + self.read_byte(cursor)? as usize),
            30 => Ok(29 + 256 + be_usize(self.take(cursor, 2)?)),
            _ => Ok(29 + 256 + 65536 + be_usize(self.take(cursor, 3)?)),
        }
    }

    fn decode_string(&self, cursor: &mut usize, len: usize) -> Result<DataValue> {
        let bytes = self.take(cursor, len)?;
        let s = std::str::from_utf8(bytes).map_err(|_| decode_err("invalid UTF-8 in string"))?;
        Ok(DataValue::String(s.to_string()))
    }

    fn decode_double(&self, cursor: &mut usize, size: usize) -> Result<DataValue> {
        if size != 8 {
            return Err(decode_err(format!("invalid double size {}", size)));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(cursor, 8)?);
        Ok(DataValue::Double(f64::from_be_bytes(bytes)))
    }

    fn decode_float(&self, cursor: &mut usize, size: usize) -> Result<DataValue> {
        if size != 4 {
            return Err(decode_err(format!("invalid float size {}", size)));
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(cursor, 4)?);
        Ok(DataValue::Float(f32::from_be_bytes(bytes)))
    }

    fn decode_bytes(&self, cursor: &mut usize, len: usize) -> Result<DataValue> {
        Ok(DataValue::Bytes(self.take(cursor, len)?.to_vec()))
    }

    fn decode_map(&self, cursor: &mut usize, count: usize, depth: usize) -> Result<DataValue> {
        let mut map = HashMap::with_capacity(count.min(64));

        for _ in 0..count {
            let key = match self.decode_at(cursor, depth + 1)? {
                DataValue::String(s) => s,
                other => return Err(decode_err(format!("map key must be a string, got {:?}", other))),
            };
            let value = self.decode_at(cursor, depth + 1)?;
            map.insert(key, value);
        }

        Ok(DataValue::Map(map))
    }

    fn decode_array(&self, cursor: &mut usize, count: usize, depth: usize) -> Result<DataValue> {
        let mut array = Vec::with_capacity(count.min(64));

        for _ in 0..count {
            array.push(self.decode_at(cursor, depth + 1)?);
        }

        Ok(DataValue::Array(array))
    }

    /// Read a big-endian unsigned integer of `size` bytes (at most `max`)
    fn read_uint(&self, cursor: &mut usize, size: usize, max: usize) -> Result<u128> {
        if size > max {
            return Err(decode_err(format!(
                "integer size {} exceeds {} bytes",
                size, max
            )));
        }
        let bytes = self.take(cursor, size)?;
        Ok(bytes.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128))
    }

    fn read_byte(&self, cursor: &mut usize) -> Result<u8> {
        let byte = *self
            .buffer
            .get(*cursor)
            .ok_or_else(|| decode_err(format!("offset {} out of bounds", *cursor)))?;
        *cursor += 1;
        Ok(byte)
    }

    fn take(&self, cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
        let end = cursor
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or_else(|| {
                decode_err(format!(
                    "{} bytes at offset {} exceed data section of {} bytes",
                    len,
                    *cursor,
                    self.buffer.len()
                ))
            })?;
        let bytes = &self.buffer[*cursor..end];
        *cursor = end;
        Ok(bytes)
    }
}

fn be_usize(bytes: &[u8]) -> usize {
    bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
}

fn decode_err(msg: impl Into<String>) -> MmdbError {
    MmdbError::Decode(msg.into())
}
