//! serde support for decoded values
//!
//! [`DataValue`] is a self-describing serde [`Deserializer`], so a record can
//! be decoded straight into any `DeserializeOwned` shape without losing
//! precision. `uint128` reaches `u128` fields, `float` reaches `f32` and
//! `bytes` reaches both byte buffers and `Vec<u8>`.

use crate::data_section::DataValue;
use crate::error::MmdbError;
use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{self, Deserializer, IntoDeserializer, Unexpected, Visitor};
use serde::forward_to_deserialize_any;
use std::fmt;

impl de::Error for MmdbError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        MmdbError::Decode(msg.to_string())
    }
}

impl DataValue {
    fn unexpected(&self) -> Unexpected<'_> {
        match self {
            DataValue::String(s) => Unexpected::Str(s),
            DataValue::Double(d) => Unexpected::Float(*d),
            DataValue::Bytes(b) => Unexpected::Bytes(b),
            DataValue::Uint16(n) => Unexpected::Unsigned(*n as u64),
            DataValue::Uint32(n) => Unexpected::Unsigned(*n as u64),
            DataValue::Uint64(n) => Unexpected::Unsigned(*n),
            DataValue::Uint128(_) => Unexpected::Other("uint128"),
            DataValue::Map(_) => Unexpected::Map,
            DataValue::Int32(n) => Unexpected::Signed(*n as i64),
            DataValue::Array(_) => Unexpected::Seq,
            DataValue::Bool(b) => Unexpected::Bool(*b),
            DataValue::Float(f) => Unexpected::Float(*f as f64),
        }
    }
}

impl<'de> Deserializer<'de> for DataValue {
    type Error = MmdbError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, MmdbError> {
        match self {
            DataValue::String(s) => visitor.visit_string(s),
            DataValue::Double(d) => visitor.visit_f64(d),
            DataValue::Bytes(b) => visitor.visit_byte_buf(b),
            DataValue::Uint16(n) => visitor.visit_u16(n),
            DataValue::Uint32(n) => visitor.visit_u32(n),
            DataValue::Uint64(n) => visitor.visit_u64(n),
            DataValue::Uint128(n) => visitor.visit_u128(n),
            DataValue::Int32(n) => visitor.visit_i32(n),
            DataValue::Bool(b) => visitor.visit_bool(b),
            DataValue::Float(f) => visitor.visit_f32(f),
            DataValue::Map(entries) => {
                let mut map = MapDeserializer::<_, MmdbError>::new(entries.into_iter());
                let value = visitor.visit_map(&mut map)?;
                map.end()?;
                Ok(value)
            }
            DataValue::Array(items) => {
                let mut seq = SeqDeserializer::<_, MmdbError>::new(items.into_iter());
                let value = visitor.visit_seq(&mut seq)?;
                seq.end()?;
                Ok(value)
            }
        }
    }

    // MMDB has no null; a present value is always `Some`
    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, MmdbError> {
        visitor.visit_some(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, MmdbError> {
        match self {
            DataValue::Bytes(bytes) => {
                let mut seq = SeqDeserializer::<_, MmdbError>::new(bytes.into_iter());
                let value = visitor.visit_seq(&mut seq)?;
                seq.end()?;
                Ok(value)
            }
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, MmdbError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, MmdbError> {
        match self {
            DataValue::String(s) => {
                visitor.visit_enum(IntoDeserializer::<'de, MmdbError>::into_deserializer(s))
            }
            other => Err(de::Error::invalid_type(other.unexpected(), &"a unit variant name")),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, MmdbError> {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct tuple tuple_struct map struct identifier
    }
}

impl<'de> IntoDeserializer<'de, MmdbError> for DataValue {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}
