//! JSON-safe snapshots of arbitrary `Serialize` values.
//!
//! `serde_json::to_value` fails on non-string map keys and on custom
//! `Serialize` impls that error, quietly turns non-finite floats into `null`,
//! and recurses forever through reference cycles built from shared pointers.
//! [`to_safe_value`] never fails: each hazard is replaced in place and the
//! rest of the value is kept.

use serde::ser::{self, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Nesting depth past which a value is treated as a reference cycle.
pub const MAX_DEPTH: usize = 64;

/// Stands in for values nested deeper than [`MAX_DEPTH`].
pub const CIRCULAR_PLACEHOLDER: &str = "[Circular]";

/// Snapshot `value` as JSON, neutralizing anything that cannot be represented.
pub fn to_safe_value<T: Serialize + ?Sized>(value: &T) -> Value {
    SafeSerializer { depth: 0 }.capture(value)
}

#[derive(Debug, Error)]
#[error("{0}")]
struct HazardError(String);

impl ser::Error for HazardError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
struct SafeSerializer {
    depth: usize,
}

impl SafeSerializer {
    fn capture<T: Serialize + ?Sized>(self, value: &T) -> Value {
        if self.depth > MAX_DEPTH {
            return Value::String(CIRCULAR_PLACEHOLDER.to_string());
        }
        match value.serialize(self) {
            Ok(captured) => captured,
            Err(err) => Value::String(format!("[Unserializable: {err}]")),
        }
    }

    fn nested(self) -> Self {
        Self {
            depth: self.depth + 1,
        }
    }

    fn seq_capture(self, len: usize) -> SeqCapture {
        SeqCapture {
            ser: self.nested(),
            items: Vec::with_capacity(len),
        }
    }

    fn struct_capture(self) -> StructCapture {
        StructCapture {
            ser: self.nested(),
            map: Map::new(),
        }
    }
}

fn float_value(v: f64) -> Value {
    match Number::from_f64(v) {
        Some(number) => Value::Number(number),
        None if v.is_nan() => Value::String("NaN".to_string()),
        None if v.is_sign_positive() => Value::String("Infinity".to_string()),
        None => Value::String("-Infinity".to_string()),
    }
}

fn key_string(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl ser::Serializer for SafeSerializer {
    type Ok = Value;
    type Error = HazardError;

    type SerializeSeq = SeqCapture;
    type SerializeTuple = SeqCapture;
    type SerializeTupleStruct = SeqCapture;
    type SerializeTupleVariant = VariantSeqCapture;
    type SerializeMap = MapCapture;
    type SerializeStruct = StructCapture;
    type SerializeStructVariant = VariantStructCapture;

    fn serialize_bool(self, v: bool) -> Result<Value, HazardError> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value, HazardError> {
        Ok(Value::from(v))
    }

    fn serialize_i16(self, v: i16) -> Result<Value, HazardError> {
        Ok(Value::from(v))
    }

    fn serialize_i32(self, v: i32) -> Result<Value, HazardError> {
        Ok(Value::from(v))
    }

    fn serialize_i64(self, v: i64) -> Result<Value, HazardError> {
        Ok(Value::from(v))
    }

    fn serialize_i128(self, v: i128) -> Result<Value, HazardError> {
        Ok(i64::try_from(v)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(v.to_string())))
    }

    fn serialize_u8(self, v: u8) -> Result<Value, HazardError> {
        Ok(Value::from(v))
    }

    fn serialize_u16(self, v: u16) -> Result<Value, HazardError> {
        Ok(Value::from(v))
    }

    fn serialize_u32(self, v: u32) -> Result<Value, HazardError> {
        Ok(Value::from(v))
    }

    fn serialize_u64(self, v: u64) -> Result<Value, HazardError> {
        Ok(Value::from(v))
    }

    fn serialize_u128(self, v: u128) -> Result<Value, HazardError> {
        Ok(u64::try_from(v)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(v.to_string())))
    }

    fn serialize_f32(self, v: f32) -> Result<Value, HazardError> {
        Ok(float_value(f64::from(v)))
    }

    fn serialize_f64(self, v: f64) -> Result<Value, HazardError> {
        Ok(float_value(v))
    }

    fn serialize_char(self, v: char) -> Result<Value, HazardError> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Value, HazardError> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value, HazardError> {
        Ok(Value::Array(v.iter().map(|b| Value::from(*b)).collect()))
    }

    fn serialize_none(self) -> Result<Value, HazardError> {
        Ok(Value::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Value, HazardError> {
        Ok(self.nested().capture(value))
    }

    fn serialize_unit(self) -> Result<Value, HazardError> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value, HazardError> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Value, HazardError> {
        Ok(Value::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Value, HazardError> {
        Ok(self.nested().capture(value))
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value, HazardError> {
        let mut map = Map::new();
        map.insert(variant.to_string(), self.nested().capture(value));
        Ok(Value::Object(map))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqCapture, HazardError> {
        Ok(self.seq_capture(len.unwrap_or(0)))
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqCapture, HazardError> {
        Ok(self.seq_capture(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqCapture, HazardError> {
        Ok(self.seq_capture(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantSeqCapture, HazardError> {
        Ok(VariantSeqCapture {
            variant,
            inner: self.seq_capture(len),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapCapture, HazardError> {
        Ok(MapCapture {
            ser: self.nested(),
            map: Map::new(),
            pending_key: None,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<StructCapture, HazardError> {
        Ok(self.struct_capture())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<VariantStructCapture, HazardError> {
        Ok(VariantStructCapture {
            variant,
            inner: self.struct_capture(),
        })
    }
}

struct SeqCapture {
    ser: SafeSerializer,
    items: Vec<Value>,
}

impl ser::SerializeSeq for SeqCapture {
    type Ok = Value;
    type Error = HazardError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), HazardError> {
        self.items.push(self.ser.capture(value));
        Ok(())
    }

    fn end(self) -> Result<Value, HazardError> {
        Ok(Value::Array(self.items))
    }
}

impl ser::SerializeTuple for SeqCapture {
    type Ok = Value;
    type Error = HazardError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), HazardError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, HazardError> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqCapture {
    type Ok = Value;
    type Error = HazardError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), HazardError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, HazardError> {
        ser::SerializeSeq::end(self)
    }
}

struct VariantSeqCapture {
    variant: &'static str,
    inner: SeqCapture,
}

impl ser::SerializeTupleVariant for VariantSeqCapture {
    type Ok = Value;
    type Error = HazardError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), HazardError> {
        ser::SerializeSeq::serialize_element(&mut self.inner, value)
    }

    fn end(self) -> Result<Value, HazardError> {
        let mut map = Map::new();
        map.insert(self.variant.to_string(), Value::Array(self.inner.items));
        Ok(Value::Object(map))
    }
}

struct MapCapture {
    ser: SafeSerializer,
    map: Map<String, Value>,
    pending_key: Option<String>,
}

impl ser::SerializeMap for MapCapture {
    type Ok = Value;
    type Error = HazardError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), HazardError> {
        self.pending_key = Some(key_string(self.ser.capture(key)));
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), HazardError> {
        let key = self.pending_key.take().unwrap_or_default();
        self.map.insert(key, self.ser.capture(value));
        Ok(())
    }

    fn end(self) -> Result<Value, HazardError> {
        Ok(Value::Object(self.map))
    }
}

struct StructCapture {
    ser: SafeSerializer,
    map: Map<String, Value>,
}

impl ser::SerializeStruct for StructCapture {
    type Ok = Value;
    type Error = HazardError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), HazardError> {
        self.map.insert(key.to_string(), self.ser.capture(value));
        Ok(())
    }

    fn end(self) -> Result<Value, HazardError> {
        Ok(Value::Object(self.map))
    }
}

struct VariantStructCapture {
    variant: &'static str,
    inner: StructCapture,
}

impl ser::SerializeStructVariant for VariantStructCapture {
    type Ok = Value;
    type Error = HazardError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), HazardError> {
        ser::SerializeStruct::serialize_field(&mut self.inner, key, value)
    }

    fn end(self) -> Result<Value, HazardError> {
        let mut map = Map::new();
        map.insert(self.variant.to_string(), Value::Object(self.inner.map));
        Ok(Value::Object(map))
    }
}
