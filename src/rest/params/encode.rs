//! Outbound parameter encoding.

use std::collections::HashMap;

use serde::ser::{self, Impossible, SerializeStruct, Serializer};
use serde::Serialize;
use serde_json::Value;

use super::{BindError, ParamLocation, ParamSchema};

/// A parameter struct laid out for an outgoing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedParams {
    pub path: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl EncodedParams {
    /// Substitute `{var}` and `{*var}` segments of `template`.
    ///
    /// Plain variables are percent-encoded; wildcard variables keep their slashes.
    pub fn expand_path(&self, template: &str) -> Result<String, BindError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| BindError::Decode(format!("unterminated variable in {:?}", template)))?;
            let raw = &after[..close];
            let (name, wildcard) = match raw.strip_prefix('*') {
                Some(name) => (name, true),
                None => (raw, false),
            };
            let value = self
                .path
                .get(name)
                .ok_or_else(|| BindError::Required(name.to_string()))?;
            if wildcard {
                let segments: Vec<_> = value
                    .split('/')
                    .map(|s| urlencoding::encode(s).into_owned())
                    .collect();
                out.push_str(&segments.join("/"));
            } else {
                out.push_str(&urlencoding::encode(value));
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// `application/x-www-form-urlencoded` form of the query pairs, without the `?`.
    pub fn query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish()
    }
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn scalar(key: &str, value: &Value) -> Result<String, BindError> {
    match value {
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        Value::Array(_) | Value::Object(_) => Err(BindError::Unsupported {
            key: key.to_string(),
            reason: "nested values cannot be sent as parameters".to_string(),
        }),
    }
}

/// One serialized field. `set` records an explicit `Some(..)`, which is sent even when zero.
#[derive(Debug, Clone, PartialEq)]
struct FieldValue {
    value: Value,
    set: bool,
}

impl FieldValue {
    fn is_absent(&self) -> bool {
        if self.set {
            self.value.is_null()
        } else {
            is_zero(&self.value)
        }
    }
}

pub(super) fn encode<P: Serialize>(schema: &ParamSchema, params: &P) -> Result<EncodedParams, BindError> {
    let fields = params
        .serialize(FieldsSerializer)
        .map_err(|e| BindError::Unsupported {
            key: String::new(),
            reason: e.to_string(),
        })?;

    let mut encoded = EncodedParams::default();
    for field in schema.fields().iter().filter(|f| !f.hidden) {
        let Some(entry) = fields.get(&field.field).filter(|entry| !entry.is_absent()) else {
            if field.required {
                return Err(BindError::Required(field.key.clone()));
            }
            continue;
        };

        let values = match &entry.value {
            Value::Array(items) => items
                .iter()
                .map(|item| scalar(&field.key, item))
                .collect::<Result<Vec<_>, _>>()?,
            other => vec![scalar(&field.key, other)?],
        };

        match field.location {
            ParamLocation::Path => {
                if let Some(first) = values.into_iter().next() {
                    encoded.path.insert(field.key.clone(), first);
                }
            }
            ParamLocation::Query => encoded
                .query
                .extend(values.into_iter().map(|v| (field.key.clone(), v))),
            ParamLocation::Header => encoded
                .headers
                .extend(values.into_iter().map(|v| (field.key.clone(), v))),
        }
    }
    Ok(encoded)
}

type JsonSerializer = serde_json::value::Serializer;
type Fields = HashMap<String, FieldValue>;

fn not_a_struct() -> serde_json::Error {
    ser::Error::custom("parameters must serialize to a struct")
}

/// Top-level serializer: accepts a struct (or unit) and keeps each field apart.
struct FieldsSerializer;

struct FieldsCollector(Fields);

impl SerializeStruct for FieldsCollector {
    type Ok = Fields;
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, key: &'static str, value: &T) -> Result<(), Self::Error> {
        let mut set = false;
        let value = value.serialize(PresenceSerializer { set: &mut set })?;
        self.0.insert(key.to_string(), FieldValue { value, set });
        Ok(())
    }

    fn end(self) -> Result<Fields, Self::Error> {
        Ok(self.0)
    }
}

macro_rules! reject_scalars {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, _v: $ty) -> Result<Fields, serde_json::Error> {
                Err(not_a_struct())
            }
        )*
    };
}

impl Serializer for FieldsSerializer {
    type Ok = Fields;
    type Error = serde_json::Error;
    type SerializeSeq = Impossible<Fields, serde_json::Error>;
    type SerializeTuple = Impossible<Fields, serde_json::Error>;
    type SerializeTupleStruct = Impossible<Fields, serde_json::Error>;
    type SerializeTupleVariant = Impossible<Fields, serde_json::Error>;
    type SerializeMap = Impossible<Fields, serde_json::Error>;
    type SerializeStruct = FieldsCollector;
    type SerializeStructVariant = Impossible<Fields, serde_json::Error>;

    reject_scalars!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_f32(f32),
        serialize_f64(f64),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    );

    fn serialize_none(self) -> Result<Fields, Self::Error> {
        Err(not_a_struct())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Fields, Self::Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Fields, Self::Error> {
        Ok(Fields::new())
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Result<Fields, Self::Error> {
        Err(not_a_struct())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(self, _: &'static str, value: &T) -> Result<Fields, Self::Error> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> Result<Fields, Self::Error> {
        Err(not_a_struct())
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Err(not_a_struct())
    }

    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple, Self::Error> {
        Err(not_a_struct())
    }

    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self::SerializeTupleStruct, Self::Error> {
        Err(not_a_struct())
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        Err(not_a_struct())
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Err(not_a_struct())
    }

    fn serialize_struct(self, _: &'static str, len: usize) -> Result<Self::SerializeStruct, Self::Error> {
        Ok(FieldsCollector(Fields::with_capacity(len)))
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        Err(not_a_struct())
    }
}

/// Serializes a field to a JSON value like `serde_json::to_value`, noting whether it was `Some`.
struct PresenceSerializer<'a> {
    set: &'a mut bool,
}

macro_rules! forward_scalars {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, v: $ty) -> Result<Value, serde_json::Error> {
                serde_json::value::Serializer.$method(v)
            }
        )*
    };
}

impl<'a> Serializer for PresenceSerializer<'a> {
    type Ok = Value;
    type Error = serde_json::Error;
    type SerializeSeq = <JsonSerializer as Serializer>::SerializeSeq;
    type SerializeTuple = <JsonSerializer as Serializer>::SerializeTuple;
    type SerializeTupleStruct = <JsonSerializer as Serializer>::SerializeTupleStruct;
    type SerializeTupleVariant = <JsonSerializer as Serializer>::SerializeTupleVariant;
    type SerializeMap = <JsonSerializer as Serializer>::SerializeMap;
    type SerializeStruct = <JsonSerializer as Serializer>::SerializeStruct;
    type SerializeStructVariant = <JsonSerializer as Serializer>::SerializeStructVariant;

    forward_scalars!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_f32(f32),
        serialize_f64(f64),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    );

    fn serialize_none(self) -> Result<Value, Self::Error> {
        serde_json::value::Serializer.serialize_none()
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Value, Self::Error> {
        *self.set = true;
        value.serialize(serde_json::value::Serializer)
    }

    fn serialize_unit(self) -> Result<Value, Self::Error> {
        serde_json::value::Serializer.serialize_unit()
    }

    fn serialize_unit_variant(self, name: &'static str, index: u32, variant: &'static str) -> Result<Value, Self::Error> {
        serde_json::value::Serializer.serialize_unit_variant(name, index, variant)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(self, name: &'static str, value: &T) -> Result<Value, Self::Error> {
        serde_json::value::Serializer.serialize_newtype_struct(name, value)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value, Self::Error> {
        serde_json::value::Serializer.serialize_newtype_variant(name, index, variant, value)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        serde_json::value::Serializer.serialize_seq(len)
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        serde_json::value::Serializer.serialize_tuple(len)
    }

    fn serialize_tuple_struct(self, name: &'static str, len: usize) -> Result<Self::SerializeTupleStruct, Self::Error> {
        serde_json::value::Serializer.serialize_tuple_struct(name, len)
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        serde_json::value::Serializer.serialize_tuple_variant(name, index, variant, len)
    }

    fn serialize_map(self, len: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        serde_json::value::Serializer.serialize_map(len)
    }

    fn serialize_struct(self, name: &'static str, len: usize) -> Result<Self::SerializeStruct, Self::Error> {
        serde_json::value::Serializer.serialize_struct(name, len)
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        serde_json::value::Serializer.serialize_struct_variant(name, index, variant, len)
    }
}
