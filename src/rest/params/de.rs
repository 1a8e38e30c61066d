//! A serde `Deserializer` over the raw string values of one parameter.

use std::fmt;
use std::str::FromStr;

use serde::de::value::{SeqDeserializer, StringDeserializer};
use serde::de::{self, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeError(String);

impl fmt::Display for DeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DeError {}

impl de::Error for DeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        DeError(msg.to_string())
    }
}

/// Every value seen for a key, in arrival order.
#[derive(Debug, Clone)]
pub struct ParamValue {
    key: String,
    values: Vec<String>,
}

impl ParamValue {
    pub fn new(key: String, values: Vec<String>) -> Self {
        Self { key, values }
    }

    fn single(key: String, value: String) -> Self {
        Self {
            key,
            values: vec![value],
        }
    }

    /// Scalars bind to the first value.
    fn first(&self) -> Result<&str, DeError> {
        self.values
            .first()
            .map(String::as_str)
            .ok_or_else(|| DeError(format!("{} must be set", self.key)))
    }

    fn invalid(&self, value: &str, expected: &str, err: impl fmt::Display) -> DeError {
        DeError(format!(
            "invalid value {:?} for {}: expected {}: {}",
            value, self.key, expected, err
        ))
    }

    fn parse<T>(&self, expected: &str) -> Result<T, DeError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.first()?;
        raw.trim()
            .parse()
            .map_err(|e| self.invalid(raw, expected, e))
    }

    fn parse_bool(&self) -> Result<bool, DeError> {
        let raw = self.first()?;
        match raw {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
            _ => Err(self.invalid(raw, "a boolean", "unrecognised literal")),
        }
    }
}

impl<'de> IntoDeserializer<'de, DeError> for ParamValue {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

macro_rules! deserialize_number {
    ($($method:ident => $visit:ident, $ty:ty;)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
                visitor.$visit(self.parse::<$ty>(stringify!($ty))?)
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for ParamValue {
    type Error = DeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if self.values.len() > 1 {
            return self.deserialize_seq(visitor);
        }
        let value = self.first()?.to_string();
        visitor.visit_string(value)
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_bool(self.parse_bool()?)
    }

    deserialize_number! {
        deserialize_i8 => visit_i8, i8;
        deserialize_i16 => visit_i16, i16;
        deserialize_i32 => visit_i32, i32;
        deserialize_i64 => visit_i64, i64;
        deserialize_u8 => visit_u8, u8;
        deserialize_u16 => visit_u16, u16;
        deserialize_u32 => visit_u32, u32;
        deserialize_u64 => visit_u64, u64;
        deserialize_f32 => visit_f32, f32;
        deserialize_f64 => visit_f64, f64;
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_char(self.parse::<char>("a single character")?)
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_string(visitor)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        let value = self.first()?.to_string();
        visitor.visit_string(value)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.values.first() {
            None => visitor.visit_none(),
            Some(v) if v.is_empty() => visitor.visit_none(),
            Some(_) => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        let key = self.key;
        let items = self
            .values
            .into_iter()
            .map(move |v| ParamValue::single(key.clone(), v));
        let mut seq = SeqDeserializer::new(items);
        let value = visitor.visit_seq(&mut seq)?;
        seq.end()?;
        Ok(value)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        let variant: StringDeserializer<DeError> = self.first()?.to_string().into_deserializer();
        visitor.visit_enum(variant)
    }

    forward_to_deserialize_any! {
        bytes byte_buf unit_struct tuple tuple_struct map struct identifier ignored_any
    }
}
