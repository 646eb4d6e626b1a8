use std::collections::HashMap;
use std::fmt;

use derive_more::From;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, SerializeMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Fields of a [`ConfidenceValue::Struct`].
pub type Struct = HashMap<String, ConfidenceValue>;

/// A value attached to an event payload or to the evaluation context.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `bool`, `i64`, `i32`, `f64`,
/// and [`Struct`].
///
/// # Serialization
///
/// Values are serialized untagged: strings, booleans, and numbers map to the corresponding JSON
/// primitives and structs map to JSON objects. When deserializing, a JSON value is classified by
/// checking (in order) for a string, a boolean, an integer, and a float. A number that is a valid
/// integer is therefore always read back as [`ConfidenceValue::Int`]:
///
/// ```
/// # use confidence_events::ConfidenceValue;
/// let value: ConfidenceValue = serde_json::from_str("5").unwrap();
/// assert_eq!(value, ConfidenceValue::Int(5));
///
/// let value: ConfidenceValue = serde_json::from_str("5.0").unwrap();
/// assert_eq!(value, ConfidenceValue::Double(5.0));
/// ```
///
/// `null` and arrays are not representable and fail to deserialize.
#[derive(Debug, Clone, PartialEq, From)]
pub enum ConfidenceValue {
    /// A string value.
    String(String),
    /// A boolean value.
    Boolean(bool),
    /// An integer value.
    Int(i64),
    /// A floating-point value.
    Double(f64),
    /// A nested structure.
    Struct(Struct),
}

impl From<&str> for ConfidenceValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for ConfidenceValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl ConfidenceValue {
    /// Convert a parsed JSON value, classifying primitives the same way as deserialization does.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownValueType`] if `value` (or any value nested inside it) is `null` or
    /// an array.
    ///
    /// # Examples
    /// ```
    /// # use confidence_events::{ConfidenceValue, Error};
    /// use serde_json::json;
    ///
    /// let value = ConfidenceValue::from_json(json!({ "a": { "b": 1 } })).unwrap();
    /// assert_eq!(value.as_struct().unwrap()["a"].as_struct().unwrap()["b"].as_int(), Some(1));
    ///
    /// assert!(matches!(
    ///     ConfidenceValue::from_json(json!(null)),
    ///     Err(Error::UnknownValueType { found: "null" })
    /// ));
    /// ```
    pub fn from_json(value: serde_json::Value) -> Result<ConfidenceValue> {
        match value {
            serde_json::Value::String(s) => Ok(ConfidenceValue::String(s)),
            serde_json::Value::Bool(b) => Ok(ConfidenceValue::Boolean(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ConfidenceValue::Int(i))
                } else if let Some(d) = n.as_f64() {
                    Ok(ConfidenceValue::Double(d))
                } else {
                    Err(Error::UnknownValueType { found: "number" })
                }
            }
            serde_json::Value::Object(fields) => fields
                .into_iter()
                .map(|(key, value)| Ok((key, ConfidenceValue::from_json(value)?)))
                .collect::<Result<Struct>>()
                .map(ConfidenceValue::Struct),
            serde_json::Value::Null => Err(Error::UnknownValueType { found: "null" }),
            serde_json::Value::Array(_) => Err(Error::UnknownValueType { found: "array" }),
        }
    }

    /// Convert to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NonFiniteDouble`] if `self` (or any value nested inside it) is a NaN or
    /// infinite double.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            ConfidenceValue::String(s) => serde_json::Value::String(s.clone()),
            ConfidenceValue::Boolean(b) => serde_json::Value::Bool(*b),
            ConfidenceValue::Int(i) => serde_json::Value::Number((*i).into()),
            ConfidenceValue::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .ok_or(Error::NonFiniteDouble(*d))?,
            ConfidenceValue::Struct(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), value.to_json()?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    /// Returns the value as a string slice if it is a [`ConfidenceValue::String`].
    ///
    /// ```
    /// # use confidence_events::ConfidenceValue;
    /// assert_eq!(ConfidenceValue::from("home").as_str(), Some("home"));
    /// assert_eq!(ConfidenceValue::from(true).as_str(), None);
    /// ```
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfidenceValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a boolean if it is a [`ConfidenceValue::Boolean`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfidenceValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as an integer if it is a [`ConfidenceValue::Int`].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfidenceValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a float if it is a [`ConfidenceValue::Double`].
    ///
    /// Integers are not converted.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            ConfidenceValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the struct fields if the value is a [`ConfidenceValue::Struct`].
    pub fn as_struct(&self) -> Option<&Struct> {
        match self {
            ConfidenceValue::Struct(fields) => Some(fields),
            _ => None,
        }
    }
}

impl Serialize for ConfidenceValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ConfidenceValue::String(s) => serializer.serialize_str(s),
            ConfidenceValue::Boolean(b) => serializer.serialize_bool(*b),
            ConfidenceValue::Int(i) => serializer.serialize_i64(*i),
            ConfidenceValue::Double(d) if !d.is_finite() => {
                Err(ser::Error::custom(Error::NonFiniteDouble(*d)))
            }
            ConfidenceValue::Double(d) => serializer.serialize_f64(*d),
            ConfidenceValue::Struct(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ConfidenceValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<ConfidenceValue, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ConfidenceValueVisitor)
    }
}

struct ConfidenceValueVisitor;

impl<'de> Visitor<'de> for ConfidenceValueVisitor {
    type Value = ConfidenceValue;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string, boolean, number, or object")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<ConfidenceValue, E> {
        Ok(ConfidenceValue::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<ConfidenceValue, E> {
        Ok(ConfidenceValue::String(v))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<ConfidenceValue, E> {
        Ok(ConfidenceValue::Boolean(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<ConfidenceValue, E> {
        Ok(ConfidenceValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<ConfidenceValue, E> {
        // Integers that overflow i64 can still be carried as a double.
        Ok(match i64::try_from(v) {
            Ok(i) => ConfidenceValue::Int(i),
            Err(_) => ConfidenceValue::Double(v as f64),
        })
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<ConfidenceValue, E> {
        Ok(ConfidenceValue::Double(v))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<ConfidenceValue, E> {
        Err(E::custom(Error::UnknownValueType { found: "null" }))
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<ConfidenceValue, E> {
        self.visit_unit()
    }

    fn visit_seq<A>(self, _seq: A) -> std::result::Result<ConfidenceValue, A::Error>
    where
        A: SeqAccess<'de>,
    {
        Err(de::Error::custom(Error::UnknownValueType { found: "array" }))
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<ConfidenceValue, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut fields = Struct::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, ConfidenceValue>()? {
            fields.insert(key, value);
        }
        Ok(ConfidenceValue::Struct(fields))
    }
}
