use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A dynamically typed scalar or compound value.
///
/// Equality is structural. Ordering is defined only for like-typed scalars;
/// see [`cmp_values`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// The string key under which a value is entered into a foreign-key
    /// index, or `None` for values that are never indexed.
    ///
    /// `Int` renders as decimal and `String` is taken raw, so `Int(1)` and
    /// `String("1")` land in the same bucket. Null, Bool, Float, Array and
    /// Object are absent from every index.
    pub fn index_key(&self) -> Option<String> {
        match self {
            Value::Int(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(xs) => Some(xs),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Compare two values for sorting and filtering.
///
/// Only like-typed scalars order: Int–Int, Float–Float, and String–String
/// (lexicographic). Every other pairing, compound values included, yields
/// `Ordering::Equal`, which makes range operators false across type
/// boundaries while leaving structural equality untouched.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(xs) => {
                let mut seq = serializer.serialize_seq(Some(xs.len()))?;
                for x in xs {
                    seq.serialize_element(x)?;
                }
                seq.end()
            }
            Value::Object(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Value, D::Error> {
        d.deserialize_any(ValueVisitor)
    }

    fn visit_bool<E>(self, b: bool) -> Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E>(self, n: i64) -> Result<Value, E> {
        Ok(Value::Int(n))
    }

    fn visit_u64<E: de::Error>(self, n: u64) -> Result<Value, E> {
        i64::try_from(n)
            .map(Value::Int)
            .or_else(|_| Ok(Value::Float(n as f64)))
    }

    fn visit_f64<E>(self, f: f64) -> Result<Value, E> {
        Ok(Value::Float(f))
    }

    fn visit_str<E>(self, s: &str) -> Result<Value, E> {
        Ok(Value::String(s.to_owned()))
    }

    fn visit_string<E>(self, s: String) -> Result<Value, E> {
        Ok(Value::String(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut xs = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(x) = seq.next_element()? {
            xs.push(x);
        }
        Ok(Value::Array(xs))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut m = BTreeMap::new();
        while let Some((k, v)) = map.next_entry::<String, Value>()? {
            m.insert(k, v);
        }
        Ok(Value::Object(m))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn roundtrip(json: &str) -> Value {
        let v: Value = serde_json::from_str(json).unwrap();
        let back = serde_json::to_string(&v).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(json).unwrap(),
            serde_json::from_str::<serde_json::Value>(&back).unwrap(),
        );
        v
    }

    #[test]
    fn json_numbers_keep_their_tag() {
        assert_eq!(roundtrip("42"), Value::Int(42));
        assert_eq!(roundtrip("-3"), Value::Int(-3));
        assert_eq!(roundtrip("2.5"), Value::Float(2.5));
    }

    #[test]
    fn json_compound_roundtrip() {
        let v = roundtrip(r#"{"id":1,"tags":["a","b"],"meta":{"x":null,"ok":true}}"#);
        let obj = v.as_object().unwrap();
        assert_eq!(obj["id"], Value::Int(1));
        assert_eq!(obj["tags"].as_array().unwrap().len(), 2);
        assert!(obj["meta"].as_object().unwrap()["x"].is_null());
    }

    #[test]
    fn ordering_is_partial_across_types() {
        use std::cmp::Ordering::*;
        assert_eq!(cmp_values(&Value::Int(1), &Value::Int(2)), Less);
        assert_eq!(cmp_values(&Value::String("b".into()), &Value::String("a".into())), Greater);
        assert_eq!(cmp_values(&Value::Float(1.5), &Value::Float(1.5)), Equal);
        // Mixed-type comparisons never order.
        assert_eq!(cmp_values(&Value::Int(1), &Value::String("1".into())), Equal);
        assert_eq!(cmp_values(&Value::Int(1), &Value::Float(99.0)), Equal);
        assert_eq!(cmp_values(&Value::Null, &Value::Bool(true)), Equal);
    }

    #[test]
    fn index_keys() {
        assert_eq!(Value::Int(7).index_key().as_deref(), Some("7"));
        assert_eq!(Value::String("7".into()).index_key().as_deref(), Some("7"));
        assert_eq!(Value::Null.index_key(), None);
        assert_eq!(Value::Bool(true).index_key(), None);
        assert_eq!(Value::Float(7.0).index_key(), None);
    }
}
