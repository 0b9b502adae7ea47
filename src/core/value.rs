use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::core::{Acl, FileRef, GeoPoint, ObjectError, Relation, Result};
use crate::entity::EntityKey;

/// A field value held by an entity.
///
/// Every wire-representable kind has its own variant, so the codec can
/// dispatch exhaustively. Entities are referenced through their arena key,
/// never owned.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(DateTime<Utc>),
    Bytes(Vec<u8>),
    GeoPoint(GeoPoint),
    Acl(Acl),
    Relation(Relation),
    File(FileRef),
    Entity(EntityKey),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Date(_) => "date",
            Self::Bytes(_) => "bytes",
            Self::GeoPoint(_) => "geopoint",
            Self::Acl(_) => "acl",
            Self::Relation(_) => "relation",
            Self::File(_) => "file",
            Self::Entity(_) => "entity",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<EntityKey> {
        match self {
            Self::Entity(key) => Some(*key),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&Relation> {
        match self {
            Self::Relation(rel) => Some(rel),
            _ => None,
        }
    }

    pub fn as_geo_point(&self) -> Option<&GeoPoint> {
        match self {
            Self::GeoPoint(point) => Some(point),
            _ => None,
        }
    }

    pub fn as_acl(&self) -> Option<&Acl> {
        match self {
            Self::Acl(acl) => Some(acl),
            _ => None,
        }
    }

    /// Numeric addition used by `Increment`. Integer stays integer unless
    /// either side is a float. `Null` counts as zero.
    pub fn add_numeric(&self, amount: &Value) -> Result<Value> {
        match (self, amount) {
            (Self::Null, Self::Integer(_) | Self::Float(_)) => Ok(amount.clone()),
            (Self::Integer(a), Self::Integer(b)) => Ok(a
                .checked_add(*b)
                .map(Self::Integer)
                .unwrap_or(Self::Float(*a as f64 + *b as f64))),
            (Self::Integer(_) | Self::Float(_), Self::Integer(_) | Self::Float(_)) => {
                let a = self.as_f64().unwrap_or_default();
                let b = amount.as_f64().unwrap_or_default();
                Ok(Self::Float(a + b))
            }
            _ => Err(ObjectError::TypeMismatch(format!(
                "Cannot increment {} by {}",
                self.type_name(),
                amount.type_name()
            ))),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Integer(i), Self::Float(f)) | (Self::Float(f), Self::Integer(i)) => {
                integer_equals_float(*i, *f)
            }
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::GeoPoint(a), Self::GeoPoint(b)) => a == b,
            (Self::Acl(a), Self::Acl(b)) => a == b,
            (Self::Relation(a), Self::Relation(b)) => a == b,
            (Self::File(a), Self::File(b)) => a == b,
            (Self::Entity(a), Self::Entity(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

/// Exact comparison: the float must be integral and in `i64` range.
fn integer_equals_float(i: i64, f: f64) -> bool {
    const BOUND: f64 = 9_223_372_036_854_775_808.0; // 2^63
    f.fract() == 0.0 && (-BOUND..BOUND).contains(&f) && f as i64 == i
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl From<GeoPoint> for Value {
    fn from(p: GeoPoint) -> Self {
        Self::GeoPoint(p)
    }
}

impl From<Acl> for Value {
    fn from(acl: Acl) -> Self {
        Self::Acl(acl)
    }
}

impl From<EntityKey> for Value {
    fn from(key: EntityKey) -> Self {
        Self::Entity(key)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_equality() {
        assert_eq!(Value::Integer(42), Value::Integer(42));
        assert_eq!(Value::Integer(3), Value::Float(3.0));
        assert_ne!(Value::Text("1".into()), Value::Integer(1));
        assert_eq!(Value::from(vec!["a", "b"]), Value::from(vec!["a", "b"]));
        assert_ne!(Value::Float(1e-20), Value::Float(0.0));
        assert_ne!(Value::Integer(0), Value::Float(1e-20));
        assert_ne!(Value::Integer(i64::MAX), Value::Float(9_223_372_036_854_775_808.0));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn test_add_numeric() {
        let sum = Value::Integer(60).add_numeric(&Value::Integer(10)).unwrap();
        assert_eq!(sum.as_i64(), Some(70));

        let sum = Value::Integer(1).add_numeric(&Value::Float(0.5)).unwrap();
        assert_eq!(sum, Value::Float(1.5));

        let sum = Value::Null.add_numeric(&Value::Integer(5)).unwrap();
        assert_eq!(sum.as_i64(), Some(5));

        let err = Value::Text("x".into()).add_numeric(&Value::Integer(1));
        assert!(matches!(err, Err(ObjectError::TypeMismatch(_))));
    }
}
