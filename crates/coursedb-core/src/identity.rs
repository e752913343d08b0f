//! Entity identity values, identity sequences and subtype tags.

use std::fmt;

use chrono::NaiveDateTime;
use coursedb_proto::Value;
use serde::Serialize;

use crate::catalog::{EntityDef, ScalarType};
use crate::error::{Error, Result};

/// One component of a composite identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum KeyPart {
    Int(i64),
    Str(String),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
}

impl KeyPart {
    /// Convert a value into a key part of the declared type.
    pub fn from_value(scalar: ScalarType, value: &Value) -> Option<KeyPart> {
        match scalar {
            ScalarType::Int32 | ScalarType::Int64 => value.as_i64().map(KeyPart::Int),
            ScalarType::String => value.as_str().map(|s| KeyPart::Str(s.to_string())),
            ScalarType::Timestamp => value.as_timestamp().map(KeyPart::Timestamp),
            ScalarType::Bool => None,
        }
    }

    /// Convert back into a value for binding.
    pub fn to_value(&self) -> Value {
        match self {
            KeyPart::Int(i) => Value::Int64(*i),
            KeyPart::Str(s) => Value::String(s.clone()),
            KeyPart::Timestamp(t) => Value::Timestamp(*t),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}

impl From<i64> for KeyPart {
    fn from(i: i64) -> Self {
        KeyPart::Int(i)
    }
}

impl From<NaiveDateTime> for KeyPart {
    fn from(dt: NaiveDateTime) -> Self {
        KeyPart::Timestamp(dt.and_utc().timestamp_micros())
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(i) => write!(f, "{}", i),
            KeyPart::Str(s) => write!(f, "{:?}", s),
            KeyPart::Timestamp(t) => match Value::Timestamp(*t).as_datetime() {
                Some(dt) => write!(f, "{}", dt),
                None => write!(f, "@{}", t),
            },
        }
    }
}

/// Identity of one entity row.
///
/// Equality and hashing cover the full ordered tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Identity {
    /// Generated integer id.
    Simple(i64),
    /// Ordered composite key.
    Composite(Vec<KeyPart>),
}

impl Identity {
    /// Read an identity out of values given in key order.
    ///
    /// Returns `Ok(None)` when every component is null (no row).
    pub fn from_values(entity: &EntityDef, values: &[Value]) -> Result<Option<Identity>> {
        if values.iter().all(Value::is_null) {
            return Ok(None);
        }
        let paths = entity.identity_paths();
        if paths.len() != values.len() {
            return Err(Error::InvalidData(format!(
                "{} identity expects {} component(s), got {}",
                entity.name,
                paths.len(),
                values.len()
            )));
        }
        let mut parts = Vec::with_capacity(values.len());
        for ((path, field), value) in paths.iter().zip(values) {
            let part = KeyPart::from_value(field.scalar, value).ok_or_else(|| {
                Error::InvalidData(format!(
                    "{}.{} is not a valid identity component: {:?}",
                    entity.name, path, value
                ))
            })?;
            parts.push(part);
        }
        if entity.has_composite_identity() {
            return Ok(Some(Identity::Composite(parts)));
        }
        match parts.pop() {
            Some(KeyPart::Int(id)) => Ok(Some(Identity::Simple(id))),
            other => Err(Error::InvalidData(format!(
                "{} has a non-integer generated id: {:?}",
                entity.name, other
            ))),
        }
    }

    /// Identity components as bindable values, in key order.
    pub fn values(&self) -> Vec<Value> {
        match self {
            Identity::Simple(id) => vec![Value::Int64(*id)],
            Identity::Composite(parts) => parts.iter().map(KeyPart::to_value).collect(),
        }
    }

    /// The generated id, for simple identities.
    pub fn as_simple(&self) -> Option<i64> {
        match self {
            Identity::Simple(id) => Some(*id),
            Identity::Composite(_) => None,
        }
    }

    /// Check that the identity shape matches the entity's declaration.
    pub fn check_shape(&self, entity: &EntityDef) -> Result<()> {
        let expected = entity.identity_paths().len();
        let ok = match self {
            Identity::Simple(_) => !entity.has_composite_identity(),
            Identity::Composite(parts) => {
                entity.has_composite_identity() && parts.len() == expected
            }
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidData(format!(
                "identity {} does not match the key of {}",
                self, entity.name
            )))
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Simple(id) => write!(f, "{}", id),
            Identity::Composite(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", part)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Row identity across a hierarchy: concrete kind plus identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityKey {
    /// Concrete entity kind.
    pub kind: String,
    /// Identity within that kind.
    pub identity: Identity,
}

impl EntityKey {
    /// Create a key.
    pub fn new(kind: impl Into<String>, identity: Identity) -> Self {
        Self {
            kind: kind.into(),
            identity,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.identity)
    }
}

/// Handle to an identity sequence in storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceHandle {
    /// Sequence name (the concrete entity's table).
    pub name: String,
}

impl SequenceHandle {
    /// Create a handle for the named sequence.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Concrete subtype of a row that belongs to an inheritance hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubtypeTag {
    /// Abstract base type.
    pub base: String,
    /// Concrete subtype the row was read from.
    pub subtype: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EmbeddedDef, FieldDef, IdentityDef};
    use chrono::NaiveDate;
    use std::collections::HashSet;

    fn order() -> EntityDef {
        EntityDef::new("Order", "orders")
            .with_identity(IdentityDef::Composite("id".into()))
            .with_embedded(EmbeddedDef::new(
                "id",
                [
                    FieldDef::new("username", ScalarType::String),
                    FieldDef::new("orderDate", ScalarType::Timestamp),
                ],
            ))
    }

    fn date() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_composite_identity_from_values() {
        let entity = order();
        let identity = Identity::from_values(
            &entity,
            &[Value::from("mehul"), Value::from(date())],
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            identity,
            Identity::Composite(vec![KeyPart::from("mehul"), KeyPart::from(date())])
        );
        assert_eq!(identity.to_string(), "(\"mehul\", 2024-03-01 09:30:00)");
        assert!(identity.check_shape(&entity).is_ok());
        assert!(Identity::Simple(1).check_shape(&entity).is_err());
    }

    #[test]
    fn test_all_null_is_absent() {
        let entity = order();
        assert_eq!(
            Identity::from_values(&entity, &[Value::Null, Value::Null]).unwrap(),
            None
        );
    }

    #[test]
    fn test_simple_identity() {
        let entity = EntityDef::new("Author", "author")
            .with_field(FieldDef::new("id", ScalarType::Int64));
        let identity = Identity::from_values(&entity, &[Value::Int64(7)])
            .unwrap()
            .unwrap();

        assert_eq!(identity, Identity::Simple(7));
        assert_eq!(identity.values(), vec![Value::Int64(7)]);
        assert_eq!(identity.as_simple(), Some(7));
    }

    #[test]
    fn test_keys_distinguish_subtypes() {
        let mut keys = HashSet::new();
        keys.insert(EntityKey::new("Video", Identity::Simple(1)));
        keys.insert(EntityKey::new("Text", Identity::Simple(1)));
        keys.insert(EntityKey::new("Video", Identity::Simple(1)));

        assert_eq!(keys.len(), 2);
        assert_eq!(EntityKey::new("Text", Identity::Simple(1)).to_string(), "Text#1");
    }
}
