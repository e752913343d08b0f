//! Core type definitions for the registry.

use coursedb_proto::Value;

/// Scalar data types a field can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// UTF-8 string.
    String,
    /// Naive timestamp (microseconds since Unix epoch).
    Timestamp,
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ScalarType::Int32 | ScalarType::Int64)
    }

    /// Check if this type is a string type.
    pub fn is_string(&self) -> bool {
        matches!(self, ScalarType::String)
    }

    /// Check if values of this type have a total order usable in ranges.
    pub fn is_ordered(&self) -> bool {
        !matches!(self, ScalarType::Bool)
    }

    /// Column type used when creating tables.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ScalarType::String => "TEXT",
            ScalarType::Bool | ScalarType::Int32 | ScalarType::Int64 | ScalarType::Timestamp => {
                "INTEGER"
            }
        }
    }

    /// Check whether an operand value can be compared against this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ScalarType::Bool, Value::Bool(_)) => true,
            (ScalarType::Int32 | ScalarType::Int64, Value::Int32(_) | Value::Int64(_)) => true,
            (ScalarType::Int32 | ScalarType::Int64, Value::Float64(_)) => true,
            (ScalarType::String, Value::String(_)) => true,
            (ScalarType::Timestamp, Value::Timestamp(_)) => true,
            _ => false,
        }
    }

    /// Check whether a value can be written to a column of this type.
    ///
    /// Stricter than [`accepts`](Self::accepts): integer columns take only
    /// integers that fit, since anything else would not read back.
    pub fn stores(&self, value: &Value) -> bool {
        match (self, value) {
            (ScalarType::Int32, Value::Int64(i)) => i32::try_from(*i).is_ok(),
            (ScalarType::Int32 | ScalarType::Int64, Value::Float64(_)) => false,
            _ => self.accepts(value),
        }
    }

    /// Normalize a value read back from storage into this declared type.
    ///
    /// Storage returns integers for booleans, 32-bit ints and timestamps;
    /// this restores the declared variant.
    pub fn decode(&self, value: Value) -> Result<Value, String> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (ScalarType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ScalarType::Bool, Value::Int64(i)) => Ok(Value::Bool(i != 0)),
            (ScalarType::Int32, Value::Int32(i)) => Ok(Value::Int32(i)),
            (ScalarType::Int32, Value::Int64(i)) => i32::try_from(i)
                .map(Value::Int32)
                .map_err(|_| format!("{} does not fit in int32", i)),
            (ScalarType::Int64, Value::Int64(i)) => Ok(Value::Int64(i)),
            (ScalarType::Int64, Value::Int32(i)) => Ok(Value::Int64(i as i64)),
            (ScalarType::String, Value::String(s)) => Ok(Value::String(s)),
            (ScalarType::Timestamp, Value::Timestamp(t)) => Ok(Value::Timestamp(t)),
            (ScalarType::Timestamp, Value::Int64(t)) => Ok(Value::Timestamp(t)),
            (ty, other) => Err(format!(
                "expected {:?}, storage returned {}",
                ty,
                other.type_name()
            )),
        }
    }
}
