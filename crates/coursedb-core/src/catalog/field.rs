//! Field definitions for entities.

use super::types::ScalarType;

/// A field definition within an entity or embedded value object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name as used in query paths (camelCase).
    pub name: String,
    /// Backing column name.
    pub column: String,
    /// Declared scalar type.
    pub scalar: ScalarType,
    /// Whether the column may hold null.
    pub nullable: bool,
    /// Whether storage enforces uniqueness of the column.
    pub unique: bool,
}

impl FieldDef {
    /// Create a new required field. The column defaults to the snake_case
    /// form of the name.
    pub fn new(name: impl Into<String>, scalar: ScalarType) -> Self {
        let name = name.into();
        Self {
            column: column_name(&name),
            name,
            scalar,
            nullable: false,
            unique: false,
        }
    }

    /// Create an optional (nullable) field.
    pub fn optional(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, scalar)
        }
    }

    /// Override the column name.
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Mark the column unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Convert a camelCase field name to its snake_case column name.
fn column_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
