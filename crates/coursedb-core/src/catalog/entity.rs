//! Entity definitions.

use super::field::FieldDef;
use super::relation::RelationDef;

/// An embedded value object: fields stored inline in the owner's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedDef {
    /// Name used as a path segment (`address`, `id`).
    pub name: String,
    /// Component fields, stored as columns of the owner's table.
    pub fields: Vec<FieldDef>,
    /// Whether the whole object may be absent (all columns null).
    pub nullable: bool,
}

impl EmbeddedDef {
    /// Create a required embedded object.
    pub fn new(name: impl Into<String>, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields: fields.into_iter().collect(),
            nullable: false,
        }
    }

    /// Create an optional embedded object. Its columns become nullable.
    pub fn optional(name: impl Into<String>, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        let fields = fields
            .into_iter()
            .map(|f| FieldDef {
                nullable: true,
                ..f
            })
            .collect();
        Self {
            name: name.into(),
            fields,
            nullable: true,
        }
    }

    /// Get a component field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Identity strategy of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityDef {
    /// Single integer field assigned from an identity sequence on first save.
    Generated(String),
    /// Ordered component fields of the named embedded object.
    Composite(String),
}

/// Uniqueness of a field among rows sharing the same foreign-key target.
///
/// Checked by the core on save; storage does not enforce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueWithin {
    /// Scalar field path.
    pub field: String,
    /// Owning foreign-key relation that scopes the uniqueness.
    pub scope: String,
}

/// Inheritance strategy of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InheritanceDef {
    /// Not part of a hierarchy (or a concrete subtype).
    #[default]
    None,
    /// Abstract base; each listed subtype has its own complete table.
    TablePerClass { subtypes: Vec<String> },
}

/// An entity definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDef {
    /// Entity name (unique within the registry).
    pub name: String,
    /// Backing table; `None` for abstract bases.
    pub table: Option<String>,
    /// Scalar fields.
    pub fields: Vec<FieldDef>,
    /// Embedded value objects.
    pub embedded: Vec<EmbeddedDef>,
    /// Relations declared on (or inherited by) this entity.
    pub relations: Vec<RelationDef>,
    /// Identity strategy.
    pub identity: IdentityDef,
    /// Inheritance strategy.
    pub inheritance: InheritanceDef,
    /// Abstract base this entity extends.
    pub parent: Option<String>,
    /// Scoped uniqueness rules.
    pub unique_within: Vec<UniqueWithin>,
}

impl EntityDef {
    /// Create a concrete entity stored in `table`, identified by a generated
    /// `id` field.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: Some(table.into()),
            fields: Vec::new(),
            embedded: Vec::new(),
            relations: Vec::new(),
            identity: IdentityDef::Generated("id".to_string()),
            inheritance: InheritanceDef::None,
            parent: None,
            unique_within: Vec::new(),
        }
    }

    /// Create an abstract table-per-class base with the given subtypes.
    pub fn abstract_base<S: Into<String>>(
        name: impl Into<String>,
        subtypes: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            table: None,
            inheritance: InheritanceDef::TablePerClass {
                subtypes: subtypes.into_iter().map(Into::into).collect(),
            },
            ..Self::new(name, String::new())
        }
    }

    /// Add a field.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Add an embedded value object.
    pub fn with_embedded(mut self, embedded: EmbeddedDef) -> Self {
        self.embedded.push(embedded);
        self
    }

    /// Add a relation.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Set the identity strategy.
    pub fn with_identity(mut self, identity: IdentityDef) -> Self {
        self.identity = identity;
        self
    }

    /// Require `field` to be unique among rows referencing the same
    /// target through `scope`.
    pub fn with_unique_within(mut self, field: impl Into<String>, scope: impl Into<String>) -> Self {
        self.unique_within.push(UniqueWithin {
            field: field.into(),
            scope: scope.into(),
        });
        self
    }

    /// Declare this entity a concrete subtype of `parent`.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Get a scalar field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Get an embedded object by name.
    pub fn get_embedded(&self, name: &str) -> Option<&EmbeddedDef> {
        self.embedded.iter().find(|e| e.name == name)
    }

    /// Get a relation by name.
    pub fn get_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Whether this is an abstract base without its own table.
    pub fn is_abstract(&self) -> bool {
        matches!(self.inheritance, InheritanceDef::TablePerClass { .. })
    }

    /// Concrete subtypes of an abstract base; empty for concrete entities.
    pub fn subtypes(&self) -> &[String] {
        match &self.inheritance {
            InheritanceDef::TablePerClass { subtypes } => subtypes,
            InheritanceDef::None => &[],
        }
    }

    /// Whether this entity's identity is composite.
    pub fn has_composite_identity(&self) -> bool {
        matches!(self.identity, IdentityDef::Composite(_))
    }

    /// Resolve a scalar path: `field` or `embedded.field`.
    pub fn resolve_scalar(&self, path: &str) -> Option<&FieldDef> {
        match path.split_once('.') {
            None => self.get_field(path),
            Some((embedded, field)) => self.get_embedded(embedded)?.get_field(field),
        }
    }

    /// Every stored scalar with its path, in declaration order: fields
    /// first, then embedded components.
    pub fn scalar_paths(&self) -> Vec<(String, &FieldDef)> {
        let mut out: Vec<(String, &FieldDef)> =
            self.fields.iter().map(|f| (f.name.clone(), f)).collect();
        for embedded in &self.embedded {
            for field in &embedded.fields {
                out.push((format!("{}.{}", embedded.name, field.name), field));
            }
        }
        out
    }

    /// Identity scalars with their paths, in key order.
    pub fn identity_paths(&self) -> Vec<(String, &FieldDef)> {
        match &self.identity {
            IdentityDef::Generated(field) => self
                .get_field(field)
                .map(|f| vec![(f.name.clone(), f)])
                .unwrap_or_default(),
            IdentityDef::Composite(embedded) => self
                .get_embedded(embedded)
                .map(|e| {
                    e.fields
                        .iter()
                        .map(|f| (format!("{}.{}", e.name, f.name), f))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Identity columns in key order.
    pub fn identity_columns(&self) -> Vec<&str> {
        self.identity_paths()
            .into_iter()
            .map(|(_, f)| f.column.as_str())
            .collect()
    }

    /// Owning foreign-key relations stored in this entity's table.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &RelationDef> {
        self.relations.iter().filter(|r| r.fk_column().is_some())
    }

    /// Map a column back to the field path it stores.
    pub fn path_for_column(&self, column: &str) -> Option<String> {
        if let Some((path, _)) = self
            .scalar_paths()
            .into_iter()
            .find(|(_, f)| f.column == column)
        {
            return Some(path);
        }
        self.relations
            .iter()
            .find(|r| r.fk_column() == Some(column) || r.discriminator() == Some(column))
            .map(|r| r.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ScalarType;

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
            .with_field(FieldDef::new("orderInfo", ScalarType::String))
            .with_embedded(EmbeddedDef::optional(
                "address",
                [
                    FieldDef::new("streetName", ScalarType::String),
                    FieldDef::new("houseNo", ScalarType::String),
                ],
            ))
    }

    #[test]
    fn test_entity_builder() {
        let entity = EntityDef::new("Author", "author")
            .with_field(FieldDef::new("id", ScalarType::Int64))
            .with_field(FieldDef::new("email", ScalarType::String).unique())
            .with_relation(RelationDef::inverse(
                "courses",
                crate::catalog::Cardinality::ManyToMany,
                "Course",
                "authors",
            ));

        assert_eq!(entity.table.as_deref(), Some("author"));
        assert_eq!(entity.fields.len(), 2);
        assert!(entity.get_relation("courses").is_some());
        assert!(!entity.is_abstract());
        assert_eq!(entity.identity_columns(), vec!["id"]);
    }

    #[test]
    fn test_composite_identity_paths() {
        let entity = order();
        let paths: Vec<String> = entity.identity_paths().into_iter().map(|(p, _)| p).collect();

        assert_eq!(paths, vec!["id.username", "id.orderDate"]);
        assert_eq!(entity.identity_columns(), vec!["username", "order_date"]);
        assert!(entity.has_composite_identity());
    }

    #[test]
    fn test_resolve_scalar_paths() {
        let entity = order();

        assert_eq!(
            entity.resolve_scalar("address.streetName").map(|f| f.column.as_str()),
            Some("street_name")
        );
        assert!(entity.resolve_scalar("address.streetName").map(|f| f.nullable).unwrap_or(false));
        assert!(entity.resolve_scalar("address.zip").is_none());
        assert!(entity.resolve_scalar("orderInfo").is_some());
        assert_eq!(entity.path_for_column("house_no").as_deref(), Some("address.houseNo"));
    }

    #[test]
    fn test_abstract_base() {
        let base = EntityDef::abstract_base("Resources", ["Video", "Text", "File"]);

        assert!(base.is_abstract());
        assert_eq!(base.table, None);
        assert_eq!(base.subtypes(), ["Video", "Text", "File"]);
    }
}
