//! Relation definitions between entities.

/// Cardinality of a relation, seen from the entity declaring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// One-to-one relation.
    OneToOne,
    /// One-to-many relation (foreign key lives on the many side).
    OneToMany,
    /// Many-to-one relation (foreign key lives on this side).
    ManyToOne,
    /// Many-to-many relation (backed by a join table).
    ManyToMany,
}

impl Cardinality {
    /// Whether the relation yields a collection on this side.
    pub fn is_collection(&self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }

    /// Cardinality the other side of a bidirectional relation must declare.
    pub fn inverse(&self) -> Cardinality {
        match self {
            Cardinality::OneToOne => Cardinality::OneToOne,
            Cardinality::OneToMany => Cardinality::ManyToOne,
            Cardinality::ManyToOne => Cardinality::OneToMany,
            Cardinality::ManyToMany => Cardinality::ManyToMany,
        }
    }
}

/// How a relation is physically represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinRepr {
    /// Foreign key column on the declaring entity's table.
    ///
    /// Polymorphic targets (abstract base types) also need a discriminator
    /// column holding the concrete subtype name, since ids may repeat
    /// across subtype tables.
    ForeignKey {
        column: String,
        discriminator: Option<String>,
    },
    /// Join table linking the declaring entity to the target.
    JoinTable {
        table: String,
        owner_column: String,
        target_column: String,
    },
    /// Inverse side; the named relation on the target owns the association.
    MappedBy(String),
}

/// A relation declared on an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    /// Relation name, used as a path segment.
    pub name: String,
    /// Cardinality from the declaring side.
    pub cardinality: Cardinality,
    /// Target entity name.
    pub target: String,
    /// Physical representation.
    pub join: JoinRepr,
}

impl RelationDef {
    fn foreign_key(
        name: impl Into<String>,
        cardinality: Cardinality,
        target: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cardinality,
            target: target.into(),
            join: JoinRepr::ForeignKey {
                column: column.into(),
                discriminator: None,
            },
        }
    }

    /// Create an owning many-to-one relation stored in `column`.
    pub fn many_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self::foreign_key(name, Cardinality::ManyToOne, target, column)
    }

    /// Create an owning one-to-one relation stored in `column`.
    pub fn one_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self::foreign_key(name, Cardinality::OneToOne, target, column)
    }

    /// Create an owning many-to-many relation backed by a join table.
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        table: impl Into<String>,
        owner_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::ManyToMany,
            target: target.into(),
            join: JoinRepr::JoinTable {
                table: table.into(),
                owner_column: owner_column.into(),
                target_column: target_column.into(),
            },
        }
    }

    /// Create an inverse relation owned by `mapped_by` on the target.
    pub fn inverse(
        name: impl Into<String>,
        cardinality: Cardinality,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cardinality,
            target: target.into(),
            join: JoinRepr::MappedBy(mapped_by.into()),
        }
    }

    /// Add a discriminator column to a foreign-key relation.
    pub fn with_discriminator(mut self, column: impl Into<String>) -> Self {
        if let JoinRepr::ForeignKey { discriminator, .. } = &mut self.join {
            *discriminator = Some(column.into());
        }
        self
    }

    /// Whether this side stores the association.
    pub fn is_owning(&self) -> bool {
        !matches!(self.join, JoinRepr::MappedBy(_))
    }

    /// Whether the relation yields a collection.
    pub fn is_collection(&self) -> bool {
        self.cardinality.is_collection()
    }

    /// Name of the owning relation on the target, for inverse sides.
    pub fn mapped_by(&self) -> Option<&str> {
        match &self.join {
            JoinRepr::MappedBy(owner) => Some(owner),
            _ => None,
        }
    }

    /// Foreign key column, for foreign-key relations.
    pub fn fk_column(&self) -> Option<&str> {
        match &self.join {
            JoinRepr::ForeignKey { column, .. } => Some(column),
            _ => None,
        }
    }

    /// Discriminator column, for polymorphic foreign keys.
    pub fn discriminator(&self) -> Option<&str> {
        match &self.join {
            JoinRepr::ForeignKey { discriminator, .. } => discriminator.as_deref(),
            _ => None,
        }
    }
}
