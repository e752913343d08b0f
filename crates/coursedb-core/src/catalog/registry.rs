//! Registry of validated entity definitions.

use std::collections::HashMap;

use super::entity::{EntityDef, IdentityDef, InheritanceDef};
use super::relation::{JoinRepr, RelationDef};
use crate::error::{Error, Result};

/// Immutable registry of entity definitions.
///
/// Concrete subtypes are stored flattened: they carry their parent's
/// fields, embedded objects, relations and identity, so every lookup on a
/// subtype sees the complete row shape of its table.
#[derive(Debug, Clone)]
pub struct Registry {
    entities: HashMap<String, EntityDef>,
    order: Vec<String>,
}

impl Registry {
    /// Build and validate a registry from declarations.
    pub fn build(decls: impl IntoIterator<Item = EntityDef>) -> Result<Self> {
        let mut declared: HashMap<String, EntityDef> = HashMap::new();
        let mut order = Vec::new();
        for decl in decls {
            if declared.contains_key(&decl.name) {
                return Err(schema_error(format!("duplicate entity '{}'", decl.name)));
            }
            order.push(decl.name.clone());
            declared.insert(decl.name.clone(), decl);
        }

        let mut entities = HashMap::with_capacity(declared.len());
        for name in &order {
            let decl = &declared[name];
            let entity = match &decl.parent {
                None => decl.clone(),
                Some(parent) => flatten(decl, parent, &declared)?,
            };
            entities.insert(name.clone(), entity);
        }

        let registry = Self { entities, order };
        for name in &registry.order {
            registry.validate(&registry.entities[name])?;
        }
        Ok(registry)
    }

    /// Describe an entity kind.
    pub fn describe(&self, kind: &str) -> Result<&EntityDef> {
        self.entities
            .get(kind)
            .ok_or_else(|| Error::UnknownEntity(kind.to_string()))
    }

    /// Get an entity by name.
    pub fn get(&self, kind: &str) -> Option<&EntityDef> {
        self.entities.get(kind)
    }

    /// Iterate entities in declaration order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.order.iter().filter_map(|name| self.entities.get(name))
    }

    /// Concrete kinds a query on `kind` covers: its subtypes for an abstract
    /// base, otherwise the entity itself.
    pub fn concrete_kinds(&self, kind: &str) -> Result<Vec<&EntityDef>> {
        let entity = self.describe(kind)?;
        if entity.is_abstract() {
            entity.subtypes().iter().map(|s| self.describe(s)).collect()
        } else {
            Ok(vec![entity])
        }
    }

    /// Whether `kind` is `ancestor` or one of its subtypes.
    pub fn is_a(&self, kind: &str, ancestor: &str) -> bool {
        kind == ancestor
            || self
                .entities
                .get(kind)
                .and_then(|e| e.parent.as_deref())
                .is_some_and(|parent| parent == ancestor)
    }

    /// Resolve a relation to its owning side.
    ///
    /// Returns the entity storing the association and its owning relation.
    /// For an owning relation this is `(owner, relation)` unchanged; for a
    /// mapped-by relation it is the target entity and the relation it names.
    pub fn owning_side<'a>(
        &'a self,
        owner: &'a EntityDef,
        relation: &'a RelationDef,
    ) -> Result<(&'a EntityDef, &'a RelationDef)> {
        match &relation.join {
            JoinRepr::MappedBy(mapped_by) => {
                let target = self.describe(&relation.target)?;
                let owning = target.get_relation(mapped_by).ok_or_else(|| {
                    schema_error(format!(
                        "{}.{} is mapped by unknown relation {}.{}",
                        owner.name, relation.name, target.name, mapped_by
                    ))
                })?;
                Ok((target, owning))
            }
            _ => Ok((owner, relation)),
        }
    }

    /// Owning relations of concrete entities that point at `kind` or at its
    /// abstract parent.
    pub fn referencing(&self, kind: &str) -> Vec<(&EntityDef, &RelationDef)> {
        self.entities()
            .filter(|e| !e.is_abstract())
            .flat_map(|e| e.relations.iter().map(move |r| (e, r)))
            .filter(|(_, r)| r.is_owning() && self.is_a(kind, &r.target))
            .collect()
    }

    /// Find the entity stored in `table`.
    pub fn entity_for_table(&self, table: &str) -> Option<&EntityDef> {
        self.entities().find(|e| e.table.as_deref() == Some(table))
    }

    fn validate(&self, entity: &EntityDef) -> Result<()> {
        let name = &entity.name;

        match &entity.identity {
            IdentityDef::Generated(field) => match entity.get_field(field) {
                Some(f) if f.scalar.is_numeric() => {}
                Some(_) => {
                    return Err(schema_error(format!(
                        "{}: generated identity '{}' must be an integer",
                        name, field
                    )))
                }
                None => {
                    return Err(schema_error(format!(
                        "{}: identity field '{}' is not declared",
                        name, field
                    )))
                }
            },
            IdentityDef::Composite(embedded) => match entity.get_embedded(embedded) {
                Some(e) if !e.fields.is_empty() && !e.nullable => {}
                _ => {
                    return Err(schema_error(format!(
                        "{}: composite identity '{}' must be a required embedded object",
                        name, embedded
                    )))
                }
            },
        }

        let mut seen = std::collections::HashSet::new();
        let names = entity
            .fields
            .iter()
            .map(|f| &f.name)
            .chain(entity.embedded.iter().map(|e| &e.name))
            .chain(entity.relations.iter().map(|r| &r.name));
        for member in names {
            if !seen.insert(member) {
                return Err(schema_error(format!("{}: duplicate member '{}'", name, member)));
            }
        }

        match &entity.inheritance {
            InheritanceDef::None if entity.table.is_none() => {
                return Err(schema_error(format!("{}: concrete entity has no table", name)));
            }
            InheritanceDef::TablePerClass { subtypes } => {
                if subtypes.is_empty() {
                    return Err(schema_error(format!("{}: abstract entity has no subtypes", name)));
                }
                for subtype in subtypes {
                    let declared = self.entities.get(subtype).ok_or_else(|| {
                        schema_error(format!("{}: unknown subtype '{}'", name, subtype))
                    })?;
                    if declared.parent.as_deref() != Some(name.as_str()) {
                        return Err(schema_error(format!(
                            "{}: subtype '{}' does not extend it",
                            name, subtype
                        )));
                    }
                }
            }
            InheritanceDef::None => {}
        }

        for relation in &entity.relations {
            self.validate_relation(entity, relation)?;
        }

        for rule in &entity.unique_within {
            if entity.resolve_scalar(&rule.field).is_none() {
                return Err(schema_error(format!(
                    "{}: unique-within rule names unknown field '{}'",
                    name, rule.field
                )));
            }
            let scoped = entity
                .get_relation(&rule.scope)
                .is_some_and(|r| r.fk_column().is_some());
            if !scoped {
                return Err(schema_error(format!(
                    "{}: unique-within scope '{}' is not a foreign key",
                    name, rule.scope
                )));
            }
        }
        Ok(())
    }

    fn validate_relation(&self, entity: &EntityDef, relation: &RelationDef) -> Result<()> {
        let target = self.entities.get(&relation.target).ok_or_else(|| {
            schema_error(format!(
                "{}.{}: unknown target '{}'",
                entity.name, relation.name, relation.target
            ))
        })?;

        match &relation.join {
            JoinRepr::ForeignKey { discriminator, .. } => {
                if relation.is_collection() {
                    return Err(schema_error(format!(
                        "{}.{}: foreign keys cannot hold collections",
                        entity.name, relation.name
                    )));
                }
                if target.has_composite_identity() {
                    return Err(schema_error(format!(
                        "{}.{}: foreign key to composite-keyed '{}'",
                        entity.name, relation.name, target.name
                    )));
                }
                if target.is_abstract() && discriminator.is_none() {
                    return Err(schema_error(format!(
                        "{}.{}: polymorphic target '{}' needs a discriminator column",
                        entity.name, relation.name, target.name
                    )));
                }
            }
            JoinRepr::JoinTable { .. } => {
                if target.has_composite_identity() || entity.has_composite_identity() {
                    return Err(schema_error(format!(
                        "{}.{}: join tables need simple identities",
                        entity.name, relation.name
                    )));
                }
            }
            JoinRepr::MappedBy(mapped_by) => {
                let owning = target.get_relation(mapped_by).ok_or_else(|| {
                    schema_error(format!(
                        "{}.{}: mapped by unknown relation {}.{}",
                        entity.name, relation.name, target.name, mapped_by
                    ))
                })?;
                if !owning.is_owning() {
                    return Err(schema_error(format!(
                        "{}.{}: mapped by non-owning relation {}.{}",
                        entity.name, relation.name, target.name, mapped_by
                    )));
                }
                if !self.is_a(&entity.name, &owning.target) {
                    return Err(schema_error(format!(
                        "{}.{}: {}.{} does not target '{}'",
                        entity.name, relation.name, target.name, mapped_by, entity.name
                    )));
                }
                if owning.cardinality != relation.cardinality.inverse() {
                    return Err(schema_error(format!(
                        "{}.{}: cardinality does not mirror {}.{}",
                        entity.name, relation.name, target.name, mapped_by
                    )));
                }
            }
        }
        Ok(())
    }
}

fn flatten(
    decl: &EntityDef,
    parent: &str,
    declared: &HashMap<String, EntityDef>,
) -> Result<EntityDef> {
    let base = declared
        .get(parent)
        .ok_or_else(|| schema_error(format!("{}: unknown parent '{}'", decl.name, parent)))?;
    if !base.is_abstract() {
        return Err(schema_error(format!(
            "{}: parent '{}' is not an abstract base",
            decl.name, parent
        )));
    }
    if base.parent.is_some() {
        return Err(schema_error(format!(
            "{}: nested hierarchies are not supported",
            decl.name
        )));
    }
    if decl.table.is_none() {
        return Err(schema_error(format!("{}: concrete subtype has no table", decl.name)));
    }

    let mut entity = decl.clone();
    entity.fields = base.fields.iter().chain(&decl.fields).cloned().collect();
    entity.embedded = base.embedded.iter().chain(&decl.embedded).cloned().collect();
    entity.relations = base.relations.iter().chain(&decl.relations).cloned().collect();
    entity.identity = base.identity.clone();
    entity.unique_within = base
        .unique_within
        .iter()
        .chain(&decl.unique_within)
        .cloned()
        .collect();
    entity.inheritance = InheritanceDef::None;
    Ok(entity)
}

fn schema_error(message: String) -> Error {
    Error::SchemaDescription(message)
}
