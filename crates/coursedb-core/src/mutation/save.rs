//! Insert and update of one entity with its owned associations.

use std::collections::HashSet;

use coursedb_proto::Value;
use dashmap::DashMap;
use tracing::debug;

use crate::catalog::{Cardinality, EntityDef, IdentityDef, JoinRepr, Registry};
use crate::error::{Error, Result};
use crate::identity::{EntityKey, Identity, SequenceHandle};
use crate::model::Record;
use crate::query::StatementExecutor;
use crate::storage::{quote, Statement};

use super::{key_clause, table_of};

/// Saves records.
///
/// New simple-id entities draw their id from the identity sequence of their
/// concrete kind; handles are cached in `sequences`. Composite-keyed
/// entities are inserted or updated depending on whether the key exists.
pub struct SaveExecutor<'a> {
    registry: &'a Registry,
    executor: &'a StatementExecutor<'a>,
    sequences: &'a DashMap<String, SequenceHandle>,
}

impl<'a> SaveExecutor<'a> {
    /// Create a save executor.
    pub fn new(
        registry: &'a Registry,
        executor: &'a StatementExecutor<'a>,
        sequences: &'a DashMap<String, SequenceHandle>,
    ) -> Self {
        Self {
            registry,
            executor,
            sequences,
        }
    }

    /// Save a record and return its identity.
    pub fn save(&self, record: &Record) -> Result<Identity> {
        let entity = self.registry.describe(&record.kind)?;
        if entity.is_abstract() {
            return Err(Error::AbstractEntity(entity.name.clone()));
        }
        self.check_record(entity, record)?;

        let existing = match (&record.identity, &entity.identity) {
            (None, IdentityDef::Generated(_)) => None,
            (None, IdentityDef::Composite(_)) => {
                return Err(Error::InvalidData(format!(
                    "{} requires its full key before save",
                    entity.name
                )))
            }
            (Some(identity), _) => {
                identity.check_shape(entity)?;
                Some(identity)
            }
        };

        let (identity, insert) = match existing {
            None => (Identity::Simple(self.allocate(entity)?), true),
            Some(identity) if entity.has_composite_identity() => {
                (identity.clone(), !self.exists(entity, identity)?)
            }
            Some(identity) => (identity.clone(), false),
        };

        let mut statements = vec![if insert {
            self.insert(entity, record, &identity)?
        } else {
            self.update(entity, record, &identity)?
        }];
        statements.extend(self.unique_within_guards(entity, record, &identity)?);
        statements.extend(self.one_to_one_guards(entity, record, &identity)?);
        statements.extend(self.link_statements(entity, record, &identity)?);

        debug!(
            entity = %entity.name,
            identity = %identity,
            insert,
            statements = statements.len(),
            "Saving entity"
        );
        self.executor.run_atomic(&entity.name, &statements)?;
        Ok(identity)
    }

    fn check_record(&self, entity: &EntityDef, record: &Record) -> Result<()> {
        let key_paths: Vec<String> = entity.identity_paths().into_iter().map(|(p, _)| p).collect();
        for (path, value) in &record.fields {
            let field = entity
                .resolve_scalar(path)
                .ok_or_else(|| Error::unknown_field(&entity.name, path, path))?;
            if key_paths.contains(path) {
                return Err(Error::InvalidData(format!(
                    "{}.{} is part of the identity",
                    entity.name, path
                )));
            }
            if !field.scalar.stores(value) {
                return Err(Error::InvalidData(format!(
                    "{}.{} expects {:?}, got {}",
                    entity.name,
                    path,
                    field.scalar,
                    value.type_name()
                )));
            }
        }

        for (name, target) in &record.refs {
            let relation = entity
                .get_relation(name)
                .filter(|r| r.fk_column().is_some())
                .ok_or_else(|| {
                    Error::InvalidData(format!(
                        "{}.{} is not an owning foreign key",
                        entity.name, name
                    ))
                })?;
            if let Some(key) = target {
                let concrete = self
                    .registry
                    .get(&key.kind)
                    .is_some_and(|t| !t.is_abstract());
                if !concrete
                    || !self.registry.is_a(&key.kind, &relation.target)
                    || key.identity.as_simple().is_none()
                {
                    return Err(Error::InvalidData(format!(
                        "{}.{} cannot reference {}",
                        entity.name, name, key
                    )));
                }
            }
        }

        for (name, targets) in &record.links {
            let joined = entity
                .get_relation(name)
                .is_some_and(|r| matches!(r.join, JoinRepr::JoinTable { .. }));
            if !joined {
                return Err(Error::InvalidData(format!(
                    "{}.{} is not an owning join-table association",
                    entity.name, name
                )));
            }
            if targets.iter().any(|t| t.as_simple().is_none()) {
                return Err(Error::InvalidData(format!(
                    "{}.{} holds a non-simple identity",
                    entity.name, name
                )));
            }
        }
        Ok(())
    }

    /// Guards failing the batch when another row in the same scope already
    /// holds the value of a unique-within field.
    fn unique_within_guards(
        &self,
        entity: &EntityDef,
        record: &Record,
        identity: &Identity,
    ) -> Result<Vec<Statement>> {
        let mut guards = Vec::new();
        for rule in &entity.unique_within {
            let value = match record.fields.get(&rule.field) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };
            let Some(scope) = record.refs.get(&rule.scope).and_then(Option::as_ref) else {
                continue;
            };
            let (Some(field), Some(relation)) = (
                entity.resolve_scalar(&rule.field),
                entity.get_relation(&rule.scope),
            ) else {
                continue;
            };

            let mut conditions = vec![format!("{} = ?", quote(&field.column))];
            let mut params = vec![value.clone()];
            push_reference(&mut conditions, &mut params, relation.fk_column(), None, scope);
            guards.push(self.guard(entity, &field.column, conditions, params, identity)?);
        }
        Ok(guards)
    }

    /// Guards failing the batch when the target of a one-to-one reference is
    /// already claimed by another row.
    fn one_to_one_guards(
        &self,
        entity: &EntityDef,
        record: &Record,
        identity: &Identity,
    ) -> Result<Vec<Statement>> {
        let mut guards = Vec::new();
        for relation in entity.foreign_keys() {
            if relation.cardinality != Cardinality::OneToOne {
                continue;
            }
            let (Some(target), Some(column)) = (
                record.refs.get(&relation.name).and_then(Option::as_ref),
                relation.fk_column(),
            ) else {
                continue;
            };
            let mut conditions = Vec::new();
            let mut params = Vec::new();
            push_reference(
                &mut conditions,
                &mut params,
                Some(column),
                relation.discriminator(),
                target,
            );
            guards.push(self.guard(entity, column, conditions, params, identity)?);
        }
        Ok(guards)
    }

    /// `SELECT 1` over rows other than `identity` matching `conditions`; any
    /// row is a constraint failure on `column`.
    ///
    /// Guards run after the write inside the same transaction, so a
    /// conflicting row committed by another writer is seen.
    fn guard(
        &self,
        entity: &EntityDef,
        column: &str,
        mut conditions: Vec<String>,
        mut params: Vec<Value>,
        identity: &Identity,
    ) -> Result<Statement> {
        let table = table_of(entity)?;
        let (clause, key) = key_clause(entity, identity);
        conditions.push(format!("NOT ({})", clause));
        params.extend(key);
        Ok(Statement::new(
            format!(
                "SELECT 1 FROM {} WHERE {} LIMIT 1",
                quote(table),
                conditions.join(" AND ")
            ),
            params,
        )
        .reject_rows(table, column))
    }

    fn exists(&self, entity: &EntityDef, identity: &Identity) -> Result<bool> {
        let (clause, params) = key_clause(entity, identity);
        let statement = Statement::new(
            format!(
                "SELECT 1 FROM {} WHERE {} LIMIT 1",
                quote(table_of(entity)?),
                clause
            ),
            params,
        );
        self.executor.has_rows(&entity.name, &statement)
    }

    fn allocate(&self, entity: &EntityDef) -> Result<i64> {
        let cached = self.sequences.get(&entity.name).map(|h| h.value().clone());
        let handle = match cached {
            Some(handle) => handle,
            None => {
                let handle = self.executor.begin_sequence(&entity.name)?;
                self.sequences.insert(entity.name.clone(), handle.clone());
                handle
            }
        };
        self.executor.next_identity(&entity.name, &handle)
    }

    fn insert(&self, entity: &EntityDef, record: &Record, identity: &Identity) -> Result<Statement> {
        let (columns, params): (Vec<String>, Vec<Value>) = row_values(entity, record, identity)
            .into_iter()
            .map(|(column, value)| (quote(&column), value))
            .unzip();
        let placeholders = vec!["?"; columns.len()].join(", ");
        Ok(Statement::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(table_of(entity)?),
                columns.join(", "),
                placeholders
            ),
            params,
        ))
    }

    fn update(&self, entity: &EntityDef, record: &Record, identity: &Identity) -> Result<Statement> {
        let key_columns = entity.identity_columns();
        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (column, value) in row_values(entity, record, identity) {
            if key_columns.contains(&column.as_str()) {
                continue;
            }
            assignments.push(format!("{} = ?", quote(&column)));
            params.push(value);
        }
        let (clause, key) = key_clause(entity, identity);
        params.extend(key);
        Ok(Statement::new(
            format!(
                "UPDATE {} SET {} WHERE {}",
                quote(table_of(entity)?),
                assignments.join(", "),
                clause
            ),
            params,
        )
        .expect_rows())
    }

    fn link_statements(
        &self,
        entity: &EntityDef,
        record: &Record,
        identity: &Identity,
    ) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        if record.links.is_empty() {
            return Ok(statements);
        }
        let owner = identity.as_simple().ok_or_else(|| {
            Error::InvalidData(format!("{} {} owns join rows without a simple id", entity.name, identity))
        })?;
        for (name, targets) in &record.links {
            let Some(JoinRepr::JoinTable {
                table,
                owner_column,
                target_column,
            }) = entity.get_relation(name).map(|r| &r.join)
            else {
                continue;
            };
            statements.push(Statement::new(
                format!("DELETE FROM {} WHERE {} = ?", quote(table), quote(owner_column)),
                vec![Value::Int64(owner)],
            ));
            let mut seen = HashSet::new();
            for target in targets.iter().filter_map(Identity::as_simple) {
                if !seen.insert(target) {
                    continue;
                }
                statements.push(Statement::new(
                    format!(
                        "INSERT INTO {} ({}, {}) VALUES (?, ?)",
                        quote(table),
                        quote(owner_column),
                        quote(target_column)
                    ),
                    vec![Value::Int64(owner), Value::Int64(target)],
                ));
            }
        }
        Ok(statements)
    }
}

/// Every stored column with its value, in table order.
fn row_values(entity: &EntityDef, record: &Record, identity: &Identity) -> Vec<(String, Value)> {
    let key_paths = entity.identity_paths();
    let key_values = identity.values();
    let mut out = Vec::new();
    for (path, field) in entity.scalar_paths() {
        let value = match key_paths.iter().position(|(p, _)| *p == path) {
            Some(i) => key_values.get(i).cloned().unwrap_or(Value::Null),
            None => record.fields.get(&path).cloned().unwrap_or(Value::Null),
        };
        out.push((field.column.clone(), value));
    }
    for relation in entity.foreign_keys() {
        let target = record.refs.get(&relation.name).and_then(Option::as_ref);
        if let Some(discriminator) = relation.discriminator() {
            let kind = target.map_or(Value::Null, |t| Value::from(t.kind.as_str()));
            out.push((discriminator.to_string(), kind));
        }
        if let Some(column) = relation.fk_column() {
            let id = target
                .and_then(|t| t.identity.as_simple())
                .map_or(Value::Null, Value::Int64);
            out.push((column.to_string(), id));
        }
    }
    out
}

fn push_reference(
    conditions: &mut Vec<String>,
    params: &mut Vec<Value>,
    column: Option<&str>,
    discriminator: Option<&str>,
    target: &EntityKey,
) {
    if let Some(column) = column {
        conditions.push(format!("{} = ?", quote(column)));
        params.push(target.identity.as_simple().map_or(Value::Null, Value::Int64));
    }
    if let Some(discriminator) = discriminator {
        conditions.push(format!("{} = ?", quote(discriminator)));
        params.push(Value::from(target.kind.as_str()));
    }
}
