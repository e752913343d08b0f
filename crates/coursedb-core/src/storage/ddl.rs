//! Table definitions derived from the registry.

use std::collections::BTreeSet;

use crate::catalog::{EntityDef, IdentityDef, JoinRepr, Registry};

use super::quote;

/// Table holding identity sequences: one row per concrete kind.
pub const ID_GENERATOR_TABLE: &str = "id_generator";

/// `CREATE TABLE` statements for every concrete entity, every join table
/// and the identity sequence table.
pub fn create_table_statements(registry: &Registry) -> Vec<String> {
    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, {} INTEGER NOT NULL)",
        quote(ID_GENERATOR_TABLE),
        quote("id_name"),
        quote("id_value")
    )];

    let mut join_tables = BTreeSet::new();
    for entity in registry.entities() {
        let Some(table) = &entity.table else {
            continue;
        };
        statements.push(entity_table(table, entity));

        for relation in &entity.relations {
            if let JoinRepr::JoinTable {
                table,
                owner_column,
                target_column,
            } = &relation.join
            {
                if join_tables.insert(table.clone()) {
                    statements.push(format!(
                        "CREATE TABLE IF NOT EXISTS {} ({} INTEGER NOT NULL, {} INTEGER NOT NULL, PRIMARY KEY ({}, {}))",
                        quote(table),
                        quote(owner_column),
                        quote(target_column),
                        quote(owner_column),
                        quote(target_column)
                    ));
                }
            }
        }
    }
    statements
}

fn entity_table(table: &str, entity: &EntityDef) -> String {
    let generated = match &entity.identity {
        IdentityDef::Generated(field) => Some(field.as_str()),
        IdentityDef::Composite(_) => None,
    };

    let mut columns = Vec::new();
    for (path, field) in entity.scalar_paths() {
        let mut column = format!("{} {}", quote(&field.column), field.scalar.sql_type());
        if Some(path.as_str()) == generated {
            column.push_str(" PRIMARY KEY");
        } else if !field.nullable {
            column.push_str(" NOT NULL");
        }
        if field.unique {
            column.push_str(" UNIQUE");
        }
        columns.push(column);
    }
    for relation in entity.foreign_keys() {
        if let JoinRepr::ForeignKey {
            column,
            discriminator,
        } = &relation.join
        {
            if let Some(discriminator) = discriminator {
                columns.push(format!("{} TEXT", quote(discriminator)));
            }
            columns.push(format!("{} INTEGER", quote(column)));
        }
    }
    if generated.is_none() {
        let key: Vec<String> = entity.identity_columns().into_iter().map(quote).collect();
        columns.push(format!("PRIMARY KEY ({})", key.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(table),
        columns.join(", ")
    )
}
