//! Write path: saves and deletes.
//!
//! Saves check the core-enforced constraints (scoped uniqueness, one-to-one
//! exclusivity) and then write the row and its join-table associations in a
//! single atomic batch. Deletes remove join rows on both sides, clear
//! foreign keys pointing at the row and then remove the row itself.

mod cascade;
mod save;

pub use cascade::CascadeExecutor;
pub use save::SaveExecutor;

use coursedb_proto::Value;

use crate::catalog::EntityDef;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::storage::quote;

/// Backing table of a concrete entity.
fn table_of(entity: &EntityDef) -> Result<&str> {
    entity
        .table
        .as_deref()
        .ok_or_else(|| Error::AbstractEntity(entity.name.clone()))
}

/// `WHERE` clause matching one row by identity.
fn key_clause(entity: &EntityDef, identity: &Identity) -> (String, Vec<Value>) {
    let clause = entity
        .identity_columns()
        .into_iter()
        .map(|c| format!("{} = ?", quote(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    (clause, identity.values())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{schema, Entity, OrderId};
    use chrono::NaiveDate;

    #[test]
    fn test_key_clause_for_composite_identity() {
        let registry = schema::course_catalog().unwrap();
        let order = registry.describe("Order").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let (clause, params) = key_clause(order, &OrderId::new("mehul", date).identity());
        assert_eq!(clause, "\"username\" = ? AND \"order_date\" = ?");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], Value::from("mehul"));
    }

    #[test]
    fn test_abstract_entity_has_no_table() {
        let registry = schema::course_catalog().unwrap();
        let base = registry.describe(crate::model::Resource::KIND).unwrap();
        assert!(matches!(table_of(base), Err(Error::AbstractEntity(_))));
    }
}
