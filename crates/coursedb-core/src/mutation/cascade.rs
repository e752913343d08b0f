//! Delete with association cleanup.

use coursedb_proto::Value;
use tracing::debug;

use crate::catalog::{JoinRepr, Registry};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::query::StatementExecutor;
use crate::storage::{quote, Statement};

use super::{key_clause, table_of};

/// Deletes one row and cleans up what pointed at it.
///
/// Join-table rows on either side are removed and foreign keys referencing
/// the row are cleared. Entities on the other side are never deleted.
pub struct CascadeExecutor<'a> {
    registry: &'a Registry,
    executor: &'a StatementExecutor<'a>,
}

impl<'a> CascadeExecutor<'a> {
    /// Create a cascade executor.
    pub fn new(registry: &'a Registry, executor: &'a StatementExecutor<'a>) -> Self {
        Self { registry, executor }
    }

    /// Delete the row of `kind` with `identity`.
    pub fn delete(&self, kind: &str, identity: &Identity) -> Result<()> {
        let entity = self.registry.describe(kind)?;
        if entity.is_abstract() {
            return Err(Error::AbstractEntity(entity.name.clone()));
        }
        identity.check_shape(entity)?;
        let table = table_of(entity)?;
        let (clause, key) = key_clause(entity, identity);

        let lookup = Statement::new(
            format!("SELECT 1 FROM {} WHERE {} LIMIT 1", quote(table), clause),
            key.clone(),
        );
        if !self.executor.has_rows(&entity.name, &lookup)? {
            return Err(Error::NotFound {
                entity: entity.name.clone(),
                identity: identity.to_string(),
            });
        }

        let mut statements = Vec::new();
        if let Some(id) = identity.as_simple() {
            for relation in &entity.relations {
                if let JoinRepr::JoinTable {
                    table,
                    owner_column,
                    ..
                } = &relation.join
                {
                    statements.push(Statement::new(
                        format!("DELETE FROM {} WHERE {} = ?", quote(table), quote(owner_column)),
                        vec![Value::Int64(id)],
                    ));
                }
            }

            for (owner, relation) in self.registry.referencing(&entity.name) {
                match &relation.join {
                    JoinRepr::JoinTable {
                        table,
                        target_column,
                        ..
                    } => statements.push(Statement::new(
                        format!("DELETE FROM {} WHERE {} = ?", quote(table), quote(target_column)),
                        vec![Value::Int64(id)],
                    )),
                    JoinRepr::ForeignKey {
                        column,
                        discriminator,
                    } => {
                        let mut assignments = vec![format!("{} = NULL", quote(column))];
                        let mut conditions = vec![format!("{} = ?", quote(column))];
                        let mut params = vec![Value::Int64(id)];
                        if let Some(discriminator) = discriminator {
                            assignments.push(format!("{} = NULL", quote(discriminator)));
                            conditions.push(format!("{} = ?", quote(discriminator)));
                            params.push(Value::from(entity.name.as_str()));
                        }
                        statements.push(Statement::new(
                            format!(
                                "UPDATE {} SET {} WHERE {}",
                                quote(table_of(owner)?),
                                assignments.join(", "),
                                conditions.join(" AND ")
                            ),
                            params,
                        ));
                    }
                    JoinRepr::MappedBy(_) => {}
                }
            }
        }

        statements.push(
            Statement::new(
                format!("DELETE FROM {} WHERE {}", quote(table), clause),
                key,
            )
            .expect_rows(),
        );

        debug!(
            entity = %entity.name,
            identity = %identity,
            statements = statements.len(),
            "Deleting entity"
        );
        self.executor.run_atomic(&entity.name, &statements)?;
        Ok(())
    }
}
