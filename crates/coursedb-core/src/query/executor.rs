//! Statement execution with bounded retry and error mapping.

use std::thread;

use tracing::{debug, error, warn};

use crate::catalog::Registry;
use crate::config::RetryPolicy;
use crate::error::{Error, Result, StorageError};
use crate::identity::SequenceHandle;
use crate::storage::{RowSet, Statement, Storage};

/// Runs statements against storage on behalf of one entity kind.
///
/// Transient failures are retried with linear backoff; every other storage
/// failure is mapped to a core [`Error`] at once.
pub struct StatementExecutor<'a> {
    storage: &'a dyn Storage,
    registry: &'a Registry,
    retry: &'a RetryPolicy,
}

impl<'a> StatementExecutor<'a> {
    /// Create an executor.
    pub fn new(storage: &'a dyn Storage, registry: &'a Registry, retry: &'a RetryPolicy) -> Self {
        Self {
            storage,
            registry,
            retry,
        }
    }

    /// Execute one statement.
    pub fn run(&self, entity: &str, statement: &Statement) -> Result<RowSet> {
        debug!(
            entity,
            sql = %statement.sql,
            params = statement.params.len(),
            "Executing statement"
        );
        self.with_retry(entity, statement, || self.storage.execute(statement))
    }

    /// Execute statements all-or-nothing.
    pub fn run_atomic(&self, entity: &str, statements: &[Statement]) -> Result<Vec<u64>> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }
        debug!(entity, statements = statements.len(), "Executing atomic batch");
        let batch = Statement::new(
            statements
                .iter()
                .map(|s| s.sql.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            statements.iter().flat_map(|s| s.params.iter().cloned()).collect(),
        );
        self.with_retry(entity, &batch, || self.storage.execute_atomic(statements))
    }

    /// Whether the statement returns any row.
    pub fn has_rows(&self, entity: &str, statement: &Statement) -> Result<bool> {
        Ok(!self.run(entity, statement)?.rows.is_empty())
    }

    /// Open the identity sequence of a concrete kind.
    pub fn begin_sequence(&self, entity: &str) -> Result<SequenceHandle> {
        let context = Statement::new(format!("BEGIN IDENTITY SEQUENCE {}", entity), Vec::new());
        self.with_retry(entity, &context, || self.storage.begin_identity_sequence(entity))
    }

    /// Draw the next id from a sequence.
    pub fn next_identity(&self, entity: &str, handle: &SequenceHandle) -> Result<i64> {
        let context = Statement::new(format!("NEXT IDENTITY {}", handle.name), Vec::new());
        self.with_retry(entity, &context, || self.storage.next_identity(handle))
    }

    fn with_retry<T>(
        &self,
        entity: &str,
        statement: &Statement,
        mut op: impl FnMut() -> std::result::Result<T, StorageError>,
    ) -> Result<T> {
        let attempts = self.retry.attempts();
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        entity,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Storage unavailable, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(self.map_error(entity, statement, e, attempt)),
            }
        }
    }

    fn map_error(&self, entity: &str, statement: &Statement, err: StorageError, attempts: u32) -> Error {
        match err {
            StorageError::Unavailable(message) | StorageError::Closed(message) => {
                Error::StorageUnavailable { attempts, message }
            }
            StorageError::Conflict(message) => Error::ConcurrentModification {
                entity: entity.to_string(),
                message,
            },
            StorageError::Constraint {
                table,
                column,
                message,
            } => {
                let owner = table
                    .as_deref()
                    .and_then(|t| self.registry.entity_for_table(t));
                let field = match (owner, column.as_deref()) {
                    (Some(def), Some(column)) => {
                        def.path_for_column(column).unwrap_or_else(|| column.to_string())
                    }
                    (None, Some(column)) => column.to_string(),
                    (_, None) => "unknown".to_string(),
                };
                Error::ConstraintViolation {
                    entity: owner.map_or_else(|| entity.to_string(), |def| def.name.clone()),
                    field,
                    message,
                }
            }
            StorageError::Malformed(message) => {
                error!(
                    entity,
                    sql = %statement.sql,
                    params = ?statement.params,
                    error = %message,
                    "Storage rejected a planned statement"
                );
                Error::InternalPlan {
                    message,
                    statement: statement.sql.clone(),
                }
            }
        }
    }
}
