//! Relational storage boundary.
//!
//! The core talks to storage through the [`Storage`] trait: statements in
//! the canonical SQL form with positional `?` parameters go in, rows of
//! [`Value`]s come out. [`SqliteStorage`] is the bundled implementation.

pub mod ddl;
pub mod sqlite;

pub use sqlite::SqliteStorage;

use coursedb_proto::Value;

use crate::error::StorageError;
use crate::identity::SequenceHandle;

/// What a statement must affect to be considered successful.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Expect {
    /// Any outcome is fine.
    #[default]
    Any,
    /// At least one row must be affected; zero rows is a conflict.
    AtLeastOne,
    /// The query must return nothing; any row is a constraint failure on
    /// `table.column`.
    NoRows { table: String, column: String },
}

/// A statement with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<Value>,
    /// Affected-row expectation.
    pub expect: Expect,
}

impl Statement {
    /// Create a statement.
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
            expect: Expect::Any,
        }
    }

    /// Require the statement to affect at least one row.
    pub fn expect_rows(mut self) -> Self {
        self.expect = Expect::AtLeastOne;
        self
    }

    /// Turn a query into a guard: returning any row fails the statement (and
    /// its batch) as a constraint violation on `table.column`.
    pub fn reject_rows(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.expect = Expect::NoRows {
            table: table.into(),
            column: column.into(),
        };
        self
    }
}

/// Result of executing one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    /// Result column names.
    pub columns: Vec<String>,
    /// Result rows.
    pub rows: Vec<Vec<Value>>,
    /// Rows affected by a write.
    pub affected: u64,
}

impl RowSet {
    /// Position of a named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// An abstract relational backend.
pub trait Storage: Send + Sync {
    /// Execute one statement.
    fn execute(&self, statement: &Statement) -> Result<RowSet, StorageError>;

    /// Execute statements all-or-nothing, returning affected row counts.
    fn execute_atomic(&self, statements: &[Statement]) -> Result<Vec<u64>, StorageError>;

    /// Open (creating if needed) the identity sequence for a concrete kind.
    fn begin_identity_sequence(&self, kind: &str) -> Result<SequenceHandle, StorageError>;

    /// Draw the next identity from a sequence.
    fn next_identity(&self, handle: &SequenceHandle) -> Result<i64, StorageError>;
}

/// Quote an identifier for the canonical SQL form.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote("orders"), "\"orders\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_statement_expectation() {
        let stmt = Statement::new("UPDATE \"author\" SET \"age\" = ?", vec![Value::Int32(3)]);
        assert_eq!(stmt.expect, Expect::Any);
        assert_eq!(stmt.clone().expect_rows().expect, Expect::AtLeastOne);
        assert_eq!(
            stmt.reject_rows("section", "section_order").expect,
            Expect::NoRows {
                table: "section".into(),
                column: "section_order".into()
            }
        );
    }
}
