//! SQLite storage backend.

use coursedb_proto::Value;
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, InterruptHandle};
use tracing::{debug, info};

use crate::catalog::Registry;
use crate::config::SqliteConfig;
use crate::error::StorageError;
use crate::identity::SequenceHandle;

use super::ddl::{create_table_statements, ID_GENERATOR_TABLE};
use super::{quote, Expect, RowSet, Statement, Storage};

/// SQLite-backed [`Storage`].
///
/// The connection sits behind a mutex, so statements are serialized. A
/// running statement is cancelled through [`interrupt`](Self::interrupt),
/// which never takes that mutex. After [`close`](Self::close) every call
/// fails with [`StorageError::Closed`].
pub struct SqliteStorage {
    conn: Mutex<Option<Connection>>,
    interrupt: InterruptHandle,
}

impl SqliteStorage {
    /// Open a database as described by `config`.
    pub fn open(config: &SqliteConfig) -> Result<Self, StorageError> {
        let conn = match &config.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(classify)?;
        conn.busy_timeout(config.busy_timeout).map_err(classify)?;

        // Case-insensitive comparisons lowercase with Unicode rules; the
        // built-in lower() only folds ASCII.
        conn.create_scalar_function(
            "lower",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let text: Option<String> = ctx.get(0)?;
                Ok(text.map(|s| s.to_lowercase()))
            },
        )
        .map_err(classify)?;
        // LIKE must respect case; case-insensitive matching goes through lower().
        conn.execute_batch("PRAGMA case_sensitive_like = ON")
            .map_err(classify)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, {} INTEGER NOT NULL)",
            quote(ID_GENERATOR_TABLE),
            quote("id_name"),
            quote("id_value")
        ))
        .map_err(classify)?;

        info!(path = ?config.path, "Opened SQLite storage");
        Ok(Self {
            interrupt: conn.get_interrupt_handle(),
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::open(&SqliteConfig::in_memory())
    }

    /// Create tables for every entity in the registry.
    pub fn create_schema(&self, registry: &Registry) -> Result<(), StorageError> {
        let guard = self.conn.lock();
        let conn = connection(&guard)?;
        for ddl in create_table_statements(registry) {
            debug!(sql = %ddl, "Creating table");
            conn.execute_batch(&ddl).map_err(classify)?;
        }
        Ok(())
    }

    /// Handle that interrupts a running statement from another thread.
    ///
    /// Obtained when the storage is opened; usable while a statement holds
    /// the connection and a no-op once the storage is closed.
    pub fn interrupt_handle(&self) -> &InterruptHandle {
        &self.interrupt
    }

    /// Abort the statement currently running, if any. It fails with `Closed`.
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    /// Close the connection, interrupting a running statement first. Later
    /// calls fail with `Closed`.
    pub fn close(&self) -> Result<(), StorageError> {
        self.interrupt();
        match self.conn.lock().take() {
            Some(conn) => conn.close().map_err(|(_, e)| classify(e)),
            None => Ok(()),
        }
    }
}

impl Storage for SqliteStorage {
    fn execute(&self, statement: &Statement) -> Result<RowSet, StorageError> {
        let guard = self.conn.lock();
        run(connection(&guard)?, statement)
    }

    fn execute_atomic(&self, statements: &[Statement]) -> Result<Vec<u64>, StorageError> {
        let mut guard = self.conn.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| StorageError::Closed("connection closed".to_string()))?;
        let tx = conn.transaction().map_err(classify)?;
        let mut affected = Vec::with_capacity(statements.len());
        for statement in statements {
            affected.push(run(&tx, statement)?.affected);
        }
        tx.commit().map_err(classify)?;
        Ok(affected)
    }

    fn begin_identity_sequence(&self, kind: &str) -> Result<SequenceHandle, StorageError> {
        let guard = self.conn.lock();
        let conn = connection(&guard)?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, 0)",
                quote(ID_GENERATOR_TABLE),
                quote("id_name"),
                quote("id_value")
            ),
            [kind],
        )
        .map_err(classify)?;
        Ok(SequenceHandle::new(kind))
    }

    fn next_identity(&self, handle: &SequenceHandle) -> Result<i64, StorageError> {
        let guard = self.conn.lock();
        let conn = connection(&guard)?;
        let sql = format!(
            "UPDATE {} SET {v} = {v} + 1 WHERE {} = ?1 RETURNING {v}",
            quote(ID_GENERATOR_TABLE),
            quote("id_name"),
            v = quote("id_value")
        );
        match conn.query_row(&sql, [&handle.name], |row| row.get::<_, i64>(0)) {
            Ok(id) => Ok(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StorageError::Malformed(format!(
                "identity sequence '{}' was never started",
                handle.name
            ))),
            Err(e) => Err(classify(e)),
        }
    }
}

fn connection<'a>(guard: &'a Option<Connection>) -> Result<&'a Connection, StorageError> {
    guard
        .as_ref()
        .ok_or_else(|| StorageError::Closed("connection closed".to_string()))
}

fn run(conn: &Connection, statement: &Statement) -> Result<RowSet, StorageError> {
    let mut stmt = conn.prepare(&statement.sql).map_err(classify)?;
    let params = params_from_iter(statement.params.iter().map(to_sql));

    let result = if stmt.column_count() == 0 {
        let affected = stmt.execute(params).map_err(classify)? as u64;
        RowSet {
            affected,
            ..RowSet::default()
        }
    } else {
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = stmt.query(params).map_err(classify)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(classify)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sql(row.get_ref(i).map_err(classify)?)?);
            }
            out.push(values);
        }
        RowSet {
            columns,
            affected: out.len() as u64,
            rows: out,
        }
    };

    match &statement.expect {
        Expect::AtLeastOne if result.affected == 0 => Err(StorageError::Conflict(format!(
            "statement affected no rows: {}",
            statement.sql
        ))),
        Expect::NoRows { table, column } if !result.rows.is_empty() => {
            Err(StorageError::Constraint {
                table: Some(table.clone()),
                column: Some(column.clone()),
                message: format!("guard constraint failed: {}.{}", table, column),
            })
        }
        _ => Ok(result),
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int32(i) => SqlValue::Integer(i64::from(*i)),
        Value::Int64(i) | Value::Timestamp(i) => SqlValue::Integer(*i),
        Value::Float64(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Result<Value, StorageError> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(i) => Ok(Value::Int64(i)),
        ValueRef::Real(f) => Ok(Value::Float64(f)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| Value::String(s.to_string()))
            .map_err(|e| StorageError::Malformed(format!("invalid utf-8 in text column: {}", e))),
        ValueRef::Blob(_) => Err(StorageError::Malformed(
            "blob columns are not supported".to_string(),
        )),
    }
}

/// Classify a rusqlite error for the executor.
fn classify(err: rusqlite::Error) -> StorageError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let message = message.clone().unwrap_or_else(|| err.to_string());
            match failure.code {
                ErrorCode::ConstraintViolation => {
                    let (table, column) = constraint_target(&message);
                    StorageError::Constraint {
                        table,
                        column,
                        message,
                    }
                }
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen
                | ErrorCode::FileLockingProtocolFailed
                | ErrorCode::DiskFull
                | ErrorCode::OutOfMemory => StorageError::Unavailable(message),
                ErrorCode::OperationInterrupted | ErrorCode::OperationAborted => {
                    StorageError::Closed(message)
                }
                _ => StorageError::Malformed(message),
            }
        }
        _ => StorageError::Malformed(err.to_string()),
    }
}

/// Extract `(table, column)` from messages such as
/// `UNIQUE constraint failed: author.email`.
fn constraint_target(message: &str) -> (Option<String>, Option<String>) {
    let Some((_, target)) = message.split_once("failed: ") else {
        return (None, None);
    };
    let first = target.split(',').next().unwrap_or(target).trim();
    match first.split_once('.') {
        Some((table, column)) => (Some(table.to_string()), Some(column.to_string())),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn storage_with_table() -> SqliteStorage {
        let storage = SqliteStorage::in_memory().unwrap();
        storage
            .execute(&Statement::new(
                "CREATE TABLE \"author\" (\"id\" INTEGER PRIMARY KEY, \"email\" TEXT NOT NULL UNIQUE)",
                vec![],
            ))
            .unwrap();
        storage
    }

    #[test]
    fn test_roundtrip_rows() {
        let storage = storage_with_table();
        let insert = Statement::new(
            "INSERT INTO \"author\" (\"id\", \"email\") VALUES (?, ?)",
            vec![Value::Int64(1), Value::from("a@example.com")],
        );
        assert_eq!(storage.execute(&insert).unwrap().affected, 1);

        let rows = storage
            .execute(&Statement::new("SELECT \"id\", \"email\" FROM \"author\"", vec![]))
            .unwrap();
        assert_eq!(rows.columns, vec!["id", "email"]);
        assert_eq!(rows.rows, vec![vec![Value::Int64(1), Value::from("a@example.com")]]);
        assert_eq!(rows.column_index("email"), Some(1));
    }

    #[test]
    fn test_unique_violation_is_classified() {
        let storage = storage_with_table();
        let insert = |id: i64| {
            Statement::new(
                "INSERT INTO \"author\" (\"id\", \"email\") VALUES (?, ?)",
                vec![Value::Int64(id), Value::from("dup@example.com")],
            )
        };
        storage.execute(&insert(1)).unwrap();

        match storage.execute(&insert(2)) {
            Err(StorageError::Constraint { table, column, .. }) => {
                assert_eq!(table.as_deref(), Some("author"));
                assert_eq!(column.as_deref(), Some("email"));
            }
            other => panic!("expected constraint error, got {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_is_malformed() {
        let storage = storage_with_table();
        let err = storage
            .execute(&Statement::new("SELEC 1", vec![]))
            .unwrap_err();
        assert!(matches!(err, StorageError::Malformed(_)), "{:?}", err);
    }

    #[test]
    fn test_expect_rows_reports_conflict() {
        let storage = storage_with_table();
        let update = Statement::new(
            "UPDATE \"author\" SET \"email\" = ? WHERE \"id\" = ?",
            vec![Value::from("x@example.com"), Value::Int64(99)],
        )
        .expect_rows();
        assert!(matches!(storage.execute(&update), Err(StorageError::Conflict(_))));
    }

    #[test]
    fn test_atomic_batch_rolls_back() {
        let storage = storage_with_table();
        let batch = vec![
            Statement::new(
                "INSERT INTO \"author\" (\"id\", \"email\") VALUES (?, ?)",
                vec![Value::Int64(1), Value::from("one@example.com")],
            ),
            Statement::new(
                "UPDATE \"author\" SET \"email\" = ? WHERE \"id\" = ?",
                vec![Value::from("x@example.com"), Value::Int64(42)],
            )
            .expect_rows(),
        ];
        assert!(storage.execute_atomic(&batch).is_err());

        let rows = storage
            .execute(&Statement::new("SELECT COUNT(*) FROM \"author\"", vec![]))
            .unwrap();
        assert_eq!(rows.rows[0][0], Value::Int64(0));
    }

    #[test]
    fn test_identity_sequences_are_independent() {
        let storage = SqliteStorage::in_memory().unwrap();
        let video = storage.begin_identity_sequence("Video").unwrap();
        let text = storage.begin_identity_sequence("Text").unwrap();

        assert_eq!(storage.next_identity(&video).unwrap(), 1);
        assert_eq!(storage.next_identity(&video).unwrap(), 2);
        assert_eq!(storage.next_identity(&text).unwrap(), 1);

        // Re-opening a sequence keeps its position.
        let again = storage.begin_identity_sequence("Video").unwrap();
        assert_eq!(storage.next_identity(&again).unwrap(), 3);
    }

    #[test]
    fn test_unicode_lower_and_case_sensitive_like() {
        let storage = SqliteStorage::in_memory().unwrap();
        let rows = storage
            .execute(&Statement::new(
                "SELECT lower(?), ? LIKE ?",
                vec![Value::from("ÄRGER"), Value::from("Mehul"), Value::from("meh%")],
            ))
            .unwrap();
        assert_eq!(rows.rows[0], vec![Value::from("ärger"), Value::Int64(0)]);
    }

    #[test]
    fn test_closed_storage_fails_fast() {
        let storage = SqliteStorage::in_memory().unwrap();
        storage.close().unwrap();

        let err = storage
            .execute(&Statement::new("SELECT 1", vec![]))
            .unwrap_err();
        assert!(matches!(err, StorageError::Closed(_)));
        // Interrupting a closed storage does nothing.
        storage.interrupt();
        storage.interrupt_handle().interrupt();
    }

    #[test]
    fn test_interrupt_aborts_running_statement() {
        let storage = Arc::new(SqliteStorage::in_memory().unwrap());
        let worker = {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                storage.execute(&Statement::new(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                     SELECT COUNT(*) FROM c",
                    vec![],
                ))
            })
        };

        // The statement may not have started yet; keep interrupting.
        while !worker.is_finished() {
            storage.interrupt();
            thread::sleep(Duration::from_millis(10));
        }
        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, StorageError::Closed(_)), "{:?}", err);

        // The connection stays usable afterwards.
        let rows = storage.execute(&Statement::new("SELECT 1", vec![])).unwrap();
        assert_eq!(rows.rows, vec![vec![Value::Int64(1)]]);
    }

    #[test]
    fn test_close_interrupts_running_statement() {
        let storage = Arc::new(SqliteStorage::in_memory().unwrap());
        let worker = {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                storage.execute(&Statement::new(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                     SELECT COUNT(*) FROM c",
                    vec![],
                ))
            })
        };

        while !worker.is_finished() {
            thread::sleep(Duration::from_millis(10));
            storage.close().unwrap();
        }
        assert!(worker.join().unwrap().is_err());
        assert!(matches!(
            storage.execute(&Statement::new("SELECT 1", vec![])),
            Err(StorageError::Closed(_))
        ));
    }

    #[test]
    fn test_constraint_target_parsing() {
        assert_eq!(
            constraint_target("UNIQUE constraint failed: author.email"),
            (Some("author".to_string()), Some("email".to_string()))
        );
        assert_eq!(
            constraint_target("UNIQUE constraint failed: orders.username, orders.order_date"),
            (Some("orders".to_string()), Some("username".to_string()))
        );
        assert_eq!(constraint_target("CHECK constraint failed: positive"), (None, None));
    }
}
