//! Database connections used by the schema editor.
//!
//! The engine talks to a database through the synchronous [`Connection`]
//! trait. [`SqliteConnection`] drives a real `SQLite` database via
//! `rusqlite`; [`RecordingConnection`] records statements without executing
//! them, which is how PostgreSQL DDL is rendered and inspected.

use std::collections::HashMap;
use std::path::Path;

use strata_core::{DatabaseSettings, MigrationError, MigrationResult};

use crate::schema_editor::Dialect;

/// A synchronous database connection.
pub trait Connection {
    /// The SQL dialect this connection speaks.
    fn dialect(&self) -> Dialect;

    /// Whether DDL statements can be rolled back inside a transaction.
    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    /// Executes one or more statements.
    fn execute(&mut self, sql: &str) -> MigrationResult<()>;

    /// Runs a query and returns every row as text columns.
    fn query(&mut self, sql: &str) -> MigrationResult<Vec<Vec<String>>>;

    fn begin(&mut self) -> MigrationResult<()> {
        self.execute("BEGIN")
    }

    fn commit(&mut self) -> MigrationResult<()> {
        self.execute("COMMIT")
    }

    fn rollback(&mut self) -> MigrationResult<()> {
        self.execute("ROLLBACK")
    }
}

/// Opens a connection described by the database settings.
///
/// Only `SQLite` ships with a driver; other engines are rejected with
/// [`MigrationError::Configuration`].
pub fn connect(settings: &DatabaseSettings) -> MigrationResult<Box<dyn Connection>> {
    match Dialect::from_engine(&settings.engine)? {
        Dialect::Sqlite => Ok(Box::new(SqliteConnection::open(&settings.name)?)),
        Dialect::Postgres => Err(MigrationError::Configuration(format!(
            "No driver is available for engine '{}'",
            settings.engine
        ))),
    }
}

// ── SQLite ───────────────────────────────────────────────────────────────

/// A `SQLite` connection backed by `rusqlite`.
///
/// Foreign key enforcement stays off so that table remakes can drop and
/// recreate tables that other tables reference.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Opens a database file, or an in-memory database for `:memory:`.
    pub fn open(path: impl AsRef<Path>) -> MigrationResult<Self> {
        let path = path.as_ref();
        let conn = if path.to_str() == Some(":memory:") {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(path)
        }
        .map_err(|e| MigrationError::database("SQLite open failed", e))?;
        Ok(Self { conn })
    }

    /// Opens a fresh in-memory database.
    pub fn memory() -> MigrationResult<Self> {
        Self::open(":memory:")
    }

    /// Returns the underlying `rusqlite` connection.
    pub const fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }

    /// Returns the column names of a table, in order.
    pub fn table_columns(&mut self, table: &str) -> MigrationResult<Vec<String>> {
        let sql = format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\""));
        Ok(self
            .query(&sql)?
            .into_iter()
            .filter_map(|row| row.into_iter().nth(1))
            .collect())
    }

    /// Returns `true` if a table with this name exists.
    pub fn table_exists(&mut self, table: &str) -> MigrationResult<bool> {
        let sql = format!(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = '{}'",
            table.replace('\'', "''")
        );
        Ok(!self.query(&sql)?.is_empty())
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str) -> MigrationResult<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| MigrationError::database(format!("Failed to execute: {sql}"), e))
    }

    fn query(&mut self, sql: &str) -> MigrationResult<Vec<Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| MigrationError::database(format!("Failed to prepare: {sql}"), e))?;
        let count = stmt.column_count();
        let rows = stmt
            .query_map([], |row| {
                (0..count)
                    .map(|i| row.get_ref(i).map(value_to_text))
                    .collect::<Result<Vec<_>, _>>()
            })
            .map_err(|e| MigrationError::database(format!("Failed to query: {sql}"), e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| MigrationError::database(format!("Failed to read row: {sql}"), e))
    }
}

fn value_to_text(value: rusqlite::types::ValueRef<'_>) -> String {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(v) => v.to_string(),
        ValueRef::Real(v) => v.to_string(),
        ValueRef::Text(b) => String::from_utf8_lossy(b).into_owned(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

// ── Recording ────────────────────────────────────────────────────────────

/// A connection that records statements instead of executing them.
///
/// Statements run inside a transaction are held as pending until commit and
/// discarded on rollback. Failures can be injected with
/// [`RecordingConnection::fail_on`].
///
/// # Examples
///
/// ```
/// use strata_migrations::connection::{Connection, RecordingConnection};
/// use strata_migrations::schema_editor::Dialect;
///
/// let mut conn = RecordingConnection::new(Dialect::Postgres);
/// conn.begin().unwrap();
/// conn.execute("CREATE TABLE t (id int)").unwrap();
/// conn.rollback().unwrap();
/// assert!(conn.executed().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct RecordingConnection {
    dialect: Dialect,
    transactional_ddl: bool,
    in_transaction: bool,
    committed: Vec<String>,
    pending: Vec<String>,
    fail_on: Vec<String>,
    query_results: HashMap<String, Vec<Vec<String>>>,
    commits: usize,
    rollbacks: usize,
}

impl RecordingConnection {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            transactional_ddl: true,
            in_transaction: false,
            committed: Vec::new(),
            pending: Vec::new(),
            fail_on: Vec::new(),
            query_results: HashMap::new(),
            commits: 0,
            rollbacks: 0,
        }
    }

    /// Makes the connection report no transactional DDL support.
    pub fn without_transactional_ddl(mut self) -> Self {
        self.transactional_ddl = false;
        self
    }

    /// Fails any statement containing `fragment`.
    pub fn fail_on(mut self, fragment: impl Into<String>) -> Self {
        self.fail_on.push(fragment.into());
        self
    }

    /// Sets the rows returned for an exact query string.
    pub fn with_query_result(mut self, sql: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        self.query_results.insert(sql.into(), rows);
        self
    }

    /// Statements that took effect: run outside a transaction or committed.
    pub fn executed(&self) -> &[String] {
        &self.committed
    }

    pub const fn commits(&self) -> usize {
        self.commits
    }

    pub const fn rollbacks(&self) -> usize {
        self.rollbacks
    }

    pub const fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl Connection for RecordingConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn supports_transactional_ddl(&self) -> bool {
        self.transactional_ddl
    }

    fn execute(&mut self, sql: &str) -> MigrationResult<()> {
        if let Some(fragment) = self.fail_on.iter().find(|f| sql.contains(f.as_str())) {
            return Err(MigrationError::database_message(format!(
                "Injected failure on '{fragment}': {sql}"
            )));
        }
        if self.in_transaction {
            self.pending.push(sql.to_string());
        } else {
            self.committed.push(sql.to_string());
        }
        Ok(())
    }

    fn query(&mut self, sql: &str) -> MigrationResult<Vec<Vec<String>>> {
        Ok(self.query_results.get(sql).cloned().unwrap_or_default())
    }

    fn begin(&mut self) -> MigrationResult<()> {
        if self.in_transaction {
            return Err(MigrationError::database_message(
                "Cannot begin: a transaction is already open",
            ));
        }
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> MigrationResult<()> {
        if !self.in_transaction {
            return Err(MigrationError::database_message(
                "Cannot commit: no transaction is open",
            ));
        }
        self.committed.append(&mut self.pending);
        self.in_transaction = false;
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> MigrationResult<()> {
        self.pending.clear();
        self.in_transaction = false;
        self.rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_memory_execute_and_query() {
        let mut conn = SqliteConnection::memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT); INSERT INTO t VALUES (1, 'a')")
            .unwrap();
        let rows = conn.query("SELECT id, name FROM t").unwrap();
        assert_eq!(rows, vec![vec!["1".to_string(), "a".to_string()]]);
        assert_eq!(conn.table_columns("t").unwrap(), vec!["id", "name"]);
        assert!(conn.table_exists("t").unwrap());
        assert!(!conn.table_exists("missing").unwrap());
    }

    #[test]
    fn test_sqlite_error_is_database_transition() {
        let mut conn = SqliteConnection::memory().unwrap();
        let err = conn.execute("CREATE TABLE (").unwrap_err();
        assert!(err.is_database_transition());
    }

    #[test]
    fn test_sqlite_transaction_rollback() {
        let mut conn = SqliteConnection::memory().unwrap();
        conn.begin().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER)").unwrap();
        conn.rollback().unwrap();
        assert!(!conn.table_exists("t").unwrap());
    }

    #[test]
    fn test_recording_commit_and_rollback() {
        let mut conn = RecordingConnection::new(Dialect::Sqlite);
        conn.execute("A").unwrap();
        conn.begin().unwrap();
        conn.execute("B").unwrap();
        conn.commit().unwrap();
        conn.begin().unwrap();
        conn.execute("C").unwrap();
        conn.rollback().unwrap();
        assert_eq!(conn.executed(), ["A", "B"]);
        assert_eq!(conn.commits(), 1);
        assert_eq!(conn.rollbacks(), 1);
    }

    #[test]
    fn test_recording_fail_on() {
        let mut conn = RecordingConnection::new(Dialect::Postgres).fail_on("DROP");
        assert!(conn.execute("DROP TABLE x").is_err());
        assert!(conn.executed().is_empty());
    }

    #[test]
    fn test_recording_nested_begin_fails() {
        let mut conn = RecordingConnection::new(Dialect::Postgres);
        conn.begin().unwrap();
        assert!(conn.begin().is_err());
    }

    #[test]
    fn test_connect_from_settings() {
        let settings = DatabaseSettings {
            name: ":memory:".into(),
            ..DatabaseSettings::default()
        };
        let conn = connect(&settings).unwrap();
        assert_eq!(conn.dialect(), Dialect::Sqlite);

        let settings = DatabaseSettings {
            engine: "postgresql".into(),
            ..DatabaseSettings::default()
        };
        assert!(matches!(
            connect(&settings),
            Err(MigrationError::Configuration(_))
        ));

        let settings = DatabaseSettings {
            engine: "oracle".into(),
            ..DatabaseSettings::default()
        };
        assert!(connect(&settings).is_err());
    }
}
