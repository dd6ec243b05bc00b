use rusqlite::types::ValueRef;
use rusqlite::{Connection, params};
use std::path::Path;
use std::time::Duration;
use tabledancer_common::{Error, Result};
use tracing::{debug, info};

use crate::database::Database;
use crate::dialect::{Dialect, SqliteDialect};
use crate::value::{Row, SqlValue};

/// [`Database`] driver backed by a single rusqlite connection.
pub struct SqliteDatabase {
    conn: Connection,
    dialect: SqliteDialect,
}

impl SqliteDatabase {
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;

        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            dialect: SqliteDialect,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Database for SqliteDatabase {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn execute(&self, sql: &str) -> Result<usize> {
        debug!(sql, "execute");
        self.conn
            .execute(sql, [])
            .map_err(|e| Error::Database(format!("statement failed: {e}: {sql}")))
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        debug!(sql, "execute batch");
        self.conn
            .execute_batch(sql)
            .map_err(|e| Error::Database(format!("batch failed: {e}")))
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        debug!(sql, "query");
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}: {sql}")))?;

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt
            .query([])
            .map_err(|e| Error::Database(format!("failed to execute query: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| Error::Database(format!("failed to read row: {e}")))?
        {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                let value = row
                    .get_ref(i)
                    .map_err(|e| Error::Database(format!("failed to read column: {e}")))?;
                values.push(from_value_ref(value));
            }
            out.push(Row::new(columns.clone(), values));
        }

        Ok(out)
    }

    fn last_insert_id(&self) -> Result<i64> {
        Ok(self.conn.last_insert_rowid())
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to query sqlite_master: {e}")))?;

        Ok(count > 0)
    }

    fn column_names(&self, table: &str) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", self.dialect.quote_identifier(table));
        let rows = self.query(&sql)?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get_str("name").map(str::to_string))
            .collect())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}
