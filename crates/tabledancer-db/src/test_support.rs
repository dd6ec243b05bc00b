//! Statement-recording [`Database`] double for unit tests.

use std::cell::{Cell, RefCell};

use tabledancer_common::{Error, Result};

use crate::database::Database;
use crate::dialect::{Dialect, MySqlDialect, SqliteDialect};
use crate::value::Row;

pub struct RecordingDatabase {
    dialect: Box<dyn Dialect>,
    statements: RefCell<Vec<String>>,
    fail_prefix: RefCell<Option<String>>,
    in_transaction: Cell<bool>,
}

impl RecordingDatabase {
    pub fn sqlite() -> Self {
        Self::with_dialect(Box::new(SqliteDialect))
    }

    pub fn mysql() -> Self {
        Self::with_dialect(Box::new(MySqlDialect))
    }

    fn with_dialect(dialect: Box<dyn Dialect>) -> Self {
        Self {
            dialect,
            statements: RefCell::new(Vec::new()),
            fail_prefix: RefCell::new(None),
            in_transaction: Cell::new(false),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.borrow().clone()
    }

    /// Make every statement starting with `prefix` fail (after being recorded).
    pub fn fail_on(&self, prefix: &str) {
        *self.fail_prefix.borrow_mut() = Some(prefix.to_string());
    }

    pub fn set_in_transaction(&self, open: bool) {
        self.in_transaction.set(open);
    }
}

impl Database for RecordingDatabase {
    fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    fn execute(&self, sql: &str) -> Result<usize> {
        self.statements.borrow_mut().push(sql.to_string());
        if let Some(prefix) = self.fail_prefix.borrow().as_deref()
            && sql.starts_with(prefix)
        {
            return Err(Error::Database(format!("injected failure: {sql}")));
        }
        Ok(0)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        self.execute(sql).map(|_| ())
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.statements.borrow_mut().push(sql.to_string());
        Ok(Vec::new())
    }

    fn last_insert_id(&self) -> Result<i64> {
        Ok(0)
    }

    fn table_exists(&self, _table: &str) -> Result<bool> {
        Ok(true)
    }

    fn column_names(&self, _table: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.get()
    }
}
