use tabledancer_common::Result;
use tracing::warn;

use crate::dialect::Dialect;
use crate::value::Row;

/// The driver surface the migration engine runs on.
///
/// Every statement is built by the caller with the connection's [`Dialect`];
/// a driver only executes text and introspects its catalogue.
pub trait Database {
    fn dialect(&self) -> &dyn Dialect;

    /// Execute one statement, returning the number of affected rows.
    fn execute(&self, sql: &str) -> Result<usize>;

    /// Execute a script of `;`-separated statements.
    fn execute_batch(&self, sql: &str) -> Result<()>;

    fn query(&self, sql: &str) -> Result<Vec<Row>>;

    fn last_insert_id(&self) -> Result<i64>;

    fn table_exists(&self, table: &str) -> Result<bool>;

    /// Column names of `table` in declaration order; empty when the table is missing.
    fn column_names(&self, table: &str) -> Result<Vec<String>>;

    /// Whether a transaction (or table lock) is already open on this connection.
    fn in_transaction(&self) -> bool;
}

/// Run `body` inside a transaction, nesting as a savepoint when one is open.
///
/// The body's writes commit together or not at all.
pub fn with_transaction<D, T>(db: &D, savepoint: &str, body: impl FnOnce() -> Result<T>) -> Result<T>
where
    D: Database + ?Sized,
{
    let dialect = db.dialect();
    let nested = db.in_transaction();

    db.execute(&dialect.begin_transaction(savepoint, nested))?;

    match body() {
        Ok(value) => {
            db.execute(&dialect.commit_transaction(savepoint, nested))?;
            Ok(value)
        }
        Err(err) => {
            for stmt in dialect.rollback_transaction(savepoint, nested) {
                if let Err(rollback_err) = db.execute(&stmt) {
                    warn!("rollback of {savepoint} failed: {rollback_err}");
                }
            }
            Err(err)
        }
    }
}
