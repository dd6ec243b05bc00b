pub mod accessor;
pub mod bulk;
pub mod database;
pub mod dialect;
pub mod lock;
pub mod model;
pub mod schema;
pub mod sqlite;
pub mod store;
pub mod value;

#[cfg(test)]
mod test_support;

pub use accessor::TableAccessor;
pub use bulk::{BulkCopy, BulkDelete, BulkInsert, BulkOperation};
pub use database::{Database, with_transaction};
pub use dialect::{Dialect, DialectKind, MySqlDialect, SqliteDialect};
pub use lock::{TableLock, within_table_lock};
pub use model::{
    ChangeEvent, DECOMMISSIONED_SUFFIX, DEST_SUFFIX, Migration, format_timestamp, now_timestamp,
    parse_timestamp,
};
pub use schema::{CHANGE_EVENTS_TABLE, MIGRATIONS_TABLE, SCHEMA_VERSIONS_TABLE, ensure_schema};
pub use sqlite::SqliteDatabase;
pub use store::{CHANGE_EVENT_COLUMNS, MigrationStore};
pub use value::{Row, SqlValue};
