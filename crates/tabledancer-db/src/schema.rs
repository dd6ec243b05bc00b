use tabledancer_common::Result;
use tracing::info;

use crate::database::{Database, with_transaction};
use crate::dialect::DialectKind;
use crate::model::now_timestamp;
use crate::value::SqlValue;

pub const MIGRATIONS_TABLE: &str = "tabledancer_migrations";
pub const CHANGE_EVENTS_TABLE: &str = "tabledancer_change_events";
pub const SCHEMA_VERSIONS_TABLE: &str = "tabledancer_schema_versions";

/// Versioned change to the tracking tables.
///
/// Steps are applied in order, once each, and recorded in
/// `tabledancer_schema_versions`.
pub struct SchemaStep {
    pub version: u32,
    pub name: &'static str,
    sqlite: &'static str,
    mysql: &'static str,
}

impl SchemaStep {
    pub fn sql(&self, kind: DialectKind) -> &'static str {
        match kind {
            DialectKind::Sqlite => self.sqlite,
            DialectKind::MySql => self.mysql,
        }
    }
}

pub const SCHEMA_STEPS: &[SchemaStep] = &[SchemaStep {
    version: 1,
    name: "tracking_tables",
    sqlite: "CREATE TABLE tabledancer_migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_table TEXT NOT NULL,
                dest_table TEXT NOT NULL,
                phase TEXT NOT NULL DEFAULT 'init',
                last_copy_id INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX idx_tabledancer_migrations_source
                ON tabledancer_migrations(source_table, phase);

            CREATE TABLE tabledancer_change_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                migration_id INTEGER NOT NULL REFERENCES tabledancer_migrations(id),
                instruction INTEGER NOT NULL,
                event_time TEXT NOT NULL,
                source_id INTEGER NOT NULL,
                performed INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_tabledancer_events_time
                ON tabledancer_change_events(migration_id, event_time);

            CREATE INDEX idx_tabledancer_events_performed
                ON tabledancer_change_events(migration_id, performed, event_time);",
    mysql: "CREATE TABLE tabledancer_migrations (
                id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                source_table VARCHAR(255) NOT NULL,
                dest_table VARCHAR(255) NOT NULL,
                phase VARCHAR(16) NOT NULL DEFAULT 'init',
                last_copy_id BIGINT NOT NULL DEFAULT 0,
                created_at VARCHAR(32) NOT NULL,
                updated_at VARCHAR(32) NOT NULL,
                INDEX idx_tabledancer_migrations_source (source_table, phase)
            );

            CREATE TABLE tabledancer_change_events (
                id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                migration_id BIGINT NOT NULL,
                instruction TINYINT NOT NULL,
                event_time VARCHAR(32) NOT NULL,
                source_id BIGINT NOT NULL,
                performed TINYINT(1) NOT NULL DEFAULT 0,
                INDEX idx_tabledancer_events_time (migration_id, event_time),
                INDEX idx_tabledancer_events_performed (migration_id, performed, event_time)
            );",
}];

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

fn bootstrap_sql(kind: DialectKind) -> &'static str {
    match kind {
        DialectKind::Sqlite => {
            "CREATE TABLE IF NOT EXISTS tabledancer_schema_versions (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );"
        }
        DialectKind::MySql => {
            "CREATE TABLE IF NOT EXISTS tabledancer_schema_versions (
                version INT NOT NULL PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                applied_at VARCHAR(32) NOT NULL
            );"
        }
    }
}

pub fn current_version<D: Database + ?Sized>(db: &D) -> Result<u32> {
    if !db.table_exists(SCHEMA_VERSIONS_TABLE)? {
        return Ok(0);
    }
    let rows = db.query(&format!(
        "SELECT COALESCE(MAX(version), 0) AS version FROM {SCHEMA_VERSIONS_TABLE}"
    ))?;
    let version = rows.first().and_then(|r| r.get_i64("version")).unwrap_or(0);
    Ok(version.max(0) as u32)
}

/// Create or upgrade the tracking tables; a no-op when already current.
pub fn ensure_schema<D: Database + ?Sized>(db: &D) -> Result<()> {
    let dialect = db.dialect();
    db.execute_batch(bootstrap_sql(dialect.kind()))?;

    let current = current_version(db)?;
    for step in SCHEMA_STEPS.iter().filter(|s| s.version > current) {
        with_transaction(db, "tabledancer_schema", || {
            db.execute_batch(step.sql(dialect.kind()))?;
            db.execute(&format!(
                "INSERT INTO {SCHEMA_VERSIONS_TABLE} (version, name, applied_at) VALUES ({}, {}, {})",
                step.version,
                dialect.quote_value(&SqlValue::from(step.name)),
                dialect.quote_value(&SqlValue::from(now_timestamp())),
            ))?;
            Ok(())
        })?;
        info!(version = step.version, name = step.name, "applied tracking schema step");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{CURRENT_SCHEMA_VERSION, current_version, ensure_schema};
    use crate::database::Database;
    use crate::sqlite::SqliteDatabase;

    #[test]
    fn ensure_schema_creates_tracking_tables() {
        let db = SqliteDatabase::in_memory().expect("failed to open in-memory database");
        assert_eq!(current_version(&db).expect("version should load"), 0);

        ensure_schema(&db).expect("schema should apply");

        assert!(db.table_exists("tabledancer_migrations").unwrap());
        assert!(db.table_exists("tabledancer_change_events").unwrap());
        assert_eq!(
            current_version(&db).expect("version should load"),
            CURRENT_SCHEMA_VERSION
        );
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let db = SqliteDatabase::in_memory().expect("failed to open in-memory database");
        ensure_schema(&db).expect("first apply should succeed");
        ensure_schema(&db).expect("second apply should be a no-op");

        let rows = db
            .query("SELECT COUNT(*) AS n FROM tabledancer_schema_versions")
            .expect("query should succeed");
        assert_eq!(rows[0].get_i64("n"), Some(1));
    }

    #[test]
    fn change_events_have_lookup_indexes() {
        let db = SqliteDatabase::in_memory().expect("failed to open in-memory database");
        ensure_schema(&db).expect("schema should apply");

        let rows = db
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'index' \
                 AND tbl_name = 'tabledancer_change_events' ORDER BY name",
            )
            .expect("query should succeed");
        let names: Vec<&str> = rows.iter().filter_map(|r| r.get_str("name")).collect();
        assert_eq!(
            names,
            vec![
                "idx_tabledancer_events_performed",
                "idx_tabledancer_events_time"
            ]
        );
    }
}
