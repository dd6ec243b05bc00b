use tabledancer_common::{Error, MigrationId, Phase, Result};
use tracing::info;

use crate::accessor::TableAccessor;
use crate::database::Database;
use crate::model::{ChangeEvent, Migration, now_timestamp};
use crate::schema::{CHANGE_EVENTS_TABLE, MIGRATIONS_TABLE, ensure_schema};
use crate::value::SqlValue;

/// Column order used when appending change events.
pub const CHANGE_EVENT_COLUMNS: [&str; 4] = ["migration_id", "instruction", "event_time", "source_id"];

/// Persistence for migration records and their change-event log.
pub struct MigrationStore<'db, D: Database + ?Sized> {
    db: &'db D,
}

impl<D: Database + ?Sized> Clone for MigrationStore<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: Database + ?Sized> Copy for MigrationStore<'_, D> {}

impl<'db, D: Database + ?Sized> MigrationStore<'db, D> {
    /// Open the store, creating or upgrading the tracking tables first.
    pub fn open(db: &'db D) -> Result<Self> {
        ensure_schema(db)?;
        Ok(Self { db })
    }

    pub fn db(&self) -> &'db D {
        self.db
    }

    fn migrations(&self) -> TableAccessor<'db, D> {
        TableAccessor::new(self.db, MIGRATIONS_TABLE)
    }

    /// Insert a fresh record in `init` for `source_table`.
    pub fn create(&self, source_table: &str) -> Result<Migration> {
        let now = now_timestamp();
        let id = self.migrations().create(&[
            ("source_table", SqlValue::from(source_table)),
            (
                "dest_table",
                SqlValue::from(Migration::dest_table_for(source_table)),
            ),
            ("phase", SqlValue::from(Phase::Init.as_str())),
            ("last_copy_id", SqlValue::Integer(0)),
            ("created_at", SqlValue::from(now.as_str())),
            ("updated_at", SqlValue::from(now)),
        ])?;

        info!("created migration {id} for {source_table}");
        self.get(MigrationId::new(id))
    }

    pub fn find(&self, id: MigrationId) -> Result<Option<Migration>> {
        self.migrations()
            .find(id.get())?
            .as_ref()
            .map(Migration::from_row)
            .transpose()
    }

    pub fn get(&self, id: MigrationId) -> Result<Migration> {
        self.find(id)?
            .ok_or_else(|| Error::NotFound(format!("migration {id}")))
    }

    pub fn latest_for_table(&self, source_table: &str) -> Result<Option<Migration>> {
        let dialect = self.db.dialect();
        let sql = format!(
            "SELECT * FROM {MIGRATIONS_TABLE} WHERE source_table = {} ORDER BY id DESC LIMIT 1",
            dialect.quote_value(&SqlValue::from(source_table))
        );
        self.db
            .query(&sql)?
            .first()
            .map(Migration::from_row)
            .transpose()
    }

    pub fn list(&self) -> Result<Vec<Migration>> {
        self.db
            .query(&format!("SELECT * FROM {MIGRATIONS_TABLE} ORDER BY id ASC"))?
            .iter()
            .map(Migration::from_row)
            .collect()
    }

    /// Move a migration from `from` to `to`, failing if it is no longer in `from`.
    pub fn advance_phase(&self, id: MigrationId, from: Phase, to: Phase) -> Result<()> {
        let dialect = self.db.dialect();
        let sql = format!(
            "UPDATE {MIGRATIONS_TABLE} SET phase = {}, updated_at = {} WHERE id = {} AND phase = {}",
            dialect.quote_value(&SqlValue::from(to.as_str())),
            dialect.quote_value(&SqlValue::from(now_timestamp())),
            id.get(),
            dialect.quote_value(&SqlValue::from(from.as_str())),
        );

        if self.db.execute(&sql)? == 0 {
            let actual = self.get(id)?.phase;
            return Err(Error::PhaseMismatch {
                expected: from,
                actual,
            });
        }

        info!(migration_id = id.get(), from = %from, to = %to, "advanced phase");
        Ok(())
    }

    pub fn set_last_copy_id(&self, id: MigrationId, last_copy_id: i64) -> Result<()> {
        self.migrations().update(
            id.get(),
            &[
                ("last_copy_id", SqlValue::Integer(last_copy_id)),
                ("updated_at", SqlValue::from(now_timestamp())),
            ],
        )?;
        Ok(())
    }

    /// Oldest unperformed events, ordered by event time then instruction.
    pub fn next_unperformed_page(&self, id: MigrationId, limit: usize) -> Result<Vec<ChangeEvent>> {
        let sql = format!(
            "SELECT id, migration_id, instruction, event_time, source_id, performed \
             FROM {CHANGE_EVENTS_TABLE} \
             WHERE migration_id = {} AND performed = 0 \
             ORDER BY event_time ASC, instruction ASC, id ASC \
             LIMIT {limit}",
            id.get()
        );
        self.db
            .query(&sql)?
            .iter()
            .map(ChangeEvent::from_row)
            .collect()
    }

    pub fn mark_performed(&self, event_ids: &[i64]) -> Result<usize> {
        if event_ids.is_empty() {
            return Ok(0);
        }
        let ids = event_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.db.execute(&format!(
            "UPDATE {CHANGE_EVENTS_TABLE} SET performed = 1 WHERE id IN ({ids})"
        ))
    }

    /// Number of events for a migration, optionally filtered by `performed`.
    pub fn count_events(&self, id: MigrationId, performed: Option<bool>) -> Result<u64> {
        let mut sql = format!(
            "SELECT COUNT(*) AS n FROM {CHANGE_EVENTS_TABLE} WHERE migration_id = {}",
            id.get()
        );
        if let Some(performed) = performed {
            sql.push_str(&format!(" AND performed = {}", i64::from(performed)));
        }
        let n = self
            .db
            .query(&sql)?
            .first()
            .and_then(|r| r.get_i64("n"))
            .unwrap_or(0);
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::MigrationStore;
    use crate::database::Database;
    use crate::sqlite::SqliteDatabase;
    use tabledancer_common::{Error, Instruction, Phase};

    fn store_db() -> SqliteDatabase {
        SqliteDatabase::in_memory().expect("failed to open in-memory database")
    }

    #[test]
    fn create_records_derived_destination_in_init() {
        let db = store_db();
        let store = MigrationStore::open(&db).expect("store should open");

        let migration = store.create("foos").expect("create should succeed");
        assert_eq!(migration.source_table, "foos");
        assert_eq!(migration.dest_table, "foos_danced");
        assert_eq!(migration.phase, Phase::Init);
        assert_eq!(migration.last_copy_id, 0);
        assert_eq!(store.list().expect("list should load").len(), 1);
    }

    #[test]
    fn advance_phase_rejects_stale_expectation() {
        let db = store_db();
        let store = MigrationStore::open(&db).expect("store should open");
        let migration = store.create("foos").expect("create should succeed");

        store
            .advance_phase(migration.id, Phase::Init, Phase::Copy)
            .expect("first advance should succeed");
        let err = store
            .advance_phase(migration.id, Phase::Init, Phase::Copy)
            .expect_err("stale advance should fail");

        assert!(matches!(
            err,
            Error::PhaseMismatch {
                expected: Phase::Init,
                actual: Phase::Copy
            }
        ));
        assert_eq!(store.get(migration.id).unwrap().phase, Phase::Copy);
    }

    #[test]
    fn latest_for_table_prefers_newest_record() {
        let db = store_db();
        let store = MigrationStore::open(&db).expect("store should open");
        store.create("foos").expect("create should succeed");
        let second = store.create("foos").expect("create should succeed");
        store.create("bars").expect("create should succeed");

        let latest = store
            .latest_for_table("foos")
            .expect("lookup should succeed")
            .expect("a migration exists");
        assert_eq!(latest.id, second.id);
        assert!(store.latest_for_table("bazs").unwrap().is_none());
    }

    #[test]
    fn pages_order_by_event_time_then_instruction() {
        let db = store_db();
        let store = MigrationStore::open(&db).expect("store should open");
        let m = store.create("foos").expect("create should succeed");
        let mid = m.id.get();

        db.execute_batch(&format!(
            "INSERT INTO tabledancer_change_events (migration_id, instruction, event_time, source_id)
             VALUES ({mid}, {}, '2024-01-01 00:00:02.000', 1),
                    ({mid}, {}, '2024-01-01 00:00:01.000', 1),
                    ({mid}, {}, '2024-01-01 00:00:02.000', 2);",
            Instruction::Delete.code(),
            Instruction::Update.code(),
            Instruction::Insert.code(),
        ))
        .expect("failed to seed events");

        let page = store
            .next_unperformed_page(m.id, 10)
            .expect("page should load");
        let order: Vec<(Instruction, i64)> =
            page.iter().map(|e| (e.instruction, e.source_id)).collect();
        assert_eq!(
            order,
            vec![
                (Instruction::Update, 1),
                (Instruction::Insert, 2),
                (Instruction::Delete, 1)
            ]
        );

        let ids: Vec<i64> = page.iter().take(2).map(|e| e.id).collect();
        assert_eq!(store.mark_performed(&ids).expect("mark should succeed"), 2);
        assert_eq!(store.count_events(m.id, Some(false)).unwrap(), 1);
        assert_eq!(store.count_events(m.id, Some(true)).unwrap(), 2);
        assert_eq!(store.count_events(m.id, None).unwrap(), 3);
    }
}
