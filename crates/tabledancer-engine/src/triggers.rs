use tabledancer_common::{Instruction, MigrationId, Result};
use tabledancer_db::{CHANGE_EVENT_COLUMNS, CHANGE_EVENTS_TABLE, Database};
use tracing::info;

/// Installs and removes the three change-capture triggers on a source table.
pub struct TriggerManager<'db, D: Database + ?Sized> {
    db: &'db D,
    migration_id: MigrationId,
    source_table: String,
}

impl<'db, D: Database + ?Sized> TriggerManager<'db, D> {
    pub fn new(db: &'db D, migration_id: MigrationId, source_table: impl Into<String>) -> Self {
        Self {
            db,
            migration_id,
            source_table: source_table.into(),
        }
    }

    /// Trigger names carry the migration id so two records on one table
    /// never drop each other's triggers.
    pub fn trigger_name(
        source_table: &str,
        migration_id: MigrationId,
        instruction: Instruction,
    ) -> String {
        format!(
            "{source_table}_after_{}_{}",
            instruction.name(),
            migration_id.get()
        )
    }

    pub fn names(&self) -> Vec<String> {
        Instruction::ALL.iter().map(|i| self.name(*i)).collect()
    }

    fn name(&self, instruction: Instruction) -> String {
        Self::trigger_name(&self.source_table, self.migration_id, instruction)
    }

    /// DDL for the trigger capturing `instruction` into the change log.
    pub fn create_statement(&self, instruction: Instruction) -> String {
        let dialect = self.db.dialect();
        let action = format!(
            "INSERT INTO {CHANGE_EVENTS_TABLE} ({}) VALUES ({}, {}, {}, {}.id)",
            CHANGE_EVENT_COLUMNS.join(", "),
            self.migration_id.get(),
            instruction.code(),
            dialect.current_timestamp(),
            instruction.row_ref(),
        );
        dialect.create_trigger(
            &self.name(instruction),
            instruction,
            &self.source_table,
            &action,
        )
    }

    /// Drop and recreate all three triggers. Safe to repeat.
    pub fn install(&self) -> Result<()> {
        let dialect = self.db.dialect();
        for instruction in Instruction::ALL {
            let name = self.name(instruction);
            self.db.execute(&dialect.drop_trigger(&name))?;
            self.db.execute(&self.create_statement(instruction))?;
        }
        info!(
            migration_id = self.migration_id.get(),
            table = %self.source_table,
            "installed change-capture triggers"
        );
        Ok(())
    }

    /// Drop all three triggers; a no-op for triggers that do not exist.
    pub fn remove(&self) -> Result<()> {
        let dialect = self.db.dialect();
        for name in self.names() {
            self.db.execute(&dialect.drop_trigger(&name))?;
        }
        info!(
            migration_id = self.migration_id.get(),
            table = %self.source_table,
            "removed change-capture triggers"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::TriggerManager;
    use tabledancer_common::{Instruction, MigrationId};
    use tabledancer_db::{Database, MigrationStore, SqliteDatabase};

    /// Source table `foos` plus one migration record per requested id.
    /// Change events reference their migration by foreign key.
    fn source_db(records: usize) -> SqliteDatabase {
        let db = SqliteDatabase::in_memory().expect("failed to open in-memory database");
        db.execute_batch("CREATE TABLE foos (id INTEGER PRIMARY KEY, title TEXT);")
            .expect("failed to create source table");
        let store = MigrationStore::open(&db).expect("tracking schema should apply");
        for _ in 0..records {
            store.create("foos").expect("migration record should be created");
        }
        db
    }

    fn trigger_names(db: &SqliteDatabase) -> Vec<String> {
        db.query("SELECT name FROM sqlite_master WHERE type = 'trigger' ORDER BY name")
            .expect("query should succeed")
            .iter()
            .filter_map(|r| r.get_str("name").map(str::to_string))
            .collect()
    }

    fn events(db: &SqliteDatabase) -> Vec<(i64, i64, i64)> {
        db.query(
            "SELECT migration_id, instruction, source_id FROM tabledancer_change_events ORDER BY id",
        )
        .expect("query should succeed")
        .iter()
        .map(|r| {
            (
                r.get_i64("migration_id").unwrap(),
                r.get_i64("instruction").unwrap(),
                r.get_i64("source_id").unwrap(),
            )
        })
        .collect()
    }

    #[test]
    fn names_follow_table_and_instruction() {
        assert_eq!(
            TriggerManager::<SqliteDatabase>::trigger_name(
                "foos",
                MigrationId::new(4),
                Instruction::Update
            ),
            "foos_after_update_4"
        );
    }

    #[test]
    fn delete_trigger_records_old_row_id() {
        let db = source_db(0);
        let triggers = TriggerManager::new(&db, MigrationId::new(9), "foos");
        let sql = triggers.create_statement(Instruction::Delete);

        assert!(sql.contains("AFTER DELETE ON \"foos\""));
        assert!(sql.contains("VALUES (9, 3, strftime('%Y-%m-%d %H:%M:%f', 'now'), OLD.id)"));
    }

    #[test]
    fn install_creates_three_triggers_and_is_repeatable() {
        let db = source_db(1);
        let triggers = TriggerManager::new(&db, MigrationId::new(1), "foos");

        triggers.install().expect("first install should succeed");
        triggers.install().expect("reinstall should succeed");

        assert_eq!(
            trigger_names(&db),
            vec!["foos_after_delete_1", "foos_after_insert_1", "foos_after_update_1"]
        );
    }

    #[test]
    fn installed_triggers_capture_every_mutation() {
        let db = source_db(1);
        TriggerManager::new(&db, MigrationId::new(1), "foos")
            .install()
            .expect("install should succeed");

        db.execute_batch(
            "INSERT INTO foos (title) VALUES ('a');
             UPDATE foos SET title = 'b' WHERE id = 1;
             DELETE FROM foos WHERE id = 1;",
        )
        .expect("mutations should succeed");

        assert_eq!(events(&db), vec![(1, 1, 1), (1, 2, 1), (1, 3, 1)]);
    }

    #[test]
    fn remove_is_idempotent_and_stops_capture() {
        let db = source_db(1);
        let triggers = TriggerManager::new(&db, MigrationId::new(1), "foos");
        triggers.remove().expect("removing absent triggers should succeed");

        triggers.install().expect("install should succeed");
        triggers.remove().expect("remove should succeed");
        assert!(trigger_names(&db).is_empty());

        db.execute("INSERT INTO foos (title) VALUES ('quiet')")
            .expect("insert should succeed");
        assert!(events(&db).is_empty());
    }

    #[test]
    fn removing_one_migration_leaves_anothers_triggers() {
        let db = source_db(2);
        let first = TriggerManager::new(&db, MigrationId::new(1), "foos");
        let second = TriggerManager::new(&db, MigrationId::new(2), "foos");
        first.install().expect("install should succeed");
        second.install().expect("install should succeed");

        first.remove().expect("remove should succeed");
        assert_eq!(
            trigger_names(&db),
            vec!["foos_after_delete_2", "foos_after_insert_2", "foos_after_update_2"]
        );

        db.execute("INSERT INTO foos (title) VALUES ('still captured')")
            .expect("insert should succeed");
        assert_eq!(events(&db), vec![(2, 1, 1)]);
    }

    #[test]
    fn capture_fails_the_write_for_an_unknown_migration() {
        let db = source_db(0);
        TriggerManager::new(&db, MigrationId::new(7), "foos")
            .install()
            .expect("install should succeed");

        assert!(db.execute("INSERT INTO foos (title) VALUES ('orphan')").is_err());
        assert!(db.query("SELECT id FROM foos").expect("query should succeed").is_empty());
    }
}
