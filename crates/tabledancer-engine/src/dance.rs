use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabledancer_common::{Error, Instruction, MigrationId, Phase, Result};
use tabledancer_db::{
    BulkInsert, BulkOperation, CHANGE_EVENT_COLUMNS, CHANGE_EVENTS_TABLE, Database,
    MIGRATIONS_TABLE, Migration, MigrationStore, Row, SqlValue, TableAccessor, format_timestamp,
    parse_timestamp, with_transaction, within_table_lock,
};
use tracing::{debug, info, warn};

use crate::replay::{ReplayEngine, ReplayReport};
use crate::settings::DanceSettings;
use crate::triggers::TriggerManager;

const CREATED_AT: &str = "created_at";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub last_copy_id: i64,
    pub triggers_installed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopyReport {
    pub pages: usize,
    /// Backfill events enqueued, one per source row with `id <= last_copy_id`.
    pub events: usize,
    pub rests: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CutoverReport {
    /// Drain run before the lock was taken.
    pub catch_up: ReplayReport,
    /// Drain run under the lock, down to an empty backlog.
    pub final_drain: ReplayReport,
    pub decommissioned_table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DanceStatus {
    pub migration: Migration,
    pub pending_events: u64,
    pub performed_events: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub migration: Migration,
    pub init: InitReport,
    pub copy: CopyReport,
    pub replay: ReplayReport,
    pub cutover: CutoverReport,
}

/// One online table migration, driven phase by phase.
///
/// Every phase operation reloads the persisted record and refuses to run
/// unless the migration sits in that operation's input phase. The phase is
/// advanced only after the operation's work has landed.
pub struct TableDance<'db, D: Database + ?Sized> {
    store: MigrationStore<'db, D>,
    migration: Migration,
    settings: DanceSettings,
    shared_columns: Option<Vec<String>>,
}

impl<'db, D: Database + ?Sized> TableDance<'db, D> {
    /// Create a migration record for `source_table`, which must exist.
    pub fn setup(db: &'db D, source_table: &str, settings: DanceSettings) -> Result<Self> {
        if source_table.trim().is_empty() {
            return Err(Error::validation("source_table", "table name is empty"));
        }
        if !db.table_exists(source_table)? {
            return Err(Error::validation(
                "source_table",
                format!("table {source_table} does not exist"),
            ));
        }

        let store = MigrationStore::open(db)?;
        let migration = store.create(source_table)?;
        info!(
            migration_id = migration.id.get(),
            source = %migration.source_table,
            dest = %migration.dest_table,
            "migration set up"
        );
        Ok(Self::from_parts(store, migration, settings))
    }

    pub fn load(db: &'db D, id: MigrationId, settings: DanceSettings) -> Result<Self> {
        let store = MigrationStore::open(db)?;
        let migration = store.get(id)?;
        Ok(Self::from_parts(store, migration, settings))
    }

    pub fn latest_for_table(
        db: &'db D,
        source_table: &str,
        settings: DanceSettings,
    ) -> Result<Option<Self>> {
        let store = MigrationStore::open(db)?;
        Ok(store
            .latest_for_table(source_table)?
            .map(|migration| Self::from_parts(store, migration, settings)))
    }

    pub fn list(db: &'db D) -> Result<Vec<Migration>> {
        MigrationStore::open(db)?.list()
    }

    /// Full run: setup, init, copy, replay and cutover in sequence.
    pub fn run(db: &'db D, source_table: &str, settings: DanceSettings) -> Result<RunReport> {
        let mut dance = Self::setup(db, source_table, settings)?;
        let init = dance.init()?;
        let copy = dance.copy()?;
        let replay = dance.replay()?;
        let cutover = dance.cutover()?;
        Ok(RunReport {
            migration: dance.migration.clone(),
            init,
            copy,
            replay,
            cutover,
        })
    }

    fn from_parts(store: MigrationStore<'db, D>, migration: Migration, settings: DanceSettings) -> Self {
        Self {
            store,
            migration,
            settings,
            shared_columns: None,
        }
    }

    pub fn migration(&self) -> &Migration {
        &self.migration
    }

    pub fn id(&self) -> MigrationId {
        self.migration.id
    }

    pub fn phase(&self) -> Phase {
        self.migration.phase
    }

    pub fn settings(&self) -> &DanceSettings {
        &self.settings
    }

    fn db(&self) -> &'db D {
        self.store.db()
    }

    pub fn refresh(&mut self) -> Result<&Migration> {
        self.migration = self.store.get(self.migration.id)?;
        Ok(&self.migration)
    }

    fn expect_phase(&mut self, expected: Phase) -> Result<()> {
        let actual = self.refresh()?.phase;
        if actual != expected {
            return Err(Error::PhaseMismatch { expected, actual });
        }
        Ok(())
    }

    fn advance(&mut self, from: Phase, to: Phase) -> Result<()> {
        self.store.advance_phase(self.migration.id, from, to)?;
        self.refresh()?;
        Ok(())
    }

    fn triggers(&self) -> TriggerManager<'db, D> {
        TriggerManager::new(self.db(), self.migration.id, &self.migration.source_table)
    }

    fn locked_tables(&self) -> [&str; 4] {
        [
            self.migration.source_table.as_str(),
            self.migration.dest_table.as_str(),
            MIGRATIONS_TABLE,
            CHANGE_EVENTS_TABLE,
        ]
    }

    /// Source columns also present in the destination, in source order.
    pub fn shared_columns(&mut self) -> Result<Vec<String>> {
        if let Some(columns) = &self.shared_columns {
            return Ok(columns.clone());
        }

        let dest = self.db().column_names(&self.migration.dest_table)?;
        let columns: Vec<String> = self
            .db()
            .column_names(&self.migration.source_table)?
            .into_iter()
            .filter(|c| dest.contains(c))
            .collect();
        if !columns.iter().any(|c| c == "id") {
            return Err(Error::validation(
                "shared_columns",
                format!(
                    "{} and {} do not share an id column",
                    self.migration.source_table, self.migration.dest_table
                ),
            ));
        }

        debug!(columns = ?columns, "resolved shared columns");
        self.shared_columns = Some(columns.clone());
        Ok(columns)
    }

    /// Replay engine over this migration's backlog.
    pub fn replay_engine(&mut self) -> Result<ReplayEngine<'db, D>> {
        let columns = self.shared_columns()?;
        Ok(
            ReplayEngine::new(self.store, self.migration.clone(), columns, self.settings.batch_size)
                .with_rest_interval(self.settings.rest_interval),
        )
    }

    /// Record the backfill bound and start capturing changes.
    pub fn init(&mut self) -> Result<InitReport> {
        self.expect_phase(Phase::Init)?;
        if !self.db().table_exists(&self.migration.dest_table)? {
            return Err(Error::validation(
                "dest_table",
                format!("table {} does not exist", self.migration.dest_table),
            ));
        }
        self.shared_columns()?;

        let install = self.settings.install_triggers;
        let report = within_table_lock(self.db(), &self.locked_tables(), || {
            let last_copy_id = TableAccessor::new(self.db(), &self.migration.source_table)
                .max_id()?
                .unwrap_or(0);
            self.store.set_last_copy_id(self.migration.id, last_copy_id)?;
            if install {
                self.triggers().install()?;
            }
            Ok(InitReport {
                last_copy_id,
                triggers_installed: install,
            })
        })?;

        self.advance(Phase::Init, Phase::Copy)?;
        info!(
            migration_id = self.migration.id.get(),
            last_copy_id = report.last_copy_id,
            "init complete"
        );
        Ok(report)
    }

    /// Enqueue one insert event per row that existed at init.
    pub fn copy(&mut self) -> Result<CopyReport> {
        self.expect_phase(Phase::Copy)?;

        let source = TableAccessor::new(self.db(), &self.migration.source_table);
        let mut columns = vec!["id".to_string()];
        if source.has_column(CREATED_AT)? {
            columns.push(CREATED_AT.to_string());
        }

        let last_copy_id = self.migration.last_copy_id;
        let batch_size = self.settings.batch_size.max(1);
        let event_columns: Vec<String> = CHANGE_EVENT_COLUMNS.iter().map(|c| c.to_string()).collect();
        let mut report = CopyReport::default();
        let mut after_id: Option<i64> = None;

        loop {
            let rows = source.page(after_id, Some(last_copy_id), &columns, batch_size)?;
            let Some(last_id) = rows.last().and_then(Row::id) else {
                break;
            };

            let mut insert = BulkInsert::new(self.db(), CHANGE_EVENTS_TABLE, event_columns.clone());
            for row in &rows {
                let Some(source_id) = row.id() else {
                    continue;
                };
                insert.push_values(vec![
                    SqlValue::Integer(self.migration.id.get()),
                    SqlValue::Integer(Instruction::Insert.code()),
                    SqlValue::from(backfill_event_time(row, self.migration.created_at)),
                    SqlValue::Integer(source_id),
                ]);
            }
            report.events += insert.len();
            report.pages += 1;
            insert.perform()?;
            debug!(
                migration_id = self.migration.id.get(),
                ?after_id,
                last_id,
                rows = rows.len(),
                "enqueued backfill page"
            );

            after_id = Some(last_id);
            if rows.len() < batch_size || last_id >= last_copy_id {
                break;
            }
            if !self.settings.copy_rest_interval.is_zero() {
                thread::sleep(self.settings.copy_rest_interval);
                report.rests += 1;
            }
        }

        self.advance(Phase::Copy, Phase::Replay)?;
        info!(
            migration_id = self.migration.id.get(),
            events = report.events,
            pages = report.pages,
            "copy complete"
        );
        Ok(report)
    }

    /// Drain the backlog down to the replay threshold.
    pub fn replay(&mut self) -> Result<ReplayReport> {
        self.expect_phase(Phase::Replay)?;
        let report = self.replay_engine()?.drain(self.settings.replay_threshold)?;
        self.advance(Phase::Replay, Phase::Cutover)?;
        Ok(report)
    }

    /// Catch up, then under the table lock drain to zero and swap the tables.
    pub fn cutover(&mut self) -> Result<CutoverReport> {
        self.expect_phase(Phase::Cutover)?;

        let decommissioned = self.migration.decommissioned_table();
        if self.db().table_exists(&decommissioned)? {
            return Err(Error::validation(
                "source_table",
                format!("{decommissioned} already exists"),
            ));
        }

        let engine = self.replay_engine()?;
        let catch_up = engine.drain(self.settings.replay_threshold)?;
        // No rest while writers are blocked.
        let engine = engine.with_rest_interval(Duration::ZERO);

        let db = self.db();
        let source = self.migration.source_table.clone();
        let dest = self.migration.dest_table.clone();
        let final_drain = within_table_lock(db, &self.locked_tables(), || {
            let final_drain = engine.drain(0)?;
            with_transaction(db, "tabledancer_cutover", || {
                self.triggers().remove()?;
                for stmt in db
                    .dialect()
                    .rename_tables(&[
                        (source.as_str(), decommissioned.as_str()),
                        (dest.as_str(), source.as_str()),
                    ])
                {
                    db.execute(&stmt)?;
                }
                self.store
                    .advance_phase(self.migration.id, Phase::Cutover, Phase::Complete)
            })?;
            Ok(final_drain)
        })?;

        self.refresh()?;
        info!(
            migration_id = self.migration.id.get(),
            source = %source,
            decommissioned = %decommissioned,
            "cutover complete"
        );
        Ok(CutoverReport {
            catch_up,
            final_drain,
            decommissioned_table: decommissioned,
        })
    }

    /// Stop the migration: drop its triggers, optionally empty the
    /// destination, and move it to `aborted`. Change events are kept.
    pub fn abort(&mut self, purge_destination: bool) -> Result<()> {
        let phase = self.refresh()?.phase;
        if phase.is_terminal() {
            return Err(Error::validation(
                "phase",
                format!("migration {} is already {phase}", self.migration.id),
            ));
        }

        self.triggers().remove()?;
        if purge_destination {
            let dest = &self.migration.dest_table;
            if self.db().table_exists(dest)? {
                let sql = format!(
                    "DELETE FROM {}",
                    self.db().dialect().quote_identifier(dest)
                );
                let purged = self.db().execute(&sql)?;
                info!(dest = %dest, purged, "purged destination table");
            } else {
                warn!(dest = %dest, "destination table missing, nothing to purge");
            }
        }

        self.advance(phase, Phase::Aborted)?;
        info!(migration_id = self.migration.id.get(), from = %phase, "migration aborted");
        Ok(())
    }

    pub fn status(&self) -> Result<DanceStatus> {
        let migration = self.store.get(self.migration.id)?;
        Ok(DanceStatus {
            pending_events: self.store.count_events(migration.id, Some(false))?,
            performed_events: self.store.count_events(migration.id, Some(true))?,
            migration,
        })
    }
}

/// Event time for a backfilled row: its own creation time when readable,
/// else the migration's.
fn backfill_event_time(row: &Row, fallback: DateTime<Utc>) -> String {
    let created = match row.get(CREATED_AT) {
        Some(SqlValue::Text(raw)) => parse_timestamp(raw).ok(),
        Some(SqlValue::Integer(secs)) => DateTime::<Utc>::from_timestamp(*secs, 0),
        _ => None,
    };
    format_timestamp(created.unwrap_or(fallback))
}
