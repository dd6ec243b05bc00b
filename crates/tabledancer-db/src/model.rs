use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tabledancer_common::{Error, Instruction, MigrationId, Phase, Result};

use crate::value::Row;

/// Appended to the source table name to name the destination table.
pub const DEST_SUFFIX: &str = "_danced";
/// Name the source table is moved to at cutover, as a suffix.
pub const DECOMMISSIONED_SUFFIX: &str = "_decommissioned";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Persisted record of one migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub id: MigrationId,
    pub source_table: String,
    /// Fixed when the record is created; never recomputed.
    pub dest_table: String,
    pub phase: Phase,
    /// Largest source id seen at init, 0 for an empty table.
    pub last_copy_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Migration {
    pub fn dest_table_for(source_table: &str) -> String {
        format!("{source_table}{DEST_SUFFIX}")
    }

    pub fn decommissioned_table(&self) -> String {
        format!("{}{DECOMMISSIONED_SUFFIX}", self.source_table)
    }

    pub fn from_row(row: &Row) -> Result<Self> {
        let id = row
            .get_i64("id")
            .ok_or_else(|| Error::Database("migration row without id".into()))?;

        Ok(Self {
            id: MigrationId::new(id),
            source_table: required_str(row, "source_table")?.to_string(),
            dest_table: required_str(row, "dest_table")?.to_string(),
            phase: Phase::from_db(required_str(row, "phase")?)?,
            last_copy_id: row.get_i64("last_copy_id").unwrap_or(0),
            created_at: parse_timestamp(required_str(row, "created_at")?)?,
            updated_at: parse_timestamp(required_str(row, "updated_at")?)?,
        })
    }
}

/// One captured mutation of a source row, queued for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: i64,
    pub migration_id: MigrationId,
    pub instruction: Instruction,
    pub event_time: DateTime<Utc>,
    pub source_id: i64,
    pub performed: bool,
}

impl ChangeEvent {
    pub fn from_row(row: &Row) -> Result<Self> {
        let int = |column: &str| {
            row.get_i64(column)
                .ok_or_else(|| Error::Database(format!("change event without {column}")))
        };

        Ok(Self {
            id: int("id")?,
            migration_id: MigrationId::new(int("migration_id")?),
            instruction: Instruction::from_code(int("instruction")?)?,
            event_time: parse_timestamp(required_str(row, "event_time")?)?,
            source_id: int("source_id")?,
            performed: int("performed")? != 0,
        })
    }
}

fn required_str<'r>(row: &'r Row, column: &str) -> Result<&'r str> {
    row.get_str(column)
        .ok_or_else(|| Error::Database(format!("missing text column {column}")))
}

/// Sortable text form shared with trigger-written event times.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    for format in [TIMESTAMP_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }

    Err(Error::Database(format!("invalid timestamp format: {raw}")))
}
