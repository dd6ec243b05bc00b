//! Single-statement batch writers.
//!
//! Each accumulator collects units of work with no side effect and issues
//! exactly one statement on [`BulkOperation::perform`]. A second perform on
//! the same instance is a programming error and fails with
//! [`Error::DoublePerform`].

use std::collections::HashSet;

use tabledancer_common::{Error, Result};
use tracing::debug;

use crate::database::Database;
use crate::value::SqlValue;

pub trait BulkOperation {
    fn table(&self) -> &str;

    /// Number of pushed units.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_performed(&self) -> bool;

    /// The statement `perform` would run, `None` when nothing was pushed.
    fn to_sql(&self) -> Result<Option<String>>;

    /// Run the batched statement once. Returns affected rows, 0 when empty.
    fn perform(&mut self) -> Result<usize>;
}

fn perform_once<D: Database + ?Sized>(
    db: &D,
    table: &str,
    performed: &mut bool,
    sql: Option<String>,
) -> Result<usize> {
    if *performed {
        return Err(Error::DoublePerform(table.to_string()));
    }
    let Some(sql) = sql else {
        return Ok(0);
    };
    let affected = db.execute(&sql)?;
    *performed = true;
    debug!(table, affected, "bulk statement performed");
    Ok(affected)
}

fn id_list(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// `INSERT INTO table (cols) VALUES (...),(...)`.
pub struct BulkInsert<'db, D: Database + ?Sized> {
    db: &'db D,
    table: String,
    columns: Vec<String>,
    value_sets: Vec<Vec<SqlValue>>,
    performed: bool,
}

impl<'db, D: Database + ?Sized> BulkInsert<'db, D> {
    pub fn new(db: &'db D, table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            db,
            table: table.into(),
            columns,
            value_sets: Vec::new(),
            performed: false,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn value_sets(&self) -> &[Vec<SqlValue>] {
        &self.value_sets
    }

    pub fn push_values(&mut self, values: Vec<SqlValue>) {
        self.value_sets.push(values);
    }
}

impl<D: Database + ?Sized> BulkOperation for BulkInsert<'_, D> {
    fn table(&self) -> &str {
        &self.table
    }

    fn len(&self) -> usize {
        self.value_sets.len()
    }

    fn is_performed(&self) -> bool {
        self.performed
    }

    fn to_sql(&self) -> Result<Option<String>> {
        if self.value_sets.is_empty() {
            return Ok(None);
        }
        if let Some(bad) = self
            .value_sets
            .iter()
            .find(|set| set.len() != self.columns.len())
        {
            return Err(Error::validation(
                "value_sets",
                format!(
                    "expected {} values per row for {}, got {}",
                    self.columns.len(),
                    self.table,
                    bad.len()
                ),
            ));
        }

        let dialect = self.db.dialect();
        let rows = self
            .value_sets
            .iter()
            .map(|set| {
                let literals = set
                    .iter()
                    .map(|v| dialect.quote_value(v))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("({literals})")
            })
            .collect::<Vec<_>>()
            .join(",");

        Ok(Some(format!(
            "INSERT INTO {} ({}) VALUES {rows}",
            dialect.quote_identifier(&self.table),
            dialect.column_list(&self.columns)
        )))
    }

    fn perform(&mut self) -> Result<usize> {
        let sql = if self.performed { None } else { self.to_sql()? };
        perform_once(self.db, &self.table, &mut self.performed, sql)
    }
}

/// `REPLACE INTO dest (cols) SELECT cols FROM source WHERE id IN (...)`.
///
/// Upserts the current source state of each id. Ids are deduplicated.
pub struct BulkCopy<'db, D: Database + ?Sized> {
    db: &'db D,
    source_table: String,
    dest_table: String,
    columns: Vec<String>,
    record_ids: Vec<i64>,
    performed: bool,
}

impl<'db, D: Database + ?Sized> BulkCopy<'db, D> {
    pub fn new(
        db: &'db D,
        source_table: impl Into<String>,
        dest_table: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        Self {
            db,
            source_table: source_table.into(),
            dest_table: dest_table.into(),
            columns,
            record_ids: Vec::new(),
            performed: false,
        }
    }

    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn record_ids(&self) -> &[i64] {
        &self.record_ids
    }

    pub fn push_id(&mut self, id: i64) {
        self.record_ids.push(id);
    }

    fn unique_ids(&self) -> Vec<i64> {
        let mut seen = HashSet::with_capacity(self.record_ids.len());
        self.record_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

impl<D: Database + ?Sized> BulkOperation for BulkCopy<'_, D> {
    fn table(&self) -> &str {
        &self.dest_table
    }

    fn len(&self) -> usize {
        self.record_ids.len()
    }

    fn is_performed(&self) -> bool {
        self.performed
    }

    fn to_sql(&self) -> Result<Option<String>> {
        if self.record_ids.is_empty() {
            return Ok(None);
        }
        if self.columns.is_empty() {
            return Err(Error::validation(
                "columns",
                format!("no columns to copy into {}", self.dest_table),
            ));
        }

        let dialect = self.db.dialect();
        let columns = dialect.column_list(&self.columns);
        Ok(Some(format!(
            "REPLACE INTO {} ({columns}) SELECT {columns} FROM {} WHERE id IN ({})",
            dialect.quote_identifier(&self.dest_table),
            dialect.quote_identifier(&self.source_table),
            id_list(&self.unique_ids())
        )))
    }

    fn perform(&mut self) -> Result<usize> {
        let sql = if self.performed { None } else { self.to_sql()? };
        perform_once(self.db, &self.dest_table, &mut self.performed, sql)
    }
}

/// `DELETE FROM table WHERE id IN (...)`. Ids are passed through as pushed.
pub struct BulkDelete<'db, D: Database + ?Sized> {
    db: &'db D,
    table: String,
    record_ids: Vec<i64>,
    performed: bool,
}

impl<'db, D: Database + ?Sized> BulkDelete<'db, D> {
    pub fn new(db: &'db D, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
            record_ids: Vec::new(),
            performed: false,
        }
    }

    pub fn record_ids(&self) -> &[i64] {
        &self.record_ids
    }

    pub fn push_id(&mut self, id: i64) {
        self.record_ids.push(id);
    }
}

impl<D: Database + ?Sized> BulkOperation for BulkDelete<'_, D> {
    fn table(&self) -> &str {
        &self.table
    }

    fn len(&self) -> usize {
        self.record_ids.len()
    }

    fn is_performed(&self) -> bool {
        self.performed
    }

    fn to_sql(&self) -> Result<Option<String>> {
        if self.record_ids.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!(
            "DELETE FROM {} WHERE id IN ({})",
            self.db.dialect().quote_identifier(&self.table),
            id_list(&self.record_ids)
        )))
    }

    fn perform(&mut self) -> Result<usize> {
        let sql = if self.performed { None } else { self.to_sql()? };
        perform_once(self.db, &self.table, &mut self.performed, sql)
    }
}

#[cfg(test)]
mod tests {
    use super::{BulkCopy, BulkDelete, BulkInsert, BulkOperation};
    use crate::test_support::RecordingDatabase;
    use crate::value::SqlValue;
    use tabledancer_common::Error;

    fn columns() -> Vec<String> {
        vec!["one".into(), "two".into(), "three".into()]
    }

    fn values(a: &str, b: &str, c: &str) -> Vec<SqlValue> {
        vec![SqlValue::from(a), SqlValue::from(b), SqlValue::from(c)]
    }

    #[test]
    fn insert_starts_empty_and_appends_value_sets() {
        let db = RecordingDatabase::mysql();
        let mut bi = BulkInsert::new(&db, "account_transactions", columns());
        assert!(bi.value_sets().is_empty());
        assert_eq!(bi.table(), "account_transactions");

        bi.push_values(values("a", "b", "c"));
        bi.push_values(values("d", "e", "f"));
        assert_eq!(
            bi.value_sets(),
            &[values("a", "b", "c"), values("d", "e", "f")]
        );
        assert!(db.statements().is_empty());
    }

    #[test]
    fn insert_performs_one_statement_for_all_sets() {
        let db = RecordingDatabase::mysql();
        let mut bi = BulkInsert::new(&db, "account_transactions", columns());
        bi.push_values(values("a", "b", "c"));
        bi.push_values(values("d", "e", "f"));

        bi.perform().expect("perform should succeed");

        assert_eq!(
            db.statements(),
            vec![
                "INSERT INTO `account_transactions` (`one`,`two`,`three`) VALUES ('a','b','c'),('d','e','f')"
            ]
        );
        assert!(bi.is_performed());
    }

    #[test]
    fn insert_quotes_hostile_values() {
        let db = RecordingDatabase::sqlite();
        let mut bi = BulkInsert::new(&db, "foos", vec!["title".into()]);
        bi.push_values(vec![SqlValue::from("x'); DROP TABLE foos; --")]);

        let sql = bi.to_sql().expect("sql should build").expect("statement exists");
        assert_eq!(
            sql,
            "INSERT INTO \"foos\" (\"title\") VALUES ('x''); DROP TABLE foos; --')"
        );
    }

    #[test]
    fn insert_rejects_mismatched_arity() {
        let db = RecordingDatabase::mysql();
        let mut bi = BulkInsert::new(&db, "foos", columns());
        bi.push_values(vec![SqlValue::from("only-one")]);

        assert!(matches!(bi.perform(), Err(Error::Validation { .. })));
        assert!(db.statements().is_empty());
        assert!(!bi.is_performed());
    }

    #[test]
    fn empty_perform_executes_nothing() {
        let db = RecordingDatabase::mysql();

        let mut bi = BulkInsert::new(&db, "foos", columns());
        assert_eq!(bi.perform().expect("empty insert is a no-op"), 0);

        let mut bc = BulkCopy::new(&db, "foos", "foos_danced", columns());
        assert_eq!(bc.perform().expect("empty copy is a no-op"), 0);

        let mut bd = BulkDelete::new(&db, "foos");
        assert_eq!(bd.perform().expect("empty delete is a no-op"), 0);

        assert!(db.statements().is_empty());
    }

    #[test]
    fn second_perform_fails() {
        let db = RecordingDatabase::mysql();

        let mut bi = BulkInsert::new(&db, "foos", columns());
        bi.push_values(values("a", "b", "c"));
        bi.perform().expect("first perform should succeed");
        assert!(matches!(bi.perform(), Err(Error::DoublePerform(_))));

        let mut bc = BulkCopy::new(&db, "foos", "foos_danced", columns());
        bc.push_id(1);
        bc.perform().expect("first perform should succeed");
        assert!(matches!(bc.perform(), Err(Error::DoublePerform(_))));

        let mut bd = BulkDelete::new(&db, "foos");
        bd.push_id(1);
        bd.perform().expect("first perform should succeed");
        assert!(matches!(bd.perform(), Err(Error::DoublePerform(_))));

        assert_eq!(db.statements().len(), 3);
    }

    #[test]
    fn copy_replaces_from_source_by_id() {
        let db = RecordingDatabase::mysql();
        let mut bc = BulkCopy::new(&db, "account_transactions", "account_transactions_danced", columns());
        assert_eq!(bc.source_table(), "account_transactions");
        assert_eq!(bc.table(), "account_transactions_danced");
        bc.push_id(1);
        bc.push_id(2);

        bc.perform().expect("perform should succeed");

        assert_eq!(
            db.statements(),
            vec![
                "REPLACE INTO `account_transactions_danced` (`one`,`two`,`three`) SELECT `one`,`two`,`three` FROM `account_transactions` WHERE id IN (1,2)"
            ]
        );
    }

    #[test]
    fn copy_deduplicates_ids_but_delete_does_not() {
        let db = RecordingDatabase::mysql();

        let mut bc = BulkCopy::new(&db, "foos", "foos_danced", columns());
        let mut bd = BulkDelete::new(&db, "foos_danced");
        for id in [5, 5, 7] {
            bc.push_id(id);
            bd.push_id(id);
        }

        let copy_sql = bc.to_sql().unwrap().expect("copy statement exists");
        let delete_sql = bd.to_sql().unwrap().expect("delete statement exists");
        assert!(copy_sql.ends_with("WHERE id IN (5,7)"));
        assert!(delete_sql.ends_with("WHERE id IN (5,5,7)"));
        assert_eq!(bc.record_ids(), &[5, 5, 7]);
    }

    #[test]
    fn copy_without_columns_is_rejected() {
        let db = RecordingDatabase::mysql();
        let mut bc = BulkCopy::new(&db, "foos", "foos_danced", Vec::new());
        bc.push_id(1);
        assert!(matches!(bc.perform(), Err(Error::Validation { .. })));
    }

    #[test]
    fn delete_targets_table_by_id() {
        let db = RecordingDatabase::mysql();
        let mut bd = BulkDelete::new(&db, "account_transactions");
        bd.push_id(1);
        bd.perform().expect("perform should succeed");

        assert_eq!(
            db.statements(),
            vec!["DELETE FROM `account_transactions` WHERE id IN (1)"]
        );
    }

    #[test]
    fn failed_statement_leaves_instance_retryable() {
        let db = RecordingDatabase::mysql();
        db.fail_on("DELETE");
        let mut bd = BulkDelete::new(&db, "foos");
        bd.push_id(3);

        assert!(bd.perform().is_err());
        assert!(!bd.is_performed());
    }
}
