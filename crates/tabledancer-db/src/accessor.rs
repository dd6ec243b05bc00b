use tabledancer_common::{Error, Result};

use crate::database::Database;
use crate::value::{Row, SqlValue};

/// Generic access to any table keyed by an integer `id` column.
pub struct TableAccessor<'db, D: Database + ?Sized> {
    db: &'db D,
    table: String,
}

impl<'db, D: Database + ?Sized> TableAccessor<'db, D> {
    pub fn new(db: &'db D, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn exists(&self) -> Result<bool> {
        self.db.table_exists(&self.table)
    }

    pub fn columns(&self) -> Result<Vec<String>> {
        self.db.column_names(&self.table)
    }

    pub fn has_column(&self, column: &str) -> Result<bool> {
        Ok(self.columns()?.iter().any(|c| c == column))
    }

    /// Largest id currently in the table, `None` when it is empty.
    pub fn max_id(&self) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT MAX({}) AS max_id FROM {}",
            self.ident("id"),
            self.ident(&self.table)
        );
        let rows = self.db.query(&sql)?;
        Ok(rows.first().and_then(|row| row.get_i64("max_id")))
    }

    /// Row count, optionally restricted to `id <= up_to_id`.
    pub fn count(&self, up_to_id: Option<i64>) -> Result<u64> {
        let mut sql = format!("SELECT COUNT(*) AS n FROM {}", self.ident(&self.table));
        if let Some(max) = up_to_id {
            sql.push_str(&format!(" WHERE {} <= {max}", self.ident("id")));
        }
        let rows = self.db.query(&sql)?;
        let n = rows.first().and_then(|row| row.get_i64("n")).unwrap_or(0);
        Ok(n.max(0) as u64)
    }

    /// Next page of rows with `after_id < id [<= up_to_id]`, in id order.
    /// The first page passes `None` and has no lower bound.
    pub fn page(
        &self,
        after_id: Option<i64>,
        up_to_id: Option<i64>,
        columns: &[String],
        limit: usize,
    ) -> Result<Vec<Row>> {
        let select = if columns.is_empty() {
            "*".to_string()
        } else {
            self.db.dialect().column_list(columns)
        };
        let id = self.ident("id");
        let mut bounds = Vec::new();
        if let Some(min) = after_id {
            bounds.push(format!("{id} > {min}"));
        }
        if let Some(max) = up_to_id {
            bounds.push(format!("{id} <= {max}"));
        }
        let mut sql = format!("SELECT {select} FROM {}", self.ident(&self.table));
        if !bounds.is_empty() {
            sql.push_str(&format!(" WHERE {}", bounds.join(" AND ")));
        }
        sql.push_str(&format!(" ORDER BY {id} ASC LIMIT {limit}"));
        self.db.query(&sql)
    }

    pub fn find(&self, id: i64) -> Result<Option<Row>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = {id}",
            self.ident(&self.table),
            self.ident("id")
        );
        Ok(self.db.query(&sql)?.into_iter().next())
    }

    /// Insert one row and return its id.
    pub fn create(&self, values: &[(&str, SqlValue)]) -> Result<i64> {
        let sql = if values.is_empty() {
            format!(
                "INSERT INTO {} ({}) VALUES (NULL)",
                self.ident(&self.table),
                self.ident("id")
            )
        } else {
            let (columns, literals) = self.split(values);
            format!(
                "INSERT INTO {} ({columns}) VALUES ({literals})",
                self.ident(&self.table)
            )
        };
        self.db.execute(&sql)?;
        self.db.last_insert_id()
    }

    pub fn update(&self, id: i64, values: &[(&str, SqlValue)]) -> Result<usize> {
        if values.is_empty() {
            return Err(Error::validation("values", "update needs at least one column"));
        }
        let dialect = self.db.dialect();
        let assignments = values
            .iter()
            .map(|(column, value)| {
                format!(
                    "{} = {}",
                    dialect.quote_identifier(column),
                    dialect.quote_value(value)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {} = {id}",
            self.ident(&self.table),
            self.ident("id")
        );
        self.db.execute(&sql)
    }

    pub fn delete(&self, id: i64) -> Result<usize> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = {id}",
            self.ident(&self.table),
            self.ident("id")
        );
        self.db.execute(&sql)
    }

    fn split(&self, values: &[(&str, SqlValue)]) -> (String, String) {
        let dialect = self.db.dialect();
        let columns = values
            .iter()
            .map(|(c, _)| dialect.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(",");
        let literals = values
            .iter()
            .map(|(_, v)| dialect.quote_value(v))
            .collect::<Vec<_>>()
            .join(",");
        (columns, literals)
    }

    fn ident(&self, name: &str) -> String {
        self.db.dialect().quote_identifier(name)
    }
}

#[cfg(test)]
mod tests {
    use super::TableAccessor;
    use crate::database::Database;
    use crate::sqlite::SqliteDatabase;
    use crate::value::SqlValue;

    fn seeded() -> SqliteDatabase {
        let db = SqliteDatabase::in_memory().expect("failed to open in-memory database");
        db.execute_batch("CREATE TABLE foos (id INTEGER PRIMARY KEY, title TEXT);")
            .expect("failed to create table");
        db
    }

    #[test]
    fn empty_table_has_no_max_id() {
        let db = seeded();
        let foos = TableAccessor::new(&db, "foos");
        assert_eq!(foos.max_id().expect("max id should load"), None);
        assert_eq!(foos.count(None).expect("count should load"), 0);
    }

    #[test]
    fn create_find_update_delete_cycle() {
        let db = seeded();
        let foos = TableAccessor::new(&db, "foos");

        let id = foos
            .create(&[("title", SqlValue::from("o'brien"))])
            .expect("create should succeed");
        let row = foos.find(id).expect("find should succeed").expect("row exists");
        assert_eq!(row.get_str("title"), Some("o'brien"));

        foos.update(id, &[("title", SqlValue::from("changed"))])
            .expect("update should succeed");
        let row = foos.find(id).expect("find should succeed").expect("row exists");
        assert_eq!(row.get_str("title"), Some("changed"));

        assert_eq!(foos.delete(id).expect("delete should succeed"), 1);
        assert!(foos.find(id).expect("find should succeed").is_none());
    }

    #[test]
    fn create_without_values_assigns_an_id() {
        let db = seeded();
        let foos = TableAccessor::new(&db, "foos");
        assert_eq!(foos.create(&[]).expect("create should succeed"), 1);
        assert_eq!(foos.create(&[]).expect("create should succeed"), 2);
    }

    #[test]
    fn pages_walk_ids_in_order_up_to_bound() {
        let db = seeded();
        let foos = TableAccessor::new(&db, "foos");
        for _ in 0..5 {
            foos.create(&[]).expect("create should succeed");
        }

        let columns = vec!["id".to_string()];
        let first = foos.page(None, Some(4), &columns, 3).expect("page should load");
        let ids: Vec<i64> = first.iter().filter_map(|r| r.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let second = foos.page(Some(3), Some(4), &columns, 3).expect("page should load");
        let ids: Vec<i64> = second.iter().filter_map(|r| r.id()).collect();
        assert_eq!(ids, vec![4]);

        assert_eq!(foos.count(Some(4)).expect("count should load"), 4);
        assert_eq!(foos.max_id().expect("max id should load"), Some(5));
    }

    #[test]
    fn first_page_includes_zero_and_negative_ids() {
        let db = seeded();
        db.execute_batch("INSERT INTO foos (id) VALUES (0), (-3), (1), (2);")
            .expect("seed should succeed");
        let foos = TableAccessor::new(&db, "foos");

        let columns = vec!["id".to_string()];
        let ids: Vec<i64> = foos
            .page(None, Some(1), &columns, 10)
            .expect("page should load")
            .iter()
            .filter_map(|r| r.id())
            .collect();
        assert_eq!(ids, vec![-3, 0, 1]);

        let rest: Vec<i64> = foos
            .page(Some(0), None, &columns, 10)
            .expect("page should load")
            .iter()
            .filter_map(|r| r.id())
            .collect();
        assert_eq!(rest, vec![1, 2]);
    }
}
