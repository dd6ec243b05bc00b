use tabledancer_common::Instruction;

use crate::value::SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectKind {
    Sqlite,
    MySql,
}

/// Renders every SQL fragment whose spelling differs between engines.
///
/// All identifiers and literals that reach a statement go through
/// [`Dialect::quote_identifier`] and [`Dialect::quote_value`]; nothing is
/// interpolated raw except integer ids.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    fn quote_identifier(&self, ident: &str) -> String;

    fn quote_value(&self, value: &SqlValue) -> String;

    /// Statements that take exclusive write access to `tables`, in order.
    fn lock_tables(&self, tables: &[&str]) -> Vec<String>;

    /// Statements that commit and give the lock back, in order.
    fn unlock_tables(&self) -> Vec<String>;

    fn begin_transaction(&self, savepoint: &str, nested: bool) -> String;

    fn commit_transaction(&self, savepoint: &str, nested: bool) -> String;

    fn rollback_transaction(&self, savepoint: &str, nested: bool) -> Vec<String>;

    /// Expression evaluating to the current time inside a trigger body.
    fn current_timestamp(&self) -> &'static str;

    /// `AFTER <instruction>` row trigger on `table` that runs `action`.
    fn create_trigger(
        &self,
        name: &str,
        instruction: Instruction,
        table: &str,
        action: &str,
    ) -> String;

    fn drop_trigger(&self, name: &str) -> String;

    /// Statements renaming every `(from, to)` pair. Executed inside one
    /// transaction by the caller; engines that rename atomically emit one statement.
    fn rename_tables(&self, renames: &[(&str, &str)]) -> Vec<String>;

    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn quote_value(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            other => quote_common(other),
        }
    }

    fn lock_tables(&self, _tables: &[&str]) -> Vec<String> {
        // SQLite locks the whole database; an exclusive transaction is the
        // narrowest write lock it offers.
        vec!["BEGIN EXCLUSIVE".to_string()]
    }

    fn unlock_tables(&self) -> Vec<String> {
        vec!["COMMIT".to_string()]
    }

    fn begin_transaction(&self, savepoint: &str, _nested: bool) -> String {
        format!("SAVEPOINT {}", self.quote_identifier(savepoint))
    }

    fn commit_transaction(&self, savepoint: &str, _nested: bool) -> String {
        format!("RELEASE SAVEPOINT {}", self.quote_identifier(savepoint))
    }

    fn rollback_transaction(&self, savepoint: &str, _nested: bool) -> Vec<String> {
        let name = self.quote_identifier(savepoint);
        vec![
            format!("ROLLBACK TO SAVEPOINT {name}"),
            format!("RELEASE SAVEPOINT {name}"),
        ]
    }

    fn current_timestamp(&self) -> &'static str {
        "strftime('%Y-%m-%d %H:%M:%f', 'now')"
    }

    fn create_trigger(
        &self,
        name: &str,
        instruction: Instruction,
        table: &str,
        action: &str,
    ) -> String {
        format!(
            "CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW BEGIN {}; END",
            self.quote_identifier(name),
            instruction.name().to_uppercase(),
            self.quote_identifier(table),
            action
        )
    }

    fn drop_trigger(&self, name: &str) -> String {
        format!("DROP TRIGGER IF EXISTS {}", self.quote_identifier(name))
    }

    fn rename_tables(&self, renames: &[(&str, &str)]) -> Vec<String> {
        renames
            .iter()
            .map(|(from, to)| {
                format!(
                    "ALTER TABLE {} RENAME TO {}",
                    self.quote_identifier(from),
                    self.quote_identifier(to)
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::MySql
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn quote_value(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Text(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('\'');
                for ch in s.chars() {
                    match ch {
                        '\0' => out.push_str("\\0"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        '"' => out.push_str("\\\""),
                        '\x1a' => out.push_str("\\Z"),
                        c => out.push(c),
                    }
                }
                out.push('\'');
                out
            }
            other => quote_common(other),
        }
    }

    fn lock_tables(&self, tables: &[&str]) -> Vec<String> {
        let locks = tables
            .iter()
            .map(|t| format!("{} WRITE", self.quote_identifier(t)))
            .collect::<Vec<_>>()
            .join(", ");
        vec![
            "SET autocommit=0".to_string(),
            format!("LOCK TABLES {locks}"),
        ]
    }

    fn unlock_tables(&self) -> Vec<String> {
        vec![
            "COMMIT".to_string(),
            "UNLOCK TABLES".to_string(),
            "SET autocommit=1".to_string(),
        ]
    }

    fn begin_transaction(&self, savepoint: &str, nested: bool) -> String {
        // START TRANSACTION would implicitly release LOCK TABLES.
        if nested {
            format!("SAVEPOINT {}", self.quote_identifier(savepoint))
        } else {
            "START TRANSACTION".to_string()
        }
    }

    fn commit_transaction(&self, savepoint: &str, nested: bool) -> String {
        if nested {
            format!("RELEASE SAVEPOINT {}", self.quote_identifier(savepoint))
        } else {
            "COMMIT".to_string()
        }
    }

    fn rollback_transaction(&self, savepoint: &str, nested: bool) -> Vec<String> {
        if nested {
            vec![format!(
                "ROLLBACK TO SAVEPOINT {}",
                self.quote_identifier(savepoint)
            )]
        } else {
            vec!["ROLLBACK".to_string()]
        }
    }

    fn current_timestamp(&self) -> &'static str {
        "CURRENT_TIMESTAMP(3)"
    }

    fn create_trigger(
        &self,
        name: &str,
        instruction: Instruction,
        table: &str,
        action: &str,
    ) -> String {
        format!(
            "CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW {}",
            self.quote_identifier(name),
            instruction.name().to_uppercase(),
            self.quote_identifier(table),
            action
        )
    }

    fn drop_trigger(&self, name: &str) -> String {
        format!("DROP TRIGGER IF EXISTS {}", self.quote_identifier(name))
    }

    fn rename_tables(&self, renames: &[(&str, &str)]) -> Vec<String> {
        let pairs = renames
            .iter()
            .map(|(from, to)| {
                format!(
                    "{} TO {}",
                    self.quote_identifier(from),
                    self.quote_identifier(to)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        vec![format!("RENAME TABLE {pairs}")]
    }
}

fn quote_common(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(v) => v.to_string(),
        SqlValue::Real(v) if v.is_finite() => format!("{v:?}"),
        SqlValue::Real(_) => "NULL".to_string(),
        SqlValue::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
            format!("X'{hex}'")
        }
        SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
    }
}
