use tabledancer_common::{Error, Result};
use tracing::{debug, warn};

use crate::database::Database;

/// Exclusive write lock over a set of tables, released on drop.
///
/// Prefer [`TableLock::release`] so unlock failures surface; dropping the
/// guard only logs them.
pub struct TableLock<'db, D: Database + ?Sized> {
    db: &'db D,
    tables: Vec<String>,
    released: bool,
}

impl<'db, D: Database + ?Sized> TableLock<'db, D> {
    pub fn acquire(db: &'db D, tables: &[&str]) -> Result<Self> {
        let dialect = db.dialect();
        for stmt in dialect.lock_tables(tables) {
            if let Err(err) = db.execute(&stmt) {
                for unlock in dialect.unlock_tables() {
                    if let Err(unlock_err) = db.execute(&unlock) {
                        debug!("unlock after failed acquire: {unlock_err}");
                    }
                }
                return Err(Error::Lock(format!(
                    "failed to lock {}: {err}",
                    tables.join(", ")
                )));
            }
        }

        debug!(tables = ?tables, "tables locked");
        Ok(Self {
            db,
            tables: tables.iter().map(|t| t.to_string()).collect(),
            released: false,
        })
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Commit and unlock. Every unlock statement runs; the first failure is returned.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.unlock()
    }

    fn unlock(&self) -> Result<()> {
        let mut first_err = None;
        for stmt in self.db.dialect().unlock_tables() {
            if let Err(err) = self.db.execute(&stmt) {
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(Error::Lock(format!(
                "failed to unlock {}: {err}",
                self.tables.join(", ")
            ))),
            None => {
                debug!(tables = ?self.tables, "tables unlocked");
                Ok(())
            }
        }
    }
}

impl<D: Database + ?Sized> Drop for TableLock<'_, D> {
    fn drop(&mut self) {
        if !self.released
            && let Err(err) = self.unlock()
        {
            warn!("{err}");
        }
    }
}

/// Run `body` while holding a [`TableLock`] on `tables`.
///
/// The lock is released whether or not `body` succeeds; a body error wins
/// over a release error.
pub fn within_table_lock<D, T>(
    db: &D,
    tables: &[&str],
    body: impl FnOnce() -> Result<T>,
) -> Result<T>
where
    D: Database + ?Sized,
{
    let lock = TableLock::acquire(db, tables)?;
    match body() {
        Ok(value) => {
            lock.release()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(release_err) = lock.release() {
                warn!("{release_err}");
            }
            Err(err)
        }
    }
}
