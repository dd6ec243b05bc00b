use std::thread;
use std::time::Duration;

use serde::Serialize;
use tabledancer_common::{Instruction, Result};
use tabledancer_db::{
    BulkCopy, BulkDelete, BulkOperation, ChangeEvent, Database, Migration, MigrationStore,
    with_transaction,
};
use tracing::{debug, info};

/// Totals for one or more applied replay pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub pages: usize,
    pub events: usize,
    /// Distinct ids re-read from the source.
    pub copied_ids: usize,
    pub deleted_ids: usize,
    /// Pauses taken between pages.
    pub rests: usize,
}

impl ReplayReport {
    fn absorb(&mut self, page: &PageReport) {
        self.pages += 1;
        self.events += page.events;
        self.copied_ids += page.copied_ids;
        self.deleted_ids += page.deleted_ids;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PageReport {
    pub events: usize,
    pub copied_ids: usize,
    pub deleted_ids: usize,
}

/// Drains a migration's unperformed change events into its destination table.
pub struct ReplayEngine<'db, D: Database + ?Sized> {
    store: MigrationStore<'db, D>,
    migration: Migration,
    columns: Vec<String>,
    page_size: usize,
    rest_interval: Duration,
}

impl<'db, D: Database + ?Sized> ReplayEngine<'db, D> {
    /// `columns` is the shared column set copied from source to destination.
    pub fn new(
        store: MigrationStore<'db, D>,
        migration: Migration,
        columns: Vec<String>,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            migration,
            columns,
            page_size: page_size.max(1),
            rest_interval: Duration::ZERO,
        }
    }

    pub fn with_rest_interval(mut self, rest_interval: Duration) -> Self {
        self.rest_interval = rest_interval;
        self
    }

    /// Apply pages until one holds at most `threshold` events or the backlog is empty.
    pub fn drain(&self, threshold: usize) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();

        while let Some(page) = self.apply_next_page()? {
            report.absorb(&page);
            if page.events <= threshold {
                break;
            }
            if self.rest_interval.is_zero() {
                continue;
            }
            if self.store.count_events(self.migration.id, Some(false))? == 0 {
                break;
            }
            thread::sleep(self.rest_interval);
            report.rests += 1;
        }

        info!(
            migration_id = self.migration.id.get(),
            pages = report.pages,
            events = report.events,
            threshold,
            "replay drained"
        );
        Ok(report)
    }

    /// Fetch and apply the oldest page; `None` once nothing is pending.
    pub fn apply_next_page(&self) -> Result<Option<PageReport>> {
        let events = self
            .store
            .next_unperformed_page(self.migration.id, self.page_size)?;
        if events.is_empty() {
            return Ok(None);
        }
        self.apply_page(&events).map(Some)
    }

    /// Apply one page: deletes, then copies of current source rows, then
    /// the performed flags, all in one transaction.
    pub fn apply_page(&self, events: &[ChangeEvent]) -> Result<PageReport> {
        let db = self.store.db();
        let mut copy = BulkCopy::new(
            db,
            &self.migration.source_table,
            &self.migration.dest_table,
            self.columns.clone(),
        );
        let mut delete = BulkDelete::new(db, &self.migration.dest_table);

        for event in events {
            match event.instruction {
                Instruction::Insert | Instruction::Update => copy.push_id(event.source_id),
                Instruction::Delete => {
                    delete.push_id(event.source_id);
                    // The id may be live again in the source; the copy restores it if so.
                    copy.push_id(event.source_id);
                }
            }
        }

        let event_ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        let deleted_ids = delete.len();
        let copied_ids = {
            let mut ids = copy.record_ids().to_vec();
            ids.sort_unstable();
            ids.dedup();
            ids.len()
        };

        with_transaction(db, "tabledancer_replay_page", || {
            delete.perform()?;
            copy.perform()?;
            self.store.mark_performed(&event_ids)?;
            Ok(())
        })?;

        debug!(
            migration_id = self.migration.id.get(),
            events = events.len(),
            copied_ids,
            deleted_ids,
            "applied replay page"
        );
        Ok(PageReport {
            events: events.len(),
            copied_ids,
            deleted_ids,
        })
    }
}
