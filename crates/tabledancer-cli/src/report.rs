use tabledancer_db::Migration;
use tabledancer_engine::{CopyReport, CutoverReport, DanceStatus, InitReport, ReplayReport, RunReport};

pub fn print_setup(migration: &Migration) {
    println!(
        "Migration {} created: {} -> {}",
        migration.id, migration.source_table, migration.dest_table
    );
    println!(
        "  Create {} with the new schema, then run `tabledancer init {}`.",
        migration.dest_table, migration.id
    );
}

pub fn print_init(migration: &Migration, report: &InitReport) {
    println!("Migration {} initialised", migration.id);
    println!("  Backfill bound: id <= {}", report.last_copy_id);
    let triggers = if report.triggers_installed {
        "installed"
    } else {
        "skipped"
    };
    println!("  Capture triggers: {triggers}");
}

pub fn print_copy(migration: &Migration, report: &CopyReport) {
    println!("Migration {} backfill enqueued", migration.id);
    println!("  Events:  {} in {} pages", report.events, report.pages);
}

pub fn print_replay(migration: &Migration, report: &ReplayReport) {
    println!("Migration {} replayed", migration.id);
    print_replay_lines("Replay", report);
}

fn print_replay_lines(label: &str, report: &ReplayReport) {
    println!(
        "  {label:<8} {} events in {} pages ({} ids copied, {} deleted)",
        report.events, report.pages, report.copied_ids, report.deleted_ids
    );
}

pub fn print_cutover(migration: &Migration, report: &CutoverReport) {
    println!("Migration {} cut over", migration.id);
    print_replay_lines("Catch-up", &report.catch_up);
    print_replay_lines("Locked", &report.final_drain);
    println!(
        "  Tables:  {} is live, old table kept as {}",
        migration.source_table, report.decommissioned_table
    );
}

pub fn print_run(report: &RunReport) {
    println!("Table Dance Report: {}", report.migration.source_table);
    println!("─────────────────────────");
    println!("  Migration: {}", report.migration.id);
    println!(
        "  Backfill:  {} rows up to id {}",
        report.copy.events, report.init.last_copy_id
    );
    print_replay_lines("Replay", &report.replay);
    print_replay_lines("Catch-up", &report.cutover.catch_up);
    print_replay_lines("Locked", &report.cutover.final_drain);
    println!("  Old table: {}", report.cutover.decommissioned_table);
}

pub fn print_status(status: &DanceStatus) {
    let m = &status.migration;
    println!("Migration {}: {} -> {}", m.id, m.source_table, m.dest_table);
    println!("  Phase:     {}", m.phase);
    println!("  Bound:     id <= {}", m.last_copy_id);
    println!(
        "  Events:    {} pending, {} performed",
        status.pending_events, status.performed_events
    );
    println!("  Updated:   {}", m.updated_at.format("%Y-%m-%d %H:%M:%S"));
}

pub fn print_status_table(statuses: &[DanceStatus]) {
    println!("Migrations:");
    if statuses.is_empty() {
        println!("  (none - start one with `tabledancer setup <table>`)");
    }
    for status in statuses {
        let m = &status.migration;
        println!(
            "  {:>4}  {:<24} {:<9} {} pending",
            m.id.get(),
            m.source_table,
            m.phase.as_str(),
            status.pending_events
        );
    }
}
