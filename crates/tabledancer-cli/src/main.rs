mod report;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tabledancer_common::MigrationId;
use tabledancer_config::{ConfigLoader, TableDancerConfig};
use tabledancer_db::SqliteDatabase;
use tabledancer_engine::{DanceSettings, DanceStatus, TableDance};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tabledancer",
    version,
    about = "tabledancer - online table migrations with live change capture"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (YAML or TOML); defaults to tabledancer.yml/.toml in the working directory
    #[arg(long, global = true, env = "TABLEDANCER_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file, overriding the config
    #[arg(long, global = true, env = "TABLEDANCER_DATABASE")]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a migration record for a table
    Setup { table: String },

    /// Record the backfill bound and install capture triggers
    Init {
        id: i64,

        /// Skip installing the change-capture triggers
        #[arg(long)]
        no_triggers: bool,
    },

    /// Enqueue backfill events for rows that existed at init
    Copy { id: i64 },

    /// Drain queued events into the destination table
    Replay { id: i64 },

    /// Drain the rest under lock and swap the tables
    Cutover { id: i64 },

    /// Setup, init, copy, replay and cutover in one go
    Run {
        table: String,

        #[arg(long)]
        no_triggers: bool,
    },

    /// Show one migration, or all of them
    Status {
        id: Option<i64>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drop triggers and mark a migration aborted
    Abort {
        id: i64,

        /// Also delete every row from the destination table
        #[arg(long)]
        purge: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::current_dir()?,
    };
    let mut config = loader.load()?;
    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }

    init_tracing(&cli, &config)?;
    info!("using database {}", config.database.path.display());

    tokio::task::spawn_blocking(move || execute(cli.command, &config))
        .await
        .context("migration task panicked")?
}

fn init_tracing(cli: &Cli, config: &TableDancerConfig) -> Result<()> {
    let level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn dance_settings(config: &TableDancerConfig) -> DanceSettings {
    DanceSettings {
        batch_size: config.batch_size,
        replay_threshold: config.replay_threshold,
        rest_interval: config.rest_interval(),
        copy_rest_interval: config.copy_rest_interval(),
        install_triggers: config.install_triggers,
    }
}

fn open_database(config: &TableDancerConfig) -> Result<SqliteDatabase> {
    let db = SqliteDatabase::open(
        &config.database.path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )?;
    Ok(db)
}

fn execute(command: Commands, config: &TableDancerConfig) -> Result<()> {
    let db = open_database(config)?;
    let settings = dance_settings(config);

    match command {
        Commands::Setup { table } => {
            let dance = TableDance::setup(&db, &table, settings)?;
            report::print_setup(dance.migration());
        }
        Commands::Init { id, no_triggers } => {
            let settings = if no_triggers {
                settings.without_triggers()
            } else {
                settings
            };
            let mut dance = TableDance::load(&db, MigrationId::new(id), settings)?;
            let init = dance.init()?;
            report::print_init(dance.migration(), &init);
        }
        Commands::Copy { id } => {
            let mut dance = TableDance::load(&db, MigrationId::new(id), settings)?;
            let copy = dance.copy()?;
            report::print_copy(dance.migration(), &copy);
        }
        Commands::Replay { id } => {
            let mut dance = TableDance::load(&db, MigrationId::new(id), settings)?;
            let replay = dance.replay()?;
            report::print_replay(dance.migration(), &replay);
        }
        Commands::Cutover { id } => {
            let mut dance = TableDance::load(&db, MigrationId::new(id), settings)?;
            let cutover = dance.cutover()?;
            report::print_cutover(dance.migration(), &cutover);
        }
        Commands::Run { table, no_triggers } => {
            let settings = if no_triggers {
                settings.without_triggers()
            } else {
                settings
            };
            let run = TableDance::run(&db, &table, settings)?;
            report::print_run(&run);
        }
        Commands::Status { id, json } => {
            let statuses = match id {
                Some(id) => vec![TableDance::load(&db, MigrationId::new(id), settings)?.status()?],
                None => TableDance::list(&db)?
                    .into_iter()
                    .map(|m| TableDance::load(&db, m.id, settings.clone())?.status())
                    .collect::<tabledancer_common::Result<Vec<DanceStatus>>>()?,
            };
            if json {
                match (id, statuses.first()) {
                    (Some(_), Some(status)) => {
                        println!("{}", serde_json::to_string_pretty(status)?)
                    }
                    _ => println!("{}", serde_json::to_string_pretty(&statuses)?),
                }
            } else if id.is_some() {
                statuses.iter().for_each(report::print_status);
            } else {
                report::print_status_table(&statuses);
            }
        }
        Commands::Abort { id, purge } => {
            let mut dance = TableDance::load(&db, MigrationId::new(id), settings)?;
            dance.abort(purge)?;
            println!("Migration {id} aborted");
            if purge {
                println!("  Purged {}", dance.migration().dest_table);
            }
        }
    }

    Ok(())
}
