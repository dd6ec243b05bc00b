pub mod dance;
pub mod replay;
pub mod settings;
pub mod triggers;

pub use dance::{CopyReport, CutoverReport, DanceStatus, InitReport, RunReport, TableDance};
pub use replay::{PageReport, ReplayEngine, ReplayReport};
pub use settings::DanceSettings;
pub use triggers::TriggerManager;
