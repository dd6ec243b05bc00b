use std::time::Duration;

/// Tuning knobs for one migration, fixed when the dance is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanceSettings {
    /// Rows per backfill page and events per replay page.
    pub batch_size: usize,
    /// Replay stops once a page holds at most this many events.
    pub replay_threshold: usize,
    pub rest_interval: Duration,
    pub copy_rest_interval: Duration,
    pub install_triggers: bool,
}

impl Default for DanceSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            replay_threshold: 20,
            rest_interval: Duration::ZERO,
            copy_rest_interval: Duration::ZERO,
            install_triggers: true,
        }
    }
}

impl DanceSettings {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_replay_threshold(mut self, replay_threshold: usize) -> Self {
        self.replay_threshold = replay_threshold;
        self
    }

    pub fn without_triggers(mut self) -> Self {
        self.install_triggers = false;
        self
    }
}
