use std::path::{Path, PathBuf};

use tabledancer_common::{Error, Result};
use tracing::info;

use crate::model::TableDancerConfig;

const YAML_FILE: &str = "tabledancer.yml";
const TOML_FILE: &str = "tabledancer.toml";

pub struct ConfigLoader {
    source: ConfigSource,
}

enum ConfigSource {
    /// Search a directory for `tabledancer.yml`, then `tabledancer.toml`.
    Dir(PathBuf),
    /// One explicit file; its extension picks the format.
    File(PathBuf),
}

impl ConfigLoader {
    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            source: ConfigSource::Dir(config_dir.into()),
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ConfigSource::File(path.into()),
        }
    }

    /// Loader for the working directory, the usual place for a per-project config.
    pub fn current_dir() -> Result<Self> {
        Ok(Self::with_dir(std::env::current_dir()?))
    }

    pub fn load(&self) -> Result<TableDancerConfig> {
        let config = match &self.source {
            ConfigSource::File(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                Self::parse_file(path)?
            }
            ConfigSource::Dir(dir) => {
                let yaml_path = dir.join(YAML_FILE);
                let toml_path = dir.join(TOML_FILE);

                if yaml_path.exists() {
                    Self::parse_file(&yaml_path)?
                } else if toml_path.exists() {
                    Self::parse_file(&toml_path)?
                } else {
                    info!("no config file found, using defaults");
                    TableDancerConfig::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<TableDancerConfig> {
        info!("loading config from {}", path.display());
        let contents = std::fs::read_to_string(path)?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse TOML config: {e}"))),
            Some("yml") | Some("yaml") => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse YAML config: {e}"))),
            _ => Err(Error::Config(format!(
                "unsupported config format: {}",
                path.display()
            ))),
        }
    }
}
