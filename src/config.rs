// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use figment::providers::{Env, Format, Serialized};
use figment::{providers::Toml, Figment};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::block_tracker::StrategyKind;
use crate::errors::ConfigError;

pub const DEFAULT_BLOCK_LENGTH: u64 = 1024 * 1024;
const SETTINGS_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "PIECEWISE_";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub block_length: u64,
    pub strategy: StrategyKind,
    pub seed: Option<u64>,
    pub min_split_size: u64,
    pub geom_base: f64,

    // Simulation
    pub connections: usize,
    pub failure_rate: f64,
    pub max_ticks: u64,

    // Logging
    pub log_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            block_length: DEFAULT_BLOCK_LENGTH,
            strategy: StrategyKind::default(),
            seed: None,
            min_split_size: DEFAULT_BLOCK_LENGTH,
            geom_base: 1.5,
            connections: 5,
            failure_rate: 0.05,
            max_ticks: 100_000,
            log_dir: None,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_length == 0 {
            return Err(ConfigError::ZeroBlockLength);
        }
        if self.connections == 0 {
            return Err(ConfigError::NoConnections);
        }
        if !(0.0..1.0).contains(&self.failure_rate) {
            return Err(ConfigError::FailureRate(self.failure_rate));
        }
        if !(self.geom_base > 1.0) {
            return Err(ConfigError::GeomBase(self.geom_base));
        }
        Ok(())
    }
}

/// Config and data directories for the current user, created on demand.
pub fn get_app_paths() -> Option<(PathBuf, PathBuf)> {
    let proj_dirs = ProjectDirs::from("org", "piecewise", "piecewise")?;
    let config_dir = proj_dirs.config_dir().to_path_buf();
    let data_dir = proj_dirs.data_local_dir().to_path_buf();

    fs::create_dir_all(&config_dir).ok()?;
    fs::create_dir_all(&data_dir).ok()?;

    Some((config_dir, data_dir))
}

fn figment(config_file: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));
    match config_file {
        Some(path) => figment = figment.merge(Toml::file(path)),
        None => {
            if let Some((config_dir, _)) = get_app_paths() {
                figment = figment.merge(Toml::file(config_dir.join(SETTINGS_FILE)));
            }
        }
    }
    figment.merge(Env::prefixed(ENV_PREFIX))
}

/// Loads settings from defaults, then the TOML file (`config_file`, or
/// `settings.toml` in the user config directory), then `PIECEWISE_*`
/// environment variables.
///
/// A missing file is not an error; a malformed one is.
pub fn load_settings(config_file: Option<&Path>) -> Result<Settings, ConfigError> {
    let settings: Settings = figment(config_file).extract()?;
    settings.validate()?;
    Ok(settings)
}
