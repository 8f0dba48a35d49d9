//! Scan configuration.
//!
//! Keys follow the `user.json` layout (`DATA_PATH`, `SYM_LIST`, `SAVE_FOLDER`, ...) so an
//! existing configuration file can be read unchanged. Unknown keys are ignored.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::{
    export::export_folder,
    loader::DEFAULT_CHUNK_SIZE,
    state::{EmitPolicy, StateStore},
    PatternSelection, Period,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything a scan run needs, passed explicitly to [`crate::scan::Scanner::from_config`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ScanConfig {
    /// Folder holding `{symbol}.csv` series files
    pub data_path: PathBuf,
    /// Symbol list file; its stem names the state file
    #[serde(default)]
    pub sym_list: Option<PathBuf>,
    /// Base folder for exported snapshots, export disabled when unset
    #[serde(default)]
    pub save_folder: Option<PathBuf>,
    #[serde(default)]
    pub save_state: bool,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Bars loaded per symbol
    #[serde(default = "default_period")]
    pub period: Period,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_pivot_side")]
    pub left: usize,
    #[serde(default = "default_pivot_side")]
    pub right: usize,
    /// Worker threads, all available cores when unset
    #[serde(default)]
    pub workers: Option<usize>,
    /// As-of date; bars after it are ignored
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub legacy_double_emit: bool,
    /// Matcher id → parameter name → value
    #[serde(default)]
    pub matcher_params: HashMap<String, HashMap<String, f64>>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_timeframe() -> String {
    "daily".to_string()
}

fn default_period() -> Period {
    Period::new_const(160)
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_pivot_side() -> usize {
    6
}

impl ScanConfig {
    /// Config with defaults for everything except the data folder
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            sym_list: None,
            save_folder: None,
            save_state: false,
            state_dir: default_state_dir(),
            timeframe: default_timeframe(),
            period: default_period(),
            chunk_size: default_chunk_size(),
            left: default_pivot_side(),
            right: default_pivot_side(),
            workers: None,
            end_date: None,
            legacy_double_emit: false,
            matcher_params: HashMap::new(),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("DATA_PATH must not be empty".into()));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("CHUNK_SIZE must be > 0".into()));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("WORKERS must be > 0".into()));
        }
        if self.timeframe.trim().is_empty() {
            return Err(ConfigError::Invalid("TIMEFRAME must not be empty".into()));
        }
        Ok(())
    }

    /// As-of date at midnight
    pub fn end_datetime(&self) -> Option<NaiveDateTime> {
        self.end_date.map(|date| date.and_time(NaiveTime::MIN))
    }

    pub fn emit_policy(&self) -> EmitPolicy {
        if self.legacy_double_emit {
            EmitPolicy::LegacyDoubleEmit
        } else {
            EmitPolicy::Single
        }
    }

    /// Name of the configured symbol list (file stem of `SYM_LIST`)
    pub fn list_name(&self) -> Option<String> {
        self.sym_list
            .as_ref()
            .and_then(|path| path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
    }

    /// State store for this run.
    ///
    /// State is kept only when `SAVE_STATE` is set, a named symbol list is scanned, and no
    /// as-of date is given; historical scans never touch it.
    pub fn state_store(
        &self,
        list_name: Option<&str>,
        selection: PatternSelection,
    ) -> Option<StateStore> {
        if !self.save_state || self.end_date.is_some() {
            return None;
        }
        list_name.map(|name| StateStore::for_list(&self.state_dir, name, selection.as_str()))
    }

    /// Folder for this run's exports, when exporting is configured
    pub fn export_folder(&self, now: NaiveDateTime) -> Option<PathBuf> {
        self.save_folder
            .as_deref()
            .map(|base| export_folder(base, now))
    }
}
