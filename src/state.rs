//! Run-over-run deduplication of pattern matches.
//!
//! The state remembers, per `{symbol}-{pattern}` key, the last occurrence reported. A new
//! scan only emits matches that are new or whose start moved, and keys that were not
//! detected again are retired.

use std::{
    collections::{BTreeMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::PatternMatch;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Last reported occurrence per pattern key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanState(pub BTreeMap<String, PatternMatch>);

impl ScanState {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&PatternMatch> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// How a match whose start moved is emitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmitPolicy {
    #[default]
    Single,
    /// Emit a moved match twice, as earlier releases did
    LegacyDoubleEmit,
}

/// Outcome of diffing a scan against the prior state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDiff {
    /// Matches to report for this run
    pub emitted: Vec<PatternMatch>,
    /// State to persist for the next run
    pub next: ScanState,
    /// Keys dropped because they were not detected this run
    pub stale: Vec<String>,
}

/// Diff `detected` against `prior`.
///
/// New keys and keys whose `start` changed are emitted and stored; unchanged keys are
/// suppressed. Prior keys not detected this run are removed from the next state.
pub fn diff(detected: &[PatternMatch], prior: &ScanState, policy: EmitPolicy) -> StateDiff {
    if prior.is_empty() {
        let next = detected.iter().map(|m| (m.key(), m.clone())).collect();
        return StateDiff {
            emitted: detected.to_vec(),
            next: ScanState(next),
            stale: Vec::new(),
        };
    }

    let mut next = prior.clone();
    let mut emitted = Vec::new();
    let mut seen: HashSet<String> = HashSet::with_capacity(detected.len());

    for m in detected {
        let key = m.key();
        // Compared against this run's state so repeated keys see earlier updates
        match next.get(&key).map(|previous| previous.start == m.start) {
            Some(true) => {}
            Some(false) => {
                next.0.insert(key.clone(), m.clone());
                emitted.push(m.clone());
                if policy == EmitPolicy::LegacyDoubleEmit {
                    emitted.push(m.clone());
                }
            }
            None => {
                next.0.insert(key.clone(), m.clone());
                emitted.push(m.clone());
            }
        }
        seen.insert(key);
    }

    let stale: Vec<String> = prior
        .keys()
        .filter(|key| !seen.contains(*key))
        .map(str::to_string)
        .collect();
    for key in &stale {
        next.0.remove(key);
    }

    StateDiff {
        emitted,
        next,
        stale,
    }
}

/// JSON file holding a [`ScanState`]
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for a named symbol list scanned with a pattern selection
    pub fn for_list(state_dir: &Path, list_name: &str, selection: &str) -> Self {
        Self::new(state_dir.join(format!("{list_name}_{selection}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state; a missing file is an empty state
    pub fn load(&self) -> Result<ScanState, StateError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no prior state");
                return Ok(ScanState::default());
            }
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| StateError::Json {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, state: &ScanState) -> Result<(), StateError> {
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(state).map_err(|source| StateError::Json {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, json).map_err(io_err)?;
        info!(path = %self.path.display(), entries = state.len(), "saved scan state");
        Ok(())
    }
}
