//! Parallel scan orchestration.
//!
//! One task per symbol runs load → dedupe → [`PatternEngine::scan_symbol`] on a bounded
//! rayon pool. Failures come in two tiers:
//!
//! - a matcher failure only truncates that symbol's matcher sequence (see
//!   [`crate::SymbolScan`]);
//! - a task failure (load error or panic) cancels the tasks that have not started yet and
//!   discards the whole batch.

use std::{
    collections::HashSet,
    fs, io,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
    config::{ConfigError, ScanConfig},
    export::{ChartExporter, ExportError},
    loader::{CsvSeriesSource, LoadError, SeriesSource},
    panic_message,
    state::{self, EmitPolicy, StateError, StateStore},
    Bar, EngineBuilder, PatternEngine, PatternError, PatternMatch, PatternSelection,
};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("failed to load {symbol}: {source}")]
    Load {
        symbol: String,
        #[source]
        source: LoadError,
    },

    #[error("scan task for {symbol} panicked: {message}")]
    TaskPanicked { symbol: String, message: String },

    #[error("failed to export {symbol}: {source}")]
    Export {
        symbol: String,
        #[source]
        source: ExportError,
    },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to access scan output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed scan output {path}: {reason}")]
    OutputFormat { path: PathBuf, reason: String },
}

// ============================================================
// REPORT
// ============================================================

/// Trailing metadata record of a scan output file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanMeta {
    pub timeframe: String,
    pub end_date: Option<NaiveDateTime>,
}

/// Matches reported by a run
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub matches: Vec<PatternMatch>,
    pub meta: ScanMeta,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum OutputRecord {
    Match(PatternMatch),
    Meta(ScanMeta),
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Write the match records followed by the metadata record.
    ///
    /// A report without matches is written as an empty array with no metadata.
    pub fn write_json(&self, path: &Path) -> Result<(), ScanError> {
        let mut records: Vec<OutputRecord> = self
            .matches
            .iter()
            .cloned()
            .map(OutputRecord::Match)
            .collect();
        if !records.is_empty() {
            records.push(OutputRecord::Meta(self.meta.clone()));
        }

        let json = serde_json::to_vec_pretty(&records).map_err(|e| ScanError::OutputFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let io_err = |source| ScanError::Output {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, json).map_err(io_err)
    }

    /// Read a scan output file, `None` when it holds no matches
    pub fn read_json(path: &Path) -> Result<Option<Self>, ScanError> {
        let format_err = |reason: String| ScanError::OutputFormat {
            path: path.to_path_buf(),
            reason,
        };
        let bytes = fs::read(path).map_err(|source| ScanError::Output {
            path: path.to_path_buf(),
            source,
        })?;
        let mut records: Vec<OutputRecord> =
            serde_json::from_slice(&bytes).map_err(|e| format_err(e.to_string()))?;

        let meta = match records.pop() {
            None => return Ok(None),
            Some(OutputRecord::Meta(meta)) => meta,
            Some(OutputRecord::Match(_)) => {
                return Err(format_err("missing trailing metadata record".into()))
            }
        };
        let matches = records
            .into_iter()
            .map(|record| match record {
                OutputRecord::Match(m) => Ok(m),
                OutputRecord::Meta(_) => Err(format_err("metadata record before the end".into())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Self { matches, meta }))
    }
}

// ============================================================
// SCANNER
// ============================================================

/// Optional collaborators of [`Scanner::run`]
#[derive(Clone, Copy, Default)]
pub struct RunOptions<'a> {
    pub state: Option<&'a StateStore>,
    pub exporter: Option<&'a dyn ChartExporter>,
    pub emit_policy: EmitPolicy,
}

/// Fans the scan pipeline out over a symbol universe
pub struct Scanner<S> {
    engine: PatternEngine,
    source: Arc<S>,
    pool: rayon::ThreadPool,
    end_date: Option<NaiveDateTime>,
}

impl Scanner<CsvSeriesSource> {
    /// Scanner over csv series as described by `config`
    pub fn from_config(
        config: &ScanConfig,
        selection: PatternSelection,
    ) -> Result<Self, ScanError> {
        config.validate()?;
        let engine = EngineBuilder::new()
            .with_selection_params(selection, &config.matcher_params)?
            .pivot_window(config.left, config.right)
            .build()?;
        let source = CsvSeriesSource::new(&config.data_path, config.period)
            .with_timeframe(config.timeframe.clone())
            .with_end_date(config.end_datetime())
            .with_chunk_size(config.chunk_size);
        Ok(Scanner::new(engine, source, config.workers)?.with_end_date(config.end_datetime()))
    }
}

impl<S: SeriesSource> Scanner<S> {
    /// `workers` of `None` uses one thread per available core
    pub fn new(
        engine: PatternEngine,
        source: S,
        workers: Option<usize>,
    ) -> Result<Self, ScanError> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("chartscan-{i}"));
        if let Some(workers) = workers {
            builder = builder.num_threads(workers);
        }
        Ok(Self {
            engine,
            source: Arc::new(source),
            pool: builder.build()?,
            end_date: None,
        })
    }

    /// As-of date reported in the output metadata
    pub fn with_end_date(mut self, end_date: Option<NaiveDateTime>) -> Self {
        self.end_date = end_date;
        self
    }

    pub fn engine(&self) -> &PatternEngine {
        &self.engine
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn meta(&self) -> ScanMeta {
        ScanMeta {
            timeframe: self.source.timeframe().to_string(),
            end_date: self.end_date,
        }
    }

    /// Release the series source
    pub fn close(&self) {
        self.source.close();
    }

    fn scan_one(&self, symbol: &str) -> Result<Vec<PatternMatch>, ScanError> {
        let bars = self.source.get(symbol).map_err(|source| ScanError::Load {
            symbol: symbol.to_string(),
            source,
        })?;
        let Some(mut bars) = bars.filter(|bars| !bars.is_empty()) else {
            return Ok(Vec::new());
        };
        drop_repeated_dates(&mut bars);

        let scan = self.engine.scan_symbol(symbol, &bars);
        if !scan.matches.is_empty() {
            debug!(symbol, matches = scan.matches.len(), "patterns found");
        }
        Ok(scan.matches)
    }

    /// Scan every symbol; the first task failure aborts the batch.
    pub fn try_scan<T: AsRef<str> + Sync>(
        &self,
        symbols: &[T],
    ) -> Result<Vec<PatternMatch>, ScanError> {
        let cancel = AtomicBool::new(false);
        let result = self.pool.install(|| {
            symbols
                .par_iter()
                .map(|symbol| {
                    let symbol = symbol.as_ref();
                    guarded(&cancel, symbol, || self.scan_one(symbol))
                })
                .try_reduce(Vec::new, |mut acc, mut found| {
                    acc.append(&mut found);
                    Ok(acc)
                })
        });

        match &result {
            Ok(matches) => info!(symbols = symbols.len(), matches = matches.len(), "scan complete"),
            Err(err) => error!(error = %err, "scan aborted, discarding batch"),
        }
        result
    }

    /// Scan every symbol; an aborted batch yields no matches.
    pub fn scan<T: AsRef<str> + Sync>(&self, symbols: &[T]) -> Vec<PatternMatch> {
        self.try_scan(symbols).unwrap_or_default()
    }

    /// Export every match on the worker pool; the first failure aborts the phase.
    pub fn export(
        &self,
        matches: &[PatternMatch],
        exporter: &dyn ChartExporter,
    ) -> Result<Vec<PathBuf>, ScanError> {
        let cancel = AtomicBool::new(false);
        let result = self.pool.install(|| {
            matches
                .par_iter()
                .map(|found| {
                    guarded(&cancel, &found.symbol, || {
                        exporter
                            .export(found)
                            .map(|path| vec![path])
                            .map_err(|source| ScanError::Export {
                                symbol: found.symbol.clone(),
                                source,
                            })
                    })
                })
                .try_reduce(Vec::new, |mut acc, mut paths| {
                    acc.append(&mut paths);
                    Ok(acc)
                })
        });

        match &result {
            Ok(paths) => info!(exported = paths.len(), "export complete"),
            Err(err) => error!(error = %err, "export aborted"),
        }
        result
    }

    /// Scan, apply state, and export.
    ///
    /// Any tier-two failure, state failure or export failure is returned as an error and
    /// no report is produced.
    pub fn run<T: AsRef<str> + Sync>(
        &self,
        symbols: &[T],
        options: RunOptions<'_>,
    ) -> Result<ScanReport, ScanError> {
        let prior = options.state.map(StateStore::load).transpose()?;
        let detected = self.try_scan(symbols)?;

        let matches = match (options.state, prior) {
            (Some(store), Some(prior)) => {
                let diff = state::diff(&detected, &prior, options.emit_policy);
                if !diff.stale.is_empty() {
                    debug!(stale = ?diff.stale, "retired patterns");
                }
                store.save(&diff.next)?;
                diff.emitted
            }
            _ => detected,
        };

        if matches.is_empty() {
            info!("no patterns to report");
            return Ok(ScanReport {
                matches,
                meta: self.meta(),
            });
        }

        if let Some(exporter) = options.exporter {
            self.export(&matches, exporter)?;
        }
        Ok(ScanReport {
            matches,
            meta: self.meta(),
        })
    }
}

/// Keep the first bar of every date, wherever its repeats sit in the series
fn drop_repeated_dates(bars: &mut Vec<Bar>) {
    let mut seen = HashSet::with_capacity(bars.len());
    bars.retain(|bar| seen.insert(bar.date));
}

/// Run one task unless the batch is cancelled; a failure or panic cancels the batch.
fn guarded<T: Default>(
    cancel: &AtomicBool,
    symbol: &str,
    task: impl FnOnce() -> Result<T, ScanError>,
) -> Result<T, ScanError> {
    if cancel.load(Ordering::Acquire) {
        return Ok(T::default());
    }
    let result = panic::catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|payload| {
        Err(ScanError::TaskPanicked {
            symbol: symbol.to_string(),
            message: panic_message(payload.as_ref()),
        })
    });
    if result.is_err() {
        cancel.store(true, Ordering::Release);
    }
    result
}
