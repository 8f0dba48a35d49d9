//! Chart-data export for detected patterns.
//!
//! Rendering happens elsewhere; an exporter only persists what a renderer needs: the match
//! and the bars it spans.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::debug;

use crate::{
    loader::{LoadError, SeriesSource},
    Bar, PatternMatch,
};

/// Folder name format for one export run, e.g. `05_Mar_24_1530`
pub const EXPORT_FOLDER_FMT: &str = "%d_%b_%y_%H%M";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("no series available for {symbol}")]
    MissingSeries { symbol: String },
}

/// Writes one artifact per pattern match
pub trait ChartExporter: Send + Sync {
    /// Export `found`, returning the path written
    fn export(&self, found: &PatternMatch) -> Result<PathBuf, ExportError>;
}

/// Timestamped export folder under `base`
pub fn export_folder(base: &Path, now: NaiveDateTime) -> PathBuf {
    base.join(now.format(EXPORT_FOLDER_FMT).to_string())
}

#[derive(Serialize)]
struct Snapshot<'a> {
    #[serde(rename = "match")]
    found: &'a PatternMatch,
    bars: &'a [Bar],
}

/// Exports `{symbol}_{pattern}.json` with the match and its bar window
#[derive(Debug)]
pub struct SnapshotExporter<S> {
    source: Arc<S>,
    folder: PathBuf,
    /// Extra bars kept before the pattern start
    context_bars: usize,
}

impl<S: SeriesSource> SnapshotExporter<S> {
    pub fn new(source: Arc<S>, folder: impl Into<PathBuf>) -> Self {
        Self {
            source,
            folder: folder.into(),
            context_bars: 10,
        }
    }

    pub fn with_context_bars(mut self, context_bars: usize) -> Self {
        self.context_bars = context_bars;
        self
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn file_name(found: &PatternMatch) -> String {
        let pattern = found.pattern.name().replace(' ', "_");
        format!("{}_{}.json", found.symbol, pattern)
    }

    fn span<'a>(&self, bars: &'a [Bar], found: &PatternMatch) -> &'a [Bar] {
        let first = bars.partition_point(|bar| bar.date < found.start);
        let end = bars.partition_point(|bar| bar.date <= found.end);
        let from = first.saturating_sub(self.context_bars).min(end);
        &bars[from..end]
    }
}

impl<S: SeriesSource> ChartExporter for SnapshotExporter<S> {
    fn export(&self, found: &PatternMatch) -> Result<PathBuf, ExportError> {
        let bars = self
            .source
            .get(&found.symbol)?
            .ok_or_else(|| ExportError::MissingSeries {
                symbol: found.symbol.clone(),
            })?;

        let snapshot = Snapshot {
            found,
            bars: self.span(&bars, found),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let path = self.folder.join(Self::file_name(found));
        let io_err = |source| ExportError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.folder).map_err(io_err)?;
        fs::write(&path, json).map_err(io_err)?;
        debug!(
            symbol = %found.symbol,
            pattern = %found.pattern,
            path = %path.display(),
            "exported snapshot"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::NaiveDate;

    use super::*;
    use crate::{loader::CsvSeriesSource, KeyPoint, PatternKind, Period};

    #[test]
    fn test_export_folder_name() {
        let now = NaiveDate::from_ymd_opt(2024, 3, 5)
            .and_then(|d| d.and_hms_opt(15, 30, 0))
            .unwrap();
        assert_eq!(
            export_folder(Path::new("charts"), now),
            PathBuf::from("charts/05_Mar_24_1530")
        );
    }

    #[test]
    fn test_snapshot_written_with_context() {
        let data = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(data.path().join("tcs.csv")).unwrap();
        writeln!(file, "Date,Open,High,Low,Close,Volume").unwrap();
        for day in 1..=20 {
            writeln!(file, "2024-01-{day:02},10,11,9,10,100").unwrap();
        }
        drop(file);

        let source = Arc::new(CsvSeriesSource::new(data.path(), Period::new(160).unwrap()));
        let out = tempfile::tempdir().unwrap();
        let exporter = SnapshotExporter::new(source, out.path().join("run")).with_context_bars(2);

        let start = NaiveDate::from_ymd_opt(2024, 1, 10)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 20)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let point = KeyPoint {
            label: 'A',
            date: start,
            price: 11.0,
        };
        let found = PatternMatch::new("TCS", PatternKind::DoubleTop, vec![point], end);

        let path = exporter.export(&found).unwrap();
        assert!(path.ends_with("run/TCS_Double_Top.json"));

        let written: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["match"]["symbol"], "TCS");
        assert_eq!(written["bars"].as_array().map(Vec::len), Some(13));
    }

    #[test]
    fn test_missing_series_is_an_error() {
        let data = tempfile::tempdir().unwrap();
        let source = Arc::new(CsvSeriesSource::new(data.path(), Period::new(10).unwrap()));
        let exporter = SnapshotExporter::new(source, data.path().join("out"));
        let found = PatternMatch::new(
            "NOPE",
            PatternKind::HeadShouldersDown,
            vec![],
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
        );
        assert!(matches!(
            exporter.export(&found),
            Err(ExportError::MissingSeries { .. })
        ));
    }
}
