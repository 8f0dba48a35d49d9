//! Bounded trailing-window reader for append-only OHLCV csv files.
//!
//! Series files grow at the end and can hold decades of history, while a scan only needs
//! the last `period` bars. [`load_tail`] walks the file backwards in fixed-size byte chunks
//! and stops once the chunks read cover the requested window, so the cost depends on the
//! window rather than on the file size.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::{Bar, Period};

/// Bytes read per backward step
pub const DEFAULT_CHUNK_SIZE: usize = 6 * 1024;

const DATE_FMT: &str = "%Y-%m-%d";
const DATETIME_FMT: &str = "%Y-%m-%d %H:%M";
const ISO_DATETIME_FMT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed csv in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid date '{value}'")]
    InvalidDate { value: String },

    #[error("end date {end_date} is before the first row of {path}")]
    OutOfRange { path: PathBuf, end_date: NaiveDateTime },

    #[error("series source is closed")]
    Closed,
}

// ============================================================
// DATES
// ============================================================

/// Parse a series date.
///
/// Fields of up to 10 characters are plain dates (`%Y-%m-%d`, midnight). Longer fields are
/// intraday and only their first 16 characters are read (`%Y-%m-%d %H:%M`).
pub fn parse_series_date(value: &str) -> Result<NaiveDateTime, LoadError> {
    let value = value.trim();
    let invalid = || LoadError::InvalidDate {
        value: value.to_string(),
    };

    if value.len() > 10 {
        let head = value.get(..16).unwrap_or(value);
        return NaiveDateTime::parse_from_str(head, DATETIME_FMT)
            .or_else(|_| NaiveDateTime::parse_from_str(head, ISO_DATETIME_FMT))
            .map_err(|_| invalid());
    }
    NaiveDate::parse_from_str(value, DATE_FMT)
        .map(|date| date.and_time(NaiveTime::MIN))
        .map_err(|_| invalid())
}

pub(crate) fn deserialize_date<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
    let raw = String::deserialize(d)?;
    parse_series_date(&raw).map_err(serde::de::Error::custom)
}

/// Calendar days of slack added to the business-day window for exchange holidays
pub fn holiday_offset(period: usize) -> i64 {
    3.max(period / 50 * 3) as i64
}

/// Step back `days` weekdays from `date`
pub fn sub_business_days(date: NaiveDateTime, days: usize) -> NaiveDateTime {
    let mut current = date;
    let mut remaining = days;
    while remaining > 0 {
        current -= Duration::days(1);
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    current
}

/// Earliest date that can belong to a `period`-bar window ending at `anchor`
pub fn window_start(anchor: NaiveDateTime, period: usize) -> NaiveDateTime {
    sub_business_days(anchor, period) - Duration::days(holiday_offset(period))
}

// ============================================================
// TAIL LOADING
// ============================================================

/// Load the last `period` bars of a series file, optionally as of `end_date`.
///
/// Rows dated after `end_date` are dropped. The result holds fewer than `period` bars only
/// when the file does not have enough history. An `end_date` earlier than every row is
/// [`LoadError::OutOfRange`].
pub fn load_tail(
    path: &Path,
    period: Period,
    end_date: Option<NaiveDateTime>,
    chunk_size: usize,
) -> Result<Vec<Bar>, LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let size = file.metadata().map_err(io_err)?.len();
    let chunk_size = chunk_size.max(1);

    if size <= chunk_size as u64 && end_date.is_none() {
        let mut bytes = Vec::with_capacity(size as usize);
        file.read_to_end(&mut bytes).map_err(io_err)?;
        return Ok(keep_last(parse_bars(path, &bytes)?, period, None));
    }

    let mut header = Vec::new();
    BufReader::new(&mut file)
        .read_until(b'\n', &mut header)
        .map_err(io_err)?;
    if !header.ends_with(b"\n") {
        header.push(b'\n');
    }
    let data_start = header.len().min(size as usize) as u64;

    let mut cutoff = None;
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut carry: Vec<u8> = Vec::new();
    let mut pos = size;

    while pos > data_start {
        let read_size = (pos - data_start).min(chunk_size as u64);
        let start = pos - read_size;
        file.seek(SeekFrom::Start(start)).map_err(io_err)?;
        let mut block = vec![0u8; read_size as usize];
        file.read_exact(&mut block).map_err(io_err)?;
        block.append(&mut carry);
        pos = start;

        // The first line of a block may be cut; it is completed by the next (earlier) block
        let split = if start == data_start {
            0
        } else {
            match block.iter().position(|&b| b == b'\n') {
                Some(newline) => newline + 1,
                None => {
                    carry = block;
                    continue;
                }
            }
        };
        let complete = block.split_off(split);
        carry = block;

        let Some(first_date) = first_line_date(&complete)? else {
            continue;
        };
        if end_date.is_some_and(|end| first_date > end) {
            continue;
        }
        // Anchor on the newest row the window can actually contain
        if cutoff.is_none() {
            cutoff = last_line_date(&complete)?
                .map(|last| end_date.map_or(last, |end| last.min(end)))
                .map(|anchor| window_start(anchor, period.get()));
        }

        let reached = cutoff.is_some_and(|c| first_date <= c);
        chunks.push(complete);
        if reached {
            break;
        }
    }

    if let Some(end) = end_date {
        if chunks.is_empty() {
            return Err(LoadError::OutOfRange {
                path: path.to_path_buf(),
                end_date: end,
            });
        }
    }
    debug!(path = %path.display(), chunks = chunks.len(), "read series tail");

    let mut buffer = header;
    for chunk in chunks.iter().rev() {
        buffer.extend_from_slice(chunk);
    }
    Ok(keep_last(parse_bars(path, &buffer)?, period, end_date))
}

fn parse_bars(path: &Path, bytes: &[u8]) -> Result<Vec<Bar>, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    reader
        .deserialize()
        .map(|row| {
            row.map_err(|source| LoadError::Csv {
                path: path.to_path_buf(),
                source,
            })
        })
        .collect()
}

fn keep_last(mut bars: Vec<Bar>, period: Period, end_date: Option<NaiveDateTime>) -> Vec<Bar> {
    if let Some(end) = end_date {
        bars.retain(|bar| bar.date <= end);
    }
    let skip = bars.len().saturating_sub(period.get());
    bars.split_off(skip)
}

fn non_blank_lines(block: &[u8]) -> impl DoubleEndedIterator<Item = &[u8]> {
    block
        .split(|&b| b == b'\n')
        .filter(|line| line.iter().any(|b| !b.is_ascii_whitespace()))
}

fn line_date(line: &[u8]) -> Result<NaiveDateTime, LoadError> {
    let field = line.split(|&b| b == b',').next().unwrap_or(line);
    parse_series_date(&String::from_utf8_lossy(field))
}

fn first_line_date(block: &[u8]) -> Result<Option<NaiveDateTime>, LoadError> {
    non_blank_lines(block).next().map(line_date).transpose()
}

fn last_line_date(block: &[u8]) -> Result<Option<NaiveDateTime>, LoadError> {
    non_blank_lines(block).next_back().map(line_date).transpose()
}

// ============================================================
// SERIES SOURCE
// ============================================================

/// Provider of per-symbol bar windows
pub trait SeriesSource: Send + Sync {
    /// Bars for `symbol`, `None` when the source has no series for it
    fn get(&self, symbol: &str) -> Result<Option<Vec<Bar>>, LoadError>;

    /// Timeframe label written to scan output
    fn timeframe(&self) -> &str;

    /// Release the source; later `get` calls fail with [`LoadError::Closed`]
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Reads `{data_dir}/{symbol}.csv` (lower-cased symbol) through [`load_tail`]
#[derive(Debug)]
pub struct CsvSeriesSource {
    data_dir: PathBuf,
    timeframe: String,
    period: Period,
    end_date: Option<NaiveDateTime>,
    chunk_size: usize,
    closed: AtomicBool,
}

impl CsvSeriesSource {
    pub fn new(data_dir: impl Into<PathBuf>, period: Period) -> Self {
        Self {
            data_dir: data_dir.into(),
            timeframe: "daily".to_string(),
            period,
            end_date: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = timeframe.into();
        self
    }

    pub fn with_end_date(mut self, end_date: Option<NaiveDateTime>) -> Self {
        self.end_date = end_date;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn end_date(&self) -> Option<NaiveDateTime> {
        self.end_date
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}.csv", symbol.to_lowercase()))
    }
}

impl SeriesSource for CsvSeriesSource {
    fn get(&self, symbol: &str) -> Result<Option<Vec<Bar>>, LoadError> {
        if self.is_closed() {
            return Err(LoadError::Closed);
        }
        let path = self.path_for(symbol);
        if !path.exists() {
            warn!(symbol, path = %path.display(), "no series file for symbol");
            return Ok(None);
        }
        load_tail(&path, self.period, self.end_date, self.chunk_size).map(Some)
    }

    fn timeframe(&self) -> &str {
        &self.timeframe
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::NaiveDate;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
    }

    #[test]
    fn test_parse_series_date_widths() {
        assert_eq!(parse_series_date("2024-03-05").unwrap(), date(2024, 3, 5));
        let intraday = parse_series_date("2024-03-05 09:15:00+05:30").unwrap();
        assert_eq!(intraday, date(2024, 3, 5) + Duration::minutes(9 * 60 + 15));
        assert_eq!(
            parse_series_date("2024-03-05T09:15:00").unwrap(),
            intraday
        );
        assert!(matches!(
            parse_series_date("05/03/2024"),
            Err(LoadError::InvalidDate { .. })
        ));
    }

    #[test]
    fn test_holiday_offset() {
        assert_eq!(holiday_offset(10), 3);
        assert_eq!(holiday_offset(160), 9);
        assert_eq!(holiday_offset(500), 30);
    }

    #[test]
    fn test_sub_business_days_skips_weekends() {
        // 2024-03-11 is a Monday
        assert_eq!(sub_business_days(date(2024, 3, 11), 1), date(2024, 3, 8));
        assert_eq!(sub_business_days(date(2024, 3, 11), 5), date(2024, 3, 4));
        assert_eq!(sub_business_days(date(2024, 3, 11), 0), date(2024, 3, 11));
    }

    #[test]
    fn test_keep_last() {
        let bars: Vec<Bar> = (1..=5)
            .map(|d| Bar::new(date(2024, 1, d), 1.0, 1.0, 1.0, 1.0, 0.0))
            .collect();
        let period = Period::new(2).unwrap();
        let kept = keep_last(bars.clone(), period, Some(date(2024, 1, 4)));
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].date, date(2024, 1, 4));
        assert_eq!(keep_last(bars, Period::new(10).unwrap(), None).len(), 5);
    }

    #[test]
    fn test_block_dates_skip_blank_lines() {
        let block = b"\n2024-01-02,1,1,1,1,0\n2024-01-03,1,1,1,1,0\n\n";
        assert_eq!(first_line_date(block).unwrap(), Some(date(2024, 1, 2)));
        assert_eq!(last_line_date(block).unwrap(), Some(date(2024, 1, 3)));
        assert_eq!(first_line_date(b"\n  \n").unwrap(), None);
    }

    #[test]
    fn test_closed_source_rejects_get() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join("abc.csv")).unwrap();
        writeln!(file, "Date,Open,High,Low,Close,Volume").unwrap();
        writeln!(file, "2024-01-02,1,2,0.5,1.5,100").unwrap();

        let source = CsvSeriesSource::new(dir.path(), Period::new(5).unwrap());
        assert_eq!(source.get("ABC").unwrap().map(|b| b.len()), Some(1));
        assert!(source.get("missing").unwrap().is_none());

        source.close();
        assert!(source.is_closed());
        assert!(matches!(source.get("ABC"), Err(LoadError::Closed)));
    }
}
