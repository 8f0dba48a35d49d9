//! Integration tests for the trailing-window series loader.

use std::{fs, path::PathBuf};

use chartscan::loader::{load_tail, parse_series_date, LoadError, DEFAULT_CHUNK_SIZE};
use chartscan::prelude::*;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use tempfile::TempDir;

const HEADER: &str = "Date,Open,High,Low,Close,Volume";
const WHOLE_FILE: usize = usize::MAX / 2;

fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap()
}

/// One row per calendar day starting 2020-01-01
fn daily_rows(days: usize) -> Vec<String> {
    (0..days)
        .map(|i| {
            let d = date(2020, 1, 1) + Duration::days(i as i64);
            let close = 100.0 + (i % 17) as f64;
            format!(
                "{},{:.2},{:.2},{:.2},{:.2},{}",
                d.format("%Y-%m-%d"),
                close - 0.5,
                close + 1.0,
                close - 1.0,
                close,
                1000 + i
            )
        })
        .collect()
}

fn write_series(
    dir: &TempDir,
    name: &str,
    header: &str,
    rows: &[String],
    newline: &str,
) -> PathBuf {
    let mut content = String::from(header);
    content.push_str(newline);
    content.push_str(&rows.join(newline));
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn period(n: usize) -> Period {
    Period::new(n).unwrap()
}

#[test]
fn test_chunked_read_matches_full_parse() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_series(&dir, "abc.csv", HEADER, &daily_rows(1000), "\n");

    let full = load_tail(&path, period(160), None, WHOLE_FILE).unwrap();
    assert_eq!(full.len(), 160);
    assert_eq!(full[159].date, date(2020, 1, 1) + Duration::days(999));

    for chunk_size in [64, 512, DEFAULT_CHUNK_SIZE] {
        let chunked = load_tail(&path, period(160), None, chunk_size).unwrap();
        assert_eq!(chunked, full, "chunk size {chunk_size}");
    }
}

#[test]
fn test_end_date_window() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_series(&dir, "abc.csv", HEADER, &daily_rows(1000), "\n");
    let end = date(2021, 6, 15);

    let mut expected = load_tail(&path, period(5000), None, WHOLE_FILE).unwrap();
    expected.retain(|bar| bar.date <= end);
    let expected = expected.split_off(expected.len() - 160);

    let bars = load_tail(&path, period(160), Some(end), 512).unwrap();
    assert_eq!(bars.len(), 160);
    assert_eq!(bars.last().map(|b| b.date), Some(end));
    assert_eq!(bars, expected);
}

#[test]
fn test_end_date_between_rows() {
    let dir = tempfile::tempdir().unwrap();
    let rows: Vec<String> = daily_rows(400).into_iter().step_by(2).collect();
    let path = write_series(&dir, "abc.csv", HEADER, &rows, "\n");

    // 2020-01-02 is not in the file; the window ends on the row before it
    let bars = load_tail(&path, period(10), Some(date(2020, 1, 2)), 128).unwrap();
    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].date, date(2020, 1, 1));
}

#[test]
fn test_end_date_after_last_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_series(&dir, "abc.csv", HEADER, &daily_rows(300), "\n");

    let bars = load_tail(&path, period(50), Some(date(2030, 1, 1)), 256).unwrap();
    assert_eq!(bars.len(), 50);
    assert_eq!(bars[49].date, date(2020, 1, 1) + Duration::days(299));
}

#[test]
fn test_end_date_before_first_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_series(&dir, "abc.csv", HEADER, &daily_rows(300), "\n");

    let err = load_tail(&path, period(50), Some(date(2019, 6, 1)), 256).unwrap_err();
    assert!(matches!(err, LoadError::OutOfRange { .. }));
}

#[test]
fn test_short_history_returns_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_series(&dir, "abc.csv", HEADER, &daily_rows(50), "\n");

    let bars = load_tail(&path, period(160), None, 200).unwrap();
    assert_eq!(bars.len(), 50);
    assert_eq!(bars[0].date, date(2020, 1, 1));
}

#[test]
fn test_crlf_and_trailing_newline() {
    let dir = tempfile::tempdir().unwrap();
    let mut rows = daily_rows(400);
    rows.push(String::new());
    let path = write_series(&dir, "abc.csv", HEADER, &rows, "\r\n");

    let full = load_tail(&path, period(100), None, WHOLE_FILE).unwrap();
    let chunked = load_tail(&path, period(100), None, 300).unwrap();
    assert_eq!(full.len(), 100);
    assert_eq!(chunked, full);
}

#[test]
fn test_header_only_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_series(&dir, "empty.csv", HEADER, &[], "\n");

    assert!(load_tail(&path, period(10), None, 4).unwrap().is_empty());
    assert!(matches!(
        load_tail(&path, period(10), Some(date(2024, 1, 1)), 4),
        Err(LoadError::OutOfRange { .. })
    ));
}

#[test]
fn test_intraday_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let start = date(2024, 1, 2) + Duration::hours(9);
    let rows: Vec<String> = (0..200)
        .map(|i| {
            let ts = start + Duration::minutes(15 * i);
            format!("{}+05:30,10,11,9,10,5", ts.format("%Y-%m-%d %H:%M:%S"))
        })
        .collect();
    let path = write_series(&dir, "nifty.csv", HEADER, &rows, "\n");

    let bars = load_tail(&path, period(5), None, 256).unwrap();
    assert_eq!(bars.len(), 5);
    assert_eq!(bars[4].date, start + Duration::minutes(15 * 199));
    assert_eq!(
        bars[4].date,
        parse_series_date("2024-01-04 10:45").unwrap()
    );
}

#[test]
fn test_extra_columns_and_missing_volume() {
    let dir = tempfile::tempdir().unwrap();
    let rows = vec![
        "2024-01-02, 10, 11, 9, 10.5, 7".to_string(),
        "2024-01-03, 10.5, 12, 10, 11.5, 3".to_string(),
    ];
    let path = write_series(&dir, "x.csv", "Date,Open,High,Low,Close,Dividends", &rows, "\n");

    let bars = load_tail(&path, period(10), None, WHOLE_FILE).unwrap();
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[1].close, 11.5);
    assert_eq!(bars[1].volume, 0.0);
}

#[test]
fn test_malformed_row_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let rows = vec!["2024-01-02,10,11,9,abc,7".to_string()];
    let path = write_series(&dir, "x.csv", HEADER, &rows, "\n");

    assert!(matches!(
        load_tail(&path, period(10), None, WHOLE_FILE),
        Err(LoadError::Csv { .. })
    ));
}

#[test]
fn test_source_reads_lowercase_file() {
    let dir = tempfile::tempdir().unwrap();
    write_series(&dir, "reliance.csv", HEADER, &daily_rows(30), "\n");

    let source = CsvSeriesSource::new(dir.path(), period(20))
        .with_timeframe("daily")
        .with_end_date(Some(date(2020, 1, 10)))
        .with_chunk_size(128);
    let bars = source.get("RELIANCE").unwrap().unwrap();
    assert_eq!(bars.len(), 10);
    assert_eq!(source.timeframe(), "daily");
}
