//! End-to-end scans over csv series files.

use std::{fs, path::Path, sync::Arc};

use chartscan::prelude::*;
use chrono::{Duration, NaiveDate};
use tempfile::TempDir;

const DOUBLE_TOP: &[f64] = &[100.0, 120.0, 108.0, 119.5, 112.0];

/// Write `{name}.csv` along a close path, 10 bars per leg and 5 on the last
fn write_path(dir: &Path, name: &str, waypoints: &[f64]) {
    let mut closes = vec![waypoints[0]];
    for (leg, pair) in waypoints.windows(2).enumerate() {
        let n = if leg + 2 == waypoints.len() { 5 } else { 10 };
        let step = (pair[1] - pair[0]) / n as f64;
        closes.extend((1..=n).map(|i| pair[0] + step * i as f64));
    }

    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let mut content = String::from("Date,Open,High,Low,Close,Volume\n");
    for (i, close) in closes.iter().enumerate() {
        let date = start + Duration::days(i as i64);
        content.push_str(&format!(
            "{},{},{},{},{},5000\n",
            date.format("%Y-%m-%d"),
            close,
            close + 0.5,
            close - 0.5,
            close
        ));
    }
    fs::write(dir.join(format!("{name}.csv")), content).unwrap();
}

fn config(data: &TempDir) -> ScanConfig {
    let mut config = ScanConfig::new(data.path());
    config.left = 3;
    config.right = 3;
    config.workers = Some(2);
    config
}

#[test]
fn test_scan_from_config() {
    let data = tempfile::tempdir().unwrap();
    write_path(data.path(), "tcs", DOUBLE_TOP);
    write_path(data.path(), "infy", DOUBLE_TOP);
    write_path(data.path(), "flat", &[100.0, 100.0]);

    let scanner = Scanner::from_config(&config(&data), PatternSelection::Bear).unwrap();
    assert_eq!(scanner.workers(), 2);

    let mut found = scanner.scan(&["TCS", "INFY", "FLAT", "MISSING"]);
    found.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    let keys: Vec<String> = found.iter().map(PatternMatch::key).collect();
    assert_eq!(keys, vec!["INFY-Double Top", "TCS-Double Top"]);
}

#[test]
fn test_malformed_series_discards_batch() {
    let data = tempfile::tempdir().unwrap();
    write_path(data.path(), "a", DOUBLE_TOP);
    write_path(data.path(), "c", DOUBLE_TOP);
    fs::write(
        data.path().join("b.csv"),
        "Date,Open,High,Low,Close,Volume\n2024-01-01,1,2,0.5,oops,10\n",
    )
    .unwrap();

    let scanner = Scanner::from_config(&config(&data), PatternSelection::All).unwrap();
    assert!(scanner.scan(&["A", "B", "C"]).is_empty());
    assert!(matches!(
        scanner.try_scan(&["A", "B", "C"]),
        Err(ScanError::Load { ref symbol, .. }) if symbol == "B"
    ));
}

#[test]
fn test_state_suppresses_repeats_and_retires_stale() {
    let data = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    write_path(data.path(), "a", DOUBLE_TOP);
    write_path(data.path(), "b", DOUBLE_TOP);

    let mut config = config(&data);
    config.save_state = true;
    config.state_dir = state_dir.path().to_path_buf();
    config.sym_list = Some(data.path().join("watch.csv"));

    let list = config.list_name();
    let store = config
        .state_store(list.as_deref(), PatternSelection::Dtop)
        .unwrap();
    assert!(store.path().ends_with("watch_dtop.json"));

    let scanner = Scanner::from_config(&config, PatternSelection::Dtop).unwrap();
    let options = RunOptions {
        state: Some(&store),
        emit_policy: config.emit_policy(),
        ..RunOptions::default()
    };

    let first = scanner.run(&["A", "B"], options).unwrap();
    assert_eq!(first.matches.len(), 2);
    assert_eq!(store.load().unwrap().len(), 2);

    let second = scanner.run(&["A", "B"], options).unwrap();
    assert!(second.is_empty());

    fs::remove_file(data.path().join("b.csv")).unwrap();
    let third = scanner.run(&["A", "B"], options).unwrap();
    assert!(third.is_empty());
    let state = store.load().unwrap();
    assert_eq!(state.keys().collect::<Vec<_>>(), vec!["A-Double Top"]);
}

#[test]
fn test_run_exports_and_writes_report() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_path(data.path(), "sbin", DOUBLE_TOP);

    let scanner = Scanner::from_config(&config(&data), PatternSelection::Dtop).unwrap();
    let exporter = SnapshotExporter::new(Arc::clone(scanner.source()), out.path().join("charts"));
    let options = RunOptions {
        exporter: Some(&exporter),
        ..RunOptions::default()
    };

    let report = scanner.run(&["SBIN"], options).unwrap();
    assert_eq!(report.matches.len(), 1);
    assert_eq!(report.meta.timeframe, "daily");
    assert!(out.path().join("charts/SBIN_Double_Top.json").exists());

    let path = out.path().join("dtop.json");
    report.write_json(&path).unwrap();
    assert_eq!(ScanReport::read_json(&path).unwrap(), Some(report));
}

#[test]
fn test_end_date_scans_history() {
    let data = tempfile::tempdir().unwrap();
    write_path(data.path(), "a", DOUBLE_TOP);

    let mut config = config(&data);
    config.save_state = true;
    // Before the second peak forms
    config.end_date = NaiveDate::from_ymd_opt(2024, 1, 25);
    assert!(config.state_store(Some("watch"), PatternSelection::Dtop).is_none());

    let scanner = Scanner::from_config(&config, PatternSelection::Dtop).unwrap();
    let report = scanner.run(&["A"], RunOptions::default()).unwrap();
    assert!(report.is_empty());
    assert_eq!(report.meta.end_date, config.end_datetime());

    config.end_date = None;
    let scanner = Scanner::from_config(&config, PatternSelection::Dtop).unwrap();
    assert_eq!(scanner.scan(&["A"]).len(), 1);
}

#[test]
fn test_closed_scanner_aborts() {
    let data = tempfile::tempdir().unwrap();
    write_path(data.path(), "a", DOUBLE_TOP);

    let scanner = Scanner::from_config(&config(&data), PatternSelection::All).unwrap();
    scanner.close();
    assert!(matches!(
        scanner.try_scan(&["A"]),
        Err(ScanError::Load {
            source: LoadError::Closed,
            ..
        })
    ));
}
