//! # chartscan - chart pattern scanner
//!
//! Detects chart-geometry patterns (volatility contractions, double tops/bottoms,
//! head-and-shoulders, triangles) across a universe of symbols.
//!
//! The pipeline is: bounded trailing-window load ([`loader`]) → swing pivots
//! ([`pivots`]) → pattern matchers ([`matchers`]) → parallel fan-out and aggregation
//! ([`scan`]) → run-over-run deduplication ([`state`]).
//!
//! ## Quick Start
//!
//! ```rust
//! use chartscan::prelude::*;
//!
//! let engine = EngineBuilder::new()
//!     .with_selection(PatternSelection::All)
//!     .pivot_window(6, 6)
//!     .build()
//!     .unwrap();
//!
//! let bars: Vec<Bar> = vec![];
//! let scan = engine.scan_symbol("AAPL", &bars);
//! assert!(scan.matches.is_empty());
//! ```

use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    fmt,
    panic::{self, AssertUnwindSafe},
    str::FromStr,
};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::error;

pub mod config;
pub mod export;
pub mod loader;
pub mod logging;
pub mod matchers;
pub mod params;
pub mod pivots;
pub mod scan;
pub mod state;

pub use pivots::{detect_pivots, Pivot, PivotKind, PivotWindow};

pub mod prelude {
    pub use crate::{
        // Configuration
        config::{ConfigError, ScanConfig},
        // Export
        export::{ChartExporter, ExportError, SnapshotExporter},
        // Loading
        loader::{load_tail, CsvSeriesSource, LoadError, SeriesSource},
        // Matchers
        matchers::*,
        // Parameters
        params::{ParamMeta, ParamType, ParameterizedMatcher},
        // Pivots
        pivots::{detect_pivots, Pivot, PivotKind, PivotWindow},
        // Orchestration
        scan::{RunOptions, ScanError, ScanMeta, ScanReport, Scanner},
        // State
        state::{EmitPolicy, ScanState, StateDiff, StateError, StateStore},
        // Core types
        Bar,
        BuiltinMatcher,
        EngineBuilder,
        KeyPoint,
        MatcherError,
        MatcherFailure,
        MatcherId,
        PatternEngine,
        PatternError,
        PatternKind,
        PatternMatch,
        PatternMatcher,
        PatternSelection,
        Period,
        Ratio,
        Result,
        SymbolScan,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors raised while configuring matchers and selections
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Unknown pattern selection '{0}'")]
    UnknownSelection(String),

    #[error("Unknown parameter '{name}' for matcher '{matcher}'")]
    UnknownParam { matcher: &'static str, name: String },
}

/// Failure inside a single matcher.
///
/// These are recoverable: the engine logs them and stops evaluating further matchers for
/// that symbol, keeping whatever matched before the failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatcherError {
    #[error("invalid bar at index {index}: {reason}")]
    InvalidBar { index: usize, reason: &'static str },

    #[error("pivot index {index} outside of {len} bars")]
    PivotOutOfRange { index: usize, len: usize },

    #[error("matcher panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(PatternError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(PatternError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(PatternError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// BARS
// ============================================================

/// One OHLCV row of a price series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(rename = "Date", deserialize_with = "loader::deserialize_date")]
    pub date: NaiveDateTime,
    #[serde(rename = "Open")]
    pub open: f64,
    #[serde(rename = "High")]
    pub high: f64,
    #[serde(rename = "Low")]
    pub low: f64,
    #[serde(rename = "Close")]
    pub close: f64,
    #[serde(rename = "Volume", default)]
    pub volume: f64,
}

impl Bar {
    pub fn new(
        date: NaiveDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[inline]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Check price consistency; the error is a short reason string
    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| p.is_nan()) {
            return Err("NaN in OHLC");
        }
        if prices.iter().any(|p| p.is_infinite()) {
            return Err("Infinite value in OHLC");
        }
        if self.high < self.low {
            return Err("high < low");
        }
        Ok(())
    }
}

// ============================================================
// PATTERN MATCH - result of detection
// ============================================================

/// Named chart pattern emitted by a matcher.
///
/// Serialized names are the ones used in state and scan output files, so the pattern key
/// `{symbol}-{pattern}` stays stable across runs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum PatternKind {
    #[serde(rename = "VCPU")]
    ContractionUp,
    #[serde(rename = "VCPD")]
    ContractionDown,
    #[serde(rename = "Double Bottom")]
    DoubleBottom,
    #[serde(rename = "Double Top")]
    DoubleTop,
    #[serde(rename = "HNSD")]
    HeadShouldersDown,
    #[serde(rename = "HNSU")]
    HeadShouldersUp,
    #[serde(rename = "Symmetric")]
    SymmetricTriangle,
    #[serde(rename = "Ascending")]
    AscendingTriangle,
    #[serde(rename = "Descending")]
    DescendingTriangle,
}

impl PatternKind {
    pub fn name(self) -> &'static str {
        match self {
            PatternKind::ContractionUp => "VCPU",
            PatternKind::ContractionDown => "VCPD",
            PatternKind::DoubleBottom => "Double Bottom",
            PatternKind::DoubleTop => "Double Top",
            PatternKind::HeadShouldersDown => "HNSD",
            PatternKind::HeadShouldersUp => "HNSU",
            PatternKind::SymmetricTriangle => "Symmetric",
            PatternKind::AscendingTriangle => "Ascending",
            PatternKind::DescendingTriangle => "Descending",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Labelled price level of a pattern (A, B, C, ...)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub label: char,
    pub date: NaiveDateTime,
    pub price: f64,
}

/// A detected pattern occurrence for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    #[serde(alias = "sym")]
    pub symbol: String,
    pub pattern: PatternKind,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Key points in chronological order
    pub points: Vec<KeyPoint>,
    /// Named levels for plotting (neckline, target, trendline values, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub levels: BTreeMap<String, f64>,
}

impl PatternMatch {
    /// Start is taken from the first key point; `end` is normally the last bar's date.
    pub fn new(
        symbol: &str,
        pattern: PatternKind,
        points: Vec<KeyPoint>,
        end: NaiveDateTime,
    ) -> Self {
        let start = points.first().map_or(end, |p| p.date.min(end));
        Self {
            symbol: symbol.to_string(),
            pattern,
            start,
            end,
            points,
            levels: BTreeMap::new(),
        }
    }

    pub fn with_level(mut self, name: &str, value: f64) -> Self {
        self.levels.insert(name.to_string(), value);
        self
    }

    /// Identity used for run-over-run deduplication
    pub fn key(&self) -> String {
        format!("{}-{}", self.symbol, self.pattern)
    }
}

// ============================================================
// MATCHER IDS & SELECTIONS
// ============================================================

/// Identifier of a matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatcherId(pub &'static str);

impl MatcherId {
    pub const VCPU: MatcherId = MatcherId("vcpu");
    pub const VCPD: MatcherId = MatcherId("vcpd");
    pub const DBOT: MatcherId = MatcherId("dbot");
    pub const DTOP: MatcherId = MatcherId("dtop");
    pub const HNSD: MatcherId = MatcherId("hnsd");
    pub const HNSU: MatcherId = MatcherId("hnsu");
    pub const TRNG: MatcherId = MatcherId("trng");

    #[inline]
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for MatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Which matchers a scan runs.
///
/// Groups expand to a fixed, ordered list of builtin matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternSelection {
    All,
    Bull,
    Bear,
    Vcpu,
    Vcpd,
    Dbot,
    Dtop,
    Hnsd,
    Hnsu,
    Trng,
}

const ALL_MATCHERS: [MatcherId; 7] = [
    MatcherId::VCPU,
    MatcherId::VCPD,
    MatcherId::DBOT,
    MatcherId::DTOP,
    MatcherId::HNSD,
    MatcherId::HNSU,
    MatcherId::TRNG,
];
const BULL_MATCHERS: [MatcherId; 3] = [MatcherId::VCPU, MatcherId::DBOT, MatcherId::HNSU];
const BEAR_MATCHERS: [MatcherId; 3] = [MatcherId::VCPD, MatcherId::DTOP, MatcherId::HNSD];

impl PatternSelection {
    pub const KEYS: [&'static str; 10] = [
        "all", "bull", "bear", "vcpu", "vcpd", "dbot", "dtop", "hnsd", "hnsu", "trng",
    ];

    pub fn matcher_ids(self) -> &'static [MatcherId] {
        match self {
            PatternSelection::All => &ALL_MATCHERS,
            PatternSelection::Bull => &BULL_MATCHERS,
            PatternSelection::Bear => &BEAR_MATCHERS,
            PatternSelection::Vcpu => &ALL_MATCHERS[0..1],
            PatternSelection::Vcpd => &ALL_MATCHERS[1..2],
            PatternSelection::Dbot => &ALL_MATCHERS[2..3],
            PatternSelection::Dtop => &ALL_MATCHERS[3..4],
            PatternSelection::Hnsd => &ALL_MATCHERS[4..5],
            PatternSelection::Hnsu => &ALL_MATCHERS[5..6],
            PatternSelection::Trng => &ALL_MATCHERS[6..7],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatternSelection::All => "all",
            PatternSelection::Bull => "bull",
            PatternSelection::Bear => "bear",
            PatternSelection::Vcpu => "vcpu",
            PatternSelection::Vcpd => "vcpd",
            PatternSelection::Dbot => "dbot",
            PatternSelection::Dtop => "dtop",
            PatternSelection::Hnsd => "hnsd",
            PatternSelection::Hnsu => "hnsu",
            PatternSelection::Trng => "trng",
        }
    }
}

impl FromStr for PatternSelection {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self> {
        let selection = match s.trim().to_ascii_lowercase().as_str() {
            "all" => PatternSelection::All,
            "bull" => PatternSelection::Bull,
            "bear" => PatternSelection::Bear,
            "vcpu" => PatternSelection::Vcpu,
            "vcpd" => PatternSelection::Vcpd,
            "dbot" => PatternSelection::Dbot,
            "dtop" => PatternSelection::Dtop,
            "hnsd" => PatternSelection::Hnsd,
            "hnsu" => PatternSelection::Hnsu,
            "trng" => PatternSelection::Trng,
            _ => return Err(PatternError::UnknownSelection(s.to_string())),
        };
        Ok(selection)
    }
}

impl fmt::Display for PatternSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// PATTERN MATCHER TRAIT
// ============================================================

/// A pure test of one named chart pattern against bars and their pivots.
///
/// Implementations must not keep state between calls; the same matcher instance is shared
/// by every worker of a scan.
pub trait PatternMatcher: Send + Sync {
    fn id(&self) -> MatcherId;

    /// Fewer pivots than this can never match, so the engine skips the call.
    fn min_pivots(&self) -> usize;

    fn find(
        &self,
        symbol: &str,
        bars: &[Bar],
        pivots: &[Pivot],
    ) -> std::result::Result<Option<PatternMatch>, MatcherError>;

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// BUILTIN MATCHERS - generated via macro
// ============================================================

use matchers::*;
use params::ParameterizedMatcher;

/// Macro to generate BuiltinMatcher enum without boilerplate
macro_rules! define_builtin_matchers {
    (
        $(
            $variant:ident($matcher:ty) => $id:expr
        ),* $(,)?
    ) => {
        /// All builtin matchers - enum dispatch
        #[derive(Debug, Clone)]
        pub enum BuiltinMatcher {
            $($variant($matcher)),*
        }

        impl BuiltinMatcher {
            /// Default-configured matcher for `id`, `None` if it is not a builtin
            pub fn from_id(id: MatcherId) -> Option<Self> {
                $(
                    if id == $id {
                        return Some(Self::$variant(<$matcher>::default()));
                    }
                )*
                None
            }

            /// Matcher for `id` with parameter overrides
            pub fn from_params(id: MatcherId, params: &HashMap<&str, f64>) -> Result<Option<Self>> {
                $(
                    if id == $id {
                        return <$matcher as ParameterizedMatcher>::with_params(params)
                            .map(|m| Some(Self::$variant(m)));
                    }
                )*
                Ok(None)
            }
        }

        impl PatternMatcher for BuiltinMatcher {
            #[inline]
            fn id(&self) -> MatcherId {
                match self {
                    $(Self::$variant(m) => PatternMatcher::id(m)),*
                }
            }

            #[inline]
            fn min_pivots(&self) -> usize {
                match self {
                    $(Self::$variant(m) => PatternMatcher::min_pivots(m)),*
                }
            }

            #[inline]
            fn find(
                &self,
                symbol: &str,
                bars: &[Bar],
                pivots: &[Pivot],
            ) -> std::result::Result<Option<PatternMatch>, MatcherError> {
                match self {
                    $(Self::$variant(m) => PatternMatcher::find(m, symbol, bars, pivots)),*
                }
            }

            fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(m) => PatternMatcher::validate_config(m)),*
                }
            }
        }
    };
}

define_builtin_matchers! {
    ContractionUp(ContractionUpMatcher) => MatcherId::VCPU,
    ContractionDown(ContractionDownMatcher) => MatcherId::VCPD,
    DoubleBottom(DoubleBottomMatcher) => MatcherId::DBOT,
    DoubleTop(DoubleTopMatcher) => MatcherId::DTOP,
    HeadShouldersDown(HeadShouldersDownMatcher) => MatcherId::HNSD,
    HeadShouldersUp(HeadShouldersUpMatcher) => MatcherId::HNSU,
    Triangle(TriangleMatcher) => MatcherId::TRNG,
}

// ============================================================
// PATTERN ENGINE
// ============================================================

/// Engine configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    pub pivots: PivotWindow,
}

/// A matcher that failed while scanning a symbol
#[derive(Debug, Clone, PartialEq)]
pub struct MatcherFailure {
    pub matcher: MatcherId,
    pub error: MatcherError,
}

/// Outcome of running the matcher sequence over one symbol
#[derive(Debug, Clone, Default)]
pub struct SymbolScan {
    pub matches: Vec<PatternMatch>,
    /// Set when a matcher failed and the remaining matchers were not run
    pub failure: Option<MatcherFailure>,
}

/// Runs pivot detection and an ordered matcher sequence over one symbol's bars
pub struct PatternEngine {
    builtin: Vec<BuiltinMatcher>,
    custom: Vec<Box<dyn PatternMatcher>>,
    config: EngineConfig,
}

impl PatternEngine {
    #[inline]
    pub fn pivot_window(&self) -> PivotWindow {
        self.config.pivots
    }

    pub fn len(&self) -> usize {
        self.builtin.len() + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Matchers in evaluation order: builtin first, then custom
    pub fn matchers(&self) -> impl Iterator<Item = &dyn PatternMatcher> + '_ {
        self.builtin
            .iter()
            .map(builtin_as_dyn)
            .chain(self.custom.iter().map(boxed_as_dyn))
    }

    pub fn matcher_ids(&self) -> Vec<MatcherId> {
        self.matchers().map(|m| m.id()).collect()
    }

    /// Detect pivots and run every matcher over one symbol.
    ///
    /// A failing matcher stops evaluation for this symbol; matches found by earlier
    /// matchers are kept.
    pub fn scan_symbol(&self, symbol: &str, bars: &[Bar]) -> SymbolScan {
        let pivots = self.config.pivots.detect(bars);
        if pivots.is_empty() {
            return SymbolScan::default();
        }
        self.scan_pivots(symbol, bars, &pivots)
    }

    /// Run the matcher sequence against precomputed pivots
    pub fn scan_pivots(&self, symbol: &str, bars: &[Bar], pivots: &[Pivot]) -> SymbolScan {
        let mut scan = SymbolScan::default();

        for matcher in self.matchers() {
            if pivots.len() < matcher.min_pivots() {
                continue;
            }
            match run_matcher(matcher, symbol, bars, pivots) {
                Ok(Some(m)) => scan.matches.push(m),
                Ok(None) => {}
                Err(err) => {
                    error!(
                        symbol,
                        matcher = matcher.id().as_str(),
                        error = %err,
                        "matcher failed, skipping remaining matchers for symbol"
                    );
                    scan.failure = Some(MatcherFailure {
                        matcher: matcher.id(),
                        error: err,
                    });
                    break;
                }
            }
        }

        scan
    }

    fn validate(&self) -> Result<()> {
        for m in self.matchers() {
            m.validate_config()?;
        }
        Ok(())
    }
}

impl fmt::Debug for PatternEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternEngine")
            .field("matchers", &self.matcher_ids())
            .field("config", &self.config)
            .finish()
    }
}

fn builtin_as_dyn(m: &BuiltinMatcher) -> &dyn PatternMatcher {
    m
}

#[allow(clippy::borrowed_box)]
fn boxed_as_dyn(m: &Box<dyn PatternMatcher>) -> &dyn PatternMatcher {
    m.as_ref()
}

/// Panics inside matcher code are reported as matcher failures.
fn run_matcher(
    matcher: &dyn PatternMatcher,
    symbol: &str,
    bars: &[Bar],
    pivots: &[Pivot],
) -> std::result::Result<Option<PatternMatch>, MatcherError> {
    panic::catch_unwind(AssertUnwindSafe(|| matcher.find(symbol, bars, pivots)))
        .unwrap_or_else(|payload| Err(MatcherError::Panicked(panic_message(payload.as_ref()))))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating PatternEngine instances
pub struct EngineBuilder {
    builtin: Vec<BuiltinMatcher>,
    custom: Vec<Box<dyn PatternMatcher>>,
    config: EngineConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            builtin: Vec::new(),
            custom: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    /// Add the builtin matchers of a selection with default tolerances
    pub fn with_selection(mut self, selection: PatternSelection) -> Self {
        self.builtin.extend(
            selection
                .matcher_ids()
                .iter()
                .filter_map(|id| BuiltinMatcher::from_id(*id)),
        );
        self
    }

    /// Add the builtin matchers of a selection, applying per-matcher parameter overrides.
    ///
    /// `overrides` maps a matcher id (`"dtop"`) to parameter name → value. Overrides for
    /// matchers that are not builtins are rejected.
    pub fn with_selection_params(
        mut self,
        selection: PatternSelection,
        overrides: &HashMap<String, HashMap<String, f64>>,
    ) -> Result<Self> {
        if let Some(unknown) = overrides
            .keys()
            .find(|key| !ALL_MATCHERS.iter().any(|id| id.as_str() == key.as_str()))
        {
            return Err(PatternError::InvalidConfig(format!(
                "no builtin matcher named '{unknown}'"
            )));
        }

        for id in selection.matcher_ids() {
            let matcher = match overrides.get(id.as_str()) {
                Some(params) => {
                    let params: HashMap<&str, f64> =
                        params.iter().map(|(k, v)| (k.as_str(), *v)).collect();
                    BuiltinMatcher::from_params(*id, &params)?
                }
                None => BuiltinMatcher::from_id(*id),
            };
            self.builtin.extend(matcher);
        }
        Ok(self)
    }

    /// Add a builtin matcher
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, matcher: BuiltinMatcher) -> Self {
        self.builtin.push(matcher);
        self
    }

    /// Add with config validation
    pub fn add_checked(mut self, matcher: BuiltinMatcher) -> Result<Self> {
        matcher.validate_config()?;
        self.builtin.push(matcher);
        Ok(self)
    }

    /// Add a custom matcher; custom matchers run after all builtins
    pub fn add_custom<M: PatternMatcher + 'static>(mut self, matcher: M) -> Self {
        self.custom.push(Box::new(matcher));
        self
    }

    /// Bars required on each side of a pivot
    pub fn pivot_window(mut self, left: usize, right: usize) -> Self {
        self.config.pivots = PivotWindow::new(left, right);
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<PatternEngine> {
        let engine = PatternEngine {
            builtin: self.builtin,
            custom: self.custom,
            config: self.config,
        };
        engine.validate()?;
        Ok(engine)
    }
}

// ============================================================
// TESTS
// ============================================================
