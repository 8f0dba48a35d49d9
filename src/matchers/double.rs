//! Double top and double bottom matchers
//!
//! Two comparable extremes separated by a pullback of meaningful depth, with price still
//! trading between the neckline and the extremes.

use std::collections::HashMap;

use super::helpers::{key_points, last_of_kind, pct_diff, swings, window};
use crate::{
    params::{check_known, get_ratio, ParamMeta, ParameterizedMatcher},
    Bar, MatcherError, MatcherId, PatternKind, PatternMatch, PatternMatcher, Pivot, PivotKind,
    Ratio, Result,
};

impl_with_defaults!(DoubleTopMatcher, DoubleBottomMatcher);

const PEAK_TOLERANCE: ParamMeta = ParamMeta::ratio(
    "peak_tolerance",
    0.03,
    (0.0, 0.2),
    "Maximum relative gap between the two extremes",
);
const MIN_DEPTH: ParamMeta = ParamMeta::ratio(
    "min_depth",
    0.05,
    (0.0, 0.5),
    "Minimum pullback between the extremes, relative to the nearer extreme",
);

static DOUBLE_PARAMS: &[ParamMeta] = &[PEAK_TOLERANCE, MIN_DEPTH];

// ============================================================
// DOUBLE TOP
// ============================================================

/// Two highs A and C within `peak_tolerance`, low B at least `min_depth` below both
#[derive(Debug, Clone)]
pub struct DoubleTopMatcher {
    pub peak_tolerance: Ratio,
    pub min_depth: Ratio,
}

impl Default for DoubleTopMatcher {
    fn default() -> Self {
        Self {
            peak_tolerance: Ratio::new_const(PEAK_TOLERANCE.default),
            min_depth: Ratio::new_const(MIN_DEPTH.default),
        }
    }
}

impl PatternMatcher for DoubleTopMatcher {
    fn id(&self) -> MatcherId {
        MatcherId::DTOP
    }

    fn min_pivots(&self) -> usize {
        3
    }

    fn find(
        &self,
        symbol: &str,
        bars: &[Bar],
        pivots: &[Pivot],
    ) -> std::result::Result<Option<PatternMatch>, MatcherError> {
        let swings = swings(pivots);
        let Some(c_pos) = last_of_kind(&swings, PivotKind::High) else {
            return Ok(None);
        };
        if c_pos < 2 {
            return Ok(None);
        }
        let (a, b, c) = (swings[c_pos - 2], swings[c_pos - 1], swings[c_pos]);
        let w = window(bars, &a, &c)?;

        let top = a.price.max(c.price);
        let lower_peak = a.price.min(c.price);
        if pct_diff(a.price, c.price) > self.peak_tolerance.get() {
            return Ok(None);
        }
        if lower_peak <= 0.0 || (lower_peak - b.price) / lower_peak < self.min_depth.get() {
            return Ok(None);
        }

        // A later swing low under the neckline means the pattern already resolved
        if swings.get(c_pos + 1).is_some_and(|next| next.price < b.price) {
            return Ok(None);
        }
        if w.trailing.iter().any(|bar| bar.close < b.price || bar.close > top) {
            return Ok(None);
        }

        let points = key_points(&[a, b, c], w.last);
        let m = PatternMatch::new(symbol, PatternKind::DoubleTop, points, w.last.date)
            .with_level("neckline", b.price)
            .with_level("target", b.price - (top - b.price));
        Ok(Some(m))
    }

    fn validate_config(&self) -> Result<()> {
        PEAK_TOLERANCE.validate(self.peak_tolerance.get())?;
        MIN_DEPTH.validate(self.min_depth.get())
    }
}

impl ParameterizedMatcher for DoubleTopMatcher {
    fn param_meta() -> &'static [ParamMeta] {
        DOUBLE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        check_known(params, DOUBLE_PARAMS, MatcherId::DTOP)?;
        Ok(Self {
            peak_tolerance: get_ratio(params, &PEAK_TOLERANCE)?,
            min_depth: get_ratio(params, &MIN_DEPTH)?,
        })
    }

    fn matcher_id() -> MatcherId {
        MatcherId::DTOP
    }
}

// ============================================================
// DOUBLE BOTTOM
// ============================================================

/// Two lows A and C within `peak_tolerance`, high B at least `min_depth` above both
#[derive(Debug, Clone)]
pub struct DoubleBottomMatcher {
    pub peak_tolerance: Ratio,
    pub min_depth: Ratio,
}

impl Default for DoubleBottomMatcher {
    fn default() -> Self {
        Self {
            peak_tolerance: Ratio::new_const(PEAK_TOLERANCE.default),
            min_depth: Ratio::new_const(MIN_DEPTH.default),
        }
    }
}

impl PatternMatcher for DoubleBottomMatcher {
    fn id(&self) -> MatcherId {
        MatcherId::DBOT
    }

    fn min_pivots(&self) -> usize {
        3
    }

    fn find(
        &self,
        symbol: &str,
        bars: &[Bar],
        pivots: &[Pivot],
    ) -> std::result::Result<Option<PatternMatch>, MatcherError> {
        let swings = swings(pivots);
        let Some(c_pos) = last_of_kind(&swings, PivotKind::Low) else {
            return Ok(None);
        };
        if c_pos < 2 {
            return Ok(None);
        }
        let (a, b, c) = (swings[c_pos - 2], swings[c_pos - 1], swings[c_pos]);
        let w = window(bars, &a, &c)?;

        let bottom = a.price.min(c.price);
        let higher_trough = a.price.max(c.price);
        if pct_diff(a.price, c.price) > self.peak_tolerance.get() {
            return Ok(None);
        }
        let depth = (b.price - higher_trough) / higher_trough;
        if higher_trough <= 0.0 || depth < self.min_depth.get() {
            return Ok(None);
        }

        if swings.get(c_pos + 1).is_some_and(|next| next.price > b.price) {
            return Ok(None);
        }
        if w.trailing.iter().any(|bar| bar.close > b.price || bar.close < bottom) {
            return Ok(None);
        }

        let points = key_points(&[a, b, c], w.last);
        let m = PatternMatch::new(symbol, PatternKind::DoubleBottom, points, w.last.date)
            .with_level("neckline", b.price)
            .with_level("target", b.price + (b.price - bottom));
        Ok(Some(m))
    }

    fn validate_config(&self) -> Result<()> {
        PEAK_TOLERANCE.validate(self.peak_tolerance.get())?;
        MIN_DEPTH.validate(self.min_depth.get())
    }
}

impl ParameterizedMatcher for DoubleBottomMatcher {
    fn param_meta() -> &'static [ParamMeta] {
        DOUBLE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        check_known(params, DOUBLE_PARAMS, MatcherId::DBOT)?;
        Ok(Self {
            peak_tolerance: get_ratio(params, &PEAK_TOLERANCE)?,
            min_depth: get_ratio(params, &MIN_DEPTH)?,
        })
    }

    fn matcher_id() -> MatcherId {
        MatcherId::DBOT
    }
}
