//! Triangle matcher
//!
//! Two trendlines through the last two swing highs and the last two swing lows, converging
//! but not yet crossed. The slope pair decides the variant.

use std::collections::HashMap;

use super::helpers::{key_points, line_at, relative_slope, swings, window};
use crate::{
    params::{check_known, get_ratio, ParamMeta, ParameterizedMatcher},
    Bar, MatcherError, MatcherId, PatternKind, PatternMatch, PatternMatcher, Pivot, Ratio, Result,
};

impl_with_defaults!(TriangleMatcher);

const FLAT_TOLERANCE: ParamMeta = ParamMeta::ratio(
    "flat_tolerance",
    0.001,
    (0.0, 0.01),
    "Per-bar relative slope treated as flat",
);

static TRIANGLE_PARAMS: &[ParamMeta] = &[FLAT_TOLERANCE];

/// Symmetric, ascending or descending triangle over the last four swings
#[derive(Debug, Clone)]
pub struct TriangleMatcher {
    pub flat_tolerance: Ratio,
}

impl Default for TriangleMatcher {
    fn default() -> Self {
        Self {
            flat_tolerance: Ratio::new_const(FLAT_TOLERANCE.default),
        }
    }
}

impl TriangleMatcher {
    fn classify(&self, upper_slope: f64, lower_slope: f64) -> Option<PatternKind> {
        let flat = self.flat_tolerance.get();
        let falling = upper_slope < -flat;
        let rising = lower_slope > flat;
        if falling && rising {
            Some(PatternKind::SymmetricTriangle)
        } else if upper_slope.abs() <= flat && rising {
            Some(PatternKind::AscendingTriangle)
        } else if falling && lower_slope.abs() <= flat {
            Some(PatternKind::DescendingTriangle)
        } else {
            None
        }
    }
}

impl PatternMatcher for TriangleMatcher {
    fn id(&self) -> MatcherId {
        MatcherId::TRNG
    }

    fn min_pivots(&self) -> usize {
        4
    }

    fn find(
        &self,
        symbol: &str,
        bars: &[Bar],
        pivots: &[Pivot],
    ) -> std::result::Result<Option<PatternMatch>, MatcherError> {
        let swings = swings(pivots);
        if swings.len() < 4 {
            return Ok(None);
        }
        let tail = &swings[swings.len() - 4..];
        let highs: Vec<&Pivot> = tail.iter().filter(|p| p.is_high()).collect();
        let lows: Vec<&Pivot> = tail.iter().filter(|p| p.is_low()).collect();
        let ([h1, h2], [l1, l2]) = (highs.as_slice(), lows.as_slice()) else {
            return Ok(None);
        };
        let w = window(bars, &tail[0], &tail[3])?;

        let upper_slope = relative_slope(h1, h2);
        let lower_slope = relative_slope(l1, l2);
        let Some(kind) = self.classify(upper_slope, lower_slope) else {
            return Ok(None);
        };

        let upper = line_at(h1, h2, w.last_index);
        let lower = line_at(l1, l2, w.last_index);
        if upper <= lower {
            return Ok(None);
        }
        let inside = w.trailing.iter().enumerate().all(|(offset, bar)| {
            let index = w.trailing_start + offset;
            bar.close <= line_at(h1, h2, index) && bar.close >= line_at(l1, l2, index)
        });
        if !inside {
            return Ok(None);
        }

        let m = PatternMatch::new(symbol, kind, key_points(tail, w.last), w.last.date)
            .with_level("upper", upper)
            .with_level("lower", lower)
            .with_level("upper_slope", upper_slope)
            .with_level("lower_slope", lower_slope);
        Ok(Some(m))
    }

    fn validate_config(&self) -> Result<()> {
        FLAT_TOLERANCE.validate(self.flat_tolerance.get())
    }
}

impl ParameterizedMatcher for TriangleMatcher {
    fn param_meta() -> &'static [ParamMeta] {
        TRIANGLE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        check_known(params, TRIANGLE_PARAMS, MatcherId::TRNG)?;
        Ok(Self {
            flat_tolerance: get_ratio(params, &FLAT_TOLERANCE)?,
        })
    }

    fn matcher_id() -> MatcherId {
        MatcherId::TRNG
    }
}
