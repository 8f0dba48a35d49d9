//! Volatility contraction matchers
//!
//! A run of swings whose amplitude shrinks leg after leg while price holds a level:
//! pullbacks under a resistance for VCPU, rallies over a support for VCPD.

use std::collections::HashMap;

use super::helpers::{key_points, last_of_kind, swings, window};
use crate::{
    params::{check_known, get_period, get_ratio, ParamMeta, ParameterizedMatcher},
    Bar, MatcherError, MatcherId, PatternKind, PatternMatch, PatternMatcher, Period, Pivot,
    PivotKind, Ratio, Result,
};

impl_with_defaults!(ContractionUpMatcher, ContractionDownMatcher);

const CONTRACTIONS: ParamMeta = ParamMeta::period(
    "contractions",
    2.0,
    (1.0, 6.0),
    "Number of consecutive shrinking legs",
);
const LEVEL_TOLERANCE: ParamMeta = ParamMeta::ratio(
    "level_tolerance",
    0.05,
    (0.0, 0.2),
    "Allowed overshoot of the first swing's level",
);
const MIN_FIRST_DEPTH: ParamMeta = ParamMeta::ratio(
    "min_first_depth",
    0.05,
    (0.0, 0.5),
    "Minimum amplitude of the first leg",
);

static CONTRACTION_PARAMS: &[ParamMeta] = &[CONTRACTIONS, LEVEL_TOLERANCE, MIN_FIRST_DEPTH];

fn validate_contraction(
    contractions: Period,
    level_tolerance: Ratio,
    min_first_depth: Ratio,
) -> Result<()> {
    CONTRACTIONS.validate(contractions.get() as f64)?;
    LEVEL_TOLERANCE.validate(level_tolerance.get())?;
    MIN_FIRST_DEPTH.validate(min_first_depth.get())
}

/// The last `2 * legs` swings ending at the last swing of `end_kind`
fn trailing_legs(swings: &[Pivot], end_kind: PivotKind, legs: usize) -> Option<&[Pivot]> {
    let end = last_of_kind(swings, end_kind)?;
    let len = 2 * legs;
    if end + 1 < len {
        return None;
    }
    Some(&swings[end + 1 - len..=end])
}

// ============================================================
// VCPU
// ============================================================

/// High→low pullbacks with shrinking depth and rising lows under a common resistance
#[derive(Debug, Clone)]
pub struct ContractionUpMatcher {
    pub contractions: Period,
    pub level_tolerance: Ratio,
    pub min_first_depth: Ratio,
}

impl Default for ContractionUpMatcher {
    fn default() -> Self {
        Self {
            contractions: Period::new_const(CONTRACTIONS.default as usize),
            level_tolerance: Ratio::new_const(LEVEL_TOLERANCE.default),
            min_first_depth: Ratio::new_const(MIN_FIRST_DEPTH.default),
        }
    }
}

impl PatternMatcher for ContractionUpMatcher {
    fn id(&self) -> MatcherId {
        MatcherId::VCPU
    }

    fn min_pivots(&self) -> usize {
        2 * self.contractions.get()
    }

    fn find(
        &self,
        symbol: &str,
        bars: &[Bar],
        pivots: &[Pivot],
    ) -> std::result::Result<Option<PatternMatch>, MatcherError> {
        let swings = swings(pivots);
        let Some(legs) = trailing_legs(&swings, PivotKind::Low, self.contractions.get()) else {
            return Ok(None);
        };
        let (first, last) = (legs[0], legs[legs.len() - 1]);
        let w = window(bars, &first, &last)?;

        let resistance = first.price;
        let ceiling = resistance * (1.0 + self.level_tolerance.get());
        let mut prev_depth = f64::INFINITY;
        let mut prev_low = f64::NEG_INFINITY;
        for leg in legs.chunks_exact(2) {
            let (high, low) = (leg[0], leg[1]);
            if high.price <= 0.0 {
                return Ok(None);
            }
            let depth = (high.price - low.price) / high.price;
            if depth >= prev_depth || low.price <= prev_low || high.price > ceiling {
                return Ok(None);
            }
            prev_depth = depth;
            prev_low = low.price;
        }
        if (first.price - legs[1].price) / first.price < self.min_first_depth.get() {
            return Ok(None);
        }

        if swings
            .last()
            .filter(|next| next.index > last.index)
            .is_some_and(|next| next.price > ceiling)
        {
            return Ok(None);
        }
        if w.trailing.iter().any(|bar| bar.close <= last.price || bar.close > ceiling) {
            return Ok(None);
        }

        let points = key_points(legs, w.last);
        let m = PatternMatch::new(symbol, PatternKind::ContractionUp, points, w.last.date)
            .with_level("resistance", resistance)
            .with_level("support", last.price);
        Ok(Some(m))
    }

    fn validate_config(&self) -> Result<()> {
        validate_contraction(self.contractions, self.level_tolerance, self.min_first_depth)
    }
}

impl ParameterizedMatcher for ContractionUpMatcher {
    fn param_meta() -> &'static [ParamMeta] {
        CONTRACTION_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        check_known(params, CONTRACTION_PARAMS, MatcherId::VCPU)?;
        Ok(Self {
            contractions: get_period(params, &CONTRACTIONS)?,
            level_tolerance: get_ratio(params, &LEVEL_TOLERANCE)?,
            min_first_depth: get_ratio(params, &MIN_FIRST_DEPTH)?,
        })
    }

    fn matcher_id() -> MatcherId {
        MatcherId::VCPU
    }
}

// ============================================================
// VCPD
// ============================================================

/// Low→high rallies with shrinking amplitude and falling highs over a common support
#[derive(Debug, Clone)]
pub struct ContractionDownMatcher {
    pub contractions: Period,
    pub level_tolerance: Ratio,
    pub min_first_depth: Ratio,
}

impl Default for ContractionDownMatcher {
    fn default() -> Self {
        Self {
            contractions: Period::new_const(CONTRACTIONS.default as usize),
            level_tolerance: Ratio::new_const(LEVEL_TOLERANCE.default),
            min_first_depth: Ratio::new_const(MIN_FIRST_DEPTH.default),
        }
    }
}

impl PatternMatcher for ContractionDownMatcher {
    fn id(&self) -> MatcherId {
        MatcherId::VCPD
    }

    fn min_pivots(&self) -> usize {
        2 * self.contractions.get()
    }

    fn find(
        &self,
        symbol: &str,
        bars: &[Bar],
        pivots: &[Pivot],
    ) -> std::result::Result<Option<PatternMatch>, MatcherError> {
        let swings = swings(pivots);
        let Some(legs) = trailing_legs(&swings, PivotKind::High, self.contractions.get()) else {
            return Ok(None);
        };
        let (first, last) = (legs[0], legs[legs.len() - 1]);
        let w = window(bars, &first, &last)?;

        let support = first.price;
        let floor = support * (1.0 - self.level_tolerance.get());
        if support <= 0.0 {
            return Ok(None);
        }
        let mut prev_amplitude = f64::INFINITY;
        let mut prev_high = f64::INFINITY;
        for leg in legs.chunks_exact(2) {
            let (low, high) = (leg[0], leg[1]);
            if low.price <= 0.0 {
                return Ok(None);
            }
            let amplitude = (high.price - low.price) / low.price;
            if amplitude >= prev_amplitude || high.price >= prev_high || low.price < floor {
                return Ok(None);
            }
            prev_amplitude = amplitude;
            prev_high = high.price;
        }
        if (legs[1].price - first.price) / first.price < self.min_first_depth.get() {
            return Ok(None);
        }

        if swings
            .last()
            .filter(|next| next.index > last.index)
            .is_some_and(|next| next.price < floor)
        {
            return Ok(None);
        }
        if w.trailing.iter().any(|bar| bar.close >= last.price || bar.close < floor) {
            return Ok(None);
        }

        let points = key_points(legs, w.last);
        let m = PatternMatch::new(symbol, PatternKind::ContractionDown, points, w.last.date)
            .with_level("resistance", last.price)
            .with_level("support", support);
        Ok(Some(m))
    }

    fn validate_config(&self) -> Result<()> {
        validate_contraction(self.contractions, self.level_tolerance, self.min_first_depth)
    }
}

impl ParameterizedMatcher for ContractionDownMatcher {
    fn param_meta() -> &'static [ParamMeta] {
        CONTRACTION_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        check_known(params, CONTRACTION_PARAMS, MatcherId::VCPD)?;
        Ok(Self {
            contractions: get_period(params, &CONTRACTIONS)?,
            level_tolerance: get_ratio(params, &LEVEL_TOLERANCE)?,
            min_first_depth: get_ratio(params, &MIN_FIRST_DEPTH)?,
        })
    }

    fn matcher_id() -> MatcherId {
        MatcherId::VCPD
    }
}
