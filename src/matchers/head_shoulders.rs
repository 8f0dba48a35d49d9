//! Head-and-shoulders matchers
//!
//! HNSD is the classic top (three highs, the middle one highest) and HNSU the inverse
//! bottom. The neckline runs through the two reaction swings and may slope.

use std::collections::HashMap;

use super::helpers::{key_points, last_of_kind, line_at, pct_diff, swings, window};
use crate::{
    params::{check_known, get_ratio, ParamMeta, ParameterizedMatcher},
    Bar, MatcherError, MatcherId, PatternKind, PatternMatch, PatternMatcher, Pivot, PivotKind,
    Ratio, Result,
};

impl_with_defaults!(HeadShouldersDownMatcher, HeadShouldersUpMatcher);

const MIN_HEAD_EXCESS: ParamMeta = ParamMeta::ratio(
    "min_head_excess",
    0.02,
    (0.0, 0.5),
    "Minimum distance of the head beyond the farther shoulder",
);
const SHOULDER_TOLERANCE: ParamMeta = ParamMeta::ratio(
    "shoulder_tolerance",
    0.05,
    (0.0, 0.3),
    "Maximum relative gap between the shoulders",
);
const NECKLINE_TOLERANCE: ParamMeta = ParamMeta::ratio(
    "neckline_tolerance",
    0.05,
    (0.0, 0.3),
    "Maximum relative gap between the two neckline swings",
);

static HNS_PARAMS: &[ParamMeta] = &[MIN_HEAD_EXCESS, SHOULDER_TOLERANCE, NECKLINE_TOLERANCE];

fn validate_hns(
    min_head_excess: Ratio,
    shoulder_tolerance: Ratio,
    neckline_tolerance: Ratio,
) -> Result<()> {
    MIN_HEAD_EXCESS.validate(min_head_excess.get())?;
    SHOULDER_TOLERANCE.validate(shoulder_tolerance.get())?;
    NECKLINE_TOLERANCE.validate(neckline_tolerance.get())
}

/// The five swings `B C D E F` ending at the last swing of `shoulder_kind`
fn trailing_five(swings: &[Pivot], shoulder_kind: PivotKind) -> Option<[Pivot; 5]> {
    let f_pos = last_of_kind(swings, shoulder_kind)?;
    if f_pos < 4 {
        return None;
    }
    let s = &swings[f_pos - 4..=f_pos];
    Some([s[0], s[1], s[2], s[3], s[4]])
}

// ============================================================
// HEAD AND SHOULDERS (TOP)
// ============================================================

/// Highs B, D, F with D the head; lows C, E form the neckline
#[derive(Debug, Clone)]
pub struct HeadShouldersDownMatcher {
    pub min_head_excess: Ratio,
    pub shoulder_tolerance: Ratio,
    pub neckline_tolerance: Ratio,
}

impl Default for HeadShouldersDownMatcher {
    fn default() -> Self {
        Self {
            min_head_excess: Ratio::new_const(MIN_HEAD_EXCESS.default),
            shoulder_tolerance: Ratio::new_const(SHOULDER_TOLERANCE.default),
            neckline_tolerance: Ratio::new_const(NECKLINE_TOLERANCE.default),
        }
    }
}

impl PatternMatcher for HeadShouldersDownMatcher {
    fn id(&self) -> MatcherId {
        MatcherId::HNSD
    }

    fn min_pivots(&self) -> usize {
        5
    }

    fn find(
        &self,
        symbol: &str,
        bars: &[Bar],
        pivots: &[Pivot],
    ) -> std::result::Result<Option<PatternMatch>, MatcherError> {
        let swings = swings(pivots);
        let Some([b, c, d, e, f]) = trailing_five(&swings, PivotKind::High) else {
            return Ok(None);
        };
        let w = window(bars, &b, &f)?;

        let shoulder = b.price.max(f.price);
        if shoulder <= 0.0 || (d.price - shoulder) / shoulder < self.min_head_excess.get() {
            return Ok(None);
        }
        if pct_diff(b.price, f.price) > self.shoulder_tolerance.get()
            || pct_diff(c.price, e.price) > self.neckline_tolerance.get()
        {
            return Ok(None);
        }
        if c.price.max(e.price) >= b.price.min(f.price) {
            return Ok(None);
        }

        if swings
            .last()
            .filter(|next| next.index > f.index)
            .is_some_and(|next| next.price < line_at(&c, &e, next.index))
        {
            return Ok(None);
        }
        let inside = w.trailing.iter().enumerate().all(|(offset, bar)| {
            let neckline = line_at(&c, &e, w.trailing_start + offset);
            bar.close >= neckline && bar.close <= d.price
        });
        if !inside {
            return Ok(None);
        }

        let neckline = line_at(&c, &e, w.last_index);
        let height = d.price - line_at(&c, &e, d.index);
        let m = PatternMatch::new(
            symbol,
            PatternKind::HeadShouldersDown,
            key_points(&[b, c, d, e, f], w.last),
            w.last.date,
        )
        .with_level("neckline", neckline)
        .with_level("target", neckline - height);
        Ok(Some(m))
    }

    fn validate_config(&self) -> Result<()> {
        validate_hns(self.min_head_excess, self.shoulder_tolerance, self.neckline_tolerance)
    }
}

impl ParameterizedMatcher for HeadShouldersDownMatcher {
    fn param_meta() -> &'static [ParamMeta] {
        HNS_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        check_known(params, HNS_PARAMS, MatcherId::HNSD)?;
        Ok(Self {
            min_head_excess: get_ratio(params, &MIN_HEAD_EXCESS)?,
            shoulder_tolerance: get_ratio(params, &SHOULDER_TOLERANCE)?,
            neckline_tolerance: get_ratio(params, &NECKLINE_TOLERANCE)?,
        })
    }

    fn matcher_id() -> MatcherId {
        MatcherId::HNSD
    }
}

// ============================================================
// INVERSE HEAD AND SHOULDERS
// ============================================================

/// Lows B, D, F with D the head; highs C, E form the neckline
#[derive(Debug, Clone)]
pub struct HeadShouldersUpMatcher {
    pub min_head_excess: Ratio,
    pub shoulder_tolerance: Ratio,
    pub neckline_tolerance: Ratio,
}

impl Default for HeadShouldersUpMatcher {
    fn default() -> Self {
        Self {
            min_head_excess: Ratio::new_const(MIN_HEAD_EXCESS.default),
            shoulder_tolerance: Ratio::new_const(SHOULDER_TOLERANCE.default),
            neckline_tolerance: Ratio::new_const(NECKLINE_TOLERANCE.default),
        }
    }
}

impl PatternMatcher for HeadShouldersUpMatcher {
    fn id(&self) -> MatcherId {
        MatcherId::HNSU
    }

    fn min_pivots(&self) -> usize {
        5
    }

    fn find(
        &self,
        symbol: &str,
        bars: &[Bar],
        pivots: &[Pivot],
    ) -> std::result::Result<Option<PatternMatch>, MatcherError> {
        let swings = swings(pivots);
        let Some([b, c, d, e, f]) = trailing_five(&swings, PivotKind::Low) else {
            return Ok(None);
        };
        let w = window(bars, &b, &f)?;

        let shoulder = b.price.min(f.price);
        if shoulder <= 0.0 || (shoulder - d.price) / shoulder < self.min_head_excess.get() {
            return Ok(None);
        }
        if pct_diff(b.price, f.price) > self.shoulder_tolerance.get()
            || pct_diff(c.price, e.price) > self.neckline_tolerance.get()
        {
            return Ok(None);
        }
        if c.price.min(e.price) <= b.price.max(f.price) {
            return Ok(None);
        }

        if swings
            .last()
            .filter(|next| next.index > f.index)
            .is_some_and(|next| next.price > line_at(&c, &e, next.index))
        {
            return Ok(None);
        }
        let inside = w.trailing.iter().enumerate().all(|(offset, bar)| {
            let neckline = line_at(&c, &e, w.trailing_start + offset);
            bar.close <= neckline && bar.close >= d.price
        });
        if !inside {
            return Ok(None);
        }

        let neckline = line_at(&c, &e, w.last_index);
        let height = line_at(&c, &e, d.index) - d.price;
        let m = PatternMatch::new(
            symbol,
            PatternKind::HeadShouldersUp,
            key_points(&[b, c, d, e, f], w.last),
            w.last.date,
        )
        .with_level("neckline", neckline)
        .with_level("target", neckline + height);
        Ok(Some(m))
    }

    fn validate_config(&self) -> Result<()> {
        validate_hns(self.min_head_excess, self.shoulder_tolerance, self.neckline_tolerance)
    }
}

impl ParameterizedMatcher for HeadShouldersUpMatcher {
    fn param_meta() -> &'static [ParamMeta] {
        HNS_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        check_known(params, HNS_PARAMS, MatcherId::HNSU)?;
        Ok(Self {
            min_head_excess: get_ratio(params, &MIN_HEAD_EXCESS)?,
            shoulder_tolerance: get_ratio(params, &SHOULDER_TOLERANCE)?,
            neckline_tolerance: get_ratio(params, &NECKLINE_TOLERANCE)?,
        })
    }

    fn matcher_id() -> MatcherId {
        MatcherId::HNSU
    }
}
