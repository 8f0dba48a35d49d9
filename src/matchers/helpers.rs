//! Common helpers for chart pattern matching
//!
//! Swing compression, relative price comparisons and trendline geometry shared by all
//! matcher modules.

use crate::{Bar, KeyPoint, MatcherError, Pivot, PivotKind};

// ============================================================
// SWINGS
// ============================================================

/// Compress consecutive same-kind pivots to the most extreme one.
///
/// The result alternates between highs and lows. On equal prices the earlier pivot is
/// kept. A bar that is both a high and a low pivot contributes to both runs.
pub fn swings(pivots: &[Pivot]) -> Vec<Pivot> {
    let mut out: Vec<Pivot> = Vec::with_capacity(pivots.len());
    for pivot in pivots {
        match out.last_mut() {
            Some(last) if last.kind == pivot.kind => {
                let more_extreme = match pivot.kind {
                    PivotKind::High => pivot.price > last.price,
                    PivotKind::Low => pivot.price < last.price,
                };
                if more_extreme {
                    *last = *pivot;
                }
            }
            _ => out.push(*pivot),
        }
    }
    out
}

/// Position of the last swing of `kind`
#[inline]
pub(crate) fn last_of_kind(swings: &[Pivot], kind: PivotKind) -> Option<usize> {
    swings.iter().rposition(|p| p.kind == kind)
}

// ============================================================
// PRICE GEOMETRY
// ============================================================

/// Absolute difference relative to the larger magnitude
#[inline]
pub fn pct_diff(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        0.0
    } else {
        (a - b).abs() / scale
    }
}

/// Per-bar slope of the line through two pivots, relative to the first price
#[inline]
pub fn relative_slope(from: &Pivot, to: &Pivot) -> f64 {
    let bars = to.index as f64 - from.index as f64;
    if bars == 0.0 || from.price == 0.0 {
        return 0.0;
    }
    (to.price - from.price) / bars / from.price
}

/// Value at `index` of the line through two pivots
#[inline]
pub(crate) fn line_at(from: &Pivot, to: &Pivot, index: usize) -> f64 {
    let bars = to.index as f64 - from.index as f64;
    if bars == 0.0 {
        return from.price;
    }
    from.price + (to.price - from.price) * (index as f64 - from.index as f64) / bars
}

// ============================================================
// WINDOWS & KEY POINTS
// ============================================================

/// Bars a matcher inspects once its swings are chosen
pub(crate) struct Window<'a> {
    /// Bars strictly after the last swing
    pub trailing: &'a [Bar],
    /// Index of `trailing[0]` in the full bar slice
    pub trailing_start: usize,
    pub last: &'a Bar,
    pub last_index: usize,
}

/// Validate bars from `first` to the end and split off the bars after `last`.
pub(crate) fn window<'a>(
    bars: &'a [Bar],
    first: &Pivot,
    last: &Pivot,
) -> Result<Window<'a>, MatcherError> {
    let furthest = first.index.max(last.index);
    if furthest >= bars.len() {
        return Err(MatcherError::PivotOutOfRange {
            index: furthest,
            len: bars.len(),
        });
    }
    let from = first.index.min(last.index);
    for (offset, bar) in bars[from..].iter().enumerate() {
        bar.validate().map_err(|reason| MatcherError::InvalidBar {
            index: from + offset,
            reason,
        })?;
    }

    let last_index = bars.len() - 1;
    Ok(Window {
        trailing: &bars[last.index + 1..],
        trailing_start: last.index + 1,
        last: &bars[last_index],
        last_index,
    })
}

#[inline]
fn label(position: usize) -> char {
    char::from(b'A' + (position % 26) as u8)
}

/// Label the swings A, B, C, ... and append the last close as the final point
pub(crate) fn key_points(swings: &[Pivot], last: &Bar) -> Vec<KeyPoint> {
    let mut points: Vec<KeyPoint> = swings
        .iter()
        .enumerate()
        .map(|(i, p)| KeyPoint {
            label: label(i),
            date: p.date,
            price: p.price,
        })
        .collect();
    points.push(KeyPoint {
        label: label(swings.len()),
        date: last.date,
        price: last.close,
    });
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::day;

    fn pivot(index: usize, price: f64, kind: PivotKind) -> Pivot {
        Pivot {
            index,
            date: day(index as i64),
            price,
            kind,
        }
    }

    #[test]
    fn test_swings_alternate() {
        let pivots = [
            pivot(2, 10.0, PivotKind::High),
            pivot(4, 12.0, PivotKind::High),
            pivot(6, 5.0, PivotKind::Low),
            pivot(8, 6.0, PivotKind::Low),
            pivot(10, 11.0, PivotKind::High),
        ];
        let s = swings(&pivots);
        assert_eq!(s.len(), 3);
        assert_eq!((s[0].index, s[0].price), (4, 12.0));
        assert_eq!((s[1].index, s[1].price), (6, 5.0));
        assert_eq!(s[2].index, 10);
    }

    #[test]
    fn test_swings_keep_earlier_on_tie() {
        let pivots = [pivot(3, 10.0, PivotKind::High), pivot(4, 10.0, PivotKind::High)];
        assert_eq!(swings(&pivots)[0].index, 3);
    }

    #[test]
    fn test_pct_diff() {
        assert_eq!(pct_diff(0.0, 0.0), 0.0);
        assert!((pct_diff(100.0, 97.0) - 0.03).abs() < 1e-12);
        assert_eq!(pct_diff(97.0, 100.0), pct_diff(100.0, 97.0));
    }

    #[test]
    fn test_line_geometry() {
        let a = pivot(10, 100.0, PivotKind::Low);
        let b = pivot(20, 110.0, PivotKind::Low);
        assert!((line_at(&a, &b, 30) - 120.0).abs() < 1e-12);
        assert!((relative_slope(&a, &b) - 0.01).abs() < 1e-12);
        assert_eq!(relative_slope(&a, &a), 0.0);
    }

    #[test]
    fn test_window_rejects_out_of_range_pivot() {
        let bars = [Bar::new(day(0), 1.0, 1.0, 1.0, 1.0, 0.0)];
        let p = pivot(3, 1.0, PivotKind::High);
        assert!(matches!(
            window(&bars, &p, &p),
            Err(MatcherError::PivotOutOfRange { index: 3, len: 1 })
        ));
    }

    #[test]
    fn test_window_rejects_invalid_bar() {
        let bars = [
            Bar::new(day(0), 1.0, 2.0, 0.5, 1.0, 0.0),
            Bar::new(day(1), 1.0, f64::INFINITY, 0.5, 1.0, 0.0),
        ];
        let p = pivot(0, 2.0, PivotKind::High);
        assert!(matches!(
            window(&bars, &p, &p),
            Err(MatcherError::InvalidBar { index: 1, .. })
        ));
    }

    #[test]
    fn test_key_points_end_with_close() {
        let bars = [Bar::new(day(5), 1.0, 2.0, 0.5, 1.5, 0.0)];
        let points = key_points(&[pivot(0, 2.0, PivotKind::High)], &bars[0]);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].label, 'A');
        assert_eq!(points[1].label, 'B');
        assert_eq!(points[1].price, 1.5);
    }
}
