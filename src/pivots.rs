//! Swing-point (pivot) detection.
//!
//! A bar is a pivot high when no bar within `left` bars before it or `right` bars after
//! it has a higher high. Pivot lows mirror this with lows. Window extrema are tracked with
//! monotonic deques, so detection is linear in the number of bars for any window size.

use std::collections::VecDeque;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PivotKind {
    High,
    Low,
}

/// A swing point at `bars[index]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    pub index: usize,
    pub date: NaiveDateTime,
    /// High for [`PivotKind::High`], low for [`PivotKind::Low`]
    pub price: f64,
    pub kind: PivotKind,
}

impl Pivot {
    #[inline]
    pub fn is_high(&self) -> bool {
        self.kind == PivotKind::High
    }

    #[inline]
    pub fn is_low(&self) -> bool {
        self.kind == PivotKind::Low
    }
}

/// Bars required on each side of a pivot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotWindow {
    pub left: usize,
    pub right: usize,
}

impl Default for PivotWindow {
    fn default() -> Self {
        Self { left: 6, right: 6 }
    }
}

impl PivotWindow {
    pub const fn new(left: usize, right: usize) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.left + self.right + 1
    }

    pub fn detect(&self, bars: &[Bar]) -> Vec<Pivot> {
        detect_pivots(bars, self.left, self.right)
    }
}

/// Sliding-window extremum over indices, oldest at the front.
///
/// Values that can never become the extremum again are dropped from the back, so the front
/// is always the window's max (or min). NaN values are never admitted.
struct MonotonicDeque {
    deque: VecDeque<usize>,
    width: usize,
    /// `dominates(new, old)` is true when `old` can be evicted in favour of `new`
    dominates: fn(f64, f64) -> bool,
}

impl MonotonicDeque {
    fn new(width: usize, dominates: fn(f64, f64) -> bool) -> Self {
        Self {
            deque: VecDeque::with_capacity(width),
            width,
            dominates,
        }
    }

    fn push(&mut self, index: usize, values: &[f64]) {
        let value = values[index];
        if !value.is_nan() {
            while let Some(&back) = self.deque.back() {
                if (self.dominates)(value, values[back]) {
                    self.deque.pop_back();
                } else {
                    break;
                }
            }
            self.deque.push_back(index);
        }
        while let Some(&front) = self.deque.front() {
            if front + self.width <= index {
                self.deque.pop_front();
            } else {
                break;
            }
        }
    }

    #[inline]
    fn extremum(&self, values: &[f64]) -> Option<f64> {
        self.deque.front().map(|&i| values[i])
    }
}

/// Detect pivot highs and lows.
///
/// Only bars with a full `[i - left, i + right]` window are evaluated. Ties with the
/// window extremum qualify, so flat tops can produce several adjacent pivots. A bar that is
/// both the highest high and the lowest low of its window yields a high and then a low.
pub fn detect_pivots(bars: &[Bar], left: usize, right: usize) -> Vec<Pivot> {
    let width = left + right + 1;
    if bars.len() < width {
        return Vec::new();
    }

    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();

    let mut max_window = MonotonicDeque::new(width, |new, old| new >= old);
    let mut min_window = MonotonicDeque::new(width, |new, old| new <= old);
    let mut pivots = Vec::new();

    for end in 0..bars.len() {
        max_window.push(end, &highs);
        min_window.push(end, &lows);

        if end + 1 < width {
            continue;
        }
        let i = end - right;

        // NaN compares false, so a NaN bar never qualifies
        if max_window.extremum(&highs).is_some_and(|max| highs[i] >= max) {
            pivots.push(Pivot {
                index: i,
                date: bars[i].date,
                price: highs[i],
                kind: PivotKind::High,
            });
        }
        if min_window.extremum(&lows).is_some_and(|min| lows[i] <= min) {
            pivots.push(Pivot {
                index: i,
                date: bars[i].date,
                price: lows[i],
                kind: PivotKind::Low,
            });
        }
    }

    pivots
}
