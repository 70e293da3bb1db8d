//! Common helper functions for range and wave detection
//!
//! Relative tolerance comparisons and Fibonacci ratio matching shared across
//! all detector modules.

use crate::{tick::WaveTick, Side};

// ============================================================
// FIBONACCI RATIOS
// ============================================================

/// Retracement ratios accepted for wave 2 / wave 4 / wave B
pub const FIBONACCI_RATIOS: [f64; 5] = [0.236, 0.382, 0.5, 0.618, 0.786];

/// Closest Fibonacci ratio to `ratio` within relative `tolerance`
#[inline]
pub fn matching_fibonacci_ratio(ratio: f64, tolerance: f64) -> Option<f64> {
  if !ratio.is_finite() || ratio <= 0.0 {
    return None;
  }
  FIBONACCI_RATIOS
    .iter()
    .copied()
    .filter(|fib| (ratio - fib).abs() / fib <= tolerance)
    .min_by(|a, b| (ratio - a).abs().total_cmp(&(ratio - b).abs()))
}

// ============================================================
// RELATIVE COMPARISONS
// ============================================================

/// `|a - b| / mean(a, b)`; infinite when the mean is not positive
#[inline]
pub fn rel_diff(a: f64, b: f64) -> f64 {
  if a == b {
    return 0.0;
  }
  let mean = (a + b) / 2.0;
  if mean <= 0.0 {
    return f64::INFINITY;
  }
  (a - b).abs() / mean
}

#[inline]
pub fn is_within_tolerance(a: f64, b: f64, tolerance: f64) -> bool {
  rel_diff(a, b) <= tolerance
}

/// Percent change from `from` to `to`
#[inline]
pub fn pct_change(from: f64, to: f64) -> f64 {
  if from == 0.0 {
    return 0.0;
  }
  (to - from) / from * 100.0
}

// ============================================================
// TICK SPAN HELPERS
// ============================================================

/// Highest high minus lowest low over `ticks`
pub fn span_height(ticks: &[WaveTick]) -> f64 {
  let (max_high, min_low) = ticks.iter().fold((f64::MIN, f64::MAX), |(h, l), t| (h.max(t.high), l.min(t.low)));
  if ticks.is_empty() {
    0.0
  } else {
    max_high - min_low
  }
}

pub fn mean_close(ticks: &[WaveTick]) -> f64 {
  if ticks.is_empty() {
    return 0.0;
  }
  ticks.iter().map(|t| t.close).sum::<f64>() / ticks.len() as f64
}

/// Most extreme tick on `side`, the earliest one on ties
pub fn most_extreme(ticks: &[WaveTick], side: Side) -> Option<WaveTick> {
  ticks.iter().copied().fold(None, |best: Option<WaveTick>, t| match best {
    Some(b) if !side.is_beyond(side.value(&t), side.value(&b)) => Some(b),
    _ => Some(t),
  })
}

/// True if no tick strictly between the leg ends leaves the leg's price span.
///
/// A leg moving towards `end_side` starts at an extreme of the opposite side
/// and ends at an extreme of `end_side`.
pub fn is_clean_leg(between: &[WaveTick], start: &WaveTick, end: &WaveTick, end_side: Side) -> bool {
  let start_side = end_side.opposite();
  between.iter().all(|t| {
    !end_side.is_beyond(end_side.value(t), end_side.value(end))
      && !start_side.is_beyond(start_side.value(t), start_side.value(start))
  })
}
