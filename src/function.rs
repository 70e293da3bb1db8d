//! Linear parameter functions used as pattern boundaries
//!
//! Boundaries are stored in point-slope form anchored at a timestamp so that
//! evaluating them near the anchor stays exact for the small integer prices
//! used by callers and tests.

use serde::{Deserialize, Serialize};

/// Absolute cap for slope percentages (vertical lines get this sentinel)
pub const SLOPE_PCT_CAP: f64 = 1000.0;

/// Straight line `value(ts) = value_anchor + slope * (ts - ts_anchor)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFunction {
  pub ts_anchor: i64,
  pub value_anchor: f64,
  /// Price change per second
  pub slope: f64,
}

impl LinearFunction {
  /// Line through two points.
  ///
  /// Two points at the same timestamp describe a vertical line; the slope is
  /// replaced by a sentinel of `SLOPE_PCT_CAP` percent of the anchor value
  /// per second in the direction of the second point.
  pub fn through(ts_1: i64, value_1: f64, ts_2: i64, value_2: f64) -> Self {
    let slope = if ts_1 == ts_2 {
      let sign = if value_2 >= value_1 { 1.0 } else { -1.0 };
      sign * value_1.abs().max(1.0) * SLOPE_PCT_CAP / 100.0
    } else {
      (value_2 - value_1) / (ts_2 - ts_1) as f64
    };
    Self { ts_anchor: ts_1, value_anchor: value_1, slope }
  }

  /// Horizontal line at `value`
  pub fn horizontal(ts: i64, value: f64) -> Self {
    Self { ts_anchor: ts, value_anchor: value, slope: 0.0 }
  }

  /// Least squares fit over `(timestamp, value)` points.
  ///
  /// Returns `None` for fewer than two points or when all timestamps are
  /// identical.
  pub fn least_squares(points: &[(i64, f64)]) -> Option<Self> {
    if points.len() < 2 {
      return None;
    }
    let ts_anchor = points[0].0;
    let n = points.len() as f64;
    let (sum_x, sum_y) = points.iter().fold((0.0, 0.0), |(sx, sy), (ts, v)| {
      (sx + (ts - ts_anchor) as f64, sy + v)
    });
    let mean_x = sum_x / n;
    let mean_y = sum_y / n;
    let (sxx, sxy) = points.iter().fold((0.0, 0.0), |(sxx, sxy), (ts, v)| {
      let dx = (ts - ts_anchor) as f64 - mean_x;
      (sxx + dx * dx, sxy + dx * (v - mean_y))
    });
    if sxx <= f64::EPSILON {
      return None;
    }
    let slope = sxy / sxx;
    Some(Self { ts_anchor, value_anchor: mean_y - slope * mean_x, slope })
  }

  #[inline]
  pub fn value_at(&self, ts: i64) -> f64 {
    self.value_anchor + self.slope * (ts - self.ts_anchor) as f64
  }

  /// Timestamp where both lines meet, `None` for parallel lines
  pub fn intersection_ts(&self, other: &LinearFunction) -> Option<f64> {
    let slope_diff = self.slope - other.slope;
    if slope_diff.abs() <= f64::EPSILON {
      return None;
    }
    // Solve at a shared origin (self.ts_anchor)
    let other_at_anchor = other.value_at(self.ts_anchor);
    let dt = (other_at_anchor - self.value_anchor) / slope_diff;
    Some(self.ts_anchor as f64 + dt)
  }

  /// True if the lines cross strictly inside `(ts_start, ts_end)` or touch at an end
  pub fn intersects_within(&self, other: &LinearFunction, ts_start: i64, ts_end: i64) -> bool {
    let diff_start = self.value_at(ts_start) - other.value_at(ts_start);
    let diff_end = self.value_at(ts_end) - other.value_at(ts_end);
    diff_start * diff_end <= 0.0
  }

  /// Percent change of the line between `ts_first` and `ts_last` relative to `mean_price`,
  /// capped at `±SLOPE_PCT_CAP`.
  pub fn slope_pct(&self, ts_first: i64, ts_last: i64, mean_price: f64) -> f64 {
    if mean_price.abs() <= f64::EPSILON {
      return 0.0;
    }
    let change = self.value_at(ts_last) - self.value_at(ts_first);
    let pct = change / mean_price * 100.0;
    if pct.is_nan() {
      return 0.0;
    }
    pct.clamp(-SLOPE_PCT_CAP, SLOPE_PCT_CAP)
  }

  /// Same line re-anchored at `ts`
  pub fn anchored_at(&self, ts: i64) -> Self {
    Self { ts_anchor: ts, value_anchor: self.value_at(ts), slope: self.slope }
  }

  /// Line shifted vertically by `delta`
  pub fn shifted(&self, delta: f64) -> Self {
    Self { value_anchor: self.value_anchor + delta, ..*self }
  }

  /// `[ts_start, ts_end]`, `[value(ts_start), value(ts_end)]` for plotting
  pub fn get_xy_parameter(&self, ts_start: i64, ts_end: i64) -> ([i64; 2], [f64; 2]) {
    ([ts_start, ts_end], [self.value_at(ts_start), self.value_at(ts_end)])
  }
}
