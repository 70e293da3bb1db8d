//! Pattern ranges: tick spans bounded by two linear functions

use serde::{Deserialize, Serialize};

use crate::{
  categorizer::BoundaryPair, function::LinearFunction, pattern_type::PatternType, tick::WaveTick, Side,
};

/// Identity of a range across ticks: it keeps its type and first tick while it grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RangeKey {
  pub pattern_type: PatternType,
  pub begin_ts: i64,
}

/// Accepted candidate range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRange {
  pub pattern_type: PatternType,
  /// Side whose extrema anchored the detection
  pub main_side: Side,
  pub tick_first: WaveTick,
  pub tick_last: WaveTick,
  /// Last tick of the valid window; equal to the newest tick while the range is forming
  pub tick_window_end: WaveTick,
  pub f_upper: LinearFunction,
  pub f_lower: LinearFunction,
  pub h_upper: Option<LinearFunction>,
  pub h_lower: Option<LinearFunction>,
  pub upper_touches: Vec<WaveTick>,
  pub lower_touches: Vec<WaveTick>,
  pub helper_touches: Vec<WaveTick>,
  /// Highest high minus lowest low between the first and last tick
  pub height: f64,
  pub mean_close: f64,
}

impl PatternRange {
  pub fn key(&self) -> RangeKey {
    RangeKey { pattern_type: self.pattern_type, begin_ts: self.tick_first.timestamp }
  }

  /// Length in ticks (`last - first`)
  pub fn length(&self) -> usize {
    self.tick_last.position.saturating_sub(self.tick_first.position)
  }

  pub fn number_upper_touches(&self) -> usize {
    self.upper_touches.len()
  }

  pub fn number_lower_touches(&self) -> usize {
    self.lower_touches.len()
  }

  pub fn number_touches(&self) -> usize {
    self.upper_touches.len() + self.lower_touches.len() + self.helper_touches.len()
  }

  pub fn boundaries(&self) -> BoundaryPair {
    BoundaryPair { upper: self.f_upper, lower: self.f_lower }
  }

  pub fn helpers(&self) -> Option<BoundaryPair> {
    match (self.h_upper, self.h_lower) {
      (Some(upper), Some(lower)) => Some(BoundaryPair { upper, lower }),
      _ => None,
    }
  }

  /// Boundary on `side`
  pub fn boundary(&self, side: Side) -> &LinearFunction {
    match side {
      Side::Upper => &self.f_upper,
      Side::Lower => &self.f_lower,
    }
  }

  /// Distance between the boundaries at `ts`
  pub fn height_at(&self, ts: i64) -> f64 {
    self.f_upper.value_at(ts) - self.f_lower.value_at(ts)
  }

  pub fn slope_upper_pct(&self) -> f64 {
    self.f_upper.slope_pct(self.tick_first.timestamp, self.tick_last.timestamp, self.mean_close)
  }

  pub fn slope_lower_pct(&self) -> f64 {
    self.f_lower.slope_pct(self.tick_first.timestamp, self.tick_last.timestamp, self.mean_close)
  }

  pub fn contains_ts(&self, ts: i64) -> bool {
    ts >= self.tick_first.timestamp && ts <= self.tick_last.timestamp
  }

  /// True if this span lies within `other`'s span
  pub fn is_subset_of(&self, other: &PatternRange) -> bool {
    self.tick_first.timestamp >= other.tick_first.timestamp
      && self.tick_last.timestamp <= other.tick_last.timestamp
  }

  /// Timestamp of the most recent touch on `side`
  pub fn last_touch_ts(&self, side: Side) -> Option<i64> {
    let touches = match side {
      Side::Upper => &self.upper_touches,
      Side::Lower => &self.lower_touches,
    };
    touches.iter().map(|t| t.timestamp).max()
  }
}

/// Why a candidate range was not accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RangeRejection {
  NoIntermediateTouch,
  TooFewTouches { found: usize, required: usize },
  ClosedBeyondBoundary { ts: i64 },
  PeakBeyondBoundary { ts: i64 },
  BoundariesIntersect,
  NoMatchingType { slope_upper_pct: f64, slope_lower_pct: f64 },
  TypeDisabled(PatternType),
  TooLong { length: usize, max: usize },
  SlopeTooSteep { slope_pct: f64 },
  Degenerate(&'static str),
  NotHeadShoulder(&'static str),
}

impl RangeRejection {
  /// Stable label for rejection statistics
  pub fn label(&self) -> &'static str {
    match self {
      RangeRejection::NoIntermediateTouch => "no_intermediate_touch",
      RangeRejection::TooFewTouches { .. } => "too_few_touches",
      RangeRejection::ClosedBeyondBoundary { .. } => "closed_beyond_boundary",
      RangeRejection::PeakBeyondBoundary { .. } => "peak_beyond_boundary",
      RangeRejection::BoundariesIntersect => "boundaries_intersect",
      RangeRejection::NoMatchingType { .. } => "no_matching_type",
      RangeRejection::TypeDisabled(_) => "type_disabled",
      RangeRejection::TooLong { .. } => "too_long",
      RangeRejection::SlopeTooSteep { .. } => "slope_too_steep",
      RangeRejection::Degenerate(_) => "degenerate",
      RangeRejection::NotHeadShoulder(_) => "not_head_shoulder",
    }
  }
}

/// `Ok(range)` or `Err(rejection)`
pub type RangeCheck = std::result::Result<PatternRange, RangeRejection>;

/// Drop duplicates and same-type ranges contained in another one.
///
/// Output is ordered by first timestamp, then pattern type.
pub fn reduce_ranges(mut ranges: Vec<PatternRange>) -> Vec<PatternRange> {
  ranges.sort_by(|a, b| {
    a.pattern_type
      .cmp(&b.pattern_type)
      .then(a.tick_first.timestamp.cmp(&b.tick_first.timestamp))
      .then(b.tick_last.timestamp.cmp(&a.tick_last.timestamp))
      .then(b.number_touches().cmp(&a.number_touches()))
  });
  let mut kept: Vec<PatternRange> = Vec::with_capacity(ranges.len());
  for range in ranges {
    let covered = kept
      .iter()
      .any(|k| k.pattern_type == range.pattern_type && range.is_subset_of(k));
    if !covered {
      kept.push(range);
    }
  }
  kept.sort_by(|a, b| {
    a.tick_first
      .timestamp
      .cmp(&b.tick_first.timestamp)
      .then(a.pattern_type.cmp(&b.pattern_type))
  });
  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  fn flat(position: usize, price: f64) -> WaveTick {
    WaveTick {
      timestamp: position as i64 * 60,
      position,
      open: price,
      high: price,
      low: price,
      close: price,
      volume: 0.0,
    }
  }

  fn range(pattern_type: PatternType, first: usize, last: usize, touches: usize) -> PatternRange {
    PatternRange {
      pattern_type,
      main_side: Side::Upper,
      tick_first: flat(first, 10.0),
      tick_last: flat(last, 10.0),
      tick_window_end: flat(last, 10.0),
      f_upper: LinearFunction::horizontal(0, 12.0),
      f_lower: LinearFunction::horizontal(0, 8.0),
      h_upper: None,
      h_lower: None,
      upper_touches: (0..touches).map(|i| flat(first + i, 12.0)).collect(),
      lower_touches: vec![],
      helper_touches: vec![],
      height: 4.0,
      mean_close: 10.0,
    }
  }

  #[test]
  fn test_reduce_drops_subsets_of_same_type() {
    let ranges = vec![
      range(PatternType::Channel, 2, 8, 3),
      range(PatternType::Channel, 0, 10, 3),
      range(PatternType::Triangle, 2, 8, 3),
      range(PatternType::Channel, 5, 15, 3),
    ];
    let reduced = reduce_ranges(ranges);
    let spans: Vec<(PatternType, usize, usize)> = reduced
      .iter()
      .map(|r| (r.pattern_type, r.tick_first.position, r.tick_last.position))
      .collect();
    assert_eq!(
      spans,
      vec![
        (PatternType::Channel, 0, 10),
        (PatternType::Triangle, 2, 8),
        (PatternType::Channel, 5, 15),
      ]
    );
  }

  #[test]
  fn test_reduce_keeps_duplicate_with_most_touches() {
    let reduced = reduce_ranges(vec![
      range(PatternType::Channel, 0, 10, 3),
      range(PatternType::Channel, 0, 10, 4),
    ]);
    assert_eq!(reduced.len(), 1);
    assert_eq!(reduced[0].number_touches(), 4);
  }

  #[test]
  fn test_range_accessors() {
    let r = range(PatternType::Channel, 2, 8, 3);
    assert_eq!(r.length(), 6);
    assert_eq!(r.height_at(300), 4.0);
    assert_eq!(r.key(), RangeKey { pattern_type: PatternType::Channel, begin_ts: 120 });
    assert!(r.contains_ts(300));
    assert!(!r.contains_ts(600));
    assert_eq!(r.last_touch_ts(Side::Upper), Some(240));
    assert_eq!(r.last_touch_ts(Side::Lower), None);
    assert!(r.helpers().is_none());
    assert_eq!(RangeRejection::BoundariesIntersect.label(), "boundaries_intersect");
  }
}
