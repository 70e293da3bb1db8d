//! Max/min range detection (triangles, channels, TKE)
//!
//! Max pass: every local max is an anchor, every later local max within
//! `max_range_length` defines the upper boundary through both highs. The
//! lower boundary is fitted from local minima inside the valid window. The
//! min pass is the mirror image.

use tracing::debug;

use super::helpers::{is_within_tolerance, most_extreme};
use crate::{
  function::LinearFunction,
  pattern_data::PatternData,
  pattern_type::PatternType,
  range::{reduce_ranges, PatternRange, RangeCheck, RangeRejection},
  tick::WaveTick,
  Side,
};

/// A candidate that did not make it, for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedCandidate {
  pub side: Side,
  pub anchor_ts: i64,
  pub partner_ts: i64,
  pub reason: RangeRejection,
}

#[derive(Debug, Clone, Default)]
pub struct RangeDetection {
  pub ranges: Vec<PatternRange>,
  pub rejections: Vec<RejectedCandidate>,
}

impl RangeDetection {
  fn merge(&mut self, other: RangeDetection) {
    self.ranges.extend(other.ranges);
    self.rejections.extend(other.rejections);
  }
}

/// Opposite boundary chosen for a candidate
struct OppositeFit {
  function: LinearFunction,
  touches: Vec<WaveTick>,
}

pub struct PatternRangeDetector<'d, 'a> {
  data: &'d PatternData<'a>,
}

impl<'d, 'a> PatternRangeDetector<'d, 'a> {
  pub fn new(data: &'d PatternData<'a>) -> Self {
    Self { data }
  }

  /// Both passes, reduced
  pub fn detect(&self) -> RangeDetection {
    let mut detection = self.detect_max_ranges();
    detection.merge(self.detect_min_ranges());
    detection.ranges = reduce_ranges(detection.ranges);
    detection
  }

  pub fn detect_max_ranges(&self) -> RangeDetection {
    self.detect_side(Side::Upper)
  }

  pub fn detect_min_ranges(&self) -> RangeDetection {
    self.detect_side(Side::Lower)
  }

  fn detect_side(&self, side: Side) -> RangeDetection {
    let max_len = self.data.config.max_range_length.get();
    let extrema = self.data.extrema(side);
    let mut detection = RangeDetection::default();

    for (i, t0) in extrema.iter().enumerate() {
      // partners already on an evaluated line give the same line again
      let mut covered: Vec<usize> = Vec::new();
      for t1 in &extrema[i + 1..] {
        if t1.position - t0.position > max_len {
          break;
        }
        if covered.contains(&t1.position) {
          continue;
        }
        let check = self.check_candidate(side, t0, t1);
        if !matches!(check, Err(RangeRejection::NoIntermediateTouch)) {
          let f_main = line_through(side, t0, t1);
          let limit = (t0.position + max_len).min(self.data.last_position());
          covered.extend(self.touches_of(side, &f_main, t0.position, limit).iter().map(|t| t.position));
        }

        match check {
          Ok(range) => detection.ranges.push(range),
          Err(reason) => detection.rejections.push(RejectedCandidate {
            side,
            anchor_ts: t0.timestamp,
            partner_ts: t1.timestamp,
            reason,
          }),
        }
      }
    }

    debug!(
      side = ?side,
      accepted = detection.ranges.len(),
      rejected = detection.rejections.len(),
      "range pass finished"
    );
    detection
  }

  /// Local extrema on `side` touching `f` with positions in `[start, end]`
  fn touches_of(&self, side: Side, f: &LinearFunction, start: usize, end: usize) -> Vec<WaveTick> {
    let tolerance = self.data.tolerance_pct();
    self.data
      .extrema(side)
      .iter()
      .filter(|t| t.position >= start && t.position <= end)
      .filter(|t| is_within_tolerance(side.value(*t), f.value_at(t.timestamp), tolerance))
      .copied()
      .collect()
  }

  /// Last valid position of a window bounded by `f` on `side`.
  ///
  /// Walks `[start, limit]`; the first close beyond `f` by more than the
  /// breakout margin, or the first local extremum piercing `f`, ends the
  /// window. A break at or before `must_hold_until` rejects the candidate.
  fn scan_window(
    &self,
    side: Side,
    f: &LinearFunction,
    start: usize,
    must_hold_until: usize,
    limit: usize,
  ) -> Result<usize, RangeRejection> {
    let tolerance = self.data.tolerance_pct();
    let breakout_pct = self.data.config.breakout_range_pct.get();
    let mut max_high = f64::MIN;
    let mut min_low = f64::MAX;

    for tick in self.data.ticks_in(start, limit) {
      max_high = max_high.max(tick.high);
      min_low = min_low.min(tick.low);
      let height = max_high - min_low;
      let boundary = f.value_at(tick.timestamp);

      let closes_beyond = side.excess(tick.close, boundary) > breakout_pct * height;
      let value = side.value(tick);
      let pierces = self.data.is_extremum(tick.position, side)
        && side.is_beyond(value, boundary)
        && !is_within_tolerance(value, boundary, tolerance);

      if closes_beyond || pierces {
        if tick.position <= must_hold_until {
          return Err(if closes_beyond {
            RangeRejection::ClosedBeyondBoundary { ts: tick.timestamp }
          } else {
            RangeRejection::PeakBeyondBoundary { ts: tick.timestamp }
          });
        }
        return Ok(tick.position - 1);
      }
    }
    Ok(limit)
  }

  /// Best opposite boundary through two visible extrema, else a horizontal
  /// line at the most extreme opposite value (which makes the range a TKE).
  fn fit_opposite(&self, side: Side, start: usize, must_hold_until: usize, window_end: usize) -> OppositeFit {
    let candidates: Vec<&WaveTick> = self
      .data
      .visible_extrema(side)
      .iter()
      .filter(|t| t.position >= start && t.position <= window_end)
      .collect();

    let mut best: Option<(OppositeFit, (usize, usize))> = None;
    for (i, a) in candidates.iter().enumerate() {
      for b in &candidates[i + 1..] {
        let g = line_through(side, a, b);
        let Ok(end) = self.scan_window(side, &g, start, b.position.max(must_hold_until), window_end) else {
          continue;
        };
        let touches = self.touches_of(side, &g, start, end);
        let span = match (touches.first(), touches.last()) {
          (Some(f), Some(l)) => l.position - f.position,
          _ => 0,
        };
        let score = (touches.len(), span);
        if best.as_ref().map_or(true, |(_, s)| score > *s) {
          best = Some((OppositeFit { function: g, touches }, score));
        }
      }
    }
    if let Some((fit, _)) = best {
      return fit;
    }

    match most_extreme(self.data.ticks_in(start, window_end), side) {
      Some(t) => OppositeFit {
        function: LinearFunction::horizontal(t.timestamp, side.value(&t)),
        touches: vec![t],
      },
      None => OppositeFit { function: LinearFunction::horizontal(0, 0.0), touches: vec![] },
    }
  }

  /// Evaluate the range anchored at `t0` with the main boundary through `t1`
  pub fn check_candidate(&self, side: Side, t0: &WaveTick, t1: &WaveTick) -> RangeCheck {
    let data = self.data;
    let config = data.config;
    let max_len = config.max_range_length.get();
    let limit = (t0.position + max_len).min(data.last_position());

    let f_main = line_through(side, t0, t1);
    let touches = self.touches_of(side, &f_main, t0.position, limit);
    if !touches.iter().any(|t| t.position > t0.position && t.position < t1.position) {
      return Err(RangeRejection::NoIntermediateTouch);
    }

    let mut window_end = self.scan_window(side, &f_main, t0.position, t1.position, limit)?;

    let opposite = side.opposite();
    let fit = self.fit_opposite(opposite, t0.position, t1.position, window_end);
    if fit.touches.is_empty() {
      return Err(RangeRejection::Degenerate("no opposite extremum"));
    }
    let last_opposite_touch = fit.touches.last().map_or(t0.position, |t| t.position);
    window_end = self.scan_window(
      opposite,
      &fit.function,
      t0.position,
      last_opposite_touch.max(t1.position),
      window_end,
    )?;

    let main_touches: Vec<WaveTick> = touches.into_iter().filter(|t| t.position <= window_end).collect();
    let opposite_touches: Vec<WaveTick> =
      fit.touches.into_iter().filter(|t| t.position <= window_end).collect();

    let first = opposite_touches.first().map_or(t0.position, |t| t.position.min(t0.position));
    let last = main_touches
      .iter()
      .chain(opposite_touches.iter())
      .map(|t| t.position)
      .max()
      .unwrap_or(t0.position);
    if last <= first {
      return Err(RangeRejection::Degenerate("zero-length span"));
    }
    let ticks = data.ticks();
    let (tick_first, tick_last, tick_window_end) = (ticks[first], ticks[last], ticks[window_end]);

    let (f_upper, f_lower) = match side {
      Side::Upper => (f_main, fit.function),
      Side::Lower => (fit.function, f_main),
    };
    if f_upper.value_at(tick_first.timestamp) <= f_lower.value_at(tick_first.timestamp)
      || f_upper.intersects_within(&f_lower, tick_first.timestamp, tick_window_end.timestamp)
    {
      return Err(RangeRejection::BoundariesIntersect);
    }

    let height = data.height(first, last);
    if height <= 0.0 {
      return Err(RangeRejection::Degenerate("non-positive height"));
    }
    let mean_close = data.mean_close(first, last);
    let slope_upper_pct = f_upper.slope_pct(tick_first.timestamp, tick_last.timestamp, mean_close);
    let slope_lower_pct = f_lower.slope_pct(tick_first.timestamp, tick_last.timestamp, mean_close);

    let pattern_type = PatternType::classify(
      side,
      slope_upper_pct,
      slope_lower_pct,
      opposite_touches.len(),
      config.slope_thresholds,
    )
    .ok_or(RangeRejection::NoMatchingType { slope_upper_pct, slope_lower_pct })?;

    if !config.is_enabled(pattern_type) {
      return Err(RangeRejection::TypeDisabled(pattern_type));
    }
    let params = config.params_for(pattern_type);
    let type_tolerance = config.tolerance_for(pattern_type);
    let qualifying = main_touches
      .iter()
      .filter(|t| is_within_tolerance(side.value(*t), f_main.value_at(t.timestamp), type_tolerance))
      .count();
    if qualifying < params.min_touches {
      return Err(RangeRejection::TooFewTouches { found: qualifying, required: params.min_touches });
    }
    let max_type_len = config.max_range_length_for(pattern_type);
    if last - first > max_type_len {
      return Err(RangeRejection::TooLong { length: last - first, max: max_type_len });
    }
    let steepest = slope_upper_pct.abs().max(slope_lower_pct.abs());
    if steepest > params.max_abs_slope_pct {
      return Err(RangeRejection::SlopeTooSteep { slope_pct: steepest });
    }

    let (upper_touches, lower_touches) = match side {
      Side::Upper => (main_touches, opposite_touches),
      Side::Lower => (opposite_touches, main_touches),
    };
    Ok(PatternRange {
      pattern_type,
      main_side: side,
      tick_first,
      tick_last,
      tick_window_end,
      f_upper,
      f_lower,
      h_upper: None,
      h_lower: None,
      upper_touches,
      lower_touches,
      helper_touches: vec![],
      height,
      mean_close,
    })
  }
}

fn line_through(side: Side, a: &WaveTick, b: &WaveTick) -> LinearFunction {
  LinearFunction::through(a.timestamp, side.value(a), b.timestamp, side.value(b))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    config::Config,
    tick::{Candle, TickList},
    Period,
  };

  const DAY: i64 = 86_400;

  /// Converging bars: highs fall by 1 every other bar, lows rise by 1
  fn triangle_candles(n: usize) -> Vec<Candle> {
    (0..n)
      .map(|i| {
        let k = (i / 2) as f64;
        let (high, low) = if i % 2 == 0 { (100.0 - k, 99.0 - k) } else { (81.0 + k, 80.0 + k) };
        Candle::new(i as i64 * DAY, low + 0.25, high, low, high - 0.25, 1000.0)
      })
      .collect()
  }

  fn local_one_config() -> Config {
    Config { length_for_local_min_max: Period::new_const(1), ..Config::default() }
  }

  fn list_of(candles: &[Candle], config: &Config) -> TickList {
    let mut list = TickList::for_config(config);
    for c in candles {
      list.append(*c).unwrap();
    }
    list
  }

  #[test]
  fn test_symmetric_triangle() {
    let config = local_one_config();
    let list = list_of(&triangle_candles(20), &config);
    let data = PatternData::new(&list, &config);
    let detection = PatternRangeDetector::new(&data).detect();

    assert_eq!(detection.ranges.len(), 1);
    let range = &detection.ranges[0];
    assert_eq!(range.pattern_type, PatternType::Triangle);
    assert_eq!(range.tick_first.position, 0);
    assert_eq!(range.tick_last.position, 19);
    assert_eq!(range.number_upper_touches(), 10);
    assert_eq!(range.number_lower_touches(), 10);
    assert!(range.slope_upper_pct() < 0.0 && range.slope_lower_pct() > 0.0);
  }

  #[test]
  fn test_breakout_bar_ends_window() {
    let config = local_one_config();
    let mut candles = triangle_candles(20);
    candles.push(Candle::new(20 * DAY, 90.0, 95.0, 90.0, 94.0, 1000.0));
    let list = list_of(&candles, &config);
    let data = PatternData::new(&list, &config);
    let detection = PatternRangeDetector::new(&data).detect();

    let triangle = detection
      .ranges
      .iter()
      .find(|r| r.pattern_type == PatternType::Triangle && r.tick_first.position == 0)
      .unwrap();
    assert_eq!(triangle.tick_last.position, 19);
    assert_eq!(triangle.tick_window_end.position, 19);
  }

  #[test]
  fn test_max_range_length_boundary() {
    let candles = triangle_candles(20);

    let exact = Config { max_range_length: Period::new_const(19), ..local_one_config() };
    let list = list_of(&candles, &exact);
    let data = PatternData::new(&list, &exact);
    let ranges = PatternRangeDetector::new(&data).detect().ranges;
    assert!(ranges.iter().any(|r| r.tick_first.position == 0 && r.tick_last.position == 19));

    let shorter = Config { max_range_length: Period::new_const(18), ..local_one_config() };
    let list = list_of(&candles, &shorter);
    let data = PatternData::new(&list, &shorter);
    let ranges = PatternRangeDetector::new(&data).detect().ranges;
    assert!(!ranges.is_empty());
    assert!(ranges.iter().all(|r| r.length() <= 18));
    assert!(!ranges.iter().any(|r| r.tick_first.position == 0 && r.tick_last.position == 19));
  }

  #[test]
  fn test_candidate_without_intermediate_touch() {
    let config = local_one_config();
    let list = list_of(&triangle_candles(8), &config);
    let data = PatternData::new(&list, &config);
    let detector = PatternRangeDetector::new(&data);
    let t0 = data.ticks()[0];
    let t2 = data.ticks()[2];
    assert_eq!(detector.check_candidate(Side::Upper, &t0, &t2), Err(RangeRejection::NoIntermediateTouch));
  }

  #[test]
  fn test_disabled_type_is_rejected() {
    let config = Config { pattern_types: vec![PatternType::Channel], ..local_one_config() };
    let list = list_of(&triangle_candles(20), &config);
    let data = PatternData::new(&list, &config);
    let detection = PatternRangeDetector::new(&data).detect();
    assert!(detection.ranges.is_empty());
    assert!(detection
      .rejections
      .iter()
      .any(|r| r.reason == RangeRejection::TypeDisabled(PatternType::Triangle)));
  }

  #[test]
  fn test_too_few_ticks_gives_nothing() {
    let config = local_one_config();
    let list = list_of(&triangle_candles(3), &config);
    let data = PatternData::new(&list, &config);
    assert!(PatternRangeDetector::new(&data).detect().ranges.is_empty());
  }
}
