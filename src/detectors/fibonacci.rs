//! Fibonacci wave tree: 5-wave impulses and ABC corrections
//!
//! Impulses are enumerated depth first over the local extrema:
//!
//! | wave | from   | to     | rule                                                  |
//! |------|--------|--------|-------------------------------------------------------|
//! | 1    | trough | peak   | clean leg                                             |
//! | 2    | peak   | trough | Fibonacci retracement of 1, no undercut of 1's start  |
//! | 3    | trough | peak   | beyond 1's end, at least as long as 1                 |
//! | 4    | peak   | trough | Fibonacci retracement of 3, no overlap with 1         |
//! | 5    | trough | peak   | beyond 3's end, wave 3 not the shortest of 1, 3, 5    |
//!
//! followed by the neckline and closing-triangle post filters. Descending
//! impulses are the mirror image. Corrections (A, B, C) are searched after
//! the end of every impulse.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::helpers::{is_clean_leg, is_within_tolerance, matching_fibonacci_ratio};
use crate::{
  function::LinearFunction,
  pattern_data::PatternData,
  pattern_type::PatternType,
  range::{PatternRange, RangeRejection},
  tick::WaveTick,
  Direction, Side,
};

// ============================================================
// WAVES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveKind {
  Impulse,
  Correction,
}

/// One leg of a wave
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveComponent {
  /// 1-based position in the wave
  pub index: usize,
  pub direction: Direction,
  pub tick_start: WaveTick,
  pub tick_end: WaveTick,
  pub value_start: f64,
  pub value_end: f64,
  pub range: f64,
  /// Ratio to the preceding leg for counter-trend legs
  pub retracement_pct: Option<f64>,
  /// Ratio to the previous leg in the same direction for trend legs
  pub regression_pct: Option<f64>,
}

impl WaveComponent {
  fn new(index: usize, direction: Direction, start: &WaveTick, end: &WaveTick) -> Self {
    let (value_start, value_end) = match direction {
      Direction::Descending => (start.high, end.low),
      _ => (start.low, end.high),
    };
    Self {
      index,
      direction,
      tick_start: *start,
      tick_end: *end,
      value_start,
      value_end,
      range: (value_end - value_start).abs(),
      retracement_pct: None,
      regression_pct: None,
    }
  }

  pub fn get_retracement_pct(&self) -> Option<f64> {
    self.retracement_pct
  }

  pub fn get_regression_pct(&self) -> Option<f64> {
    self.regression_pct
  }

  /// `[ts_start, ts_end]`, `[value_start, value_end]` for plotting
  pub fn get_xy_parameter(&self) -> ([i64; 2], [f64; 2]) {
    ([self.tick_start.timestamp, self.tick_end.timestamp], [self.value_start, self.value_end])
  }

  /// Length in ticks
  pub fn length(&self) -> usize {
    self.tick_end.position.saturating_sub(self.tick_start.position)
  }
}

/// Identity of a wave independent of window positions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaveKey {
  pub start_ts: i64,
  pub end_timestamps: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibonacciWave {
  pub kind: WaveKind,
  /// Direction of the wave as a whole (direction of its first leg)
  pub direction: Direction,
  pub components: Vec<WaveComponent>,
}

impl FibonacciWave {
  fn from_pivots(kind: WaveKind, direction: Direction, pivots: &[WaveTick]) -> Self {
    let mut components: Vec<WaveComponent> = pivots
      .windows(2)
      .enumerate()
      .map(|(i, w)| {
        let leg_direction = if i % 2 == 0 { direction } else { direction.opposite() };
        WaveComponent::new(i + 1, leg_direction, &w[0], &w[1])
      })
      .collect();
    for i in 1..components.len() {
      let ratio = |prev: f64, cur: f64| if prev > 0.0 { Some(cur / prev) } else { None };
      if i % 2 == 1 {
        components[i].retracement_pct = ratio(components[i - 1].range, components[i].range);
      } else {
        components[i].regression_pct = ratio(components[i - 2].range, components[i].range);
      }
    }
    Self { kind, direction, components }
  }

  pub fn tick_start(&self) -> Option<&WaveTick> {
    self.components.first().map(|c| &c.tick_start)
  }

  pub fn tick_end(&self) -> Option<&WaveTick> {
    self.components.last().map(|c| &c.tick_end)
  }

  /// 1-based component lookup
  pub fn component(&self, index: usize) -> Option<&WaveComponent> {
    index.checked_sub(1).and_then(|i| self.components.get(i))
  }

  pub fn key(&self) -> WaveKey {
    WaveKey {
      start_ts: self.tick_start().map_or(0, |t| t.timestamp),
      end_timestamps: self.components.iter().map(|c| c.tick_end.timestamp).collect(),
    }
  }

  /// Line through the ends of waves 2 and 4 (impulses only)
  pub fn neckline(&self) -> Option<LinearFunction> {
    if self.kind != WaveKind::Impulse {
      return None;
    }
    let (w2, w4) = (self.component(2)?, self.component(4)?);
    Some(LinearFunction::through(w2.tick_end.timestamp, w2.value_end, w4.tick_end.timestamp, w4.value_end))
  }

  /// The last leg end is confirmed by `local_length` later ticks
  pub fn is_finished(&self, last_position: usize, local_length: usize) -> bool {
    self.tick_end().is_some_and(|t| t.position + local_length <= last_position)
  }

  pub fn pattern_type(&self) -> PatternType {
    match self.direction {
      Direction::Descending => PatternType::FibonacciDesc,
      _ => PatternType::FibonacciAsc,
    }
  }
}

// ============================================================
// WAVE TREE
// ============================================================

/// All valid impulses and corrections of the current window
#[derive(Debug, Clone, Default)]
pub struct FibonacciWaveTree {
  impulses: Vec<FibonacciWave>,
  corrections: Vec<FibonacciWave>,
  ranges: Vec<PatternRange>,
  rejections: Vec<RangeRejection>,
  last_position: usize,
  local_length: usize,
}

impl FibonacciWaveTree {
  pub fn build(data: &PatternData) -> Self {
    let search = WaveSearch { data, tolerance: data.config.fibonacci_tolerance_pct.get() };

    let mut impulses = search.impulses(Direction::Ascending);
    impulses.extend(search.impulses(Direction::Descending));

    let mut seen = HashSet::new();
    let mut corrections = Vec::new();
    for impulse in &impulses {
      for correction in search.corrections(impulse) {
        if seen.insert(correction.key()) {
          corrections.push(correction);
        }
      }
    }

    let mut ranges = Vec::new();
    let mut rejections = Vec::new();
    for impulse in &impulses {
      match search.range_of(impulse) {
        Ok(range) => ranges.push(range),
        Err(reason) => rejections.push(reason),
      }
    }

    debug!(
      impulses = impulses.len(),
      corrections = corrections.len(),
      ranges = ranges.len(),
      "fibonacci wave tree built"
    );
    Self {
      impulses,
      corrections,
      ranges,
      rejections,
      last_position: data.last_position(),
      local_length: data.config.length_for_local_min_max.get(),
    }
  }

  pub fn impulse_waves(&self) -> &[FibonacciWave] {
    &self.impulses
  }

  pub fn correction_waves(&self) -> &[FibonacciWave] {
    &self.corrections
  }

  pub fn waves(&self) -> impl Iterator<Item = &FibonacciWave> + '_ {
    self.impulses.iter().chain(self.corrections.iter())
  }

  pub fn finished_waves(&self) -> impl Iterator<Item = &FibonacciWave> + '_ {
    self.waves().filter(|w| w.is_finished(self.last_position, self.local_length))
  }

  pub fn was_any_wave_finished_since(&self, ts: i64) -> bool {
    self.finished_waves().any(|w| w.tick_end().is_some_and(|t| t.timestamp >= ts))
  }

  /// One range per impulse, spanning wave 1 start to wave 5 end
  pub fn fibonacci_ranges(&self) -> &[PatternRange] {
    &self.ranges
  }

  pub fn rejections(&self) -> &[RangeRejection] {
    &self.rejections
  }
}

struct WaveSearch<'d, 'a> {
  data: &'d PatternData<'a>,
  tolerance: f64,
}

impl WaveSearch<'_, '_> {
  fn leg_ok(&self, start: &WaveTick, end: &WaveTick, end_side: Side) -> bool {
    is_clean_leg(self.data.ticks_between(start.position, end.position), start, end, end_side)
  }

  fn is_fib_retracement(&self, previous: &WaveComponent, current: &WaveComponent) -> bool {
    previous.range > 0.0 && matching_fibonacci_ratio(current.range / previous.range, self.tolerance).is_some()
  }

  /// Later extrema on `side` after `after`, within `max_end` and before `before`
  fn later<'s>(
    &'s self,
    side: Side,
    after: usize,
    before: usize,
    max_end: usize,
  ) -> impl Iterator<Item = &'s WaveTick> + 's {
    self.data
      .extrema(side)
      .iter()
      .filter(move |t| t.position > after && t.position < before && t.position <= max_end)
  }

  fn impulses(&self, direction: Direction) -> Vec<FibonacciWave> {
    let peak = if direction.is_descending() { Side::Lower } else { Side::Upper };
    let trough = peak.opposite();
    let max_len = self.data.config.max_range_length.get();
    let end = self.data.last_position() + 1;
    let mut waves = Vec::new();

    for a in self.data.extrema(trough) {
      let horizon = a.position + max_len;
      for b in self.later(peak, a.position, end, horizon) {
        if !self.leg_ok(a, b, peak) {
          continue;
        }
        let w1 = WaveComponent::new(1, direction, a, b);
        if w1.range <= 0.0 {
          continue;
        }
        let limit_2 = self.data.next_dominating_position(b.position, peak).unwrap_or(end);
        for c in self.later(trough, b.position, limit_2, horizon) {
          if trough.is_beyond(trough.value(c), trough.value(a)) || !self.leg_ok(b, c, trough) {
            continue;
          }
          let w2 = WaveComponent::new(2, direction.opposite(), b, c);
          if !self.is_fib_retracement(&w1, &w2) {
            continue;
          }
          for d in self.later(peak, c.position, end, horizon) {
            if !peak.is_beyond(peak.value(d), peak.value(b)) || !self.leg_ok(c, d, peak) {
              continue;
            }
            let w3 = WaveComponent::new(3, direction, c, d);
            if w3.range < w1.range {
              continue;
            }
            let limit_4 = self.data.next_dominating_position(d.position, peak).unwrap_or(end);
            for e in self.later(trough, d.position, limit_4, horizon) {
              // wave 4 must not reach into wave 1
              if !peak.is_beyond(trough.value(e), peak.value(b)) || !self.leg_ok(d, e, trough) {
                continue;
              }
              let w4 = WaveComponent::new(4, direction.opposite(), d, e);
              if !self.is_fib_retracement(&w3, &w4) {
                continue;
              }
              for f in self.later(peak, e.position, end, horizon) {
                if !peak.is_beyond(peak.value(f), peak.value(d)) || !self.leg_ok(e, f, peak) {
                  continue;
                }
                let w5 = WaveComponent::new(5, direction, e, f);
                if w3.range < w1.range.min(w5.range) {
                  continue;
                }
                let pivots = [*a, *b, *c, *d, *e, *f];
                if self.passes_post_filters(&pivots, peak, &w3, &w5) {
                  waves.push(FibonacciWave::from_pivots(WaveKind::Impulse, direction, &pivots));
                }
              }
            }
          }
        }
      }
    }
    waves
  }

  /// Neckline not crossed between waves 2 and 4; closing triangle still open at wave 5's end
  fn passes_post_filters(&self, pivots: &[WaveTick; 6], peak: Side, w3: &WaveComponent, w5: &WaveComponent) -> bool {
    let trough = peak.opposite();
    let [_, _, c, d, e, f] = pivots;
    let neckline = LinearFunction::through(c.timestamp, trough.value(c), e.timestamp, trough.value(e));
    let tolerance = self.data.tolerance_pct();

    let crossed = self.data.ticks_between(c.position, e.position).iter().any(|t| {
      let (value, neck) = (trough.value(t), neckline.value_at(t.timestamp));
      trough.is_beyond(value, neck) && !is_within_tolerance(value, neck, tolerance)
    });
    if crossed {
      return false;
    }

    if w5.range < w3.range {
      let top_line = LinearFunction::through(d.timestamp, peak.value(d), f.timestamp, peak.value(f));
      if top_line.intersects_within(&neckline, d.timestamp, f.timestamp) {
        return false;
      }
    }
    true
  }

  fn corrections(&self, impulse: &FibonacciWave) -> Vec<FibonacciWave> {
    let Some(start) = impulse.tick_end().copied() else {
      return vec![];
    };
    let direction = impulse.direction.opposite();
    // the correction's first leg runs from a peak of the impulse to a trough
    let peak = if impulse.direction.is_descending() { Side::Lower } else { Side::Upper };
    let trough = peak.opposite();
    let max_len = self.data.config.max_range_length.get();
    let end = self.data.last_position() + 1;
    let horizon = start.position + max_len;
    let mut waves = Vec::new();

    for x in self.later(trough, start.position, end, horizon) {
      if !self.leg_ok(&start, x, trough) {
        continue;
      }
      let wave_a = WaveComponent::new(1, direction, &start, x);
      if wave_a.range <= 0.0 {
        continue;
      }
      let limit_b = self.data.next_dominating_position(x.position, trough).unwrap_or(end);
      for y in self.later(peak, x.position, limit_b, horizon) {
        if peak.is_beyond(peak.value(y), peak.value(&start)) || !self.leg_ok(x, y, peak) {
          continue;
        }
        let wave_b = WaveComponent::new(2, direction.opposite(), x, y);
        if !self.is_fib_retracement(&wave_a, &wave_b) {
          continue;
        }
        for z in self.later(trough, y.position, end, horizon) {
          if !trough.is_beyond(trough.value(z), trough.value(x)) || !self.leg_ok(y, z, trough) {
            continue;
          }
          let pivots = [start, *x, *y, *z];
          waves.push(FibonacciWave::from_pivots(WaveKind::Correction, direction, &pivots));
        }
      }
    }
    waves
  }

  /// Range of an impulse: the line through the ends of waves 3 and 5 and the neckline
  fn range_of(&self, impulse: &FibonacciWave) -> Result<PatternRange, RangeRejection> {
    let data = self.data;
    let config = data.config;
    let pattern_type = impulse.pattern_type();
    if !config.is_enabled(pattern_type) {
      return Err(RangeRejection::TypeDisabled(pattern_type));
    }
    let (Some(w1), Some(w3), Some(w5), Some(neckline)) =
      (impulse.component(1), impulse.component(3), impulse.component(5), impulse.neckline())
    else {
      return Err(RangeRejection::Degenerate("incomplete impulse"));
    };
    let peak = if impulse.direction.is_descending() { Side::Lower } else { Side::Upper };
    let (first, last) = (w1.tick_start, w5.tick_end);
    let length = last.position - first.position;
    let max_len = config.max_range_length_for(pattern_type);
    if length > max_len {
      return Err(RangeRejection::TooLong { length, max: max_len });
    }

    let top_line =
      LinearFunction::through(w3.tick_end.timestamp, w3.value_end, w5.tick_end.timestamp, w5.value_end);
    let (f_upper, f_lower) = match peak {
      Side::Upper => (top_line, neckline),
      Side::Lower => (neckline, top_line),
    };
    if f_upper.value_at(last.timestamp) <= f_lower.value_at(last.timestamp) {
      return Err(RangeRejection::BoundariesIntersect);
    }

    let height = data.height(first.position, last.position);
    if height <= 0.0 {
      return Err(RangeRejection::Degenerate("non-positive height"));
    }

    let tolerance = data.tolerance_pct();
    let pivots: Vec<WaveTick> = std::iter::once(w1.tick_start)
      .chain(impulse.components.iter().map(|c| c.tick_end))
      .collect();
    let touching = |side: Side, f: &LinearFunction| -> Vec<WaveTick> {
      pivots
        .iter()
        .filter(|t| data.is_extremum(t.position, side))
        .filter(|t| is_within_tolerance(side.value(*t), f.value_at(t.timestamp), tolerance))
        .copied()
        .collect()
    };
    let upper_touches = touching(Side::Upper, &f_upper);
    let lower_touches = touching(Side::Lower, &f_lower);

    let breakout_pct = config.breakout_range_pct.get();
    let limit = (first.position + max_len).min(data.last_position());
    let window_end = data
      .ticks_in(last.position + 1, limit)
      .iter()
      .find(|t| {
        Side::Upper.excess(t.close, f_upper.value_at(t.timestamp)) > breakout_pct * height
          || Side::Lower.excess(t.close, f_lower.value_at(t.timestamp)) > breakout_pct * height
      })
      .map_or(limit.max(last.position), |t| t.position - 1);

    Ok(PatternRange {
      pattern_type,
      main_side: peak,
      tick_first: first,
      tick_last: last,
      tick_window_end: data.ticks()[window_end],
      f_upper,
      f_lower,
      h_upper: None,
      h_lower: None,
      upper_touches,
      lower_touches,
      helper_touches: vec![],
      height,
      mean_close: data.mean_close(first.position, last.position),
    })
  }
}
