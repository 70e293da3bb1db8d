//! Per-tick snapshot of extrema lists used by the detectors

use crate::{
  categorizer::{BoundaryPair, ValueCategorizer},
  config::Config,
  detectors::helpers,
  tick::{TickList, WaveTick},
  Side,
};

/// Extrema views and tolerances over the current tick window.
///
/// Built once per tick and shared read-only by every detector of that tick.
#[derive(Debug, Clone)]
pub struct PatternData<'a> {
  pub config: &'a Config,
  tick_list: &'a TickList,
  ticks: Vec<WaveTick>,
  max_ticks: Vec<WaveTick>,
  min_ticks: Vec<WaveTick>,
  max_ticks_visible: Vec<WaveTick>,
  min_ticks_visible: Vec<WaveTick>,
  global_max_ticks: Vec<WaveTick>,
  global_min_ticks: Vec<WaveTick>,
}

impl<'a> PatternData<'a> {
  pub fn new(tick_list: &'a TickList, config: &'a Config) -> Self {
    let max_ticks = tick_list.max_ticks();
    let min_ticks = tick_list.min_ticks();
    let max_ticks_visible = TickList::without_hidden_ticks(&max_ticks, Side::Upper, config.hide_pct);
    let min_ticks_visible = TickList::without_hidden_ticks(&min_ticks, Side::Lower, config.hide_pct);
    Self {
      config,
      tick_list,
      ticks: tick_list.iter().copied().collect(),
      max_ticks,
      min_ticks,
      max_ticks_visible,
      min_ticks_visible,
      global_max_ticks: tick_list.global_max_ticks(),
      global_min_ticks: tick_list.global_min_ticks(),
    }
  }

  pub fn tick_list(&self) -> &TickList {
    self.tick_list
  }

  pub fn ticks(&self) -> &[WaveTick] {
    &self.ticks
  }

  pub fn last_tick(&self) -> Option<&WaveTick> {
    self.ticks.last()
  }

  pub fn last_position(&self) -> usize {
    self.ticks.len().saturating_sub(1)
  }

  /// Local maxima (upper) or minima (lower)
  pub fn extrema(&self, side: Side) -> &[WaveTick] {
    match side {
      Side::Upper => &self.max_ticks,
      Side::Lower => &self.min_ticks,
    }
  }

  /// Local extrema without hidden ticks
  pub fn visible_extrema(&self, side: Side) -> &[WaveTick] {
    match side {
      Side::Upper => &self.max_ticks_visible,
      Side::Lower => &self.min_ticks_visible,
    }
  }

  pub fn global_extrema(&self, side: Side) -> &[WaveTick] {
    match side {
      Side::Upper => &self.global_max_ticks,
      Side::Lower => &self.global_min_ticks,
    }
  }

  #[inline]
  pub fn is_extremum(&self, position: usize, side: Side) -> bool {
    self.tick_list.is_extremum(position, side)
  }

  pub fn tolerance_pct(&self) -> f64 {
    self.config.tolerance_pct
  }

  pub fn tolerance_pct_equal(&self) -> f64 {
    self.config.tolerance_pct_equal
  }

  /// Ticks with positions in `[start, end]`, clamped to the window
  pub fn ticks_in(&self, start: usize, end: usize) -> &[WaveTick] {
    if self.ticks.is_empty() || start > end {
      return &[];
    }
    let end = end.min(self.ticks.len() - 1);
    if start > end {
      return &[];
    }
    &self.ticks[start..=end]
  }

  /// Ticks strictly between two positions
  pub fn ticks_between(&self, start: usize, end: usize) -> &[WaveTick] {
    if end <= start + 1 {
      return &[];
    }
    self.ticks_in(start + 1, end - 1)
  }

  pub fn height(&self, start: usize, end: usize) -> f64 {
    helpers::span_height(self.ticks_in(start, end))
  }

  pub fn mean_close(&self, start: usize, end: usize) -> f64 {
    helpers::mean_close(self.ticks_in(start, end))
  }

  /// Position of the first later tick beating `position` on `side`
  pub fn next_dominating_position(&self, position: usize, side: Side) -> Option<usize> {
    self.tick_list.next_dominating_position(position, side)
  }

  /// Categorizer over `[start, end]` with the configured tolerances
  pub fn categorizer(
    &self,
    start: usize,
    end: usize,
    bounds: BoundaryPair,
    helper: Option<BoundaryPair>,
  ) -> ValueCategorizer {
    ValueCategorizer::new(
      self.ticks_in(start, end),
      bounds,
      helper,
      self.tolerance_pct(),
      self.tolerance_pct_equal(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tick::Candle;

  #[test]
  fn test_extrema_views() {
    let config = Config::default();
    let mut list = TickList::new(86_400, 100, 2, 5);
    let path = [100.0, 101.0, 102.0, 103.0, 102.0, 101.0, 100.0, 101.0, 102.0, 103.1];
    for (i, p) in path.iter().enumerate() {
      list.append(Candle::flat(i as i64 * 86_400, *p)).unwrap();
    }
    let data = PatternData::new(&list, &config);
    let maxima: Vec<usize> = data.extrema(Side::Upper).iter().map(|t| t.position).collect();
    assert_eq!(maxima, vec![3, 9]);
    let minima: Vec<usize> = data.extrema(Side::Lower).iter().map(|t| t.position).collect();
    assert_eq!(minima, vec![0, 6]);
    // 103 is hidden behind 103.1 with the default hide distance of 0.1%
    let visible: Vec<usize> = data.visible_extrema(Side::Upper).iter().map(|t| t.position).collect();
    assert_eq!(visible, vec![9]);
    assert!((data.height(0, 9) - 3.1).abs() < 1e-9);
    assert_eq!(data.ticks_between(3, 6).len(), 2);
    assert!(data.ticks_in(8, 20).len() == 2);
    assert_eq!(data.next_dominating_position(3, Side::Upper), Some(9));
  }
}
