//! Candles, wave ticks and the windowed tick list
//!
//! The tick list keeps, for every tick, the distance to the nearest tick that
//! dominates it on each side (higher high / lower low, before and after).
//! Local and global extrema are read from those distances.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{config::Config, config::TimePeriod, CoreError, OHLCVExt, Result, Side, OHLCV};

// ============================================================
// CANDLE
// ============================================================

/// One OHLCV bar as delivered by the data provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
  pub timestamp: i64,
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
  pub volume: f64,
}

impl Candle {
  pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
    Self { timestamp, open, high, low, close, volume }
  }

  /// Bar with open = high = low = close
  pub fn flat(timestamp: i64, price: f64) -> Self {
    Self::new(timestamp, price, price, price, price, 0.0)
  }
}

impl OHLCV for Candle {
  fn open(&self) -> f64 {
    self.open
  }

  fn high(&self) -> f64 {
    self.high
  }

  fn low(&self) -> f64 {
    self.low
  }

  fn close(&self) -> f64 {
    self.close
  }

  fn volume(&self) -> f64 {
    self.volume
  }

  fn timestamp(&self) -> Option<i64> {
    Some(self.timestamp)
  }
}

/// Full provider input including instrument and period metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleInput {
  pub symbol: String,
  pub timestamp: i64,
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
  pub volume: f64,
  pub period: TimePeriod,
  pub period_aggregation: u32,
}

impl CandleInput {
  pub fn candle(&self) -> Candle {
    Candle::new(self.timestamp, self.open, self.high, self.low, self.close, self.volume)
  }
}

// ============================================================
// WAVE TICK
// ============================================================

/// A candle placed in the tick window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveTick {
  pub timestamp: i64,
  /// 0-based index in the current window
  pub position: usize,
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
  pub volume: f64,
}

impl WaveTick {
  pub fn from_candle(candle: &Candle, position: usize) -> Self {
    Self {
      timestamp: candle.timestamp,
      position,
      open: candle.open,
      high: candle.high,
      low: candle.low,
      close: candle.close,
      volume: candle.volume,
    }
  }

  /// Last traded price of the bar
  #[inline]
  pub fn last(&self) -> f64 {
    self.close
  }
}

impl OHLCV for WaveTick {
  fn open(&self) -> f64 {
    self.open
  }

  fn high(&self) -> f64 {
    self.high
  }

  fn low(&self) -> f64 {
    self.low
  }

  fn close(&self) -> f64 {
    self.close
  }

  fn volume(&self) -> f64 {
    self.volume
  }

  fn timestamp(&self) -> Option<i64> {
    Some(self.timestamp)
  }
}

// ============================================================
// EXTREMUM DISTANCES
// ============================================================

/// Tick distances to the nearest dominating neighbor; `None` is unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtremumDistances {
  pub ticks_to_higher_high_before: Option<usize>,
  pub ticks_to_higher_high_after: Option<usize>,
  pub ticks_to_lower_low_before: Option<usize>,
  pub ticks_to_lower_low_after: Option<usize>,
}

impl ExtremumDistances {
  #[inline]
  fn exceeds(distance: Option<usize>, length: usize) -> bool {
    distance.map_or(true, |d| d > length)
  }

  pub fn is_max(&self, length: usize) -> bool {
    Self::exceeds(self.ticks_to_higher_high_before, length)
      && Self::exceeds(self.ticks_to_higher_high_after, length)
  }

  pub fn is_min(&self, length: usize) -> bool {
    Self::exceeds(self.ticks_to_lower_low_before, length)
      && Self::exceeds(self.ticks_to_lower_low_after, length)
  }

  pub fn after(&self, side: Side) -> Option<usize> {
    match side {
      Side::Upper => self.ticks_to_higher_high_after,
      Side::Lower => self.ticks_to_lower_low_after,
    }
  }
}

/// True if `neighbor` dominates `tick` on `side`.
///
/// A strictly more extreme value dominates. On equal values the neighbor
/// dominates only with a more extreme companion value (a lower low for
/// highs); fully identical bars are resolved in favor of the earlier one.
pub fn dominates(neighbor: &WaveTick, tick: &WaveTick, side: Side, neighbor_is_earlier: bool) -> bool {
  let (value, other) = (side.value(neighbor), side.value(tick));
  if value != other {
    return side.is_beyond(value, other);
  }
  let companion = side.opposite();
  let (c_value, c_other) = (companion.value(neighbor), companion.value(tick));
  if c_value != c_other {
    return companion.is_beyond(c_value, c_other);
  }
  neighbor_is_earlier
}

// ============================================================
// TICK LIST
// ============================================================

/// Ordered window of ticks with constant stride
#[derive(Debug, Clone, PartialEq)]
pub struct TickList {
  ticks: VecDeque<WaveTick>,
  distances: VecDeque<ExtremumDistances>,
  stride: i64,
  capacity: usize,
  local_length: usize,
  global_length: usize,
}

impl TickList {
  pub fn new(stride: i64, capacity: usize, local_length: usize, global_length: usize) -> Self {
    Self {
      ticks: VecDeque::with_capacity(capacity.min(4096)),
      distances: VecDeque::with_capacity(capacity.min(4096)),
      stride,
      capacity: capacity.max(1),
      local_length,
      global_length,
    }
  }

  pub fn for_config(config: &Config) -> Self {
    Self::new(
      config.stride_seconds(),
      config.tick_window_capacity(),
      config.length_for_local_min_max.get(),
      config.length_for_global_min_max.get(),
    )
  }

  /// Append the next candle.
  ///
  /// Rejects invalid bars, duplicates, older timestamps and stride gaps
  /// without touching the list.
  pub fn append(&mut self, candle: Candle) -> Result<WaveTick> {
    candle.validate()?;
    if let Some(last) = self.ticks.back() {
      if candle.timestamp == last.timestamp {
        return Err(CoreError::Duplicate { timestamp: candle.timestamp });
      }
      if candle.timestamp < last.timestamp {
        return Err(CoreError::OutOfOrder {
          timestamp: candle.timestamp,
          last_timestamp: last.timestamp,
        });
      }
      let gap = candle.timestamp - last.timestamp;
      if gap != self.stride {
        return Err(CoreError::StrideMismatch { expected: self.stride, got: gap });
      }
    }

    if self.ticks.len() == self.capacity {
      self.slide();
    }

    let position = self.ticks.len();
    let tick = WaveTick::from_candle(&candle, position);

    let mut distances = ExtremumDistances::default();
    distances.ticks_to_higher_high_before = self.distance_before(&tick, Side::Upper);
    distances.ticks_to_lower_low_before = self.distance_before(&tick, Side::Lower);

    // Only ticks not yet dominated on their right can change
    for (j, (prev, dist)) in self.ticks.iter().zip(self.distances.iter_mut()).enumerate() {
      if dist.ticks_to_higher_high_after.is_none() && dominates(&tick, prev, Side::Upper, false) {
        dist.ticks_to_higher_high_after = Some(position - j);
      }
      if dist.ticks_to_lower_low_after.is_none() && dominates(&tick, prev, Side::Lower, false) {
        dist.ticks_to_lower_low_after = Some(position - j);
      }
    }

    self.ticks.push_back(tick);
    self.distances.push_back(distances);
    Ok(tick)
  }

  fn distance_before(&self, tick: &WaveTick, side: Side) -> Option<usize> {
    self.ticks
      .iter()
      .rev()
      .position(|prev| dominates(prev, tick, side, true))
      .map(|steps| steps + 1)
  }

  fn slide(&mut self) {
    if self.ticks.pop_front().is_none() {
      return;
    }
    self.distances.pop_front();

    for (i, tick) in self.ticks.iter_mut().enumerate() {
      tick.position = i;
    }
    // Distances pointing at the dropped tick become unbounded
    for (i, dist) in self.distances.iter_mut().enumerate() {
      if dist.ticks_to_higher_high_before.is_some_and(|d| d > i) {
        dist.ticks_to_higher_high_before = None;
      }
      if dist.ticks_to_lower_low_before.is_some_and(|d| d > i) {
        dist.ticks_to_lower_low_before = None;
      }
    }
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.ticks.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.ticks.is_empty()
  }

  pub fn stride(&self) -> i64 {
    self.stride
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn local_length(&self) -> usize {
    self.local_length
  }

  pub fn first(&self) -> Option<&WaveTick> {
    self.ticks.front()
  }

  pub fn last(&self) -> Option<&WaveTick> {
    self.ticks.back()
  }

  pub fn iter(&self) -> impl DoubleEndedIterator<Item = &WaveTick> + ExactSizeIterator + '_ {
    self.ticks.iter()
  }

  pub fn get_tick_by_position(&self, position: usize) -> Option<&WaveTick> {
    self.ticks.get(position)
  }

  /// Exact lookup, else the nearest later tick.
  ///
  /// The stride is constant and gaps are rejected, so the position follows
  /// from the timestamp directly.
  pub fn get_tick_by_timestamp(&self, timestamp: i64) -> Option<&WaveTick> {
    let first = self.ticks.front()?;
    let stride = self.stride.max(1);
    let offset = timestamp.saturating_sub(first.timestamp).max(0);
    let position = offset / stride + i64::from(offset % stride != 0);
    self.ticks.get(usize::try_from(position).ok()?)
  }

  pub fn distances(&self, position: usize) -> Option<&ExtremumDistances> {
    self.distances.get(position)
  }

  pub fn is_local_max(&self, position: usize) -> bool {
    self.distances.get(position).is_some_and(|d| d.is_max(self.local_length))
  }

  pub fn is_local_min(&self, position: usize) -> bool {
    self.distances.get(position).is_some_and(|d| d.is_min(self.local_length))
  }

  pub fn is_global_max(&self, position: usize) -> bool {
    self.distances.get(position).is_some_and(|d| d.is_max(self.global_length))
  }

  pub fn is_global_min(&self, position: usize) -> bool {
    self.distances.get(position).is_some_and(|d| d.is_min(self.global_length))
  }

  pub fn is_extremum(&self, position: usize, side: Side) -> bool {
    match side {
      Side::Upper => self.is_local_max(position),
      Side::Lower => self.is_local_min(position),
    }
  }

  fn filtered(&self, pred: impl Fn(usize) -> bool) -> Vec<WaveTick> {
    self.ticks.iter().filter(|t| pred(t.position)).copied().collect()
  }

  pub fn max_ticks(&self) -> Vec<WaveTick> {
    self.filtered(|p| self.is_local_max(p))
  }

  pub fn min_ticks(&self) -> Vec<WaveTick> {
    self.filtered(|p| self.is_local_min(p))
  }

  pub fn global_max_ticks(&self) -> Vec<WaveTick> {
    self.filtered(|p| self.is_global_max(p))
  }

  pub fn global_min_ticks(&self) -> Vec<WaveTick> {
    self.filtered(|p| self.is_global_min(p))
  }

  /// Ticks flagged as local max or local min
  pub fn min_max_view(&self) -> Vec<WaveTick> {
    self.filtered(|p| self.is_local_max(p) || self.is_local_min(p))
  }

  /// Position of the first later tick dominating `position` on `side`
  pub fn next_dominating_position(&self, position: usize, side: Side) -> Option<usize> {
    self.distances.get(position)?.after(side).map(|d| position + d)
  }

  /// Mean close of the last `period` ticks
  pub fn sma(&self, period: usize) -> Option<f64> {
    if period == 0 || self.ticks.len() < period {
      return None;
    }
    let sum: f64 = self.ticks.iter().rev().take(period).map(|t| t.close).sum();
    Some(sum / period as f64)
  }

  /// Drop extrema whose value lies within `hide_pct` of a more extreme
  /// neighbor in the same extremum list.
  pub fn without_hidden_ticks(extrema: &[WaveTick], side: Side, hide_pct: f64) -> Vec<WaveTick> {
    let hidden_by = |tick: &WaveTick, neighbor: Option<&WaveTick>| {
      neighbor.is_some_and(|n| {
        let (v, nv) = (side.value(tick), side.value(n));
        side.is_beyond(nv, v) && nv.abs() > 0.0 && (nv - v).abs() / nv.abs() <= hide_pct
      })
    };
    extrema
      .iter()
      .enumerate()
      .filter(|(i, tick)| {
        let prev = i.checked_sub(1).and_then(|j| extrema.get(j));
        let next = extrema.get(i + 1);
        !hidden_by(tick, prev) && !hidden_by(tick, next)
      })
      .map(|(_, tick)| *tick)
      .collect()
  }
}
