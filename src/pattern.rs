//! Pattern lifecycle: formed range, breakout, forecast and trade part

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
  config::Config,
  detectors::helpers,
  function::LinearFunction,
  pattern_type::PatternType,
  predictor::{predict_or_neutral, FeatureRow, Prediction, Predictor},
  range::PatternRange,
  tick::WaveTick,
  Direction, Side,
};

// ============================================================
// IDENTITY AND STATE
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(pub u64);

impl std::fmt::Display for PatternId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "P{}", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternState {
  /// Range closed, no confirmed breakout
  Formed,
  BrokenOut,
  /// Reversal past the opposite boundary after the breakout
  FalseBreakout,
  Completed,
  /// No breakout within the allowed number of ticks
  Expired,
}

impl PatternState {
  /// Formed or broken out
  pub fn is_live(self) -> bool {
    matches!(self, PatternState::Formed | PatternState::BrokenOut)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      PatternState::Formed => "formed",
      PatternState::BrokenOut => "broken_out",
      PatternState::FalseBreakout => "false_breakout",
      PatternState::Completed => "completed",
      PatternState::Expired => "expired",
    }
  }
}

/// Lifecycle transitions reported by [`Pattern::on_tick`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PatternEvent {
  BreakoutConfirmed { direction: Direction, ts: i64 },
  FalseBreakout { ts: i64 },
  Completed { ts: i64 },
  Expired { ts: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakout {
  /// First bar beyond the boundary
  pub tick: WaveTick,
  pub side: Side,
  pub direction: Direction,
  /// Boundary value at the breakout bar
  pub boundary_value: f64,
  /// Body excess over the boundary
  pub excess: f64,
  pub confirmed_ts: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
  pub prediction: Prediction,
  pub target_price: f64,
  pub ticks_to_target: usize,
  /// Expected move in price units
  pub expected_win: f64,
  pub result_id: i8,
}

// ============================================================
// PATTERN PART
// ============================================================

/// Contiguous ticks of a pattern: the entry range or the trade window after a breakout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternPart {
  /// Length in ticks (`last - first`)
  pub length: usize,
  pub ticks: Vec<WaveTick>,
}

impl PatternPart {
  /// Ticks of `ticks` inside the range span
  pub fn from_range(range: &PatternRange, ticks: &[WaveTick]) -> Self {
    Self {
      length: range.length(),
      ticks: ticks.iter().filter(|t| range.contains_ts(t.timestamp)).copied().collect(),
    }
  }

  /// Part starting at `tick` that completes after `length` more ticks
  pub fn starting_at(tick: WaveTick, length: usize) -> Self {
    Self { length, ticks: vec![tick] }
  }

  /// Append a tick; false once the part is complete
  pub fn add_tick(&mut self, tick: WaveTick) -> bool {
    if self.is_complete() {
      return false;
    }
    self.ticks.push(tick);
    true
  }

  pub fn is_complete(&self) -> bool {
    self.ticks.len() > self.length
  }

  pub fn first(&self) -> Option<&WaveTick> {
    self.ticks.first()
  }

  pub fn last(&self) -> Option<&WaveTick> {
    self.ticks.last()
  }

  pub fn height(&self) -> f64 {
    helpers::span_height(&self.ticks)
  }

  pub fn mean_close(&self) -> f64 {
    helpers::mean_close(&self.ticks)
  }

  /// Least squares line through the closes
  pub fn f_regression(&self) -> Option<LinearFunction> {
    let points: Vec<(i64, f64)> = self.ticks.iter().map(|t| (t.timestamp, t.close)).collect();
    LinearFunction::least_squares(&points)
  }

  /// Mean volume of the second half against the first half, in percent
  pub fn volume_change_pct(&self) -> f64 {
    let half = self.ticks.len() / 2;
    if half == 0 {
      return 0.0;
    }
    let mean = |ticks: &[WaveTick]| ticks.iter().map(|t| t.volume).sum::<f64>() / ticks.len() as f64;
    let (first, second) = (mean(&self.ticks[..half]), mean(&self.ticks[self.ticks.len() - half..]));
    helpers::pct_change(first, second)
  }
}

// ============================================================
// PATTERN
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
  pub id: PatternId,
  pub symbol: String,
  pub pattern_type: PatternType,
  pub range: PatternRange,
  pub state: PatternState,
  pub main_part: PatternPart,
  pub trade_part: Option<PatternPart>,
  pub breakout: Option<Breakout>,
  pub expected_direction: Direction,
  pub forecast: Forecast,
  pub f_regression: Option<LinearFunction>,
  pub created_ts: i64,
  /// Timestamp of the transition into a final state
  pub closed_ts: Option<i64>,
  stride: i64,
  /// Breakout seen but not yet confirmed, with the number of bars beyond
  pending: Option<(Breakout, usize)>,
}

impl Pattern {
  pub fn new<P: Predictor + ?Sized>(
    id: PatternId,
    symbol: &str,
    range: PatternRange,
    range_ticks: &[WaveTick],
    config: &Config,
    predictor: &P,
    stride: i64,
  ) -> Self {
    let main_part = PatternPart::from_range(&range, range_ticks);
    let created_ts = range.tick_window_end.timestamp;
    let mut pattern = Self {
      id,
      symbol: symbol.to_string(),
      pattern_type: range.pattern_type,
      expected_direction: Direction::Neutral,
      f_regression: main_part.f_regression(),
      forecast: Forecast {
        prediction: Prediction::neutral(),
        target_price: range.mean_close,
        ticks_to_target: range.length(),
        expected_win: 0.0,
        result_id: 0,
      },
      range,
      state: PatternState::Formed,
      main_part,
      trade_part: None,
      breakout: None,
      created_ts,
      closed_ts: None,
      stride: stride.max(1),
      pending: None,
    };
    pattern.expected_direction = pattern.expected_breakout_direction(config);
    pattern.refresh_forecast(predictor);
    info!(
      symbol = %pattern.symbol,
      pattern_id = pattern.id.0,
      pattern_type = %pattern.pattern_type,
      ts = created_ts,
      begin_ts = pattern.range.tick_first.timestamp,
      expected = ?pattern.expected_direction,
      "pattern formed"
    );
    pattern
  }

  /// Replace the range of a still forming pattern; ignored after a breakout
  pub fn update_range<P: Predictor + ?Sized>(
    &mut self,
    range: PatternRange,
    range_ticks: &[WaveTick],
    config: &Config,
    predictor: &P,
  ) -> bool {
    if self.state != PatternState::Formed || range.pattern_type != self.pattern_type {
      return false;
    }
    self.main_part = PatternPart::from_range(&range, range_ticks);
    self.f_regression = self.main_part.f_regression();
    self.range = range;
    self.expected_direction = self.expected_breakout_direction(config);
    self.refresh_forecast(predictor);
    true
  }

  /// Same type and overlapping spans
  pub fn is_same_formation(&self, range: &PatternRange) -> bool {
    range.pattern_type == self.pattern_type
      && range.tick_first.timestamp <= self.range.tick_last.timestamp
      && self.range.tick_first.timestamp <= range.tick_last.timestamp
  }

  pub fn is_live(&self) -> bool {
    self.state.is_live()
  }

  pub fn slope_upper_pct(&self) -> f64 {
    self.range.slope_upper_pct()
  }

  pub fn slope_lower_pct(&self) -> f64 {
    self.range.slope_lower_pct()
  }

  pub fn slope_regression_pct(&self) -> f64 {
    self.f_regression.map_or(0.0, |f| {
      f.slope_pct(self.range.tick_first.timestamp, self.range.tick_last.timestamp, self.range.mean_close)
    })
  }

  /// Expected win relative to `price`, in percent
  pub fn expected_win_pct(&self, price: f64) -> f64 {
    if price <= 0.0 {
      return 0.0;
    }
    self.forecast.expected_win / price * 100.0
  }

  /// Direction a breakout is expected to take.
  ///
  /// Shapes with a fixed direction use it. Otherwise the closes of the last
  /// quarter are compared with the first quarter, and a tie goes to the side
  /// touched last (upper means ascending).
  pub fn expected_breakout_direction(&self, config: &Config) -> Direction {
    if let Some(direction) = self.pattern_type.fixed_breakout_direction() {
      return direction;
    }
    let closes: Vec<f64> = self.main_part.ticks.iter().map(|t| t.close).collect();
    let quarter = closes.len() / 4;
    if quarter > 0 {
      let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;
      let first = mean(&closes[..quarter]);
      let last = mean(&closes[closes.len() - quarter..]);
      let margin = config.breakout_range_pct.get() * self.range.height;
      if last - first > margin {
        return Direction::Ascending;
      }
      if first - last > margin {
        return Direction::Descending;
      }
    }
    match (self.range.last_touch_ts(Side::Upper), self.range.last_touch_ts(Side::Lower)) {
      (Some(upper), Some(lower)) if upper > lower => Direction::Ascending,
      (Some(upper), Some(lower)) if lower > upper => Direction::Descending,
      (Some(_), None) => Direction::Ascending,
      (None, Some(_)) => Direction::Descending,
      _ => Direction::Neutral,
    }
  }

  pub fn feature_row(&self) -> FeatureRow {
    let mean_close = self.range.mean_close;
    FeatureRow {
      length: self.range.length() as f64,
      height_pct: if mean_close > 0.0 { self.range.height / mean_close * 100.0 } else { 0.0 },
      slope_upper_pct: self.slope_upper_pct(),
      slope_lower_pct: self.slope_lower_pct(),
      slope_regression_pct: self.slope_regression_pct(),
      touch_points_top: self.range.number_upper_touches() as f64,
      touch_points_bottom: self.range.number_lower_touches() as f64,
      expected_direction: self.expected_direction.sign(),
      breakout_direction: self.breakout.map_or(0.0, |b| b.direction.sign()),
      volume_change_pct: self.main_part.volume_change_pct(),
    }
  }

  fn refresh_forecast<P: Predictor + ?Sized>(&mut self, predictor: &P) {
    let prediction = predict_or_neutral(predictor, self.pattern_type, &self.feature_row());
    let height = self.range.height;
    let target_price = match self.breakout {
      Some(b) => b.boundary_value + b.direction.sign() * height,
      None => {
        let last_ts = self.range.tick_last.timestamp;
        match self.expected_direction {
          Direction::Ascending => self.range.f_upper.value_at(last_ts) + height,
          Direction::Descending => self.range.f_lower.value_at(last_ts) - height,
          Direction::Neutral => self.range.mean_close,
        }
      },
    };
    self.forecast = Forecast {
      prediction,
      target_price,
      ticks_to_target: self.range.length(),
      expected_win: height * prediction.full_positive_pct / 100.0,
      result_id: prediction.result_id(),
    };
  }

  /// Body excess beyond a boundary by more than the breakout margin; the
  /// larger excess wins for bars crossing both boundaries
  fn breakout_candidate(&self, tick: &WaveTick, config: &Config) -> Option<Breakout> {
    let margin = config.breakout_range_pct.get() * self.range.height;
    let excess = |side: Side| side.excess(side.body_edge(tick), self.range.boundary(side).value_at(tick.timestamp));
    let (upper, lower) = (excess(Side::Upper), excess(Side::Lower));
    let side = match (upper > margin, lower > margin) {
      (true, true) if lower > upper => Side::Lower,
      (true, _) => Side::Upper,
      (false, true) => Side::Lower,
      (false, false) => return None,
    };
    Some(Breakout {
      tick: *tick,
      side,
      direction: side.breakout_direction(),
      boundary_value: self.range.boundary(side).value_at(tick.timestamp),
      excess: if side == Side::Upper { upper } else { lower },
      confirmed_ts: None,
    })
  }

  /// Advance the lifecycle with the newest tick
  pub fn on_tick<P: Predictor + ?Sized>(
    &mut self,
    tick: &WaveTick,
    config: &Config,
    predictor: &P,
  ) -> Option<PatternEvent> {
    match self.state {
      PatternState::Formed => self.on_formed_tick(tick, config, predictor),
      PatternState::BrokenOut => self.on_broken_out_tick(tick),
      _ => None,
    }
  }

  fn on_formed_tick<P: Predictor + ?Sized>(
    &mut self,
    tick: &WaveTick,
    config: &Config,
    predictor: &P,
  ) -> Option<PatternEvent> {
    if tick.timestamp <= self.range.tick_last.timestamp {
      return None;
    }
    let params = config.params_for(self.pattern_type);

    if let Some(candidate) = self.breakout_candidate(tick, config) {
      let (breakout, bars) = match self.pending.take() {
        Some((pending, bars)) if pending.side == candidate.side => (pending, bars + 1),
        _ => (candidate, 1),
      };
      if bars < params.breakout_confirmation_ticks {
        self.pending = Some((breakout, bars));
        return None;
      }
      let breakout = Breakout { confirmed_ts: Some(tick.timestamp), ..breakout };
      self.breakout = Some(breakout);
      self.state = PatternState::BrokenOut;
      self.trade_part = Some(PatternPart::starting_at(breakout.tick, self.range.length()));
      if breakout.tick.timestamp != tick.timestamp {
        if let Some(part) = self.trade_part.as_mut() {
          part.add_tick(*tick);
        }
      }
      self.refresh_forecast(predictor);
      info!(
        symbol = %self.symbol,
        pattern_id = self.id.0,
        pattern_type = %self.pattern_type,
        ts = breakout.tick.timestamp,
        direction = ?breakout.direction,
        target = self.forecast.target_price,
        "breakout confirmed"
      );
      return Some(PatternEvent::BreakoutConfirmed { direction: breakout.direction, ts: tick.timestamp });
    }
    self.pending = None;

    let elapsed = (tick.timestamp - self.range.tick_last.timestamp) / self.stride;
    let allowed = params.breakout_required_after_ticks.unwrap_or(self.range.length());
    if elapsed > allowed as i64 {
      return Some(self.close(PatternState::Expired, tick.timestamp));
    }
    None
  }

  fn on_broken_out_tick(&mut self, tick: &WaveTick) -> Option<PatternEvent> {
    let breakout = self.breakout?;
    if let Some(part) = self.trade_part.as_mut() {
      part.add_tick(*tick);
    }
    let opposite = breakout.side.opposite();
    let opposite_boundary = self.range.boundary(opposite).value_at(tick.timestamp);
    if opposite.is_beyond(tick.close, opposite_boundary) {
      return Some(self.close(PatternState::FalseBreakout, tick.timestamp));
    }
    let target = self.forecast.target_price;
    let reached = !breakout.side.is_beyond(target, breakout.side.value(tick));
    if reached || self.trade_part.as_ref().is_some_and(PatternPart::is_complete) {
      return Some(self.close(PatternState::Completed, tick.timestamp));
    }
    None
  }

  fn close(&mut self, state: PatternState, ts: i64) -> PatternEvent {
    self.state = state;
    self.closed_ts = Some(ts);
    info!(
      symbol = %self.symbol,
      pattern_id = self.id.0,
      pattern_type = %self.pattern_type,
      ts,
      state = state.as_str(),
      "pattern closed"
    );
    match state {
      PatternState::FalseBreakout => PatternEvent::FalseBreakout { ts },
      PatternState::Expired => PatternEvent::Expired { ts },
      _ => PatternEvent::Completed { ts },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    detectors::PatternRangeDetector,
    pattern_data::PatternData,
    pattern_type::PatternTypeParams,
    predictor::RuleBasedPredictor,
    tick::{Candle, TickList},
    Period,
  };

  const DAY: i64 = 86_400;

  fn triangle_candles(n: usize) -> Vec<Candle> {
    (0..n)
      .map(|i| {
        let k = (i / 2) as f64;
        let (high, low) = if i % 2 == 0 { (100.0 - k, 99.0 - k) } else { (81.0 + k, 80.0 + k) };
        Candle::new(i as i64 * DAY, low + 0.25, high, low, high - 0.25, 1000.0)
      })
      .collect()
  }

  fn config() -> Config {
    Config { length_for_local_min_max: Period::new_const(1), ..Config::default() }
  }

  fn triangle_pattern(config: &Config) -> Pattern {
    let mut list = TickList::for_config(config);
    for c in triangle_candles(20) {
      list.append(c).unwrap();
    }
    let data = PatternData::new(&list, config);
    let range = PatternRangeDetector::new(&data).detect().ranges.remove(0);
    Pattern::new(PatternId(1), "TEST", range, data.ticks(), config, &RuleBasedPredictor, DAY)
  }

  fn tick(i: i64, open: f64, high: f64, low: f64, close: f64) -> WaveTick {
    WaveTick::from_candle(&Candle::new(i * DAY, open, high, low, close, 1000.0), i as usize)
  }

  #[test]
  fn test_new_pattern() {
    let config = config();
    let pattern = triangle_pattern(&config);
    assert_eq!(pattern.pattern_type, PatternType::Triangle);
    assert_eq!(pattern.state, PatternState::Formed);
    assert_eq!(pattern.main_part.ticks.len(), 20);
    assert_eq!(pattern.main_part.length, 19);
    // closes drift down from the first quarter (91.75) to the last (89.75)
    assert_eq!(pattern.expected_direction, Direction::Descending);
    assert!((pattern.forecast.target_price - 69.0).abs() < 1e-9);
    assert!((pattern.forecast.expected_win - 20.0).abs() < 1e-9);
    assert_eq!(pattern.forecast.result_id, -1);
    assert!(pattern.f_regression.is_some());
  }

  #[test]
  fn test_breakout_sets_target() {
    let config = config();
    let mut pattern = triangle_pattern(&config);
    let event = pattern.on_tick(&tick(20, 90.0, 95.0, 90.0, 94.0), &config, &RuleBasedPredictor);
    assert_eq!(event, Some(PatternEvent::BreakoutConfirmed { direction: Direction::Ascending, ts: 20 * DAY }));
    assert_eq!(pattern.state, PatternState::BrokenOut);
    let breakout = pattern.breakout.unwrap();
    assert_eq!(breakout.tick.timestamp, 20 * DAY);
    assert!((breakout.boundary_value - 90.0).abs() < 1e-9);
    assert!((pattern.forecast.target_price - 110.0).abs() < 1e-9);
    assert_eq!(pattern.forecast.result_id, 1);
    assert_eq!(pattern.trade_part.as_ref().map(|p| p.ticks.len()), Some(1));
  }

  #[test]
  fn test_exact_touch_is_no_breakout() {
    let config = config();
    let mut pattern = triangle_pattern(&config);
    assert_eq!(pattern.on_tick(&tick(20, 89.6, 90.0, 89.6, 90.0), &config, &RuleBasedPredictor), None);
    assert_eq!(pattern.state, PatternState::Formed);
  }

  #[test]
  fn test_engulfing_bar_resolves_by_greater_excess() {
    let config = config();
    let mut pattern = triangle_pattern(&config);
    // body top 100 is 10 above the upper line, body bottom 80 is 9.5 below the lower line
    let event = pattern.on_tick(&tick(20, 80.0, 100.5, 79.5, 100.0), &config, &RuleBasedPredictor);
    assert_eq!(event, Some(PatternEvent::BreakoutConfirmed { direction: Direction::Ascending, ts: 20 * DAY }));
  }

  #[test]
  fn test_confirmation_needs_configured_bars() {
    let mut config = config();
    config
      .pattern_type_params
      .insert(PatternType::Triangle, PatternTypeParams { breakout_confirmation_ticks: 2, ..Default::default() });
    let mut pattern = triangle_pattern(&config);
    assert_eq!(pattern.on_tick(&tick(20, 90.0, 95.0, 90.0, 94.0), &config, &RuleBasedPredictor), None);
    let event = pattern.on_tick(&tick(21, 94.0, 96.0, 93.0, 95.0), &config, &RuleBasedPredictor);
    assert_eq!(event, Some(PatternEvent::BreakoutConfirmed { direction: Direction::Ascending, ts: 21 * DAY }));
    assert_eq!(pattern.breakout.unwrap().tick.timestamp, 20 * DAY);
    assert_eq!(pattern.trade_part.as_ref().map(|p| p.ticks.len()), Some(2));
  }

  #[test]
  fn test_false_breakout() {
    let config = config();
    let mut pattern = triangle_pattern(&config);
    pattern.on_tick(&tick(20, 90.0, 95.0, 90.0, 94.0), &config, &RuleBasedPredictor);
    let event = pattern.on_tick(&tick(21, 92.0, 92.0, 85.0, 86.0), &config, &RuleBasedPredictor);
    assert_eq!(event, Some(PatternEvent::FalseBreakout { ts: 21 * DAY }));
    assert!(!pattern.is_live());
  }

  #[test]
  fn test_target_reached_completes() {
    let config = config();
    let mut pattern = triangle_pattern(&config);
    pattern.on_tick(&tick(20, 90.0, 95.0, 90.0, 94.0), &config, &RuleBasedPredictor);
    let event = pattern.on_tick(&tick(21, 94.0, 111.0, 94.0, 110.5), &config, &RuleBasedPredictor);
    assert_eq!(event, Some(PatternEvent::Completed { ts: 21 * DAY }));
    assert_eq!(pattern.closed_ts, Some(21 * DAY));
  }

  #[test]
  fn test_expires_without_breakout() {
    let mut config = config();
    config.pattern_type_params.insert(
      PatternType::Triangle,
      PatternTypeParams { breakout_required_after_ticks: Some(1), ..Default::default() },
    );
    let mut pattern = triangle_pattern(&config);
    assert_eq!(pattern.on_tick(&tick(20, 89.8, 89.8, 89.8, 89.8), &config, &RuleBasedPredictor), None);
    let event = pattern.on_tick(&tick(21, 89.75, 89.75, 89.75, 89.75), &config, &RuleBasedPredictor);
    assert_eq!(event, Some(PatternEvent::Expired { ts: 21 * DAY }));
    assert_eq!(pattern.state, PatternState::Expired);
  }

  #[test]
  fn test_update_range_only_while_formed() {
    let config = config();
    let mut pattern = triangle_pattern(&config);
    let range = pattern.range.clone();
    let ticks = pattern.main_part.ticks.clone();
    assert!(pattern.update_range(range.clone(), &ticks, &config, &RuleBasedPredictor));
    assert!(pattern.is_same_formation(&range));
    pattern.on_tick(&tick(20, 90.0, 95.0, 90.0, 94.0), &config, &RuleBasedPredictor);
    assert!(!pattern.update_range(range, &ticks, &config, &RuleBasedPredictor));
  }

  #[test]
  fn test_pattern_part_completion() {
    let mut part = PatternPart::starting_at(tick(0, 1.0, 1.0, 1.0, 1.0), 2);
    assert!(part.add_tick(tick(1, 2.0, 2.0, 2.0, 2.0)));
    assert!(!part.is_complete());
    assert!(part.add_tick(tick(2, 3.0, 3.0, 3.0, 3.0)));
    assert!(part.is_complete());
    assert!(!part.add_tick(tick(3, 4.0, 4.0, 4.0, 4.0)));
    assert_eq!(part.height(), 2.0);
  }
}
