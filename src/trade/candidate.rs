//! Trade candidates and their admission

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::trade_box::BoxGeometry;
use crate::{
  config::{BuyTrigger, Config, TradeBoxKind, TradeStrategy},
  pattern::{Pattern, PatternId, PatternState},
  pattern_type::PatternType,
  tick::WaveTick,
};

/// Prospective trade for one `(pattern, buy_trigger, trade_strategy)` triple
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeCandidate {
  pub pattern_id: PatternId,
  pub buy_trigger: BuyTrigger,
  pub trade_strategy: TradeStrategy,
  pub geometry: BoxGeometry,
  /// Close of the tick the candidate was built on
  pub reference_price: f64,
  /// Box top distance relative to the reference price, in percent
  pub forecast_reached_price_pct: f64,
  pub forecast_result_id: i8,
}

impl TradeCandidate {
  pub fn new(pattern: &Pattern, buy_trigger: BuyTrigger, trade_strategy: TradeStrategy, tick: &WaveTick, config: &Config) -> Self {
    let geometry = BoxGeometry::for_pattern(pattern, box_kind(pattern.pattern_type, buy_trigger, config));
    let reference_price = tick.close;
    let forecast_reached_price_pct = if reference_price > 0.0 {
      geometry.distance_top / reference_price * 100.0
    } else {
      0.0
    };
    Self {
      pattern_id: pattern.id,
      buy_trigger,
      trade_strategy,
      geometry,
      reference_price,
      forecast_reached_price_pct,
      forecast_result_id: pattern.forecast.result_id,
    }
  }

  /// `forecast_reached_price_pct · sign(forecast_result_id)`
  pub fn rank(&self) -> f64 {
    self.forecast_reached_price_pct * f64::from(self.forecast_result_id.signum())
  }
}

fn box_kind(pattern_type: PatternType, buy_trigger: BuyTrigger, config: &Config) -> TradeBoxKind {
  match buy_trigger {
    BuyTrigger::TouchPoint => TradeBoxKind::TouchPoint,
    BuyTrigger::Breakout if pattern_type.is_fibonacci() => TradeBoxKind::Fibonacci,
    BuyTrigger::Breakout => config.breakout_box_kind,
  }
}

/// Builds candidates for newly formed patterns and keeps the black-list
#[derive(Debug, Clone, Default)]
pub struct TradeCandidateController {
  /// Pattern id to the reason it failed the pre-trade checks
  black_list: BTreeMap<PatternId, String>,
  /// Patterns whose candidates were already handed out
  served: BTreeSet<PatternId>,
  /// Patterns that own the real trade
  real_patterns: BTreeSet<PatternId>,
}

impl TradeCandidateController {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_black_listed(&self, pattern_id: PatternId) -> bool {
    self.black_list.contains_key(&pattern_id)
  }

  pub fn black_list_reason(&self, pattern_id: PatternId) -> Option<&str> {
    self.black_list.get(&pattern_id).map(String::as_str)
  }

  pub fn has_real_trade(&self, pattern_id: PatternId) -> bool {
    self.real_patterns.contains(&pattern_id)
  }

  /// Pre-trade checks; the error names the failed check
  pub fn pre_check(pattern: &Pattern, price: f64, config: &Config) -> Result<(), String> {
    let expected_win_pct = pattern.expected_win_pct(price);
    if expected_win_pct < config.expected_win_pct {
      return Err(format!(
        "expected win {expected_win_pct:.2}% below {:.2}%",
        config.expected_win_pct
      ));
    }
    let direction = pattern.breakout.map_or(pattern.expected_direction, |b| b.direction);
    if direction.is_descending() {
      return Err("descending expectation".to_string());
    }
    if pattern.forecast.prediction.false_breakout_flag {
      return Err("false breakout predicted".to_string());
    }
    Ok(())
  }

  /// Candidates of every formed pattern seen for the first time, best first
  /// per pattern, with the flag telling whether the candidate trades for real
  pub fn evaluate<'a, I>(&mut self, patterns: I, tick: &WaveTick, config: &Config) -> Vec<(TradeCandidate, bool)>
  where
    I: IntoIterator<Item = &'a Pattern>,
  {
    let pairs = config.trade_pairs();
    let mut admitted = Vec::new();
    for pattern in patterns {
      if pattern.state != PatternState::Formed
        || self.served.contains(&pattern.id)
        || self.is_black_listed(pattern.id)
      {
        continue;
      }
      if let Err(reason) = Self::pre_check(pattern, tick.close, config) {
        debug!(
          symbol = %pattern.symbol,
          pattern_id = pattern.id.0,
          pattern_type = %pattern.pattern_type,
          ts = tick.timestamp,
          reason = %reason,
          "pattern black-listed"
        );
        self.black_list.insert(pattern.id, reason);
        continue;
      }
      self.served.insert(pattern.id);

      let mut candidates: Vec<TradeCandidate> = pairs
        .iter()
        .map(|(trigger, strategy)| TradeCandidate::new(pattern, *trigger, *strategy, tick, config))
        .collect();
      candidates.sort_by(|a, b| b.rank().total_cmp(&a.rank()));

      for (i, candidate) in candidates.into_iter().enumerate() {
        let real = i == 0 && candidate.rank() > 0.0 && !self.real_patterns.contains(&pattern.id);
        if real {
          self.real_patterns.insert(pattern.id);
        }
        debug!(
          symbol = %pattern.symbol,
          pattern_id = pattern.id.0,
          ts = tick.timestamp,
          trigger = ?candidate.buy_trigger,
          strategy = ?candidate.trade_strategy,
          rank = candidate.rank(),
          real,
          "trade candidate"
        );
        admitted.push((candidate, real));
      }
    }
    admitted
  }

  /// Forget a retired pattern
  pub fn retire(&mut self, pattern_id: PatternId) {
    self.black_list.remove(&pattern_id);
    self.served.remove(&pattern_id);
    self.real_patterns.remove(&pattern_id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    detectors::PatternRangeDetector,
    pattern_data::PatternData,
    predictor::{FeatureRow, Prediction, RuleBasedPredictor},
    tick::{Candle, TickList},
    Direction, Period,
  };

  const DAY: i64 = 86_400;

  fn config() -> Config {
    Config { length_for_local_min_max: Period::new_const(1), ..Config::default() }
  }

  /// Triangle whose closes drift up, so the breakout is expected upwards
  fn rising_triangle(config: &Config) -> (Pattern, WaveTick) {
    let mut list = TickList::for_config(config);
    for i in 0..20usize {
      let k = (i / 2) as f64;
      let (high, low) = if i % 2 == 0 { (81.0 + k, 80.0 + k) } else { (100.0 - k, 99.0 - k) };
      list.append(Candle::new(i as i64 * DAY, low + 0.25, high, low, high - 0.25, 1000.0)).unwrap();
    }
    let data = PatternData::new(&list, config);
    let range = PatternRangeDetector::new(&data).detect().ranges.remove(0);
    let last = *data.ticks().last().unwrap();
    (Pattern::new(PatternId(7), "TEST", range, data.ticks(), config, &RuleBasedPredictor, DAY), last)
  }

  #[test]
  fn test_best_candidate_is_real() {
    let config = config();
    let (pattern, tick) = rising_triangle(&config);
    assert_eq!(pattern.expected_direction, Direction::Ascending);
    let mut controller = TradeCandidateController::new();
    let admitted = controller.evaluate([&pattern], &tick, &config);
    assert_eq!(admitted.len(), config.trade_pairs().len());
    assert_eq!(admitted.iter().filter(|(_, real)| *real).count(), 1);
    assert!(admitted[0].1);
    assert!(admitted.windows(2).all(|w| w[0].0.rank() >= w[1].0.rank()));
    assert!(controller.has_real_trade(pattern.id));

    // served patterns are not offered twice
    assert!(controller.evaluate([&pattern], &tick, &config).is_empty());
    controller.retire(pattern.id);
    assert!(!controller.has_real_trade(pattern.id));
  }

  #[test]
  fn test_low_expected_win_is_black_listed() {
    let config = Config { expected_win_pct: 1000.0, ..config() };
    let (pattern, tick) = rising_triangle(&config);
    let mut controller = TradeCandidateController::new();
    assert!(controller.evaluate([&pattern], &tick, &config).is_empty());
    assert!(controller.is_black_listed(pattern.id));
    assert!(controller.black_list_reason(pattern.id).unwrap().starts_with("expected win"));
    controller.retire(pattern.id);
    assert!(!controller.is_black_listed(pattern.id));
  }

  #[test]
  fn test_predicted_false_breakout_is_black_listed() {
    let config = config();
    let (mut pattern, tick) = rising_triangle(&config);
    let flagged = |_: PatternType, _: &FeatureRow| -> Option<Prediction> {
      Some(Prediction {
        breakout_direction: Direction::Ascending,
        false_breakout_flag: true,
        full_positive_pct: 100.0,
        ..Prediction::neutral()
      })
    };
    let (range, ticks) = (pattern.range.clone(), pattern.main_part.ticks.clone());
    pattern.update_range(range, &ticks, &config, &flagged);
    let mut controller = TradeCandidateController::new();
    assert!(controller.evaluate([&pattern], &tick, &config).is_empty());
    assert_eq!(controller.black_list_reason(pattern.id), Some("false breakout predicted"));
  }

  #[test]
  fn test_rank_sign_follows_result_id() {
    let config = config();
    let (pattern, tick) = rising_triangle(&config);
    let mut candidate = TradeCandidate::new(&pattern, BuyTrigger::Breakout, TradeStrategy::Limit, &tick, &config);
    assert!(candidate.rank() > 0.0);
    candidate.forecast_result_id = -1;
    assert!(candidate.rank() < 0.0);
    candidate.forecast_result_id = 0;
    assert_eq!(candidate.rank(), 0.0);
  }
}
