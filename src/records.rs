//! Plain export records
//!
//! Records are copies taken at export time. Prices are rounded with the
//! configured [`PricePrecision`], percentages to basis points.

use serde::{Deserialize, Serialize};

use crate::{
  config::{BuyTrigger, PricePrecision, TradeStrategy},
  detectors::{FibonacciWave, WaveComponent, WaveKind},
  pattern::{Pattern, PatternId, PatternState},
  pattern_type::PatternType,
  trade::{SellReason, Trade, TradeId, TradeState},
  Direction,
};

/// Winner at `+0.5 %` and above, loser below zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultClass {
  Winner,
  Neutral,
  Loser,
}

impl ResultClass {
  pub const WINNER_THRESHOLD_PCT: f64 = 0.5;

  pub fn from_pct(trade_result_pct: f64) -> Self {
    if trade_result_pct >= Self::WINNER_THRESHOLD_PCT {
      ResultClass::Winner
    } else if trade_result_pct < 0.0 {
      ResultClass::Loser
    } else {
      ResultClass::Neutral
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
  pub pattern_id: PatternId,
  pub symbol: String,
  pub pattern_type: PatternType,
  pub state: PatternState,
  /// Breakout direction, or the expected one before a breakout
  pub direction: Direction,
  pub range_begin_ts: i64,
  pub range_end_ts: i64,
  pub breakout_ts: Option<i64>,
  pub upper_slope_pct: f64,
  pub lower_slope_pct: f64,
  pub regression_slope_pct: f64,
  pub height: f64,
  pub expected_win: f64,
  pub forecast_full_positive_pct: f64,
  pub forecast_full_negative_pct: f64,
  pub forecast_ticks_till_breakout: f64,
  pub forecast_false_breakout_flag: bool,
  pub touch_points_top: usize,
  pub touch_points_bottom: usize,
}

impl PatternRecord {
  pub fn from_pattern(pattern: &Pattern, precision: PricePrecision) -> Self {
    let prediction = &pattern.forecast.prediction;
    Self {
      pattern_id: pattern.id,
      symbol: pattern.symbol.clone(),
      pattern_type: pattern.pattern_type,
      state: pattern.state,
      direction: pattern.breakout.map_or(pattern.expected_direction, |b| b.direction),
      range_begin_ts: pattern.range.tick_first.timestamp,
      range_end_ts: pattern.range.tick_last.timestamp,
      breakout_ts: pattern.breakout.map(|b| b.tick.timestamp),
      upper_slope_pct: PricePrecision::round_pct(pattern.slope_upper_pct()),
      lower_slope_pct: PricePrecision::round_pct(pattern.slope_lower_pct()),
      regression_slope_pct: PricePrecision::round_pct(pattern.slope_regression_pct()),
      height: precision.round_price(pattern.range.height),
      expected_win: precision.round_price(pattern.forecast.expected_win),
      forecast_full_positive_pct: PricePrecision::round_pct(prediction.full_positive_pct),
      forecast_full_negative_pct: PricePrecision::round_pct(prediction.full_negative_pct),
      forecast_ticks_till_breakout: prediction.ticks_till_breakout,
      forecast_false_breakout_flag: prediction.false_breakout_flag,
      touch_points_top: pattern.range.number_upper_touches(),
      touch_points_bottom: pattern.range.number_lower_touches(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
  pub trade_id: TradeId,
  pub pattern_id: PatternId,
  pub symbol: String,
  pub buy_trigger: BuyTrigger,
  pub trade_strategy: TradeStrategy,
  pub is_simulation: bool,
  pub state: TradeState,
  pub buy_ts: Option<i64>,
  pub buy_price: Option<f64>,
  pub sell_ts: Option<i64>,
  pub sell_price: Option<f64>,
  pub sell_reason: Option<SellReason>,
  /// From the exported prices, so it agrees with them exactly
  pub trade_result_pct: Option<f64>,
  pub result_class: Option<ResultClass>,
}

impl TradeRecord {
  pub fn from_trade(trade: &Trade, precision: PricePrecision) -> Self {
    let buy_price = trade.buy_price.map(|p| precision.round_price(p));
    let sell_price = trade.sell_price.map(|p| precision.round_price(p));
    let trade_result_pct = match (buy_price, sell_price) {
      (Some(buy), Some(sell)) if buy > 0.0 => Some((sell - buy) / buy * 100.0),
      _ => None,
    };
    Self {
      trade_id: trade.id,
      pattern_id: trade.pattern_id,
      symbol: trade.symbol.clone(),
      buy_trigger: trade.buy_trigger,
      trade_strategy: trade.trade_strategy,
      is_simulation: trade.is_simulation,
      state: trade.state.clone(),
      buy_ts: trade.buy_ts,
      buy_price,
      sell_ts: trade.sell_ts,
      sell_price,
      sell_reason: trade.sell_reason,
      trade_result_pct,
      result_class: trade_result_pct.map(ResultClass::from_pct),
    }
  }

  pub fn is_closed(&self) -> bool {
    self.state == TradeState::Closed
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveComponentRecord {
  pub index: usize,
  pub direction: Direction,
  pub start_ts: i64,
  pub end_ts: i64,
  pub value_start: f64,
  pub value_end: f64,
  pub range: f64,
  pub retracement_pct: Option<f64>,
  pub regression_pct: Option<f64>,
}

impl WaveComponentRecord {
  fn from_component(component: &WaveComponent, precision: PricePrecision) -> Self {
    Self {
      index: component.index,
      direction: component.direction,
      start_ts: component.tick_start.timestamp,
      end_ts: component.tick_end.timestamp,
      value_start: precision.round_price(component.value_start),
      value_end: precision.round_price(component.value_end),
      range: precision.round_price(component.range),
      retracement_pct: component.get_retracement_pct().map(PricePrecision::round_pct),
      regression_pct: component.get_regression_pct().map(PricePrecision::round_pct),
    }
  }
}

/// One finished Fibonacci wave with its component spans and ratios
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveRecord {
  pub symbol: String,
  pub kind: WaveKind,
  pub direction: Direction,
  pub pattern_type: PatternType,
  pub start_ts: i64,
  pub end_ts: i64,
  pub components: Vec<WaveComponentRecord>,
}

impl WaveRecord {
  pub fn from_wave(symbol: &str, wave: &FibonacciWave, precision: PricePrecision) -> Self {
    Self {
      symbol: symbol.to_string(),
      kind: wave.kind,
      direction: wave.direction,
      pattern_type: wave.pattern_type(),
      start_ts: wave.tick_start().map_or(0, |t| t.timestamp),
      end_ts: wave.tick_end().map_or(0, |t| t.timestamp),
      components: wave
        .components
        .iter()
        .map(|c| WaveComponentRecord::from_component(c, precision))
        .collect(),
    }
  }
}
