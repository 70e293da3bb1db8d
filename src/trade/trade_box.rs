//! Buy and sell boxes
//!
//! A [`BuyBox`] watches the pattern boundaries for the entry signal of its
//! trigger. Once filled, a [`TradeBox`] carries stop loss and sell limit and
//! moves them according to the trade strategy.

use serde::{Deserialize, Serialize};

use super::machine::{CancelReason, SellReason};
use crate::{
  config::{BuyTrigger, Config, TradeBoxKind, TradeStrategy},
  pattern::Pattern,
  tick::WaveTick,
  OHLCVExt,
};

/// Fibonacci fraction of the pattern height used by [`TradeBoxKind::Fibonacci`]
const FIBONACCI_BOX_RATIO: f64 = 0.618;

// ============================================================
// GEOMETRY
// ============================================================

/// Box dimensions fixed when a candidate is built
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxGeometry {
  pub kind: TradeBoxKind,
  pub height: f64,
  pub distance_top: f64,
  pub distance_bottom: f64,
  /// Holding period in ticks
  pub length_ticks: usize,
}

impl BoxGeometry {
  pub fn new(kind: TradeBoxKind, height: f64, full_positive_pct: f64, full_negative_pct: f64, length_ticks: usize) -> Self {
    Self {
      kind,
      height,
      distance_top: height * (full_positive_pct / 100.0).max(1.0),
      distance_bottom: height * (full_negative_pct / 100.0).max(1.0),
      length_ticks,
    }
  }

  /// Geometry of a box of `kind` for `pattern`
  pub fn for_pattern(pattern: &Pattern, kind: TradeBoxKind) -> Self {
    let range = &pattern.range;
    let length = range.length().max(1);
    let (height, length_ticks) = match kind {
      TradeBoxKind::ExpectedWin => (pattern.forecast.expected_win, length),
      TradeBoxKind::TouchPoint => {
        let at_last = range.height_at(range.tick_last.timestamp);
        (if at_last > 0.0 { at_last } else { range.height }, length)
      },
      TradeBoxKind::ForecastHalfLength => (range.height, (length / 2).max(1)),
      TradeBoxKind::ForecastFullLength => (range.height, length),
      TradeBoxKind::Fibonacci => (range.height * FIBONACCI_BOX_RATIO, length),
    };
    let prediction = &pattern.forecast.prediction;
    Self::new(kind, height, prediction.full_positive_pct, prediction.full_negative_pct, length_ticks)
  }
}

// ============================================================
// BUY BOX
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BuySignal {
  Wait,
  Buy { price: f64 },
  WrongDirection,
  Expired,
}

/// Entry watcher of one trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuyBox {
  pub trigger: BuyTrigger,
  /// Boundary values at the latest tick
  pub upper: f64,
  pub lower: f64,
  pub time_stamp_end: i64,
}

impl BuyBox {
  pub fn new(trigger: BuyTrigger, pattern: &Pattern, ts: i64, time_stamp_end: i64) -> Self {
    let mut buy_box = Self { trigger, upper: 0.0, lower: 0.0, time_stamp_end };
    buy_box.refresh(pattern, ts);
    buy_box
  }

  /// Re-read the pattern boundaries at `ts`
  pub fn refresh(&mut self, pattern: &Pattern, ts: i64) {
    self.upper = pattern.range.f_upper.value_at(ts);
    self.lower = pattern.range.f_lower.value_at(ts);
  }

  /// Entry decision for `tick`.
  ///
  /// `breakout_due` tells whether the forecast ticks-till-breakout have
  /// passed.
  pub fn on_tick(&self, tick: &WaveTick, config: &Config, breakout_due: bool) -> BuySignal {
    let tolerance = config.tolerance_pct_buying;
    match self.trigger {
      BuyTrigger::Breakout => {
        if breakout_due && tick.body_top() > self.upper * (1.0 + tolerance) {
          let limit = self.upper * (1.0 + config.buy_limit_pct / 100.0);
          return BuySignal::Buy { price: limit.min(tick.close) };
        }
        if tick.body_bottom() < self.lower {
          return BuySignal::WrongDirection;
        }
      },
      BuyTrigger::TouchPoint => {
        if tick.low <= self.lower * (1.0 + tolerance) && tick.close > self.lower {
          return BuySignal::Buy { price: tick.close };
        }
        if tick.body_bottom() < self.lower * (1.0 - tolerance) {
          return BuySignal::WrongDirection;
        }
      },
    }
    if tick.timestamp >= self.time_stamp_end {
      return BuySignal::Expired;
    }
    BuySignal::Wait
  }
}

// ============================================================
// SELL BOX
// ============================================================

/// Outcome of one holding tick
#[derive(Debug, Clone, PartialEq)]
pub enum BoxStep {
  Hold,
  Sell { price: f64, reason: SellReason },
  Violation(String),
}

/// Stop loss and sell limit of a filled trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeBox {
  pub trade_strategy: TradeStrategy,
  pub kind: TradeBoxKind,
  /// Price the box geometry is anchored at
  pub off_set_value: f64,
  pub buy_price: f64,
  pub height: f64,
  pub distance_top: f64,
  pub distance_bottom: f64,
  pub stop_loss_current: f64,
  pub sell_limit_current: f64,
  pub time_stamp_end: i64,
  /// Stop increment of the stepped strategy
  pub stepping: f64,
}

impl TradeBox {
  /// Box anchored at `buy_price`; fails when the geometry cannot give `stop < buy < limit`
  pub fn new(
    trade_strategy: TradeStrategy,
    geometry: &BoxGeometry,
    buy_price: f64,
    time_stamp_end: i64,
    config: &Config,
  ) -> Result<Self, CancelReason> {
    let (distance_top, distance_bottom) = match trade_strategy {
      TradeStrategy::LimitFix => {
        let distance = buy_price * config.limit_fix_pct / 100.0;
        (distance, distance)
      },
      _ => (geometry.distance_top, geometry.distance_bottom),
    };
    if !(buy_price.is_finite() && buy_price > 0.0) {
      return Err(CancelReason::InvariantViolation(format!("invalid buy price {buy_price}")));
    }
    if !(distance_top > 0.0 && distance_bottom > 0.0) {
      return Err(CancelReason::InvariantViolation(format!(
        "non-positive box distances top={distance_top} bottom={distance_bottom}"
      )));
    }
    let trade_box = Self {
      trade_strategy,
      kind: geometry.kind,
      off_set_value: buy_price,
      buy_price,
      height: geometry.height,
      distance_top,
      distance_bottom,
      stop_loss_current: buy_price - distance_bottom,
      sell_limit_current: buy_price + distance_top,
      time_stamp_end,
      stepping: distance_bottom / 2.0,
    };
    trade_box.check_invariants().map_err(CancelReason::InvariantViolation)?;
    Ok(trade_box)
  }

  /// `stop < limit`
  pub fn check_invariants(&self) -> Result<(), String> {
    if self.stop_loss_current < self.sell_limit_current {
      Ok(())
    } else {
      Err(format!(
        "stop {} not below limit {}",
        self.stop_loss_current, self.sell_limit_current
      ))
    }
  }

  /// Check exits against the current stop and limit, then move them.
  ///
  /// `sma` is the moving average used by the SMA strategy.
  pub fn on_tick(&mut self, tick: &WaveTick, sma: Option<f64>) -> BoxStep {
    if tick.low <= self.stop_loss_current {
      return BoxStep::Sell { price: self.stop_loss_current, reason: SellReason::StopLoss };
    }
    if tick.high >= self.sell_limit_current {
      return BoxStep::Sell { price: self.sell_limit_current, reason: SellReason::SellLimit };
    }
    if tick.timestamp >= self.time_stamp_end {
      return BoxStep::Sell { price: tick.close, reason: SellReason::TimeLimit };
    }

    let last = tick.last();
    match self.trade_strategy {
      TradeStrategy::Limit | TradeStrategy::LimitFix => {},
      TradeStrategy::TrailingStop => {
        self.stop_loss_current = self.stop_loss_current.max(last - self.distance_bottom);
      },
      TradeStrategy::TrailingSteppedStop => {
        while self.stepping > 0.0 && last - self.stop_loss_current >= 2.0 * self.stepping {
          self.stop_loss_current += self.stepping;
        }
      },
      TradeStrategy::Sma => {
        if let Some(sma) = sma.filter(|v| v.is_finite()) {
          self.stop_loss_current = self.stop_loss_current.max(sma);
        }
      },
    }
    if self.trade_strategy.is_trailing() {
      self.sell_limit_current = self.stop_loss_current + self.distance_bottom + self.distance_top;
    }
    match self.check_invariants() {
      Ok(()) => BoxStep::Hold,
      Err(message) => BoxStep::Violation(message),
    }
  }
}
