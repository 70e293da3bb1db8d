//! Paper trade state machine: watching, buying, holding, selling

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{
  candidate::TradeCandidate,
  trade_box::{BoxGeometry, BoxStep, BuyBox, BuySignal, TradeBox},
};
use crate::{
  config::{BuyTrigger, Config, TradeStrategy},
  pattern::{Pattern, PatternId},
  tick::WaveTick,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(pub u64);

impl std::fmt::Display for TradeId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "T{}", self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
  /// Price left the pattern against the trade before entry
  WrongDirection,
  /// The pattern was retired before entry
  PatternRetired,
  InvariantViolation(String),
  ClosedByCaller(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellReason {
  StopLoss,
  SellLimit,
  TimeLimit,
  /// Closed by the caller at the last price
  Forced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeState {
  Watching,
  Buying,
  Holding,
  Selling,
  Closed,
  Cancelled(CancelReason),
  Expired,
}

impl TradeState {
  /// Not yet closed, cancelled or expired
  pub fn is_open(&self) -> bool {
    matches!(self, TradeState::Watching | TradeState::Buying | TradeState::Holding | TradeState::Selling)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TradeEvent {
  Bought { price: f64, ts: i64 },
  Sold { price: f64, ts: i64, reason: SellReason },
  Cancelled { ts: i64, reason: CancelReason },
  Expired { ts: i64 },
}

/// End of the entry window: as long as the pattern may still break out
fn watch_end(pattern: &Pattern, config: &Config, stride: i64) -> i64 {
  let allowed = config
    .params_for(pattern.pattern_type)
    .breakout_required_after_ticks
    .unwrap_or(pattern.range.length())
    .max(1);
  pattern.range.tick_last.timestamp + allowed as i64 * stride
}

/// One paper trade for a `(pattern, buy_trigger, trade_strategy)` triple
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
  pub id: TradeId,
  pub pattern_id: PatternId,
  pub symbol: String,
  pub buy_trigger: BuyTrigger,
  pub trade_strategy: TradeStrategy,
  /// Simulated trades run the same machine but are never routed anywhere
  pub is_simulation: bool,
  pub state: TradeState,
  pub geometry: BoxGeometry,
  pub buy_box: BuyBox,
  pub trade_box: Option<TradeBox>,
  pub created_ts: i64,
  pub buy_ts: Option<i64>,
  pub buy_price: Option<f64>,
  pub sell_ts: Option<i64>,
  pub sell_price: Option<f64>,
  pub sell_reason: Option<SellReason>,
  /// Stop loss after every holding tick
  pub stop_loss_history: Vec<f64>,
  stride: i64,
}

impl Trade {
  pub fn from_candidate(
    id: TradeId,
    candidate: &TradeCandidate,
    pattern: &Pattern,
    is_simulation: bool,
    tick: &WaveTick,
    config: &Config,
    stride: i64,
  ) -> Self {
    let stride = stride.max(1);
    let time_stamp_end = watch_end(pattern, config, stride);
    Self {
      id,
      pattern_id: pattern.id,
      symbol: pattern.symbol.clone(),
      buy_trigger: candidate.buy_trigger,
      trade_strategy: candidate.trade_strategy,
      is_simulation,
      state: TradeState::Watching,
      geometry: candidate.geometry,
      buy_box: BuyBox::new(candidate.buy_trigger, pattern, tick.timestamp, time_stamp_end),
      trade_box: None,
      created_ts: tick.timestamp,
      buy_ts: None,
      buy_price: None,
      sell_ts: None,
      sell_price: None,
      sell_reason: None,
      stop_loss_history: Vec::new(),
      stride,
    }
  }

  /// Holding trade from a fill made outside the detector, such as a position
  /// carried over from an earlier session
  #[allow(clippy::too_many_arguments)]
  pub fn from_fill(
    id: TradeId,
    pattern_id: PatternId,
    symbol: impl Into<String>,
    buy_trigger: BuyTrigger,
    trade_box: TradeBox,
    buy_ts: i64,
    is_simulation: bool,
    stride: i64,
  ) -> Self {
    let stride = stride.max(1);
    let geometry = BoxGeometry {
      kind: trade_box.kind,
      height: trade_box.height,
      distance_top: trade_box.distance_top,
      distance_bottom: trade_box.distance_bottom,
      length_ticks: ((trade_box.time_stamp_end - buy_ts).max(0) / stride) as usize,
    };
    Self {
      id,
      pattern_id,
      symbol: symbol.into(),
      buy_trigger,
      trade_strategy: trade_box.trade_strategy,
      is_simulation,
      state: TradeState::Holding,
      geometry,
      buy_box: BuyBox { trigger: buy_trigger, upper: trade_box.buy_price, lower: trade_box.buy_price, time_stamp_end: buy_ts },
      created_ts: buy_ts,
      buy_ts: Some(buy_ts),
      buy_price: Some(trade_box.buy_price),
      trade_box: Some(trade_box),
      sell_ts: None,
      sell_price: None,
      sell_reason: None,
      stop_loss_history: Vec::new(),
      stride,
    }
  }

  pub fn is_open(&self) -> bool {
    self.state.is_open()
  }

  /// Result of a closed trade in percent of the buy price
  pub fn trade_result_pct(&self) -> Option<f64> {
    match (self.buy_price, self.sell_price) {
      (Some(buy), Some(sell)) if buy > 0.0 => Some((sell - buy) / buy * 100.0),
      _ => None,
    }
  }

  /// Advance with the newest tick; `pattern` is `None` once it left the arena
  pub fn on_tick(
    &mut self,
    tick: &WaveTick,
    pattern: Option<&Pattern>,
    sma: Option<f64>,
    config: &Config,
  ) -> Option<TradeEvent> {
    if tick.timestamp <= self.created_ts {
      return None;
    }
    match self.state {
      TradeState::Watching => self.on_watching_tick(tick, pattern, config),
      TradeState::Holding => self.on_holding_tick(tick, sma),
      _ => None,
    }
  }

  fn on_watching_tick(&mut self, tick: &WaveTick, pattern: Option<&Pattern>, config: &Config) -> Option<TradeEvent> {
    let Some(pattern) = pattern.filter(|p| p.is_live()) else {
      return Some(self.cancel(CancelReason::PatternRetired, tick.timestamp));
    };
    self.buy_box.refresh(pattern, tick.timestamp);
    self.buy_box.time_stamp_end = watch_end(pattern, config, self.stride);
    let ticks_after_range = (tick.timestamp - pattern.range.tick_last.timestamp) / self.stride;
    let breakout_due = ticks_after_range as f64 >= pattern.forecast.prediction.ticks_till_breakout;

    match self.buy_box.on_tick(tick, config, breakout_due) {
      BuySignal::Wait => None,
      BuySignal::Buy { price } => Some(self.buy(price, tick, config)),
      BuySignal::WrongDirection => Some(self.cancel(CancelReason::WrongDirection, tick.timestamp)),
      BuySignal::Expired => {
        self.state = TradeState::Expired;
        Some(TradeEvent::Expired { ts: tick.timestamp })
      },
    }
  }

  fn buy(&mut self, price: f64, tick: &WaveTick, config: &Config) -> TradeEvent {
    self.state = TradeState::Buying;
    let time_stamp_end = tick.timestamp + self.geometry.length_ticks as i64 * self.stride;
    match TradeBox::new(self.trade_strategy, &self.geometry, price, time_stamp_end, config) {
      Ok(trade_box) => {
        self.trade_box = Some(trade_box);
        self.buy_ts = Some(tick.timestamp);
        self.buy_price = Some(price);
        self.state = TradeState::Holding;
        info!(
          symbol = %self.symbol,
          trade_id = self.id.0,
          pattern_id = self.pattern_id.0,
          ts = tick.timestamp,
          price,
          stop = trade_box.stop_loss_current,
          limit = trade_box.sell_limit_current,
          strategy = ?self.trade_strategy,
          simulation = self.is_simulation,
          "trade filled"
        );
        TradeEvent::Bought { price, ts: tick.timestamp }
      },
      Err(reason) => self.cancel(reason, tick.timestamp),
    }
  }

  fn on_holding_tick(&mut self, tick: &WaveTick, sma: Option<f64>) -> Option<TradeEvent> {
    let trade_box = self.trade_box.as_mut()?;
    match trade_box.on_tick(tick, sma) {
      BoxStep::Hold => {
        self.stop_loss_history.push(trade_box.stop_loss_current);
        None
      },
      BoxStep::Sell { price, reason } => Some(self.sell(price, tick.timestamp, reason)),
      BoxStep::Violation(message) => Some(self.cancel(CancelReason::InvariantViolation(message), tick.timestamp)),
    }
  }

  fn sell(&mut self, price: f64, ts: i64, reason: SellReason) -> TradeEvent {
    self.state = TradeState::Selling;
    self.sell_ts = Some(ts);
    self.sell_price = Some(price);
    self.sell_reason = Some(reason);
    self.state = TradeState::Closed;
    info!(
      symbol = %self.symbol,
      trade_id = self.id.0,
      pattern_id = self.pattern_id.0,
      ts,
      price,
      reason = ?reason,
      result_pct = self.trade_result_pct().unwrap_or_default(),
      "trade sold"
    );
    TradeEvent::Sold { price, ts, reason }
  }

  fn cancel(&mut self, reason: CancelReason, ts: i64) -> TradeEvent {
    if let CancelReason::InvariantViolation(message) = &reason {
      error!(
        symbol = %self.symbol,
        trade_id = self.id.0,
        pattern_id = self.pattern_id.0,
        ts,
        message = %message,
        "trade box invariant violated"
      );
    }
    self.state = TradeState::Cancelled(reason.clone());
    TradeEvent::Cancelled { ts, reason }
  }

  /// Close from outside: holding trades sell at the last close, watching trades are cancelled.
  ///
  /// A trade filled on `last_tick` itself sells on that tick too, so its
  /// `sell_ts` equals `buy_ts`. Only [`SellReason::Forced`] allows that.
  pub fn force_close(&mut self, reason: &str, last_tick: &WaveTick) -> Option<TradeEvent> {
    match self.state {
      TradeState::Holding => {
        let ts = self.buy_ts.map_or(last_tick.timestamp, |buy_ts| buy_ts.max(last_tick.timestamp));
        Some(self.sell(last_tick.close, ts, SellReason::Forced))
      },
      _ if self.state.is_open() => {
        Some(self.cancel(CancelReason::ClosedByCaller(reason.to_string()), last_tick.timestamp))
      },
      _ => None,
    }
  }
}
