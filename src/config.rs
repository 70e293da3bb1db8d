//! Detection and paper-trading configuration
//!
//! One flat, serializable record threaded through every call. Defaults
//! depend on the bar period (daily or intraday with its aggregation); the
//! tolerance pair is derived in a single place, [`default_tolerances`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{
  params::{find_meta, get_period, get_ratio, get_value, ParamMeta, Parameterized},
  pattern_type::{PatternType, PatternTypeParams, SlopeThresholds},
  CoreError, Period, Ratio, Result,
};

// ============================================================
// ENUMERATED OPTIONS
// ============================================================

/// Base bar period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePeriod {
  Daily,
  Intraday,
}

impl TimePeriod {
  /// Seconds per base unit (a day, or a minute for intraday)
  pub fn base_seconds(self) -> i64 {
    match self {
      TimePeriod::Daily => 86_400,
      TimePeriod::Intraday => 60,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      TimePeriod::Daily => "daily",
      TimePeriod::Intraday => "intraday",
    }
  }
}

/// Rounding policy applied to exported prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricePrecision {
  /// 2 decimals
  Equity,
  /// 4 decimals
  FxCrypto,
}

impl PricePrecision {
  pub fn decimals(self) -> i32 {
    match self {
      PricePrecision::Equity => 2,
      PricePrecision::FxCrypto => 4,
    }
  }

  pub fn round_price(self, value: f64) -> f64 {
    round_to(value, self.decimals())
  }

  /// Percentages are kept in basis points
  pub fn round_pct(value: f64) -> f64 {
    round_to(value, 2)
  }
}

fn round_to(value: f64, decimals: i32) -> f64 {
  if !value.is_finite() {
    return value;
  }
  let factor = 10f64.powi(decimals);
  (value * factor).round() / factor
}

/// Event that opens a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyTrigger {
  Breakout,
  TouchPoint,
}

/// How stop and limit evolve after entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStrategy {
  Limit,
  LimitFix,
  TrailingStop,
  TrailingSteppedStop,
  Sma,
}

impl TradeStrategy {
  pub fn is_trailing(self) -> bool {
    matches!(
      self,
      TradeStrategy::TrailingStop | TradeStrategy::TrailingSteppedStop | TradeStrategy::Sma
    )
  }
}

/// Source of the trade box height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeBoxKind {
  ExpectedWin,
  TouchPoint,
  ForecastHalfLength,
  ForecastFullLength,
  Fibonacci,
}

// ============================================================
// TOLERANCES
// ============================================================

/// `(tolerance_pct, tolerance_pct_equal)` for a bar period.
///
/// The equal tolerance is half the touch tolerance so that every `on`
/// categorization is also an `in` categorization.
pub fn default_tolerances(period: TimePeriod, period_aggregation: u32) -> (f64, f64) {
  let tolerance = match period {
    TimePeriod::Daily => 0.005,
    TimePeriod::Intraday => match period_aggregation {
      0..=4 => 0.0002,
      5 => 0.0005,
      _ => 0.001,
    },
  };
  (tolerance, tolerance / 2.0)
}

// ============================================================
// CONFIG
// ============================================================

/// Complete set of detection and trading knobs for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
  pub period: TimePeriod,
  /// Base units per bar (days for daily, minutes for intraday)
  pub period_aggregation: u32,

  pub length_for_global_min_max: Period,
  pub length_for_local_min_max: Period,
  pub max_range_length: Period,
  /// Tick window capacity is `length_for_global_min_max * tick_window_factor`
  pub tick_window_factor: Period,

  pub tolerance_pct: f64,
  pub tolerance_pct_equal: f64,
  /// Neighbor distance below which an extremum is hidden
  pub hide_pct: f64,
  /// Relative tolerance around Fibonacci ratios
  pub fibonacci_tolerance_pct: Ratio,
  /// Breakout margin as a fraction of the range height
  pub breakout_range_pct: Ratio,
  /// Shoulder height difference allowed as a fraction of head height
  pub shoulder_symmetry_pct: Ratio,
  pub slope_thresholds: SlopeThresholds,

  pub tolerance_pct_buying: f64,
  /// Highest accepted fill above the trigger boundary, in percent
  pub buy_limit_pct: f64,
  /// Stop/limit distance for `LimitFix`, in percent of the buy price
  pub limit_fix_pct: f64,
  /// Minimal expected win relative to price, in percent
  pub expected_win_pct: f64,
  pub sma_period: Period,
  pub breakout_box_kind: TradeBoxKind,
  pub trade_strategy_dict: BTreeMap<BuyTrigger, Vec<TradeStrategy>>,

  pub price_precision: PricePrecision,
  pub pattern_types: Vec<PatternType>,
  /// Overrides of the per-type defaults
  pub pattern_type_params: BTreeMap<PatternType, PatternTypeParams>,
}

impl Default for Config {
  fn default() -> Self {
    Self::for_period(TimePeriod::Daily, 1)
  }
}

impl Config {
  /// Defaults for a bar period
  pub fn for_period(period: TimePeriod, period_aggregation: u32) -> Self {
    let (tolerance_pct, tolerance_pct_equal) = default_tolerances(period, period_aggregation);
    let mut trade_strategy_dict = BTreeMap::new();
    trade_strategy_dict.insert(
      BuyTrigger::Breakout,
      vec![TradeStrategy::Limit, TradeStrategy::TrailingStop],
    );
    trade_strategy_dict.insert(BuyTrigger::TouchPoint, vec![TradeStrategy::Limit]);

    Self {
      period,
      period_aggregation,
      length_for_global_min_max: Period::new_const(50),
      length_for_local_min_max: Period::new_const(2),
      max_range_length: Period::new_const(50),
      tick_window_factor: Period::new_const(4),
      tolerance_pct,
      tolerance_pct_equal,
      hide_pct: tolerance_pct / 5.0,
      fibonacci_tolerance_pct: Ratio::new_const(0.20),
      breakout_range_pct: Ratio::new_const(0.05),
      shoulder_symmetry_pct: Ratio::new_const(0.5),
      slope_thresholds: SlopeThresholds::default(),
      tolerance_pct_buying: 0.005,
      buy_limit_pct: 5.0,
      limit_fix_pct: 1.0,
      expected_win_pct: 1.0,
      sma_period: Period::new_const(10),
      breakout_box_kind: TradeBoxKind::ForecastFullLength,
      trade_strategy_dict,
      price_precision: PricePrecision::Equity,
      pattern_types: PatternType::ALL.to_vec(),
      pattern_type_params: BTreeMap::new(),
    }
  }

  /// Seconds between two consecutive ticks
  pub fn stride_seconds(&self) -> i64 {
    self.period.base_seconds() * i64::from(self.period_aggregation)
  }

  /// Maximum number of ticks kept in the window
  pub fn tick_window_capacity(&self) -> usize {
    self.length_for_global_min_max.get() * self.tick_window_factor.get()
  }

  pub fn is_enabled(&self, pattern_type: PatternType) -> bool {
    self.pattern_types.contains(&pattern_type)
  }

  /// Acceptance parameters of a type, override first
  pub fn params_for(&self, pattern_type: PatternType) -> PatternTypeParams {
    self.pattern_type_params
      .get(&pattern_type)
      .copied()
      .unwrap_or_else(|| pattern_type.default_params())
  }

  /// Maximum range length for a type
  pub fn max_range_length_for(&self, pattern_type: PatternType) -> usize {
    self.params_for(pattern_type)
      .max_range_length
      .unwrap_or(self.max_range_length.get())
      .min(self.max_range_length.get())
  }

  /// Touch tolerance for a type
  pub fn tolerance_for(&self, pattern_type: PatternType) -> f64 {
    self.tolerance_pct * self.params_for(pattern_type).tolerance_factor
  }

  /// All configured `(trigger, strategy)` pairs in a stable order
  pub fn trade_pairs(&self) -> Vec<(BuyTrigger, TradeStrategy)> {
    self.trade_strategy_dict
      .iter()
      .flat_map(|(trigger, strategies)| strategies.iter().map(move |s| (*trigger, *s)))
      .collect()
  }

  /// Check every numeric knob and the cross-field constraints
  pub fn validate(&self) -> Result<()> {
    self.validate_params()?;
    if self.tolerance_pct_equal > self.tolerance_pct {
      return Err(CoreError::InvalidConfig(format!(
        "tolerance_pct_equal ({}) must not exceed tolerance_pct ({})",
        self.tolerance_pct_equal, self.tolerance_pct
      )));
    }
    if self.length_for_global_min_max < self.length_for_local_min_max {
      return Err(CoreError::InvalidConfig(
        "length_for_global_min_max must be >= length_for_local_min_max".to_string(),
      ));
    }
    if self.tick_window_capacity() <= self.max_range_length.get() {
      return Err(CoreError::InvalidConfig(
        "tick window must be longer than max_range_length".to_string(),
      ));
    }
    let SlopeThresholds { flat_pct, channel_diff_pct } = self.slope_thresholds;
    if !(flat_pct.is_finite() && flat_pct >= 0.0 && channel_diff_pct.is_finite() && channel_diff_pct >= 0.0) {
      return Err(CoreError::InvalidConfig("slope thresholds must be finite and >= 0".to_string()));
    }
    for (pattern_type, params) in &self.pattern_type_params {
      if params.breakout_confirmation_ticks == 0 {
        return Err(CoreError::InvalidConfig(format!(
          "{pattern_type}: breakout_confirmation_ticks must be > 0"
        )));
      }
      if !(params.tolerance_factor.is_finite() && params.tolerance_factor > 0.0) {
        return Err(CoreError::InvalidConfig(format!(
          "{pattern_type}: tolerance_factor must be > 0"
        )));
      }
    }
    Ok(())
  }
}

// ============================================================
// PARAMETER METADATA
// ============================================================

static CONFIG_PARAMS: [ParamMeta; 16] = [
  ParamMeta::period("period_aggregation", 1.0, (1.0, 1440.0, 1.0), "Base units per bar"),
  ParamMeta::period(
    "length_for_global_min_max",
    50.0,
    (10.0, 200.0, 10.0),
    "Neighbor distance for global extrema",
  ),
  ParamMeta::period("length_for_local_min_max", 2.0, (1.0, 10.0, 1.0), "Neighbor distance for local extrema"),
  ParamMeta::period("max_range_length", 50.0, (5.0, 500.0, 5.0), "Maximum range length in ticks"),
  ParamMeta::period("tick_window_factor", 4.0, (2.0, 20.0, 1.0), "Tick window as multiple of the global length"),
  ParamMeta::value("tolerance_pct", 0.005, (0.00001, 0.1, 0.0005), "Relative touch tolerance"),
  ParamMeta::value("tolerance_pct_equal", 0.0025, (0.0, 0.1, 0.0005), "Relative on-line tolerance"),
  ParamMeta::value("hide_pct", 0.001, (0.0, 0.1, 0.0005), "Hidden extremum distance"),
  ParamMeta::ratio("fibonacci_tolerance_pct", 0.2, (0.0, 1.0, 0.05), "Relative tolerance around Fibonacci ratios"),
  ParamMeta::ratio("breakout_range_pct", 0.05, (0.0, 1.0, 0.01), "Breakout margin as fraction of height"),
  ParamMeta::ratio("shoulder_symmetry_pct", 0.5, (0.0, 1.0, 0.05), "Shoulder difference as fraction of head"),
  ParamMeta::value("tolerance_pct_buying", 0.005, (0.0, 0.1, 0.001), "Relative body crossing for a buy"),
  ParamMeta::value("buy_limit_pct", 5.0, (0.0, 50.0, 0.5), "Fill limit above the trigger boundary (%)"),
  ParamMeta::value("limit_fix_pct", 1.0, (0.01, 50.0, 0.5), "Fixed stop/limit distance (%)"),
  ParamMeta::value("expected_win_pct", 1.0, (0.0, 100.0, 0.5), "Minimal expected win (%)"),
  ParamMeta::period("sma_period", 10.0, (2.0, 200.0, 1.0), "SMA length for the SMA strategy"),
];

impl Parameterized for Config {
  fn param_meta() -> &'static [ParamMeta] {
    &CONFIG_PARAMS
  }

  fn param_values(&self) -> Vec<(&'static str, f64)> {
    vec![
      ("period_aggregation", f64::from(self.period_aggregation)),
      ("length_for_global_min_max", self.length_for_global_min_max.get() as f64),
      ("length_for_local_min_max", self.length_for_local_min_max.get() as f64),
      ("max_range_length", self.max_range_length.get() as f64),
      ("tick_window_factor", self.tick_window_factor.get() as f64),
      ("tolerance_pct", self.tolerance_pct),
      ("tolerance_pct_equal", self.tolerance_pct_equal),
      ("hide_pct", self.hide_pct),
      ("fibonacci_tolerance_pct", self.fibonacci_tolerance_pct.get()),
      ("breakout_range_pct", self.breakout_range_pct.get()),
      ("shoulder_symmetry_pct", self.shoulder_symmetry_pct.get()),
      ("tolerance_pct_buying", self.tolerance_pct_buying),
      ("buy_limit_pct", self.buy_limit_pct),
      ("limit_fix_pct", self.limit_fix_pct),
      ("expected_win_pct", self.expected_win_pct),
      ("sma_period", self.sma_period.get() as f64),
    ]
  }

  fn with_params(&self, params: &HashMap<&str, f64>) -> Result<Self> {
    if let Some(unknown) = params.keys().find(|k| find_meta(Self::param_meta(), k).is_none()) {
      return Err(CoreError::InvalidConfig(format!("unknown parameter '{unknown}'")));
    }

    let aggregation = get_period(params, "period_aggregation", self.period_aggregation as usize)?;
    let period_aggregation = u32::try_from(aggregation.get())
      .map_err(|_| CoreError::InvalidValue("period_aggregation too large"))?;

    // A new aggregation re-derives the tolerance pair unless both are given
    let (tolerance_pct, tolerance_pct_equal) = if period_aggregation != self.period_aggregation {
      default_tolerances(self.period, period_aggregation)
    } else {
      (self.tolerance_pct, self.tolerance_pct_equal)
    };

    let config = Self {
      period_aggregation,
      length_for_global_min_max: get_period(
        params,
        "length_for_global_min_max",
        self.length_for_global_min_max.get(),
      )?,
      length_for_local_min_max: get_period(
        params,
        "length_for_local_min_max",
        self.length_for_local_min_max.get(),
      )?,
      max_range_length: get_period(params, "max_range_length", self.max_range_length.get())?,
      tick_window_factor: get_period(params, "tick_window_factor", self.tick_window_factor.get())?,
      tolerance_pct: get_value(params, "tolerance_pct", tolerance_pct),
      tolerance_pct_equal: get_value(params, "tolerance_pct_equal", tolerance_pct_equal),
      hide_pct: get_value(params, "hide_pct", self.hide_pct),
      fibonacci_tolerance_pct: get_ratio(
        params,
        "fibonacci_tolerance_pct",
        self.fibonacci_tolerance_pct.get(),
      )?,
      breakout_range_pct: get_ratio(params, "breakout_range_pct", self.breakout_range_pct.get())?,
      shoulder_symmetry_pct: get_ratio(
        params,
        "shoulder_symmetry_pct",
        self.shoulder_symmetry_pct.get(),
      )?,
      tolerance_pct_buying: get_value(params, "tolerance_pct_buying", self.tolerance_pct_buying),
      buy_limit_pct: get_value(params, "buy_limit_pct", self.buy_limit_pct),
      limit_fix_pct: get_value(params, "limit_fix_pct", self.limit_fix_pct),
      expected_win_pct: get_value(params, "expected_win_pct", self.expected_win_pct),
      sma_period: get_period(params, "sma_period", self.sma_period.get())?,
      ..self.clone()
    };
    config.validate()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_tolerances() {
    assert_eq!(default_tolerances(TimePeriod::Daily, 1), (0.005, 0.0025));
    assert_eq!(default_tolerances(TimePeriod::Intraday, 1).0, 0.0002);
    assert_eq!(default_tolerances(TimePeriod::Intraday, 4).0, 0.0002);
    assert_eq!(default_tolerances(TimePeriod::Intraday, 5).0, 0.0005);
    assert_eq!(default_tolerances(TimePeriod::Intraday, 15).0, 0.001);
  }

  #[test]
  fn test_default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.stride_seconds(), 86_400);
    assert_eq!(config.tick_window_capacity(), 200);
    assert_eq!(Config::for_period(TimePeriod::Intraday, 5).stride_seconds(), 300);
  }

  #[test]
  fn test_equal_tolerance_cannot_exceed_tolerance() {
    let config = Config { tolerance_pct_equal: 0.01, ..Config::default() };
    assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
  }

  #[test]
  fn test_with_params_overrides_and_validates() {
    let mut params = HashMap::new();
    params.insert("max_range_length", 30.0);
    params.insert("breakout_range_pct", 0.1);
    let config = Config::default().with_params(&params).unwrap();
    assert_eq!(config.max_range_length.get(), 30);
    assert!((config.breakout_range_pct.get() - 0.1).abs() < 1e-12);

    params.insert("breakout_range_pct", 1.5);
    assert!(Config::default().with_params(&params).is_err());

    let mut unknown = HashMap::new();
    unknown.insert("no_such_knob", 1.0);
    assert!(Config::default().with_params(&unknown).is_err());
  }

  #[test]
  fn test_with_params_rederives_tolerances_for_aggregation() {
    let intraday = Config::for_period(TimePeriod::Intraday, 1);
    let mut params = HashMap::new();
    params.insert("period_aggregation", 5.0);
    let config = intraday.with_params(&params).unwrap();
    assert_eq!(config.tolerance_pct, 0.0005);
    assert_eq!(config.tolerance_pct_equal, 0.00025);
  }

  #[test]
  fn test_params_table_override() {
    let mut config = Config::default();
    let custom = PatternTypeParams { breakout_confirmation_ticks: 3, ..PatternTypeParams::default() };
    config.pattern_type_params.insert(PatternType::Triangle, custom);
    assert_eq!(config.params_for(PatternType::Triangle).breakout_confirmation_ticks, 3);
    assert_eq!(config.params_for(PatternType::Channel).breakout_confirmation_ticks, 1);
    assert_eq!(config.max_range_length_for(PatternType::Triangle), 50);
  }

  #[test]
  fn test_trade_pairs_order_is_stable() {
    let pairs = Config::default().trade_pairs();
    assert_eq!(
      pairs,
      vec![
        (BuyTrigger::Breakout, TradeStrategy::Limit),
        (BuyTrigger::Breakout, TradeStrategy::TrailingStop),
        (BuyTrigger::TouchPoint, TradeStrategy::Limit),
      ]
    );
  }

  #[test]
  fn test_price_precision() {
    assert_eq!(PricePrecision::Equity.round_price(10.12345), 10.12);
    assert_eq!(PricePrecision::FxCrypto.round_price(1.234567), 1.2346);
    assert_eq!(PricePrecision::round_pct(3.14159), 3.14);
  }

  #[test]
  fn test_config_serde_round_trip() {
    let config = Config::default();
    let json = serde_json::to_string(&config).unwrap();
    let back: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(config, back);
  }

  #[test]
  fn test_param_grid_for_config_knob() {
    let meta = find_meta(Config::param_meta(), "length_for_local_min_max").unwrap();
    assert_eq!(meta.generate_grid().len(), 10);
  }
}
