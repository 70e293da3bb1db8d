//! # chartpat - chart pattern detection and paper-trading core
//!
//! Consumes an ordered stream of OHLCV candles for one instrument and emits
//! geometric chart patterns (triangles, channels, head-and-shoulders, TKE,
//! Fibonacci waves), their boundary functions, forecasts and simulated trade
//! boxes that evolve as new candles arrive.
//!
//! ## Quick Start
//!
//! ```rust
//! use chartpat::prelude::*;
//!
//! let mut detector = DetectorBuilder::new("MSFT")
//!     .period(TimePeriod::Daily, 1)
//!     .build()
//!     .unwrap();
//!
//! let day = 86_400;
//! for i in 0..10_i64 {
//!     let base = 100.0 + i as f64;
//!     let candle = Candle::new(i * day, base, base + 1.0, base - 1.0, base + 0.5, 1000.0);
//!     detector.push_candle(candle).unwrap();
//! }
//!
//! let records = detector.pattern_records();
//! assert!(records.iter().all(|r| r.symbol == "MSFT"));
//! ```

pub mod categorizer;
pub mod config;
pub mod detectors;
pub mod function;
pub mod orchestrator;
pub mod params;
pub mod pattern;
pub mod pattern_data;
pub mod pattern_type;
pub mod predictor;
pub mod range;
pub mod records;
pub mod tick;
pub mod trade;

pub mod prelude {
  pub use crate::{
    // Categorization
    categorizer::{BoundaryPair, CategorySet, ValueCategorizer, ValueCategory},
    // Configuration
    config::{BuyTrigger, Config, PricePrecision, TimePeriod, TradeBoxKind, TradeStrategy},
    // Detectors
    detectors::{FibonacciWave, FibonacciWaveTree, PatternRangeDetector, WaveComponent, WaveKind},
    function::LinearFunction,
    // Orchestration
    orchestrator::{Detector, DetectorBuilder, TickReport},
    params::{ParamMeta, ParamType, Parameterized},
    // Parallel
    process_parallel,
    pattern::{Breakout, Forecast, Pattern, PatternEvent, PatternId, PatternPart, PatternState},
    pattern_data::PatternData,
    pattern_type::{PatternType, PatternTypeParams},
    predictor::{FeatureRow, Prediction, Predictor, RuleBasedPredictor},
    range::{PatternRange, RangeRejection},
    records::{PatternRecord, ResultClass, TradeRecord, WaveRecord},
    tick::{Candle, CandleInput, TickList, WaveTick},
    trade::{
      CancelReason, SellReason, Trade, TradeBox, TradeCandidate, TradeCandidateController,
      TradeEvent, TradeId, TradeState,
    },
    // Errors
    CoreError,
    // Types
    Direction,
    InstrumentError,
    InstrumentResult,
    OHLCVExt,
    Period,
    Ratio,
    Result,
    Side,
    OHLCV,
  };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced to the caller.
///
/// Per-pattern and per-trade problems never show up here; they are reported
/// as rejection values or trade states. Only input and configuration faults
/// are fatal for the call that produced them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
  #[error("Invalid value: {0}")]
  InvalidValue(&'static str),

  #[error("{field} = {value} out of range [{min}, {max}]")]
  OutOfRange {
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
  },

  #[error("Invalid config: {0}")]
  InvalidConfig(String),

  #[error("Invalid OHLCV at timestamp {timestamp}: {reason}")]
  InvalidCandle { timestamp: i64, reason: &'static str },

  #[error("Tick at {timestamp} is older than last seen tick at {last_timestamp}")]
  OutOfOrder { timestamp: i64, last_timestamp: i64 },

  #[error("Duplicate tick at {timestamp}")]
  Duplicate { timestamp: i64 },

  #[error("Tick stride mismatch: expected {expected}s, got {got}s")]
  StrideMismatch { expected: i64, got: i64 },

  #[error("Candle for {got} pushed into detector for {expected}")]
  SymbolMismatch { expected: String, got: String },

  #[error("Candle period {got} does not match detector period {expected}")]
  PeriodMismatch { expected: String, got: String },
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
  /// Create a new Ratio, validating the value is in [0.0, 1.0]
  pub fn new(value: f64) -> Result<Self> {
    if value.is_nan() || value.is_infinite() {
      return Err(CoreError::InvalidValue("Ratio cannot be NaN or infinite"));
    }
    if !(0.0..=1.0).contains(&value) {
      return Err(CoreError::OutOfRange {
        field: "Ratio",
        value,
        min: 0.0,
        max: 1.0,
      });
    }
    Ok(Self(value))
  }

  /// Create a Ratio from a compile-time constant (library internal use)
  #[doc(hidden)]
  pub const fn new_const(value: f64) -> Self {
    Self(value)
  }

  #[inline]
  pub fn get(self) -> f64 {
    self.0
  }
}

impl serde::Serialize for Ratio {
  fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
    self.0.serialize(s)
  }
}

impl<'de> serde::Deserialize<'de> for Ratio {
  fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
    let value = f64::deserialize(d)?;
    Ratio::new(value).map_err(serde::de::Error::custom)
  }
}

/// Tick count (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
  /// Create a new Period, validating value is > 0
  pub fn new(value: usize) -> Result<Self> {
    if value == 0 {
      return Err(CoreError::InvalidValue("Period must be > 0"));
    }
    Ok(Self(value))
  }

  #[doc(hidden)]
  pub const fn new_const(value: usize) -> Self {
    Self(value)
  }

  #[inline]
  pub fn get(self) -> usize {
    self.0
  }
}

impl serde::Serialize for Period {
  fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
    self.0.serialize(s)
  }
}

impl<'de> serde::Deserialize<'de> for Period {
  fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
    let value = usize::deserialize(d)?;
    Period::new(value).map_err(serde::de::Error::custom)
  }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
  fn open(&self) -> f64;
  fn high(&self) -> f64;
  fn low(&self) -> f64;
  fn close(&self) -> f64;
  fn volume(&self) -> f64;

  fn timestamp(&self) -> Option<i64> {
    None
  }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
  #[inline]
  fn body(&self) -> f64 {
    (self.close() - self.open()).abs()
  }

  #[inline]
  fn body_top(&self) -> f64 {
    self.open().max(self.close())
  }

  #[inline]
  fn body_bottom(&self) -> f64 {
    self.open().min(self.close())
  }

  #[inline]
  fn range(&self) -> f64 {
    self.high() - self.low()
  }

  #[inline]
  fn is_bullish(&self) -> bool {
    self.close() > self.open()
  }

  #[inline]
  fn is_bearish(&self) -> bool {
    self.close() < self.open()
  }

  /// Validate OHLCV data consistency
  fn validate(&self) -> Result<()> {
    let timestamp = self.timestamp().unwrap_or_default();
    let values = [self.open(), self.high(), self.low(), self.close(), self.volume()];
    if values.iter().any(|v| v.is_nan()) {
      return Err(CoreError::InvalidCandle { timestamp, reason: "NaN in OHLCV" });
    }
    if values.iter().any(|v| v.is_infinite()) {
      return Err(CoreError::InvalidCandle {
        timestamp,
        reason: "Infinite value in OHLCV",
      });
    }
    if values.iter().any(|v| *v < 0.0) {
      return Err(CoreError::InvalidCandle { timestamp, reason: "negative value in OHLCV" });
    }
    if self.high() < self.low() {
      return Err(CoreError::InvalidCandle { timestamp, reason: "high < low" });
    }
    if self.body_top() > self.high() || self.body_bottom() < self.low() {
      return Err(CoreError::InvalidCandle {
        timestamp,
        reason: "open/close outside high/low",
      });
    }
    Ok(())
  }
}

impl<T: OHLCV> OHLCVExt for T {}

// ============================================================
// DIRECTION / SIDE
// ============================================================

/// Direction of a move, breakout or wave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
  Ascending,
  Neutral,
  Descending,
}

impl Direction {
  #[inline]
  pub fn is_ascending(self) -> bool {
    matches!(self, Direction::Ascending)
  }

  #[inline]
  pub fn is_descending(self) -> bool {
    matches!(self, Direction::Descending)
  }

  pub fn opposite(self) -> Self {
    match self {
      Direction::Ascending => Direction::Descending,
      Direction::Descending => Direction::Ascending,
      Direction::Neutral => Direction::Neutral,
    }
  }

  /// +1 / 0 / -1
  pub fn sign(self) -> f64 {
    match self {
      Direction::Ascending => 1.0,
      Direction::Neutral => 0.0,
      Direction::Descending => -1.0,
    }
  }
}

/// Upper (highs, maxima, ceilings) or lower (lows, minima, floors) side of a range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
  Upper,
  Lower,
}

impl Side {
  #[inline]
  pub fn opposite(self) -> Self {
    match self {
      Side::Upper => Side::Lower,
      Side::Lower => Side::Upper,
    }
  }

  /// The extreme value of a bar on this side (high for upper, low for lower)
  #[inline]
  pub fn value<T: OHLCV>(self, bar: &T) -> f64 {
    match self {
      Side::Upper => bar.high(),
      Side::Lower => bar.low(),
    }
  }

  /// How far `value` lies outside `boundary` on this side; negative when inside
  #[inline]
  pub fn excess(self, value: f64, boundary: f64) -> f64 {
    match self {
      Side::Upper => value - boundary,
      Side::Lower => boundary - value,
    }
  }

  /// True if `a` is strictly more extreme than `b` on this side
  #[inline]
  pub fn is_beyond(self, a: f64, b: f64) -> bool {
    self.excess(a, b) > 0.0
  }

  /// Body edge facing this side
  #[inline]
  pub fn body_edge<T: OHLCV>(self, bar: &T) -> f64 {
    match self {
      Side::Upper => bar.body_top(),
      Side::Lower => bar.body_bottom(),
    }
  }

  /// Direction of a move that leaves the range through this side
  pub fn breakout_direction(self) -> Direction {
    match self {
      Side::Upper => Direction::Ascending,
      Side::Lower => Direction::Descending,
    }
  }
}

// ============================================================
// PARALLEL PROCESSING
// ============================================================

use rayon::prelude::*;

use crate::{
  config::Config,
  orchestrator::DetectorBuilder,
  predictor::Predictor,
  records::{PatternRecord, TradeRecord, WaveRecord},
  tick::Candle,
};

/// Result of processing a single instrument
#[derive(Debug)]
pub struct InstrumentResult {
  pub symbol: String,
  pub patterns: Vec<PatternRecord>,
  pub trades: Vec<TradeRecord>,
  pub waves: Vec<WaveRecord>,
}

/// Error from processing a single instrument
#[derive(Debug)]
pub struct InstrumentError {
  pub symbol: String,
  pub error: CoreError,
}

/// Run independent detectors for many instruments in parallel.
///
/// Every worker owns its own detector; nothing mutable is shared. Records
/// evicted from a detector during the run are collected from its tick reports,
/// so each result holds every pattern, trade and wave of the stream. The first
/// fatal error of an instrument stops that instrument only.
pub fn process_parallel<'a, P, I>(
  config: &Config,
  predictor: &P,
  instruments: I,
) -> (Vec<InstrumentResult>, Vec<InstrumentError>)
where
  P: Predictor + Clone + Send + Sync,
  I: IntoParallelIterator<Item = (&'a str, &'a [Candle])>,
{
  let results: Vec<_> = instruments
    .into_par_iter()
    .map(|(symbol, candles)| {
      let run = || -> Result<InstrumentResult> {
        let mut detector = DetectorBuilder::new(symbol)
          .config(config.clone())
          .predictor(predictor.clone())
          .build()?;
        let mut patterns = Vec::new();
        let mut trades = Vec::new();
        let mut waves = Vec::new();
        for candle in candles {
          let report = detector.push_candle(*candle)?;
          patterns.extend(report.archived_patterns);
          trades.extend(report.archived_trades);
          waves.extend(report.archived_waves);
        }
        patterns.extend(detector.pattern_records());
        trades.extend(detector.trade_records());
        waves.extend(detector.wave_records());
        patterns.sort_by_key(|r| r.pattern_id);
        trades.sort_by_key(|r| r.trade_id);
        waves.sort_by_key(|w| (w.start_ts, w.end_ts));
        Ok(InstrumentResult { symbol: symbol.to_string(), patterns, trades, waves })
      };
      run().map_err(|error| InstrumentError {
        symbol: symbol.to_string(),
        error,
      })
    })
    .collect();

  let mut successes = Vec::new();
  let mut errors = Vec::new();

  for result in results {
    match result {
      Ok(r) => successes.push(r),
      Err(e) => errors.push(e),
    }
  }

  (successes, errors)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Clone)]
  struct Bar {
    o: f64,
    h: f64,
    l: f64,
    c: f64,
  }

  impl OHLCV for Bar {
    fn open(&self) -> f64 {
      self.o
    }

    fn high(&self) -> f64 {
      self.h
    }

    fn low(&self) -> f64 {
      self.l
    }

    fn close(&self) -> f64 {
      self.c
    }

    fn volume(&self) -> f64 {
      1000.0
    }
  }

  fn trending_candles(n: i64, step: f64) -> Vec<Candle> {
    (0..n)
      .map(|i| {
        let base = 100.0 + i as f64 * step;
        Candle::new(i * 86_400, base, base + 1.0, base - 1.0, base + 0.5 * step.signum(), 1000.0)
      })
      .collect()
  }

  #[test]
  fn test_ratio_validation() {
    assert!(Ratio::new(0.0).is_ok());
    assert!(Ratio::new(1.0).is_ok());
    assert!(Ratio::new(0.5).is_ok());
    assert!(Ratio::new(-0.1).is_err());
    assert!(Ratio::new(1.1).is_err());
    assert!(Ratio::new(f64::NAN).is_err());
    assert!(Ratio::new(f64::INFINITY).is_err());
  }

  #[test]
  fn test_period_validation() {
    assert!(Period::new(1).is_ok());
    assert!(Period::new(100).is_ok());
    assert!(Period::new(0).is_err());
  }

  #[test]
  fn test_ohlcv_ext() {
    let bar = Bar { o: 100.0, h: 110.0, l: 90.0, c: 105.0 };
    assert_eq!(bar.body(), 5.0);
    assert_eq!(bar.range(), 20.0);
    assert_eq!(bar.body_top(), 105.0);
    assert_eq!(bar.body_bottom(), 100.0);
    assert!(bar.is_bullish());
    assert!(!bar.is_bearish());
    assert!(bar.validate().is_ok());
  }

  #[test]
  fn test_ohlcv_validation_rejects_inconsistent_bars() {
    let inverted = Bar { o: 100.0, h: 90.0, l: 110.0, c: 100.0 };
    assert!(inverted.validate().is_err());
    let close_above_high = Bar { o: 100.0, h: 101.0, l: 99.0, c: 102.0 };
    assert!(close_above_high.validate().is_err());
    let nan = Bar { o: f64::NAN, h: 101.0, l: 99.0, c: 100.0 };
    assert!(nan.validate().is_err());
  }

  #[test]
  fn test_side_helpers() {
    assert_eq!(Side::Upper.opposite(), Side::Lower);
    assert_eq!(Side::Upper.excess(105.0, 100.0), 5.0);
    assert_eq!(Side::Lower.excess(95.0, 100.0), 5.0);
    assert!(Side::Lower.is_beyond(95.0, 100.0));
    assert!(!Side::Upper.is_beyond(95.0, 100.0));
    assert_eq!(Side::Upper.breakout_direction(), Direction::Ascending);
  }

  #[test]
  fn test_direction_sign() {
    assert_eq!(Direction::Ascending.sign(), 1.0);
    assert_eq!(Direction::Descending.sign(), -1.0);
    assert_eq!(Direction::Neutral.sign(), 0.0);
    assert_eq!(Direction::Ascending.opposite(), Direction::Descending);
  }

  #[test]
  fn test_parallel_processing() {
    let up = trending_candles(30, 1.0);
    let down = trending_candles(30, -1.0);
    let config = Config::default();
    let predictor = predictor::RuleBasedPredictor;

    let instruments: Vec<(&str, &[Candle])> = vec![("AAPL", &up), ("GOOGL", &down)];
    let (results, errors) = process_parallel(&config, &predictor, instruments);
    assert_eq!(results.len(), 2);
    assert!(errors.is_empty());
  }

  #[test]
  fn test_parallel_processing_reports_bad_stream() {
    let mut broken = trending_candles(10, 1.0);
    broken.swap(3, 4);
    let good = trending_candles(10, 1.0);
    let config = Config::default();

    let instruments: Vec<(&str, &[Candle])> = vec![("BAD", &broken), ("GOOD", &good)];
    let (results, errors) = process_parallel(&config, &predictor::RuleBasedPredictor, instruments);
    assert_eq!(results.len(), 1);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].symbol, "BAD");
    assert!(matches!(errors[0].error, CoreError::StrideMismatch { .. }));
  }
}
