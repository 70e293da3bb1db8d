//! Per-instrument detector driving ticks, ranges, patterns and trades

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::{
  config::{default_tolerances, Config, TimePeriod},
  detectors::{FibonacciWave, FibonacciWaveTree, HeadShoulderDetector, PatternRangeDetector, WaveKey},
  pattern::{Pattern, PatternEvent, PatternId},
  pattern_data::PatternData,
  predictor::{Predictor, RuleBasedPredictor},
  range::PatternRange,
  records::{PatternRecord, TradeRecord, WaveRecord},
  tick::{Candle, CandleInput, TickList, WaveTick},
  trade::{Trade, TradeCandidateController, TradeEvent, TradeId},
  CoreError, Result,
};

// ============================================================
// BUILDER
// ============================================================

/// Builder for [`Detector`] instances
pub struct DetectorBuilder<P: Predictor = RuleBasedPredictor> {
  symbol: String,
  config: Config,
  predictor: P,
}

impl DetectorBuilder<RuleBasedPredictor> {
  pub fn new(symbol: impl Into<String>) -> Self {
    Self { symbol: symbol.into(), config: Config::default(), predictor: RuleBasedPredictor }
  }
}

impl<P: Predictor> DetectorBuilder<P> {
  /// Bar period; resets the tolerances to the defaults of that period
  pub fn period(mut self, period: TimePeriod, period_aggregation: u32) -> Self {
    let (tolerance_pct, tolerance_pct_equal) = default_tolerances(period, period_aggregation);
    self.config.period = period;
    self.config.period_aggregation = period_aggregation;
    self.config.tolerance_pct = tolerance_pct;
    self.config.tolerance_pct_equal = tolerance_pct_equal;
    self.config.hide_pct = tolerance_pct / 5.0;
    self
  }

  /// Replace the whole configuration
  pub fn config(mut self, config: Config) -> Self {
    self.config = config;
    self
  }

  /// Change the forecast source
  pub fn predictor<Q: Predictor>(self, predictor: Q) -> DetectorBuilder<Q> {
    DetectorBuilder { symbol: self.symbol, config: self.config, predictor }
  }

  /// Build the detector
  pub fn build(self) -> Result<Detector<P>> {
    if self.symbol.trim().is_empty() {
      return Err(CoreError::InvalidConfig("symbol must not be empty".to_string()));
    }
    self.config.validate()?;
    Ok(Detector {
      tick_list: TickList::for_config(&self.config),
      symbol: self.symbol,
      config: self.config,
      predictor: self.predictor,
      patterns: BTreeMap::new(),
      trades: BTreeMap::new(),
      controller: TradeCandidateController::new(),
      waves: BTreeMap::new(),
      current_ranges: Vec::new(),
      rejection_counts: BTreeMap::new(),
      retired: BTreeSet::new(),
      next_pattern_id: 1,
      next_trade_id: 1,
    })
  }
}

// ============================================================
// TICK REPORT
// ============================================================

/// What changed while processing one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
  pub timestamp: i64,
  pub new_patterns: Vec<PatternId>,
  pub updated_patterns: Vec<PatternId>,
  pub pattern_events: Vec<(PatternId, PatternEvent)>,
  pub new_trades: Vec<TradeId>,
  pub trade_events: Vec<(TradeId, TradeEvent)>,
  /// Fibonacci waves finished with this tick
  pub finished_waves: usize,
  /// Final records of patterns, trades and waves that left the tick window
  pub archived_patterns: Vec<PatternRecord>,
  pub archived_trades: Vec<TradeRecord>,
  pub archived_waves: Vec<WaveRecord>,
}

impl TickReport {
  pub fn is_empty(&self) -> bool {
    self.new_patterns.is_empty()
      && self.updated_patterns.is_empty()
      && self.pattern_events.is_empty()
      && self.new_trades.is_empty()
      && self.trade_events.is_empty()
      && self.finished_waves == 0
      && self.archived_patterns.is_empty()
      && self.archived_trades.is_empty()
      && self.archived_waves.is_empty()
  }
}

// ============================================================
// DETECTOR
// ============================================================

/// Single-instrument pipeline.
///
/// Owns the tick window, the pattern arena and its trades. A retired pattern
/// stays in the arena while its range is inside the tick window. Once the
/// range has left the window and none of its trades is open, the pattern and
/// its trades are evicted and their final records are handed out in
/// [`TickReport::archived_patterns`] and [`TickReport::archived_trades`].
/// Finished waves are evicted the same way once their first tick leaves the
/// window. Trades refer to patterns by id only.
pub struct Detector<P: Predictor = RuleBasedPredictor> {
  symbol: String,
  config: Config,
  predictor: P,
  tick_list: TickList,
  patterns: BTreeMap<PatternId, Pattern>,
  trades: BTreeMap<TradeId, Trade>,
  controller: TradeCandidateController,
  waves: BTreeMap<WaveKey, FibonacciWave>,
  current_ranges: Vec<PatternRange>,
  /// Rejection label to number of rejected candidates over all evaluations
  rejection_counts: BTreeMap<&'static str, usize>,
  retired: BTreeSet<PatternId>,
  next_pattern_id: u64,
  next_trade_id: u64,
}

/// Output of one detection pass over the tick window
struct Detection {
  ranges: Vec<PatternRange>,
  tree: FibonacciWaveTree,
  rejections: Vec<&'static str>,
}

fn detect(data: &PatternData) -> Detection {
  let mut ranges = Vec::new();
  let mut rejections = Vec::new();
  for detection in [PatternRangeDetector::new(data).detect(), HeadShoulderDetector::new(data).detect()] {
    ranges.extend(detection.ranges);
    rejections.extend(detection.rejections.iter().map(|r| r.reason.label()));
  }
  let tree = FibonacciWaveTree::build(data);
  ranges.extend(tree.fibonacci_ranges().iter().cloned());
  rejections.extend(tree.rejections().iter().map(|r| r.label()));
  ranges.retain(|r| data.config.is_enabled(r.pattern_type));
  Detection { ranges, tree, rejections }
}

impl<P: Predictor> Detector<P> {
  /// Push a provider candle; symbol and period must match the detector
  pub fn push(&mut self, input: &CandleInput) -> Result<TickReport> {
    if input.symbol != self.symbol {
      return Err(CoreError::SymbolMismatch { expected: self.symbol.clone(), got: input.symbol.clone() });
    }
    if input.period != self.config.period || input.period_aggregation != self.config.period_aggregation {
      return Err(CoreError::PeriodMismatch {
        expected: format!("{} x{}", self.config.period.as_str(), self.config.period_aggregation),
        got: format!("{} x{}", input.period.as_str(), input.period_aggregation),
      });
    }
    self.push_candle(input.candle())
  }

  /// Process the next candle.
  ///
  /// A rejected candle leaves the detector untouched.
  pub fn push_candle(&mut self, candle: Candle) -> Result<TickReport> {
    let tick = self.tick_list.append(candle)?;
    let mut report = TickReport { timestamp: tick.timestamp, ..TickReport::default() };

    self.advance_patterns(&tick, &mut report);
    self.advance_trades(&tick, &mut report);
    self.detect_patterns(&tick, &mut report);
    self.retire_patterns();
    self.evict_finished(&mut report);
    self.admit_trades(&tick, &mut report);
    Ok(report)
  }

  fn advance_patterns(&mut self, tick: &WaveTick, report: &mut TickReport) {
    for pattern in self.patterns.values_mut().filter(|p| p.is_live()) {
      if let Some(event) = pattern.on_tick(tick, &self.config, &self.predictor) {
        report.pattern_events.push((pattern.id, event));
      }
    }
  }

  fn advance_trades(&mut self, tick: &WaveTick, report: &mut TickReport) {
    let sma = self.tick_list.sma(self.config.sma_period.get());
    for trade in self.trades.values_mut().filter(|t| t.is_open()) {
      let pattern = self.patterns.get(&trade.pattern_id);
      if let Some(event) = trade.on_tick(tick, pattern, sma, &self.config) {
        report.trade_events.push((trade.id, event));
      }
    }
  }

  fn detect_patterns(&mut self, tick: &WaveTick, report: &mut TickReport) {
    let data = PatternData::new(&self.tick_list, &self.config);
    let Detection { ranges, tree, rejections } = detect(&data);
    for label in rejections {
      *self.rejection_counts.entry(label).or_default() += 1;
    }

    for range in &ranges {
      let existing = self.patterns.values_mut().find(|p| p.is_same_formation(range));
      match existing {
        Some(pattern) => {
          let grows = range.tick_last.timestamp > pattern.range.tick_last.timestamp;
          if grows && pattern.update_range(range.clone(), data.ticks(), &self.config, &self.predictor) {
            report.updated_patterns.push(pattern.id);
          }
        },
        None if range.tick_window_end.timestamp == tick.timestamp => {
          let id = PatternId(self.next_pattern_id);
          self.next_pattern_id += 1;
          let pattern = Pattern::new(
            id,
            &self.symbol,
            range.clone(),
            data.ticks(),
            &self.config,
            &self.predictor,
            self.tick_list.stride(),
          );
          self.patterns.insert(id, pattern);
          report.new_patterns.push(id);
        },
        None => {},
      }
    }

    for wave in tree.finished_waves() {
      if !self.waves.contains_key(&wave.key()) {
        self.waves.insert(wave.key(), wave.clone());
        report.finished_waves += 1;
      }
    }
    self.current_ranges = ranges;
  }

  fn retire_patterns(&mut self) {
    for pattern in self.patterns.values().filter(|p| !p.is_live()) {
      if self.retired.insert(pattern.id) {
        self.controller.retire(pattern.id);
        debug!(
          symbol = %self.symbol,
          pattern_id = pattern.id.0,
          state = pattern.state.as_str(),
          "pattern retired"
        );
      }
    }
  }

  /// Drop what can no longer change or be re-detected from the window
  fn evict_finished(&mut self, report: &mut TickReport) {
    let Some(window_start) = self.tick_list.first().map(|t| t.timestamp) else {
      return;
    };
    let precision = self.config.price_precision;

    let evicted: Vec<PatternId> = self
      .patterns
      .values()
      .filter(|p| !p.is_live() && p.range.tick_last.timestamp < window_start)
      .filter(|p| !self.trades.values().any(|t| t.pattern_id == p.id && t.is_open()))
      .map(|p| p.id)
      .collect();
    for id in evicted {
      if let Some(pattern) = self.patterns.remove(&id) {
        report.archived_patterns.push(PatternRecord::from_pattern(&pattern, precision));
      }
      self.retired.remove(&id);
      self.controller.retire(id);
      let trade_ids: Vec<TradeId> = self.trades.values().filter(|t| t.pattern_id == id).map(|t| t.id).collect();
      for trade_id in trade_ids {
        if let Some(trade) = self.trades.remove(&trade_id) {
          report.archived_trades.push(TradeRecord::from_trade(&trade, precision));
        }
      }
    }

    let old_waves: Vec<WaveKey> = self.waves.keys().filter(|k| k.start_ts < window_start).cloned().collect();
    for key in old_waves {
      if let Some(wave) = self.waves.remove(&key) {
        report.archived_waves.push(WaveRecord::from_wave(&self.symbol, &wave, precision));
      }
    }

    if !report.archived_patterns.is_empty() || !report.archived_waves.is_empty() {
      debug!(
        symbol = %self.symbol,
        window_start,
        patterns = report.archived_patterns.len(),
        trades = report.archived_trades.len(),
        waves = report.archived_waves.len(),
        "evicted finished records"
      );
    }
  }

  fn admit_trades(&mut self, tick: &WaveTick, report: &mut TickReport) {
    let admitted = self.controller.evaluate(self.patterns.values(), tick, &self.config);
    for (candidate, real) in admitted {
      let Some(pattern) = self.patterns.get(&candidate.pattern_id) else {
        continue;
      };
      let id = TradeId(self.next_trade_id);
      self.next_trade_id += 1;
      let trade =
        Trade::from_candidate(id, &candidate, pattern, !real, tick, &self.config, self.tick_list.stride());
      self.trades.insert(id, trade);
      report.new_trades.push(id);
    }
  }

  /// Close every open trade at the last known price
  pub fn close_all_open_trades(&mut self, reason: &str) -> Vec<(TradeId, TradeEvent)> {
    let Some(last) = self.tick_list.last().copied() else {
      return Vec::new();
    };
    self.trades
      .values_mut()
      .filter_map(|trade| {
        let id = trade.id;
        trade.force_close(reason, &last).map(|event| (id, event))
      })
      .collect()
  }

  // ===========================================
  // Accessors
  // ===========================================

  pub fn symbol(&self) -> &str {
    &self.symbol
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn tick_list(&self) -> &TickList {
    &self.tick_list
  }

  pub fn pattern(&self, id: PatternId) -> Option<&Pattern> {
    self.patterns.get(&id)
  }

  pub fn patterns(&self) -> impl Iterator<Item = &Pattern> + '_ {
    self.patterns.values()
  }

  pub fn live_patterns(&self) -> impl Iterator<Item = &Pattern> + '_ {
    self.patterns.values().filter(|p| p.is_live())
  }

  pub fn trade(&self, id: TradeId) -> Option<&Trade> {
    self.trades.get(&id)
  }

  pub fn trades(&self) -> impl Iterator<Item = &Trade> + '_ {
    self.trades.values()
  }

  pub fn open_trades(&self) -> impl Iterator<Item = &Trade> + '_ {
    self.trades.values().filter(|t| t.is_open())
  }

  pub fn waves(&self) -> impl Iterator<Item = &FibonacciWave> + '_ {
    self.waves.values()
  }

  /// Ranges of the latest detection pass
  pub fn current_ranges(&self) -> &[PatternRange] {
    &self.current_ranges
  }

  pub fn rejection_counts(&self) -> &BTreeMap<&'static str, usize> {
    &self.rejection_counts
  }

  pub fn controller(&self) -> &TradeCandidateController {
    &self.controller
  }

  // ===========================================
  // Export
  // ===========================================

  /// Records of the patterns still in the arena; evicted ones were reported
  /// through [`TickReport::archived_patterns`]
  pub fn pattern_records(&self) -> Vec<PatternRecord> {
    self.patterns
      .values()
      .map(|p| PatternRecord::from_pattern(p, self.config.price_precision))
      .collect()
  }

  pub fn trade_records(&self) -> Vec<TradeRecord> {
    self.trades
      .values()
      .map(|t| TradeRecord::from_trade(t, self.config.price_precision))
      .collect()
  }

  pub fn wave_records(&self) -> Vec<WaveRecord> {
    self.waves
      .values()
      .map(|w| WaveRecord::from_wave(&self.symbol, w, self.config.price_precision))
      .collect()
  }
}
