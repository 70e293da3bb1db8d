//! End-to-end scenarios through the public API.

use chartpat::{prelude::*, trade::BoxGeometry};

const DAY: i64 = 86_400;

/// Symmetric triangle: highs 100, 99, .. at even indices, lows 80, 81, .. at odd ones
fn triangle_candles(n: usize) -> Vec<Candle> {
  (0..n)
    .map(|i| {
      let k = (i / 2) as f64;
      let (high, low) = if i % 2 == 0 { (100.0 - k, 99.0 - k) } else { (81.0 + k, 80.0 + k) };
      Candle::new(i as i64 * DAY, low + 0.25, high, low, high - 0.25, 1000.0)
    })
    .collect()
}

/// Flat bars stepping by one price unit between pivot prices
fn stepped_candles(pivots: &[f64]) -> Vec<Candle> {
  let mut prices = vec![pivots[0]];
  for w in pivots.windows(2) {
    let steps = (w[1] - w[0]).abs() as usize;
    let sign = (w[1] - w[0]).signum();
    prices.extend((1..=steps).map(|s| w[0] + sign * s as f64));
  }
  prices.iter().enumerate().map(|(i, p)| Candle::flat(i as i64 * DAY, *p)).collect()
}

/// The triangle data alternates highs and lows bar by bar, so its pivots are
/// local extrema only for a local length of one bar
fn local_one_config() -> Config {
  Config { length_for_local_min_max: Period::new(1).unwrap(), ..Config::default() }
}

fn run(config: Config, candles: &[Candle]) -> Detector {
  let mut detector = DetectorBuilder::new("SCN").config(config).build().unwrap();
  for candle in candles {
    detector.push_candle(*candle).unwrap();
  }
  detector
}

fn triangle_pattern(detector: &Detector) -> &Pattern {
  detector
    .patterns()
    .find(|p| p.pattern_type == PatternType::Triangle && p.range.tick_first.position == 0)
    .expect("triangle pattern")
}

#[test]
fn test_symmetric_triangle_is_formed() {
  let detector = run(local_one_config(), &triangle_candles(20));

  let triangles: Vec<&PatternRange> =
    detector.current_ranges().iter().filter(|r| r.pattern_type == PatternType::Triangle).collect();
  assert_eq!(triangles.len(), 1);
  assert_eq!(triangles[0].tick_first.position, 0);
  assert_eq!(triangles[0].tick_last.position, 19);

  let pattern = triangle_pattern(&detector);
  assert_eq!(pattern.state, PatternState::Formed);
  assert_eq!(pattern.range.tick_last.position, 19);
  assert!(pattern.breakout.is_none());
}

#[test]
fn test_triangle_needs_single_bar_local_length() {
  // with the default local length of two bars the alternating pivots are not extrema
  let detector = run(Config::default(), &triangle_candles(20));
  assert_eq!(Config::default().length_for_local_min_max.get(), 2);
  assert!(detector.current_ranges().iter().all(|r| r.pattern_type != PatternType::Triangle));
  assert!(detector.patterns().all(|p| p.pattern_type != PatternType::Triangle));
}

#[test]
fn test_breakout_with_target() {
  let mut detector = run(local_one_config(), &triangle_candles(20));
  let report = detector.push_candle(Candle::new(20 * DAY, 90.0, 95.0, 90.0, 94.0, 1000.0)).unwrap();

  let id = triangle_pattern(&detector).id;
  assert!(report
    .pattern_events
    .contains(&(id, PatternEvent::BreakoutConfirmed { direction: Direction::Ascending, ts: 20 * DAY })));

  let pattern = detector.pattern(id).unwrap();
  assert_eq!(pattern.state, PatternState::BrokenOut);
  assert_eq!(pattern.breakout.unwrap().tick.timestamp, 20 * DAY);
  assert!((pattern.forecast.target_price - 110.0).abs() < 1e-9);

  let record = detector.pattern_records().into_iter().find(|r| r.pattern_id == id).unwrap();
  assert_eq!(record.direction, Direction::Ascending);
  assert_eq!(record.breakout_ts, Some(20 * DAY));
}

#[test]
fn test_impulse_wave_recorded() {
  let detector = run(Config::default(), &stepped_candles(&[100.0, 110.0, 106.0, 118.0, 113.0, 121.0, 118.0]));

  let impulses: Vec<WaveRecord> =
    detector.wave_records().into_iter().filter(|w| w.kind == WaveKind::Impulse).collect();
  assert_eq!(impulses.len(), 1);
  let wave = &impulses[0];
  assert_eq!(wave.direction, Direction::Ascending);
  assert_eq!(wave.pattern_type, PatternType::FibonacciAsc);
  let ranges: Vec<f64> = wave.components.iter().map(|c| c.range).collect();
  assert_eq!(ranges, vec![10.0, 4.0, 12.0, 5.0, 8.0]);
  assert!((wave.components[1].retracement_pct.unwrap() - 0.4).abs() < 0.01);
  assert!((wave.components[3].retracement_pct.unwrap() - 0.417).abs() < 0.01);
}

#[test]
fn test_long_fifth_wave_is_accepted() {
  let detector = run(Config::default(), &stepped_candles(&[100.0, 110.0, 106.0, 118.0, 113.0, 126.0, 123.0]));
  let impulses: Vec<WaveRecord> =
    detector.wave_records().into_iter().filter(|w| w.kind == WaveKind::Impulse).collect();
  assert_eq!(impulses.len(), 1);
  let ranges: Vec<f64> = impulses[0].components.iter().map(|c| c.range).collect();
  assert_eq!(ranges, vec![10.0, 4.0, 12.0, 5.0, 13.0]);
}

#[test]
fn test_shortest_third_wave_is_rejected() {
  let detector = run(Config::default(), &stepped_candles(&[100.0, 110.0, 106.0, 115.0, 111.0, 124.0, 121.0]));
  assert!(detector.wave_records().iter().all(|w| w.kind != WaveKind::Impulse));
}

fn flat_tick(i: i64, price: f64) -> WaveTick {
  WaveTick::from_candle(&Candle::flat(i * DAY, price), i as usize)
}

/// Trade filled at 100 on tick 0 with the box distances `top` and `bottom`
fn held_trade(strategy: TradeStrategy, top: f64, bottom: f64) -> Trade {
  let geometry = BoxGeometry {
    kind: TradeBoxKind::ForecastFullLength,
    height: bottom,
    distance_top: top,
    distance_bottom: bottom,
    length_ticks: 100,
  };
  let trade_box = TradeBox::new(strategy, &geometry, 100.0, 1_000 * DAY, &Config::default()).unwrap();
  Trade::from_fill(TradeId(1), PatternId(1), "SCN", BuyTrigger::Breakout, trade_box, 0, false, DAY)
}

fn ride(trade: &mut Trade, lasts: &[f64]) -> TradeRecord {
  let config = Config::default();
  for (i, last) in lasts.iter().enumerate() {
    if let Some(TradeEvent::Sold { .. }) = trade.on_tick(&flat_tick(i as i64 + 1, *last), None, None, &config) {
      break;
    }
  }
  TradeRecord::from_trade(trade, config.price_precision)
}

#[test]
fn test_limit_box_sells_at_limit() {
  let mut trade = held_trade(TradeStrategy::Limit, 10.0, 5.0);
  let record = ride(&mut trade, &[101.0, 103.0, 108.0, 110.0, 111.0]);
  assert_eq!(record.state, TradeState::Closed);
  assert_eq!(record.sell_price, Some(110.0));
  assert_eq!(record.sell_ts, Some(4 * DAY));
  assert_eq!(record.sell_reason, Some(SellReason::SellLimit));
  assert!((record.trade_result_pct.unwrap() - 10.0).abs() < 1e-9);
  assert_eq!(record.result_class, Some(ResultClass::Winner));
}

#[test]
fn test_trailing_stop_box() {
  let mut trade = held_trade(TradeStrategy::TrailingStop, 20.0, 5.0);
  let initial = trade.trade_box.unwrap().stop_loss_current;
  let record = ride(&mut trade, &[101.0, 105.0, 110.0, 108.0, 103.0]);
  // initial stop, then one value per holding tick
  let stops: Vec<f64> = std::iter::once(initial).chain(trade.stop_loss_history.iter().copied()).collect();
  assert_eq!(stops, vec![95.0, 96.0, 100.0, 105.0, 105.0]);
  assert_eq!(record.sell_price, Some(105.0));
  assert_eq!(record.sell_reason, Some(SellReason::StopLoss));
  assert!((record.trade_result_pct.unwrap() - 5.0).abs() < 1e-9);
  assert_eq!(record.result_class, Some(ResultClass::Winner));
}
