//! Benchmarks for streaming pattern detection.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use chartpat::prelude::*;

const DAY: i64 = 86_400;

/// Deterministic random-looking daily candles
fn generate_candles(n: usize) -> Vec<Candle> {
  let mut candles = Vec::with_capacity(n);
  let mut price = 100.0;

  for i in 0..n {
    let change = ((i * 7 + 13) % 100) as f64 / 50.0 - 1.0;
    let volatility = 2.0 + ((i * 3) % 10) as f64 / 5.0;

    let open = price;
    let close = (price + change).max(5.0);
    let high = open.max(close) + volatility * 0.5;
    let low = (open.min(close) - volatility * 0.5).max(1.0);

    candles.push(Candle::new(i as i64 * DAY, open, high, low, close, 1000.0));
    price = close;
  }

  candles
}

/// Repeated converging triangles with a breakout bar after each
fn generate_triangles(count: usize) -> Vec<Candle> {
  let mut candles = Vec::with_capacity(count * 21);
  for t in 0..count {
    let base = (t * 21) as i64;
    for i in 0..20 {
      let k = (i / 2) as f64;
      let (high, low) = if i % 2 == 0 { (81.0 + k, 80.0 + k) } else { (100.0 - k, 99.0 - k) };
      candles.push(Candle::new((base + i as i64) * DAY, low + 0.25, high, low, high - 0.25, 1000.0));
    }
    candles.push(Candle::new((base + 20) * DAY, 90.5, 96.0, 90.4, 95.5, 1500.0));
  }
  candles
}

fn run(config: &Config, candles: &[Candle]) -> Detector {
  let mut detector = DetectorBuilder::new("BENCH").config(config.clone()).build().unwrap();
  for candle in candles {
    detector.push_candle(*candle).unwrap();
  }
  detector
}

fn bench_triangle_stream(c: &mut Criterion) {
  let candles = generate_triangles(10);
  let config = Config { length_for_local_min_max: Period::new(1).unwrap(), ..Config::default() };

  c.bench_function("push_triangles_210_candles", |b| {
    b.iter(|| {
      let _ = black_box(run(&config, black_box(&candles)));
    })
  });
}

fn bench_scaling(c: &mut Criterion) {
  let config = Config::default();

  let mut group = c.benchmark_group("scaling");
  group.sample_size(20);

  for size in [100, 250, 500].iter() {
    let candles = generate_candles(*size);

    group.bench_with_input(BenchmarkId::new("push", size), size, |b, _| {
      b.iter(|| {
        let _ = black_box(run(&config, black_box(&candles)));
      })
    });
  }

  group.finish();
}

fn bench_wave_tree(c: &mut Criterion) {
  let config = Config::default();
  let mut list = TickList::for_config(&config);
  for candle in generate_candles(config.max_range_length.get()) {
    list.append(candle).unwrap();
  }

  c.bench_function("fibonacci_wave_tree", |b| {
    b.iter(|| {
      let data = PatternData::new(black_box(&list), &config);
      let _ = black_box(FibonacciWaveTree::build(&data));
    })
  });
}

fn bench_parallel(c: &mut Criterion) {
  let bars1 = generate_candles(200);
  let bars2 = generate_candles(200);
  let bars3 = generate_candles(200);
  let bars4 = generate_candles(200);

  let config = Config::default();
  let instruments: Vec<(&str, &[Candle])> =
    vec![("SYM1", &bars1), ("SYM2", &bars2), ("SYM3", &bars3), ("SYM4", &bars4)];

  c.bench_function("parallel_4_instruments", |b| {
    b.iter(|| {
      let _ = black_box(process_parallel(&config, &RuleBasedPredictor, black_box(instruments.clone())));
    })
  });
}

criterion_group!(benches, bench_triangle_stream, bench_scaling, bench_wave_tree, bench_parallel,);

criterion_main!(benches);
