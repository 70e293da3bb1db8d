//! Forecast interface and the rule-based default

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{pattern_type::PatternType, Direction};

/// Pattern features handed to a [`Predictor`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
  /// Range length in ticks
  pub length: f64,
  /// Range height relative to the mean close, in percent
  pub height_pct: f64,
  pub slope_upper_pct: f64,
  pub slope_lower_pct: f64,
  pub slope_regression_pct: f64,
  pub touch_points_top: f64,
  pub touch_points_bottom: f64,
  /// +1 / 0 / -1
  pub expected_direction: f64,
  /// +1 / 0 / -1; 0 before a breakout
  pub breakout_direction: f64,
  /// Mean volume of the last half of the range against the first half, in percent
  pub volume_change_pct: f64,
}

impl FeatureRow {
  pub const NAMES: [&'static str; 10] = [
    "length",
    "height_pct",
    "slope_upper_pct",
    "slope_lower_pct",
    "slope_regression_pct",
    "touch_points_top",
    "touch_points_bottom",
    "expected_direction",
    "breakout_direction",
    "volume_change_pct",
  ];

  pub fn values(&self) -> [f64; 10] {
    [
      self.length,
      self.height_pct,
      self.slope_upper_pct,
      self.slope_lower_pct,
      self.slope_regression_pct,
      self.touch_points_top,
      self.touch_points_bottom,
      self.expected_direction,
      self.breakout_direction,
      self.volume_change_pct,
    ]
  }

  pub fn is_finite(&self) -> bool {
    self.values().iter().all(|v| v.is_finite())
  }
}

/// Forecast for one pattern
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
  pub touch_points_top: f64,
  pub touch_points_bottom: f64,
  pub breakout_direction: Direction,
  pub ticks_till_breakout: f64,
  pub false_breakout_flag: bool,
  pub half_positive_pct: f64,
  pub half_negative_pct: f64,
  pub full_positive_pct: f64,
  pub full_negative_pct: f64,
}

impl Prediction {
  /// No opinion: no direction, no expected move
  pub fn neutral() -> Self {
    Self {
      touch_points_top: 0.0,
      touch_points_bottom: 0.0,
      breakout_direction: Direction::Neutral,
      ticks_till_breakout: 0.0,
      false_breakout_flag: false,
      half_positive_pct: 0.0,
      half_negative_pct: 0.0,
      full_positive_pct: 0.0,
      full_negative_pct: 0.0,
    }
  }

  pub fn is_valid(&self) -> bool {
    [
      self.touch_points_top,
      self.touch_points_bottom,
      self.ticks_till_breakout,
      self.half_positive_pct,
      self.half_negative_pct,
      self.full_positive_pct,
      self.full_negative_pct,
    ]
    .iter()
    .all(|v| v.is_finite() && *v >= 0.0)
  }

  /// -1 for a predicted false breakout, else the sign of the predicted direction
  pub fn result_id(&self) -> i8 {
    if self.false_breakout_flag {
      return -1;
    }
    match self.breakout_direction {
      Direction::Ascending => 1,
      Direction::Neutral => 0,
      Direction::Descending => -1,
    }
  }
}

/// Source of forecasts; thresholds and models live outside the crate
pub trait Predictor: Send + Sync {
  /// `None` means no forecast is available for this row
  fn predict(&self, pattern_type: PatternType, features: &FeatureRow) -> Option<Prediction>;
}

impl<F> Predictor for F
where
  F: Fn(PatternType, &FeatureRow) -> Option<Prediction> + Send + Sync,
{
  fn predict(&self, pattern_type: PatternType, features: &FeatureRow) -> Option<Prediction> {
    self(pattern_type, features)
  }
}

/// Forecast from `predictor`, neutral when it is missing or not finite
pub fn predict_or_neutral<P: Predictor + ?Sized>(
  predictor: &P,
  pattern_type: PatternType,
  features: &FeatureRow,
) -> Prediction {
  if !features.is_finite() {
    warn!(pattern_type = %pattern_type, "non-finite features, using neutral forecast");
    return Prediction::neutral();
  }
  match predictor.predict(pattern_type, features) {
    Some(prediction) if prediction.is_valid() => prediction,
    Some(_) => {
      warn!(pattern_type = %pattern_type, "invalid prediction, using neutral forecast");
      Prediction::neutral()
    },
    None => {
      warn!(pattern_type = %pattern_type, "no prediction available, using neutral forecast");
      Prediction::neutral()
    },
  }
}

/// Default forecast: one pattern height in the breakout direction, or the
/// expected direction before a breakout
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedPredictor;

impl Predictor for RuleBasedPredictor {
  fn predict(&self, _pattern_type: PatternType, features: &FeatureRow) -> Option<Prediction> {
    let sign = if features.breakout_direction != 0.0 {
      features.breakout_direction
    } else {
      features.expected_direction
    };
    let breakout_direction = match sign {
      d if d > 0.0 => Direction::Ascending,
      d if d < 0.0 => Direction::Descending,
      _ => Direction::Neutral,
    };
    Some(Prediction {
      touch_points_top: features.touch_points_top,
      touch_points_bottom: features.touch_points_bottom,
      breakout_direction,
      ticks_till_breakout: 1.0,
      false_breakout_flag: false,
      half_positive_pct: 50.0,
      half_negative_pct: 50.0,
      full_positive_pct: 100.0,
      full_negative_pct: 100.0,
    })
  }
}
