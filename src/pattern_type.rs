//! Pattern type identifiers and per-type acceptance parameters

use serde::{Deserialize, Serialize};

use crate::{Direction, Side};

// ============================================================
// PATTERN TYPE
// ============================================================

/// Geometric pattern kinds the detector emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
  Channel,
  ChannelUp,
  ChannelDown,
  Triangle,
  TriangleTop,
  TriangleBottom,
  TriangleUp,
  TriangleDown,
  TkeTop,
  TkeBottom,
  HeadShoulder,
  HeadShoulderBottom,
  FibonacciAsc,
  FibonacciDesc,
}

impl PatternType {
  pub const ALL: [PatternType; 14] = [
    PatternType::Channel,
    PatternType::ChannelUp,
    PatternType::ChannelDown,
    PatternType::Triangle,
    PatternType::TriangleTop,
    PatternType::TriangleBottom,
    PatternType::TriangleUp,
    PatternType::TriangleDown,
    PatternType::TkeTop,
    PatternType::TkeBottom,
    PatternType::HeadShoulder,
    PatternType::HeadShoulderBottom,
    PatternType::FibonacciAsc,
    PatternType::FibonacciDesc,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      PatternType::Channel => "CHANNEL",
      PatternType::ChannelUp => "CHANNEL_UP",
      PatternType::ChannelDown => "CHANNEL_DOWN",
      PatternType::Triangle => "TRIANGLE",
      PatternType::TriangleTop => "TRIANGLE_TOP",
      PatternType::TriangleBottom => "TRIANGLE_BOTTOM",
      PatternType::TriangleUp => "TRIANGLE_UP",
      PatternType::TriangleDown => "TRIANGLE_DOWN",
      PatternType::TkeTop => "TKE_TOP",
      PatternType::TkeBottom => "TKE_BOTTOM",
      PatternType::HeadShoulder => "HEAD_SHOULDER",
      PatternType::HeadShoulderBottom => "HEAD_SHOULDER_BOTTOM",
      PatternType::FibonacciAsc => "FIBONACCI_ASC",
      PatternType::FibonacciDesc => "FIBONACCI_DESC",
    }
  }

  /// Breakout direction fixed by the shape itself.
  ///
  /// Head-shoulder tops break down, bottoms break up; Fibonacci impulses are
  /// followed by a correction against the impulse.
  pub fn fixed_breakout_direction(&self) -> Option<Direction> {
    match self {
      PatternType::HeadShoulder => Some(Direction::Descending),
      PatternType::HeadShoulderBottom => Some(Direction::Ascending),
      PatternType::FibonacciAsc => Some(Direction::Descending),
      PatternType::FibonacciDesc => Some(Direction::Ascending),
      _ => None,
    }
  }

  pub fn is_channel(&self) -> bool {
    matches!(self, PatternType::Channel | PatternType::ChannelUp | PatternType::ChannelDown)
  }

  pub fn is_triangle(&self) -> bool {
    matches!(
      self,
      PatternType::Triangle
        | PatternType::TriangleTop
        | PatternType::TriangleBottom
        | PatternType::TriangleUp
        | PatternType::TriangleDown
    )
  }

  pub fn is_tke(&self) -> bool {
    matches!(self, PatternType::TkeTop | PatternType::TkeBottom)
  }

  pub fn is_head_shoulder(&self) -> bool {
    matches!(self, PatternType::HeadShoulder | PatternType::HeadShoulderBottom)
  }

  pub fn is_fibonacci(&self) -> bool {
    matches!(self, PatternType::FibonacciAsc | PatternType::FibonacciDesc)
  }

  /// Acceptance parameters used when the configuration has no override
  pub fn default_params(&self) -> PatternTypeParams {
    let base = PatternTypeParams::default();
    match self {
      PatternType::HeadShoulder | PatternType::HeadShoulderBottom => {
        PatternTypeParams { min_touches: 5, breakout_confirmation_ticks: 2, ..base }
      },
      PatternType::TkeTop | PatternType::TkeBottom => {
        PatternTypeParams { min_touches: 3, tolerance_factor: 0.5, ..base }
      },
      PatternType::Channel | PatternType::ChannelUp | PatternType::ChannelDown => {
        PatternTypeParams { max_abs_slope_pct: 50.0, ..base }
      },
      _ => base,
    }
  }

  /// Classify a two-boundary range by its slopes.
  ///
  /// `opposite_touches` is the number of touches on the side that was fitted
  /// to the main boundary; fewer than two makes the range a TKE. Diverging
  /// boundaries never form a pattern.
  pub fn classify(
    main_side: Side,
    slope_upper_pct: f64,
    slope_lower_pct: f64,
    opposite_touches: usize,
    thresholds: SlopeThresholds,
  ) -> Option<PatternType> {
    let flat = |s: f64| s.abs() <= thresholds.flat_pct;

    if opposite_touches < 2 {
      return match main_side {
        Side::Upper if !flat(slope_upper_pct) && slope_upper_pct < 0.0 => Some(PatternType::TkeTop),
        Side::Lower if !flat(slope_lower_pct) && slope_lower_pct > 0.0 => {
          Some(PatternType::TkeBottom)
        },
        _ => None,
      };
    }

    let diff = slope_upper_pct - slope_lower_pct;
    if diff.abs() <= thresholds.channel_diff_pct {
      return Some(match (flat(slope_upper_pct), flat(slope_lower_pct)) {
        (true, true) => PatternType::Channel,
        _ if slope_upper_pct + slope_lower_pct > 0.0 => PatternType::ChannelUp,
        _ => PatternType::ChannelDown,
      });
    }
    if diff > 0.0 {
      // boundaries drift apart
      return None;
    }

    let upper_flat = flat(slope_upper_pct);
    let lower_flat = flat(slope_lower_pct);
    Some(match () {
      _ if upper_flat && slope_lower_pct > 0.0 => PatternType::TriangleTop,
      _ if lower_flat && slope_upper_pct < 0.0 => PatternType::TriangleBottom,
      _ if slope_upper_pct < 0.0 && slope_lower_pct > 0.0 => PatternType::Triangle,
      _ if slope_upper_pct > 0.0 && slope_lower_pct > 0.0 => PatternType::TriangleUp,
      _ => PatternType::TriangleDown,
    })
  }
}

impl std::fmt::Display for PatternType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

// ============================================================
// PER-TYPE PARAMETERS
// ============================================================

/// Thresholds (in percent over the range) separating flat, rising and falling boundaries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlopeThresholds {
  /// A boundary whose total change stays within this percent is flat
  pub flat_pct: f64,
  /// Boundaries whose slopes differ by at most this percent are parallel
  pub channel_diff_pct: f64,
}

impl Default for SlopeThresholds {
  fn default() -> Self {
    Self { flat_pct: 1.0, channel_diff_pct: 1.0 }
  }
}

/// Acceptance parameters for one pattern type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternTypeParams {
  /// Minimum touches on the main boundary (all boundaries for head-shoulder)
  pub min_touches: usize,
  /// Multiplier applied to `tolerance_pct` for touch checks
  pub tolerance_factor: f64,
  /// Boundaries steeper than this (absolute percent) are rejected
  pub max_abs_slope_pct: f64,
  /// Ticks beyond the boundary needed to confirm a breakout
  pub breakout_confirmation_ticks: usize,
  /// Ticks after the last touch before a pattern without breakout expires;
  /// `None` means one pattern length
  pub breakout_required_after_ticks: Option<usize>,
  /// Overrides the global `max_range_length` when set
  pub max_range_length: Option<usize>,
}

impl Default for PatternTypeParams {
  fn default() -> Self {
    Self {
      min_touches: 3,
      tolerance_factor: 1.0,
      max_abs_slope_pct: 1000.0,
      breakout_confirmation_ticks: 1,
      breakout_required_after_ticks: None,
      max_range_length: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const T: SlopeThresholds = SlopeThresholds { flat_pct: 1.0, channel_diff_pct: 1.0 };

  #[test]
  fn test_classify_triangles() {
    assert_eq!(PatternType::classify(Side::Upper, -10.0, 10.0, 3, T), Some(PatternType::Triangle));
    assert_eq!(PatternType::classify(Side::Upper, 0.2, 8.0, 3, T), Some(PatternType::TriangleTop));
    assert_eq!(PatternType::classify(Side::Lower, -8.0, 0.0, 2, T), Some(PatternType::TriangleBottom));
    assert_eq!(PatternType::classify(Side::Upper, 3.0, 9.0, 2, T), Some(PatternType::TriangleUp));
    assert_eq!(PatternType::classify(Side::Upper, -9.0, -3.0, 2, T), Some(PatternType::TriangleDown));
  }

  #[test]
  fn test_classify_channels() {
    assert_eq!(PatternType::classify(Side::Upper, 0.5, -0.3, 2, T), Some(PatternType::Channel));
    assert_eq!(PatternType::classify(Side::Upper, 5.0, 5.5, 2, T), Some(PatternType::ChannelUp));
    assert_eq!(PatternType::classify(Side::Lower, -5.0, -4.5, 2, T), Some(PatternType::ChannelDown));
  }

  #[test]
  fn test_diverging_is_rejected() {
    assert_eq!(PatternType::classify(Side::Upper, 10.0, -10.0, 3, T), None);
  }

  #[test]
  fn test_classify_tke() {
    assert_eq!(PatternType::classify(Side::Upper, -6.0, 0.0, 1, T), Some(PatternType::TkeTop));
    assert_eq!(PatternType::classify(Side::Lower, 0.0, 6.0, 0, T), Some(PatternType::TkeBottom));
    assert_eq!(PatternType::classify(Side::Upper, 0.0, 0.0, 1, T), None);
  }

  #[test]
  fn test_fixed_directions() {
    assert_eq!(PatternType::HeadShoulder.fixed_breakout_direction(), Some(Direction::Descending));
    assert_eq!(PatternType::FibonacciDesc.fixed_breakout_direction(), Some(Direction::Ascending));
    assert_eq!(PatternType::Triangle.fixed_breakout_direction(), None);
  }

  #[test]
  fn test_head_shoulder_needs_five_touches() {
    assert_eq!(PatternType::HeadShoulder.default_params().min_touches, 5);
    assert_eq!(PatternType::Triangle.default_params().min_touches, 3);
    assert_eq!(PatternType::ALL.len(), 14);
  }
}
