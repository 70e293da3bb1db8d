//! Parameter metadata for the detection configuration
//!
//! Every numeric knob of [`Config`](crate::config::Config) is described by a
//! [`ParamMeta`], which gives:
//! - range validation for configuration loading
//! - grid search over detection thresholds
//! - parameter documentation
//!
//! # Example
//!
//! ```rust
//! use chartpat::params::Parameterized;
//! use chartpat::prelude::*;
//!
//! for param in Config::param_meta() {
//!     println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//! ```

use std::collections::HashMap;

use crate::{CoreError, Period, Ratio, Result};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Fraction (0.0..=1.0)
  Ratio,
  /// Tick count (positive integer)
  Period,
  /// Unbounded real value, typically a percentage
  Value,
}

/// Metadata for a single configuration parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name (e.g., "tolerance_pct")
  pub name: &'static str,
  pub param_type: ParamType,
  /// Default value (daily period where it depends on the period)
  pub default: f64,
  /// Range for validation and optimization: (min, max, step)
  pub range: (f64, f64, f64),
  pub description: &'static str,
}

impl ParamMeta {
  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  pub const fn period(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Period, default, range, description }
  }

  pub const fn value(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Value, default, range, description }
  }

  /// Generate all values for grid search
  pub fn generate_grid(&self) -> Vec<f64> {
    let (min, max, step) = self.range;
    let mut values = Vec::new();
    if step <= 0.0 {
      values.push(self.default);
      return values;
    }
    let mut i = 0_u32;
    loop {
      let v = min + step * f64::from(i);
      if v > max + step * 1e-9 {
        break;
      }
      values.push(v);
      i += 1;
    }
    values
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    if !value.is_finite() {
      return Err(CoreError::InvalidValue("parameter must be finite"));
    }
    let (min, max, _) = self.range;
    if value < min || value > max {
      return Err(CoreError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Ratio => Ratio::new(value).map(|_| ()),
      ParamType::Period => {
        if value < 1.0 || value.fract() != 0.0 {
          return Err(CoreError::InvalidValue("Period must be a positive integer"));
        }
        Ok(())
      },
      ParamType::Value => Ok(()),
    }
  }
}

/// Look up a parameter by name in a metadata table
pub fn find_meta(metas: &'static [ParamMeta], name: &str) -> Option<&'static ParamMeta> {
  metas.iter().find(|m| m.name == name)
}

// ============================================================
// PARAMETERIZED TRAIT
// ============================================================

/// Types whose numeric knobs can be listed, validated and overridden by name
pub trait Parameterized: Sized {
  /// Returns metadata for all configurable parameters
  fn param_meta() -> &'static [ParamMeta];

  /// Current values, in the same order as [`Parameterized::param_meta`]
  fn param_values(&self) -> Vec<(&'static str, f64)>;

  /// Copy of `self` with the given parameters overridden.
  ///
  /// Unknown keys are rejected; missing keys keep their current value.
  fn with_params(&self, params: &HashMap<&str, f64>) -> Result<Self>;

  /// Validate every current value against its metadata
  fn validate_params(&self) -> Result<()> {
    for (name, value) in self.param_values() {
      if let Some(meta) = find_meta(Self::param_meta(), name) {
        meta.validate(value)?;
      }
    }
    Ok(())
  }
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

/// Helper to get a Ratio from params with default fallback
pub fn get_ratio(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<Ratio> {
  let value = params.get(key).copied().unwrap_or(default);
  Ratio::new(value)
}

/// Helper to get a Period from params with default fallback
pub fn get_period(params: &HashMap<&str, f64>, key: &str, default: usize) -> Result<Period> {
  let value = params.get(key).copied().unwrap_or(default as f64);
  if value < 0.0 || value.fract() != 0.0 {
    return Err(CoreError::InvalidValue("Period must be a positive integer"));
  }
  Period::new(value as usize)
}

/// Helper to get a plain value from params with default fallback
pub fn get_value(params: &HashMap<&str, f64>, key: &str, default: f64) -> f64 {
  params.get(key).copied().unwrap_or(default)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_param_meta_constructors() {
    let ratio = ParamMeta::ratio("breakout_range_pct", 0.05, (0.0, 0.2, 0.01), "Breakout margin");
    assert_eq!(ratio.param_type, ParamType::Ratio);
    assert_eq!(ratio.default, 0.05);

    let period = ParamMeta::period("sma_period", 10.0, (2.0, 50.0, 1.0), "SMA length");
    assert_eq!(period.param_type, ParamType::Period);

    let value = ParamMeta::value("buy_limit_pct", 5.0, (0.0, 50.0, 0.5), "Buy limit");
    assert_eq!(value.param_type, ParamType::Value);
  }

  #[test]
  fn test_generate_grid() {
    let meta = ParamMeta::ratio("test", 0.5, (0.3, 0.7, 0.2), "Test");

    let grid = meta.generate_grid();
    assert_eq!(grid.len(), 3);
    assert!((grid[0] - 0.3).abs() < 1e-12);
    assert!((grid[1] - 0.5).abs() < 1e-12);
    assert!((grid[2] - 0.7).abs() < 1e-12);
  }

  #[test]
  fn test_generate_grid_without_step() {
    let meta = ParamMeta::value("test", 1.5, (1.0, 2.0, 0.0), "Test");
    assert_eq!(meta.generate_grid(), vec![1.5]);
  }

  #[test]
  fn test_validate_ratio() {
    let meta = ParamMeta::ratio("test", 0.5, (0.3, 0.7, 0.1), "Test");

    assert!(meta.validate(0.5).is_ok());
    assert!(meta.validate(0.3).is_ok());
    assert!(meta.validate(0.7).is_ok());
    assert!(meta.validate(0.2).is_err());
    assert!(meta.validate(0.8).is_err());
    assert!(meta.validate(f64::NAN).is_err());
  }

  #[test]
  fn test_validate_period() {
    let meta = ParamMeta::period("test", 14.0, (10.0, 20.0, 2.0), "Test");

    assert!(meta.validate(14.0).is_ok());
    assert!(meta.validate(10.0).is_ok());
    assert!(meta.validate(8.0).is_err());
    assert!(meta.validate(12.5).is_err());
  }

  #[test]
  fn test_find_meta() {
    static METAS: [ParamMeta; 2] = [
      ParamMeta::value("a", 1.0, (0.0, 2.0, 1.0), "A"),
      ParamMeta::value("b", 1.0, (0.0, 2.0, 1.0), "B"),
    ];
    assert_eq!(find_meta(&METAS, "b").map(|m| m.name), Some("b"));
    assert!(find_meta(&METAS, "c").is_none());
  }

  #[test]
  fn test_value_helpers() {
    let mut params = HashMap::new();
    params.insert("key1", 0.8);
    params.insert("len", 20.0);

    assert!((get_ratio(&params, "key1", 0.5).unwrap().get() - 0.8).abs() < f64::EPSILON);
    assert!((get_ratio(&params, "key2", 0.5).unwrap().get() - 0.5).abs() < f64::EPSILON);
    assert_eq!(get_period(&params, "len", 14).unwrap().get(), 20);
    assert_eq!(get_period(&params, "other", 14).unwrap().get(), 14);
    assert_eq!(get_value(&params, "missing", 2.5), 2.5);
  }
}
