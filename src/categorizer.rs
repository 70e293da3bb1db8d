//! Tick categorization against range boundaries
//!
//! Every tick of a range gets the set of categories describing where its
//! high and low sit relative to the upper and lower boundary (and the
//! optional helper boundaries of head-shoulder patterns).

use serde::{Deserialize, Serialize};

use crate::{detectors::helpers::rel_diff, function::LinearFunction, tick::WaveTick};

// ============================================================
// CATEGORIES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueCategory {
  /// High on the upper boundary (equal tolerance)
  UOn,
  /// High touches the upper boundary (touch tolerance)
  UIn,
  /// High above the upper boundary beyond tolerance
  UOut,
  LOn,
  LIn,
  LOut,
  /// Bar strictly between the boundaries
  MIn,
  HUOn,
  HUIn,
  HLOn,
  HLIn,
  HMIn,
}

impl ValueCategory {
  pub const ALL: [ValueCategory; 12] = [
    ValueCategory::UOn,
    ValueCategory::UIn,
    ValueCategory::UOut,
    ValueCategory::LOn,
    ValueCategory::LIn,
    ValueCategory::LOut,
    ValueCategory::MIn,
    ValueCategory::HUOn,
    ValueCategory::HUIn,
    ValueCategory::HLOn,
    ValueCategory::HLIn,
    ValueCategory::HMIn,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ValueCategory::UOn => "U_on",
      ValueCategory::UIn => "U_in",
      ValueCategory::UOut => "U_out",
      ValueCategory::LOn => "L_on",
      ValueCategory::LIn => "L_in",
      ValueCategory::LOut => "L_out",
      ValueCategory::MIn => "M_in",
      ValueCategory::HUOn => "H_U_on",
      ValueCategory::HUIn => "H_U_in",
      ValueCategory::HLOn => "H_L_on",
      ValueCategory::HLIn => "H_L_in",
      ValueCategory::HMIn => "H_M_in",
    }
  }

  #[inline]
  fn bit(self) -> u16 {
    1 << (self as u16)
  }
}

/// Small bit set of [`ValueCategory`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CategorySet(u16);

impl CategorySet {
  pub const EMPTY: CategorySet = CategorySet(0);

  pub fn all() -> Self {
    ValueCategory::ALL.into_iter().collect()
  }

  pub fn of(categories: &[ValueCategory]) -> Self {
    categories.iter().copied().collect()
  }

  #[inline]
  pub fn insert(&mut self, category: ValueCategory) {
    self.0 |= category.bit();
  }

  #[inline]
  pub fn contains(&self, category: ValueCategory) -> bool {
    self.0 & category.bit() != 0
  }

  pub fn without(self, category: ValueCategory) -> Self {
    Self(self.0 & !category.bit())
  }

  #[inline]
  pub fn is_subset_of(&self, other: &CategorySet) -> bool {
    self.0 & !other.0 == 0
  }

  pub fn is_empty(&self) -> bool {
    self.0 == 0
  }

  pub fn len(&self) -> usize {
    self.0.count_ones() as usize
  }

  pub fn iter(&self) -> impl Iterator<Item = ValueCategory> + '_ {
    ValueCategory::ALL.into_iter().filter(|c| self.contains(*c))
  }
}

impl FromIterator<ValueCategory> for CategorySet {
  fn from_iter<I: IntoIterator<Item = ValueCategory>>(iter: I) -> Self {
    let mut set = CategorySet::EMPTY;
    for category in iter {
      set.insert(category);
    }
    set
  }
}

// ============================================================
// CATEGORIZER
// ============================================================

/// Upper and lower boundary of a range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundaryPair {
  pub upper: LinearFunction,
  pub lower: LinearFunction,
}

#[derive(Debug, Clone)]
pub struct ValueCategorizer {
  rows: Vec<(i64, CategorySet)>,
  tolerance_pct: f64,
  tolerance_pct_equal: f64,
}

impl ValueCategorizer {
  pub fn new(
    ticks: &[WaveTick],
    bounds: BoundaryPair,
    helper: Option<BoundaryPair>,
    tolerance_pct: f64,
    tolerance_pct_equal: f64,
  ) -> Self {
    let rows = ticks
      .iter()
      .map(|t| {
        let categories = Self::categorize_tick(t, &bounds, helper.as_ref(), tolerance_pct, tolerance_pct_equal);
        (t.timestamp, categories)
      })
      .collect();
    Self { rows, tolerance_pct, tolerance_pct_equal }
  }

  /// Categories of one tick
  pub fn categorize_tick(
    tick: &WaveTick,
    bounds: &BoundaryPair,
    helper: Option<&BoundaryPair>,
    tolerance_pct: f64,
    tolerance_pct_equal: f64,
  ) -> CategorySet {
    let mut set = CategorySet::EMPTY;
    let u = bounds.upper.value_at(tick.timestamp);
    let l = bounds.lower.value_at(tick.timestamp);

    let upper_diff = rel_diff(tick.high, u);
    if upper_diff <= tolerance_pct_equal {
      set.insert(ValueCategory::UOn);
    }
    if upper_diff <= tolerance_pct {
      set.insert(ValueCategory::UIn);
    } else if tick.high > u {
      set.insert(ValueCategory::UOut);
    }

    let lower_diff = rel_diff(tick.low, l);
    if lower_diff <= tolerance_pct_equal {
      set.insert(ValueCategory::LOn);
    }
    if lower_diff <= tolerance_pct {
      set.insert(ValueCategory::LIn);
    } else if tick.low < l {
      set.insert(ValueCategory::LOut);
    }

    if l < tick.low && tick.high < u {
      set.insert(ValueCategory::MIn);
    }

    if let Some(h) = helper {
      let hu = h.upper.value_at(tick.timestamp);
      let hl = h.lower.value_at(tick.timestamp);
      let helper_upper_diff = rel_diff(tick.high, hu);
      if helper_upper_diff <= tolerance_pct_equal {
        set.insert(ValueCategory::HUOn);
      }
      if helper_upper_diff <= tolerance_pct {
        set.insert(ValueCategory::HUIn);
      }
      let helper_lower_diff = rel_diff(tick.low, hl);
      if helper_lower_diff <= tolerance_pct_equal {
        set.insert(ValueCategory::HLOn);
      }
      if helper_lower_diff <= tolerance_pct {
        set.insert(ValueCategory::HLIn);
      }
      if hl < tick.low && tick.high < hu {
        set.insert(ValueCategory::HMIn);
      }
    }
    set
  }

  pub fn tolerances(&self) -> (f64, f64) {
    (self.tolerance_pct, self.tolerance_pct_equal)
  }

  pub fn rows(&self) -> &[(i64, CategorySet)] {
    &self.rows
  }

  pub fn categories_at(&self, timestamp: i64) -> Option<CategorySet> {
    self.rows
      .binary_search_by_key(&timestamp, |(ts, _)| *ts)
      .ok()
      .map(|i| self.rows[i].1)
  }

  fn in_span(&self, ts_start: i64, ts_end: i64) -> impl Iterator<Item = &CategorySet> + '_ {
    self.rows
      .iter()
      .filter(move |(ts, _)| *ts >= ts_start && *ts <= ts_end)
      .map(|(_, set)| set)
  }

  /// Number of ticks in `[ts_start, ts_end]` carrying `category`
  pub fn count(&self, category: ValueCategory, ts_start: i64, ts_end: i64) -> usize {
    self.in_span(ts_start, ts_end).filter(|s| s.contains(category)).count()
  }

  /// True if every tick in `[ts_start, ts_end]` only carries categories of `allowed`
  pub fn are_all_values_in_categories(&self, allowed: CategorySet, ts_start: i64, ts_end: i64) -> bool {
    self.in_span(ts_start, ts_end).all(|s| s.is_subset_of(&allowed))
  }

  pub fn get_number_upper_touches(&self, ts_start: i64, ts_end: i64) -> usize {
    self.count(ValueCategory::UIn, ts_start, ts_end)
  }

  pub fn get_number_lower_touches(&self, ts_start: i64, ts_end: i64) -> usize {
    self.count(ValueCategory::LIn, ts_start, ts_end)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tick(ts: i64, open: f64, high: f64, low: f64, close: f64) -> WaveTick {
    WaveTick { timestamp: ts, position: ts as usize, open, high, low, close, volume: 0.0 }
  }

  fn flat_bounds() -> BoundaryPair {
    BoundaryPair {
      upper: LinearFunction::horizontal(0, 100.0),
      lower: LinearFunction::horizontal(0, 80.0),
    }
  }

  #[test]
  fn test_exact_touch_is_on_not_out() {
    let t = tick(1, 95.0, 100.0, 90.0, 96.0);
    let set = ValueCategorizer::categorize_tick(&t, &flat_bounds(), None, 0.005, 0.0025);
    assert!(set.contains(ValueCategory::UOn));
    assert!(set.contains(ValueCategory::UIn));
    assert!(!set.contains(ValueCategory::UOut));
    assert!(!set.contains(ValueCategory::MIn));
  }

  #[test]
  fn test_engulfing_is_out_on_both_sides() {
    let t = tick(1, 78.0, 105.0, 75.0, 103.0);
    let set = ValueCategorizer::categorize_tick(&t, &flat_bounds(), None, 0.005, 0.0025);
    assert!(set.contains(ValueCategory::UOut));
    assert!(set.contains(ValueCategory::LOut));
    assert!(!set.contains(ValueCategory::UIn));
  }

  #[test]
  fn test_inside_bar_is_middle() {
    let t = tick(1, 85.0, 90.0, 84.0, 88.0);
    let set = ValueCategorizer::categorize_tick(&t, &flat_bounds(), None, 0.005, 0.0025);
    assert_eq!(set, CategorySet::of(&[ValueCategory::MIn]));
  }

  #[test]
  fn test_near_touch_is_in_but_not_on() {
    // 0.4% below the line: inside touch tolerance, outside equal tolerance
    let t = tick(1, 95.0, 99.6, 90.0, 96.0);
    let set = ValueCategorizer::categorize_tick(&t, &flat_bounds(), None, 0.005, 0.0025);
    assert!(set.contains(ValueCategory::UIn));
    assert!(!set.contains(ValueCategory::UOn));
  }

  #[test]
  fn test_helper_categories() {
    let helper = BoundaryPair {
      upper: LinearFunction::horizontal(0, 110.0),
      lower: LinearFunction::horizontal(0, 80.0),
    };
    let t = tick(1, 100.0, 110.0, 95.0, 105.0);
    let set = ValueCategorizer::categorize_tick(&t, &flat_bounds(), Some(&helper), 0.005, 0.0025);
    assert!(set.contains(ValueCategory::HUOn));
    assert!(set.contains(ValueCategory::UOut));
    assert!(!set.contains(ValueCategory::HMIn));
  }

  #[test]
  fn test_queries_over_span() {
    let ticks = vec![
      tick(0, 95.0, 100.0, 85.0, 96.0),
      tick(1, 85.0, 90.0, 80.0, 88.0),
      tick(2, 85.0, 90.0, 84.0, 88.0),
      tick(3, 95.0, 100.0, 85.0, 96.0),
    ];
    let categorizer = ValueCategorizer::new(&ticks, flat_bounds(), None, 0.005, 0.0025);
    assert_eq!(categorizer.get_number_upper_touches(0, 3), 2);
    assert_eq!(categorizer.get_number_lower_touches(0, 3), 1);
    assert_eq!(categorizer.count(ValueCategory::MIn, 0, 3), 1);
    assert_eq!(categorizer.get_number_upper_touches(1, 2), 0);

    let no_breach = CategorySet::all().without(ValueCategory::UOut).without(ValueCategory::LOut);
    assert!(categorizer.are_all_values_in_categories(no_breach, 0, 3));
    assert!(!categorizer.are_all_values_in_categories(CategorySet::of(&[ValueCategory::MIn]), 0, 3));
    assert_eq!(categorizer.categories_at(2), Some(CategorySet::of(&[ValueCategory::MIn])));
    assert!(categorizer.categories_at(9).is_none());
  }

  #[test]
  fn test_category_set_ops() {
    let set = CategorySet::of(&[ValueCategory::UOn, ValueCategory::UIn]);
    assert_eq!(set.len(), 2);
    assert!(set.is_subset_of(&CategorySet::all()));
    assert!(!CategorySet::all().is_subset_of(&set));
    assert_eq!(set.iter().map(|c| c.as_str()).collect::<Vec<_>>(), vec!["U_on", "U_in"]);
    assert!(CategorySet::EMPTY.is_empty());
  }
}
