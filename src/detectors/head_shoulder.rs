//! Head-and-shoulders (top) and inverse head-and-shoulders (bottom) ranges

use tracing::debug;

use super::{
  helpers::{is_within_tolerance, most_extreme},
  range::{RangeDetection, RejectedCandidate},
};
use crate::{
  categorizer::{BoundaryPair, ValueCategory},
  function::LinearFunction,
  pattern_data::PatternData,
  pattern_type::PatternType,
  range::{reduce_ranges, PatternRange, RangeCheck, RangeRejection},
  tick::WaveTick,
  Side,
};

/// Shoulder time spans may differ by at most this factor
const MAX_SHOULDER_TIME_RATIO: f64 = 2.0;

pub struct HeadShoulderDetector<'d, 'a> {
  data: &'d PatternData<'a>,
}

impl<'d, 'a> HeadShoulderDetector<'d, 'a> {
  pub fn new(data: &'d PatternData<'a>) -> Self {
    Self { data }
  }

  pub fn detect(&self) -> RangeDetection {
    let mut detection = RangeDetection::default();
    for (side, pattern_type) in [(Side::Upper, PatternType::HeadShoulder), (Side::Lower, PatternType::HeadShoulderBottom)] {
      if !self.data.config.is_enabled(pattern_type) {
        continue;
      }
      for w in self.data.extrema(side).windows(3) {
        match self.check(side, &w[0], &w[1], &w[2]) {
          Ok(range) => detection.ranges.push(range),
          Err(reason) => detection.rejections.push(RejectedCandidate {
            side,
            anchor_ts: w[0].timestamp,
            partner_ts: w[2].timestamp,
            reason,
          }),
        }
      }
    }
    detection.ranges = reduce_ranges(detection.ranges);
    debug!(
      accepted = detection.ranges.len(),
      rejected = detection.rejections.len(),
      "head-shoulder pass finished"
    );
    detection
  }

  /// Evaluate shoulders `left`, `right` around `head`; `side` is the side
  /// of the three peaks (upper for a top, lower for a bottom).
  pub fn check(&self, side: Side, left: &WaveTick, head: &WaveTick, right: &WaveTick) -> RangeCheck {
    let data = self.data;
    let config = data.config;
    let tolerance = data.tolerance_pct();
    let breakout_pct = config.breakout_range_pct.get();
    let pattern_type = match side {
      Side::Upper => PatternType::HeadShoulder,
      Side::Lower => PatternType::HeadShoulderBottom,
    };
    let value = |t: &WaveTick| side.value(t);

    if !(side.is_beyond(value(head), value(left)) && side.is_beyond(value(head), value(right))) {
      return Err(RangeRejection::NotHeadShoulder("head is not the extreme peak"));
    }
    if is_within_tolerance(value(head), value(left), tolerance)
      || is_within_tolerance(value(head), value(right), tolerance)
    {
      return Err(RangeRejection::NotHeadShoulder("head not clear of the shoulders"));
    }
    let span = data.ticks_in(left.position, right.position);
    if most_extreme(span, side).map(|t| t.position) != Some(head.position) {
      return Err(RangeRejection::NotHeadShoulder("head is not the extreme of the span"));
    }
    let max_len = config.max_range_length_for(pattern_type);
    if right.position - left.position > max_len {
      return Err(RangeRejection::TooLong { length: right.position - left.position, max: max_len });
    }

    let left_time = (head.position - left.position) as f64;
    let right_time = (right.position - head.position) as f64;
    if left_time.max(right_time) / left_time.min(right_time) > MAX_SHOULDER_TIME_RATIO {
      return Err(RangeRejection::NotHeadShoulder("asymmetric shoulder timing"));
    }

    let neck_side = side.opposite();
    let neck_left = most_extreme(data.ticks_between(left.position, head.position), neck_side)
      .ok_or(RangeRejection::NotHeadShoulder("no left neck"))?;
    let neck_right = most_extreme(data.ticks_between(head.position, right.position), neck_side)
      .ok_or(RangeRejection::NotHeadShoulder("no right neck"))?;
    let neckline = LinearFunction::through(
      neck_left.timestamp,
      neck_side.value(&neck_left),
      neck_right.timestamp,
      neck_side.value(&neck_right),
    );

    for peak in [left, head, right] {
      let neck = neckline.value_at(peak.timestamp);
      if !side.is_beyond(value(peak), neck) || is_within_tolerance(value(peak), neck, tolerance) {
        return Err(RangeRejection::NotHeadShoulder("peak not clear of the neckline"));
      }
    }
    let head_height = side.excess(value(head), neckline.value_at(head.timestamp));
    if (value(left) - value(right)).abs() > config.shoulder_symmetry_pct.get() * head_height {
      return Err(RangeRejection::NotHeadShoulder("asymmetric shoulder heights"));
    }

    let height = data.height(left.position, right.position);
    if height <= 0.0 {
      return Err(RangeRejection::Degenerate("non-positive height"));
    }
    if let Some(t) = span
      .iter()
      .find(|t| neck_side.excess(t.close, neckline.value_at(t.timestamp)) > breakout_pct * height)
    {
      return Err(RangeRejection::ClosedBeyondBoundary { ts: t.timestamp });
    }

    let shoulder_line = LinearFunction::through(left.timestamp, value(left), right.timestamp, value(right));
    let head_line = LinearFunction::horizontal(head.timestamp, value(head));
    let (f_upper, f_lower, h_upper, h_lower) = match side {
      Side::Upper => (shoulder_line, neckline, head_line, neckline),
      Side::Lower => (neckline, shoulder_line, neckline, head_line),
    };
    let helper = BoundaryPair { upper: h_upper, lower: h_lower };
    let categorizer = data.categorizer(
      left.position,
      right.position,
      BoundaryPair { upper: f_upper, lower: f_lower },
      Some(helper),
    );
    let with_category = |category: ValueCategory| -> Vec<WaveTick> {
      span.iter()
        .filter(|t| categorizer.categories_at(t.timestamp).is_some_and(|c| c.contains(category)))
        .copied()
        .collect()
    };
    let upper_touches = with_category(ValueCategory::UIn);
    let lower_touches = with_category(ValueCategory::LIn);
    let helper_touches = with_category(match side {
      Side::Upper => ValueCategory::HUIn,
      Side::Lower => ValueCategory::HLIn,
    });

    let params = config.params_for(pattern_type);
    let touches = upper_touches.len() + lower_touches.len() + helper_touches.len();
    if touches < params.min_touches {
      return Err(RangeRejection::TooFewTouches { found: touches, required: params.min_touches });
    }

    let window_end = self.window_end(side, &neckline, head, right, left.position + max_len, height);
    let ticks = data.ticks();
    Ok(PatternRange {
      pattern_type,
      main_side: side,
      tick_first: *left,
      tick_last: *right,
      tick_window_end: ticks[window_end],
      f_upper,
      f_lower,
      h_upper: Some(h_upper),
      h_lower: Some(h_lower),
      upper_touches,
      lower_touches,
      helper_touches,
      height,
      mean_close: data.mean_close(left.position, right.position),
    })
  }

  /// Last tick after the right shoulder before the neckline breaks or the head is exceeded
  fn window_end(
    &self,
    side: Side,
    neckline: &LinearFunction,
    head: &WaveTick,
    right: &WaveTick,
    limit: usize,
    height: f64,
  ) -> usize {
    let breakout_pct = self.data.config.breakout_range_pct.get();
    let limit = limit.min(self.data.last_position());
    let neck_side = side.opposite();
    self.data
      .ticks_in(right.position + 1, limit)
      .iter()
      .find(|t| {
        neck_side.excess(t.close, neckline.value_at(t.timestamp)) > breakout_pct * height
          || side.is_beyond(side.value(*t), side.value(head))
      })
      .map_or(limit.max(right.position), |t| t.position - 1)
  }
}
