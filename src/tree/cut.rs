use crate::tree::boundingbox::BoundingBox;
use crate::types::{as_f64, from_f64, Coordinate};

/// A partition of a bounding box: points with `point[dimension] <= value`
/// fall to the left child, the rest to the right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cut<T> {
    pub dimension: usize,
    pub value: T,
}

impl<T: Coordinate> Cut<T> {
    pub fn new(dimension: usize, value: T) -> Self {
        Cut { dimension, value }
    }

    /// Sentinel for "no cut drawn yet".
    pub(crate) fn none() -> Self {
        Cut {
            dimension: usize::MAX,
            value: T::zero(),
        }
    }

    pub(crate) fn is_none(&self) -> bool {
        self.dimension == usize::MAX
    }

    /// Draws the random cut determined by `factor` on the box merged with
    /// `point`, reporting whether the cut falls in the margin strictly
    /// outside the box (a separating cut).
    ///
    /// `factor` must be a uniform draw in `[0, 1)`; the cut position is
    /// `factor` scaled by the merged box's total range, walked across the
    /// dimensions in order. Zero-range dimensions receive no mass and are
    /// skipped. Returns a `none` cut when the merged range is zero (the
    /// point coincides with a degenerate box).
    pub(crate) fn random_cut_and_separation(
        bounding_box: &BoundingBox<T>,
        factor: f64,
        point: &[T],
    ) -> (Cut<T>, bool) {
        let min_values = bounding_box.min_values();
        let max_values = bounding_box.max_values();

        let margin: f64 = min_values
            .iter()
            .zip(max_values)
            .zip(point)
            .map(|((&lo, &hi), &v)| {
                if v < lo {
                    as_f64(lo - v)
                } else if v > hi {
                    as_f64(v - hi)
                } else {
                    0.0
                }
            })
            .sum();
        if margin == 0.0 {
            // the point lies inside the box; no cut can separate it
            return (Cut::none(), false);
        }

        let mut remainder = (margin + bounding_box.range_sum()) * factor;
        let mut dimension = 0;
        let mut cut_value = T::zero();
        loop {
            let lo = point[dimension].min(min_values[dimension]);
            let hi = point[dimension].max(max_values[dimension]);
            let gap = as_f64(hi - lo);
            if gap >= remainder && gap > 0.0 || dimension == point.len() - 1 {
                cut_value = lo + from_f64::<T>(remainder);
                // precision lost above can push the value onto an endpoint
                if cut_value <= lo || cut_value >= hi {
                    cut_value = lo;
                }
                break;
            }
            remainder -= gap;
            dimension += 1;
        }

        let separation = (point[dimension] <= cut_value && cut_value < min_values[dimension])
            || (max_values[dimension] <= cut_value && cut_value < point[dimension]);
        (Cut::new(dimension, cut_value), separation)
    }
}
