use crate::types::{as_f64, Coordinate};

/// Axis-aligned bounding box of the points beneath a tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox<T> {
    min_values: Vec<T>,
    max_values: Vec<T>,
    range_sum: f64,
}

impl<T: Coordinate> BoundingBox<T> {
    /// Smallest box containing both points.
    pub fn from_points(first: &[T], second: &[T]) -> Self {
        debug_assert_eq!(first.len(), second.len());
        let min_values: Vec<T> = first.iter().zip(second).map(|(&a, &b)| a.min(b)).collect();
        let max_values: Vec<T> = first.iter().zip(second).map(|(&a, &b)| a.max(b)).collect();
        let range_sum = Self::compute_range_sum(&min_values, &max_values);
        BoundingBox {
            min_values,
            max_values,
            range_sum,
        }
    }

    /// Degenerate box of a single point.
    pub fn from_point(point: &[T]) -> Self {
        BoundingBox {
            min_values: point.to_vec(),
            max_values: point.to_vec(),
            range_sum: 0.0,
        }
    }

    fn compute_range_sum(min_values: &[T], max_values: &[T]) -> f64 {
        min_values
            .iter()
            .zip(max_values)
            .map(|(&lo, &hi)| as_f64(hi - lo))
            .sum()
    }

    /// Extends the box to contain `point`; returns true when the box was
    /// already large enough.
    pub fn add_point(&mut self, point: &[T]) -> bool {
        self.extend(point, point)
    }

    /// Extends the box to contain `other`.
    pub fn add_box(&mut self, other: &BoundingBox<T>) {
        self.extend(&other.min_values, &other.max_values);
    }

    fn extend(&mut self, lows: &[T], highs: &[T]) -> bool {
        let old_sum = self.range_sum;
        for (x, &y) in self.min_values.iter_mut().zip(lows) {
            if y < *x {
                *x = y;
            }
        }
        for (x, &y) in self.max_values.iter_mut().zip(highs) {
            if y > *x {
                *x = y;
            }
        }
        self.range_sum = Self::compute_range_sum(&self.min_values, &self.max_values);
        old_sum == self.range_sum
    }

    pub fn contains(&self, point: &[T]) -> bool {
        self.min_values
            .iter()
            .zip(point)
            .zip(&self.max_values)
            .all(|((&lo, &v), &hi)| lo <= v && v <= hi)
    }

    pub fn min_values(&self) -> &[T] {
        &self.min_values
    }

    pub fn max_values(&self) -> &[T] {
        &self.max_values
    }

    pub fn range_sum(&self) -> f64 {
        self.range_sum
    }

    /// Probability that a random cut on the box merged with `point`
    /// separates `point` from the box.
    pub fn probability_of_cut(&self, point: &[T]) -> f64 {
        let gap = self.margin_sum(point, None);
        if gap == 0.0 {
            0.0
        } else if self.range_sum == 0.0 {
            1.0
        } else {
            gap / (self.range_sum + gap)
        }
    }

    /// As `probability_of_cut`, skipping flagged coordinates.
    pub fn probability_of_cut_with_missing(
        &self,
        point: &[T],
        missing_coordinates: &[bool],
    ) -> f64 {
        let gap = self.margin_sum(point, Some(missing_coordinates));
        if gap == 0.0 {
            0.0
        } else if self.range_sum == 0.0 {
            1.0
        } else {
            gap / (self.range_sum + gap)
        }
    }

    fn margin_sum(&self, point: &[T], missing: Option<&[bool]>) -> f64 {
        let mut sum = 0.0;
        for (dim, &value) in point.iter().enumerate() {
            if let Some(flags) = missing {
                if flags[dim] {
                    continue;
                }
            }
            if value < self.min_values[dim] {
                sum += as_f64(self.min_values[dim] - value);
            } else if value > self.max_values[dim] {
                sum += as_f64(value - self.max_values[dim]);
            }
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_and_extension() {
        let mut b = BoundingBox::from_points(&[0.0f32, 2.0], &[1.0, 0.0]);
        assert_eq!(b.min_values(), &[0.0, 0.0]);
        assert_eq!(b.max_values(), &[1.0, 2.0]);
        assert!((b.range_sum() - 3.0).abs() < 1e-9);

        // interior point leaves the box untouched
        assert!(b.add_point(&[0.5, 1.0]));
        // exterior point grows the box
        assert!(!b.add_point(&[2.0, 1.0]));
        assert!((b.range_sum() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn probability_of_cut_basics() {
        let b = BoundingBox::from_points(&[0.0f32, 0.0], &[1.0, 1.0]);
        assert_eq!(b.probability_of_cut(&[0.5, 0.5]), 0.0);
        // one unit of margin against two units of range
        let p = b.probability_of_cut(&[2.0, 0.5]);
        assert!((p - 1.0 / 3.0).abs() < 1e-6);
        // a degenerate box is always separated from a distinct point
        let d = BoundingBox::from_point(&[1.0f32, 1.0]);
        assert_eq!(d.probability_of_cut(&[1.0, 2.0]), 1.0);
        assert_eq!(d.probability_of_cut(&[1.0, 1.0]), 0.0);
    }

    #[test]
    fn missing_coordinates_are_skipped() {
        let b = BoundingBox::from_points(&[0.0f32, 0.0], &[1.0, 1.0]);
        let p = b.probability_of_cut_with_missing(&[5.0, 0.5], &[true, false]);
        assert_eq!(p, 0.0);
    }
}
