use crate::divector::DiVector;
use crate::tree::boundingbox::BoundingBox;
use crate::types::{as_f64, Coordinate};

/// Directional interpolation statistics gathered along traversals.
///
/// `measure` accumulates score mass, `distance` the gap-weighted extents
/// and `probability_mass` the separation probabilities, all split by
/// dimension and direction. Together they support density and directional
/// density estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationMeasure {
    pub measure: DiVector,
    pub distance: DiVector,
    pub probability_mass: DiVector,
    pub sample_size: f64,
}

impl InterpolationMeasure {
    pub fn empty(dimensions: usize, sample_size: f64) -> Self {
        InterpolationMeasure {
            measure: DiVector::empty(dimensions),
            distance: DiVector::empty(dimensions),
            probability_mass: DiVector::empty(dimensions),
            sample_size,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.measure.dimensions()
    }

    pub fn add_to(&self, other: &mut InterpolationMeasure) {
        self.measure.add_to(&mut other.measure);
        self.distance.add_to(&mut other.distance);
        self.probability_mass.add_to(&mut other.probability_mass);
        other.sample_size += self.sample_size;
    }

    pub fn scale(&mut self, factor: f64) {
        self.measure.scale(factor);
        self.distance.scale(factor);
        self.probability_mass.scale(factor);
    }

    pub fn divide(&mut self, count: usize) {
        self.scale(1.0 / count as f64);
        self.sample_size /= count as f64;
    }

    /// Folds one node's bounding box into the running statistics, weighted
    /// by the separation probability, and returns that probability.
    pub fn update<T: Coordinate>(
        &mut self,
        point: &[T],
        bounding_box: &BoundingBox<T>,
        measure: f64,
    ) -> f64 {
        let min_values = bounding_box.min_values();
        let max_values = bounding_box.max_values();
        let mut gap = 0.0;
        for (dim, &v) in point.iter().enumerate() {
            if v < min_values[dim] {
                gap += as_f64(min_values[dim] - v);
            } else if v > max_values[dim] {
                gap += as_f64(v - max_values[dim]);
            }
        }
        let new_range = gap + bounding_box.range_sum();
        if gap == 0.0 || new_range == 0.0 {
            return 0.0;
        }
        let probability = gap / new_range;
        self.scale(1.0 - probability);
        for (dim, &v) in point.iter().enumerate() {
            if v > max_values[dim] {
                let t = as_f64(v - max_values[dim]) / new_range;
                self.distance.high[dim] += t * as_f64(v - min_values[dim]);
                self.probability_mass.high[dim] += t;
                self.measure.high[dim] += measure * t;
            } else if v < min_values[dim] {
                let t = as_f64(min_values[dim] - v) / new_range;
                self.distance.low[dim] += t * as_f64(max_values[dim] - v);
                self.probability_mass.low[dim] += t;
                self.measure.low[dim] += measure * t;
            }
        }
        probability
    }

    /// Directional density with an explicit regularization threshold and
    /// manifold dimension.
    pub fn directional_measure(&self, threshold: f64, manifold_dimension: f64) -> DiVector {
        if self.sample_size <= 0.0 || self.measure.total() <= 0.0 {
            return DiVector::empty(self.dimensions());
        }
        let mut sum_of_factors = 0.0;
        for dim in 0..self.dimensions() {
            let mass = self.probability_mass.high_low_sum(dim);
            let mut factor = if mass > 0.0 {
                self.distance.high_low_sum(dim) / mass
            } else {
                0.0
            };
            if factor > 0.0 {
                factor = f64::exp(f64::ln(factor) * manifold_dimension) * mass;
            }
            sum_of_factors += factor;
        }
        let mut answer = self.measure.clone();
        answer.scale(1.0 / (threshold + sum_of_factors));
        answer
    }

    pub fn directional_density(&self) -> DiVector {
        self.directional_measure(1e-3, self.dimensions() as f64)
    }

    pub fn density(&self) -> f64 {
        self.directional_density().total()
    }
}

/// Result of a `simple_density` query.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityResult {
    measure: InterpolationMeasure,
}

impl DensityResult {
    pub(crate) fn new(measure: InterpolationMeasure) -> Self {
        DensityResult { measure }
    }

    /// Scalar density estimate at the query point.
    pub fn density(&self) -> f64 {
        self.measure.density()
    }

    /// Per-dimension, per-direction density decomposition.
    pub fn directional_density(&self) -> DiVector {
        self.measure.directional_density()
    }

    /// The raw interpolation statistics behind the estimate.
    pub fn interpolant(&self) -> &InterpolationMeasure {
        &self.measure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_accumulates_directionally() {
        let b = BoundingBox::from_points(&[0.0f32, 0.0], &[1.0, 1.0]);
        let mut m = InterpolationMeasure::empty(2, 1.0);
        let p = m.update(&[2.0, 0.5], &b, 1.0);
        assert!((p - 1.0 / 3.0).abs() < 1e-6);
        assert!(m.probability_mass.high[0] > 0.0);
        assert_eq!(m.probability_mass.low[0], 0.0);
        assert_eq!(m.probability_mass.high[1], 0.0);
    }

    #[test]
    fn interior_point_contributes_nothing() {
        let b = BoundingBox::from_points(&[0.0f32, 0.0], &[1.0, 1.0]);
        let mut m = InterpolationMeasure::empty(2, 1.0);
        assert_eq!(m.update(&[0.5, 0.5], &b, 1.0), 0.0);
        assert_eq!(m.measure.total(), 0.0);
    }
}
