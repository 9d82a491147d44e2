use crate::tree::boundingbox::BoundingBox;
use crate::types::{as_f64, Coordinate};

/// A directional vector: one non-negative value per dimension and
/// direction.
///
/// `high[d]` carries the contribution of dimension `d` being unusually
/// large, `low[d]` of it being unusually small. Anomaly attribution is
/// reported this way so a caller can see not only which dimensions made a
/// point anomalous but in which direction each one deviated.
#[derive(Debug, Clone, PartialEq)]
pub struct DiVector {
    pub high: Vec<f64>,
    pub low: Vec<f64>,
}

impl DiVector {
    pub fn empty(dimensions: usize) -> Self {
        DiVector {
            high: vec![0.0; dimensions],
            low: vec![0.0; dimensions],
        }
    }

    pub fn new(high: &[f64], low: &[f64]) -> Self {
        assert!(high.len() == low.len(), "mismatched lengths");
        DiVector {
            high: high.to_vec(),
            low: low.to_vec(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.high.len()
    }

    /// Overwrites this vector with the directional separation probability
    /// of `point` against `bounding_box`: each side gets the margin by
    /// which the point sticks out, scaled so the total is the probability
    /// of separation.
    pub fn assign_as_probability_of_cut<T: Coordinate>(
        &mut self,
        bounding_box: &BoundingBox<T>,
        point: &[T],
    ) {
        let min_values = bounding_box.min_values();
        let max_values = bounding_box.max_values();
        let mut gap = 0.0;
        for (dim, &value) in point.iter().enumerate() {
            self.low[dim] = if value < min_values[dim] {
                as_f64(min_values[dim] - value)
            } else {
                0.0
            };
            self.high[dim] = if value > max_values[dim] {
                as_f64(value - max_values[dim])
            } else {
                0.0
            };
            gap += self.low[dim] + self.high[dim];
        }
        if gap != 0.0 {
            self.scale(1.0 / (bounding_box.range_sum() + gap));
        }
    }

    pub fn add_to(&self, other: &mut DiVector) {
        for (x, &y) in other.high.iter_mut().zip(&self.high) {
            *x += y;
        }
        for (x, &y) in other.low.iter_mut().zip(&self.low) {
            *x += y;
        }
    }

    pub fn add_from_scaled(&mut self, other: &DiVector, factor: f64) {
        for (x, &y) in self.high.iter_mut().zip(&other.high) {
            *x += y * factor;
        }
        for (x, &y) in self.low.iter_mut().zip(&other.low) {
            *x += y * factor;
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for x in self.high.iter_mut() {
            *x *= factor;
        }
        for x in self.low.iter_mut() {
            *x *= factor;
        }
    }

    pub fn divide(&mut self, count: usize) {
        self.scale(1.0 / count as f64);
    }

    /// Sum of every component in both directions.
    pub fn total(&self) -> f64 {
        self.high.iter().sum::<f64>() + self.low.iter().sum::<f64>()
    }

    /// Rescales so the total equals `value`; a vector with no mass spreads
    /// the value evenly over all components.
    pub fn normalize(&mut self, value: f64) {
        let current = self.total();
        if current <= 0.0 {
            let per_component = value / (2.0 * self.high.len() as f64);
            self.high.fill(per_component);
            self.low.fill(per_component);
        } else {
            self.scale(value / current);
        }
    }

    pub fn high_low_sum(&self, dimension: usize) -> f64 {
        self.high[dimension] + self.low[dimension]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_assignment_is_directional() {
        let b = BoundingBox::from_points(&[0.0f32, 0.0], &[1.0, 1.0]);
        let mut v = DiVector::empty(2);
        v.assign_as_probability_of_cut(&b, &[2.0, -1.0]);
        // one unit above in dim 0, one unit below in dim 1, range sum 2
        assert!((v.high[0] - 0.25).abs() < 1e-9);
        assert!((v.low[1] - 0.25).abs() < 1e-9);
        assert_eq!(v.low[0], 0.0);
        assert_eq!(v.high[1], 0.0);
        assert!((v.total() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn normalize_spreads_or_scales() {
        let mut v = DiVector::new(&[3.0, 1.0], &[0.0, 0.0]);
        v.normalize(1.0);
        assert!((v.total() - 1.0).abs() < 1e-9);
        assert!((v.high[0] - 0.75).abs() < 1e-9);

        let mut z = DiVector::empty(2);
        z.normalize(1.0);
        assert!((z.total() - 1.0).abs() < 1e-9);
        assert!((z.high[0] - 0.25).abs() < 1e-9);
    }
}
