use log::debug;

use crate::errors::Result;
use crate::util::check_argument;

/// Discounted running mean and standard deviation.
///
/// With a zero discount this is a plain running statistic; a positive
/// discount biases toward recent values, capped so early values still
/// carry weight.
#[derive(Debug, Clone, PartialEq)]
pub struct Deviation {
    discount: f64,
    weight: f64,
    sum: f64,
    sum_squared: f64,
    count: u64,
}

impl Deviation {
    pub fn new(discount: f64) -> Result<Self> {
        check_argument(
            (0.0..1.0).contains(&discount),
            "discount must lie in [0, 1)",
        )?;
        Ok(Deviation {
            discount,
            weight: 0.0,
            sum: 0.0,
            sum_squared: 0.0,
            count: 0,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.weight <= 0.0
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.sum / self.weight
        }
    }

    pub fn update(&mut self, value: f64) {
        let factor = if self.discount == 0.0 {
            1.0
        } else {
            (1.0 - self.discount).min(1.0 - 1.0 / (self.count + 2) as f64)
        };
        self.sum = self.sum * factor + value;
        self.sum_squared = self.sum_squared * factor + value * value;
        self.weight = self.weight * factor + 1.0;
        self.count += 1;
    }

    pub fn deviation(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let mean = self.sum / self.weight;
        let variance = self.sum_squared / self.weight - mean * mean;
        if variance > 0.0 {
            variance.sqrt()
        } else {
            0.0
        }
    }
}

/// An ensemble accumulator that may declare convergence early.
///
/// Query execution feeds per-tree results in batches (one per worker in
/// the parallel executor); after each batch the accumulator may report
/// that more trees would not change the answer, short-circuiting the
/// remaining traversals.
pub trait ConvergingAccumulator {
    fn accept(&mut self, value: f64);

    fn is_converged(&self) -> bool;

    /// Number of per-tree values consumed so far.
    fn accepted(&self) -> usize;

    /// Sum of the accepted values; the executor applies the `1/accepted`
    /// finisher.
    fn total(&self) -> f64;
}

/// One-sided standard-deviation convergence test.
///
/// Tracks a running mean of the accepted values and counts "witnesses":
/// values landing beyond the mean in the critical direction. Once at least
/// `min_values_accepted` values have arrived and the witness count exceeds
/// `1/precision`, the estimate is declared stable. At most
/// `max_values_accepted` values are ever consumed.
pub struct OneSidedStdDevAccumulator {
    high_is_critical: bool,
    precision: f64,
    min_values_accepted: usize,
    max_values_accepted: usize,
    witnesses: usize,
    accepted: usize,
    total: f64,
    deviation: Deviation,
}

impl OneSidedStdDevAccumulator {
    pub fn new(
        high_is_critical: bool,
        precision: f64,
        min_values_accepted: usize,
        max_values_accepted: usize,
    ) -> Result<Self> {
        check_argument(
            precision > 0.0 && precision < 1.0,
            "precision must lie in (0, 1)",
        )?;
        check_argument(
            min_values_accepted >= 1 && min_values_accepted <= max_values_accepted,
            "min values accepted must lie in [1, max values accepted]",
        )?;
        Ok(OneSidedStdDevAccumulator {
            high_is_critical,
            precision,
            min_values_accepted,
            max_values_accepted,
            witnesses: 0,
            accepted: 0,
            total: 0.0,
            deviation: Deviation::new(0.0)?,
        })
    }
}

impl ConvergingAccumulator for OneSidedStdDevAccumulator {
    fn accept(&mut self, value: f64) {
        self.accepted += 1;
        self.total += value;
        if !self.deviation.is_empty() {
            let threshold =
                self.deviation.mean() + self.precision * self.deviation.deviation();
            let witnessed = if self.high_is_critical {
                value > threshold
            } else {
                value < self.deviation.mean() - self.precision * self.deviation.deviation()
            };
            if witnessed {
                self.witnesses += 1;
            }
        }
        self.deviation.update(value);
        if self.is_converged() {
            debug!(
                "converged after {} values with {} witnesses",
                self.accepted, self.witnesses
            );
        }
    }

    fn is_converged(&self) -> bool {
        self.accepted >= self.max_values_accepted
            || (self.accepted >= self.min_values_accepted
                && self.witnesses as f64 * self.precision > 1.0)
    }

    fn accepted(&self) -> usize {
        self.accepted
    }

    fn total(&self) -> f64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deviation_tracks_mean_and_spread() {
        let mut d = Deviation::new(0.0).unwrap();
        for v in [1.0, 2.0, 3.0, 4.0] {
            d.update(v);
        }
        assert!((d.mean() - 2.5).abs() < 1e-9);
        assert!((d.deviation() - (1.25f64).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn constant_stream_never_witnesses() {
        let mut acc = OneSidedStdDevAccumulator::new(true, 0.1, 5, 100).unwrap();
        for _ in 0..100 {
            acc.accept(1.0);
        }
        // only the max-values bound fires
        assert!(acc.is_converged());
        assert_eq!(acc.accepted(), 100);
        assert!((acc.total() / acc.accepted() as f64 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn repeated_spikes_converge_before_the_cap() {
        let mut acc = OneSidedStdDevAccumulator::new(true, 0.1, 5, 1000).unwrap();
        let mut fed = 0;
        for i in 0..1000 {
            // alternate baseline and spikes so witnesses accumulate
            let value = if i % 2 == 0 { 1.0 } else { 3.0 };
            acc.accept(value);
            fed += 1;
            if acc.is_converged() {
                break;
            }
        }
        assert!(acc.is_converged());
        assert!(fed < 1000, "spiky stream should converge early");
        // more than 1/precision witnesses were required
        assert!(fed > 10);
    }

    #[test]
    fn respects_min_values() {
        let mut acc = OneSidedStdDevAccumulator::new(true, 0.5, 50, 1000).unwrap();
        for i in 0..49 {
            acc.accept(i as f64);
        }
        assert!(!acc.is_converged());
    }
}
