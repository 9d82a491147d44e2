use crate::errors::{Error, Result};
use crate::types::{as_f64, Coordinate};

/// Returns `BadArgument` with the given message when the condition fails.
pub(crate) fn check_argument(condition: bool, msg: &'static str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::BadArgument { msg })
    }
}

/// Returns `InvalidState` with the given message when the condition fails.
pub(crate) fn check_state(condition: bool, msg: &'static str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::InvalidState { msg })
    }
}

/// L1 (Manhattan) distance between two equal-length points.
pub fn l1_distance<T: Coordinate>(a: &[T], b: &[T]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| as_f64((x - y).abs()))
        .sum()
}

/// L2 (Euclidean) distance between two equal-length points.
pub fn l2_distance<T: Coordinate>(a: &[T], b: &[T]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = as_f64(x - y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Fold helper for scalar ensemble results.
pub(crate) fn add_to(value: &f64, accumulator: &mut f64) {
    *accumulator += *value;
}

/// Finisher that averages a scalar over the ensemble.
pub(crate) fn divide(accumulator: &mut f64, count: usize) {
    *accumulator /= count as f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distances() {
        let a = [0.0f32, 3.0];
        let b = [4.0f32, 0.0];
        assert!((l1_distance(&a, &b) - 7.0).abs() < 1e-9);
        assert!((l2_distance(&a, &b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn argument_check() {
        assert!(check_argument(true, "fine").is_ok());
        assert_eq!(
            check_argument(false, "broken"),
            Err(Error::BadArgument { msg: "broken" })
        );
    }
}
