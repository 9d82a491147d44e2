use std::fmt::{Debug, Display};
use std::iter::Sum;

use num::Float;

/// Element type of the points stored by a forest.
///
/// The precision is forest-wide and fixed at construction; picking `f32`
/// halves the memory of the point store and the bounding-box cache, `f64`
/// tightens the reproducibility tolerances. Probabilities and scores are
/// always computed in `f64` regardless of the storage precision.
pub trait Coordinate:
    Float + Sum<Self> + Debug + Display + Send + Sync + 'static
{
}

impl Coordinate for f32 {}
impl Coordinate for f64 {}

/// Lossless widening used by score arithmetic.
pub(crate) fn as_f64<T: Coordinate>(value: T) -> f64 {
    value.to_f64().expect("coordinate widens to f64")
}

/// Narrowing conversion back into the storage precision.
pub(crate) fn from_f64<T: Coordinate>(value: f64) -> T {
    T::from(value).expect("f64 narrows to coordinate")
}
