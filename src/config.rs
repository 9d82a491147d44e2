use crate::errors::Result;
use crate::forest::RandomCutForest;
use crate::state::ForestConfigState;
use crate::types::Coordinate;
use crate::util::check_argument;

/// Builder for [`RandomCutForest`].
///
/// Every option is validated at `build`; impossible combinations fail with
/// `BadArgument` and nothing is constructed. The element precision is the
/// type parameter of `build`:
///
/// ```ignore
/// let forest = ForestBuilder::new(2)
///     .number_of_trees(50)
///     .sample_size(256)
///     .random_seed(42)
///     .build::<f32>()?;
/// ```
#[derive(Debug, Clone)]
pub struct ForestBuilder {
    dimensions: usize,
    shingle_size: usize,
    number_of_trees: usize,
    sample_size: usize,
    output_after: Option<usize>,
    time_decay: Option<f64>,
    initial_accept_fraction: f64,
    bounding_box_cache_fraction: f64,
    store_sequence_indexes: bool,
    center_of_mass_enabled: bool,
    parallel_execution_enabled: bool,
    thread_pool_size: Option<usize>,
    random_seed: u64,
}

impl ForestBuilder {
    pub fn new(dimensions: usize) -> Self {
        ForestBuilder {
            dimensions,
            shingle_size: 1,
            number_of_trees: 100,
            sample_size: 256,
            output_after: None,
            time_decay: None,
            initial_accept_fraction: 0.125,
            bounding_box_cache_fraction: 1.0,
            store_sequence_indexes: false,
            center_of_mass_enabled: false,
            parallel_execution_enabled: false,
            thread_pool_size: None,
            random_seed: 0,
        }
    }

    /// Shingle size of the (externally shingled) stream; consecutive
    /// points overlapping by `dimensions - dimensions/shingle_size` values
    /// share storage.
    pub fn shingle_size(mut self, shingle_size: usize) -> Self {
        self.shingle_size = shingle_size;
        self
    }

    pub fn number_of_trees(mut self, number_of_trees: usize) -> Self {
        self.number_of_trees = number_of_trees;
        self
    }

    pub fn sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Updates to see before queries produce non-zero output. Defaults to a
    /// quarter of the sample size.
    pub fn output_after(mut self, output_after: usize) -> Self {
        self.output_after = Some(output_after);
        self
    }

    /// The sampler's exponential decay rate; larger values bias the sample
    /// toward recent points. Defaults to `0.1 / sample_size`.
    pub fn time_decay(mut self, time_decay: f64) -> Self {
        self.time_decay = Some(time_decay);
        self
    }

    pub fn initial_accept_fraction(mut self, fraction: f64) -> Self {
        self.initial_accept_fraction = fraction;
        self
    }

    pub fn bounding_box_cache_fraction(mut self, fraction: f64) -> Self {
        self.bounding_box_cache_fraction = fraction;
        self
    }

    /// Leaves remember the sequence indexes of the points that landed on
    /// them (reported by near-neighbor queries).
    pub fn store_sequence_indexes(mut self, enabled: bool) -> Self {
        self.store_sequence_indexes = enabled;
        self
    }

    /// Internal nodes maintain running point sums for center-of-mass
    /// queries.
    pub fn center_of_mass_enabled(mut self, enabled: bool) -> Self {
        self.center_of_mass_enabled = enabled;
        self
    }

    pub fn parallel_execution_enabled(mut self, enabled: bool) -> Self {
        self.parallel_execution_enabled = enabled;
        self
    }

    pub fn thread_pool_size(mut self, threads: usize) -> Self {
        self.thread_pool_size = Some(threads);
        self
    }

    /// Seeds every RNG in the forest; the full forest state is a pure
    /// function of (configuration, seed, input sequence).
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn build<T: Coordinate>(&self) -> Result<RandomCutForest<T>> {
        RandomCutForest::from_config(self.validated_config()?)
    }

    fn validated_config(&self) -> Result<ForestConfigState> {
        check_argument(self.dimensions >= 1, "dimensions must be at least 1")?;
        check_argument(
            self.shingle_size >= 1 && self.dimensions % self.shingle_size == 0,
            "shingle size must divide dimensions",
        )?;
        check_argument(
            self.number_of_trees >= 1,
            "number of trees must be at least 1",
        )?;
        check_argument(self.sample_size >= 2, "sample size must be at least 2")?;
        let output_after = self
            .output_after
            .unwrap_or_else(|| (self.sample_size / 4).max(1));
        let time_decay = self.time_decay.unwrap_or(0.1 / self.sample_size as f64);
        check_argument(
            time_decay >= 0.0 && time_decay.is_finite(),
            "time decay must be a finite non-negative number",
        )?;
        check_argument(
            self.initial_accept_fraction > 0.0 && self.initial_accept_fraction <= 1.0,
            "initial accept fraction must be in (0, 1]",
        )?;
        check_argument(
            (0.0..=1.0).contains(&self.bounding_box_cache_fraction),
            "bounding box cache fraction must lie in [0, 1]",
        )?;
        check_argument(
            self.thread_pool_size != Some(0),
            "thread pool size must be at least 1",
        )?;
        check_argument(
            self.parallel_execution_enabled || self.thread_pool_size.is_none(),
            "thread pool size requires parallel execution",
        )?;
        // leaves are encoded as sample_size + point_index in u32 arenas
        let point_store_capacity = self.number_of_trees as u64 * self.sample_size as u64 + 1;
        check_argument(
            self.sample_size as u64 + point_store_capacity < u32::MAX as u64,
            "sample size times number of trees exceeds the packed index range",
        )?;
        Ok(ForestConfigState {
            dimensions: self.dimensions,
            shingle_size: self.shingle_size,
            number_of_trees: self.number_of_trees,
            sample_size: self.sample_size,
            output_after,
            time_decay,
            initial_accept_fraction: self.initial_accept_fraction,
            bounding_box_cache_fraction: self.bounding_box_cache_fraction,
            store_sequence_indexes: self.store_sequence_indexes,
            center_of_mass_enabled: self.center_of_mass_enabled,
            parallel_execution_enabled: self.parallel_execution_enabled,
            thread_pool_size: self.thread_pool_size,
            random_seed: self.random_seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    #[test]
    fn defaults_build() {
        let forest = ForestBuilder::new(3).build::<f32>().unwrap();
        assert_eq!(forest.dimensions(), 3);
        assert_eq!(forest.number_of_trees(), 100);
        assert_eq!(forest.sample_size(), 256);
        assert_eq!(forest.output_after(), 64);
    }

    #[test]
    fn invalid_options_are_rejected() {
        assert!(matches!(
            ForestBuilder::new(0).build::<f32>(),
            Err(Error::BadArgument { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(3).shingle_size(2).build::<f32>(),
            Err(Error::BadArgument { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(2).sample_size(1).build::<f32>(),
            Err(Error::BadArgument { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(2).initial_accept_fraction(0.0).build::<f32>(),
            Err(Error::BadArgument { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(2)
                .bounding_box_cache_fraction(1.5)
                .build::<f32>(),
            Err(Error::BadArgument { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(2).time_decay(-1.0).build::<f32>(),
            Err(Error::BadArgument { .. })
        ));
        // thread pool settings require the parallel executor
        assert!(matches!(
            ForestBuilder::new(2).thread_pool_size(4).build::<f32>(),
            Err(Error::BadArgument { .. })
        ));
    }

    #[test]
    fn precision_is_a_type_parameter() {
        let f32_forest = ForestBuilder::new(2).sample_size(8).build::<f32>();
        let f64_forest = ForestBuilder::new(2).sample_size(8).build::<f64>();
        assert!(f32_forest.is_ok());
        assert!(f64_forest.is_ok());
    }
}
