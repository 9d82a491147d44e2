use std::collections::HashMap;

use log::{debug, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;
use rayon::prelude::*;

use crate::accumulator::{ConvergingAccumulator, OneSidedStdDevAccumulator};
use crate::component::{SampledTree, UpdateResult, NO_REF};
use crate::divector::DiVector;
use crate::errors::{Error, Result};
use crate::measure::{DensityResult, InterpolationMeasure};
use crate::state::{ForestConfigState, ForestState};
use crate::store::points::PointStore;
use crate::types::Coordinate;
use crate::util::{add_to, check_argument, check_state, divide};
use crate::visitor::{
    AnomalyScoreVisitor, AttributionVisitor, ImputeCandidate, InterpolationVisitor,
    NearNeighborVisitor, NeighborCandidate, Visitor, VisitorInfo,
};

/// A near neighbor from the forest's current sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor<T> {
    pub point: Vec<T>,
    pub distance: f64,
    /// Sequence indexes of the stream points that landed on this sample
    /// point, merged across trees; empty unless the forest tracks them.
    pub sequence_indexes: Vec<u64>,
}

/// The streaming random cut forest.
///
/// Owns `number_of_trees` (sampler, tree) components over one shared point
/// store and routes every update and query through them, sequentially or
/// on a dedicated worker pool. The full forest state is a pure function of
/// the configuration, the seed and the input sequence; parallel execution
/// preserves per-component order and folds results in component order, so
/// it is bitwise identical to sequential execution.
pub struct RandomCutForest<T: Coordinate> {
    config: ForestConfigState,
    components: Vec<SampledTree<T>>,
    point_store: PointStore<T>,
    total_updates: u64,
    thread_pool: Option<rayon::ThreadPool>,
}

fn add_neighbor(candidate: &Option<NeighborCandidate>, list: &mut Vec<NeighborCandidate>) {
    if let Some(c) = candidate {
        list.push(c.clone());
    }
}

fn neighbor_finish(_list: &mut Vec<NeighborCandidate>, _count: usize) {}

impl<T: Coordinate> RandomCutForest<T> {
    pub(crate) fn from_config(config: ForestConfigState) -> Result<Self> {
        let point_store_capacity =
            (config.number_of_trees * config.sample_size + 1).max(2 * config.sample_size);
        let initial_capacity = 2 * config.sample_size;
        let point_store = PointStore::new(
            config.dimensions,
            config.shingle_size,
            point_store_capacity,
            initial_capacity,
        )?;

        let mut rng = ChaCha20Rng::seed_from_u64(config.random_seed);
        let mut components = Vec::with_capacity(config.number_of_trees);
        for _ in 0..config.number_of_trees {
            components.push(SampledTree::new(
                config.dimensions,
                config.sample_size,
                config.time_decay,
                config.initial_accept_fraction,
                config.store_sequence_indexes,
                config.center_of_mass_enabled,
                config.bounding_box_cache_fraction,
                rng.next_u64(),
            )?);
        }
        let thread_pool = Self::build_thread_pool(&config)?;
        debug!(
            "forest ready: {} trees, sample size {}, dimensions {}, parallel {}",
            config.number_of_trees,
            config.sample_size,
            config.dimensions,
            thread_pool.is_some()
        );
        Ok(RandomCutForest {
            config,
            components,
            point_store,
            total_updates: 0,
            thread_pool,
        })
    }

    fn build_thread_pool(config: &ForestConfigState) -> Result<Option<rayon::ThreadPool>> {
        if !config.parallel_execution_enabled {
            return Ok(None);
        }
        let threads = config.thread_pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map(Some)
            .map_err(|_| Error::InvalidState {
                msg: "could not build the worker pool",
            })
    }

    // -- update protocol --------------------------------------------------

    /// Consumes one stream point.
    ///
    /// The point is interned once; every component then independently
    /// proposes, mutates its tree and commits. Reference-count adjustments
    /// are applied afterwards on the calling thread, increment before
    /// decrement so a slot shared between the accepted and evicted side is
    /// never freed in between. A slot no component kept is released.
    pub fn update(&mut self, point: &[T]) -> Result<()> {
        check_argument(point.len() == self.config.dimensions, "wrong point length")?;
        check_argument(
            point.iter().all(|v| v.is_finite()),
            "point must be finite",
        )?;

        let slot = self.point_store.add(point)?;
        let sequence_index = self.total_updates;
        let store = &self.point_store;
        let components = &mut self.components;
        let results: Vec<UpdateResult> = match &self.thread_pool {
            Some(pool) => pool.install(|| {
                components
                    .par_iter_mut()
                    .map(|c| Self::component_update(c, slot, sequence_index, store))
                    .collect()
            }),
            None => components
                .iter_mut()
                .map(|c| Self::component_update(c, slot, sequence_index, store))
                .collect(),
        };

        for &(accepted, evicted) in &results {
            if accepted != NO_REF {
                self.point_store.increment_ref_count(accepted)?;
                if evicted != NO_REF {
                    self.point_store.decrement_ref_count(evicted)?;
                }
            }
        }
        self.point_store.release_if_unreferenced(slot)?;
        self.total_updates += 1;
        Ok(())
    }

    /// One component's update; a failing component is rolled back (its
    /// refcounts never applied) without failing the others.
    fn component_update(
        component: &mut SampledTree<T>,
        slot: usize,
        sequence_index: u64,
        store: &PointStore<T>,
    ) -> UpdateResult {
        match component.update(slot, sequence_index, store) {
            Ok(result) => result,
            Err(e) => {
                warn!("component update failed and was skipped: {}", e);
                (NO_REF, NO_REF)
            }
        }
    }

    // -- query protocol ---------------------------------------------------

    fn traverse_ensemble<V, R, S>(
        &self,
        point: &[T],
        parameters: &[usize],
        info: &VisitorInfo<T>,
        visitor_factory: fn(usize, &[usize], &VisitorInfo<T>) -> V,
        default: &R,
        initial: &S,
        collect_to: fn(&R, &mut S),
        finish: fn(&mut S, usize),
    ) -> Result<S>
    where
        V: Visitor<T, R>,
        R: Clone + Send + Sync,
        S: Clone,
    {
        check_argument(point.len() == self.config.dimensions, "wrong point length")?;
        let store = &self.point_store;
        let results: Vec<R> = match &self.thread_pool {
            Some(pool) => pool.install(|| {
                self.components
                    .par_iter()
                    .map(|c| c.traverse(point, parameters, visitor_factory, info, store, default))
                    .collect::<Result<Vec<R>>>()
            })?,
            None => self
                .components
                .iter()
                .map(|c| c.traverse(point, parameters, visitor_factory, info, store, default))
                .collect::<Result<Vec<R>>>()?,
        };
        let mut answer = initial.clone();
        for r in &results {
            collect_to(r, &mut answer);
        }
        finish(&mut answer, self.components.len());
        Ok(answer)
    }

    /// Anomaly score of `point` against the current sample; zero until
    /// `output_after` updates have been seen.
    pub fn anomaly_score(&self, point: &[T]) -> Result<f64> {
        self.score_traversal(point, &VisitorInfo::default())
    }

    /// Density-flavored score that weighs displacement instead of depth.
    pub fn displacement_score(&self, point: &[T]) -> Result<f64> {
        self.score_traversal(point, &VisitorInfo::displacement())
    }

    /// Scoring with caller-supplied shape functions.
    pub fn generic_score(
        &self,
        point: &[T],
        ignore_mass: usize,
        score_seen: fn(usize, usize) -> f64,
        score_unseen: fn(usize, usize) -> f64,
        damp: fn(usize, usize) -> f64,
        normalizer: fn(f64, usize) -> f64,
    ) -> Result<f64> {
        self.score_traversal(
            point,
            &VisitorInfo::use_score(ignore_mass, score_seen, score_unseen, damp, normalizer),
        )
    }

    pub fn score_traversal(&self, point: &[T], info: &VisitorInfo<T>) -> Result<f64> {
        check_argument(point.len() == self.config.dimensions, "wrong point length")?;
        if !self.is_output_ready() {
            return Ok(0.0);
        }
        self.traverse_ensemble(
            point,
            &[],
            info,
            AnomalyScoreVisitor::create_visitor,
            &0.0,
            &0.0,
            add_to,
            divide,
        )
    }

    /// Per-dimension directional decomposition of the anomaly score; the
    /// high+low total equals `anomaly_score` up to floating error.
    pub fn anomaly_attribution(&self, point: &[T]) -> Result<DiVector> {
        self.attribution_traversal(point, &VisitorInfo::default())
    }

    pub fn attribution_traversal(
        &self,
        point: &[T],
        info: &VisitorInfo<T>,
    ) -> Result<DiVector> {
        let dimensions = self.config.dimensions;
        check_argument(point.len() == dimensions, "wrong point length")?;
        if !self.is_output_ready() {
            return Ok(DiVector::empty(dimensions));
        }
        let parameters = [dimensions];
        self.traverse_ensemble(
            point,
            &parameters,
            info,
            AttributionVisitor::create_visitor,
            &DiVector::empty(dimensions),
            &DiVector::empty(dimensions),
            DiVector::add_to,
            DiVector::divide,
        )
    }

    /// Density estimate at `point` with directional detail.
    pub fn simple_density(&self, point: &[T]) -> Result<DensityResult> {
        let dimensions = self.config.dimensions;
        check_argument(point.len() == dimensions, "wrong point length")?;
        if !self.is_output_ready() {
            return Ok(DensityResult::new(InterpolationMeasure::empty(
                dimensions, 0.0,
            )));
        }
        let parameters = [dimensions];
        let measure = self.traverse_ensemble(
            point,
            &parameters,
            &VisitorInfo::default(),
            InterpolationVisitor::create_visitor,
            &InterpolationMeasure::empty(dimensions, 0.0),
            &InterpolationMeasure::empty(dimensions, 0.0),
            InterpolationMeasure::add_to,
            InterpolationMeasure::divide,
        )?;
        Ok(DensityResult::new(measure))
    }

    /// The `k` nearest sample points along the canonical paths, ascending
    /// by distance, sequence indexes merged across trees holding the same
    /// point.
    pub fn near_neighbors_in_sample(&self, point: &[T], k: usize) -> Result<Vec<Neighbor<T>>> {
        check_argument(k >= 1, "need at least one neighbor")?;
        check_argument(point.len() == self.config.dimensions, "wrong point length")?;
        if !self.is_output_ready() {
            return Ok(Vec::new());
        }
        let candidates = self.traverse_ensemble(
            point,
            &[],
            &VisitorInfo::default(),
            NearNeighborVisitor::create_visitor,
            &None,
            &Vec::new(),
            add_neighbor,
            neighbor_finish,
        )?;

        let mut merged: HashMap<usize, NeighborCandidate> = HashMap::new();
        for candidate in candidates {
            match merged.get_mut(&candidate.point_index) {
                Some(existing) => existing
                    .sequence_indexes
                    .extend_from_slice(&candidate.sequence_indexes),
                None => {
                    merged.insert(candidate.point_index, candidate);
                }
            }
        }
        let mut neighbors = Vec::with_capacity(merged.len());
        for (point_index, mut candidate) in merged {
            candidate.sequence_indexes.sort_unstable();
            candidate.sequence_indexes.dedup();
            neighbors.push((point_index, candidate));
        }
        neighbors.sort_by(|a, b| {
            a.1.distance
                .partial_cmp(&b.1.distance)
                .expect("distances are finite")
                .then(a.0.cmp(&b.0))
        });
        neighbors.truncate(k);
        neighbors
            .into_iter()
            .map(|(point_index, candidate)| {
                Ok(Neighbor {
                    point: self.point_store.copy(point_index)?,
                    distance: candidate.distance,
                    sequence_indexes: candidate.sequence_indexes,
                })
            })
            .collect()
    }

    /// Fills the given coordinates of `point` from the sample, one
    /// candidate per tree, reduced by the per-dimension median.
    pub fn impute_missing_values(&self, positions: &[usize], point: &[T]) -> Result<Vec<T>> {
        check_argument(!positions.is_empty(), "nothing to impute")?;
        check_argument(point.len() == self.config.dimensions, "wrong point length")?;
        for &p in positions {
            check_argument(p < self.config.dimensions, "impute position out of range")?;
        }
        check_argument(
            self.is_output_ready(),
            "forest has not seen enough updates to impute",
        )?;

        let mut missing_flags = vec![false; self.config.dimensions];
        for &p in positions {
            missing_flags[p] = true;
        }
        let info = VisitorInfo::default();
        let store = &self.point_store;
        let flags = &missing_flags;
        let results: Vec<Option<ImputeCandidate<T>>> = match &self.thread_pool {
            Some(pool) => pool.install(|| {
                self.components
                    .par_iter()
                    .map(|c| c.impute(point, positions, flags, 1.0, &info, store))
                    .collect::<Result<Vec<_>>>()
            })?,
            None => self
                .components
                .iter()
                .map(|c| c.impute(point, positions, flags, 1.0, &info, store))
                .collect::<Result<Vec<_>>>()?,
        };
        let candidates: Vec<ImputeCandidate<T>> = results.into_iter().flatten().collect();
        check_state(!candidates.is_empty(), "no imputation candidates")?;

        let mut answer = point.to_vec();
        let two = T::one() + T::one();
        for &dim in positions {
            let mut values: Vec<T> = candidates
                .iter()
                .map(|c| c.completed_point[dim])
                .collect();
            values.sort_by(|a, b| a.partial_cmp(b).expect("values are finite"));
            let mid = values.len() / 2;
            answer[dim] = if values.len() % 2 == 1 {
                values[mid]
            } else {
                (values[mid - 1] + values[mid]) / two
            };
        }
        Ok(answer)
    }

    /// Feeds every per-tree score to a caller-supplied accumulator, in
    /// component order.
    pub fn collect_scores<S>(
        &self,
        point: &[T],
        initial: S,
        mut collector: impl FnMut(f64, &mut S),
    ) -> Result<S> {
        let values = self.tree_scores(point, &VisitorInfo::default())?;
        let mut state = initial;
        for v in values {
            collector(v, &mut state);
        }
        Ok(state)
    }

    /// Anomaly score that may stop traversing once the ensemble agrees,
    /// using a one-sided standard deviation test with default bounds.
    pub fn anomaly_score_converging(&self, point: &[T]) -> Result<f64> {
        let trees = self.config.number_of_trees;
        let mut accumulator =
            OneSidedStdDevAccumulator::new(true, 0.1, 1 + trees / 4, trees)?;
        self.converging_score_traversal(point, &VisitorInfo::default(), &mut accumulator)
    }

    /// Converging-accumulator query path: results arrive in batches of the
    /// worker count; once the accumulator reports convergence the
    /// remaining trees are skipped.
    pub fn converging_score_traversal(
        &self,
        point: &[T],
        info: &VisitorInfo<T>,
        accumulator: &mut dyn ConvergingAccumulator,
    ) -> Result<f64> {
        check_argument(point.len() == self.config.dimensions, "wrong point length")?;
        if !self.is_output_ready() {
            return Ok(0.0);
        }
        let store = &self.point_store;
        let batch = self.worker_count().max(1);
        for chunk in self.components.chunks(batch) {
            let values: Vec<f64> = match &self.thread_pool {
                Some(pool) => pool.install(|| {
                    chunk
                        .par_iter()
                        .map(|c| {
                            c.traverse(
                                point,
                                &[],
                                AnomalyScoreVisitor::create_visitor,
                                info,
                                store,
                                &0.0,
                            )
                        })
                        .collect::<Result<Vec<f64>>>()
                })?,
                None => chunk
                    .iter()
                    .map(|c| {
                        c.traverse(
                            point,
                            &[],
                            AnomalyScoreVisitor::create_visitor,
                            info,
                            store,
                            &0.0,
                        )
                    })
                    .collect::<Result<Vec<f64>>>()?,
            };
            for v in values {
                if accumulator.is_converged() {
                    break;
                }
                accumulator.accept(v);
            }
            if accumulator.is_converged() {
                debug!(
                    "ensemble converged after {} of {} trees",
                    accumulator.accepted(),
                    self.components.len()
                );
                break;
            }
        }
        check_state(accumulator.accepted() > 0, "accumulator consumed no values")?;
        Ok(accumulator.total() / accumulator.accepted() as f64)
    }

    fn tree_scores(&self, point: &[T], info: &VisitorInfo<T>) -> Result<Vec<f64>> {
        check_argument(point.len() == self.config.dimensions, "wrong point length")?;
        let store = &self.point_store;
        match &self.thread_pool {
            Some(pool) => pool.install(|| {
                self.components
                    .par_iter()
                    .map(|c| {
                        c.traverse(
                            point,
                            &[],
                            AnomalyScoreVisitor::create_visitor,
                            info,
                            store,
                            &0.0,
                        )
                    })
                    .collect::<Result<Vec<f64>>>()
            }),
            None => self
                .components
                .iter()
                .map(|c| {
                    c.traverse(
                        point,
                        &[],
                        AnomalyScoreVisitor::create_visitor,
                        info,
                        store,
                        &0.0,
                    )
                })
                .collect::<Result<Vec<f64>>>(),
        }
    }

    // -- accessors --------------------------------------------------------

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn shingle_size(&self) -> usize {
        self.config.shingle_size
    }

    pub fn sample_size(&self) -> usize {
        self.config.sample_size
    }

    pub fn number_of_trees(&self) -> usize {
        self.config.number_of_trees
    }

    pub fn output_after(&self) -> usize {
        self.config.output_after
    }

    pub fn total_updates(&self) -> u64 {
        self.total_updates
    }

    pub fn is_output_ready(&self) -> bool {
        self.total_updates > self.config.output_after as u64
    }

    pub fn parallel_execution_enabled(&self) -> bool {
        self.thread_pool.is_some()
    }

    fn worker_count(&self) -> usize {
        self.thread_pool
            .as_ref()
            .map(|p| p.current_num_threads())
            .unwrap_or(1)
    }

    pub fn point_store_size_bytes(&self) -> usize {
        self.point_store.size_bytes()
    }

    pub fn size_bytes(&self) -> usize {
        self.components.iter().map(|c| c.size_bytes()).sum::<usize>()
            + self.point_store.size_bytes()
            + std::mem::size_of::<RandomCutForest<T>>()
    }

    /// Full invariant audit: every tree's structure, the mass/sampler-size
    /// equalities and the reference-count balance.
    pub fn check_consistency(&self) -> Result<()> {
        let mut expected: u64 = 0;
        for component in &self.components {
            component.verify_consistency(&self.point_store)?;
            expected += component.sampler_size() as u64;
        }
        check_state(
            self.point_store.total_reference_count() == expected,
            "reference counts do not match sampler contents",
        )
    }

    // -- state ------------------------------------------------------------

    /// Complete snapshot of the forest's mutable state.
    pub fn snapshot(&self) -> ForestState<T> {
        ForestState {
            config: self.config.clone(),
            total_updates: self.total_updates,
            point_store: self.point_store.to_state(),
            components: self.components.iter().map(|c| c.to_state()).collect(),
        }
    }

    /// Rebuilds a forest from a snapshot; replaying the same inputs on the
    /// original and the rebuilt forest yields identical results.
    pub fn from_state(state: &ForestState<T>) -> Result<Self> {
        let config = state.config.clone();
        check_argument(
            state.components.len() == config.number_of_trees,
            "snapshot component count does not match configuration",
        )?;
        let point_store_capacity =
            (config.number_of_trees * config.sample_size + 1).max(2 * config.sample_size);
        let point_store = PointStore::from_state(
            config.dimensions,
            config.shingle_size,
            point_store_capacity,
            &state.point_store,
        )?;
        let components = state
            .components
            .iter()
            .map(|c| {
                SampledTree::from_state(
                    config.dimensions,
                    config.sample_size,
                    config.time_decay,
                    config.initial_accept_fraction,
                    config.center_of_mass_enabled,
                    config.bounding_box_cache_fraction,
                    c,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let thread_pool = Self::build_thread_pool(&config)?;
        Ok(RandomCutForest {
            config,
            components,
            point_store,
            total_updates: state.total_updates,
            thread_pool,
        })
    }
}
