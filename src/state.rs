//! Plain-data snapshots of forest internals.
//!
//! Serialization formats are out of scope for this crate, but the complete
//! mutable state of a forest is exposed as ordinary owned data so that a
//! caller can persist it in any format and rebuild a forest that replays
//! the stream identically: packed per-tree arenas, per-sampler entries with
//! their rolling seeds, the point-store buffers with reference counts, and
//! the update counter.

use crate::types::Coordinate;

/// Snapshot of a [`PointStore`](crate::PointStore).
#[derive(Debug, Clone, PartialEq)]
pub struct PointStoreState<T> {
    pub store: Vec<T>,
    pub location: Vec<usize>,
    pub ref_count: Vec<u32>,
    pub start_free_region: usize,
    pub free_ranges: Vec<(usize, usize)>,
}

/// Snapshot of a [`ReservoirSampler`](crate::ReservoirSampler).
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerState {
    pub weights: Vec<f32>,
    pub point_indices: Vec<usize>,
    pub sequence_indexes: Vec<u64>,
    pub random_seed: u64,
    pub last_sequence_index: Option<u64>,
}

/// Snapshot of a tree's packed node arenas.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeState<T> {
    pub root: usize,
    pub tree_mass: usize,
    pub random_seed: u64,
    pub left_index: Vec<u32>,
    pub right_index: Vec<u32>,
    pub parent_index: Vec<u32>,
    pub mass: Vec<u32>,
    pub cut_dimension: Vec<u32>,
    pub cut_value: Vec<T>,
    pub bounding_box_data: Vec<T>,
    pub range_sum_data: Vec<f64>,
    pub point_sum: Vec<T>,
    /// `(point_index, mass)` for leaves holding more than one copy.
    pub duplicate_leaf_mass: Vec<(usize, usize)>,
    /// `(point_index, sequence indexes)` when sequence tracking is enabled.
    pub sequence_indexes: Option<Vec<(usize, Vec<u64>)>>,
    pub free_ranges: Vec<(usize, usize)>,
}

/// Snapshot of one (sampler, tree) component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentState<T> {
    pub sampler: SamplerState,
    pub tree: TreeState<T>,
    pub query_seed: u64,
}

/// The construction-time options of a forest, echoed in its snapshot so a
/// forest can be rebuilt without the original builder.
#[derive(Debug, Clone, PartialEq)]
pub struct ForestConfigState {
    pub dimensions: usize,
    pub shingle_size: usize,
    pub number_of_trees: usize,
    pub sample_size: usize,
    pub output_after: usize,
    pub time_decay: f64,
    pub initial_accept_fraction: f64,
    pub bounding_box_cache_fraction: f64,
    pub store_sequence_indexes: bool,
    pub center_of_mass_enabled: bool,
    pub parallel_execution_enabled: bool,
    pub thread_pool_size: Option<usize>,
    pub random_seed: u64,
}

/// Complete snapshot of a [`RandomCutForest`](crate::RandomCutForest).
#[derive(Debug, Clone, PartialEq)]
pub struct ForestState<T: Coordinate> {
    pub config: ForestConfigState,
    pub total_updates: u64,
    pub point_store: PointStoreState<T>,
    pub components: Vec<ComponentState<T>>,
}
