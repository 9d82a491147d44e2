//! Query computations carried along tree traversals.
//!
//! A visitor is a small state machine: the tree seeds it at the leaf its
//! point descends to (`accept_leaf`) and then folds every ancestor into it
//! while unwinding (`accept`). All queries of the forest — scoring,
//! attribution, density, near neighbors, imputation — share this one
//! traversal skeleton and differ only in their visitor.

mod attribution;
mod density;
mod impute;
mod neighbor;
mod score;

pub use attribution::AttributionVisitor;
pub use density::InterpolationVisitor;
pub use impute::{ImputeCandidate, ImputeVisitor};
pub use neighbor::{NearNeighborVisitor, NeighborCandidate};
pub use score::AnomalyScoreVisitor;

use crate::errors::Result;
use crate::tree::nodeview::NodeView;
use crate::types::Coordinate;
use crate::util::l1_distance;

/// The scoring functions a traversal threads through its visitor.
///
/// The defaults reproduce the standard random cut forest score: expected
/// depth-based contributions with a damping of frequently seen points and a
/// log-mass normalizer. Callers may swap any of the four shape functions,
/// e.g. for displacement ("one-class density") scoring.
pub struct VisitorInfo<T> {
    /// Leaves at or below this mass are scored through their shadow box.
    pub ignore_mass: usize,
    pub score_seen: fn(usize, usize) -> f64,
    pub score_unseen: fn(usize, usize) -> f64,
    pub damp: fn(usize, usize) -> f64,
    pub normalizer: fn(f64, usize) -> f64,
    pub distance: fn(&[T], &[T]) -> f64,
}

pub fn score_seen(depth: usize, mass: usize) -> f64 {
    1.0 / (depth as f64 + f64::log2(1.0 + mass as f64))
}

pub fn score_unseen(depth: usize, _mass: usize) -> f64 {
    1.0 / (depth as f64 + 1.0)
}

pub fn normalizer(score: f64, mass: usize) -> f64 {
    score * f64::log2(1.0 + mass as f64)
}

pub fn damp(leaf_mass: usize, tree_mass: usize) -> f64 {
    1.0 - leaf_mass as f64 / (2.0 * tree_mass as f64)
}

// displacement scoring treats previously seen and unseen points alike;
// the normalization makes the maximum one instead of the average

pub fn score_seen_displacement(_depth: usize, mass: usize) -> f64 {
    1.0 / (1.0 + mass as f64)
}

pub fn score_unseen_displacement(_depth: usize, mass: usize) -> f64 {
    mass as f64
}

pub fn displacement_normalizer(score: f64, mass: usize) -> f64 {
    score / (1.0 + mass as f64)
}

pub fn identity(score: f64, _mass: usize) -> f64 {
    score
}

impl<T: Coordinate> VisitorInfo<T> {
    pub fn default() -> Self {
        VisitorInfo {
            ignore_mass: 0,
            score_seen,
            score_unseen,
            damp,
            normalizer,
            distance: l1_distance::<T>,
        }
    }

    pub fn displacement() -> Self {
        VisitorInfo {
            ignore_mass: 0,
            score_seen: score_seen_displacement,
            score_unseen: score_unseen_displacement,
            damp,
            normalizer: displacement_normalizer,
            distance: l1_distance::<T>,
        }
    }

    pub fn use_score(
        ignore_mass: usize,
        score_seen: fn(usize, usize) -> f64,
        score_unseen: fn(usize, usize) -> f64,
        damp: fn(usize, usize) -> f64,
        normalizer: fn(f64, usize) -> f64,
    ) -> Self {
        VisitorInfo {
            ignore_mass,
            score_seen,
            score_unseen,
            damp,
            normalizer,
            distance: l1_distance::<T>,
        }
    }

    pub fn use_distance(distance: fn(&[T], &[T]) -> f64) -> Self {
        VisitorInfo {
            ignore_mass: 0,
            score_seen,
            score_unseen,
            damp,
            normalizer,
            distance,
        }
    }
}

/// One query's state machine along a single root-to-leaf path.
pub trait Visitor<T: Coordinate, R> {
    /// Seeds the state at the leaf the traversal reached.
    fn accept_leaf(
        &mut self,
        point: &[T],
        info: &VisitorInfo<T>,
        view: &NodeView<T>,
    ) -> Result<()>;

    /// Folds one ancestor into the state while unwinding.
    fn accept(&mut self, point: &[T], info: &VisitorInfo<T>, view: &NodeView<T>) -> Result<()>;

    fn result(&self, info: &VisitorInfo<T>) -> Result<R>;

    /// Once converged, remaining ancestors are skipped.
    fn is_converged(&self) -> bool;

    /// Whether the unwind should additionally maintain the shadow box (the
    /// path box without the reached leaf).
    fn use_shadow_box(&self) -> bool {
        false
    }

    /// Visitors that score against whole boxes ask the view to maintain
    /// them from the leaf up.
    fn requires_bounding_boxes(&self) -> bool {
        false
    }
}

/// A visitor that can split at internal nodes and merge its branches;
/// used for traversals with missing coordinates.
pub trait MultiVisitor<T: Coordinate, R>: Visitor<T, R> {
    /// Merges the states of the two branches explored below a split node.
    fn combine_branches(
        &mut self,
        point: &[T],
        info: &VisitorInfo<T>,
        view: &NodeView<T>,
    ) -> Result<()>;
}
