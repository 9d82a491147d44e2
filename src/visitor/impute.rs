use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::errors::Result;
use crate::tree::nodeview::NodeView;
use crate::types::Coordinate;
use crate::util::check_state;
use crate::visitor::{MultiVisitor, Visitor, VisitorInfo};

/// Multi-visitor that fills missing coordinates from the leaves it
/// reaches.
///
/// The traversal splits at every node whose cut dimension is missing; each
/// branch carries its own stack frame and the merge keeps the branch whose
/// adjusted score is lower (the more ordinary completion). `centrality`
/// blends between pure score-based choice (one) and a uniformly random
/// pick among the branches (zero).
pub struct ImputeVisitor<T> {
    tree_mass: usize,
    centrality: f64,
    missing: Vec<usize>,
    rng: ChaCha20Rng,
    stack: Vec<ImputeFrame<T>>,
}

struct ImputeFrame<T> {
    converged: bool,
    score: f64,
    tie_break: f64,
    point_index: usize,
    distance: f64,
    completed_point: Vec<T>,
}

/// Per-tree imputation candidate: the adjusted score, the leaf's point
/// index, its distance from the (completed) query and the completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ImputeCandidate<T> {
    pub score: f64,
    pub point_index: usize,
    pub distance: f64,
    pub completed_point: Vec<T>,
}

impl<T: Coordinate> ImputeVisitor<T> {
    pub fn new(missing: &[usize], centrality: f64, tree_mass: usize, seed: u64) -> Self {
        ImputeVisitor {
            tree_mass,
            centrality,
            missing: missing.to_vec(),
            rng: ChaCha20Rng::seed_from_u64(seed),
            stack: Vec::new(),
        }
    }

    /// Score used when comparing branches: a centrality-weighted blend of
    /// the normalized anomaly score and a uniform tie-break.
    fn adjusted_score(&self, frame: &ImputeFrame<T>, info: &VisitorInfo<T>) -> f64 {
        self.centrality * (info.normalizer)(frame.score, self.tree_mass)
            + (1.0 - self.centrality) * frame.tie_break
    }
}

impl<T: Coordinate> Visitor<T, ImputeCandidate<T>> for ImputeVisitor<T> {
    fn accept_leaf(
        &mut self,
        point: &[T],
        info: &VisitorInfo<T>,
        view: &NodeView<T>,
    ) -> Result<()> {
        let mass = view.mass();
        let leaf_point = view.leaf_point();
        let mut completed = point.to_vec();
        for &dim in &self.missing {
            completed[dim] = leaf_point[dim];
        }
        let mut converged = false;
        let score = if view.is_duplicate() {
            converged = true;
            (info.damp)(mass, self.tree_mass) * (info.score_seen)(view.depth(), mass)
        } else {
            (info.score_unseen)(view.depth(), mass)
        };
        let distance = (info.distance)(&completed, leaf_point);
        self.stack.push(ImputeFrame {
            converged,
            score,
            tie_break: self.rng.gen::<f64>(),
            point_index: view.leaf_point_index(),
            distance,
            completed_point: completed,
        });
        Ok(())
    }

    fn accept(&mut self, _point: &[T], info: &VisitorInfo<T>, view: &NodeView<T>) -> Result<()> {
        let frame = self.stack.last_mut().ok_or(crate::errors::Error::InvalidState {
            msg: "impute stack is empty at accept",
        })?;
        if frame.converged {
            return Ok(());
        }
        let probability = view.probability_of_cut();
        if probability == 0.0 {
            frame.converged = true;
        } else {
            frame.score = (1.0 - probability) * frame.score
                + probability * (info.score_unseen)(view.depth(), view.mass());
        }
        Ok(())
    }

    fn result(&self, info: &VisitorInfo<T>) -> Result<ImputeCandidate<T>> {
        check_state(self.stack.len() == 1, "impute stack must end at one frame")?;
        let frame = self.stack.last().expect("length checked");
        Ok(ImputeCandidate {
            score: (info.normalizer)(frame.score, self.tree_mass),
            point_index: frame.point_index,
            distance: frame.distance,
            completed_point: frame.completed_point.clone(),
        })
    }

    fn is_converged(&self) -> bool {
        self.stack.last().map_or(false, |f| f.converged)
    }
}

impl<T: Coordinate> MultiVisitor<T, ImputeCandidate<T>> for ImputeVisitor<T> {
    fn combine_branches(
        &mut self,
        _point: &[T],
        info: &VisitorInfo<T>,
        _view: &NodeView<T>,
    ) -> Result<()> {
        check_state(self.stack.len() >= 2, "impute merge needs two branches")?;
        let second = self.stack.pop().expect("length checked");
        let first = self.stack.pop().expect("length checked");
        let converged = first.converged || second.converged;
        let mut keep = if self.adjusted_score(&second, info) < self.adjusted_score(&first, info)
        {
            second
        } else {
            first
        };
        keep.converged = converged;
        self.stack.push(keep);
        Ok(())
    }
}
