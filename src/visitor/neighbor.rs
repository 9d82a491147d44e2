use crate::errors::Result;
use crate::tree::nodeview::NodeView;
use crate::types::Coordinate;
use crate::visitor::{Visitor, VisitorInfo};

/// One tree's candidate near neighbor: the leaf the query point descends
/// to, with its distance, normalized score and (when tracked) the sequence
/// indexes that landed on it.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborCandidate {
    pub point_index: usize,
    pub distance: f64,
    pub score: f64,
    pub sequence_indexes: Vec<u64>,
}

/// Collects the candidate leaf along the canonical path.
pub struct NearNeighborVisitor {
    tree_mass: usize,
    score: f64,
    converged: bool,
    point_index: usize,
    distance: f64,
    sequence_indexes: Vec<u64>,
}

impl NearNeighborVisitor {
    pub fn new(tree_mass: usize) -> Self {
        NearNeighborVisitor {
            tree_mass,
            score: 0.0,
            converged: false,
            point_index: usize::MAX,
            distance: f64::MAX,
            sequence_indexes: Vec::new(),
        }
    }

    pub fn create_visitor<T: Coordinate>(
        tree_mass: usize,
        _parameters: &[usize],
        _info: &VisitorInfo<T>,
    ) -> Self {
        NearNeighborVisitor::new(tree_mass)
    }
}

impl<T: Coordinate> Visitor<T, Option<NeighborCandidate>> for NearNeighborVisitor {
    fn accept_leaf(
        &mut self,
        point: &[T],
        info: &VisitorInfo<T>,
        view: &NodeView<T>,
    ) -> Result<()> {
        let mass = view.mass();
        self.point_index = view.leaf_point_index();
        self.distance = (info.distance)(point, view.leaf_point());
        self.sequence_indexes = view.leaf_sequence_indexes().to_vec();
        if view.is_duplicate() {
            self.score =
                (info.damp)(mass, self.tree_mass) * (info.score_seen)(view.depth(), mass);
            self.converged = true;
        } else {
            self.score = (info.score_unseen)(view.depth(), mass);
        }
        Ok(())
    }

    fn accept(&mut self, _point: &[T], info: &VisitorInfo<T>, view: &NodeView<T>) -> Result<()> {
        if self.converged {
            return Ok(());
        }
        let probability = view.probability_of_cut();
        if probability == 0.0 {
            self.converged = true;
        } else {
            self.score = (1.0 - probability) * self.score
                + probability * (info.score_unseen)(view.depth(), view.mass());
        }
        Ok(())
    }

    fn result(&self, info: &VisitorInfo<T>) -> Result<Option<NeighborCandidate>> {
        if self.point_index == usize::MAX {
            return Ok(None);
        }
        Ok(Some(NeighborCandidate {
            point_index: self.point_index,
            distance: self.distance,
            score: (info.normalizer)(self.score, self.tree_mass),
            sequence_indexes: self.sequence_indexes.clone(),
        }))
    }

    fn is_converged(&self) -> bool {
        self.converged
    }
}
