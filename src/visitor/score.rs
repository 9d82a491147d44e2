use crate::errors::Result;
use crate::tree::nodeview::NodeView;
use crate::types::Coordinate;
use crate::visitor::{Visitor, VisitorInfo};

/// Computes the scalar anomaly score of one tree.
///
/// The score starts at the leaf (damped when the query point is already in
/// the sample) and is folded upward through the probability that each
/// ancestor's box would have been cut away from the point. Once the point
/// falls inside a box the remaining ancestors cannot change the score and
/// the traversal short-circuits.
pub struct AnomalyScoreVisitor {
    tree_mass: usize,
    score: f64,
    converged: bool,
    use_shadow_box: bool,
}

impl AnomalyScoreVisitor {
    pub fn new(tree_mass: usize) -> Self {
        AnomalyScoreVisitor {
            tree_mass,
            score: 0.0,
            converged: false,
            use_shadow_box: false,
        }
    }

    pub fn create_visitor<T: Coordinate>(
        tree_mass: usize,
        _parameters: &[usize],
        _info: &VisitorInfo<T>,
    ) -> Self {
        AnomalyScoreVisitor::new(tree_mass)
    }
}

impl<T: Coordinate> Visitor<T, f64> for AnomalyScoreVisitor {
    fn accept_leaf(
        &mut self,
        _point: &[T],
        info: &VisitorInfo<T>,
        view: &NodeView<T>,
    ) -> Result<()> {
        let mass = view.mass();
        if mass > info.ignore_mass {
            if view.is_duplicate() {
                self.score =
                    (info.damp)(mass, self.tree_mass) * (info.score_seen)(view.depth(), mass);
                self.converged = true;
            } else {
                self.score = (info.score_unseen)(view.depth(), mass);
            }
        } else {
            self.score = (info.score_unseen)(view.depth(), mass);
            self.use_shadow_box = true;
        }
        Ok(())
    }

    fn accept(&mut self, _point: &[T], info: &VisitorInfo<T>, view: &NodeView<T>) -> Result<()> {
        if self.converged {
            return Ok(());
        }
        let probability = if self.use_shadow_box {
            view.shadow_box_probability_of_cut()
        } else {
            view.probability_of_cut()
        };
        if probability == 0.0 {
            self.converged = true;
        } else {
            self.score = (1.0 - probability) * self.score
                + probability * (info.score_unseen)(view.depth(), view.mass());
        }
        Ok(())
    }

    fn result(&self, info: &VisitorInfo<T>) -> Result<f64> {
        Ok((info.normalizer)(self.score, self.tree_mass))
    }

    fn is_converged(&self) -> bool {
        self.converged
    }

    fn use_shadow_box(&self) -> bool {
        self.use_shadow_box
    }
}
