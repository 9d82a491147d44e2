use crate::divector::DiVector;
use crate::errors::Result;
use crate::tree::nodeview::NodeView;
use crate::types::Coordinate;
use crate::visitor::{Visitor, VisitorInfo};

/// Decomposes one tree's anomaly score into per-dimension directional
/// contributions.
///
/// Follows the same unwind as the scalar score but distributes each step's
/// contribution over the dimensions (and directions) in which the point
/// sticks out of the node's box. The result is normalized so the high+low
/// total equals the scalar score of the same traversal.
pub struct AttributionVisitor {
    tree_mass: usize,
    score: f64,
    converged: bool,
    hit_duplicate: bool,
    use_shadow_box: bool,
    attribution: DiVector,
    probability: DiVector,
}

impl AttributionVisitor {
    pub fn new(tree_mass: usize, dimensions: usize) -> Self {
        AttributionVisitor {
            tree_mass,
            score: 0.0,
            converged: false,
            hit_duplicate: false,
            use_shadow_box: false,
            attribution: DiVector::empty(dimensions),
            probability: DiVector::empty(dimensions),
        }
    }

    pub fn create_visitor<T: Coordinate>(
        tree_mass: usize,
        parameters: &[usize],
        _info: &VisitorInfo<T>,
    ) -> Self {
        AttributionVisitor::new(tree_mass, parameters[0])
    }
}

impl<T: Coordinate> Visitor<T, DiVector> for AttributionVisitor {
    fn accept_leaf(
        &mut self,
        point: &[T],
        info: &VisitorInfo<T>,
        view: &NodeView<T>,
    ) -> Result<()> {
        let mass = view.mass();
        if mass > info.ignore_mass {
            if view.is_duplicate() {
                self.score =
                    (info.damp)(mass, self.tree_mass) * (info.score_seen)(view.depth(), mass);
                self.hit_duplicate = true;
                // score against what the tree would look like without the
                // duplicate, i.e. the shadow box
                self.use_shadow_box = true;
            } else {
                self.score = (info.score_unseen)(view.depth(), mass);
                view.assign_probability_of_cut(&mut self.probability, point)?;
                self.attribution
                    .add_from_scaled(&self.probability, self.score);
            }
        } else {
            self.score = (info.score_unseen)(view.depth(), mass);
            self.use_shadow_box = true;
        }
        Ok(())
    }

    fn accept(&mut self, point: &[T], info: &VisitorInfo<T>, view: &NodeView<T>) -> Result<()> {
        if self.converged {
            return Ok(());
        }
        if self.use_shadow_box {
            view.assign_probability_of_cut_shadow(&mut self.probability, point)?;
        } else {
            view.assign_probability_of_cut(&mut self.probability, point)?;
        }
        let probability = self.probability.total();
        if probability == 0.0 {
            self.converged = true;
        } else {
            let new_value = (info.score_unseen)(view.depth(), view.mass());
            if !self.hit_duplicate {
                self.score = (1.0 - probability) * self.score + probability * new_value;
            }
            self.attribution.scale(1.0 - probability);
            self.attribution
                .add_from_scaled(&self.probability, new_value);
        }
        Ok(())
    }

    fn result(&self, info: &VisitorInfo<T>) -> Result<DiVector> {
        let normalized = (info.normalizer)(self.score, self.tree_mass);
        let mut answer = self.attribution.clone();
        answer.normalize(normalized);
        Ok(answer)
    }

    fn is_converged(&self) -> bool {
        self.converged
    }

    fn use_shadow_box(&self) -> bool {
        self.use_shadow_box
    }

    fn requires_bounding_boxes(&self) -> bool {
        true
    }
}
