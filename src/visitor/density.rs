use crate::errors::{Error, Result};
use crate::measure::InterpolationMeasure;
use crate::tree::nodeview::NodeView;
use crate::types::Coordinate;
use crate::visitor::{Visitor, VisitorInfo};

/// Gathers directional interpolation statistics for density estimation.
///
/// At the leaf the "shadow box" counterfactual applies as in scoring;
/// along the unwind every node's box contributes gap-weighted distance and
/// probability mass per direction.
pub struct InterpolationVisitor {
    tree_mass: usize,
    score: f64,
    converged: bool,
    hit_duplicate: bool,
    use_shadow_box: bool,
    measure: InterpolationMeasure,
}

impl InterpolationVisitor {
    pub fn new(tree_mass: usize, dimensions: usize) -> Self {
        InterpolationVisitor {
            tree_mass,
            score: 0.0,
            converged: false,
            hit_duplicate: false,
            use_shadow_box: false,
            measure: InterpolationMeasure::empty(dimensions, tree_mass as f64),
        }
    }

    pub fn create_visitor<T: Coordinate>(
        tree_mass: usize,
        parameters: &[usize],
        _info: &VisitorInfo<T>,
    ) -> Self {
        InterpolationVisitor::new(tree_mass, parameters[0])
    }
}

impl<T: Coordinate> Visitor<T, InterpolationMeasure> for InterpolationVisitor {
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
                self.use_shadow_box = true;
            } else {
                let value = (info.score_unseen)(view.depth(), mass);
                self.score = value;
                let bounding_box = view.bounding_box().ok_or(Error::InvalidState {
                    msg: "interpolation requires path boxes",
                })?;
                self.measure.update(point, bounding_box, value);
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
        let bounding_box = if self.use_shadow_box {
            view.shadow_box()
        } else {
            view.bounding_box()
        }
        .ok_or(Error::InvalidState {
            msg: "interpolation requires path boxes",
        })?;
        let value = (info.score_unseen)(view.depth(), view.mass());
        let probability = self.measure.update(point, bounding_box, value);
        if probability == 0.0 {
            self.converged = true;
        } else if !self.hit_duplicate {
            self.score = (1.0 - probability) * self.score + probability * value;
        }
        Ok(())
    }

    fn result(&self, info: &VisitorInfo<T>) -> Result<InterpolationMeasure> {
        let normalized = (info.normalizer)(self.score, self.tree_mass);
        let mut answer = self.measure.clone();
        answer.measure.normalize(normalized);
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
