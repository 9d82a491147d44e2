use crate::divector::DiVector;
use crate::errors::{Error, Result};
use crate::store::points::PointStore;
use crate::tree::boundingbox::BoundingBox;
use crate::tree::nodestore::NodeStore;
use crate::types::Coordinate;

/// What a visitor sees of the node it is currently standing on.
///
/// The view is pushed down the canonical path by the tree and then updated
/// on every step of the unwind: probability of separation, mass, cut and
/// (when requested) the node's bounding box and center of mass. Visitors
/// that score against boxes ask for them up front (`maintain_box`); when
/// the tree's cache fraction is low the view maintains path boxes anyway,
/// since reconstructing uncached boxes per node would be quadratic.
pub struct NodeView<T> {
    current_node: usize,
    depth: usize,
    mass: usize,
    cut_dimension: usize,
    cut_value: T,
    leaf_point_index: usize,
    leaf_point: Vec<T>,
    leaf_duplicate: bool,
    leaf_sequence_indexes: Vec<u64>,
    probability_of_cut: f64,
    shadow_probability_of_cut: f64,
    use_shadow_box: bool,
    maintain_box: bool,
    current_box: Option<BoundingBox<T>>,
    shadow_box: Option<BoundingBox<T>>,
    center_of_mass: Vec<T>,
}

impl<T: Coordinate> NodeView<T> {
    pub(crate) fn create(root: usize, maintain_box: bool, node_store: &NodeStore<T>) -> Self {
        let (cut_dimension, cut_value, _, _) = node_store.cut_and_children(root);
        NodeView {
            current_node: root,
            depth: 0,
            mass: node_store.mass_of(root),
            cut_dimension,
            cut_value,
            leaf_point_index: usize::MAX,
            leaf_point: Vec::new(),
            leaf_duplicate: false,
            leaf_sequence_indexes: Vec::new(),
            probability_of_cut: f64::MAX,
            shadow_probability_of_cut: f64::MAX,
            use_shadow_box: false,
            maintain_box,
            current_box: None,
            shadow_box: None,
            center_of_mass: Vec::new(),
        }
    }

    // -- visitor-facing accessors ----------------------------------------

    pub fn mass(&self) -> usize {
        self.mass
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn cut_dimension(&self) -> usize {
        self.cut_dimension
    }

    pub fn cut_value(&self) -> T {
        self.cut_value
    }

    pub fn leaf_point_index(&self) -> usize {
        self.leaf_point_index
    }

    pub fn leaf_point(&self) -> &[T] {
        &self.leaf_point
    }

    /// True when the traversed point equals the leaf's point by value.
    pub fn is_duplicate(&self) -> bool {
        self.leaf_duplicate
    }

    pub fn leaf_sequence_indexes(&self) -> &[u64] {
        &self.leaf_sequence_indexes
    }

    pub fn probability_of_cut(&self) -> f64 {
        self.probability_of_cut
    }

    pub fn shadow_box_probability_of_cut(&self) -> f64 {
        self.shadow_probability_of_cut
    }

    pub fn bounding_box(&self) -> Option<&BoundingBox<T>> {
        self.current_box.as_ref()
    }

    pub fn shadow_box(&self) -> Option<&BoundingBox<T>> {
        self.shadow_box.as_ref()
    }

    /// Center of mass of the current node; empty unless the forest tracks
    /// center-of-mass sums.
    pub fn center_of_mass(&self) -> &[T] {
        &self.center_of_mass
    }

    /// Writes the per-dimension directional separation probabilities of
    /// `point` against the current node's box.
    pub fn assign_probability_of_cut(&self, vector: &mut DiVector, point: &[T]) -> Result<()> {
        let bounding_box = self.current_box.as_ref().ok_or(Error::InvalidState {
            msg: "bounding box not maintained on this traversal",
        })?;
        vector.assign_as_probability_of_cut(bounding_box, point);
        Ok(())
    }

    /// As `assign_probability_of_cut` but against the shadow box.
    pub fn assign_probability_of_cut_shadow(
        &self,
        vector: &mut DiVector,
        point: &[T],
    ) -> Result<()> {
        let bounding_box = self.shadow_box.as_ref().ok_or(Error::InvalidState {
            msg: "shadow box requested before it exists",
        })?;
        vector.assign_as_probability_of_cut(bounding_box, point);
        Ok(())
    }

    // -- tree-facing updates ----------------------------------------------

    pub(crate) fn current_node(&self) -> usize {
        self.current_node
    }

    pub(crate) fn set_current_node(&mut self, index: usize) {
        self.current_node = index;
    }

    pub(crate) fn set_depth(&mut self, depth: usize) {
        self.depth = depth;
    }

    pub(crate) fn update_at_leaf(
        &mut self,
        point: &[T],
        index: usize,
        node_store: &NodeStore<T>,
        point_store: &PointStore<T>,
    ) -> Result<()> {
        self.leaf_point_index = node_store.point_index_of(index)?;
        self.leaf_point = point_store.copy(self.leaf_point_index)?;
        self.mass = node_store.mass_of(index);
        self.leaf_duplicate = self.leaf_point == point;
        self.probability_of_cut = if self.leaf_duplicate { 0.0 } else { 1.0 };
        if node_store.sequence_tracking_enabled() {
            self.leaf_sequence_indexes = node_store
                .sequence_indexes_of(self.leaf_point_index)
                .cloned()
                .unwrap_or_default();
        }
        if self.maintain_box {
            self.current_box = Some(BoundingBox::from_point(&self.leaf_point));
        }
        Ok(())
    }

    pub(crate) fn descend(&mut self, point: &[T], node_store: &NodeStore<T>) {
        self.current_node = if node_store.is_left_of(self.current_node, point) {
            node_store.left_of(self.current_node)
        } else {
            node_store.right_of(self.current_node)
        };
        self.depth += 1;
    }

    pub(crate) fn ascend(
        &mut self,
        point: &[T],
        parent: usize,
        node_store: &NodeStore<T>,
        point_store: &PointStore<T>,
    ) -> Result<()> {
        self.probability_of_cut = match self.current_box.as_mut() {
            Some(current) => {
                let sibling = node_store.sibling_of(self.current_node, parent);
                if self.use_shadow_box {
                    let sibling_box = node_store.bounding_box(sibling, point_store)?;
                    current.add_box(&sibling_box);
                    match self.shadow_box.as_mut() {
                        Some(shadow) => shadow.add_box(&sibling_box),
                        None => self.shadow_box = Some(sibling_box),
                    }
                    self.shadow_probability_of_cut = self
                        .shadow_box
                        .as_ref()
                        .expect("shadow box just set")
                        .probability_of_cut(point);
                } else {
                    node_store.grow_node_box(current, point_store, sibling)?;
                }
                current.probability_of_cut(point)
            }
            None => node_store.probability_of_cut(parent, point, point_store)?,
        };
        self.finish_step_to(parent, node_store, point_store)
    }

    pub(crate) fn ascend_with_missing(
        &mut self,
        point: &[T],
        missing_coordinates: &[bool],
        parent: usize,
        node_store: &NodeStore<T>,
        point_store: &PointStore<T>,
    ) -> Result<()> {
        self.probability_of_cut = match self.current_box.as_mut() {
            Some(current) => {
                let sibling = node_store.sibling_of(self.current_node, parent);
                node_store.grow_node_box(current, point_store, sibling)?;
                current.probability_of_cut_with_missing(point, missing_coordinates)
            }
            None => node_store.probability_of_cut_with_missing(
                parent,
                point,
                missing_coordinates,
                point_store,
            )?,
        };
        self.finish_step_to(parent, node_store, point_store)
    }

    /// Joins the boxes of two traversed branches at their split node.
    pub(crate) fn merge_paths(
        &mut self,
        parent: usize,
        saved_box: Option<BoundingBox<T>>,
        point: &[T],
        missing_coordinates: &[bool],
        node_store: &NodeStore<T>,
        point_store: &PointStore<T>,
    ) -> Result<()> {
        self.probability_of_cut = match (self.current_box.as_mut(), saved_box) {
            (Some(current), Some(saved)) => {
                current.add_box(&saved);
                current.probability_of_cut_with_missing(point, missing_coordinates)
            }
            _ => node_store.probability_of_cut_with_missing(
                parent,
                point,
                missing_coordinates,
                point_store,
            )?,
        };
        self.finish_step_to(parent, node_store, point_store)
    }

    fn finish_step_to(
        &mut self,
        parent: usize,
        node_store: &NodeStore<T>,
        point_store: &PointStore<T>,
    ) -> Result<()> {
        self.current_node = parent;
        let (cut_dimension, cut_value, _, _) = node_store.cut_and_children(parent);
        self.cut_dimension = cut_dimension;
        self.cut_value = cut_value;
        self.mass = node_store.mass_of(parent);
        self.depth -= 1;
        if node_store.center_of_mass_enabled() {
            self.center_of_mass = node_store.center_of_mass(parent, point_store)?;
        }
        Ok(())
    }

    /// Refreshes the cut fields for the node the view currently points at;
    /// used before a multi-visitor split decision.
    pub(crate) fn refresh_cut_info(&mut self, node_store: &NodeStore<T>) {
        let (cut_dimension, cut_value, _, _) = node_store.cut_and_children(self.current_node);
        self.cut_dimension = cut_dimension;
        self.cut_value = cut_value;
    }

    pub(crate) fn box_copy(&self) -> Option<BoundingBox<T>> {
        self.current_box.clone()
    }

    /// Switches the unwind to shadow-box scoring (requested by visitors
    /// that ignore low-mass leaves).
    pub(crate) fn enable_shadow_box(
        &mut self,
        node_store: &NodeStore<T>,
        point_store: &PointStore<T>,
    ) -> Result<()> {
        self.use_shadow_box = true;
        // the shadow box itself only comes into being one level up, from
        // the first sibling; the current box must exist to keep growing
        if self.current_box.is_none() {
            self.current_box =
                Some(node_store.bounding_box(self.current_node, point_store)?);
        }
        Ok(())
    }
}
