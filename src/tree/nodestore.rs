use std::collections::HashMap;

use crate::errors::{Error, Result};
use crate::state::TreeState;
use crate::store::interval::IntervalStoreManager;
use crate::store::points::PointStore;
use crate::tree::boundingbox::BoundingBox;
use crate::tree::cut::Cut;
use crate::types::{as_f64, from_f64, Coordinate};
use crate::util::{check_argument, check_state};

/// Packed arena for one tree's nodes.
///
/// `capacity` is the number of leaves the tree can hold (the per-tree
/// sample size). Node addresses share one integer space:
///
/// * internal nodes occupy slots `0 ..= capacity - 2`,
/// * `capacity - 1` is the null sentinel,
/// * the leaf holding point `p` is addressed as `capacity + p`.
///
/// Leaves have no records of their own: a leaf's mass defaults to one and
/// only duplicates (several sampled copies of the same point) appear in a
/// side table. Internal masses are stored minus one so a `u32` array covers
/// the whole range. A binary tree in which every node has zero or two
/// children has at most `capacity - 1` internal nodes, which is exactly
/// what the arena provides.
///
/// A configurable fraction of internal slots additionally carries a cached
/// bounding box (min row, max row, and the precomputed range sum); the
/// remaining slots recompute boxes from their children on demand.
pub(crate) struct NodeStore<T> {
    capacity: usize,
    dimensions: usize,
    bounding_box_cache_fraction: f64,
    cache_limit: usize,
    left_index: Vec<u32>,
    right_index: Vec<u32>,
    parent_index: Vec<u32>,
    mass: Vec<u32>,
    cut_dimension: Vec<u32>,
    cut_value: Vec<T>,
    bounding_box_data: Vec<T>,
    range_sum_data: Vec<f64>,
    point_sum: Vec<T>,
    center_of_mass_enabled: bool,
    duplicate_leaf_mass: HashMap<usize, usize>,
    sequence_indexes: Option<HashMap<usize, Vec<u64>>>,
    slot_manager: IntervalStoreManager,
}

/// Below this cache fraction, traversals maintain boxes along the path
/// instead of reading the (mostly absent) cache.
const SWITCH_THRESHOLD: f64 = 0.5;

impl<T: Coordinate> NodeStore<T> {
    pub fn new(
        capacity: usize,
        dimensions: usize,
        store_sequence_indexes: bool,
        center_of_mass_enabled: bool,
        bounding_box_cache_fraction: f64,
    ) -> Result<Self> {
        check_argument(capacity >= 2, "tree capacity must be at least 2")?;
        check_argument(
            (0.0..=1.0).contains(&bounding_box_cache_fraction),
            "bounding box cache fraction must lie in [0, 1]",
        )?;
        let internal_slots = capacity - 1;
        let cache_limit = (bounding_box_cache_fraction * internal_slots as f64) as usize;
        let null = (capacity - 1) as u32;
        Ok(NodeStore {
            capacity,
            dimensions,
            bounding_box_cache_fraction,
            cache_limit,
            left_index: vec![null; internal_slots],
            right_index: vec![null; internal_slots],
            parent_index: vec![null; internal_slots],
            mass: vec![0; internal_slots],
            cut_dimension: vec![u32::MAX; internal_slots],
            cut_value: vec![T::zero(); internal_slots],
            bounding_box_data: vec![T::zero(); 2 * dimensions * cache_limit],
            range_sum_data: vec![0.0; cache_limit],
            point_sum: if center_of_mass_enabled {
                vec![T::zero(); dimensions * internal_slots]
            } else {
                Vec::new()
            },
            center_of_mass_enabled,
            duplicate_leaf_mass: HashMap::new(),
            sequence_indexes: if store_sequence_indexes {
                Some(HashMap::new())
            } else {
                None
            },
            slot_manager: IntervalStoreManager::new(internal_slots),
        })
    }

    // -- addressing -------------------------------------------------------

    pub fn null_node(&self) -> usize {
        self.capacity - 1
    }

    pub fn is_leaf(&self, index: usize) -> bool {
        index >= self.capacity
    }

    pub fn is_internal(&self, index: usize) -> bool {
        index != self.null_node() && index < self.capacity
    }

    pub fn leaf_index(&self, point_index: usize) -> usize {
        self.capacity + point_index
    }

    pub fn point_index_of(&self, index: usize) -> Result<usize> {
        check_state(self.is_leaf(index), "not a leaf index")?;
        Ok(index - self.capacity)
    }

    pub fn left_of(&self, index: usize) -> usize {
        self.left_index[index] as usize
    }

    pub fn right_of(&self, index: usize) -> usize {
        self.right_index[index] as usize
    }

    pub fn sibling_of(&self, node: usize, parent: usize) -> usize {
        let left = self.left_of(parent);
        if node == left {
            self.right_of(parent)
        } else {
            left
        }
    }

    pub fn cut_dimension_of(&self, index: usize) -> usize {
        self.cut_dimension[index] as usize
    }

    pub fn cut_value_of(&self, index: usize) -> T {
        self.cut_value[index]
    }

    /// `(cut dimension, cut value, left, right)` of an internal node.
    pub fn cut_and_children(&self, index: usize) -> (usize, T, usize, usize) {
        if self.is_internal(index) {
            (
                self.cut_dimension[index] as usize,
                self.cut_value[index],
                self.left_of(index),
                self.right_of(index),
            )
        } else {
            (usize::MAX, T::zero(), usize::MAX, usize::MAX)
        }
    }

    pub fn is_left_of(&self, index: usize, point: &[T]) -> bool {
        point[self.cut_dimension[index] as usize] <= self.cut_value[index]
    }

    /// Records the root-to-leaf path for `point` as `(node, sibling)` pairs,
    /// root first; the root's sibling is the null sentinel.
    pub fn set_path(&self, path: &mut Vec<(usize, usize)>, root: usize, point: &[T]) {
        let mut node = root;
        path.push((root, self.null_node()));
        while !self.is_leaf(node) {
            if self.is_left_of(node, point) {
                path.push((self.left_of(node), self.right_of(node)));
                node = self.left_of(node);
            } else {
                path.push((self.right_of(node), self.left_of(node)));
                node = self.right_of(node);
            }
        }
    }

    // -- mass -------------------------------------------------------------

    pub fn mass_of(&self, index: usize) -> usize {
        if self.is_leaf(index) {
            let point_index = index - self.capacity;
            *self.duplicate_leaf_mass.get(&point_index).unwrap_or(&1)
        } else {
            self.mass[index] as usize + 1
        }
    }

    pub fn increment_leaf_mass(&mut self, index: usize) -> Result<usize> {
        let point_index = self.point_index_of(index)?;
        let entry = self.duplicate_leaf_mass.entry(point_index).or_insert(1);
        *entry += 1;
        Ok(*entry)
    }

    /// Decrements a leaf's mass, returning the remaining mass (zero when the
    /// leaf is gone).
    pub fn decrement_leaf_mass(&mut self, index: usize) -> Result<usize> {
        let point_index = self.point_index_of(index)?;
        match self.duplicate_leaf_mass.get(&point_index).copied() {
            None => Ok(0),
            Some(2) => {
                self.duplicate_leaf_mass.remove(&point_index);
                Ok(1)
            }
            Some(m) => {
                self.duplicate_leaf_mass.insert(point_index, m - 1);
                Ok(m - 1)
            }
        }
    }

    // -- sequence indexes -------------------------------------------------

    pub fn sequence_tracking_enabled(&self) -> bool {
        self.sequence_indexes.is_some()
    }

    pub fn record_sequence_index(&mut self, point_index: usize, sequence_index: u64) {
        if let Some(map) = self.sequence_indexes.as_mut() {
            map.entry(point_index).or_default().push(sequence_index);
        }
    }

    /// Removes exactly one occurrence of `sequence_index` from the leaf's
    /// multiset; duplicates of the same sequence index lose only one entry.
    pub fn remove_sequence_index(
        &mut self,
        point_index: usize,
        sequence_index: u64,
    ) -> Result<()> {
        if let Some(map) = self.sequence_indexes.as_mut() {
            let list = map.get_mut(&point_index).ok_or(Error::InvalidState {
                msg: "sequence indexes missing for leaf",
            })?;
            let position = list
                .iter()
                .position(|&s| s == sequence_index)
                .ok_or(Error::InvalidState {
                    msg: "sequence index not recorded at leaf",
                })?;
            list.swap_remove(position);
            if list.is_empty() {
                map.remove(&point_index);
            }
        }
        Ok(())
    }

    pub fn sequence_indexes_of(&self, point_index: usize) -> Option<&Vec<u64>> {
        self.sequence_indexes.as_ref().and_then(|m| m.get(&point_index))
    }

    // -- structural edits -------------------------------------------------

    /// Creates the internal node merging `child`'s subtree with a fresh leaf
    /// for `point_index`, wiring it under `parent` (null for a new root).
    /// `subtree_box` is the bounding box of `child`'s subtree.
    pub fn add_node(
        &mut self,
        parent: usize,
        point: &[T],
        child: usize,
        point_index: usize,
        cut: Cut<T>,
        subtree_box: &BoundingBox<T>,
        point_store: &PointStore<T>,
    ) -> Result<usize> {
        let slot = self.slot_manager.get().map_err(|_| Error::InvalidState {
            msg: "internal node arena exhausted",
        })?;
        self.cut_dimension[slot] = cut.dimension as u32;
        self.cut_value[slot] = cut.value;
        let leaf = self.leaf_index(point_index) as u32;
        if point[cut.dimension] <= cut.value {
            self.left_index[slot] = leaf;
            self.right_index[slot] = child as u32;
        } else {
            self.left_index[slot] = child as u32;
            self.right_index[slot] = leaf;
        }
        // stored minus one: new mass is the child's subtree mass plus one
        self.mass[slot] = self.mass_of(child) as u32;

        if let Some(idx) = self.translate(slot) {
            self.write_cached_box(idx, subtree_box);
            self.cached_extend_with_point(idx, point);
        }

        self.parent_index[slot] = parent as u32;
        if self.is_internal(child) {
            self.parent_index[child] = slot as u32;
        }

        if self.center_of_mass_enabled {
            let child_sum = self.subtree_point_sum(child, point_store)?;
            let base = slot * self.dimensions;
            for (i, &v) in child_sum.iter().enumerate() {
                self.point_sum[base + i] = v + point[i];
            }
        }

        if parent != self.null_node() {
            self.replace_child(parent, child, slot);
        }
        Ok(slot)
    }

    /// Swaps `old_child` for `new_child` under `parent`.
    pub fn replace_child(&mut self, parent: usize, old_child: usize, new_child: usize) {
        if self.left_of(parent) == old_child {
            self.left_index[parent] = new_child as u32;
        } else {
            self.right_index[parent] = new_child as u32;
        }
        if self.is_internal(new_child) {
            self.parent_index[new_child] = parent as u32;
        }
    }

    pub fn set_root(&mut self, index: usize) {
        if self.is_internal(index) {
            self.parent_index[index] = self.null_node() as u32;
        }
    }

    pub fn release_internal_node(&mut self, index: usize) {
        let null = self.null_node() as u32;
        self.left_index[index] = null;
        self.right_index[index] = null;
        self.parent_index[index] = null;
        self.mass[index] = 0;
        self.cut_dimension[index] = u32::MAX;
        self.cut_value[index] = T::zero();
        if self.center_of_mass_enabled {
            let base = index * self.dimensions;
            for v in &mut self.point_sum[base..base + self.dimensions] {
                *v = T::zero();
            }
        }
        self.slot_manager.release(index);
    }

    /// Walks the remaining `(node, sibling)` path root-ward after an
    /// insertion: masses grow by one, cached boxes stretch to the new point
    /// until one already contains it, and center-of-mass sums absorb it.
    pub fn manage_ancestors_add(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[T],
        box_resolved: bool,
    ) {
        let mut resolved = box_resolved;
        while let Some((index, _)) = path.pop() {
            self.mass[index] += 1;
            if !resolved {
                if let Some(idx) = self.translate(index) {
                    resolved = self.cached_extend_with_point(idx, point);
                }
            }
            if self.center_of_mass_enabled {
                let base = index * self.dimensions;
                for (i, &v) in point.iter().enumerate() {
                    self.point_sum[base + i] = self.point_sum[base + i] + v;
                }
            }
        }
    }

    /// Mirror of `manage_ancestors_add` for a deletion: masses shrink,
    /// cached boxes are rebuilt from the children whenever the removed point
    /// touched their boundary, sums release the point.
    pub fn manage_ancestors_delete(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[T],
        point_store: &PointStore<T>,
        box_resolved: bool,
    ) -> Result<()> {
        let mut resolved = box_resolved;
        while let Some((index, _)) = path.pop() {
            self.mass[index] -= 1;
            if !resolved {
                resolved = self.shrink_cached_box(index, point, point_store)?;
            }
            if self.center_of_mass_enabled {
                let base = index * self.dimensions;
                for (i, &v) in point.iter().enumerate() {
                    self.point_sum[base + i] = self.point_sum[base + i] - v;
                }
            }
        }
        Ok(())
    }

    // -- bounding boxes ---------------------------------------------------

    /// Maps an internal slot to its cache row, when it has one.
    fn translate(&self, index: usize) -> Option<usize> {
        if index < self.cache_limit {
            Some(index)
        } else {
            None
        }
    }

    /// True when traversals should maintain boxes along the path rather
    /// than lean on the (sparse or absent) cache.
    pub fn use_path_for_box(&self) -> bool {
        self.bounding_box_cache_fraction < SWITCH_THRESHOLD
    }

    fn write_cached_box(&mut self, idx: usize, bounding_box: &BoundingBox<T>) {
        let base = 2 * idx * self.dimensions;
        let mid = base + self.dimensions;
        self.bounding_box_data[base..mid].copy_from_slice(bounding_box.min_values());
        self.bounding_box_data[mid..mid + self.dimensions]
            .copy_from_slice(bounding_box.max_values());
        self.range_sum_data[idx] = bounding_box.range_sum();
    }

    fn cached_box(&self, idx: usize) -> BoundingBox<T> {
        let base = 2 * idx * self.dimensions;
        let mid = base + self.dimensions;
        BoundingBox::from_points(
            &self.bounding_box_data[base..mid],
            &self.bounding_box_data[mid..mid + self.dimensions],
        )
    }

    /// Extends a cached box with a point; returns true when the box already
    /// contained it (so no ancestor needs extending either).
    fn cached_extend_with_point(&mut self, idx: usize, point: &[T]) -> bool {
        let base = 2 * idx * self.dimensions;
        let mid = base + self.dimensions;
        for (x, &y) in self.bounding_box_data[base..mid].iter_mut().zip(point) {
            if y < *x {
                *x = y;
            }
        }
        for (x, &y) in self.bounding_box_data[mid..mid + self.dimensions]
            .iter_mut()
            .zip(point)
        {
            if y > *x {
                *x = y;
            }
        }
        let new_sum: f64 = self.bounding_box_data[base..mid]
            .iter()
            .zip(&self.bounding_box_data[mid..mid + self.dimensions])
            .map(|(&lo, &hi)| as_f64(hi - lo))
            .sum();
        let unchanged = self.range_sum_data[idx] == new_sum;
        self.range_sum_data[idx] = new_sum;
        unchanged
    }

    fn cached_strictly_contains(&self, idx: usize, point: &[T]) -> bool {
        let base = 2 * idx * self.dimensions;
        let mid = base + self.dimensions;
        self.bounding_box_data[base..mid]
            .iter()
            .zip(point)
            .zip(&self.bounding_box_data[mid..mid + self.dimensions])
            .all(|((&lo, &v), &hi)| lo < v && v < hi)
    }

    /// After a delete: rebuilds the cached box from the children unless the
    /// removed point was strictly interior. Returns true once boxes higher
    /// up are guaranteed unaffected.
    fn shrink_cached_box(
        &mut self,
        index: usize,
        point: &[T],
        point_store: &PointStore<T>,
    ) -> Result<bool> {
        match self.translate(index) {
            Some(idx) => {
                if self.cached_strictly_contains(idx, point) {
                    Ok(true)
                } else {
                    let rebuilt = self.reconstruct_box(index, point_store)?;
                    self.write_cached_box(idx, &rebuilt);
                    Ok(false)
                }
            }
            None => Ok(false),
        }
    }

    /// Box of an internal node recomputed from its children.
    pub fn reconstruct_box(
        &self,
        index: usize,
        point_store: &PointStore<T>,
    ) -> Result<BoundingBox<T>> {
        let mut bounding_box = self.bounding_box(self.left_of(index), point_store)?;
        self.grow_node_box(&mut bounding_box, point_store, self.right_of(index))?;
        Ok(bounding_box)
    }

    /// Bounding box of any node, from cache when possible.
    pub fn bounding_box(
        &self,
        index: usize,
        point_store: &PointStore<T>,
    ) -> Result<BoundingBox<T>> {
        if self.is_leaf(index) {
            let point = point_store.get(index - self.capacity)?;
            return Ok(BoundingBox::from_point(point));
        }
        match self.translate(index) {
            Some(idx) => Ok(self.cached_box(idx)),
            None => self.reconstruct_box(index, point_store),
        }
    }

    /// Extends `bounding_box` by the subtree under `node`, descending only
    /// into uncached regions.
    pub fn grow_node_box(
        &self,
        bounding_box: &mut BoundingBox<T>,
        point_store: &PointStore<T>,
        node: usize,
    ) -> Result<()> {
        if self.is_leaf(node) {
            let point = point_store.get(node - self.capacity)?;
            bounding_box.add_point(point);
            return Ok(());
        }
        match self.translate(node) {
            Some(idx) => {
                let base = 2 * idx * self.dimensions;
                let mid = base + self.dimensions;
                bounding_box.add_point(&self.bounding_box_data[base..mid]);
                bounding_box.add_point(&self.bounding_box_data[mid..mid + self.dimensions]);
                Ok(())
            }
            None => {
                self.grow_node_box(bounding_box, point_store, self.left_of(node))?;
                self.grow_node_box(bounding_box, point_store, self.right_of(node))
            }
        }
    }

    /// Separation probability of `point` against the node's box, using the
    /// cache row directly when present.
    pub fn probability_of_cut(
        &self,
        index: usize,
        point: &[T],
        point_store: &PointStore<T>,
    ) -> Result<f64> {
        match self.translate(index) {
            Some(idx) if !self.is_leaf(index) => {
                let base = 2 * idx * self.dimensions;
                let mid = base + self.dimensions;
                let mut gap = 0.0f64;
                for (dim, &v) in point.iter().enumerate() {
                    let lo = self.bounding_box_data[base + dim];
                    let hi = self.bounding_box_data[mid + dim];
                    if v < lo {
                        gap += as_f64(lo - v);
                    } else if v > hi {
                        gap += as_f64(v - hi);
                    }
                }
                if gap == 0.0 {
                    Ok(0.0)
                } else {
                    Ok(gap / (self.range_sum_data[idx] + gap))
                }
            }
            _ => Ok(self
                .bounding_box(index, point_store)?
                .probability_of_cut(point)),
        }
    }

    pub fn probability_of_cut_with_missing(
        &self,
        index: usize,
        point: &[T],
        missing_coordinates: &[bool],
        point_store: &PointStore<T>,
    ) -> Result<f64> {
        Ok(self
            .bounding_box(index, point_store)?
            .probability_of_cut_with_missing(point, missing_coordinates))
    }

    // -- center of mass ---------------------------------------------------

    pub fn center_of_mass_enabled(&self) -> bool {
        self.center_of_mass_enabled
    }

    /// Sum of the points below a node, weighted by leaf masses.
    pub fn subtree_point_sum(
        &self,
        index: usize,
        point_store: &PointStore<T>,
    ) -> Result<Vec<T>> {
        if self.is_leaf(index) {
            let mass = self.mass_of(index);
            let point = point_store.get(index - self.capacity)?;
            let scale = from_f64::<T>(mass as f64);
            return Ok(point.iter().map(|&v| v * scale).collect());
        }
        check_state(
            self.center_of_mass_enabled,
            "center of mass tracking is disabled",
        )?;
        let base = index * self.dimensions;
        Ok(self.point_sum[base..base + self.dimensions].to_vec())
    }

    pub fn center_of_mass(
        &self,
        index: usize,
        point_store: &PointStore<T>,
    ) -> Result<Vec<T>> {
        let sum = self.subtree_point_sum(index, point_store)?;
        let mass = from_f64::<T>(self.mass_of(index) as f64);
        Ok(sum.into_iter().map(|v| v / mass).collect())
    }

    // -- audits (used by property tests) ----------------------------------

    /// Recomputes the mass of the subtree and checks the stored values.
    pub fn audit_mass(&self, index: usize) -> Result<usize> {
        if self.is_leaf(index) {
            return Ok(self.mass_of(index));
        }
        let left = self.audit_mass(self.left_of(index))?;
        let right = self.audit_mass(self.right_of(index))?;
        check_state(
            left + right == self.mass_of(index),
            "internal mass is not the sum of child masses",
        )?;
        Ok(left + right)
    }

    /// Checks the partition law: every point in the left subtree of a cut
    /// is at most the cut value, every point in the right is above it.
    pub fn audit_partition(&self, index: usize, point_store: &PointStore<T>) -> Result<()> {
        if self.is_leaf(index) {
            return Ok(());
        }
        let dim = self.cut_dimension_of(index);
        let value = self.cut_value_of(index);
        self.audit_side(self.left_of(index), dim, value, true, point_store)?;
        self.audit_side(self.right_of(index), dim, value, false, point_store)?;
        self.audit_partition(self.left_of(index), point_store)?;
        self.audit_partition(self.right_of(index), point_store)
    }

    fn audit_side(
        &self,
        index: usize,
        dim: usize,
        value: T,
        left: bool,
        point_store: &PointStore<T>,
    ) -> Result<()> {
        if self.is_leaf(index) {
            let point = point_store.get(index - self.capacity)?;
            let ok = if left {
                point[dim] <= value
            } else {
                point[dim] > value
            };
            return check_state(ok, "point on the wrong side of an ancestor cut");
        }
        self.audit_side(self.left_of(index), dim, value, left, point_store)?;
        self.audit_side(self.right_of(index), dim, value, left, point_store)
    }

    /// Checks that every cached box equals the union of its children's.
    pub fn audit_boxes(&self, index: usize, point_store: &PointStore<T>) -> Result<()> {
        if self.is_leaf(index) {
            return Ok(());
        }
        if let Some(idx) = self.translate(index) {
            let cached = self.cached_box(idx);
            let rebuilt = self.reconstruct_box(index, point_store)?;
            check_state(
                cached.min_values() == rebuilt.min_values()
                    && cached.max_values() == rebuilt.max_values(),
                "cached bounding box is not the union of child boxes",
            )?;
        }
        self.audit_boxes(self.left_of(index), point_store)?;
        self.audit_boxes(self.right_of(index), point_store)
    }

    /// Recomputes subtree point sums and checks the stored values (within
    /// floating tolerance, since addition order differs).
    pub fn audit_point_sums(
        &self,
        index: usize,
        point_store: &PointStore<T>,
    ) -> Result<Vec<T>> {
        if self.is_leaf(index) {
            return self.subtree_point_sum(index, point_store);
        }
        let left = self.audit_point_sums(self.left_of(index), point_store)?;
        let right = self.audit_point_sums(self.right_of(index), point_store)?;
        let computed: Vec<T> = left.iter().zip(&right).map(|(&a, &b)| a + b).collect();
        let base = index * self.dimensions;
        let stored = &self.point_sum[base..base + self.dimensions];
        for (&c, &s) in computed.iter().zip(stored) {
            let scale = as_f64(c.abs()).max(as_f64(s.abs())).max(1.0);
            check_state(
                (as_f64(c - s)).abs() <= 1e-3 * scale,
                "stored point sum drifted from the subtree contents",
            )?;
        }
        Ok(computed)
    }

    /// Checks parent pointers for internal children.
    pub fn audit_parents(&self, index: usize) -> Result<()> {
        if self.is_leaf(index) {
            return Ok(());
        }
        for child in [self.left_of(index), self.right_of(index)] {
            if self.is_internal(child) {
                check_state(
                    self.parent_index[child] as usize == index,
                    "child has a stale parent pointer",
                )?;
                self.audit_parents(child)?;
            }
        }
        Ok(())
    }

    // -- accounting and state ---------------------------------------------

    pub fn size_bytes(&self) -> usize {
        (self.left_index.len()
            + self.right_index.len()
            + self.parent_index.len()
            + self.mass.len()
            + self.cut_dimension.len()) * std::mem::size_of::<u32>()
            + (self.cut_value.len() + self.bounding_box_data.len() + self.point_sum.len())
                * std::mem::size_of::<T>()
            + self.range_sum_data.len() * std::mem::size_of::<f64>()
            + self.slot_manager.size_bytes()
            + std::mem::size_of::<NodeStore<T>>()
    }

    pub fn fill_state(&self, state: &mut TreeState<T>) {
        state.left_index = self.left_index.clone();
        state.right_index = self.right_index.clone();
        state.parent_index = self.parent_index.clone();
        state.mass = self.mass.clone();
        state.cut_dimension = self.cut_dimension.clone();
        state.cut_value = self.cut_value.clone();
        state.bounding_box_data = self.bounding_box_data.clone();
        state.range_sum_data = self.range_sum_data.clone();
        state.point_sum = self.point_sum.clone();
        let mut duplicates: Vec<(usize, usize)> = self
            .duplicate_leaf_mass
            .iter()
            .map(|(&k, &v)| (k, v))
            .collect();
        duplicates.sort_unstable();
        state.duplicate_leaf_mass = duplicates;
        state.sequence_indexes = self.sequence_indexes.as_ref().map(|map| {
            let mut entries: Vec<(usize, Vec<u64>)> =
                map.iter().map(|(&k, v)| (k, v.clone())).collect();
            entries.sort_unstable();
            entries
        });
        state.free_ranges = self.slot_manager.free_ranges();
    }

    pub fn from_state(
        capacity: usize,
        dimensions: usize,
        center_of_mass_enabled: bool,
        bounding_box_cache_fraction: f64,
        state: &TreeState<T>,
    ) -> Result<Self> {
        check_argument(
            state.left_index.len() == capacity - 1,
            "inconsistent tree state",
        )?;
        let internal_slots = capacity - 1;
        let cache_limit = (bounding_box_cache_fraction * internal_slots as f64) as usize;
        Ok(NodeStore {
            capacity,
            dimensions,
            bounding_box_cache_fraction,
            cache_limit,
            left_index: state.left_index.clone(),
            right_index: state.right_index.clone(),
            parent_index: state.parent_index.clone(),
            mass: state.mass.clone(),
            cut_dimension: state.cut_dimension.clone(),
            cut_value: state.cut_value.clone(),
            bounding_box_data: state.bounding_box_data.clone(),
            range_sum_data: state.range_sum_data.clone(),
            point_sum: state.point_sum.clone(),
            center_of_mass_enabled,
            duplicate_leaf_mass: state.duplicate_leaf_mass.iter().copied().collect(),
            sequence_indexes: state
                .sequence_indexes
                .as_ref()
                .map(|entries| entries.iter().cloned().collect()),
            slot_manager: IntervalStoreManager::from_ranges(internal_slots, &state.free_ranges),
        })
    }
}
