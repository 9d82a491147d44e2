use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::errors::{Error, Result};
use crate::state::TreeState;
use crate::store::points::PointStore;
use crate::tree::boundingbox::BoundingBox;
use crate::tree::cut::Cut;
use crate::tree::nodestore::NodeStore;
use crate::tree::nodeview::NodeView;
use crate::types::Coordinate;
use crate::util::{check_argument, check_state};
use crate::visitor::{MultiVisitor, Visitor, VisitorInfo};

/// A random binary space partition over the points currently held by one
/// sampler.
///
/// The tree owns no points: leaves reference point-store slots whose
/// lifetime the executor manages through reference counts. All structural
/// randomness comes from the tree's own rolling seed, so replaying the
/// same sequence of inserts and deletes reproduces the tree exactly.
pub(crate) struct RandomCutTree<T> {
    dimensions: usize,
    node_store: NodeStore<T>,
    random_seed: u64,
    root: usize,
    tree_mass: usize,
}

impl<T: Coordinate> RandomCutTree<T> {
    pub fn new(
        dimensions: usize,
        capacity: usize,
        store_sequence_indexes: bool,
        center_of_mass_enabled: bool,
        bounding_box_cache_fraction: f64,
        random_seed: u64,
    ) -> Result<Self> {
        let node_store = NodeStore::new(
            capacity,
            dimensions,
            store_sequence_indexes,
            center_of_mass_enabled,
            bounding_box_cache_fraction,
        )?;
        let root = node_store.null_node();
        Ok(RandomCutTree {
            dimensions,
            node_store,
            random_seed,
            root,
            tree_mass: 0,
        })
    }

    pub fn mass(&self) -> usize {
        self.tree_mass
    }

    pub fn is_empty(&self) -> bool {
        self.root == self.node_store.null_node()
    }

    /// Adds one sampled copy of a point.
    ///
    /// Returns the point index the tree settled on: when the tree already
    /// holds a value-equal point, the existing leaf absorbs the copy and
    /// its index is returned instead of `point_index`.
    pub fn insert(
        &mut self,
        point_index: usize,
        sequence_index: u64,
        point_store: &PointStore<T>,
    ) -> Result<usize> {
        let null = self.node_store.null_node();
        if self.root == null {
            self.root = self.node_store.leaf_index(point_index);
            self.tree_mass = 1;
            self.node_store
                .record_sequence_index(point_index, sequence_index);
            return Ok(point_index);
        }

        let point = point_store.copy(point_index)?;
        let mut path_to_root: Vec<(usize, usize)> = Vec::new();
        self.node_store
            .set_path(&mut path_to_root, self.root, &point);
        let (mut node, mut sibling) = path_to_root.pop().expect("path is never empty");

        let leaf_point_index = self.node_store.point_index_of(node)?;
        let old_point = point_store.copy(leaf_point_index)?;

        self.tree_mass += 1;
        if point == old_point {
            self.node_store.increment_leaf_mass(node)?;
            self.node_store
                .record_sequence_index(leaf_point_index, sequence_index);
            self.node_store
                .manage_ancestors_add(&mut path_to_root, &point, true);
            return Ok(leaf_point_index);
        }

        let mut rng = ChaCha20Rng::seed_from_u64(self.random_seed);
        self.random_seed = rng.next_u64();

        // Walk the path leaf-to-root, at each level drawing a candidate cut
        // on the box of the subtree at that level merged with the new
        // point. The topmost level whose cut lands strictly outside the box
        // wins; levels above it keep their structure and only gain mass.
        let mut current_box = BoundingBox::from_point(&old_point);
        let mut saved_box = current_box.clone();
        let mut saved_cut: Cut<T> = Cut::none();
        let mut saved_parent = path_to_root.last().map_or(null, |e| e.0);
        let mut saved_node = node;
        let mut parent = saved_parent;
        let mut unresolved_path: Vec<(usize, usize)> = Vec::new();

        loop {
            let factor: f64 = rng.gen();
            let (cut, separation) = Cut::random_cut_and_separation(&current_box, factor, &point);
            if separation {
                saved_cut = cut;
                saved_parent = parent;
                saved_node = node;
                saved_box = current_box.clone();
                unresolved_path.clear();
            } else {
                unresolved_path.push((node, sibling));
            }
            check_state(!saved_cut.is_none(), "no separating cut on insertion path")?;

            if parent == null {
                break;
            }
            self.node_store
                .grow_node_box(&mut current_box, point_store, sibling)?;
            let (next_node, next_sibling) =
                path_to_root.pop().expect("parent implies another entry");
            node = next_node;
            sibling = next_sibling;
            parent = path_to_root.last().map_or(null, |e| e.0);
        }

        if saved_parent != null {
            while let Some(entry) = unresolved_path.pop() {
                path_to_root.push(entry);
            }
            check_state(
                path_to_root.last().map_or(false, |e| e.0 == saved_parent),
                "insertion path does not end at the separation parent",
            )?;
        } else {
            check_state(path_to_root.is_empty(), "dangling insertion path")?;
        }

        let merged_node = self.node_store.add_node(
            saved_parent,
            &point,
            saved_node,
            point_index,
            saved_cut,
            &saved_box,
            point_store,
        )?;
        self.node_store
            .record_sequence_index(point_index, sequence_index);

        if saved_parent != null {
            self.node_store
                .manage_ancestors_add(&mut path_to_root, &point, false);
        } else {
            self.root = merged_node;
            self.node_store.set_root(merged_node);
        }
        Ok(point_index)
    }

    /// Removes one sampled copy of a point previously inserted.
    ///
    /// Point-store reference counts are untouched; adjusting them is the
    /// executor's job.
    pub fn delete(
        &mut self,
        point_index: usize,
        sequence_index: u64,
        point_store: &PointStore<T>,
    ) -> Result<usize> {
        let null = self.node_store.null_node();
        check_state(self.root != null, "deleting from an empty tree")?;

        let point = point_store.copy(point_index)?;
        let mut leaf_path: Vec<(usize, usize)> = Vec::new();
        self.node_store.set_path(&mut leaf_path, self.root, &point);
        let (leaf_node, leaf_sibling) = leaf_path.pop().expect("path is never empty");

        let leaf_point_index = self.node_store.point_index_of(leaf_node)?;
        if leaf_point_index != point_index
            && !point_store.point_equals(leaf_point_index, &point)?
        {
            return Err(Error::NotFound);
        }

        self.tree_mass -= 1;
        self.node_store
            .remove_sequence_index(leaf_point_index, sequence_index)?;

        if self.node_store.decrement_leaf_mass(leaf_node)? == 0 {
            // the leaf is gone; splice its parent out of the tree
            if leaf_path.is_empty() {
                self.root = null;
            } else {
                let (parent, _) = leaf_path.pop().expect("checked non-empty");
                let grand_parent = leaf_path.last().map_or(null, |e| e.0);
                if grand_parent == null {
                    self.root = leaf_sibling;
                    self.node_store.set_root(leaf_sibling);
                } else {
                    self.node_store
                        .replace_child(grand_parent, parent, leaf_sibling);
                    self.node_store.manage_ancestors_delete(
                        &mut leaf_path,
                        &point,
                        point_store,
                        false,
                    )?;
                }
                self.node_store.release_internal_node(parent);
            }
        } else {
            // a duplicate copy collapsed; boxes are unchanged
            self.node_store
                .manage_ancestors_delete(&mut leaf_path, &point, point_store, true)?;
        }
        Ok(leaf_point_index)
    }

    /// Runs a visitor down the canonical path for `point` and back up.
    pub fn traverse<V, R>(
        &self,
        point: &[T],
        parameters: &[usize],
        visitor_factory: fn(usize, &[usize], &VisitorInfo<T>) -> V,
        info: &VisitorInfo<T>,
        point_store: &PointStore<T>,
        default: &R,
    ) -> Result<R>
    where
        V: Visitor<T, R>,
        R: Clone,
    {
        check_argument(point.len() == self.dimensions, "wrong point length")?;
        if self.is_empty() {
            return Ok(default.clone());
        }
        let mut visitor = visitor_factory(self.tree_mass, parameters, info);
        let maintain_box =
            visitor.requires_bounding_boxes() || self.node_store.use_path_for_box();
        let mut view = NodeView::create(self.root, maintain_box, &self.node_store);
        self.traverse_recursive(point, &mut view, &mut visitor, info, point_store)?;
        visitor.result(info)
    }

    fn traverse_recursive<V, R>(
        &self,
        point: &[T],
        view: &mut NodeView<T>,
        visitor: &mut V,
        info: &VisitorInfo<T>,
        point_store: &PointStore<T>,
    ) -> Result<()>
    where
        V: Visitor<T, R>,
    {
        let current = view.current_node();
        if self.node_store.is_leaf(current) {
            view.update_at_leaf(point, current, &self.node_store, point_store)?;
            visitor.accept_leaf(point, info, view)?;
            if visitor.use_shadow_box() {
                view.enable_shadow_box(&self.node_store, point_store)?;
            }
        } else {
            view.descend(point, &self.node_store);
            self.traverse_recursive(point, view, visitor, info, point_store)?;
            if !visitor.is_converged() {
                view.ascend(point, current, &self.node_store, point_store)?;
                visitor.accept(point, info, view)?;
            }
        }
        Ok(())
    }

    /// Multi-visitor traversal: at any internal node whose cut dimension is
    /// flagged missing, both subtrees are explored and the visitor merges
    /// the branches on the way up.
    pub fn traverse_multi<V, R>(
        &self,
        point: &[T],
        missing_coordinates: &[bool],
        visitor: &mut V,
        info: &VisitorInfo<T>,
        point_store: &PointStore<T>,
    ) -> Result<()>
    where
        V: MultiVisitor<T, R>,
    {
        check_argument(
            point.len() == self.dimensions && missing_coordinates.len() == self.dimensions,
            "wrong point length",
        )?;
        if self.is_empty() {
            return Ok(());
        }
        let maintain_box =
            visitor.requires_bounding_boxes() || self.node_store.use_path_for_box();
        let mut view = NodeView::create(self.root, maintain_box, &self.node_store);
        self.traverse_multi_recursive(
            point,
            missing_coordinates,
            &mut view,
            visitor,
            info,
            point_store,
        )
    }

    fn traverse_multi_recursive<V, R>(
        &self,
        point: &[T],
        missing_coordinates: &[bool],
        view: &mut NodeView<T>,
        visitor: &mut V,
        info: &VisitorInfo<T>,
        point_store: &PointStore<T>,
    ) -> Result<()>
    where
        V: MultiVisitor<T, R>,
    {
        let current = view.current_node();
        if self.node_store.is_leaf(current) {
            view.update_at_leaf(point, current, &self.node_store, point_store)?;
            return visitor.accept_leaf(point, info, view);
        }

        view.refresh_cut_info(&self.node_store);
        if missing_coordinates[self.node_store.cut_dimension_of(current)] {
            let depth = view.depth();
            view.set_current_node(self.node_store.left_of(current));
            view.set_depth(depth + 1);
            self.traverse_multi_recursive(
                point,
                missing_coordinates,
                view,
                visitor,
                info,
                point_store,
            )?;
            let saved_box = view.box_copy();
            view.set_current_node(self.node_store.right_of(current));
            view.set_depth(depth + 1);
            self.traverse_multi_recursive(
                point,
                missing_coordinates,
                view,
                visitor,
                info,
                point_store,
            )?;
            visitor.combine_branches(point, info, view)?;
            if !visitor.is_converged() {
                view.merge_paths(
                    current,
                    saved_box,
                    point,
                    missing_coordinates,
                    &self.node_store,
                    point_store,
                )?;
            }
        } else {
            view.descend(point, &self.node_store);
            self.traverse_multi_recursive(
                point,
                missing_coordinates,
                view,
                visitor,
                info,
                point_store,
            )?;
            if !visitor.is_converged() {
                view.ascend_with_missing(
                    point,
                    missing_coordinates,
                    current,
                    &self.node_store,
                    point_store,
                )?;
            }
        }
        if !visitor.is_converged() {
            visitor.accept(point, info, view)?;
        }
        Ok(())
    }

    /// Full structural audit; used by property tests.
    pub fn verify_consistency(&self, point_store: &PointStore<T>) -> Result<()> {
        if self.is_empty() {
            return check_state(self.tree_mass == 0, "empty tree with non-zero mass");
        }
        let computed = self.node_store.audit_mass(self.root)?;
        check_state(
            computed == self.tree_mass,
            "root mass does not match tree mass",
        )?;
        self.node_store.audit_partition(self.root, point_store)?;
        self.node_store.audit_boxes(self.root, point_store)?;
        if self.node_store.center_of_mass_enabled() {
            self.node_store.audit_point_sums(self.root, point_store)?;
        }
        self.node_store.audit_parents(self.root)
    }

    pub fn size_bytes(&self) -> usize {
        self.node_store.size_bytes() + std::mem::size_of::<RandomCutTree<T>>()
    }

    pub fn to_state(&self) -> TreeState<T> {
        let mut state = TreeState {
            root: self.root,
            tree_mass: self.tree_mass,
            random_seed: self.random_seed,
            left_index: Vec::new(),
            right_index: Vec::new(),
            parent_index: Vec::new(),
            mass: Vec::new(),
            cut_dimension: Vec::new(),
            cut_value: Vec::new(),
            bounding_box_data: Vec::new(),
            range_sum_data: Vec::new(),
            point_sum: Vec::new(),
            duplicate_leaf_mass: Vec::new(),
            sequence_indexes: None,
            free_ranges: Vec::new(),
        };
        self.node_store.fill_state(&mut state);
        state
    }

    pub fn from_state(
        dimensions: usize,
        capacity: usize,
        center_of_mass_enabled: bool,
        bounding_box_cache_fraction: f64,
        state: &TreeState<T>,
    ) -> Result<Self> {
        Ok(RandomCutTree {
            dimensions,
            node_store: NodeStore::from_state(
                capacity,
                dimensions,
                center_of_mass_enabled,
                bounding_box_cache_fraction,
                state,
            )?,
            random_seed: state.random_seed,
            root: state.root,
            tree_mass: state.tree_mass,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitor::{AnomalyScoreVisitor, NearNeighborVisitor};

    fn tree_with_store(
        capacity: usize,
        cache_fraction: f64,
        sequence: bool,
        center_of_mass: bool,
    ) -> (PointStore<f32>, RandomCutTree<f32>) {
        let store = PointStore::new(2, 1, 4 * capacity, 4 * capacity).unwrap();
        let tree =
            RandomCutTree::new(2, capacity, sequence, center_of_mass, cache_fraction, 99).unwrap();
        (store, tree)
    }

    /// Mimics the executor's slot handling for a single tree.
    fn add(
        store: &mut PointStore<f32>,
        tree: &mut RandomCutTree<f32>,
        point: &[f32],
        seq: u64,
    ) -> usize {
        let slot = store.add(point).unwrap();
        let adopted = tree.insert(slot, seq, store).unwrap();
        store.increment_ref_count(adopted).unwrap();
        store.release_if_unreferenced(slot).unwrap();
        adopted
    }

    fn remove(
        store: &mut PointStore<f32>,
        tree: &mut RandomCutTree<f32>,
        index: usize,
        seq: u64,
    ) {
        let removed = tree.delete(index, seq, store).unwrap();
        store.decrement_ref_count(removed).unwrap();
    }

    fn pseudo_point(i: u64) -> [f32; 2] {
        // deterministic scattered points, no RNG needed
        let a = ((i * 2654435761) % 1000) as f32 / 10.0;
        let b = ((i * 40503 + 7) % 1000) as f32 / 10.0;
        [a, b]
    }

    #[test]
    fn insert_then_delete_everything() {
        let (mut store, mut tree) = tree_with_store(32, 1.0, false, false);
        let mut held = Vec::new();
        for i in 0..32u64 {
            held.push((add(&mut store, &mut tree, &pseudo_point(i), i), i));
            tree.verify_consistency(&store).unwrap();
        }
        assert_eq!(tree.mass(), 32);
        for (index, seq) in held {
            remove(&mut store, &mut tree, index, seq);
            tree.verify_consistency(&store).unwrap();
        }
        assert!(tree.is_empty());
        assert_eq!(store.total_reference_count(), 0);
    }

    #[test]
    fn duplicates_collapse_into_one_leaf() {
        let (mut store, mut tree) = tree_with_store(8, 1.0, false, false);
        let first = add(&mut store, &mut tree, &[1.0, 1.0], 0);
        let second = add(&mut store, &mut tree, &[1.0, 1.0], 1);
        let third = add(&mut store, &mut tree, &[1.0, 1.0], 2);
        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(tree.mass(), 3);
        // all three references target the shared slot
        assert_eq!(store.reference_count(first), 3);
        tree.verify_consistency(&store).unwrap();

        remove(&mut store, &mut tree, first, 1);
        assert_eq!(tree.mass(), 2);
        tree.verify_consistency(&store).unwrap();
    }

    #[test]
    fn delete_of_unknown_point_is_not_found() {
        let (mut store, mut tree) = tree_with_store(8, 1.0, false, false);
        add(&mut store, &mut tree, &[0.0, 0.0], 0);
        let stranger = store.add(&[5.0, 5.0]).unwrap();
        store.increment_ref_count(stranger).unwrap();
        assert_eq!(tree.delete(stranger, 0, &store), Err(Error::NotFound));
    }

    #[test]
    fn replay_with_same_seed_is_identical() {
        let build = || {
            let (mut store, mut tree) = tree_with_store(16, 1.0, false, false);
            let mut held = std::collections::VecDeque::new();
            for i in 0..200u64 {
                held.push_back(add(&mut store, &mut tree, &pseudo_point(i % 24), i));
                if held.len() > 12 {
                    let oldest = held.pop_front().expect("checked length");
                    remove(&mut store, &mut tree, oldest, i);
                }
            }
            tree.to_state()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn works_without_any_box_cache() {
        let (mut store, mut tree) = tree_with_store(16, 0.0, false, false);
        let mut held = std::collections::VecDeque::new();
        for i in 0..64u64 {
            held.push_back(add(&mut store, &mut tree, &pseudo_point(i), i));
            if held.len() > 12 {
                let oldest = held.pop_front().expect("checked length");
                remove(&mut store, &mut tree, oldest, i);
            }
            tree.verify_consistency(&store).unwrap();
        }
        let info = VisitorInfo::default();
        let score = tree
            .traverse(
                &[500.0, 500.0],
                &[],
                AnomalyScoreVisitor::create_visitor,
                &info,
                &store,
                &0.0,
            )
            .unwrap();
        assert!(score > 0.0);
    }

    #[test]
    fn sequence_indexes_lose_exactly_one_entry() {
        let (mut store, mut tree) = tree_with_store(8, 1.0, true, false);
        let index = add(&mut store, &mut tree, &[2.0, 3.0], 10);
        add(&mut store, &mut tree, &[2.0, 3.0], 11);
        add(&mut store, &mut tree, &[2.0, 3.0], 11);

        // removing the duplicate recorded at 11 drops only one of its two
        // entries
        tree.delete(index, 11, &store).unwrap();
        store.decrement_ref_count(index).unwrap();

        let info = VisitorInfo::default();
        let candidate = tree
            .traverse(
                &[2.0, 3.0],
                &[],
                NearNeighborVisitor::create_visitor,
                &info,
                &store,
                &None,
            )
            .unwrap()
            .expect("tree is not empty");
        let mut remaining = candidate.sequence_indexes;
        remaining.sort_unstable();
        assert_eq!(remaining, vec![10, 11]);
    }

    #[test]
    fn center_of_mass_sums_track_contents() {
        let (mut store, mut tree) = tree_with_store(16, 1.0, false, true);
        let mut held = std::collections::VecDeque::new();
        for i in 0..48u64 {
            held.push_back(add(&mut store, &mut tree, &pseudo_point(i), i));
            if held.len() > 12 {
                let oldest = held.pop_front().expect("checked length");
                remove(&mut store, &mut tree, oldest, i);
            }
            tree.verify_consistency(&store).unwrap();
        }
    }
}
