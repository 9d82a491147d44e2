use log::{debug, trace};

use crate::errors::{Error, Result};
use crate::state::PointStoreState;
use crate::store::interval::IntervalStoreManager;
use crate::types::Coordinate;
use crate::util::check_argument;

/// Arena of fixed-dimension points shared by every tree of a forest.
///
/// Points are interned once and referenced by small stable slot indices;
/// each slot carries a reference count equal to the number of sampler
/// entries (across all trees) holding it. A slot whose count drops to zero
/// is returned to the freelist and its contents are dead until overwritten.
///
/// When the stream is shingled, consecutive points share their leading
/// `dimensions - base_dimension` values with the previous point's trailing
/// values. The store detects this overlap at `add` and appends only the
/// `base_dimension` fresh values, so a fully shingled stream costs roughly
/// `1/shingle_size` of the naive storage. All element offsets are multiples
/// of `base_dimension`, which is what makes the overlapped layout, the
/// location table and compaction line up.
pub struct PointStore<T> {
    dimensions: usize,
    base_dimension: usize,
    capacity: usize,
    store: Vec<T>,
    location: Vec<usize>,
    ref_count: Vec<u32>,
    start_free_region: usize,
    slot_manager: IntervalStoreManager,
}

/// Sentinel for a slot with no live point.
const DEAD: usize = usize::MAX;

impl<T: Coordinate> PointStore<T> {
    pub(crate) fn new(
        dimensions: usize,
        shingle_size: usize,
        capacity: usize,
        initial_capacity: usize,
    ) -> Result<Self> {
        check_argument(dimensions >= 1, "dimensions must be at least 1")?;
        check_argument(
            shingle_size >= 1 && dimensions % shingle_size == 0,
            "shingle size must divide dimensions",
        )?;
        check_argument(capacity >= 1, "capacity must be at least 1")?;
        let initial = initial_capacity.clamp(1, capacity);
        Ok(PointStore {
            dimensions,
            base_dimension: dimensions / shingle_size,
            capacity,
            store: vec![T::zero(); initial * dimensions],
            location: vec![DEAD; initial],
            ref_count: vec![0; initial],
            start_free_region: 0,
            slot_manager: IntervalStoreManager::new(initial),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn base_dimension(&self) -> usize {
        self.base_dimension
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live slots, counting slots reserved by `add` but not yet
    /// referenced.
    pub fn size(&self) -> usize {
        self.slot_manager.used()
    }

    /// Sum of all reference counts; equals the total number of sampler
    /// entries holding points in this store.
    pub fn total_reference_count(&self) -> u64 {
        self.ref_count.iter().map(|&c| c as u64).sum()
    }

    fn is_live(&self, index: usize) -> bool {
        index < self.location.len() && self.location[index] != DEAD
    }

    /// True when the previous point's trailing values equal this point's
    /// leading values, so the two storages may overlap.
    fn overlaps_previous(&self, point: &[T]) -> bool {
        let extra = self.dimensions - self.base_dimension;
        if extra == 0 || self.start_free_region < self.dimensions {
            return false;
        }
        let tail = self.start_free_region - extra;
        (0..extra).all(|i| self.store[tail + i] == point[i])
    }

    fn grow_element_buffer(&mut self, needed: usize) {
        let max_elements = self.capacity * self.dimensions;
        if self.store.len() >= max_elements {
            return;
        }
        let target = (self.store.len() + self.store.len() / 5 + needed).min(max_elements);
        trace!("point store buffer grows to {} elements", target);
        self.store.resize(target, T::zero());
    }

    fn grow_slot_tables(&mut self) {
        if self.location.len() >= self.capacity {
            return;
        }
        let target = (self.location.len() + self.location.len() / 5 + 1).min(self.capacity);
        self.location.resize(target, DEAD);
        self.ref_count.resize(target, 0);
        self.slot_manager.change_capacity(target);
    }

    /// Interns a point and returns its slot index.
    ///
    /// The returned slot has reference count zero but is reserved: the
    /// caller must either `increment_ref_count` to keep it or
    /// `release_if_unreferenced` to give it back.
    pub fn add(&mut self, point: &[T]) -> Result<usize> {
        check_argument(point.len() == self.dimensions, "wrong point length")?;

        if self.start_free_region + self.dimensions > self.store.len() {
            self.grow_element_buffer(self.dimensions);
            if self.start_free_region + self.dimensions > self.store.len() {
                self.compact()?;
            }
        }
        let overlap = self.overlaps_previous(point);
        let needed = if overlap {
            self.base_dimension
        } else {
            self.dimensions
        };
        if self.start_free_region + needed > self.store.len() {
            return Err(Error::CapacityExceeded);
        }

        if self.slot_manager.is_empty() {
            self.grow_slot_tables();
        }
        let slot = self.slot_manager.get().map_err(|_| Error::CapacityExceeded)?;
        debug_assert_eq!(self.ref_count[slot], 0);

        if overlap {
            let extra = self.dimensions - self.base_dimension;
            let begin = self.start_free_region - extra;
            self.location[slot] = begin / self.base_dimension;
            for i in 0..self.base_dimension {
                self.store[self.start_free_region + i] = point[extra + i];
            }
            self.start_free_region += self.base_dimension;
        } else {
            self.location[slot] = self.start_free_region / self.base_dimension;
            for (i, &v) in point.iter().enumerate() {
                self.store[self.start_free_region + i] = v;
            }
            self.start_free_region += self.dimensions;
        }
        Ok(slot)
    }

    pub fn increment_ref_count(&mut self, index: usize) -> Result<u32> {
        if !self.is_live(index) {
            return Err(Error::InvalidIndex { index });
        }
        self.ref_count[index] += 1;
        Ok(self.ref_count[index])
    }

    /// Decrements a slot's reference count, releasing the slot at zero.
    pub fn decrement_ref_count(&mut self, index: usize) -> Result<u32> {
        if !self.is_live(index) {
            return Err(Error::InvalidIndex { index });
        }
        if self.ref_count[index] == 0 {
            return Err(Error::InvalidState {
                msg: "reference count decremented below zero",
            });
        }
        self.ref_count[index] -= 1;
        let remaining = self.ref_count[index];
        if remaining == 0 {
            self.location[index] = DEAD;
            self.slot_manager.release(index);
        }
        Ok(remaining)
    }

    /// Releases a slot reserved by `add` that no tree ended up keeping.
    pub fn release_if_unreferenced(&mut self, index: usize) -> Result<()> {
        if !self.is_live(index) {
            return Err(Error::InvalidIndex { index });
        }
        if self.ref_count[index] == 0 {
            self.location[index] = DEAD;
            self.slot_manager.release(index);
        }
        Ok(())
    }

    pub fn reference_count(&self, index: usize) -> u32 {
        if index < self.ref_count.len() {
            self.ref_count[index]
        } else {
            0
        }
    }

    /// Read-only view of a live point.
    pub fn get(&self, index: usize) -> Result<&[T]> {
        if !self.is_live(index) {
            return Err(Error::InvalidIndex { index });
        }
        let begin = self.location[index] * self.base_dimension;
        Ok(&self.store[begin..begin + self.dimensions])
    }

    pub fn copy(&self, index: usize) -> Result<Vec<T>> {
        self.get(index).map(|p| p.to_vec())
    }

    pub fn point_equals(&self, index: usize, point: &[T]) -> Result<bool> {
        check_argument(point.len() == self.dimensions, "wrong point length")?;
        Ok(self.get(index)? == point)
    }

    /// Relocates live points toward the front of the element buffer.
    ///
    /// Blocks that overlap (shingled neighbors) are moved as one unit so the
    /// sharing survives the move. Slot indices are stable; only the internal
    /// location table changes. Returns the number of elements reclaimed.
    pub fn compact(&mut self) -> Result<usize> {
        let mut live: Vec<(usize, usize)> = self
            .location
            .iter()
            .enumerate()
            .filter(|(_, &loc)| loc != DEAD)
            .map(|(slot, &loc)| (loc, slot))
            .collect();
        live.sort_unstable();

        let old_free = self.start_free_region;
        let mut write = 0usize;
        let mut i = 0usize;
        while i < live.len() {
            let group_begin = live[i].0 * self.base_dimension;
            let mut group_end = group_begin + self.dimensions;
            let mut j = i + 1;
            while j < live.len() {
                let begin = live[j].0 * self.base_dimension;
                if begin > group_end {
                    break;
                }
                group_end = group_end.max(begin + self.dimensions);
                j += 1;
            }
            for (loc, slot) in &live[i..j] {
                let begin = loc * self.base_dimension;
                self.location[*slot] = (write + (begin - group_begin)) / self.base_dimension;
            }
            // group spans are multiples of base_dimension, so write stays aligned
            for offset in group_begin..group_end {
                self.store[write + (offset - group_begin)] = self.store[offset];
            }
            write += group_end - group_begin;
            i = j;
        }
        self.start_free_region = write;
        let reclaimed = old_free - write;
        if reclaimed > 0 {
            debug!("point store compaction reclaimed {} elements", reclaimed);
        }
        Ok(reclaimed)
    }

    pub fn size_bytes(&self) -> usize {
        self.store.len() * std::mem::size_of::<T>()
            + self.location.len() * std::mem::size_of::<usize>()
            + self.ref_count.len() * std::mem::size_of::<u32>()
            + self.slot_manager.size_bytes()
            + std::mem::size_of::<PointStore<T>>()
    }

    pub(crate) fn to_state(&self) -> PointStoreState<T> {
        PointStoreState {
            store: self.store.clone(),
            location: self.location.clone(),
            ref_count: self.ref_count.clone(),
            start_free_region: self.start_free_region,
            free_ranges: self.slot_manager.free_ranges(),
        }
    }

    pub(crate) fn from_state(
        dimensions: usize,
        shingle_size: usize,
        capacity: usize,
        state: &PointStoreState<T>,
    ) -> Result<Self> {
        check_argument(
            state.location.len() == state.ref_count.len(),
            "inconsistent point store state",
        )?;
        Ok(PointStore {
            dimensions,
            base_dimension: dimensions / shingle_size,
            capacity,
            store: state.store.clone(),
            location: state.location.clone(),
            ref_count: state.ref_count.clone(),
            start_free_region: state.start_free_region,
            slot_manager: IntervalStoreManager::from_ranges(
                state.location.len(),
                &state.free_ranges,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dimensions: usize, shingle: usize, capacity: usize) -> PointStore<f32> {
        PointStore::new(dimensions, shingle, capacity, capacity).unwrap()
    }

    #[test]
    fn add_and_get_round_trip() {
        let mut s = store(3, 1, 8);
        let a = s.add(&[1.0, 2.0, 3.0]).unwrap();
        s.increment_ref_count(a).unwrap();
        assert_eq!(s.get(a).unwrap(), &[1.0, 2.0, 3.0]);
        assert!(s.point_equals(a, &[1.0, 2.0, 3.0]).unwrap());
        assert!(!s.point_equals(a, &[1.0, 2.0, 4.0]).unwrap());
    }

    #[test]
    fn wrong_length_is_bad_argument() {
        let mut s = store(3, 1, 8);
        assert!(matches!(
            s.add(&[1.0, 2.0]),
            Err(Error::BadArgument { .. })
        ));
    }

    #[test]
    fn unreferenced_slot_is_released() {
        let mut s = store(2, 1, 4);
        let a = s.add(&[1.0, 2.0]).unwrap();
        s.release_if_unreferenced(a).unwrap();
        assert!(matches!(s.get(a), Err(Error::InvalidIndex { .. })));
        assert_eq!(s.size(), 0);
    }

    #[test]
    fn refcount_zero_frees_slot() {
        let mut s = store(2, 1, 4);
        let a = s.add(&[1.0, 2.0]).unwrap();
        s.increment_ref_count(a).unwrap();
        s.increment_ref_count(a).unwrap();
        assert_eq!(s.decrement_ref_count(a).unwrap(), 1);
        assert_eq!(s.decrement_ref_count(a).unwrap(), 0);
        assert!(matches!(s.get(a), Err(Error::InvalidIndex { .. })));
    }

    #[test]
    fn shingled_points_overlap() {
        // shingle of size 3 over a base dimension of 1
        let mut s = store(3, 3, 16);
        let a = s.add(&[1.0, 2.0, 3.0]).unwrap();
        s.increment_ref_count(a).unwrap();
        let b = s.add(&[2.0, 3.0, 4.0]).unwrap();
        s.increment_ref_count(b).unwrap();
        let c = s.add(&[3.0, 4.0, 5.0]).unwrap();
        s.increment_ref_count(c).unwrap();
        // three overlapping points use 3 + 1 + 1 elements
        assert_eq!(s.start_free_region, 5);
        assert_eq!(s.get(b).unwrap(), &[2.0, 3.0, 4.0]);
        assert_eq!(s.get(c).unwrap(), &[3.0, 4.0, 5.0]);
    }

    #[test]
    fn compaction_preserves_points() {
        let mut s = store(2, 1, 8);
        let mut kept = Vec::new();
        for i in 0..8 {
            let idx = s.add(&[i as f32, -(i as f32)]).unwrap();
            s.increment_ref_count(idx).unwrap();
            kept.push(idx);
        }
        for &idx in kept.iter().step_by(2) {
            s.decrement_ref_count(idx).unwrap();
        }
        let reclaimed = s.compact().unwrap();
        assert_eq!(reclaimed, 8);
        for &idx in kept.iter().skip(1).step_by(2) {
            let i = idx as f32;
            assert_eq!(s.get(idx).unwrap(), &[i, -i]);
        }
    }

    #[test]
    fn capacity_pressure_with_churn_never_fails() {
        let mut s = store(2, 1, 4);
        let mut held: Vec<usize> = Vec::new();
        for i in 0..64 {
            let idx = s.add(&[i as f32, 0.5]).unwrap();
            s.increment_ref_count(idx).unwrap();
            held.push(idx);
            if held.len() == 4 {
                for idx in held.drain(..) {
                    s.decrement_ref_count(idx).unwrap();
                }
            }
        }
        assert!(s.total_reference_count() <= 4);
    }

    #[test]
    fn exhaustion_is_capacity_exceeded() {
        let mut s = store(2, 1, 2);
        for i in 0..2 {
            let idx = s.add(&[i as f32, 1.0]).unwrap();
            s.increment_ref_count(idx).unwrap();
        }
        assert_eq!(s.add(&[9.0, 9.0]), Err(Error::CapacityExceeded));
    }

    #[test]
    fn state_round_trip() {
        let mut s = store(2, 1, 8);
        for i in 0..5 {
            let idx = s.add(&[i as f32, 2.0 * i as f32]).unwrap();
            s.increment_ref_count(idx).unwrap();
        }
        let state = s.to_state();
        let rebuilt = PointStore::<f32>::from_state(2, 1, 8, &state).unwrap();
        for i in 0..5 {
            assert_eq!(rebuilt.get(i).unwrap(), s.get(i).unwrap());
        }
        assert_eq!(rebuilt.total_reference_count(), 5);
    }
}
