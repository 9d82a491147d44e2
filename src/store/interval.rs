use crate::errors::{Error, Result};

/// Freelist of slot indices kept as disjoint `[start, end]` ranges.
///
/// Stores in this crate allocate and release small integer slots at high
/// rate; keeping the free set as coalesced intervals makes the common case
/// (release of a just-vacated neighbor) constant time and keeps the
/// serialized form of a store small.
pub(crate) struct IntervalStoreManager {
    capacity: usize,
    free: Vec<(usize, usize)>,
}

impl IntervalStoreManager {
    pub fn new(capacity: usize) -> Self {
        let free = if capacity == 0 {
            Vec::new()
        } else {
            vec![(0, capacity - 1)]
        };
        IntervalStoreManager { capacity, free }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Extends the managed index space; existing allocations are unaffected.
    pub fn change_capacity(&mut self, new_capacity: usize) {
        if new_capacity > self.capacity {
            self.free.push((self.capacity, new_capacity - 1));
            self.capacity = new_capacity;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// Vends the next free slot.
    pub fn get(&mut self) -> Result<usize> {
        let (start, end) = *self.free.last().ok_or(Error::CapacityExceeded)?;
        if start == end {
            self.free.pop();
        } else {
            *self.free.last_mut().expect("interval present") = (start + 1, end);
        }
        Ok(start)
    }

    /// Returns a slot to the free set, coalescing with the most recent range.
    pub fn release(&mut self, index: usize) {
        if let Some((start, end)) = self.free.last_mut() {
            if *start == index + 1 {
                *start = index;
                return;
            }
            if *end + 1 == index {
                *end = index;
                return;
            }
        }
        self.free.push((index, index));
    }

    /// Number of slots currently vended.
    pub fn used(&self) -> usize {
        let free: usize = self.free.iter().map(|(s, e)| e - s + 1).sum();
        self.capacity - free
    }

    pub fn free_ranges(&self) -> Vec<(usize, usize)> {
        self.free.clone()
    }

    pub fn from_ranges(capacity: usize, ranges: &[(usize, usize)]) -> Self {
        IntervalStoreManager {
            capacity,
            free: ranges.to_vec(),
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.free.len() * std::mem::size_of::<(usize, usize)>()
            + std::mem::size_of::<IntervalStoreManager>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vends_all_slots_once() {
        let mut manager = IntervalStoreManager::new(4);
        let mut seen = vec![false; 4];
        for _ in 0..4 {
            seen[manager.get().unwrap()] = true;
        }
        assert!(seen.iter().all(|&s| s));
        assert!(manager.get().is_err());
        assert_eq!(manager.used(), 4);
    }

    #[test]
    fn release_coalesces() {
        let mut manager = IntervalStoreManager::new(8);
        for _ in 0..8 {
            manager.get().unwrap();
        }
        manager.release(3);
        manager.release(2);
        manager.release(4);
        assert_eq!(manager.free_ranges().len(), 1);
        assert_eq!(manager.used(), 5);
    }

    #[test]
    fn capacity_grows() {
        let mut manager = IntervalStoreManager::new(2);
        manager.get().unwrap();
        manager.get().unwrap();
        manager.change_capacity(4);
        assert_eq!(manager.get().unwrap(), 2);
        assert_eq!(manager.capacity(), 4);
    }
}
