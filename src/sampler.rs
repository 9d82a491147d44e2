use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::errors::{Error, Result};
use crate::state::SamplerState;
use crate::util::{check_argument, check_state};

/// One committed reservoir entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledEntry {
    pub point_index: usize,
    pub weight: f32,
    pub sequence_index: u64,
}

/// A sampler's answer to `propose`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proposal {
    pub accepted: bool,
    pub weight: f32,
    /// Entry that will leave the reservoir if the proposal is committed.
    pub evicted: Option<SampledEntry>,
}

#[derive(Debug, Clone, Copy)]
struct PendingAccept {
    weight: f32,
    sequence_index: u64,
    evicts: bool,
}

/// Time-decayed weighted reservoir over point-store indices.
///
/// Implements the exponential-family A-Res variant: a proposal at sequence
/// index `s` draws `u ~ Uniform(0,1)` and competes with weight
/// `ln(-ln(u)) - lambda * s`. The reservoir keeps the `capacity` smallest
/// weights, so later points (smaller expected weight) displace older ones
/// at a rate controlled by `lambda`. Entries are kept as parallel arrays
/// forming a max-weight binary heap; the root is always the next eviction
/// candidate.
///
/// Randomness follows the rolling-seed idiom used throughout this crate: a
/// stored `u64` seeds a fresh ChaCha20 stream on every proposal and is then
/// advanced, so the full sampler history is a pure function of the initial
/// seed and the proposal sequence.
pub struct ReservoirSampler {
    capacity: usize,
    time_decay: f64,
    initial_accept_fraction: f64,
    weights: Vec<f32>,
    point_indices: Vec<usize>,
    sequence_indexes: Vec<u64>,
    size: usize,
    random_seed: u64,
    last_sequence_index: Option<u64>,
    pending: Option<PendingAccept>,
}

impl ReservoirSampler {
    pub fn new(
        capacity: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        random_seed: u64,
    ) -> Result<Self> {
        check_argument(capacity >= 1, "sampler capacity must be at least 1")?;
        check_argument(
            time_decay >= 0.0 && time_decay.is_finite(),
            "time decay must be a finite non-negative number",
        )?;
        check_argument(
            initial_accept_fraction > 0.0 && initial_accept_fraction <= 1.0,
            "initial accept fraction must be in (0, 1]",
        )?;
        Ok(ReservoirSampler {
            capacity,
            time_decay,
            initial_accept_fraction,
            weights: vec![0.0; capacity],
            point_indices: vec![usize::MAX; capacity],
            sequence_indexes: vec![0; capacity],
            size: 0,
            random_seed,
            last_sequence_index: None,
            pending: None,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    pub fn fill_fraction(&self) -> f64 {
        self.size as f64 / self.capacity as f64
    }

    /// Acceptance probability while the reservoir is filling: one until the
    /// configured fraction is reached, then decaying linearly so the
    /// steady-state regime is reached smoothly by the time the reservoir is
    /// full. A fraction of one accepts everything during warm-up.
    fn initial_accept_probability(&self, fill_fraction: f64) -> f64 {
        if fill_fraction < self.initial_accept_fraction {
            1.0
        } else if self.initial_accept_fraction >= 1.0 {
            0.0
        } else {
            1.0 - (fill_fraction - self.initial_accept_fraction)
                / (1.0 - self.initial_accept_fraction)
        }
    }

    /// Decides whether the point at `sequence_index` enters the reservoir.
    ///
    /// Never mutates the committed reservoir; an accepting proposal parks a
    /// pending state that the caller finalizes with `commit` (or abandons by
    /// proposing again). Sequence indices must be non-decreasing across all
    /// proposals on this sampler.
    pub fn propose(&mut self, sequence_index: u64) -> Result<Proposal> {
        if let Some(seen) = self.last_sequence_index {
            if sequence_index < seen {
                return Err(Error::OutOfOrder {
                    seen,
                    proposed: sequence_index,
                });
            }
        }
        self.last_sequence_index = Some(sequence_index);
        self.pending = None;

        let mut rng = ChaCha20Rng::seed_from_u64(self.random_seed);
        self.random_seed = rng.next_u64();

        let mut uniform: f64 = rng.gen();
        while uniform <= 0.0 {
            uniform = rng.gen();
        }
        let weight =
            (f64::ln(-f64::ln(uniform)) - self.time_decay * sequence_index as f64) as f32;

        if !self.is_full() {
            let accept_draw: f64 = rng.gen();
            let accepted = accept_draw < self.initial_accept_probability(self.fill_fraction());
            if accepted {
                self.pending = Some(PendingAccept {
                    weight,
                    sequence_index,
                    evicts: false,
                });
            }
            return Ok(Proposal {
                accepted,
                weight,
                evicted: None,
            });
        }

        if weight < self.weights[0] {
            self.pending = Some(PendingAccept {
                weight,
                sequence_index,
                evicts: true,
            });
            Ok(Proposal {
                accepted: true,
                weight,
                evicted: Some(SampledEntry {
                    point_index: self.point_indices[0],
                    weight: self.weights[0],
                    sequence_index: self.sequence_indexes[0],
                }),
            })
        } else {
            Ok(Proposal {
                accepted: false,
                weight,
                evicted: None,
            })
        }
    }

    /// Finalizes the most recent accepting proposal with the point index the
    /// tree settled on (which may be an existing equal point's index).
    pub fn commit(&mut self, point_index: usize) -> Result<()> {
        let pending = self.pending.take().ok_or(Error::InvalidState {
            msg: "commit without an accepting proposal",
        })?;
        if pending.evicts {
            self.evict_max()?;
        }
        check_state(self.size < self.capacity, "sampler overflow at commit")?;
        let slot = self.size;
        self.weights[slot] = pending.weight;
        self.point_indices[slot] = point_index;
        self.sequence_indexes[slot] = pending.sequence_index;
        self.size += 1;
        self.sift_up(slot);
        Ok(())
    }

    /// Removes and returns the maximum-weight entry.
    pub fn evict_max(&mut self) -> Result<SampledEntry> {
        check_state(self.size > 0, "evicting from an empty sampler")?;
        let evicted = SampledEntry {
            point_index: self.point_indices[0],
            weight: self.weights[0],
            sequence_index: self.sequence_indexes[0],
        };
        self.size -= 1;
        if self.size > 0 {
            self.move_entry(self.size, 0);
            self.sift_down(0);
        }
        self.point_indices[self.size] = usize::MAX;
        Ok(evicted)
    }

    pub fn for_each(&self, mut f: impl FnMut(SampledEntry)) {
        for i in 0..self.size {
            f(SampledEntry {
                point_index: self.point_indices[i],
                weight: self.weights[i],
                sequence_index: self.sequence_indexes[i],
            });
        }
    }

    fn move_entry(&mut self, from: usize, to: usize) {
        self.weights[to] = self.weights[from];
        self.point_indices[to] = self.point_indices[from];
        self.sequence_indexes[to] = self.sequence_indexes[from];
    }

    fn swap_entries(&mut self, a: usize, b: usize) {
        self.weights.swap(a, b);
        self.point_indices.swap(a, b);
        self.sequence_indexes.swap(a, b);
    }

    fn sift_up(&mut self, start: usize) {
        let mut current = start;
        while current > 0 {
            let parent = (current - 1) / 2;
            if self.weights[parent] < self.weights[current] {
                self.swap_entries(parent, current);
                current = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, start: usize) {
        let mut current = start;
        loop {
            let left = 2 * current + 1;
            if left >= self.size {
                break;
            }
            let mut largest = left;
            let right = left + 1;
            if right < self.size && self.weights[right] > self.weights[left] {
                largest = right;
            }
            if self.weights[largest] > self.weights[current] {
                self.swap_entries(largest, current);
                current = largest;
            } else {
                break;
            }
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.weights.len() * std::mem::size_of::<f32>()
            + self.point_indices.len() * std::mem::size_of::<usize>()
            + self.sequence_indexes.len() * std::mem::size_of::<u64>()
            + std::mem::size_of::<ReservoirSampler>()
    }

    pub(crate) fn to_state(&self) -> SamplerState {
        SamplerState {
            weights: self.weights[..self.size].to_vec(),
            point_indices: self.point_indices[..self.size].to_vec(),
            sequence_indexes: self.sequence_indexes[..self.size].to_vec(),
            random_seed: self.random_seed,
            last_sequence_index: self.last_sequence_index,
        }
    }

    pub(crate) fn from_state(
        capacity: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        state: &SamplerState,
    ) -> Result<Self> {
        check_argument(
            state.weights.len() <= capacity
                && state.weights.len() == state.point_indices.len()
                && state.weights.len() == state.sequence_indexes.len(),
            "inconsistent sampler state",
        )?;
        let mut sampler = ReservoirSampler::new(
            capacity,
            time_decay,
            initial_accept_fraction,
            state.random_seed,
        )?;
        let size = state.weights.len();
        sampler.weights[..size].copy_from_slice(&state.weights);
        sampler.point_indices[..size].copy_from_slice(&state.point_indices);
        sampler.sequence_indexes[..size].copy_from_slice(&state.sequence_indexes);
        sampler.size = size;
        sampler.random_seed = state.random_seed;
        sampler.last_sequence_index = state.last_sequence_index;
        Ok(sampler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler(capacity: usize) -> ReservoirSampler {
        ReservoirSampler::new(capacity, 0.01, 1.0, 42).unwrap()
    }

    #[test]
    fn accepts_everything_while_empty() {
        let mut s = sampler(8);
        let proposal = s.propose(0).unwrap();
        assert!(proposal.accepted);
        assert!(proposal.evicted.is_none());
        s.commit(17).unwrap();
        assert_eq!(s.size(), 1);
    }

    #[test]
    fn out_of_order_proposals_fail() {
        let mut s = sampler(8);
        s.propose(5).unwrap();
        assert_eq!(
            s.propose(4),
            Err(Error::OutOfOrder {
                seen: 5,
                proposed: 4
            })
        );
        // equal sequence indices are allowed
        assert!(s.propose(5).is_ok());
    }

    #[test]
    fn commit_requires_accepting_proposal() {
        let mut s = sampler(4);
        assert!(matches!(s.commit(0), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn full_sampler_evicts_the_max_weight_entry() {
        let mut s = sampler(4);
        let mut seq = 0u64;
        while !s.is_full() {
            if s.propose(seq).unwrap().accepted {
                s.commit(seq as usize).unwrap();
            }
            seq += 1;
        }
        let mut accepted = 0;
        for _ in 0..4096 {
            let proposal = s.propose(seq).unwrap();
            if proposal.accepted {
                let evicted = proposal.evicted.expect("full sampler must evict");
                let mut max_weight = f32::MIN;
                s.for_each(|e| max_weight = max_weight.max(e.weight));
                assert_eq!(evicted.weight, max_weight);
                s.commit(seq as usize).unwrap();
                accepted += 1;
            }
            seq += 1;
        }
        assert!(accepted > 0);
        assert_eq!(s.size(), 4);
    }

    #[test]
    fn heap_keeps_smallest_weights() {
        let mut s = sampler(16);
        let mut seq = 0u64;
        let mut rejected_weights = Vec::new();
        for _ in 0..2048 {
            let proposal = s.propose(seq).unwrap();
            if proposal.accepted {
                s.commit(seq as usize).unwrap();
            } else {
                rejected_weights.push(proposal.weight);
            }
            seq += 1;
        }
        let mut max_kept = f32::MIN;
        s.for_each(|e| max_kept = max_kept.max(e.weight));
        // every rejected weight is at least as large as the heap maximum
        for w in rejected_weights {
            assert!(w >= max_kept);
        }
    }

    #[test]
    fn identical_seeds_replay_identically() {
        let mut a = sampler(8);
        let mut b = sampler(8);
        for seq in 0..512u64 {
            let pa = a.propose(seq).unwrap();
            let pb = b.propose(seq).unwrap();
            assert_eq!(pa.accepted, pb.accepted);
            assert_eq!(pa.weight, pb.weight);
            if pa.accepted {
                a.commit(seq as usize).unwrap();
                b.commit(seq as usize).unwrap();
            }
        }
    }

    #[test]
    fn state_round_trip_continues_identically() {
        let mut s = sampler(8);
        for seq in 0..256u64 {
            if s.propose(seq).unwrap().accepted {
                s.commit(seq as usize).unwrap();
            }
        }
        let state = s.to_state();
        let mut rebuilt = ReservoirSampler::from_state(8, 0.01, 1.0, &state).unwrap();
        for seq in 256..512u64 {
            let pa = s.propose(seq).unwrap();
            let pb = rebuilt.propose(seq).unwrap();
            assert_eq!(pa.accepted, pb.accepted);
            if pa.accepted {
                s.commit(seq as usize).unwrap();
                rebuilt.commit(seq as usize).unwrap();
            }
        }
        assert_eq!(s.size(), rebuilt.size());
    }
}
