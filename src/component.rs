use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::errors::Result;
use crate::sampler::ReservoirSampler;
use crate::state::ComponentState;
use crate::store::points::PointStore;
use crate::tree::tree::RandomCutTree;
use crate::types::Coordinate;
use crate::util::check_state;
use crate::visitor::{ImputeCandidate, ImputeVisitor, Visitor, VisitorInfo};

/// One (sampler, tree) pair and the coordinated mutation between them.
///
/// The executor funnels every update through `update`, which keeps the
/// strict per-component order: propose, delete the evicted point from the
/// tree, insert the new point, commit the sampler. Reference counts are
/// not touched here; the executor applies them from the returned pair.
pub(crate) struct SampledTree<T> {
    sampler: ReservoirSampler,
    tree: RandomCutTree<T>,
    query_seed: u64,
}

/// Result of one component update: `(accepted_ref, evicted_ref)` as
/// point-store indices, with `usize::MAX` standing for none.
pub(crate) type UpdateResult = (usize, usize);

pub(crate) const NO_REF: usize = usize::MAX;

impl<T: Coordinate> SampledTree<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dimensions: usize,
        sample_size: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        store_sequence_indexes: bool,
        center_of_mass_enabled: bool,
        bounding_box_cache_fraction: f64,
        random_seed: u64,
    ) -> Result<Self> {
        let mut rng = ChaCha20Rng::seed_from_u64(random_seed);
        let sampler_seed = rng.next_u64();
        let tree_seed = rng.next_u64();
        let query_seed = rng.next_u64();
        Ok(SampledTree {
            sampler: ReservoirSampler::new(
                sample_size,
                time_decay,
                initial_accept_fraction,
                sampler_seed,
            )?,
            tree: RandomCutTree::new(
                dimensions,
                sample_size,
                store_sequence_indexes,
                center_of_mass_enabled,
                bounding_box_cache_fraction,
                tree_seed,
            )?,
            query_seed,
        })
    }

    /// Routes one stream point through this component.
    pub fn update(
        &mut self,
        point_index: usize,
        sequence_index: u64,
        point_store: &PointStore<T>,
    ) -> Result<UpdateResult> {
        let proposal = self.sampler.propose(sequence_index)?;
        if !proposal.accepted {
            return Ok((NO_REF, NO_REF));
        }
        let evicted_ref = match proposal.evicted {
            Some(entry) => {
                self.tree
                    .delete(entry.point_index, entry.sequence_index, point_store)?
            }
            None => NO_REF,
        };
        // the tree may adopt an existing equal point instead of the new one
        let accepted_ref = self.tree.insert(point_index, sequence_index, point_store)?;
        self.sampler.commit(accepted_ref)?;
        Ok((accepted_ref, evicted_ref))
    }

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
        self.tree
            .traverse(point, parameters, visitor_factory, info, point_store, default)
    }

    /// Imputation candidate of this tree, or none while the tree is empty.
    pub fn impute(
        &self,
        point: &[T],
        missing: &[usize],
        missing_flags: &[bool],
        centrality: f64,
        info: &VisitorInfo<T>,
        point_store: &PointStore<T>,
    ) -> Result<Option<ImputeCandidate<T>>> {
        if self.tree.is_empty() {
            return Ok(None);
        }
        let mut visitor =
            ImputeVisitor::new(missing, centrality, self.tree.mass(), self.query_seed);
        self.tree
            .traverse_multi(point, missing_flags, &mut visitor, info, point_store)?;
        visitor.result(info).map(Some)
    }

    pub fn sampler_size(&self) -> usize {
        self.sampler.size()
    }

    /// Audits the component: tree structure plus the mass/sampler-size
    /// equality.
    pub fn verify_consistency(&self, point_store: &PointStore<T>) -> Result<()> {
        check_state(
            self.tree.mass() == self.sampler.size(),
            "tree mass does not match sampler size",
        )?;
        self.tree.verify_consistency(point_store)
    }

    pub fn size_bytes(&self) -> usize {
        self.sampler.size_bytes() + self.tree.size_bytes()
            + std::mem::size_of::<SampledTree<T>>()
    }

    pub fn to_state(&self) -> ComponentState<T> {
        ComponentState {
            sampler: self.sampler.to_state(),
            tree: self.tree.to_state(),
            query_seed: self.query_seed,
        }
    }

    pub fn from_state(
        dimensions: usize,
        sample_size: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        center_of_mass_enabled: bool,
        bounding_box_cache_fraction: f64,
        state: &ComponentState<T>,
    ) -> Result<Self> {
        Ok(SampledTree {
            sampler: ReservoirSampler::from_state(
                sample_size,
                time_decay,
                initial_accept_fraction,
                &state.sampler,
            )?,
            tree: RandomCutTree::from_state(
                dimensions,
                sample_size,
                center_of_mass_enabled,
                bounding_box_cache_fraction,
                &state.tree,
            )?,
            query_seed: state.query_seed,
        })
    }
}
