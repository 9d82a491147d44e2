//! Streaming anomaly detection and density estimation over random cut
//! forests.
//!
//! A random cut forest maintains an ensemble of randomly built binary
//! space partitions, each over its own time-decayed reservoir sample of a
//! stream of fixed-dimension points. The ensemble answers anomaly scores,
//! per-dimension attributions, density estimates, near-neighbor and
//! imputation queries, and can be updated after every point in constant
//! amortized work per tree.
//!
//! ```ignore
//! use cutforest::ForestBuilder;
//!
//! let mut forest = ForestBuilder::new(2)
//!     .number_of_trees(50)
//!     .sample_size(256)
//!     .random_seed(42)
//!     .build::<f32>()?;
//!
//! for point in stream {
//!     let score = forest.anomaly_score(&point)?;
//!     forest.update(&point)?;
//! }
//! ```
//!
//! ### References
//!
//! Sudipto Guha, Nina Mishra, Gourav Roy, and Okke Schrijvers. *"Robust
//! random cut forest based anomaly detection on streams."* International
//! Conference on Machine Learning, pp. 2712-2721. PMLR, 2016.

mod accumulator;
mod component;
mod config;
mod divector;
mod errors;
mod forest;
mod measure;
mod sampler;
mod state;
mod store;
mod tree;
mod types;
mod util;
pub mod visitor;

pub use accumulator::{ConvergingAccumulator, Deviation, OneSidedStdDevAccumulator};
pub use config::ForestBuilder;
pub use divector::DiVector;
pub use errors::{Error, Result};
pub use forest::{Neighbor, RandomCutForest};
pub use measure::{DensityResult, InterpolationMeasure};
pub use sampler::{Proposal, ReservoirSampler, SampledEntry};
pub use state::{
    ComponentState, ForestConfigState, ForestState, PointStoreState, SamplerState, TreeState,
};
pub use store::points::PointStore;
pub use tree::boundingbox::BoundingBox;
pub use tree::nodeview::NodeView;
pub use types::Coordinate;
pub use util::{l1_distance, l2_distance};
