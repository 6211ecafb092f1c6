//! Differentiable architecture search with partial channel connections
//!
//! A search cell is a DAG whose edges each hold a softmax-weighted mixture of
//! every candidate operation. Only a sampled 1/K of an edge's channels pass
//! through the mixture; the rest bypass it. Per-node edge weights (beta)
//! stabilize the edge choice that sampling would otherwise make noisy.

mod arch;
mod cell;
mod edge;
mod network;
mod ops;
mod sampler;

pub use arch::{ArchitectureState, ArchitectureWeights};
pub use cell::SearchCell;
pub use edge::{EdgeGrad, MixedEdge};
pub use network::{NetworkState, SearchNetwork};
pub use ops::{CandidateOp, OperationKind};
pub use sampler::ChannelSampler;
