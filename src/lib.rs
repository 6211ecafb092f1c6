//! PC-DARTS - Partially-connected differentiable architecture search
//!
//! This crate searches convolutional cell architectures on image
//! classification data:
//! - Continuous relaxation of the cell DAG (alpha over operations)
//! - Partial channel connections with per-node edge normalization (beta)
//! - Bi-level optimization of weights and architecture
//! - Discretization into a genotype
//!
//! # Modules
//!
//! ## Search
//! - [`search`] - Candidate operations, mixed edges, cells and the search network
//! - [`optim`] - SGD, Adam, cosine annealing and the architecture step
//! - [`genotype`] - Top-k discretization of the learned weights
//!
//! ## Building blocks
//! - [`nn`] - Tensor layers with hand-written backward passes
//! - [`data`] - CIFAR-10, synthetic images, augmentation and batching
//!
//! ## Running
//! - [`config`] - TOML configuration
//! - [`trainer`] - Fit loop, metric logging and checkpoints
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Search
pub mod search;
pub mod optim;
pub mod genotype;

// Building blocks
pub mod nn;
pub mod data;

// Running
pub mod config;
pub mod trainer;
pub mod cli;

pub use error::{DartsError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for convenient imports
pub mod prelude {
    // Error handling
    pub use crate::error::{DartsError, Result};

    // Configuration
    pub use crate::config::{DataSource, SearchConfig};

    // Search space
    pub use crate::search::{ArchitectureWeights, OperationKind, SearchNetwork};
    pub use crate::genotype::{derive_genotype, Genotype, GenotypeEdge};

    // Optimization
    pub use crate::optim::{BiLevelOptimizer, StepOutput};

    // Data
    pub use crate::data::{Batch, DataLoader, DataModule, Dataset, SyntheticImages};

    // Training
    pub use crate::trainer::{Checkpoint, SearchModule, Trainer};
}
