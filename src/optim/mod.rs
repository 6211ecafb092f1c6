//! Optimizers for the two levels of the search
//!
//! Network weights follow SGD with momentum on the training split under a
//! cosine schedule; alpha and beta follow Adam on the validation split.

mod adam;
mod architect;
mod bilevel;
mod scheduler;
mod sgd;

use ndarray::Array2;

use crate::data::Batch;
use crate::error::Result;
use crate::nn::loss::cross_entropy;
use crate::search::SearchNetwork;

pub use adam::Adam;
pub use architect::Architect;
pub use bilevel::{BiLevelOptimizer, StepOutput};
pub use scheduler::CosineAnnealing;
pub use sgd::{clip_grad_norm, grad_norm, Sgd};

/// Cross-entropy forward and backward on one batch.
///
/// Gradients accumulate into both weights and architecture parameters.
/// Returns the loss and the logits.
pub(crate) fn forward_backward(
    network: &mut SearchNetwork,
    batch: &Batch,
) -> Result<(f64, Array2<f64>)> {
    let logits = network.forward(&batch.images)?;
    let (loss, grad) = cross_entropy(&logits, &batch.labels)?;
    network.backward(&grad)?;
    Ok((loss, logits))
}
