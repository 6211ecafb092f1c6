//! Tensor layers with hand-written backward passes
//!
//! Activations are NCHW `Array4<f64>` tensors. Every layer caches what its
//! backward pass needs during `forward`, so a `backward` call must follow the
//! matching `forward` on the same layer.

mod activation;
mod conv;
mod linear;
pub mod loss;
mod norm;
mod param;
mod pool;

use ndarray::{Array1, Array4, ArrayViewD, ArrayViewMutD};

use crate::error::Result;

pub use activation::{Identity, Relu, Zero};
pub use conv::Conv2d;
pub use linear::{GlobalAvgPool, Linear};
pub use norm::BatchNorm2d;
pub use param::{Param, ParamView, ParamViewMut, TensorState};
pub use pool::{AvgPool2d, MaxPool2d};

/// NCHW activation tensor
pub type Tensor = Array4<f64>;

/// Anything that owns learnable parameters or persistent buffers
pub trait Parameterized {
    fn parameters(&self) -> Vec<ParamView<'_>> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<ParamViewMut<'_>> {
        Vec::new()
    }

    /// Non-learnable state that must survive a checkpoint (running statistics)
    fn buffers(&self) -> Vec<ArrayViewD<'_, f64>> {
        Vec::new()
    }

    fn buffers_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        Vec::new()
    }

    fn zero_grad(&mut self) {
        for mut p in self.parameters_mut() {
            p.zero_grad();
        }
    }

    fn num_params(&self) -> usize {
        self.parameters().iter().map(|p| p.value.len()).sum()
    }
}

/// A 4D tensor-to-tensor layer
pub trait Layer: Parameterized {
    fn forward(&mut self, x: &Tensor) -> Result<Tensor>;

    /// Accumulate parameter gradients and return the input gradient
    fn backward(&mut self, grad: &Tensor) -> Result<Tensor>;

    fn set_training(&mut self, _training: bool) {}
}

/// Numerically stable softmax
pub fn softmax(logits: &Array1<f64>) -> Array1<f64> {
    let max_val = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp: Array1<f64> = logits.mapv(|x| (x - max_val).exp());
    let sum: f64 = exp.sum();
    if sum > 0.0 {
        exp / sum
    } else {
        Array1::from_elem(logits.len(), 1.0 / logits.len() as f64)
    }
}

/// Pull a gradient w.r.t. softmax outputs back to the logits.
///
/// `dz_i = p_i * (g_i - sum_k p_k g_k)`
pub fn softmax_backward(probs: &Array1<f64>, grad_probs: &Array1<f64>) -> Array1<f64> {
    let inner = probs.dot(grad_probs);
    probs * &grad_probs.mapv(|g| g - inner)
}
