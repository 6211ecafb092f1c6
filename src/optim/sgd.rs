//! SGD with momentum and global gradient-norm clipping

use ndarray::{ArrayD, Zip};

use crate::error::{DartsError, Result};
use crate::nn::ParamViewMut;

/// Stochastic gradient descent with heavy-ball momentum and L2 weight decay.
///
/// Velocity buffers are created on the first step and matched to parameters
/// by position, so the parameter list must keep a stable order.
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f64,
    momentum: f64,
    weight_decay: f64,
    velocity: Vec<ArrayD<f64>>,
}

impl Sgd {
    pub fn new(learning_rate: f64, momentum: f64, weight_decay: f64) -> Self {
        Self {
            learning_rate,
            momentum,
            weight_decay,
            velocity: Vec::new(),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    pub fn weight_decay(&self) -> f64 {
        self.weight_decay
    }

    /// Forget the momentum buffers
    pub fn reset(&mut self) {
        self.velocity.clear();
    }

    pub fn step(&mut self, params: &mut [ParamViewMut<'_>]) -> Result<()> {
        if self.velocity.is_empty() {
            self.velocity = params
                .iter()
                .map(|p| ArrayD::zeros(p.value.raw_dim()))
                .collect();
        }
        if self.velocity.len() != params.len() {
            return Err(DartsError::shape(
                format!("{} parameters", self.velocity.len()),
                format!("{} parameters", params.len()),
            ));
        }

        let (lr, mu, wd) = (self.learning_rate, self.momentum, self.weight_decay);
        for (p, v) in params.iter_mut().zip(self.velocity.iter_mut()) {
            if p.value.shape() != v.shape() {
                return Err(DartsError::shape(v.shape(), p.value.shape()));
            }
            Zip::from(&mut p.value)
                .and(&p.grad)
                .and(v)
                .for_each(|w, &g, v| {
                    *v = mu * *v + g + wd * *w;
                    *w -= lr * *v;
                });
        }
        Ok(())
    }
}

/// L2 norm of all gradients taken together
pub fn grad_norm(params: &[ParamViewMut<'_>]) -> f64 {
    params
        .iter()
        .map(|p| p.grad.iter().map(|g| g * g).sum::<f64>())
        .sum::<f64>()
        .sqrt()
}

/// Rescale gradients so their joint norm is at most `max_norm`.
///
/// Returns the norm before clipping.
pub fn clip_grad_norm(params: &mut [ParamViewMut<'_>], max_norm: f64) -> f64 {
    let norm = grad_norm(params);
    if norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for p in params.iter_mut() {
            p.grad.mapv_inplace(|g| g * scale);
        }
    }
    norm
}
