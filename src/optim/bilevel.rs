//! One PC-DARTS search step: architecture update, then weight update

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::architect::Architect;
use super::scheduler::CosineAnnealing;
use super::sgd::{clip_grad_norm, Sgd};
use super::forward_backward;
use crate::config::TrainingConfig;
use crate::data::Batch;
use crate::error::Result;
use crate::nn::loss::accuracy;
use crate::search::SearchNetwork;

/// What one search step measured
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub train_loss: f64,
    pub train_acc: f64,
    /// Validation loss seen by the architecture step, if one ran
    pub val_loss: Option<f64>,
    /// Weight gradient norm before clipping
    pub grad_norm: f64,
}

impl StepOutput {
    pub fn arch_updated(&self) -> bool {
        self.val_loss.is_some()
    }
}

/// Alternates architecture and weight updates
#[derive(Debug, Clone)]
pub struct BiLevelOptimizer {
    weights: Sgd,
    architect: Architect,
    schedule: CosineAnnealing,
    grad_clip: f64,
    warmup_epochs: usize,
    unrolled: bool,
}

impl BiLevelOptimizer {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            weights: Sgd::new(config.learning_rate, config.momentum, config.weight_decay),
            architect: Architect::new(config),
            schedule: CosineAnnealing::new(
                config.learning_rate,
                config.learning_rate_min,
                config.max_epochs,
            ),
            grad_clip: config.grad_clip,
            warmup_epochs: config.arch_warmup_epochs,
            unrolled: config.unrolled,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.weights.learning_rate()
    }

    pub fn architect(&self) -> &Architect {
        &self.architect
    }

    /// Whether architecture updates run during `epoch`
    pub fn arch_active(&self, epoch: usize) -> bool {
        epoch >= self.warmup_epochs
    }

    /// Set the weight learning rate for a (zero-based) epoch
    pub fn set_epoch(&mut self, epoch: usize) {
        self.weights.set_learning_rate(self.schedule.lr_at(epoch));
    }

    /// Run one bi-level step.
    ///
    /// The channel subsets are redrawn once and shared by the architecture
    /// and weight updates of this step.
    pub fn step(
        &mut self,
        network: &mut SearchNetwork,
        train: &Batch,
        val: &Batch,
        epoch: usize,
        rng: &mut impl Rng,
    ) -> Result<StepOutput> {
        network.train_mode();
        network.resample_channels(rng);

        let val_loss = if self.arch_active(epoch) {
            let loss = if self.unrolled {
                let eta = self.weights.learning_rate();
                self.architect
                    .step_unrolled(network, train, val, eta, &self.weights)?
            } else {
                self.architect.step_first_order(network, val)?
            };
            Some(loss)
        } else {
            None
        };

        network.zero_weight_grads();
        let (train_loss, logits) = forward_backward(network, train)?;
        // The weight pass also fills the architecture gradients; drop them
        network.zero_arch_grads();

        let mut params = network.weight_parameters_mut();
        let grad_norm = clip_grad_norm(&mut params, self.grad_clip);
        self.weights.step(&mut params)?;

        Ok(StepOutput {
            train_loss,
            train_acc: accuracy(&logits, &train.labels),
            val_loss,
            grad_norm,
        })
    }
}
