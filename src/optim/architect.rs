//! Architecture-parameter updates on validation data

use ndarray::{ArrayD, Zip};

use super::adam::Adam;
use super::sgd::Sgd;
use super::forward_backward;
use crate::config::TrainingConfig;
use crate::data::Batch;
use crate::error::Result;
use crate::search::SearchNetwork;

/// Numerator of the finite-difference step: epsilon = R / ||dw'||
const FINITE_DIFFERENCE_R: f64 = 0.01;

/// Updates alpha and beta against the validation loss
#[derive(Debug, Clone)]
pub struct Architect {
    optimizer: Adam,
}

impl Architect {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            optimizer: Adam::new(
                config.arch_learning_rate,
                config.arch_betas,
                config.arch_weight_decay,
            ),
        }
    }

    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    /// First-order step: gradient of the validation loss at the current weights.
    ///
    /// Returns the validation loss.
    pub fn step_first_order(&mut self, network: &mut SearchNetwork, val: &Batch) -> Result<f64> {
        network.zero_arch_grads();
        let (loss, _) = forward_backward(network, val)?;
        self.apply(network)?;
        Ok(loss)
    }

    /// Second-order step through one virtual SGD update of the weights.
    ///
    /// `eta` is the current weight learning rate. The network's weights,
    /// running statistics and weight gradients are left as they were; only
    /// alpha and beta move. Returns the validation loss at the virtual weights.
    pub fn step_unrolled(
        &mut self,
        network: &mut SearchNetwork,
        train: &Batch,
        val: &Batch,
        eta: f64,
        weight_optimizer: &Sgd,
    ) -> Result<f64> {
        let mut virtual_net = network.clone();
        let base = virtual_net.weight_values();

        // w' = w - eta * (dL_train/dw + wd * w)
        virtual_net.zero_weight_grads();
        forward_backward(&mut virtual_net, train)?;
        let wd = weight_optimizer.weight_decay();
        let descent: Vec<ArrayD<f64>> = virtual_net
            .weight_grads()
            .into_iter()
            .zip(&base)
            .map(|(mut g, w)| {
                Zip::from(&mut g).and(w).for_each(|g, &w| *g += wd * w);
                g
            })
            .collect();
        virtual_net.set_weights_offset(&base, Some((&descent, -eta)))?;

        // Gradients of the validation loss at w'
        virtual_net.zero_weight_grads();
        virtual_net.zero_arch_grads();
        let (val_loss, _) = forward_backward(&mut virtual_net, val)?;
        let mut arch_grads = virtual_net.arch_grads();
        let dw = virtual_net.weight_grads();

        let norm = dw
            .iter()
            .map(|g| g.iter().map(|v| v * v).sum::<f64>())
            .sum::<f64>()
            .sqrt();
        if norm > 0.0 {
            let eps = FINITE_DIFFERENCE_R / norm;
            let g_plus = train_arch_grads(&mut virtual_net, &base, &dw, eps, train)?;
            let g_minus = train_arch_grads(&mut virtual_net, &base, &dw, -eps, train)?;
            let scale = eta / (2.0 * eps);
            for ((a, gp), gm) in arch_grads.iter_mut().zip(&g_plus).zip(&g_minus) {
                Zip::from(a)
                    .and(gp)
                    .and(gm)
                    .for_each(|a, &gp, &gm| *a -= scale * (gp - gm));
            }
        } else {
            tracing::debug!("Validation weight gradient vanished, skipping Hessian term");
        }
        tracing::trace!(val_loss, weight_grad_norm = norm, "Computed unrolled architecture gradient");

        network.set_arch_grads(&arch_grads)?;
        self.apply(network)?;
        Ok(val_loss)
    }

    fn apply(&mut self, network: &mut SearchNetwork) -> Result<()> {
        let mut params = network.arch_parameters_mut();
        self.optimizer.step(&mut params)
    }
}

/// dL_train/d(alpha, beta) at weights `base + eps * direction`
fn train_arch_grads(
    network: &mut SearchNetwork,
    base: &[ArrayD<f64>],
    direction: &[ArrayD<f64>],
    eps: f64,
    train: &Batch,
) -> Result<Vec<ArrayD<f64>>> {
    network.set_weights_offset(base, Some((direction, eps)))?;
    network.zero_arch_grads();
    forward_backward(network, train)?;
    Ok(network.arch_grads())
}
