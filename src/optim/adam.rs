//! Adam optimizer for the architecture parameters

use ndarray::{ArrayD, Zip};

use crate::error::{DartsError, Result};
use crate::nn::ParamViewMut;

const EPSILON: f64 = 1e-8;

/// Adam with bias correction and L2 weight decay folded into the gradient
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    weight_decay: f64,
    /// First moment estimates
    m: Vec<ArrayD<f64>>,
    /// Second moment estimates
    v: Vec<ArrayD<f64>>,
    step: u64,
}

impl Adam {
    pub fn new(learning_rate: f64, betas: [f64; 2], weight_decay: f64) -> Self {
        Self {
            learning_rate,
            beta1: betas[0],
            beta2: betas[1],
            weight_decay,
            m: Vec::new(),
            v: Vec::new(),
            step: 0,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Number of updates applied so far
    pub fn steps(&self) -> u64 {
        self.step
    }

    pub fn step(&mut self, params: &mut [ParamViewMut<'_>]) -> Result<()> {
        if self.m.is_empty() {
            self.m = params
                .iter()
                .map(|p| ArrayD::zeros(p.value.raw_dim()))
                .collect();
            self.v = self.m.clone();
        }
        if self.m.len() != params.len() {
            return Err(DartsError::shape(
                format!("{} parameters", self.m.len()),
                format!("{} parameters", params.len()),
            ));
        }

        self.step += 1;
        let t = self.step as i32;
        let (b1, b2, wd) = (self.beta1, self.beta2, self.weight_decay);
        let bc1 = 1.0 - b1.powi(t);
        let bc2 = 1.0 - b2.powi(t);
        let step_size = self.learning_rate / bc1;

        for ((p, m), v) in params.iter_mut().zip(&mut self.m).zip(&mut self.v) {
            if p.value.shape() != m.shape() {
                return Err(DartsError::shape(m.shape(), p.value.shape()));
            }
            Zip::from(&mut p.value)
                .and(&p.grad)
                .and(m)
                .and(v)
                .for_each(|w, &g, m, v| {
                    let g = g + wd * *w;
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    *w -= step_size * *m / ((*v / bc2).sqrt() + EPSILON);
                });
        }
        Ok(())
    }
}
