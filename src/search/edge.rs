//! Partially-connected mixed edge

use ndarray::{Array1, ArrayView1};
use rand::Rng;

use super::ops::{CandidateOp, OperationKind};
use super::sampler::ChannelSampler;
use crate::error::{DartsError, Result};
use crate::nn::{softmax, Layer, ParamView, ParamViewMut, Parameterized, Tensor};

/// One DAG edge: a softmax-weighted mixture of every candidate operation,
/// applied to a sampled subset of the input channels.
///
/// Channels outside the subset are copied to the output unchanged.
#[derive(Debug, Clone)]
pub struct MixedEdge {
    ops: Vec<CandidateOp>,
    sampler: ChannelSampler,
    cache: Option<EdgeCache>,
}

#[derive(Debug, Clone)]
struct EdgeCache {
    weights: Array1<f64>,
    op_outputs: Vec<Tensor>,
}

impl MixedEdge {
    pub fn new(
        operations: &[OperationKind],
        channels: usize,
        proportion: usize,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let sampler = ChannelSampler::new(channels, proportion)?;
        let ops = operations
            .iter()
            .map(|kind| kind.build(sampler.sampled_channels(), rng))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            ops,
            sampler,
            cache: None,
        })
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn sampler(&self) -> &ChannelSampler {
        &self.sampler
    }

    pub fn resample(&mut self, rng: &mut impl Rng) {
        self.sampler.sample(rng);
    }

    /// Forward through the mixture given this edge's alpha logits
    pub fn forward(&mut self, x: &Tensor, alpha: ArrayView1<'_, f64>) -> Result<Tensor> {
        if alpha.len() != self.ops.len() {
            return Err(DartsError::shape(self.ops.len(), alpha.len()));
        }
        let weights = softmax(&alpha.to_owned());
        let xs = self.sampler.gather(x)?;

        let mut mixed = Tensor::zeros(xs.raw_dim());
        let mut op_outputs = Vec::with_capacity(self.ops.len());
        for (op, &w) in self.ops.iter_mut().zip(weights.iter()) {
            let y = op.forward(&xs)?;
            mixed.scaled_add(w, &y);
            op_outputs.push(y);
        }

        let mut out = x.clone();
        self.sampler.scatter(&mut out, &mixed)?;
        self.cache = Some(EdgeCache {
            weights,
            op_outputs,
        });
        Ok(out)
    }

    /// Backward through the mixture.
    ///
    /// Returns the input gradient, the softmax weights used in the forward
    /// pass, and the gradient w.r.t. those weights.
    pub fn backward(&mut self, grad: &Tensor) -> Result<EdgeGrad> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| DartsError::no_forward_cache("MixedEdge"))?;
        let gs = self.sampler.gather(grad)?;

        let mut dxs = Tensor::zeros(gs.raw_dim());
        let mut grad_weights = Array1::zeros(self.ops.len());
        for (j, op) in self.ops.iter_mut().enumerate() {
            grad_weights[j] = (&gs * &cache.op_outputs[j]).sum();
            let w = cache.weights[j];
            if w != 0.0 {
                dxs.scaled_add(1.0, &op.backward(&gs.mapv(|g| g * w))?);
            }
        }

        // Unselected channels pass their gradient straight through
        let mut input = grad.clone();
        self.sampler.scatter(&mut input, &dxs)?;
        Ok(EdgeGrad {
            input,
            weights: cache.weights.clone(),
            grad_weights,
        })
    }

    pub fn set_training(&mut self, training: bool) {
        for op in &mut self.ops {
            op.set_training(training);
        }
    }
}

/// Gradients produced by [`MixedEdge::backward`]
#[derive(Debug, Clone)]
pub struct EdgeGrad {
    pub input: Tensor,
    pub weights: Array1<f64>,
    pub grad_weights: Array1<f64>,
}

impl Parameterized for MixedEdge {
    fn parameters(&self) -> Vec<ParamView<'_>> {
        self.ops.iter().flat_map(|op| op.parameters()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<ParamViewMut<'_>> {
        self.ops.iter_mut().flat_map(|op| op.parameters_mut()).collect()
    }
}
