//! Architecture parameters: operation mixing (alpha) and edge normalization (beta)

use ndarray::{s, Array1, Array2, Array3, ArrayView1, Ix2, Ix3};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::nn::{softmax, softmax_backward, Param, ParamView, ParamViewMut, TensorState};

/// Scale of the Gaussian used to initialize alpha and beta
const INIT_SCALE: f64 = 1e-3;

/// Continuous relaxation weights shared by every search cell.
///
/// Node `i` has `i + 2` input edges: the two cell inputs and every earlier
/// intermediate node. Slots beyond a node's inputs stay zero and never
/// receive gradient.
#[derive(Debug, Clone)]
pub struct ArchitectureWeights {
    num_nodes: usize,
    num_ops: usize,
    edge_normalization: bool,
    /// Shape: [num_nodes, num_nodes + 1, num_ops]
    alphas: Param<Ix3>,
    /// Shape: [num_nodes, num_nodes + 1]
    betas: Param<Ix2>,
}

/// Serializable snapshot of the architecture parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureState {
    pub alphas: TensorState,
    pub betas: TensorState,
}

impl ArchitectureWeights {
    /// Create new architecture weights
    pub fn new(
        num_nodes: usize,
        num_ops: usize,
        edge_normalization: bool,
        rng: &mut impl Rng,
    ) -> Self {
        let max_inputs = num_nodes + 1;
        let mut alphas = Array3::zeros((num_nodes, max_inputs, num_ops));
        let mut betas = Array2::zeros((num_nodes, max_inputs));

        for node in 0..num_nodes {
            for input in 0..Self::inputs_of(node) {
                for op in 0..num_ops {
                    alphas[[node, input, op]] = INIT_SCALE * rng.sample::<f64, _>(StandardNormal);
                }
                betas[[node, input]] = INIT_SCALE * rng.sample::<f64, _>(StandardNormal);
            }
        }

        Self {
            num_nodes,
            num_ops,
            edge_normalization,
            alphas: Param::new(alphas),
            betas: Param::new(betas),
        }
    }

    /// Rebuild architecture weights from a saved snapshot
    pub fn from_state(
        num_nodes: usize,
        num_ops: usize,
        edge_normalization: bool,
        state: &ArchitectureState,
    ) -> Result<Self> {
        let max_inputs = num_nodes + 1;
        let mut weights = Self {
            num_nodes,
            num_ops,
            edge_normalization,
            alphas: Param::new(Array3::zeros((num_nodes, max_inputs, num_ops))),
            betas: Param::new(Array2::zeros((num_nodes, max_inputs))),
        };
        weights.load_state(state)?;
        Ok(weights)
    }

    /// Number of input edges of an intermediate node
    pub fn inputs_of(node: usize) -> usize {
        node + 2
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_ops(&self) -> usize {
        self.num_ops
    }

    pub fn edge_normalization(&self) -> bool {
        self.edge_normalization
    }

    /// Total edges per cell
    pub fn num_edges(&self) -> usize {
        (0..self.num_nodes).map(Self::inputs_of).sum()
    }

    /// Learnable scalars actually in use
    pub fn num_params(&self) -> usize {
        let per_edge = self.num_ops + usize::from(self.edge_normalization);
        self.num_edges() * per_edge
    }

    pub fn alphas(&self) -> &Array3<f64> {
        &self.alphas.value
    }

    pub fn betas(&self) -> &Array2<f64> {
        &self.betas.value
    }

    pub fn alphas_mut(&mut self) -> &mut Array3<f64> {
        &mut self.alphas.value
    }

    pub fn betas_mut(&mut self) -> &mut Array2<f64> {
        &mut self.betas.value
    }

    pub fn alpha_grad(&self) -> &Array3<f64> {
        &self.alphas.grad
    }

    pub fn beta_grad(&self) -> &Array2<f64> {
        &self.betas.grad
    }

    /// Raw alpha logits of one edge
    pub fn alpha_logits(&self, node: usize, input: usize) -> ArrayView1<'_, f64> {
        self.alphas.value.slice(s![node, input, ..])
    }

    /// Softmax probabilities for operations on an edge
    pub fn op_weights(&self, node: usize, input: usize) -> Array1<f64> {
        softmax(&self.alpha_logits(node, input).to_owned())
    }

    /// Weights of a node's input edges: softmax over beta, or all ones
    /// when edge normalization is off
    pub fn edge_weights(&self, node: usize) -> Array1<f64> {
        let inputs = Self::inputs_of(node);
        if self.edge_normalization {
            softmax(&self.betas.value.slice(s![node, ..inputs]).to_owned())
        } else {
            Array1::ones(inputs)
        }
    }

    /// Accumulate a gradient w.r.t. the mixing weights of one edge.
    ///
    /// `weights` are the softmax probabilities used in the forward pass.
    pub fn accumulate_alpha_grad(
        &mut self,
        node: usize,
        input: usize,
        weights: &Array1<f64>,
        grad_weights: &Array1<f64>,
    ) {
        let dlogits = softmax_backward(weights, grad_weights);
        let mut slot = self.alphas.grad.slice_mut(s![node, input, ..]);
        slot += &dlogits;
    }

    /// Accumulate a gradient w.r.t. a node's edge weights
    pub fn accumulate_beta_grad(
        &mut self,
        node: usize,
        weights: &Array1<f64>,
        grad_weights: &Array1<f64>,
    ) {
        if !self.edge_normalization {
            return;
        }
        let inputs = Self::inputs_of(node);
        let dlogits = softmax_backward(weights, grad_weights);
        let mut slot = self.betas.grad.slice_mut(s![node, ..inputs]);
        slot += &dlogits;
    }

    pub fn zero_grad(&mut self) {
        self.alphas.zero_grad();
        self.betas.zero_grad();
    }

    pub fn parameters(&self) -> Vec<ParamView<'_>> {
        if self.edge_normalization {
            vec![self.alphas.view(), self.betas.view()]
        } else {
            vec![self.alphas.view()]
        }
    }

    /// Parameters the architecture optimizer updates
    pub fn parameters_mut(&mut self) -> Vec<ParamViewMut<'_>> {
        if self.edge_normalization {
            vec![self.alphas.view_mut(), self.betas.view_mut()]
        } else {
            vec![self.alphas.view_mut()]
        }
    }

    pub fn state(&self) -> ArchitectureState {
        ArchitectureState {
            alphas: TensorState::from_view(&self.alphas.view().value),
            betas: TensorState::from_view(&self.betas.view().value),
        }
    }

    /// Restore saved alphas and betas; a different search space is a shape error
    pub fn load_state(&mut self, state: &ArchitectureState) -> Result<()> {
        state.alphas.load_into(&mut self.alphas.view_mut().value)?;
        state.betas.load_into(&mut self.betas.view_mut().value)
    }
}
