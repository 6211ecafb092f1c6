//! Search cell: a DAG of partially-connected mixed edges

use ndarray::Array1;
use rand::Rng;

use super::arch::ArchitectureWeights;
use super::edge::MixedEdge;
use super::ops::OperationKind;
use crate::error::{DartsError, Result};
use crate::nn::{ParamView, ParamViewMut, Parameterized, Tensor};

/// A cell with two input states and `num_nodes` intermediate nodes.
///
/// State 0 is the output of the cell two steps back, state 1 the output of
/// the previous cell. Intermediate node `i` (state `i + 2`) sums every
/// earlier state through its own mixed edge, scaled by the node's edge
/// weights. The last intermediate node is the cell output.
#[derive(Debug, Clone)]
pub struct SearchCell {
    /// `edges[node][input]`
    edges: Vec<Vec<MixedEdge>>,
    /// Edge outputs and edge weights from the last forward pass
    cache: Option<Vec<(Vec<Tensor>, Array1<f64>)>>,
}

impl SearchCell {
    pub fn new(
        num_nodes: usize,
        operations: &[OperationKind],
        channels: usize,
        proportion: usize,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        if num_nodes == 0 {
            return Err(DartsError::invalid_parameter("num_nodes", 0, "must be at least 1"));
        }
        let mut edges = Vec::with_capacity(num_nodes);
        for node in 0..num_nodes {
            let node_edges = (0..ArchitectureWeights::inputs_of(node))
                .map(|_| MixedEdge::new(operations, channels, proportion, rng))
                .collect::<Result<Vec<_>>>()?;
            edges.push(node_edges);
        }
        Ok(Self { edges, cache: None })
    }

    pub fn num_nodes(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> impl Iterator<Item = &MixedEdge> {
        self.edges.iter().flatten()
    }

    /// Redraw the channel subset of every edge
    pub fn resample(&mut self, rng: &mut impl Rng) {
        for edge in self.edges.iter_mut().flatten() {
            edge.resample(rng);
        }
    }

    pub fn forward(&mut self, s0: &Tensor, s1: &Tensor, arch: &ArchitectureWeights) -> Result<Tensor> {
        if s0.dim() != s1.dim() {
            return Err(DartsError::shape(s1.dim(), s0.dim()));
        }
        if arch.num_nodes() != self.num_nodes() {
            return Err(DartsError::shape(
                format!("{} nodes", self.num_nodes()),
                format!("{} nodes in architecture weights", arch.num_nodes()),
            ));
        }

        let mut states = vec![s0.clone(), s1.clone()];
        let mut cache = Vec::with_capacity(self.num_nodes());
        for (node, node_edges) in self.edges.iter_mut().enumerate() {
            let edge_weights = arch.edge_weights(node);
            let mut acc = Tensor::zeros(s1.raw_dim());
            let mut outputs = Vec::with_capacity(node_edges.len());
            for (input, edge) in node_edges.iter_mut().enumerate() {
                let y = edge.forward(&states[input], arch.alpha_logits(node, input))?;
                acc.scaled_add(edge_weights[input], &y);
                outputs.push(y);
            }
            states.push(acc);
            cache.push((outputs, edge_weights));
        }

        self.cache = Some(cache);
        states
            .pop()
            .ok_or_else(|| DartsError::TrainingError("cell has no nodes".into()))
    }

    /// Backpropagate the cell output gradient.
    ///
    /// Architecture gradients accumulate into `arch`; the return value holds
    /// the gradients w.r.t. the two cell inputs.
    pub fn backward(
        &mut self,
        grad: &Tensor,
        arch: &mut ArchitectureWeights,
    ) -> Result<(Tensor, Tensor)> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| DartsError::no_forward_cache("SearchCell"))?;
        let num_nodes = self.edges.len();

        let mut state_grads: Vec<Tensor> = (0..num_nodes + 2)
            .map(|_| Tensor::zeros(grad.raw_dim()))
            .collect();
        state_grads[num_nodes + 1] = grad.clone();

        // Later nodes only feed from earlier states, so reverse order sees
        // each node's gradient complete before it is consumed
        for node in (0..num_nodes).rev() {
            let node_grad = std::mem::replace(
                &mut state_grads[node + 2],
                Tensor::zeros(grad.raw_dim()),
            );
            let (outputs, edge_weights) = &cache[node];

            let mut grad_edge_weights = Array1::zeros(edge_weights.len());
            for (input, edge) in self.edges[node].iter_mut().enumerate() {
                grad_edge_weights[input] = (&node_grad * &outputs[input]).sum();
                let edge_grad = edge.backward(&node_grad.mapv(|g| g * edge_weights[input]))?;
                state_grads[input] += &edge_grad.input;
                arch.accumulate_alpha_grad(node, input, &edge_grad.weights, &edge_grad.grad_weights);
            }
            arch.accumulate_beta_grad(node, edge_weights, &grad_edge_weights);
        }

        let mut inputs = state_grads.into_iter();
        match (inputs.next(), inputs.next()) {
            (Some(ds0), Some(ds1)) => Ok((ds0, ds1)),
            _ => Err(DartsError::TrainingError("missing cell input gradients".into())),
        }
    }

    pub fn set_training(&mut self, training: bool) {
        for edge in self.edges.iter_mut().flatten() {
            edge.set_training(training);
        }
    }
}

impl Parameterized for SearchCell {
    fn parameters(&self) -> Vec<ParamView<'_>> {
        self.edges.iter().flatten().flat_map(|e| e.parameters()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<ParamViewMut<'_>> {
        self.edges
            .iter_mut()
            .flatten()
            .flat_map(|e| e.parameters_mut())
            .collect()
    }
}
