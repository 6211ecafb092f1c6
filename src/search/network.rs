//! Search network: stem, stacked search cells and classifier head

use ndarray::{Array2, ArrayD, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::arch::{ArchitectureState, ArchitectureWeights};
use super::cell::SearchCell;
use super::ops::OperationKind;
use crate::config::ModelConfig;
use crate::error::{DartsError, Result};
use crate::nn::{
    BatchNorm2d, Conv2d, GlobalAvgPool, Layer, Linear, ParamView, ParamViewMut, Parameterized,
    Relu, Tensor, TensorState,
};

/// conv 3x3 -> batch norm -> ReLU
#[derive(Debug, Clone)]
struct StemBlock {
    conv: Conv2d,
    bn: BatchNorm2d,
    relu: Relu,
}

impl StemBlock {
    fn new(in_channels: usize, out_channels: usize, rng: &mut impl Rng) -> Result<Self> {
        Ok(Self {
            conv: Conv2d::new(in_channels, out_channels, 3, rng)?,
            bn: BatchNorm2d::new(out_channels),
            relu: Relu::new(),
        })
    }
}

impl Parameterized for StemBlock {
    fn parameters(&self) -> Vec<ParamView<'_>> {
        let mut params = self.conv.parameters();
        params.extend(self.bn.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<ParamViewMut<'_>> {
        let mut params = self.conv.parameters_mut();
        params.extend(self.bn.parameters_mut());
        params
    }

    fn buffers(&self) -> Vec<ndarray::ArrayViewD<'_, f64>> {
        self.bn.buffers()
    }

    fn buffers_mut(&mut self) -> Vec<ndarray::ArrayViewMutD<'_, f64>> {
        self.bn.buffers_mut()
    }
}

impl Layer for StemBlock {
    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        let h = self.conv.forward(x)?;
        let h = self.bn.forward(&h)?;
        self.relu.forward(&h)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        let g = self.relu.backward(grad)?;
        let g = self.bn.backward(&g)?;
        self.conv.backward(&g)
    }

    fn set_training(&mut self, training: bool) {
        self.bn.set_training(training);
    }
}

/// Serializable snapshot of every network tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    pub weights: Vec<TensorState>,
    pub buffers: Vec<TensorState>,
    pub architecture: ArchitectureState,
}

/// Over-parameterized network searched by PC-DARTS
#[derive(Debug, Clone)]
pub struct SearchNetwork {
    operations: Vec<OperationKind>,
    stem: Vec<StemBlock>,
    cells: Vec<SearchCell>,
    pool: GlobalAvgPool,
    classifier: Linear,
    arch: ArchitectureWeights,
    training: bool,
}

impl SearchNetwork {
    /// Build the network for images with `in_channels` channels
    pub fn new(config: &ModelConfig, in_channels: usize, rng: &mut impl Rng) -> Result<Self> {
        if config.stem_channels.is_empty() {
            return Err(DartsError::ConfigError("stem_channels must not be empty".into()));
        }
        if config.num_cells == 0 {
            return Err(DartsError::invalid_parameter("num_cells", 0, "must be at least 1"));
        }

        let mut stem = Vec::with_capacity(config.stem_channels.len());
        let mut channels = in_channels;
        for &out in &config.stem_channels {
            stem.push(StemBlock::new(channels, out, rng)?);
            channels = out;
        }

        let cells = (0..config.num_cells)
            .map(|_| {
                SearchCell::new(
                    config.num_nodes,
                    &config.operations,
                    channels,
                    config.partial_channels,
                    rng,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let classifier = Linear::new(channels, config.num_classes, rng);
        let arch = ArchitectureWeights::new(
            config.num_nodes,
            config.operations.len(),
            config.edge_normalization,
            rng,
        );

        tracing::debug!(
            stem_blocks = stem.len(),
            cells = cells.len(),
            channels,
            edges = arch.num_edges(),
            "Built search network"
        );

        Ok(Self {
            operations: config.operations.clone(),
            stem,
            cells,
            pool: GlobalAvgPool::new(),
            classifier,
            arch,
            training: true,
        })
    }

    pub fn operations(&self) -> &[OperationKind] {
        &self.operations
    }

    pub fn arch(&self) -> &ArchitectureWeights {
        &self.arch
    }

    pub fn arch_mut(&mut self) -> &mut ArchitectureWeights {
        &mut self.arch
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn train_mode(&mut self) {
        self.set_training(true);
    }

    pub fn eval_mode(&mut self) {
        self.set_training(false);
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        for block in &mut self.stem {
            block.set_training(training);
        }
        for cell in &mut self.cells {
            cell.set_training(training);
        }
    }

    /// Redraw the partial-channel subsets of every edge
    pub fn resample_channels(&mut self, rng: &mut impl Rng) {
        for cell in &mut self.cells {
            cell.resample(rng);
        }
    }

    /// Images [N, C, H, W] -> logits [N, classes]
    pub fn forward(&mut self, x: &Tensor) -> Result<Array2<f64>> {
        let mut h = x.clone();
        for block in &mut self.stem {
            h = block.forward(&h)?;
        }

        let mut s0 = h.clone();
        let mut s1 = h;
        for cell in &mut self.cells {
            let out = cell.forward(&s0, &s1, &self.arch)?;
            s0 = std::mem::replace(&mut s1, out);
        }

        let pooled = self.pool.forward(&s1);
        self.classifier.forward(&pooled)
    }

    /// Backpropagate a logit gradient into network and architecture gradients
    pub fn backward(&mut self, grad_logits: &Array2<f64>) -> Result<()> {
        let grad_pooled = self.classifier.backward(grad_logits)?;
        let top = self.pool.backward(&grad_pooled)?;

        // states[0] = states[1] = stem output, states[k + 2] = output of cell k
        let num_cells = self.cells.len();
        let mut state_grads: Vec<Tensor> = (0..num_cells + 2)
            .map(|_| Tensor::zeros(top.raw_dim()))
            .collect();
        state_grads[num_cells + 1] = top;

        for k in (0..num_cells).rev() {
            let grad = std::mem::replace(&mut state_grads[k + 2], Tensor::zeros((0, 0, 0, 0)));
            let (ds0, ds1) = self.cells[k].backward(&grad, &mut self.arch)?;
            state_grads[k] += &ds0;
            state_grads[k + 1] += &ds1;
        }

        let mut g = &state_grads[0] + &state_grads[1];
        for block in self.stem.iter_mut().rev() {
            g = block.backward(&g)?;
        }
        Ok(())
    }

    pub fn zero_weight_grads(&mut self) {
        for mut p in self.weight_parameters_mut() {
            p.zero_grad();
        }
    }

    pub fn zero_arch_grads(&mut self) {
        self.arch.zero_grad();
    }

    /// Network weights (everything except alpha and beta)
    pub fn weight_parameters(&self) -> Vec<ParamView<'_>> {
        let mut params: Vec<ParamView<'_>> =
            self.stem.iter().flat_map(|b| b.parameters()).collect();
        params.extend(self.cells.iter().flat_map(|c| c.parameters()));
        params.extend(self.classifier.parameters());
        params
    }

    pub fn weight_parameters_mut(&mut self) -> Vec<ParamViewMut<'_>> {
        let mut params: Vec<ParamViewMut<'_>> = self
            .stem
            .iter_mut()
            .flat_map(|b| b.parameters_mut())
            .collect();
        params.extend(self.cells.iter_mut().flat_map(|c| c.parameters_mut()));
        params.extend(self.classifier.parameters_mut());
        params
    }

    pub fn arch_parameters_mut(&mut self) -> Vec<ParamViewMut<'_>> {
        self.arch.parameters_mut()
    }

    pub fn num_weight_params(&self) -> usize {
        self.weight_parameters().iter().map(|p| p.value.len()).sum()
    }

    pub fn num_arch_params(&self) -> usize {
        self.arch.num_params()
    }

    /// Copy of every weight tensor
    pub fn weight_values(&self) -> Vec<ArrayD<f64>> {
        self.weight_parameters()
            .iter()
            .map(|p| p.value.to_owned())
            .collect()
    }

    /// Copy of every weight gradient
    pub fn weight_grads(&self) -> Vec<ArrayD<f64>> {
        self.weight_parameters()
            .iter()
            .map(|p| p.grad.to_owned())
            .collect()
    }

    /// Copy of the architecture gradients, in `arch_parameters_mut` order
    pub fn arch_grads(&self) -> Vec<ArrayD<f64>> {
        self.arch
            .parameters()
            .iter()
            .map(|p| p.grad.to_owned())
            .collect()
    }

    /// Overwrite the weights with `base + scale * direction`.
    ///
    /// Every tensor is checked before any weight is written.
    pub fn set_weights_offset(
        &mut self,
        base: &[ArrayD<f64>],
        direction: Option<(&[ArrayD<f64>], f64)>,
    ) -> Result<()> {
        let mut params = self.weight_parameters_mut();
        if params.len() != base.len() {
            return Err(DartsError::shape(params.len(), base.len()));
        }
        if let Some((dirs, _)) = direction {
            if dirs.len() != params.len() {
                return Err(DartsError::shape(params.len(), dirs.len()));
            }
        }
        for (i, p) in params.iter().enumerate() {
            if p.value.shape() != base[i].shape() {
                return Err(DartsError::shape(p.value.shape(), base[i].shape()));
            }
            if let Some((dirs, _)) = direction {
                if p.value.shape() != dirs[i].shape() {
                    return Err(DartsError::shape(p.value.shape(), dirs[i].shape()));
                }
            }
        }

        for (i, p) in params.iter_mut().enumerate() {
            match direction {
                Some((dirs, scale)) => {
                    Zip::from(&mut p.value)
                        .and(&base[i])
                        .and(&dirs[i])
                        .for_each(|w, &b, &d| *w = b + scale * d);
                }
                None => p.value.assign(&base[i]),
            }
        }
        Ok(())
    }

    /// Overwrite the architecture gradients
    pub fn set_arch_grads(&mut self, grads: &[ArrayD<f64>]) -> Result<()> {
        let mut params = self.arch.parameters_mut();
        if params.len() != grads.len() {
            return Err(DartsError::shape(params.len(), grads.len()));
        }
        for (p, g) in params.iter_mut().zip(grads) {
            if p.grad.shape() != g.shape() {
                return Err(DartsError::shape(p.grad.shape(), g.shape()));
            }
            p.grad.assign(g);
        }
        Ok(())
    }

    pub fn state(&self) -> NetworkState {
        let weights = self
            .weight_parameters()
            .iter()
            .map(|p| TensorState::from_view(&p.value))
            .collect();
        let buffers = self
            .stem
            .iter()
            .flat_map(|b| b.buffers())
            .map(|buf| TensorState::from_view(&buf))
            .collect();
        NetworkState {
            weights,
            buffers,
            architecture: self.arch.state(),
        }
    }

    pub fn load_state(&mut self, state: &NetworkState) -> Result<()> {
        let mut params = self.weight_parameters_mut();
        if params.len() != state.weights.len() {
            return Err(DartsError::shape(
                format!("{} weight tensors", params.len()),
                format!("{} weight tensors", state.weights.len()),
            ));
        }
        for (p, saved) in params.iter_mut().zip(&state.weights) {
            saved.load_into(&mut p.value)?;
        }

        let mut buffers: Vec<_> = self.stem.iter_mut().flat_map(|b| b.buffers_mut()).collect();
        if buffers.len() != state.buffers.len() {
            return Err(DartsError::shape(
                format!("{} buffers", buffers.len()),
                format!("{} buffers", state.buffers.len()),
            ));
        }
        for (buf, saved) in buffers.iter_mut().zip(&state.buffers) {
            saved.load_into(buf)?;
        }

        self.arch.load_state(&state.architecture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::gradcheck::{assert_close, random_tensor};
    use crate::nn::loss::cross_entropy;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            num_nodes: 2,
            num_cells: 2,
            num_classes: 3,
            stem_channels: vec![4],
            operations: vec![
                OperationKind::Identity,
                OperationKind::Conv3x3,
                OperationKind::AvgPool3x3,
            ],
            partial_channels: 2,
            edge_normalization: true,
            edges_per_node: 2,
        }
    }

    fn tiny_network(seed: u64) -> SearchNetwork {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut net = SearchNetwork::new(&tiny_config(), 3, &mut rng).unwrap();
        net.resample_channels(&mut rng);
        net.arch_mut().alphas_mut().mapv_inplace(|v| v * 500.0);
        net.arch_mut().betas_mut().mapv_inplace(|v| v * 500.0);
        net
    }

    fn loss_of(net: &mut SearchNetwork, x: &Tensor, labels: &[usize]) -> f64 {
        let logits = net.forward(x).unwrap();
        cross_entropy(&logits, labels).unwrap().0
    }

    #[test]
    fn test_forward_shape() {
        let mut net = tiny_network(1);
        let logits = net.forward(&random_tensor((2, 3, 5, 5), 2)).unwrap();
        assert_eq!(logits.dim(), (2, 3));
    }

    #[test]
    fn test_parameter_counts() {
        let net = tiny_network(1);
        // stem conv 3->4 (3x3) + bn, two cells of 5 edges with one 2->2 conv each, classifier
        let stem = 4 * 3 * 9 + 4 + 4;
        let cells = 2 * 5 * (2 * 2 * 9);
        let head = 4 * 3 + 3;
        assert_eq!(net.num_weight_params(), stem + cells + head);
        assert_eq!(net.num_arch_params(), 5 * (3 + 1));
        assert_eq!(net.num_cells(), 2);
    }

    #[test]
    fn test_arch_gradient_matches_finite_difference() {
        let mut net = tiny_network(3);
        net.eval_mode();
        let x = random_tensor((2, 3, 4, 4), 4);
        let labels = [0, 2];

        let logits = net.forward(&x).unwrap();
        let (_, grad) = cross_entropy(&logits, &labels).unwrap();
        net.zero_arch_grads();
        net.backward(&grad).unwrap();
        let alpha_grad = net.arch().alpha_grad().clone();
        let beta_grad = net.arch().beta_grad().clone();

        let eps = 1e-5;
        for &(node, input, op) in &[(0, 0, 0), (0, 1, 1), (1, 2, 2), (1, 0, 1)] {
            net.arch_mut().alphas_mut()[[node, input, op]] += eps;
            let fp = loss_of(&mut net, &x, &labels);
            net.arch_mut().alphas_mut()[[node, input, op]] -= 2.0 * eps;
            let fm = loss_of(&mut net, &x, &labels);
            net.arch_mut().alphas_mut()[[node, input, op]] += eps;
            assert_close(alpha_grad[[node, input, op]], (fp - fm) / (2.0 * eps), "network alpha");
        }
        for &(node, input) in &[(0, 0), (1, 2)] {
            net.arch_mut().betas_mut()[[node, input]] += eps;
            let fp = loss_of(&mut net, &x, &labels);
            net.arch_mut().betas_mut()[[node, input]] -= 2.0 * eps;
            let fm = loss_of(&mut net, &x, &labels);
            net.arch_mut().betas_mut()[[node, input]] += eps;
            assert_close(beta_grad[[node, input]], (fp - fm) / (2.0 * eps), "network beta");
        }
    }

    #[test]
    fn test_weight_gradient_matches_finite_difference() {
        let mut net = tiny_network(5);
        let x = random_tensor((3, 3, 4, 4), 6);
        let labels = [1, 0, 2];

        let logits = net.forward(&x).unwrap();
        let (_, grad) = cross_entropy(&logits, &labels).unwrap();
        net.zero_weight_grads();
        net.backward(&grad).unwrap();
        let grads = net.weight_grads();
        let base = net.weight_values();

        let eps = 1e-5;
        // First stem conv, a cell conv, and the classifier weight
        let targets = [0usize, 3, grads.len() - 2];
        for &t in &targets {
            let mut direction: Vec<ArrayD<f64>> =
                base.iter().map(|b| ArrayD::zeros(b.raw_dim())).collect();
            let flat = direction[t].len() / 2;
            if let Some(v) = direction[t].iter_mut().nth(flat) {
                *v = 1.0;
            }
            let analytic = grads[t].iter().nth(flat).copied().unwrap_or(0.0);

            net.set_weights_offset(&base, Some((&direction, eps))).unwrap();
            let fp = loss_of(&mut net, &x, &labels);
            net.set_weights_offset(&base, Some((&direction, -eps))).unwrap();
            let fm = loss_of(&mut net, &x, &labels);
            net.set_weights_offset(&base, None).unwrap();
            assert_close(analytic, (fp - fm) / (2.0 * eps), "network weight");
        }
    }

    #[test]
    fn test_state_roundtrip() {
        let mut a = tiny_network(7);
        let x = random_tensor((2, 3, 4, 4), 8);
        // One training pass moves the running statistics off their defaults
        a.forward(&x).unwrap();

        let mut b = tiny_network(9);
        b.load_state(&a.state()).unwrap();
        assert_eq!(b.state(), a.state());

        // Identical channel subsets are needed for identical outputs
        a.resample_channels(&mut Xoshiro256PlusPlus::seed_from_u64(100));
        b.resample_channels(&mut Xoshiro256PlusPlus::seed_from_u64(100));
        a.eval_mode();
        b.eval_mode();
        let expected = a.forward(&x).unwrap();
        let actual = b.forward(&x).unwrap();
        assert!((&actual - &expected).iter().all(|d| d.abs() < 1e-10));
    }

    #[test]
    fn test_load_state_rejects_other_shape() {
        let a = tiny_network(1);
        let mut config = tiny_config();
        config.stem_channels = vec![8];
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let mut b = SearchNetwork::new(&config, 3, &mut rng).unwrap();
        assert!(matches!(
            b.load_state(&a.state()),
            Err(DartsError::ShapeError { .. })
        ));
    }

    #[test]
    fn test_set_weights_offset_rejects_bad_direction() {
        let mut net = tiny_network(9);
        let base = net.weight_values();

        let short = base[..1].to_vec();
        assert!(matches!(
            net.set_weights_offset(&base, Some((&short, 0.1))),
            Err(DartsError::ShapeError { .. })
        ));

        let mut reshaped = base.clone();
        reshaped[0] = ArrayD::zeros(vec![1, 2, 3]);
        assert!(matches!(
            net.set_weights_offset(&base, Some((&reshaped, 0.1))),
            Err(DartsError::ShapeError { .. })
        ));
        // Nothing was written
        assert_eq!(net.weight_values(), base);

        let ones: Vec<ArrayD<f64>> = base.iter().map(|w| ArrayD::ones(w.raw_dim())).collect();
        net.set_weights_offset(&base, Some((&ones, 0.5))).unwrap();
        assert_eq!(net.weight_values()[0], &base[0] + 0.5);
    }
}
