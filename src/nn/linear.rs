//! Classifier head: global average pooling followed by a dense layer

use ndarray::{Array1, Array2, Array4, Axis, Ix1, Ix2};
use rand::Rng;

use super::{Param, ParamView, ParamViewMut, Parameterized, Tensor};
use crate::error::{DartsError, Result};

/// Averages every channel plane down to a single value: [N, C, H, W] -> [N, C]
#[derive(Debug, Clone, Default)]
pub struct GlobalAvgPool {
    input_dim: Option<(usize, usize, usize, usize)>,
}

impl GlobalAvgPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: &Tensor) -> Array2<f64> {
        let (n, c, h, w) = x.dim();
        self.input_dim = Some((n, c, h, w));
        let area = (h * w).max(1) as f64;
        Array2::from_shape_fn((n, c), |(b, ch)| {
            x.index_axis(Axis(0), b).index_axis(Axis(0), ch).sum() / area
        })
    }

    pub fn backward(&self, grad: &Array2<f64>) -> Result<Tensor> {
        let (n, c, h, w) = self
            .input_dim
            .ok_or_else(|| DartsError::no_forward_cache("GlobalAvgPool"))?;
        if grad.dim() != (n, c) {
            return Err(DartsError::shape((n, c), grad.dim()));
        }
        let area = (h * w).max(1) as f64;
        Ok(Array4::from_shape_fn((n, c, h, w), |(b, ch, _, _)| {
            grad[[b, ch]] / area
        }))
    }
}

/// Fully connected layer with bias
#[derive(Debug, Clone)]
pub struct Linear {
    /// Shape: [in_features, out_features]
    weight: Param<Ix2>,
    bias: Param<Ix1>,
    input: Option<Array2<f64>>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, rng: &mut impl Rng) -> Self {
        let bound = 1.0 / (in_features.max(1) as f64).sqrt();
        let weight = Array2::from_shape_fn((in_features, out_features), |_| {
            rng.gen_range(-bound..bound)
        });
        Self {
            weight: Param::new(weight),
            bias: Param::new(Array1::zeros(out_features)),
            input: None,
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.value.nrows()
    }

    pub fn out_features(&self) -> usize {
        self.weight.value.ncols()
    }

    pub fn forward(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.in_features() {
            return Err(DartsError::shape(
                format!("{} features", self.in_features()),
                x.dim(),
            ));
        }
        self.input = Some(x.clone());
        Ok(x.dot(&self.weight.value) + &self.bias.value)
    }

    pub fn backward(&mut self, grad: &Array2<f64>) -> Result<Array2<f64>> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| DartsError::no_forward_cache("Linear"))?;
        if grad.dim() != (input.nrows(), self.out_features()) {
            return Err(DartsError::shape(
                (input.nrows(), self.out_features()),
                grad.dim(),
            ));
        }
        self.weight.grad += &input.t().dot(grad);
        self.bias.grad += &grad.sum_axis(Axis(0));
        Ok(grad.dot(&self.weight.value.t()))
    }
}

impl Parameterized for Linear {
    fn parameters(&self) -> Vec<ParamView<'_>> {
        vec![self.weight.view(), self.bias.view()]
    }

    fn parameters_mut(&mut self) -> Vec<ParamViewMut<'_>> {
        vec![self.weight.view_mut(), self.bias.view_mut()]
    }
}
