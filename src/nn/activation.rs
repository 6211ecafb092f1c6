//! Parameter-free element-wise layers

use ndarray::Zip;

use super::{Layer, Parameterized, Tensor};
use crate::error::{DartsError, Result};

/// Rectified Linear Unit
#[derive(Debug, Clone, Default)]
pub struct Relu {
    input: Option<Tensor>,
}

impl Relu {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Parameterized for Relu {}

impl Layer for Relu {
    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.input = Some(x.clone());
        Ok(x.mapv(|v| v.max(0.0)))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| DartsError::no_forward_cache("Relu"))?;
        if input.dim() != grad.dim() {
            return Err(DartsError::shape(input.dim(), grad.dim()));
        }
        Ok(Zip::from(grad)
            .and(input)
            .map_collect(|&g, &x| if x > 0.0 { g } else { 0.0 }))
    }
}

/// Skip connection
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Parameterized for Identity {}

impl Layer for Identity {
    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        Ok(x.clone())
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        Ok(grad.clone())
    }
}

/// The "no connection" candidate: outputs zeros, passes no gradient
#[derive(Debug, Clone, Copy, Default)]
pub struct Zero;

impl Parameterized for Zero {}

impl Layer for Zero {
    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        Ok(Tensor::zeros(x.raw_dim()))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        Ok(Tensor::zeros(grad.raw_dim()))
    }
}
