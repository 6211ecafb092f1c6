//! Learnable parameters and their serialized form

use ndarray::{Array, ArrayD, ArrayViewD, ArrayViewMutD, Dimension, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{DartsError, Result};

/// A learnable tensor with its accumulated gradient
#[derive(Debug, Clone)]
pub struct Param<D: Dimension> {
    pub value: Array<f64, D>,
    pub grad: Array<f64, D>,
}

impl<D: Dimension> Param<D> {
    pub fn new(value: Array<f64, D>) -> Self {
        let grad = Array::zeros(value.raw_dim());
        Self { value, grad }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn view(&self) -> ParamView<'_> {
        ParamView {
            value: self.value.view().into_dyn(),
            grad: self.grad.view().into_dyn(),
        }
    }

    pub fn view_mut(&mut self) -> ParamViewMut<'_> {
        ParamViewMut {
            value: self.value.view_mut().into_dyn(),
            grad: self.grad.view_mut().into_dyn(),
        }
    }
}

/// Read-only, dimension-erased view of a parameter
#[derive(Debug)]
pub struct ParamView<'a> {
    pub value: ArrayViewD<'a, f64>,
    pub grad: ArrayViewD<'a, f64>,
}

/// Mutable, dimension-erased view of a parameter.
///
/// Optimizers and checkpoints work on these so that every layer can keep
/// its own statically-shaped storage.
#[derive(Debug)]
pub struct ParamViewMut<'a> {
    pub value: ArrayViewMutD<'a, f64>,
    pub grad: ArrayViewMutD<'a, f64>,
}

impl ParamViewMut<'_> {
    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }
}

/// Serialized tensor: shape plus row-major values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorState {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

impl TensorState {
    pub fn from_view(view: &ArrayViewD<'_, f64>) -> Self {
        Self {
            shape: view.shape().to_vec(),
            values: view.iter().copied().collect(),
        }
    }

    pub fn to_array(&self) -> Result<ArrayD<f64>> {
        Ok(ArrayD::from_shape_vec(IxDyn(&self.shape), self.values.clone())?)
    }

    /// Copy into an existing tensor, rejecting shape mismatches
    pub fn load_into(&self, target: &mut ArrayViewMutD<'_, f64>) -> Result<()> {
        if target.shape() != self.shape.as_slice() {
            return Err(DartsError::shape(target.shape(), &self.shape));
        }
        target.assign(&self.to_array()?);
        Ok(())
    }
}
