//! Batch normalization over NCHW tensors

use ndarray::{Array1, Array4, ArrayViewD, ArrayViewMutD, Axis, Ix1};

use super::{Layer, Param, ParamView, ParamViewMut, Parameterized, Tensor};
use crate::error::{DartsError, Result};

/// Per-channel batch normalization with learnable scale and shift
#[derive(Debug, Clone)]
pub struct BatchNorm2d {
    num_features: usize,
    /// Momentum for running stats
    momentum: f64,
    eps: f64,
    running_mean: Array1<f64>,
    running_var: Array1<f64>,
    gamma: Param<Ix1>,
    beta: Param<Ix1>,
    training: bool,
    cache: Option<NormCache>,
}

#[derive(Debug, Clone)]
struct NormCache {
    x_hat: Tensor,
    inv_std: Array1<f64>,
    /// Whether batch statistics were used (gradient flows through them)
    batch_stats: bool,
}

impl BatchNorm2d {
    pub fn new(num_features: usize) -> Self {
        Self {
            num_features,
            momentum: 0.1,
            eps: 1e-5,
            running_mean: Array1::zeros(num_features),
            running_var: Array1::ones(num_features),
            gamma: Param::new(Array1::ones(num_features)),
            beta: Param::new(Array1::zeros(num_features)),
            training: true,
            cache: None,
        }
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn running_mean(&self) -> &Array1<f64> {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Array1<f64> {
        &self.running_var
    }
}

impl Parameterized for BatchNorm2d {
    fn parameters(&self) -> Vec<ParamView<'_>> {
        vec![self.gamma.view(), self.beta.view()]
    }

    fn parameters_mut(&mut self) -> Vec<ParamViewMut<'_>> {
        vec![self.gamma.view_mut(), self.beta.view_mut()]
    }

    fn buffers(&self) -> Vec<ArrayViewD<'_, f64>> {
        vec![
            self.running_mean.view().into_dyn(),
            self.running_var.view().into_dyn(),
        ]
    }

    fn buffers_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        vec![
            self.running_mean.view_mut().into_dyn(),
            self.running_var.view_mut().into_dyn(),
        ]
    }
}

impl Layer for BatchNorm2d {
    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        let (n, c, h, w) = x.dim();
        if c != self.num_features {
            return Err(DartsError::shape(
                format!("{} channels", self.num_features),
                x.dim(),
            ));
        }
        let count = n * h * w;

        let (mean, var) = if self.training {
            let mut mean = Array1::zeros(c);
            let mut var = Array1::zeros(c);
            for ci in 0..c {
                let plane = x.index_axis(Axis(1), ci);
                let m = plane.sum() / count as f64;
                mean[ci] = m;
                var[ci] = plane.fold(0.0, |acc, &v| acc + (v - m) * (v - m)) / count as f64;
            }

            // Running variance uses the unbiased estimate
            let unbias = if count > 1 {
                count as f64 / (count - 1) as f64
            } else {
                1.0
            };
            self.running_mean = &self.running_mean * (1.0 - self.momentum) + &mean * self.momentum;
            self.running_var =
                &self.running_var * (1.0 - self.momentum) + &var * (self.momentum * unbias);
            (mean, var)
        } else {
            (self.running_mean.clone(), self.running_var.clone())
        };

        let inv_std = var.mapv(|v| 1.0 / (v + self.eps).sqrt());
        let mut x_hat = Array4::zeros(x.raw_dim());
        let mut out = Array4::zeros(x.raw_dim());
        for ci in 0..c {
            let normalized = x.index_axis(Axis(1), ci).mapv(|v| (v - mean[ci]) * inv_std[ci]);
            out.index_axis_mut(Axis(1), ci)
                .assign(&normalized.mapv(|v| v * self.gamma.value[ci] + self.beta.value[ci]));
            x_hat.index_axis_mut(Axis(1), ci).assign(&normalized);
        }

        self.cache = Some(NormCache {
            x_hat,
            inv_std,
            batch_stats: self.training,
        });
        Ok(out)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| DartsError::no_forward_cache("BatchNorm2d"))?;
        if grad.dim() != cache.x_hat.dim() {
            return Err(DartsError::shape(cache.x_hat.dim(), grad.dim()));
        }
        let (n, c, h, w) = grad.dim();
        let count = (n * h * w) as f64;

        let mut dx = Array4::zeros(grad.raw_dim());
        for ci in 0..c {
            let dy = grad.index_axis(Axis(1), ci);
            let x_hat = cache.x_hat.index_axis(Axis(1), ci);
            let dbeta = dy.sum();
            let dgamma = (&dy * &x_hat).sum();
            self.gamma.grad[ci] += dgamma;
            self.beta.grad[ci] += dbeta;

            let gamma = self.gamma.value[ci];
            let inv_std = cache.inv_std[ci];
            let plane = if cache.batch_stats {
                let scale = gamma * inv_std / count;
                ndarray::Zip::from(&dy)
                    .and(&x_hat)
                    .map_collect(|&g, &xh| scale * (count * g - dbeta - xh * dgamma))
            } else {
                dy.mapv(|g| g * gamma * inv_std)
            };
            dx.index_axis_mut(Axis(1), ci).assign(&plane);
        }
        Ok(dx)
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::gradcheck::{self, assert_close, objective, random_tensor, EPS};

    #[test]
    fn test_batchnorm_normalizes_channels() {
        let mut bn = BatchNorm2d::new(3);
        let x = random_tensor((4, 3, 5, 5), 11).mapv(|v| v * 3.0 + 2.0);
        let y = bn.forward(&x).unwrap();
        for ci in 0..3 {
            let plane = y.index_axis(Axis(1), ci);
            let mean = plane.mean().unwrap();
            let var = plane.mapv(|v| (v - mean).powi(2)).mean().unwrap();
            assert!(mean.abs() < 1e-10);
            assert!((var - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_batchnorm_updates_running_stats_only_in_training() {
        let mut bn = BatchNorm2d::new(2);
        let x = random_tensor((2, 2, 3, 3), 12).mapv(|v| v + 5.0);
        bn.forward(&x).unwrap();
        let after_train = bn.running_mean().clone();
        assert!(after_train.iter().all(|&m| m > 0.3));

        bn.set_training(false);
        bn.forward(&x).unwrap();
        assert_eq!(bn.running_mean(), &after_train);
    }

    #[test]
    fn test_batchnorm_input_gradient_training() {
        let mut bn = BatchNorm2d::new(2);
        bn.gamma.value = ndarray::array![1.5, -0.7];
        bn.beta.value = ndarray::array![0.1, 0.2];
        gradcheck::check_input_grad(&mut bn, &random_tensor((3, 2, 3, 3), 13), 14);
    }

    #[test]
    fn test_batchnorm_input_gradient_eval() {
        let mut bn = BatchNorm2d::new(2);
        bn.forward(&random_tensor((3, 2, 3, 3), 15)).unwrap();
        bn.set_training(false);
        gradcheck::check_input_grad(&mut bn, &random_tensor((3, 2, 3, 3), 16), 17);
    }

    #[test]
    fn test_batchnorm_gamma_gradient() {
        let mut bn = BatchNorm2d::new(2);
        let x = random_tensor((2, 2, 3, 3), 18);
        let probe = random_tensor((2, 2, 3, 3), 19);
        bn.forward(&x).unwrap();
        bn.backward(&probe).unwrap();
        let analytic = bn.gamma.grad.clone();

        for ci in 0..2 {
            let original = bn.gamma.value[ci];
            bn.gamma.value[ci] = original + EPS;
            let fp = objective(&bn.forward(&x).unwrap(), &probe);
            bn.gamma.value[ci] = original - EPS;
            let fm = objective(&bn.forward(&x).unwrap(), &probe);
            bn.gamma.value[ci] = original;
            assert_close(analytic[ci], (fp - fm) / (2.0 * EPS), "gamma gradient");
        }
    }
}
