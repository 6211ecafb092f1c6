//! 2D convolution (stride 1, same padding) via im2col

use ndarray::{s, Array2, Array3, Array4, ArrayView3, Axis};
use rand::Rng;
use rayon::prelude::*;

use super::{Layer, Param, ParamView, ParamViewMut, Parameterized, Tensor};
use crate::error::{DartsError, Result};

/// Bias-free square convolution that preserves spatial size
#[derive(Debug, Clone)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    padding: usize,
    /// Shape: [out_channels, in_channels * k * k]
    weight: Param<ndarray::Ix2>,
    input: Option<Tensor>,
}

impl Conv2d {
    /// Create a convolution with He-uniform initialization
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        if kernel_size % 2 == 0 {
            return Err(DartsError::invalid_parameter(
                "kernel_size",
                kernel_size,
                "same padding needs an odd kernel",
            ));
        }
        let fan_in = in_channels * kernel_size * kernel_size;
        let bound = (6.0 / fan_in.max(1) as f64).sqrt();
        let weight = Array2::from_shape_fn((out_channels, fan_in), |_| {
            rng.gen_range(-bound..bound)
        });

        Ok(Self {
            in_channels,
            out_channels,
            kernel_size,
            padding: kernel_size / 2,
            weight: Param::new(weight),
            input: None,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

/// Unfold every receptive field of a CHW image into a column.
///
/// Output shape: [C * k * k, H * W]
fn im2col(x: ArrayView3<'_, f64>, k: usize, pad: usize) -> Array2<f64> {
    let (c, h, w) = x.dim();
    let mut cols = Array2::zeros((c * k * k, h * w));
    for ci in 0..c {
        for ki in 0..k {
            for kj in 0..k {
                let row = (ci * k + ki) * k + kj;
                for y in 0..h {
                    let iy = y + ki;
                    if iy < pad || iy - pad >= h {
                        continue;
                    }
                    for xx in 0..w {
                        let ix = xx + kj;
                        if ix < pad || ix - pad >= w {
                            continue;
                        }
                        cols[[row, y * w + xx]] = x[[ci, iy - pad, ix - pad]];
                    }
                }
            }
        }
    }
    cols
}

/// Fold columns back into an image, summing overlapping contributions
fn col2im(cols: &Array2<f64>, (c, h, w): (usize, usize, usize), k: usize, pad: usize) -> Array3<f64> {
    let mut img = Array3::zeros((c, h, w));
    for ci in 0..c {
        for ki in 0..k {
            for kj in 0..k {
                let row = (ci * k + ki) * k + kj;
                for y in 0..h {
                    let iy = y + ki;
                    if iy < pad || iy - pad >= h {
                        continue;
                    }
                    for xx in 0..w {
                        let ix = xx + kj;
                        if ix < pad || ix - pad >= w {
                            continue;
                        }
                        img[[ci, iy - pad, ix - pad]] += cols[[row, y * w + xx]];
                    }
                }
            }
        }
    }
    img
}

impl Parameterized for Conv2d {
    fn parameters(&self) -> Vec<ParamView<'_>> {
        vec![self.weight.view()]
    }

    fn parameters_mut(&mut self) -> Vec<ParamViewMut<'_>> {
        vec![self.weight.view_mut()]
    }
}

impl Layer for Conv2d {
    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        let (n, c, h, w) = x.dim();
        if c != self.in_channels {
            return Err(DartsError::shape(
                format!("{} input channels", self.in_channels),
                x.dim(),
            ));
        }
        let (k, pad, out_c) = (self.kernel_size, self.padding, self.out_channels);
        let weight = &self.weight.value;

        let outputs: Vec<Array2<f64>> = (0..n)
            .into_par_iter()
            .map(|i| weight.dot(&im2col(x.index_axis(Axis(0), i), k, pad)))
            .collect();

        let mut out = Array4::zeros((n, out_c, h, w));
        for (i, y) in outputs.into_iter().enumerate() {
            out.slice_mut(s![i, .., .., ..])
                .assign(&y.into_shape((out_c, h, w))?);
        }

        self.input = Some(x.clone());
        Ok(out)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| DartsError::no_forward_cache("Conv2d"))?;
        let (n, c, h, w) = input.dim();
        if grad.dim() != (n, self.out_channels, h, w) {
            return Err(DartsError::shape((n, self.out_channels, h, w), grad.dim()));
        }
        let (k, pad, out_c) = (self.kernel_size, self.padding, self.out_channels);
        let weight = &self.weight.value;

        let per_sample: Vec<(Array2<f64>, Array3<f64>)> = (0..n)
            .into_par_iter()
            .map(|i| -> Result<(Array2<f64>, Array3<f64>)> {
                let g = grad
                    .index_axis(Axis(0), i)
                    .to_owned()
                    .into_shape((out_c, h * w))?;
                let cols = im2col(input.index_axis(Axis(0), i), k, pad);
                let dw = g.dot(&cols.t());
                let dcols = weight.t().dot(&g);
                Ok((dw, col2im(&dcols, (c, h, w), k, pad)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut dx = Array4::zeros((n, c, h, w));
        for (i, (dw, dimg)) in per_sample.into_iter().enumerate() {
            self.weight.grad += &dw;
            dx.slice_mut(s![i, .., .., ..]).assign(&dimg);
        }
        Ok(dx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::gradcheck::{self, assert_close, objective, random_tensor, EPS};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_conv_preserves_spatial_size() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut conv = Conv2d::new(3, 5, 3, &mut rng).unwrap();
        let y = conv.forward(&random_tensor((2, 3, 6, 7), 2)).unwrap();
        assert_eq!(y.dim(), (2, 5, 6, 7));
        assert_eq!(conv.num_params(), 5 * 3 * 9);
    }

    #[test]
    fn test_conv_rejects_even_kernel() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        assert!(Conv2d::new(3, 3, 2, &mut rng).is_err());
    }

    #[test]
    fn test_conv_rejects_channel_mismatch() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut conv = Conv2d::new(4, 4, 1, &mut rng).unwrap();
        assert!(conv.forward(&random_tensor((1, 3, 4, 4), 0)).is_err());
    }

    #[test]
    fn test_one_by_one_conv_is_channel_matmul() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut conv = Conv2d::new(2, 1, 1, &mut rng).unwrap();
        conv.weight.value = ndarray::array![[2.0, -1.0]];
        let x = random_tensor((1, 2, 3, 3), 4);
        let y = conv.forward(&x).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let expected = 2.0 * x[[0, 0, i, j]] - x[[0, 1, i, j]];
                assert!((y[[0, 0, i, j]] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_conv_input_gradient() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let mut conv = Conv2d::new(2, 3, 3, &mut rng).unwrap();
        gradcheck::check_input_grad(&mut conv, &random_tensor((2, 2, 4, 5), 6), 7);
    }

    #[test]
    fn test_conv_weight_gradient() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(8);
        let mut conv = Conv2d::new(2, 2, 3, &mut rng).unwrap();
        let x = random_tensor((2, 2, 4, 4), 9);
        let probe = random_tensor((2, 2, 4, 4), 10);
        conv.forward(&x).unwrap();
        conv.backward(&probe).unwrap();
        let analytic = conv.weight.grad.clone();

        for (idx, &g) in analytic.indexed_iter().step_by(5) {
            let original = conv.weight.value[idx];
            conv.weight.value[idx] = original + EPS;
            let fp = objective(&conv.forward(&x).unwrap(), &probe);
            conv.weight.value[idx] = original - EPS;
            let fm = objective(&conv.forward(&x).unwrap(), &probe);
            conv.weight.value[idx] = original;
            assert_close(g, (fp - fm) / (2.0 * EPS), "conv weight gradient");
        }
    }
}
