//! Stride-1 pooling with same padding

use ndarray::{Array4, Zip};

use super::{Layer, Parameterized, Tensor};
use crate::error::{DartsError, Result};

/// Clamp a window centered at `center` to `[0, len)`
fn window(center: usize, radius: usize, len: usize) -> std::ops::Range<usize> {
    center.saturating_sub(radius)..(center + radius + 1).min(len)
}

/// Max pooling; padded positions never win
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    kernel_size: usize,
    /// Flat (y * W + x) position of each output's maximum
    argmax: Option<Array4<usize>>,
}

impl MaxPool2d {
    pub fn new(kernel_size: usize) -> Self {
        Self {
            kernel_size,
            argmax: None,
        }
    }
}

impl Parameterized for MaxPool2d {}

impl Layer for MaxPool2d {
    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        let (n, c, h, w) = x.dim();
        let r = self.kernel_size / 2;
        let mut out = Array4::zeros((n, c, h, w));
        let mut argmax = Array4::zeros((n, c, h, w));

        for b in 0..n {
            for ch in 0..c {
                for y in 0..h {
                    for xx in 0..w {
                        let mut best = f64::NEG_INFINITY;
                        let mut best_pos = y * w + xx;
                        for iy in window(y, r, h) {
                            for ix in window(xx, r, w) {
                                let v = x[[b, ch, iy, ix]];
                                if v > best {
                                    best = v;
                                    best_pos = iy * w + ix;
                                }
                            }
                        }
                        out[[b, ch, y, xx]] = best;
                        argmax[[b, ch, y, xx]] = best_pos;
                    }
                }
            }
        }

        self.argmax = Some(argmax);
        Ok(out)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        let argmax = self
            .argmax
            .as_ref()
            .ok_or_else(|| DartsError::no_forward_cache("MaxPool2d"))?;
        if argmax.dim() != grad.dim() {
            return Err(DartsError::shape(argmax.dim(), grad.dim()));
        }
        let (_, _, _, w) = grad.dim();
        let mut dx = Array4::zeros(grad.raw_dim());
        Zip::indexed(grad)
            .and(argmax)
            .for_each(|(b, ch, _, _), &g, &pos| {
                dx[[b, ch, pos / w, pos % w]] += g;
            });
        Ok(dx)
    }
}

/// Average pooling; padded zeros count toward the divisor
#[derive(Debug, Clone)]
pub struct AvgPool2d {
    kernel_size: usize,
    input_dim: Option<(usize, usize, usize, usize)>,
}

impl AvgPool2d {
    pub fn new(kernel_size: usize) -> Self {
        Self {
            kernel_size,
            input_dim: None,
        }
    }
}

impl Parameterized for AvgPool2d {}

impl Layer for AvgPool2d {
    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        let (n, c, h, w) = x.dim();
        let r = self.kernel_size / 2;
        let area = (self.kernel_size * self.kernel_size) as f64;
        let mut out = Array4::zeros((n, c, h, w));

        for b in 0..n {
            for ch in 0..c {
                for y in 0..h {
                    for xx in 0..w {
                        let mut sum = 0.0;
                        for iy in window(y, r, h) {
                            for ix in window(xx, r, w) {
                                sum += x[[b, ch, iy, ix]];
                            }
                        }
                        out[[b, ch, y, xx]] = sum / area;
                    }
                }
            }
        }

        self.input_dim = Some(x.dim());
        Ok(out)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        let dim = self
            .input_dim
            .ok_or_else(|| DartsError::no_forward_cache("AvgPool2d"))?;
        if dim != grad.dim() {
            return Err(DartsError::shape(dim, grad.dim()));
        }
        let (_, _, h, w) = dim;
        let r = self.kernel_size / 2;
        let area = (self.kernel_size * self.kernel_size) as f64;
        let mut dx = Array4::zeros(dim);

        Zip::indexed(grad).for_each(|(b, ch, y, xx), &g| {
            let share = g / area;
            for iy in window(y, r, h) {
                for ix in window(xx, r, w) {
                    dx[[b, ch, iy, ix]] += share;
                }
            }
        });
        Ok(dx)
    }
}
