//! Per-sample augmentation and normalization

use ndarray::{s, Array1, Array3, Axis};
use rand::Rng;

use crate::error::{DartsError, Result};

/// Random crop, random horizontal flip, then per-channel normalization
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    mean: Array1<f64>,
    std: Array1<f64>,
    /// Zero padding for the random crop; `None` disables cropping
    crop_padding: Option<usize>,
    flip: bool,
}

impl Transform {
    pub const CIFAR10_MEAN: [f64; 3] = [0.4914, 0.4822, 0.4465];
    pub const CIFAR10_STD: [f64; 3] = [0.2023, 0.1994, 0.2010];

    /// Normalization only
    pub fn normalize(mean: &[f64], std: &[f64]) -> Result<Self> {
        if mean.len() != std.len() || mean.is_empty() {
            return Err(DartsError::shape(mean.len(), std.len()));
        }
        if std.iter().any(|&s| s <= 0.0) {
            return Err(DartsError::invalid_parameter(
                "std",
                format!("{:?}", std),
                "must be positive",
            ));
        }
        Ok(Self {
            mean: Array1::from(mean.to_vec()),
            std: Array1::from(std.to_vec()),
            crop_padding: None,
            flip: false,
        })
    }

    /// Add random crop with `padding` and random horizontal flip
    pub fn with_augmentation(mut self, padding: usize) -> Self {
        self.crop_padding = Some(padding);
        self.flip = true;
        self
    }

    /// Training transform used for CIFAR-10 search
    pub fn cifar10_train() -> Self {
        Self::cifar10_eval().with_augmentation(4)
    }

    pub fn cifar10_eval() -> Self {
        Self {
            mean: Array1::from(Self::CIFAR10_MEAN.to_vec()),
            std: Array1::from(Self::CIFAR10_STD.to_vec()),
            crop_padding: None,
            flip: false,
        }
    }

    pub fn is_augmenting(&self) -> bool {
        self.crop_padding.is_some() || self.flip
    }

    pub fn apply(&self, image: &Array3<f64>, rng: &mut impl Rng) -> Result<Array3<f64>> {
        let (c, h, w) = image.dim();
        if c != self.mean.len() {
            return Err(DartsError::shape(
                format!("{} channels", self.mean.len()),
                image.dim(),
            ));
        }

        let mut out = match self.crop_padding {
            Some(pad) if pad > 0 => {
                let mut padded = Array3::zeros((c, h + 2 * pad, w + 2 * pad));
                padded.slice_mut(s![.., pad..pad + h, pad..pad + w]).assign(image);
                let dy = rng.gen_range(0..=2 * pad);
                let dx = rng.gen_range(0..=2 * pad);
                padded.slice(s![.., dy..dy + h, dx..dx + w]).to_owned()
            }
            _ => image.clone(),
        };

        if self.flip && rng.gen_bool(0.5) {
            out.invert_axis(Axis(2));
            out = out.as_standard_layout().into_owned();
        }

        for (mut plane, (&m, &sd)) in out
            .axis_iter_mut(Axis(0))
            .zip(self.mean.iter().zip(self.std.iter()))
        {
            plane.mapv_inplace(|v| (v - m) / sd);
        }
        Ok(out)
    }
}
