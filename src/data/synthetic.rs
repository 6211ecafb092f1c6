//! Generated images with class-dependent structure

use ndarray::Array3;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::f64::consts::PI;

use super::Dataset;
use crate::error::{DartsError, Result};

const CHANNELS: usize = 3;
const NOISE: f64 = 0.15;

/// Deterministic stand-in for a real image dataset.
///
/// Sample `i` has label `i % num_classes`. Each class owns a dominant color
/// channel and a stripe orientation and frequency, with per-sample noise and
/// phase drawn from a generator seeded by `(seed, i)`. Images are produced on
/// demand, so the dataset holds no pixel storage.
#[derive(Debug, Clone)]
pub struct SyntheticImages {
    len: usize,
    num_classes: usize,
    size: usize,
    seed: u64,
}

impl SyntheticImages {
    pub fn new(len: usize, num_classes: usize, size: usize, seed: u64) -> Result<Self> {
        if num_classes == 0 || size == 0 {
            return Err(DartsError::DataError(
                "synthetic images need at least one class and a positive size".into(),
            ));
        }
        Ok(Self {
            len,
            num_classes,
            size,
            seed,
        })
    }

    fn sample_rng(&self, index: usize) -> Xoshiro256PlusPlus {
        let mixed = self
            .seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(index as u64);
        Xoshiro256PlusPlus::seed_from_u64(mixed)
    }
}

impl Dataset for SyntheticImages {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<(Array3<f64>, usize)> {
        if index >= self.len {
            return Err(DartsError::DataError(format!(
                "index {} out of range for {} samples",
                index, self.len
            )));
        }
        let label = index % self.num_classes;
        let mut rng = self.sample_rng(index);

        let dominant = label % CHANNELS;
        let vertical = (label / CHANNELS) % 2 == 1;
        let frequency = 1.0 + (label / (2 * CHANNELS)) as f64;
        let phase: f64 = rng.gen_range(0.0..2.0 * PI);
        let size = self.size as f64;

        let image = Array3::from_shape_fn((CHANNELS, self.size, self.size), |(c, y, x)| {
            let coord = (if vertical { x } else { y }) as f64;
            let stripe = 0.5 + 0.3 * (2.0 * PI * frequency * coord / size + phase).sin();
            let base = if c == dominant { stripe } else { 0.5 * stripe };
            let noise = NOISE * (rng.gen::<f64>() - 0.5);
            (base + noise).clamp(0.0, 1.0)
        });
        Ok((image, label))
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn image_shape(&self) -> (usize, usize, usize) {
        (CHANNELS, self.size, self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_are_deterministic() {
        let data = SyntheticImages::new(20, 4, 8, 3).unwrap();
        let (a, la) = data.get(5).unwrap();
        let (b, lb) = data.get(5).unwrap();
        assert_eq!(a, b);
        assert_eq!(la, lb);
        assert_eq!(la, 1);
        assert_eq!(a.dim(), (3, 8, 8));
        assert!(a.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_seed_changes_images() {
        let a = SyntheticImages::new(4, 2, 8, 1).unwrap();
        let b = SyntheticImages::new(4, 2, 8, 2).unwrap();
        assert_ne!(a.get(0).unwrap().0, b.get(0).unwrap().0);
    }

    #[test]
    fn test_dominant_channel_matches_class() {
        let data = SyntheticImages::new(30, 3, 8, 9).unwrap();
        for i in 0..30 {
            let (image, label) = data.get(i).unwrap();
            let means: Vec<f64> = image.outer_iter().map(|plane| plane.mean().unwrap_or(0.0)).collect();
            let brightest = (0..3).max_by(|&a, &b| means[a].total_cmp(&means[b])).unwrap();
            assert_eq!(brightest, label);
        }
    }

    #[test]
    fn test_out_of_range() {
        let data = SyntheticImages::new(4, 2, 8, 1).unwrap();
        assert!(data.get(4).is_err());
        assert!(SyntheticImages::new(4, 0, 8, 1).is_err());
    }
}
