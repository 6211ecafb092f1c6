//! Image datasets, augmentation and batching
//!
//! Datasets hand out single CHW images with pixel values in [0, 1]. A
//! [`DataLoader`] walks a subset of a dataset in (optionally shuffled)
//! batches, applying its [`Transform`] to every sample in parallel.

mod cifar;
mod loader;
mod module;
mod synthetic;
mod transform;

use ndarray::Array3;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{DartsError, Result};
use crate::nn::Tensor;

pub use cifar::Cifar10;
pub use loader::{BatchIter, DataLoader};
pub use module::DataModule;
pub use synthetic::SyntheticImages;
pub use transform::Transform;

/// Random-access collection of labelled images
pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Image `index` as [channels, height, width] in [0, 1], plus its label
    fn get(&self, index: usize) -> Result<(Array3<f64>, usize)>;

    fn num_classes(&self) -> usize;

    /// (channels, height, width) of every image
    fn image_shape(&self) -> (usize, usize, usize);
}

/// A mini-batch of images and labels
#[derive(Debug, Clone)]
pub struct Batch {
    /// [N, C, H, W]
    pub images: Tensor,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Split `0..len` into disjoint random subsets of the given sizes
pub fn random_split(len: usize, sizes: &[usize], rng: &mut impl Rng) -> Result<Vec<Vec<usize>>> {
    let total: usize = sizes.iter().sum();
    if total > len {
        return Err(DartsError::DataError(format!(
            "cannot split {} samples into subsets of {:?}",
            len, sizes
        )));
    }

    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(rng);

    let mut parts = Vec::with_capacity(sizes.len());
    let mut start = 0;
    for &size in sizes {
        parts.push(indices[start..start + size].to_vec());
        start += size;
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    use std::collections::HashSet;

    #[test]
    fn test_random_split_is_disjoint() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        let parts = random_split(100, &[60, 30], &mut rng).unwrap();
        assert_eq!(parts[0].len(), 60);
        assert_eq!(parts[1].len(), 30);

        let all: HashSet<usize> = parts.iter().flatten().copied().collect();
        assert_eq!(all.len(), 90);
        assert!(all.iter().all(|&i| i < 100));
    }

    #[test]
    fn test_random_split_too_large() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        assert!(matches!(
            random_split(10, &[6, 5], &mut rng),
            Err(DartsError::DataError(_))
        ));
    }
}
