//! Batching over a dataset subset

use ndarray::{s, Array4};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use std::sync::Arc;

use super::{Batch, Dataset, Transform};
use crate::error::{DartsError, Result};

/// Iterates a subset of a dataset in mini-batches.
///
/// Shuffling and augmentation are seeded from `(seed, epoch)`, so a given
/// epoch always produces the same batches regardless of thread count.
#[derive(Clone)]
pub struct DataLoader {
    dataset: Arc<dyn Dataset>,
    indices: Vec<usize>,
    batch_size: usize,
    shuffle: bool,
    transform: Transform,
    seed: u64,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for DataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoader")
            .field("samples", &self.indices.len())
            .field("batch_size", &self.batch_size)
            .field("shuffle", &self.shuffle)
            .field("seed", &self.seed)
            .finish()
    }
}

impl DataLoader {
    pub fn new(
        dataset: Arc<dyn Dataset>,
        indices: Vec<usize>,
        batch_size: usize,
        transform: Transform,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(DartsError::invalid_parameter("batch_size", 0, "must be at least 1"));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= dataset.len()) {
            return Err(DartsError::DataError(format!(
                "index {} out of range for {} samples",
                bad,
                dataset.len()
            )));
        }
        Ok(Self {
            dataset,
            indices,
            batch_size,
            shuffle: false,
            transform,
            seed: 0,
            pool: None,
        })
    }

    pub fn with_shuffle(mut self, shuffle: bool, seed: u64) -> Self {
        self.shuffle = shuffle;
        self.seed = seed;
        self
    }

    /// Assemble batches on a dedicated pool of `num_workers` threads
    /// (0 keeps the global rayon pool)
    pub fn with_workers(mut self, num_workers: usize) -> Result<Self> {
        if num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .build()
                .map_err(|e| DartsError::DataError(format!("failed to build worker pool: {}", e)))?;
            self.pool = Some(Arc::new(pool));
        }
        Ok(self)
    }

    pub fn num_samples(&self) -> usize {
        self.indices.len()
    }

    /// Number of batches per epoch (the last one may be short)
    pub fn len(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_classes(&self) -> usize {
        self.dataset.num_classes()
    }

    fn epoch_seed(&self, epoch: u64) -> u64 {
        self.seed ^ epoch.wrapping_mul(0xD1B5_4A32_D192_ED03)
    }

    /// Batches of one epoch
    pub fn iter(&self, epoch: u64) -> BatchIter<'_> {
        let mut order = self.indices.clone();
        if self.shuffle {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.epoch_seed(epoch));
            order.shuffle(&mut rng);
        }
        BatchIter {
            loader: self,
            order,
            position: 0,
            epoch,
        }
    }

    fn assemble(&self, samples: &[usize], offset: usize, epoch: u64) -> Result<Batch> {
        let base = self.epoch_seed(epoch).wrapping_add(1);
        let load = || -> Result<Vec<_>> {
            samples
                .par_iter()
                .enumerate()
                .map(|(i, &index)| {
                    let (image, label) = self.dataset.get(index)?;
                    let mut rng =
                        Xoshiro256PlusPlus::seed_from_u64(base.wrapping_add((offset + i) as u64));
                    Ok((self.transform.apply(&image, &mut rng)?, label))
                })
                .collect()
        };
        let items = match &self.pool {
            Some(pool) => pool.install(load)?,
            None => load()?,
        };

        let (c, h, w) = items
            .first()
            .map(|(image, _)| image.dim())
            .ok_or_else(|| DartsError::DataError("empty batch".into()))?;
        let mut images = Array4::zeros((items.len(), c, h, w));
        let mut labels = Vec::with_capacity(items.len());
        for (i, (image, label)) in items.into_iter().enumerate() {
            if image.dim() != (c, h, w) {
                return Err(DartsError::shape((c, h, w), image.dim()));
            }
            images.slice_mut(s![i, .., .., ..]).assign(&image);
            labels.push(label);
        }
        Ok(Batch { images, labels })
    }
}

/// Iterator over the batches of one epoch
pub struct BatchIter<'a> {
    loader: &'a DataLoader,
    order: Vec<usize>,
    position: usize,
    epoch: u64,
}

impl Iterator for BatchIter<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.loader.batch_size).min(self.order.len());
        let batch = self
            .loader
            .assemble(&self.order[self.position..end], self.position, self.epoch);
        self.position = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.position).div_ceil(self.loader.batch_size);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SyntheticImages;

    fn loader(shuffle: bool) -> DataLoader {
        let data = Arc::new(SyntheticImages::new(10, 2, 6, 1).unwrap());
        let transform = Transform::normalize(&[0.5; 3], &[0.25; 3])
            .unwrap()
            .with_augmentation(1);
        DataLoader::new(data, (0..10).collect(), 4, transform)
            .unwrap()
            .with_shuffle(shuffle, 99)
    }

    #[test]
    fn test_batches_cover_subset() {
        let loader = loader(false);
        assert_eq!(loader.len(), 3);
        let batches: Vec<Batch> = loader.iter(0).collect::<Result<_>>().unwrap();
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(batches[0].images.dim(), (4, 3, 6, 6));
        assert_eq!(batches[0].labels, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_epoch_is_reproducible() {
        let loader = loader(true);
        let a: Vec<Batch> = loader.iter(3).collect::<Result<_>>().unwrap();
        let b: Vec<Batch> = loader.iter(3).collect::<Result<_>>().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.images, y.images);
            assert_eq!(x.labels, y.labels);
        }
    }

    #[test]
    fn test_worker_pool_gives_same_batches() {
        let plain = loader(true);
        let pooled = loader(true).with_workers(2).unwrap();
        let a = plain.iter(1).next().unwrap().unwrap();
        let b = pooled.iter(1).next().unwrap().unwrap();
        assert_eq!(a.images, b.images);
    }

    #[test]
    fn test_shuffle_changes_between_epochs() {
        let loader = loader(true);
        let order = |epoch| -> Vec<usize> {
            loader
                .iter(epoch)
                .flat_map(|b| b.unwrap().labels)
                .collect()
        };
        let epochs: Vec<Vec<usize>> = (0..5).map(order).collect();
        assert!(epochs.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_rejects_bad_indices() {
        let data = Arc::new(SyntheticImages::new(3, 2, 4, 1).unwrap());
        let transform = Transform::normalize(&[0.5; 3], &[0.25; 3]).unwrap();
        assert!(DataLoader::new(data.clone(), vec![0, 3], 2, transform.clone()).is_err());
        assert!(DataLoader::new(data, vec![0], 0, transform).is_err());
    }
}
