//! Train/validation/test loaders built from the data config

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::Arc;

use super::{random_split, Cifar10, DataLoader, Dataset, SyntheticImages, Transform};
use crate::config::{DataConfig, DataSource};
use crate::error::{DartsError, Result};

/// Synthetic normalization: pixels are centered near 0.4
const SYNTHETIC_MEAN: [f64; 3] = [0.4; 3];
const SYNTHETIC_STD: [f64; 3] = [0.25; 3];

/// Owns the datasets and splits of one run.
///
/// The search trains weights on `train` and architecture parameters on
/// `val`; both are disjoint subsets of the training set. `test` is the
/// held-out split.
pub struct DataModule {
    config: DataConfig,
    seed: u64,
    train_set: Option<Arc<dyn Dataset>>,
    test_set: Option<Arc<dyn Dataset>>,
    train_indices: Vec<usize>,
    val_indices: Vec<usize>,
}

impl std::fmt::Debug for DataModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataModule")
            .field("source", &self.config.source)
            .field("train", &self.train_indices.len())
            .field("val", &self.val_indices.len())
            .field("prepared", &self.train_set.is_some())
            .finish()
    }
}

impl DataModule {
    pub fn new(config: DataConfig, seed: u64) -> Self {
        Self {
            config,
            seed,
            train_set: None,
            test_set: None,
            train_indices: Vec::new(),
            val_indices: Vec::new(),
        }
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    /// Check that the data is available on disk
    pub fn prepare_data(&self) -> Result<()> {
        match self.config.source {
            DataSource::Cifar10 => Cifar10::prepare_data(&self.config.data_dir),
            DataSource::Synthetic => Ok(()),
        }
    }

    /// Load the datasets and draw the train/val split
    pub fn setup(&mut self, num_classes: usize) -> Result<()> {
        let (train_set, test_set): (Arc<dyn Dataset>, Arc<dyn Dataset>) =
            match self.config.source {
            DataSource::Cifar10 => {
                self.prepare_data()?;
                (
                    Arc::new(Cifar10::load(&self.config.data_dir, true)?),
                    Arc::new(Cifar10::load(&self.config.data_dir, false)?),
                )
            }
            DataSource::Synthetic => {
                let size = self.config.image_size;
                let samples = self.config.synthetic_samples;
                (
                    Arc::new(SyntheticImages::new(samples, num_classes, size, self.seed)?),
                    Arc::new(SyntheticImages::new(
                        samples / 4 + 1,
                        num_classes,
                        size,
                        self.seed.wrapping_add(1),
                    )?),
                )
            }
        };

        if train_set.num_classes() != num_classes {
            return Err(DartsError::ConfigError(format!(
                "model expects {} classes but the dataset has {}",
                num_classes,
                train_set.num_classes()
            )));
        }

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        let mut parts = random_split(
            train_set.len(),
            &[self.config.train_size, self.config.val_size],
            &mut rng,
        )?
        .into_iter();
        self.train_indices = parts.next().unwrap_or_default();
        self.val_indices = parts.next().unwrap_or_default();

        tracing::info!(
            source = ?self.config.source,
            train = self.train_indices.len(),
            val = self.val_indices.len(),
            test = test_set.len(),
            "Data module ready"
        );
        self.train_set = Some(train_set);
        self.test_set = Some(test_set);
        Ok(())
    }

    fn transforms(&self) -> Result<(Transform, Transform)> {
        let (augmented, eval) = match self.config.source {
            DataSource::Cifar10 => (Transform::cifar10_train(), Transform::cifar10_eval()),
            DataSource::Synthetic => {
                let eval = Transform::normalize(&SYNTHETIC_MEAN, &SYNTHETIC_STD)?;
                (eval.clone().with_augmentation(4), eval)
            }
        };
        let train = if self.config.augment { augmented } else { eval.clone() };
        Ok((train, eval))
    }

    fn train_dataset(&self) -> Result<Arc<dyn Dataset>> {
        self.train_set
            .clone()
            .ok_or_else(|| DartsError::DataError("DataModule::setup has not been called".into()))
    }

    /// Channels of the images
    pub fn in_channels(&self) -> Result<usize> {
        Ok(self.train_dataset()?.image_shape().0)
    }

    fn loader(
        &self,
        dataset: Arc<dyn Dataset>,
        indices: Vec<usize>,
        transform: Transform,
        shuffle_seed: Option<u64>,
    ) -> Result<DataLoader> {
        let loader = DataLoader::new(dataset, indices, self.config.batch_size, transform)?
            .with_workers(self.config.num_workers)?;
        Ok(match shuffle_seed {
            Some(seed) => loader.with_shuffle(true, seed),
            None => loader,
        })
    }

    /// Shuffled, augmented weight-training batches
    pub fn train_loader(&self) -> Result<DataLoader> {
        let (train, _) = self.transforms()?;
        self.loader(self.train_dataset()?, self.train_indices.clone(), train, Some(self.seed))
    }

    /// Shuffled batches for the architecture step, drawn from the training set
    pub fn val_loader(&self) -> Result<DataLoader> {
        let (train, _) = self.transforms()?;
        self.loader(
            self.train_dataset()?,
            self.val_indices.clone(),
            train,
            Some(self.seed.wrapping_add(1)),
        )
    }

    /// Validation split without augmentation, in fixed order
    pub fn val_eval_loader(&self) -> Result<DataLoader> {
        let (_, eval) = self.transforms()?;
        self.loader(self.train_dataset()?, self.val_indices.clone(), eval, None)
    }

    pub fn test_loader(&self) -> Result<DataLoader> {
        let (_, eval) = self.transforms()?;
        let test = self
            .test_set
            .clone()
            .ok_or_else(|| DartsError::DataError("DataModule::setup has not been called".into()))?;
        let indices = (0..test.len()).collect();
        self.loader(test, indices, eval, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use std::collections::HashSet;

    fn synthetic() -> DataModule {
        let config = SearchConfig::synthetic_smoke();
        let mut dm = DataModule::new(config.data, 7);
        dm.setup(config.model.num_classes).unwrap();
        dm
    }

    #[test]
    fn test_synthetic_splits_are_disjoint() {
        let dm = synthetic();
        let train: HashSet<usize> = dm.train_indices.iter().copied().collect();
        let val: HashSet<usize> = dm.val_indices.iter().copied().collect();
        assert_eq!(train.len(), 32);
        assert_eq!(val.len(), 16);
        assert!(train.is_disjoint(&val));
    }

    #[test]
    fn test_loaders_shapes() {
        let dm = synthetic();
        assert_eq!(dm.in_channels().unwrap(), 3);
        let train = dm.train_loader().unwrap();
        assert_eq!(train.len(), 4);
        let batch = train.iter(0).next().unwrap().unwrap();
        assert_eq!(batch.images.dim(), (8, 3, 8, 8));
        assert_eq!(dm.val_loader().unwrap().num_samples(), 16);
        assert!(dm.test_loader().unwrap().num_samples() > 0);
    }

    #[test]
    fn test_loader_before_setup_fails() {
        let dm = DataModule::new(SearchConfig::synthetic_smoke().data, 1);
        assert!(dm.train_loader().is_err());
    }

    #[test]
    fn test_missing_cifar_reports_data_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = SearchConfig::default().data;
        config.data_dir = dir.path().to_path_buf();
        let mut dm = DataModule::new(config, 0);
        assert!(matches!(dm.setup(10), Err(DartsError::DataError(_))));
    }
}
