//! CIFAR-10 binary release reader

use ndarray::Array3;
use std::path::{Path, PathBuf};

use super::Dataset;
use crate::error::{DartsError, Result};

const SIDE: usize = 32;
const CHANNELS: usize = 3;
const PIXELS: usize = CHANNELS * SIDE * SIDE;
/// One label byte followed by the R, G and B planes
const RECORD_LEN: usize = 1 + PIXELS;
const NUM_CLASSES: usize = 10;

const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILE: &str = "test_batch.bin";
const ARCHIVE_DIR: &str = "cifar-10-batches-bin";

/// CIFAR-10 images held in memory as raw bytes
#[derive(Debug, Clone)]
pub struct Cifar10 {
    labels: Vec<u8>,
    pixels: Vec<u8>,
}

impl Cifar10 {
    /// Directory holding the `.bin` files: `data_dir/cifar-10-batches-bin`
    /// if present, otherwise `data_dir` itself
    pub fn resolve_dir(data_dir: &Path) -> PathBuf {
        let nested = data_dir.join(ARCHIVE_DIR);
        if nested.is_dir() {
            nested
        } else {
            data_dir.to_path_buf()
        }
    }

    fn files(train: bool) -> Vec<&'static str> {
        if train {
            TRAIN_FILES.to_vec()
        } else {
            vec![TEST_FILE]
        }
    }

    /// Check that every batch file is in place
    pub fn prepare_data(data_dir: &Path) -> Result<()> {
        let dir = Self::resolve_dir(data_dir);
        for name in TRAIN_FILES.iter().chain(std::iter::once(&TEST_FILE)) {
            let path = dir.join(name);
            if !path.is_file() {
                return Err(DartsError::DataError(format!(
                    "CIFAR-10 file {} not found (expected the binary release under {})",
                    path.display(),
                    data_dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Load the training (50k) or test (10k) split
    pub fn load(data_dir: &Path, train: bool) -> Result<Self> {
        let dir = Self::resolve_dir(data_dir);
        let mut dataset = Self {
            labels: Vec::new(),
            pixels: Vec::new(),
        };
        for name in Self::files(train) {
            let path = dir.join(name);
            let bytes = std::fs::read(&path).map_err(|e| {
                DartsError::DataError(format!("failed to read {}: {}", path.display(), e))
            })?;
            dataset.extend_from_bytes(&bytes).map_err(|e| {
                DartsError::DataError(format!("{}: {}", path.display(), e))
            })?;
        }
        tracing::info!(
            split = if train { "train" } else { "test" },
            samples = dataset.len(),
            "Loaded CIFAR-10"
        );
        Ok(dataset)
    }

    /// Parse records from an in-memory batch file
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dataset = Self {
            labels: Vec::new(),
            pixels: Vec::new(),
        };
        dataset.extend_from_bytes(bytes)?;
        Ok(dataset)
    }

    fn extend_from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() % RECORD_LEN != 0 {
            return Err(DartsError::DataError(format!(
                "batch size {} is not a multiple of the {}-byte record",
                bytes.len(),
                RECORD_LEN
            )));
        }
        self.labels.reserve(bytes.len() / RECORD_LEN);
        self.pixels.reserve(bytes.len() / RECORD_LEN * PIXELS);
        for record in bytes.chunks_exact(RECORD_LEN) {
            let label = record[0];
            if usize::from(label) >= NUM_CLASSES {
                return Err(DartsError::DataError(format!("invalid label {}", label)));
            }
            self.labels.push(label);
            self.pixels.extend_from_slice(&record[1..]);
        }
        Ok(())
    }
}

impl Dataset for Cifar10 {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize) -> Result<(Array3<f64>, usize)> {
        let label = *self.labels.get(index).ok_or_else(|| {
            DartsError::DataError(format!("index {} out of range for {} samples", index, self.len()))
        })?;
        let raw = &self.pixels[index * PIXELS..(index + 1) * PIXELS];
        let image = Array3::from_shape_fn((CHANNELS, SIDE, SIDE), |(c, y, x)| {
            f64::from(raw[c * SIDE * SIDE + y * SIDE + x]) / 255.0
        });
        Ok((image, usize::from(label)))
    }

    fn num_classes(&self) -> usize {
        NUM_CLASSES
    }

    fn image_shape(&self) -> (usize, usize, usize) {
        (CHANNELS, SIDE, SIDE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(label: u8, fill: u8) -> Vec<u8> {
        let mut bytes = vec![label];
        bytes.extend(std::iter::repeat(fill).take(PIXELS));
        bytes
    }

    #[test]
    fn test_parse_records() {
        let mut bytes = record(3, 255);
        let mut second = record(7, 0);
        // Green plane, row 1, column 2
        second[1 + SIDE * SIDE + SIDE + 2] = 51;
        bytes.extend(second);

        let data = Cifar10::from_bytes(&bytes).unwrap();
        assert_eq!(data.len(), 2);

        let (image, label) = data.get(0).unwrap();
        assert_eq!(label, 3);
        assert_eq!(image.dim(), (3, 32, 32));
        assert!(image.iter().all(|&v| v == 1.0));

        let (image, label) = data.get(1).unwrap();
        assert_eq!(label, 7);
        assert!((image[[1, 1, 2]] - 0.2).abs() < 1e-12);
        assert_eq!(image[[0, 1, 2]], 0.0);
        assert!(data.get(2).is_err());
    }

    #[test]
    fn test_rejects_truncated_and_bad_labels() {
        assert!(Cifar10::from_bytes(&record(1, 0)[..100]).is_err());
        assert!(Cifar10::from_bytes(&record(10, 0)).is_err());
    }

    #[test]
    fn test_prepare_data_names_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Cifar10::prepare_data(dir.path()).unwrap_err();
        assert!(err.to_string().contains("data_batch_1.bin"));
    }

    #[test]
    fn test_load_from_nested_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join(ARCHIVE_DIR);
        std::fs::create_dir(&nested).unwrap();
        for (i, name) in TRAIN_FILES.iter().enumerate() {
            std::fs::write(nested.join(name), record(i as u8, 10)).unwrap();
        }
        std::fs::write(nested.join(TEST_FILE), [record(9, 0), record(8, 0)].concat()).unwrap();

        Cifar10::prepare_data(dir.path()).unwrap();
        let train = Cifar10::load(dir.path(), true).unwrap();
        assert_eq!(train.len(), 5);
        assert_eq!(train.get(4).unwrap().1, 4);
        let test = Cifar10::load(dir.path(), false).unwrap();
        assert_eq!(test.len(), 2);
    }
}
