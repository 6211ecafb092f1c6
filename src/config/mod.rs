//! Search configuration
//!
//! Loaded from a TOML file with four sections: `[model]`, `[training]`,
//! `[data]` and `[logging]`. Every field has a default, so a config file only
//! needs to name what it changes.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{DartsError, Result};
use crate::search::OperationKind;

/// TOML integers are signed 64-bit
const MAX_SEED: u64 = i64::MAX as u64;

/// Search-space and network shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Intermediate nodes per cell
    pub num_nodes: usize,
    /// Number of stacked search cells
    pub num_cells: usize,
    pub num_classes: usize,
    /// Output channels of each stem conv-BN-ReLU block; the last is the cell width
    pub stem_channels: Vec<usize>,
    /// Candidate operations on every edge
    pub operations: Vec<OperationKind>,
    /// Channel proportion K: each edge mixes C / K channels
    pub partial_channels: usize,
    /// Learn per-node edge weights (beta)
    pub edge_normalization: bool,
    /// Edges kept per node when discretizing
    pub edges_per_node: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_nodes: 4,
            num_cells: 1,
            num_classes: 10,
            stem_channels: vec![16, 32, 64],
            operations: OperationKind::default_candidates(),
            partial_channels: 4,
            edge_normalization: true,
            edges_per_node: 2,
        }
    }
}

impl ModelConfig {
    pub fn num_ops(&self) -> usize {
        self.operations.len()
    }

    /// Width of the search cells
    pub fn cell_channels(&self) -> usize {
        self.stem_channels.last().copied().unwrap_or(0)
    }
}

/// Optimizer and schedule settings for both levels of the search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    /// Floor of the cosine schedule
    pub learning_rate_min: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    /// Gradient-norm clip for network weights
    pub grad_clip: f64,
    pub max_epochs: usize,
    pub arch_learning_rate: f64,
    pub arch_weight_decay: f64,
    /// Adam betas for architecture parameters
    pub arch_betas: [f64; 2],
    /// Epochs of weight-only training before architecture updates start
    pub arch_warmup_epochs: usize,
    /// Second-order (unrolled) architecture gradient
    pub unrolled: bool,
    pub seed: Option<u64>,
    /// Cap on training batches per epoch
    pub limit_train_batches: Option<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            learning_rate_min: 0.0,
            momentum: 0.9,
            weight_decay: 3e-4,
            grad_clip: 5.0,
            max_epochs: 50,
            arch_learning_rate: 6e-4,
            arch_weight_decay: 1e-3,
            arch_betas: [0.5, 0.999],
            arch_warmup_epochs: 15,
            unrolled: false,
            seed: None,
            limit_train_batches: None,
        }
    }
}

/// Where images come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Binary CIFAR-10 release under `data_dir`
    Cifar10,
    /// Generated class-conditional images
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub source: DataSource,
    pub data_dir: PathBuf,
    pub batch_size: usize,
    /// Threads used to assemble batches (0 = rayon default)
    pub num_workers: usize,
    /// Samples in the weight-training split
    pub train_size: usize,
    /// Samples in the architecture (validation) split
    pub val_size: usize,
    /// Random crop and horizontal flip on training batches
    pub augment: bool,
    /// Total generated samples for the synthetic source
    pub synthetic_samples: usize,
    /// Side length of generated images
    pub image_size: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            source: DataSource::Cifar10,
            data_dir: PathBuf::from("data"),
            batch_size: 64,
            num_workers: 0,
            train_size: 45_000,
            val_size: 5_000,
            augment: true,
            synthetic_samples: 512,
            image_size: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub experiment_name: String,
    /// Save a checkpoint every N epochs (0 = only the best)
    pub checkpoint_every: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            experiment_name: "pc_darts".to_string(),
            checkpoint_every: 1,
        }
    }
}

/// Complete search configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SearchConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DartsError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SearchConfig = toml::from_str(content)
            .map_err(|e| DartsError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Seed of this run, drawing and recording a fresh one if none is set
    pub fn resolve_seed(&mut self) -> u64 {
        *self
            .training
            .seed
            .get_or_insert_with(|| rand::thread_rng().gen_range(0..MAX_SEED))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let m = &self.model;
        if m.num_nodes == 0 {
            return Err(DartsError::invalid_parameter("model.num_nodes", 0, "must be at least 1"));
        }
        if m.num_cells == 0 {
            return Err(DartsError::invalid_parameter("model.num_cells", 0, "must be at least 1"));
        }
        if m.num_classes < 2 {
            return Err(DartsError::invalid_parameter(
                "model.num_classes",
                m.num_classes,
                "must be at least 2",
            ));
        }
        if m.stem_channels.is_empty() || m.stem_channels.contains(&0) {
            return Err(DartsError::invalid_parameter(
                "model.stem_channels",
                format!("{:?}", m.stem_channels),
                "needs at least one non-zero entry",
            ));
        }
        if m.operations.is_empty() {
            return Err(DartsError::ConfigError("model.operations must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for op in &m.operations {
            if !seen.insert(*op) {
                return Err(DartsError::invalid_parameter(
                    "model.operations",
                    op,
                    "listed more than once",
                ));
            }
        }
        if m.operations.iter().all(|op| *op == OperationKind::Zero) {
            return Err(DartsError::ConfigError(
                "model.operations needs at least one non-zero operation".into(),
            ));
        }
        let channels = m.cell_channels();
        if m.partial_channels == 0 || channels % m.partial_channels != 0 {
            return Err(DartsError::invalid_parameter(
                "model.partial_channels",
                m.partial_channels,
                format!("must be >= 1 and divide the cell width {}", channels),
            ));
        }
        if m.edges_per_node == 0 {
            return Err(DartsError::invalid_parameter(
                "model.edges_per_node",
                0,
                "must be at least 1",
            ));
        }

        let t = &self.training;
        for (name, value) in [
            ("training.learning_rate", t.learning_rate),
            ("training.arch_learning_rate", t.arch_learning_rate),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(DartsError::invalid_parameter(name, value, "must be positive and finite"));
            }
        }
        if !(t.learning_rate_min >= 0.0 && t.learning_rate_min <= t.learning_rate) {
            return Err(DartsError::invalid_parameter(
                "training.learning_rate_min",
                t.learning_rate_min,
                "must lie in [0, learning_rate]",
            ));
        }
        for (name, value) in [
            ("training.momentum", t.momentum),
            ("training.arch_betas[0]", t.arch_betas[0]),
            ("training.arch_betas[1]", t.arch_betas[1]),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(DartsError::invalid_parameter(name, value, "must lie in [0, 1)"));
            }
        }
        for (name, value) in [
            ("training.weight_decay", t.weight_decay),
            ("training.arch_weight_decay", t.arch_weight_decay),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(DartsError::invalid_parameter(
                    name,
                    value,
                    "must be non-negative and finite",
                ));
            }
        }
        if !(t.grad_clip > 0.0 && t.grad_clip.is_finite()) {
            return Err(DartsError::invalid_parameter(
                "training.grad_clip",
                t.grad_clip,
                "must be positive and finite",
            ));
        }
        if t.max_epochs == 0 {
            return Err(DartsError::invalid_parameter("training.max_epochs", 0, "must be at least 1"));
        }
        if let Some(seed) = t.seed {
            if seed > MAX_SEED {
                return Err(DartsError::invalid_parameter(
                    "training.seed",
                    seed,
                    "must fit in a signed 64-bit integer",
                ));
            }
        }
        if t.limit_train_batches == Some(0) {
            return Err(DartsError::invalid_parameter(
                "training.limit_train_batches",
                0,
                "must be at least 1 when set",
            ));
        }

        let d = &self.data;
        if d.batch_size == 0 {
            return Err(DartsError::invalid_parameter("data.batch_size", 0, "must be at least 1"));
        }
        if d.train_size == 0 || d.val_size == 0 {
            return Err(DartsError::ConfigError(
                "data.train_size and data.val_size must both be positive".into(),
            ));
        }
        if d.source == DataSource::Synthetic {
            if d.train_size + d.val_size > d.synthetic_samples {
                return Err(DartsError::invalid_parameter(
                    "data.synthetic_samples",
                    d.synthetic_samples,
                    format!("must cover train_size + val_size = {}", d.train_size + d.val_size),
                ));
            }
            if d.image_size == 0 {
                return Err(DartsError::invalid_parameter("data.image_size", 0, "must be positive"));
            }
        }

        if self.logging.experiment_name.trim().is_empty() {
            return Err(DartsError::ConfigError(
                "logging.experiment_name must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Small synthetic setup for smoke runs and tests
    pub fn synthetic_smoke() -> Self {
        let mut config = Self::default();
        config.model.num_nodes = 2;
        config.model.stem_channels = vec![8];
        config.model.partial_channels = 2;
        config.training.max_epochs = 2;
        config.training.arch_warmup_epochs = 1;
        config.training.learning_rate = 0.05;
        config.training.seed = Some(7);
        config.data.source = DataSource::Synthetic;
        config.data.batch_size = 8;
        config.data.train_size = 32;
        config.data.val_size = 16;
        config.data.synthetic_samples = 64;
        config.data.image_size = 8;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model.num_ops(), 5);
        assert_eq!(config.model.cell_channels(), 64);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = SearchConfig::from_toml_str(
            r#"
            [model]
            num_nodes = 3
            operations = ["identity", "conv_3x3", "max_pool_3x3"]

            [training]
            max_epochs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.model.num_nodes, 3);
        assert_eq!(config.model.num_ops(), 3);
        assert_eq!(config.training.max_epochs, 5);
        assert_eq!(config.training.momentum, 0.9);
        assert_eq!(config.data.batch_size, 64);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = SearchConfig::synthetic_smoke();
        let text = config.to_toml_string().unwrap();
        let parsed = SearchConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_channels_must_divide_width() {
        let mut config = SearchConfig::default();
        config.model.partial_channels = 3;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DartsError::InvalidParameter { .. }));
    }

    #[test]
    fn test_rejects_duplicate_operations() {
        let mut config = SearchConfig::default();
        config.model.operations = vec![OperationKind::Identity, OperationKind::Identity];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_only_zero_operation() {
        let mut config = SearchConfig::default();
        config.model.operations = vec![OperationKind::Zero];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_operation_name() {
        let result = SearchConfig::from_toml_str(
            r#"
            [model]
            operations = ["identity", "sep_conv_9x9"]
            "#,
        );
        assert!(matches!(result, Err(DartsError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_out_of_range_momentum() {
        let mut config = SearchConfig::default();
        config.training.momentum = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_nan_and_infinite_training_values() {
        assert!(SearchConfig::from_toml_str("[training]\nlearning_rate_min = nan\n").is_err());
        assert!(SearchConfig::from_toml_str("[training]\nweight_decay = nan\n").is_err());
        assert!(SearchConfig::from_toml_str("[training]\narch_weight_decay = nan\n").is_err());
        assert!(SearchConfig::from_toml_str("[training]\nlearning_rate = inf\n").is_err());
        assert!(SearchConfig::from_toml_str("[training]\ngrad_clip = inf\n").is_err());
        assert!(SearchConfig::from_toml_str("[training]\nmomentum = nan\n").is_err());

        let mut config = SearchConfig::default();
        config.training.weight_decay = f64::INFINITY;
        assert!(config.validate().is_err());
        config.training.weight_decay = 0.0;
        config.training.learning_rate_min = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_synthetic_split_must_fit() {
        let mut config = SearchConfig::synthetic_smoke();
        config.data.synthetic_samples = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_seed_records_seed() {
        let mut config = SearchConfig::default();
        let seed = config.resolve_seed();
        assert_eq!(config.training.seed, Some(seed));
        assert_eq!(config.resolve_seed(), seed);
        assert!(config.validate().is_ok());

        config.training.seed = Some(u64::MAX);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = SearchConfig::load_or_default(Path::new("/nonexistent/pc_darts.toml")).unwrap();
        assert_eq!(config, SearchConfig::default());
    }
}
