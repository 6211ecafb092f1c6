//! JSON checkpoints of a search run

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::config::SearchConfig;
use crate::error::{DartsError, Result};
use crate::genotype::Genotype;
use crate::search::NetworkState;

/// Everything needed to resume a search or inspect its result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Number of completed epochs
    pub epoch: usize,
    pub global_step: u64,
    pub val_acc: Option<f64>,
    pub config: SearchConfig,
    /// Weights, running statistics, alphas and betas
    pub state: NetworkState,
    pub genotype: Genotype,
    /// RFC3339 creation time
    pub created_at: String,
}

impl Checkpoint {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)?;
        fs::write(path, json).map_err(|e| {
            DartsError::CheckpointError(format!("failed to write {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), epoch = self.epoch, "Saved checkpoint");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DartsError::CheckpointError(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            DartsError::CheckpointError(format!("invalid checkpoint {}: {}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotype::derive_genotype;
    use crate::search::SearchNetwork;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    use tempfile::TempDir;

    fn checkpoint() -> (Checkpoint, SearchNetwork) {
        let config = SearchConfig::synthetic_smoke();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let network = SearchNetwork::new(&config.model, 3, &mut rng).unwrap();
        let genotype = derive_genotype(network.arch(), network.operations(), 2).unwrap();
        let ckpt = Checkpoint {
            epoch: 3,
            global_step: 12,
            val_acc: Some(0.25),
            config,
            state: network.state(),
            genotype,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        (ckpt, network)
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("epoch=3.json");
        let (ckpt, network) = checkpoint();
        ckpt.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.epoch, 3);
        assert_eq!(loaded.global_step, 12);
        assert_eq!(loaded.config.model, ckpt.config.model);
        assert_eq!(loaded.genotype.nodes.len(), 2);

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(99);
        let mut restored = SearchNetwork::new(&loaded.config.model, 3, &mut rng).unwrap();
        restored.load_state(&loaded.state).unwrap();
        let diff: f64 = restored
            .weight_values()
            .iter()
            .zip(network.weight_values())
            .map(|(a, b)| (a - &b).mapv(f64::abs).sum())
            .sum();
        assert!(diff < 1e-9);
    }

    #[test]
    fn test_load_garbage_is_checkpoint_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Checkpoint::load(&path),
            Err(DartsError::CheckpointError(_))
        ));
        assert!(Checkpoint::load(&dir.path().join("missing.json")).is_err());
    }
}
