//! Network, architecture and optimizers bundled for the fit loop

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use super::checkpoint::Checkpoint;
use crate::config::SearchConfig;
use crate::data::Batch;
use crate::error::Result;
use crate::genotype::{derive_genotype, Genotype};
use crate::nn::loss::{accuracy, cross_entropy};
use crate::optim::{BiLevelOptimizer, StepOutput};
use crate::search::SearchNetwork;

/// The searchable model together with its bi-level optimizer
#[derive(Debug, Clone)]
pub struct SearchModule {
    config: SearchConfig,
    network: SearchNetwork,
    optimizer: BiLevelOptimizer,
    rng: Xoshiro256PlusPlus,
}

impl SearchModule {
    /// Build a fresh module; a missing seed is drawn and recorded in the config
    pub fn new(mut config: SearchConfig, in_channels: usize) -> Result<Self> {
        config.validate()?;
        let seed = config.resolve_seed();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let network = SearchNetwork::new(&config.model, in_channels, &mut rng)?;
        let optimizer = Self::configure_optimizers(&config);

        tracing::info!(
            seed,
            weights = network.num_weight_params(),
            arch = network.num_arch_params(),
            edges = network.arch().num_edges(),
            "Created search module"
        );
        Ok(Self {
            config,
            network,
            optimizer,
            rng,
        })
    }

    /// Rebuild a module from a checkpoint.
    ///
    /// Weights, statistics, alphas and betas are restored; optimizer state
    /// starts fresh.
    pub fn from_checkpoint(checkpoint: &Checkpoint, in_channels: usize) -> Result<Self> {
        let mut module = Self::new(checkpoint.config.clone(), in_channels)?;
        module.network.load_state(&checkpoint.state)?;
        // Continue the stream instead of replaying the first epochs
        module.rng = Xoshiro256PlusPlus::seed_from_u64(
            module.seed().wrapping_add(checkpoint.global_step),
        );
        Ok(module)
    }

    /// SGD with cosine annealing for the weights, Adam for the architecture
    pub fn configure_optimizers(config: &SearchConfig) -> BiLevelOptimizer {
        BiLevelOptimizer::new(&config.training)
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.config.training.seed.unwrap_or_default()
    }

    pub fn network(&self) -> &SearchNetwork {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut SearchNetwork {
        &mut self.network
    }

    pub fn optimizer(&self) -> &BiLevelOptimizer {
        &self.optimizer
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn on_epoch_start(&mut self, epoch: usize) {
        self.optimizer.set_epoch(epoch);
    }

    /// One bi-level step on a training batch and a validation batch
    pub fn training_step(&mut self, train: &Batch, val: &Batch, epoch: usize) -> Result<StepOutput> {
        self.optimizer
            .step(&mut self.network, train, val, epoch, &mut self.rng)
    }

    /// Loss and accuracy in evaluation mode
    pub fn validation_step(&mut self, batch: &Batch) -> Result<(f64, f64)> {
        self.network.eval_mode();
        let logits = self.network.forward(&batch.images)?;
        let (loss, _) = cross_entropy(&logits, &batch.labels)?;
        Ok((loss, accuracy(&logits, &batch.labels)))
    }

    pub fn genotype(&self) -> Result<Genotype> {
        derive_genotype(
            self.network.arch(),
            self.network.operations(),
            self.config.model.edges_per_node,
        )
    }

    pub fn checkpoint(&self, epoch: usize, global_step: u64, val_acc: Option<f64>) -> Result<Checkpoint> {
        Ok(Checkpoint {
            epoch,
            global_step,
            val_acc,
            config: self.config.clone(),
            state: self.network.state(),
            genotype: self.genotype()?,
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}
