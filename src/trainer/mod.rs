//! Search loop: epochs of bi-level steps, validation, logging and checkpoints

mod checkpoint;
mod logger;
mod module;

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::{Batch, BatchIter, DataLoader, DataModule};
use crate::error::{DartsError, Result};
use crate::genotype::Genotype;

pub use checkpoint::Checkpoint;
pub use logger::{read_metrics, MetricRecord, MetricsLogger};
pub use module::SearchModule;

/// Averages over one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f64,
    pub train_acc: f64,
    pub val_loss: f64,
    pub val_acc: f64,
    pub arch_updated: bool,
}

/// Loss and accuracy over a whole split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

/// Result of [`Trainer::fit`]
#[derive(Debug, Clone)]
pub struct FitSummary {
    pub history: Vec<EpochSummary>,
    pub global_step: u64,
    pub best_val_acc: Option<f64>,
    pub best_epoch: Option<usize>,
    pub genotype: Genotype,
    pub log_dir: PathBuf,
}

/// Drives a [`SearchModule`] over a [`DataModule`]
#[derive(Debug, Clone)]
pub struct Trainer {
    max_epochs: usize,
    limit_train_batches: Option<usize>,
    checkpoint_every: usize,
    start_epoch: usize,
    global_step: u64,
    best_val_acc: Option<f64>,
    /// Seeds `best.json` of a resumed run
    resumed: Option<Checkpoint>,
    progress: bool,
}

impl Trainer {
    pub fn new(module: &SearchModule) -> Self {
        let config = module.config();
        Self {
            max_epochs: config.training.max_epochs,
            limit_train_batches: config.training.limit_train_batches,
            checkpoint_every: config.logging.checkpoint_every,
            start_epoch: 0,
            global_step: 0,
            best_val_acc: None,
            resumed: None,
            progress: true,
        }
    }

    /// Print colored per-epoch lines to stdout
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Continue counting epochs and steps from a checkpoint
    pub fn resume_from(mut self, checkpoint: &Checkpoint) -> Self {
        self.start_epoch = checkpoint.epoch;
        self.global_step = checkpoint.global_step;
        self.best_val_acc = checkpoint.val_acc;
        self.resumed = Some(checkpoint.clone());
        self
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn fit(&mut self, module: &mut SearchModule, data: &DataModule) -> Result<FitSummary> {
        let mut logger = MetricsLogger::new(module.config())?;
        let train_loader = data.train_loader()?;
        let val_loader = data.val_loader()?;
        let val_eval_loader = data.val_eval_loader()?;
        if train_loader.is_empty() || val_loader.is_empty() {
            return Err(DartsError::DataError("train and val splits must not be empty".into()));
        }

        tracing::info!(
            epochs = self.max_epochs,
            start_epoch = self.start_epoch,
            train_batches = train_loader.len(),
            val_batches = val_loader.len(),
            "Starting search"
        );

        // The resumed checkpoint is the best so far until an epoch beats it
        if let Some(ckpt) = &self.resumed {
            ckpt.save(&logger.best_checkpoint_path())?;
        }

        let mut history = Vec::new();
        let mut best_epoch = None;
        let mut genotype = module.genotype()?;

        for epoch in self.start_epoch..self.max_epochs {
            module.on_epoch_start(epoch);
            let learning_rate = module.learning_rate();
            let mut val_batches = CyclingBatches::new(&val_loader, epoch as u64);

            let mut loss_sum = 0.0;
            let mut correct = 0.0;
            let mut seen = 0usize;
            let mut arch_updated = false;
            let limit = self.limit_train_batches.unwrap_or(usize::MAX);

            for train in train_loader.iter(epoch as u64).take(limit) {
                let train = train?;
                let val = val_batches.next_batch()?;
                let out = module.training_step(&train, &val, epoch)?;
                self.global_step += 1;

                let n = train.len() as f64;
                loss_sum += out.train_loss * n;
                correct += out.train_acc * n;
                seen += train.len();
                arch_updated |= out.arch_updated();

                logger.log_metrics(
                    epoch,
                    self.global_step,
                    &[("train_loss", out.train_loss), ("train_acc", out.train_acc)],
                )?;
                if let Some(arch_loss) = out.val_loss {
                    logger.log_metric(epoch, self.global_step, "arch_val_loss", arch_loss)?;
                }
                tracing::debug!(
                    epoch,
                    step = self.global_step,
                    loss = out.train_loss,
                    grad_norm = out.grad_norm,
                    "Search step"
                );
            }

            if seen == 0 {
                return Err(DartsError::TrainingError(format!("epoch {} saw no batches", epoch)));
            }
            let eval = evaluate(module, &val_eval_loader)?;
            let summary = EpochSummary {
                epoch,
                learning_rate,
                train_loss: loss_sum / seen as f64,
                train_acc: correct / seen as f64,
                val_loss: eval.loss,
                val_acc: eval.accuracy,
                arch_updated,
            };
            logger.log_metrics(
                epoch,
                self.global_step,
                &[
                    ("train_loss_epoch", summary.train_loss),
                    ("train_acc_epoch", summary.train_acc),
                    ("val_loss", summary.val_loss),
                    ("val_acc", summary.val_acc),
                    ("lr", learning_rate),
                ],
            )?;
            logger.flush()?;

            genotype = module.genotype()?;
            logger.log_genotype(epoch, &genotype)?;
            let compact = genotype.to_string().replace('\n', "; ");
            tracing::info!(
                epoch,
                train_loss = summary.train_loss,
                val_acc = summary.val_acc,
                genotype = %compact,
                "Epoch finished"
            );

            let completed = epoch + 1;
            let is_best = self.best_val_acc.map_or(true, |best| summary.val_acc > best);
            if is_best {
                self.best_val_acc = Some(summary.val_acc);
                best_epoch = Some(epoch);
            }
            let wants_periodic = self.checkpoint_every > 0 && completed % self.checkpoint_every == 0;
            if wants_periodic || is_best {
                let ckpt = module.checkpoint(completed, self.global_step, Some(summary.val_acc))?;
                if wants_periodic {
                    ckpt.save(&logger.checkpoint_path(epoch))?;
                }
                if is_best {
                    ckpt.save(&logger.best_checkpoint_path())?;
                }
            }

            if self.progress {
                print_epoch(&summary, self.max_epochs, is_best);
            }
            history.push(summary);
        }

        logger.flush()?;
        Ok(FitSummary {
            history,
            global_step: self.global_step,
            best_val_acc: self.best_val_acc,
            best_epoch,
            genotype,
            log_dir: logger.dir().to_path_buf(),
        })
    }

    /// Evaluate on the held-out test split
    pub fn test(&self, module: &mut SearchModule, data: &DataModule) -> Result<EvalResult> {
        let result = evaluate(module, &data.test_loader()?)?;
        tracing::info!(loss = result.loss, accuracy = result.accuracy, "Test finished");
        Ok(result)
    }
}

/// Sample-weighted loss and accuracy over every batch of a loader
pub fn evaluate(module: &mut SearchModule, loader: &DataLoader) -> Result<EvalResult> {
    let mut loss_sum = 0.0;
    let mut correct = 0.0;
    let mut samples = 0usize;
    for batch in loader.iter(0) {
        let batch = batch?;
        let (loss, acc) = module.validation_step(&batch)?;
        loss_sum += loss * batch.len() as f64;
        correct += acc * batch.len() as f64;
        samples += batch.len();
    }
    module.network_mut().train_mode();
    if samples == 0 {
        return Err(DartsError::DataError("evaluation split is empty".into()));
    }
    Ok(EvalResult {
        loss: loss_sum / samples as f64,
        accuracy: correct / samples as f64,
        samples,
    })
}

/// Validation batches that restart with a fresh shuffle when exhausted
struct CyclingBatches<'a> {
    loader: &'a DataLoader,
    epoch: u64,
    cycle: u64,
    iter: BatchIter<'a>,
}

impl<'a> CyclingBatches<'a> {
    fn new(loader: &'a DataLoader, epoch: u64) -> Self {
        Self {
            loader,
            epoch,
            cycle: 0,
            iter: loader.iter(Self::key(epoch, 0)),
        }
    }

    fn key(epoch: u64, cycle: u64) -> u64 {
        (epoch << 20) | cycle
    }

    fn next_batch(&mut self) -> Result<Batch> {
        if let Some(batch) = self.iter.next() {
            return batch;
        }
        self.cycle += 1;
        self.iter = self.loader.iter(Self::key(self.epoch, self.cycle));
        self.iter
            .next()
            .unwrap_or_else(|| Err(DartsError::DataError("validation loader is empty".into())))
    }
}

fn print_epoch(summary: &EpochSummary, max_epochs: usize, is_best: bool) {
    let marker = if is_best { " *".green().bold().to_string() } else { String::new() };
    let arch = if summary.arch_updated { "arch".cyan() } else { "warmup".yellow() };
    println!(
        "{} {:>3}/{:<3} {} lr {:.4}  train {:.4} / {:.1}%  val {:.4} / {:.1}%{}",
        "epoch".bold(),
        summary.epoch + 1,
        max_epochs,
        arch,
        summary.learning_rate,
        summary.train_loss,
        summary.train_acc * 100.0,
        summary.val_loss,
        summary.val_acc * 100.0,
        marker
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::data::{Dataset, SyntheticImages, Transform};
    use std::sync::Arc;

    #[test]
    fn test_cycling_batches_restart() {
        let data: Arc<dyn Dataset> = Arc::new(SyntheticImages::new(5, 2, 4, 0).unwrap());
        let transform = Transform::normalize(&[0.5; 3], &[0.25; 3]).unwrap();
        let loader = DataLoader::new(data, (0..5).collect(), 2, transform)
            .unwrap()
            .with_shuffle(true, 1);
        let mut cycling = CyclingBatches::new(&loader, 0);
        let sizes: Vec<usize> = (0..7).map(|_| cycling.next_batch().unwrap().len()).collect();
        assert_eq!(sizes, vec![2, 2, 1, 2, 2, 1, 2]);
        assert_eq!(cycling.cycle, 2);
    }

    #[test]
    fn test_evaluate_restores_train_mode() {
        let config = SearchConfig::synthetic_smoke();
        let mut module = SearchModule::new(config.clone(), 3).unwrap();
        let mut dm = DataModule::new(config.data.clone(), 7);
        dm.setup(config.model.num_classes).unwrap();

        let result = evaluate(&mut module, &dm.val_eval_loader().unwrap()).unwrap();
        assert_eq!(result.samples, 16);
        assert!(module.network().is_training());
    }
}
