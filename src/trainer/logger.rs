//! Versioned run directories with JSON-lines metric logs

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::SearchConfig;
use crate::error::Result;
use crate::genotype::Genotype;

/// One scalar metric observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub epoch: usize,
    pub step: u64,
    pub name: String,
    pub value: f64,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenotypeRecord {
    epoch: usize,
    genotype: Genotype,
    timestamp: String,
}

/// Writes `log_dir/experiment_name/version_N/` for one run:
/// `hparams.toml`, `metrics.jsonl`, `genotypes.jsonl` and `checkpoints/`
#[derive(Debug)]
pub struct MetricsLogger {
    dir: PathBuf,
    version: usize,
    metrics: BufWriter<File>,
    genotypes: BufWriter<File>,
}

impl MetricsLogger {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let base = config.logging.log_dir.join(&config.logging.experiment_name);
        fs::create_dir_all(&base)?;
        let version = next_version(&base)?;
        let dir = base.join(format!("version_{}", version));
        fs::create_dir_all(dir.join("checkpoints"))?;

        fs::write(dir.join("hparams.toml"), config.to_toml_string()?)?;
        let metrics = BufWriter::new(append(&dir.join("metrics.jsonl"))?);
        let genotypes = BufWriter::new(append(&dir.join("genotypes.jsonl"))?);

        tracing::info!(dir = %dir.display(), "Logging run");
        Ok(Self {
            dir,
            version,
            metrics,
            genotypes,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn version(&self) -> usize {
        self.version
    }

    pub fn log_metric(&mut self, epoch: usize, step: u64, name: &str, value: f64) -> Result<()> {
        let record = MetricRecord {
            epoch,
            step,
            name: name.to_string(),
            value,
            timestamp: Utc::now().to_rfc3339(),
        };
        serde_json::to_writer(&mut self.metrics, &record)?;
        self.metrics.write_all(b"\n")?;
        Ok(())
    }

    pub fn log_metrics(&mut self, epoch: usize, step: u64, metrics: &[(&str, f64)]) -> Result<()> {
        for &(name, value) in metrics {
            self.log_metric(epoch, step, name, value)?;
        }
        Ok(())
    }

    pub fn log_genotype(&mut self, epoch: usize, genotype: &Genotype) -> Result<()> {
        let record = GenotypeRecord {
            epoch,
            genotype: genotype.clone(),
            timestamp: Utc::now().to_rfc3339(),
        };
        serde_json::to_writer(&mut self.genotypes, &record)?;
        self.genotypes.write_all(b"\n")?;
        self.genotypes.flush()?;
        Ok(())
    }

    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.dir.join("checkpoints").join(format!("epoch={}.json", epoch))
    }

    pub fn best_checkpoint_path(&self) -> PathBuf {
        self.dir.join("checkpoints").join("best.json")
    }

    pub fn flush(&mut self) -> Result<()> {
        self.metrics.flush()?;
        self.genotypes.flush()?;
        Ok(())
    }
}

impl Drop for MetricsLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "Failed to flush metric logs");
        }
    }
}

fn append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// First unused `version_N` under `base`
fn next_version(base: &Path) -> Result<usize> {
    let mut next = 0;
    for entry in fs::read_dir(base)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if let Some(n) = name
            .to_str()
            .and_then(|s| s.strip_prefix("version_"))
            .and_then(|s| s.parse::<usize>().ok())
        {
            next = next.max(n + 1);
        }
    }
    Ok(next)
}

/// Read back a `metrics.jsonl` file
pub fn read_metrics(path: &Path) -> Result<Vec<MetricRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            records.push(serde_json::from_str(&line)?);
        }
    }
    Ok(records)
}
