//! PC-DARTS CLI Module
//!
//! Command-line interface for running a search, deriving the final cell,
//! evaluating checkpoints and inspecting configurations.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::SearchConfig;
use crate::data::DataModule;
use crate::genotype::{derive_genotype, Genotype};
use crate::search::{ArchitectureWeights, OperationKind};
use crate::trainer::{Checkpoint, SearchModule, Trainer};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString    { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn row(key: &str, value: impl std::fmt::Display) {
    println!("  {:<22} {}", muted(key), value.to_string().white());
}

fn print_genotype(genotype: &Genotype) {
    for line in genotype.to_string().lines() {
        println!("    {}", line);
    }
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "pc-darts")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Partially-connected differentiable architecture search")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an architecture search
    Search {
        /// TOML configuration (built-in defaults if the file is missing)
        #[arg(short, long, default_value = "config/default.toml")]
        config: PathBuf,

        /// Override training.max_epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Override training.seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Resume from a checkpoint
        #[arg(short, long)]
        resume: Option<PathBuf>,
    },

    /// Derive the discrete cell from a checkpoint
    Derive {
        /// Checkpoint file
        #[arg(short, long)]
        checkpoint: PathBuf,

        /// Edges kept per node (defaults to the checkpoint's setting)
        #[arg(short = 'k', long)]
        edges_per_node: Option<usize>,

        /// Write the genotype as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Evaluate a checkpoint on the test split
    Test {
        /// Checkpoint file
        #[arg(long)]
        checkpoint: PathBuf,

        /// Take the data section from this config instead of the checkpoint's
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write the default configuration
    Init {
        /// Output file
        #[arg(short, long, default_value = "config/default.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show search-space and parameter counts for a configuration
    Info {
        /// TOML configuration
        #[arg(short, long, default_value = "config/default.toml")]
        config: PathBuf,
    },
}

// ─── Search ────────────────────────────────────────────────────────────────────

pub fn cmd_search(
    config_path: &Path,
    epochs: Option<usize>,
    seed: Option<u64>,
    resume: Option<&Path>,
) -> anyhow::Result<()> {
    section("Search");

    let checkpoint = resume
        .map(|path| {
            Checkpoint::load(path).with_context(|| format!("resuming from {}", path.display()))
        })
        .transpose()?;
    let mut config = match &checkpoint {
        Some(ckpt) => ckpt.config.clone(),
        None => SearchConfig::load_or_default(config_path)?,
    };
    if let Some(epochs) = epochs {
        config.training.max_epochs = epochs;
    }
    if let Some(seed) = seed {
        config.training.seed = Some(seed);
    }
    config.validate()?;
    let seed = config.resolve_seed();

    step_run("Preparing data");
    let start = Instant::now();
    let mut data = DataModule::new(config.data.clone(), seed);
    data.setup(config.model.num_classes)?;
    step_done(&format!("{:?}", start.elapsed()));
    let in_channels = data.in_channels()?;

    let (mut module, mut trainer) = match &checkpoint {
        Some(ckpt) => {
            let mut ckpt = ckpt.clone();
            ckpt.config = config.clone();
            let module = SearchModule::from_checkpoint(&ckpt, in_channels)?;
            let trainer = Trainer::new(&module).resume_from(&ckpt);
            step_ok(&format!("Resumed after epoch {}", ckpt.epoch));
            (module, trainer)
        }
        None => {
            let module = SearchModule::new(config.clone(), in_channels)?;
            let trainer = Trainer::new(&module);
            (module, trainer)
        }
    };

    row("Seed", seed);
    row("Weights", module.network().num_weight_params());
    row("Architecture params", module.network().num_arch_params());
    row("Epochs", config.training.max_epochs);
    println!();

    let start = Instant::now();
    let summary = trainer.fit(&mut module, &data)?;

    section("Result");
    match (summary.best_val_acc, summary.best_epoch) {
        (Some(acc), Some(epoch)) => row(
            "Best val acc",
            format!("{:.2}% (epoch {})", acc * 100.0, epoch + 1),
        ),
        (Some(acc), None) => row("Best val acc", format!("{:.2}%", acc * 100.0)),
        _ => row("Best val acc", "n/a"),
    }
    row("Steps", summary.global_step);
    row("Time", format!("{:.1}s", start.elapsed().as_secs_f64()));
    row("Logs", summary.log_dir.display());
    println!();
    println!("  {}", muted("Genotype"));
    print_genotype(&summary.genotype);
    println!();

    Ok(())
}

// ─── Derive ────────────────────────────────────────────────────────────────────

pub fn cmd_derive(
    checkpoint_path: &Path,
    edges_per_node: Option<usize>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    section("Derive");

    let ckpt = Checkpoint::load(checkpoint_path)?;
    let model = &ckpt.config.model;
    let weights = ArchitectureWeights::from_state(
        model.num_nodes,
        model.num_ops(),
        model.edge_normalization,
        &ckpt.state.architecture,
    )?;
    let k = edges_per_node.unwrap_or(model.edges_per_node);
    let genotype = derive_genotype(&weights, &model.operations, k)?;

    row("Checkpoint", checkpoint_path.display());
    row("Epoch", ckpt.epoch);
    if let Some(acc) = ckpt.val_acc {
        row("Val acc", format!("{:.2}%", acc * 100.0));
    }
    row("Edges per node", k);
    println!();
    print_genotype(&genotype);

    let counts: Vec<String> = genotype
        .op_counts()
        .iter()
        .map(|(op, n)| format!("{} x{}", op, n))
        .collect();
    println!();
    row("Operations", counts.join(", "));

    if let Some(path) = output {
        std::fs::write(path, genotype.to_json()?)
            .with_context(|| format!("writing {}", path.display()))?;
        step_ok(&format!("Saved genotype to {}", path.display()));
    }
    println!();
    Ok(())
}

// ─── Test ──────────────────────────────────────────────────────────────────────

pub fn cmd_test(checkpoint_path: &Path, config_path: Option<&Path>) -> anyhow::Result<()> {
    section("Test");

    let mut ckpt = Checkpoint::load(checkpoint_path)?;
    if let Some(path) = config_path {
        ckpt.config.data = SearchConfig::from_file(path)?.data;
    }
    let seed = ckpt.config.training.seed.unwrap_or_default();

    step_run("Loading data");
    let start = Instant::now();
    let mut data = DataModule::new(ckpt.config.data.clone(), seed);
    data.setup(ckpt.config.model.num_classes)?;
    step_done(&format!("{:?}", start.elapsed()));

    let mut module = SearchModule::from_checkpoint(&ckpt, data.in_channels()?)?;
    step_run("Evaluating");
    let start = Instant::now();
    let result = Trainer::new(&module).test(&mut module, &data)?;
    step_done(&format!("{:?}", start.elapsed()));

    println!();
    row("Samples", result.samples);
    row("Loss", format!("{:.4}", result.loss));
    println!(
        "  {:<22} {}",
        muted("Accuracy"),
        format!("{:.2}%", result.accuracy * 100.0).white().bold()
    );
    println!();
    Ok(())
}

// ─── Init ──────────────────────────────────────────────────────────────────────

pub fn cmd_init(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let text = SearchConfig::default().to_toml_string()?;
    std::fs::write(output, text).with_context(|| format!("writing {}", output.display()))?;
    step_ok(&format!("Wrote default configuration to {}", output.display()));
    Ok(())
}

// ─── Info ──────────────────────────────────────────────────────────────────────

pub fn cmd_info(config_path: &Path) -> anyhow::Result<()> {
    section("Search Space");

    let config = SearchConfig::load_or_default(config_path)?;
    let model = &config.model;
    let module = SearchModule::new(config.clone(), 3)?;
    let network = module.network();
    let edges = network.arch().num_edges();

    row("Config", config_path.display());
    row("Nodes per cell", model.num_nodes);
    row("Cells", network.num_cells());
    row("Cell channels", model.cell_channels());
    let sampled = model.cell_channels() / model.partial_channels;
    row("Sampled channels", format!("{} (1/{})", sampled, model.partial_channels));
    row("Edges per cell", edges);
    row("Edge normalization", model.edge_normalization);
    println!();

    let ops: Vec<&str> = model.operations.iter().map(OperationKind::name).collect();
    row("Operations", ops.join(", "));
    row(
        "Mixed-op configurations",
        format!("10^{:.1}", edges as f64 * (model.num_ops() as f64).log10()),
    );
    let cells = log10_discrete_cells(
        model.num_nodes,
        nonzero_ops(&model.operations),
        model.edges_per_node,
    );
    row("Discrete cells", format!("10^{:.1}", cells));
    println!();

    row("Weight parameters", network.num_weight_params());
    row("Architecture parameters", network.num_arch_params());
    println!();
    Ok(())
}

fn nonzero_ops(operations: &[OperationKind]) -> usize {
    operations.iter().filter(|op| **op != OperationKind::Zero).count()
}

/// log10 of the number of genotypes: per node, choose k inputs and an op for each
fn log10_discrete_cells(num_nodes: usize, ops: usize, k: usize) -> f64 {
    (0..num_nodes)
        .map(|node| {
            let inputs = ArchitectureWeights::inputs_of(node);
            let kept = k.min(inputs);
            log10_binomial(inputs, kept) + kept as f64 * (ops as f64).log10()
        })
        .sum()
}

fn log10_binomial(n: usize, k: usize) -> f64 {
    (0..k)
        .map(|i| ((n - i) as f64).log10() - ((i + 1) as f64).log10())
        .sum()
}
