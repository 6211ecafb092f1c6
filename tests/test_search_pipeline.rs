//! Integration test: search pipeline end-to-end on synthetic images

use pc_darts::config::SearchConfig;
use pc_darts::data::DataModule;
use pc_darts::genotype::derive_genotype;
use pc_darts::search::ArchitectureWeights;
use pc_darts::trainer::{read_metrics, Checkpoint, SearchModule, Trainer};
use tempfile::TempDir;

fn smoke_config(log_dir: &TempDir) -> SearchConfig {
    let mut config = SearchConfig::synthetic_smoke();
    config.logging.log_dir = log_dir.path().to_path_buf();
    config.logging.experiment_name = "smoke".to_string();
    config
}

fn data_for(config: &SearchConfig) -> DataModule {
    let seed = config.training.seed.unwrap_or_default();
    let mut data = DataModule::new(config.data.clone(), seed);
    data.setup(config.model.num_classes).unwrap();
    data
}

#[test]
fn test_search_runs_and_logs() {
    let dir = TempDir::new().unwrap();
    let config = smoke_config(&dir);
    let data = data_for(&config);

    let mut module = SearchModule::new(config.clone(), data.in_channels().unwrap()).unwrap();
    let initial_arch = module.network().arch().state();
    let mut trainer = Trainer::new(&module).with_progress(false);
    let summary = trainer.fit(&mut module, &data).unwrap();

    // 32 training samples in batches of 8 for two epochs
    assert_eq!(summary.history.len(), 2);
    assert_eq!(summary.global_step, 8);
    assert!(!summary.history[0].arch_updated, "warmup epoch must not touch the architecture");
    assert!(summary.history[1].arch_updated);
    for epoch in &summary.history {
        assert!(epoch.train_loss.is_finite());
        assert!((0.0..=1.0).contains(&epoch.val_acc));
    }
    assert!(summary.history[1].learning_rate < summary.history[0].learning_rate);

    // Genotype: node0 has 2 inputs, node1 has 3, two edges kept each
    assert_eq!(summary.genotype.nodes.len(), 2);
    assert_eq!(summary.genotype.num_edges(), 4);
    assert_eq!(summary.genotype.concat, vec![3]);

    let log_dir = &summary.log_dir;
    assert!(log_dir.ends_with("smoke/version_0"));
    assert!(log_dir.join("hparams.toml").exists());
    let hparams = SearchConfig::from_file(&log_dir.join("hparams.toml")).unwrap();
    assert_eq!(hparams.training.seed, Some(7));

    let metrics = read_metrics(&log_dir.join("metrics.jsonl")).unwrap();
    assert!(metrics.iter().any(|m| m.name == "val_acc"));
    assert_eq!(metrics.iter().filter(|m| m.name == "train_loss").count(), 8);
    assert_eq!(metrics.iter().filter(|m| m.name == "arch_val_loss").count(), 4);

    let genotypes = std::fs::read_to_string(log_dir.join("genotypes.jsonl")).unwrap();
    assert_eq!(genotypes.lines().count(), 2);

    // Periodic checkpoints carry the completed epoch count
    let first = Checkpoint::load(&log_dir.join("checkpoints/epoch=0.json")).unwrap();
    let second = Checkpoint::load(&log_dir.join("checkpoints/epoch=1.json")).unwrap();
    assert_eq!(first.epoch, 1);
    assert_eq!(second.epoch, 2);
    assert_eq!(second.global_step, 8);
    assert_eq!(first.state.architecture, initial_arch);
    assert_ne!(second.state.architecture, initial_arch);

    let best = Checkpoint::load(&log_dir.join("checkpoints/best.json")).unwrap();
    assert_eq!(best.val_acc, summary.best_val_acc);
}

#[test]
fn test_checkpoint_derives_same_genotype() {
    let dir = TempDir::new().unwrap();
    let config = smoke_config(&dir);
    let data = data_for(&config);

    let mut module = SearchModule::new(config, data.in_channels().unwrap()).unwrap();
    let summary = Trainer::new(&module)
        .with_progress(false)
        .fit(&mut module, &data)
        .unwrap();

    let ckpt = Checkpoint::load(&summary.log_dir.join("checkpoints/epoch=1.json")).unwrap();
    let model = &ckpt.config.model;
    let weights = ArchitectureWeights::from_state(
        model.num_nodes,
        model.num_ops(),
        model.edge_normalization,
        &ckpt.state.architecture,
    )
    .unwrap();
    let derived = derive_genotype(&weights, &model.operations, model.edges_per_node).unwrap();

    let ops = |g: &pc_darts::genotype::Genotype| -> Vec<(usize, String)> {
        g.nodes
            .iter()
            .flatten()
            .map(|e| (e.input, e.op.to_string()))
            .collect()
    };
    assert_eq!(ops(&derived), ops(&summary.genotype));
    assert_eq!(ops(&derived), ops(&ckpt.genotype));
}

#[test]
fn test_resume_continues_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    let config = smoke_config(&dir);
    let data = data_for(&config);
    let in_channels = data.in_channels().unwrap();

    let mut module = SearchModule::new(config, in_channels).unwrap();
    let first_run = Trainer::new(&module)
        .with_progress(false)
        .fit(&mut module, &data)
        .unwrap();

    let ckpt = Checkpoint::load(&first_run.log_dir.join("checkpoints/epoch=0.json")).unwrap();
    let mut resumed = SearchModule::from_checkpoint(&ckpt, in_channels).unwrap();
    assert_eq!(resumed.network().state(), ckpt.state);

    let mut trainer = Trainer::new(&resumed).with_progress(false).resume_from(&ckpt);
    let summary = trainer.fit(&mut resumed, &data).unwrap();

    // Only the second epoch is left
    assert_eq!(summary.history.len(), 1);
    assert_eq!(summary.history[0].epoch, 1);
    assert!(summary.history[0].arch_updated);
    assert_eq!(summary.global_step, 8);
    assert!(summary.log_dir.ends_with("smoke/version_1"));

    // The new run directory always has a best checkpoint, even without improvement
    let best = Checkpoint::load(&summary.log_dir.join("checkpoints/best.json")).unwrap();
    assert_eq!(best.val_acc, summary.best_val_acc);
    assert!(best.val_acc >= ckpt.val_acc);
}

#[test]
fn test_same_seed_same_search() {
    let run = || {
        let dir = TempDir::new().unwrap();
        let config = smoke_config(&dir);
        let data = data_for(&config);
        let mut module = SearchModule::new(config, data.in_channels().unwrap()).unwrap();
        let summary = Trainer::new(&module)
            .with_progress(false)
            .fit(&mut module, &data)
            .unwrap();
        (summary, module.network().state())
    };

    let (a, state_a) = run();
    let (b, state_b) = run();
    assert_eq!(a.history, b.history);
    assert_eq!(a.genotype, b.genotype);
    assert_eq!(a.best_val_acc, b.best_val_acc);
    assert_eq!(state_a, state_b);
}

#[test]
fn test_held_out_evaluation() {
    let dir = TempDir::new().unwrap();
    let mut config = smoke_config(&dir);
    config.training.max_epochs = 1;
    let data = data_for(&config);

    let mut module = SearchModule::new(config, data.in_channels().unwrap()).unwrap();
    let trainer = Trainer::new(&module).with_progress(false);
    let result = trainer.test(&mut module, &data).unwrap();

    // Synthetic test split holds a quarter of the samples plus one
    assert_eq!(result.samples, 17);
    assert!(result.loss.is_finite());
    assert!((0.0..=1.0).contains(&result.accuracy));
}

#[test]
fn test_limit_train_batches() {
    let dir = TempDir::new().unwrap();
    let mut config = smoke_config(&dir);
    config.training.max_epochs = 1;
    config.training.limit_train_batches = Some(2);
    config.logging.checkpoint_every = 0;
    let data = data_for(&config);

    let mut module = SearchModule::new(config, data.in_channels().unwrap()).unwrap();
    let summary = Trainer::new(&module)
        .with_progress(false)
        .fit(&mut module, &data)
        .unwrap();

    assert_eq!(summary.global_step, 2);
    let checkpoints = summary.log_dir.join("checkpoints");
    assert!(checkpoints.join("best.json").exists());
    assert!(!checkpoints.join("epoch=0.json").exists());
}
