use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pc_darts::config::SearchConfig;
use pc_darts::data::Batch;
use pc_darts::nn::Tensor;
use pc_darts::optim::BiLevelOptimizer;
use pc_darts::search::SearchNetwork;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

fn create_batch(batch_size: usize, image_size: usize, num_classes: usize, rng: &mut impl Rng) -> Batch {
    let images = Tensor::from_shape_fn((batch_size, 3, image_size, image_size), |_| {
        rng.gen::<f64>() * 2.0 - 1.0
    });
    let labels = (0..batch_size).map(|_| rng.gen_range(0..num_classes)).collect();
    Batch { images, labels }
}

fn bench_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("network");
    group.sample_size(10);

    for k in [1usize, 2, 4] {
        let mut config = SearchConfig::synthetic_smoke();
        config.model.partial_channels = k;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let mut network = SearchNetwork::new(&config.model, 3, &mut rng).unwrap();
        network.resample_channels(&mut rng);
        let batch = create_batch(16, 8, config.model.num_classes, &mut rng);

        group.bench_with_input(BenchmarkId::new("forward", k), &batch, |b, batch| {
            b.iter(|| network.forward(black_box(&batch.images)).unwrap())
        });
    }

    group.finish();
}

fn bench_search_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_step");
    group.sample_size(10);

    for unrolled in [false, true] {
        let mut config = SearchConfig::synthetic_smoke();
        config.training.unrolled = unrolled;
        config.training.arch_warmup_epochs = 0;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut network = SearchNetwork::new(&config.model, 3, &mut rng).unwrap();
        let mut optimizer = BiLevelOptimizer::new(&config.training);
        let train = create_batch(8, 8, config.model.num_classes, &mut rng);
        let val = create_batch(8, 8, config.model.num_classes, &mut rng);

        let name = if unrolled { "second_order" } else { "first_order" };
        group.bench_function(name, |b| {
            b.iter(|| {
                optimizer
                    .step(&mut network, black_box(&train), black_box(&val), 0, &mut rng)
                    .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_forward, bench_search_step);
criterion_main!(benches);
