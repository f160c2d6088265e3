use criterion::measurement::Measurement;
use criterion::{criterion_group, criterion_main, BenchmarkGroup, BenchmarkId, Criterion};
use ndarray::Array1;
use pca_exp::batch::Batch;
use pca_exp::synth::{KuboToyabe, NoiseSpec, ParamSpec};
use pca_exp::{Rebinner, StoppingRule};
use std::time::Duration;

#[derive(Clone)]
pub struct RebinConfig {
    seed: u64,
    shapes: Vec<(usize, usize)>,
    measurement_time: u64,
    sample_size: usize,
}

impl Default for RebinConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            shapes: vec![(300, 11), (1000, 50), (2000, 200), (5000, 500)],
            measurement_time: 10,
            sample_size: 10,
        }
    }
}

fn create_test_batch(n_t: usize, n_samples: usize, seed: u64) -> anyhow::Result<Batch> {
    let t = Array1::<f64>::linspace(0.0, 12.0, n_t);
    let noise = t.mapv(|ti| 0.002 * ((0.2 * ti).exp() + 0.001));
    let generated = KuboToyabe::new(t, 0.26, 0.0)
        .sigma(ParamSpec::Range(0.1, 0.5))
        .lambda(ParamSpec::Range(0.1, 0.5))
        .noise(NoiseSpec::PerTime(noise))
        .n_samples(n_samples)
        .seed(seed)
        .generate()?;
    Ok(Batch::new(generated.data))
}

fn configure_group<'a, M: Measurement>(
    c: &'a mut Criterion<M>,
    name: &str,
    config: &RebinConfig,
) -> BenchmarkGroup<'a, M> {
    let mut group = c.benchmark_group(name);
    group.measurement_time(Duration::from_secs(config.measurement_time));
    group.sample_size(config.sample_size);
    group
}

pub fn bench_rebin_rules(c: &mut Criterion) {
    let config = RebinConfig::default();
    let mut group = configure_group(c, "Rebin_Stopping_Rules", &config);

    for &(n_t, n_samples) in config.shapes.iter() {
        let seed = config.seed + (n_t * n_samples) as u64;
        let batch = create_test_batch(n_t, n_samples, seed).unwrap();

        for (label, rule) in [
            ("inverse_variance_sum", StoppingRule::InverseVarianceSum),
            ("squared_width", StoppingRule::SquaredWidthOverVariance),
        ] {
            let rebinner = Rebinner::new(rule);
            group.bench_with_input(
                BenchmarkId::new(label, format!("{}x{}", n_t, n_samples)),
                &(n_t, n_samples),
                |b, _| {
                    b.iter(|| rebinner.rebin(&[&batch]).unwrap());
                },
            );
        }
    }
    group.finish();
}

criterion_group!(rebin_benches, bench_rebin_rules);
criterion_main!(rebin_benches);
