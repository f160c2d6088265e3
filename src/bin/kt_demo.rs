use anyhow::Context;
use log::info;
use ndarray::{array, s, Array1};

use pca_exp::display::scree_chart;
use pca_exp::synth::{KuboToyabe, NoiseSpec, ParamSpec};
use pca_exp::{BatchStore, DataPreparer, PcaEngine, PrepareOptions};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let t = Array1::<f64>::linspace(0.0, 12.0, 300);
    let sigma = array![0.08, 0.09, 0.1, 0.11, 0.12, 0.13, 0.13, 0.13, 0.13, 0.13, 0.13];
    let lambda = array![0.07, 0.07, 0.07, 0.07, 0.07, 0.05, 0.045, 0.04, 0.035, 0.03, 0.025];
    let temperature = Array1::<f64>::linspace(0.5, 1.5, sigma.len());
    let noise = t.mapv(|ti| 0.002 * ((0.2 * ti).exp() + 0.001));

    let generated = KuboToyabe::new(t, 0.26, 0.0)
        .sigma(ParamSpec::Values(sigma))
        .lambda(ParamSpec::Values(lambda))
        .noise(NoiseSpec::PerTime(noise))
        .seed(2024)
        .generate()
        .context("generating Kubo-Toyabe curves")?;

    let mut store = BatchStore::new();
    let batch = store.load_from_array(generated.data, Some("kubo-toyabe"));

    let mut preparer = DataPreparer::new();
    let dataset = preparer
        .prepare(&store, &[batch], &PrepareOptions::new())
        .context("rebinning the generated batch")?;
    let n_bins = preparer.dataset(dataset)?.n_bins();
    info!("300 time points rebinned into {} bins", n_bins);

    let mut engine = PcaEngine::new();
    let handle = engine.decompose(&preparer, dataset)?;
    let result = engine.result(handle)?;

    println!("{}", scree_chart(result.singular_values().view(), 8, 10));
    println!();
    println!("{:>6} {:>12} {:>12}", "T", "PC1", "PC2");
    let leading = result.scores().slice(s![..2.min(result.n_components()), ..]);
    for (j, temp) in temperature.iter().enumerate() {
        let pc2 = if leading.nrows() > 1 { leading[[1, j]] } else { 0.0 };
        println!("{:>6.2} {:>12.5} {:>12.5}", temp, leading[[0, j]], pc2);
    }

    Ok(())
}
