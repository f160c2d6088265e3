//! Synthetic Kubo–Toyabe relaxation curves with Gaussian noise, laid out as a
//! `(time, sample, channel)` batch ready for [`crate::batch::BatchStore::load_from_array`].

use log::debug;
use ndarray::{Array1, Array2, Array3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::error::{PcaExpError, Result};

/// How a model parameter varies across samples.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSpec {
    /// Drawn per sample as `min + span * U(0, 1)`.
    Range(f64, f64),
    /// One explicit value per sample.
    Values(Array1<f64>),
}

/// Noise scale, either one value for every time point or one per time point.
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseSpec {
    Uniform(f64),
    PerTime(Array1<f64>),
}

/// Generated curves together with the parameters used for each sample.
#[derive(Debug, Clone)]
pub struct SyntheticBatch {
    pub data: Array3<f64>,
    pub sigma: Array1<f64>,
    pub lambda: Array1<f64>,
}

/// Noise-free static Kubo–Toyabe polarization with exponential damping.
pub fn kubo_toyabe(t: f64, a0: f64, ab: f64, sigma: f64, lambda: f64) -> f64 {
    let st2 = (sigma * t).powi(2);
    a0 * (1.0 / 3.0 + 2.0 / 3.0 * (1.0 - st2) * (-st2 / 2.0).exp()) * (-lambda * t).exp() + ab
}

#[derive(Debug, Clone)]
pub struct KuboToyabe {
    t: Array1<f64>,
    a0: f64,
    ab: f64,
    sigma: ParamSpec,
    lambda: ParamSpec,
    noise: NoiseSpec,
    n_samples: usize,
    seed: Option<u64>,
}

impl KuboToyabe {
    pub fn new(t: Array1<f64>, a0: f64, ab: f64) -> Self {
        KuboToyabe {
            t,
            a0,
            ab,
            sigma: ParamSpec::Range(0.0, 1.0),
            lambda: ParamSpec::Range(0.0, 1.0),
            noise: NoiseSpec::Uniform(0.1),
            n_samples: 100,
            seed: None,
        }
    }

    pub fn sigma(mut self, sigma: ParamSpec) -> Self {
        self.sigma = sigma;
        self
    }

    pub fn lambda(mut self, lambda: ParamSpec) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn noise(mut self, noise: NoiseSpec) -> Self {
        self.noise = noise;
        self
    }

    /// Ignored when either parameter is given as explicit values.
    pub fn n_samples(mut self, n_samples: usize) -> Self {
        self.n_samples = n_samples;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn sample_count(&self) -> Result<usize> {
        match (&self.sigma, &self.lambda) {
            (ParamSpec::Values(s), ParamSpec::Values(l)) => {
                if s.len() != l.len() {
                    return Err(PcaExpError::InvalidArgument(format!(
                        "sigma has {} values but lambda has {}",
                        s.len(),
                        l.len()
                    )));
                }
                Ok(s.len())
            }
            (ParamSpec::Values(v), ParamSpec::Range(..)) | (ParamSpec::Range(..), ParamSpec::Values(v)) => {
                Ok(v.len())
            }
            (ParamSpec::Range(..), ParamSpec::Range(..)) => Ok(self.n_samples),
        }
    }

    fn noise_scale(&self) -> Result<Array1<f64>> {
        match &self.noise {
            NoiseSpec::Uniform(er) => Ok(Array1::from_elem(self.t.len(), *er)),
            NoiseSpec::PerTime(er) if er.len() == self.t.len() => Ok(er.clone()),
            NoiseSpec::PerTime(er) => Err(PcaExpError::InvalidArgument(format!(
                "noise has {} entries for {} time points",
                er.len(),
                self.t.len()
            ))),
        }
    }

    pub fn generate(&self) -> Result<SyntheticBatch> {
        if self.t.is_empty() {
            return Err(PcaExpError::InvalidArgument("time axis is empty".to_string()));
        }
        let n = self.sample_count()?;
        if n == 0 {
            return Err(PcaExpError::InvalidArgument("no samples requested".to_string()));
        }
        let er = self.noise_scale()?;

        let mut rng = match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        let sigma = draw(&self.sigma, n, &mut rng);
        let lambda = draw(&self.lambda, n, &mut rng);

        let n_t = self.t.len();
        let noise = Array2::from_shape_fn((n_t, n), |(i, _)| er[i] * rng.sample::<f64, _>(StandardNormal));

        let mut data = Array3::zeros((n_t, n, 3));
        for ((i, j), &eps) in noise.indexed_iter() {
            let t = self.t[i];
            data[[i, j, 0]] = t;
            data[[i, j, 1]] = kubo_toyabe(t, self.a0, self.ab, sigma[j], lambda[j]) + eps;
            data[[i, j, 2]] = er[i];
        }
        debug!("generated {} Kubo-Toyabe curves over {} time points", n, n_t);

        Ok(SyntheticBatch { data, sigma, lambda })
    }
}

fn draw<R: Rng>(spec: &ParamSpec, n: usize, rng: &mut R) -> Array1<f64> {
    match spec {
        ParamSpec::Values(v) => v.clone(),
        ParamSpec::Range(min, span) => Array1::from_shape_fn(n, |_| min + span * rng.random::<f64>()),
    }
}
