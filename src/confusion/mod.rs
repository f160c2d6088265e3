//! # Confusion scan over principal component scores
//!
//! A small fully connected classifier is trained to separate measurements whose
//! control parameter lies below a trial threshold from the rest, using the leading
//! PC scores as features. Repeating this for a range of thresholds and recording the
//! final training accuracy gives the characteristic confusion curve: accuracy peaks
//! where the threshold matches a real change in the data.
//!
//! The network is `neurons[0]` inputs, hidden layers of width `neurons[1..]`, and a
//! two-unit output. `activations[i - 1]` applies to hidden layer `i` and the last
//! activation to the output; the output values are then treated as logits of a
//! softmax cross-entropy loss. Training is full batch with Adam (AdamW without weight
//! decay). Every trial starts from the weights drawn at construction.

use candle_core::{DType, Device, Tensor, D};
use candle_nn::{loss, AdamW, Linear, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use log::{debug, info};
use ndarray::{s, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{PcaExpError, Result};
use crate::pca::PcaResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Tanh,
    Sigmoid,
    Linear,
}

impl Activation {
    fn apply(self, x: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Activation::Relu => x.relu(),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => candle_nn::ops::sigmoid(x),
            Activation::Linear => Ok(x.clone()),
        }
    }
}

/// Glorot-uniform `(fan_out, fan_in)` weight matrix drawn from `rng`.
fn glorot<R: Rng>(fan_in: usize, fan_out: usize, rng: &mut R, device: &Device) -> Result<Tensor> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    let values: Vec<f64> = (0..fan_in * fan_out)
        .map(|_| rng.random_range(-limit..limit))
        .collect();
    Ok(Tensor::from_vec(values, (fan_out, fan_in), device)?)
}

pub struct ConfusionBuilder {
    neurons: Vec<usize>,
    activations: Vec<Activation>,
    epochs: usize,
    learning_rate: f64,
    seed: Option<u64>,
}

impl ConfusionBuilder {
    pub fn new(neurons: Vec<usize>, activations: Vec<Activation>) -> Self {
        ConfusionBuilder {
            neurons,
            activations,
            epochs: 200,
            learning_rate: 1e-3,
            seed: None,
        }
    }

    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<ConfusionMachine> {
        if self.neurons.is_empty() || self.neurons.contains(&0) {
            return Err(PcaExpError::InvalidArgument(format!(
                "layer widths must be non-empty and positive, got {:?}",
                self.neurons
            )));
        }
        if self.activations.len() != self.neurons.len() {
            return Err(PcaExpError::InvalidArgument(format!(
                "{} layer widths need {} activations, got {}",
                self.neurons.len(),
                self.neurons.len(),
                self.activations.len()
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(PcaExpError::InvalidArgument(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }

        // The CPU device cannot be seeded, so initial weights come from our own RNG
        // and overwrite whatever `linear` drew.
        let mut rng = match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &device);

        let mut widths = self.neurons.clone();
        widths.push(2);
        let mut layers = Vec::with_capacity(self.activations.len());
        let mut initial = Vec::with_capacity(2 * self.activations.len());
        for (i, (pair, &activation)) in widths.windows(2).zip(&self.activations).enumerate() {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let prefix = format!("layer{}", i);
            layers.push((candle_nn::linear(fan_in, fan_out, vb.pp(&prefix))?, activation));
            initial.push((format!("{}.weight", prefix), glorot(fan_in, fan_out, &mut rng, &device)?));
            initial.push((
                format!("{}.bias", prefix),
                Tensor::zeros(fan_out, DType::F64, &device)?,
            ));
        }

        let mut machine = ConfusionMachine {
            varmap,
            layers,
            initial,
            input_width: self.neurons[0],
            epochs: self.epochs,
            learning_rate: self.learning_rate,
            device,
        };
        machine.restore()?;
        Ok(machine)
    }
}

pub struct ConfusionMachine {
    varmap: VarMap,
    layers: Vec<(Linear, Activation)>,
    initial: Vec<(String, Tensor)>,
    input_width: usize,
    epochs: usize,
    learning_rate: f64,
    device: Device,
}

impl ConfusionMachine {
    pub fn input_width(&self) -> usize {
        self.input_width
    }

    /// Accuracy per threshold using the first `up_to` score rows of `result` as features.
    pub fn scan(
        &mut self,
        result: &PcaResult,
        param: ArrayView1<f64>,
        thresholds: &[f64],
        up_to: usize,
    ) -> Result<Vec<f64>> {
        let scores = result.scores();
        if up_to == 0 || up_to > scores.nrows() {
            return Err(PcaExpError::InvalidArgument(format!(
                "cannot take {} components from a result with {}",
                up_to,
                scores.nrows()
            )));
        }
        let features = scores.slice(s![..up_to, ..]).reversed_axes();
        self.scan_features(features, param, thresholds)
    }

    /// Same as [`ConfusionMachine::scan`] with features already laid out as
    /// `sample x feature`.
    pub fn scan_features(
        &mut self,
        features: ArrayView2<f64>,
        param: ArrayView1<f64>,
        thresholds: &[f64],
    ) -> Result<Vec<f64>> {
        if features.ncols() != self.input_width {
            return Err(PcaExpError::ShapeMismatch(format!(
                "network expects {} features, got {}",
                self.input_width,
                features.ncols()
            )));
        }
        if param.len() != features.nrows() {
            return Err(PcaExpError::InvalidArgument(format!(
                "{} parameter values for {} samples",
                param.len(),
                features.nrows()
            )));
        }

        info!(
            "confusion scan over {} thresholds, {} samples",
            thresholds.len(),
            features.nrows()
        );
        let xs = Tensor::from_vec(
            features.iter().copied().collect::<Vec<f64>>(),
            features.dim(),
            &self.device,
        )?;
        let mut accuracy = Vec::with_capacity(thresholds.len());
        for &c in thresholds {
            let labels: Vec<u32> = param.iter().map(|&p| u32::from(p < c)).collect();
            let labels = Tensor::from_vec(labels, param.len(), &self.device)?;
            let trained = self.train(&xs, &labels);
            self.restore()?;
            let acc = trained?;
            debug!("threshold {:.4}: accuracy {:.4}", c, acc);
            accuracy.push(acc);
        }
        Ok(accuracy)
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut x = xs.clone();
        for (layer, activation) in &self.layers {
            x = activation.apply(&layer.forward(&x)?)?;
        }
        Ok(x)
    }

    /// Trains from the current weights and returns the final training accuracy.
    fn train(&self, xs: &Tensor, labels: &Tensor) -> Result<f64> {
        let params = ParamsAdamW {
            lr: self.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(self.varmap.all_vars(), params)?;
        for _ in 0..self.epochs {
            let logits = self.forward(xs)?;
            let loss = loss::cross_entropy(&logits, labels)?;
            optimizer.backward_step(&loss)?;
        }

        let predicted = self.forward(xs)?.argmax(D::Minus1)?;
        let acc = predicted
            .eq(labels)?
            .to_dtype(DType::F64)?
            .mean_all()?
            .to_scalar::<f64>()?;
        Ok(acc)
    }

    /// Copies the construction-time weights back into the variables.
    fn restore(&mut self) -> Result<()> {
        for (name, tensor) in &self.initial {
            self.varmap.set_one(name, tensor)?;
        }
        Ok(())
    }
}
