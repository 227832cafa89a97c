use std::fmt;
use std::time::Instant;

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::DemoError;
use crate::model::Model;
use crate::preprocess::PreparedData;

#[derive(Config)]
pub struct TrainingConfig {
    #[config(default = "AdamConfig::new().with_epsilon(1e-7)")]
    pub optimizer: AdamConfig,
    #[config(default = 30)]
    pub num_epochs: usize,
    #[config(default = 256)]
    pub batch_size: usize,
    /// Fraction of the samples, taken from the end, held out for validation.
    #[config(default = 0.15)]
    pub validation_split: f64,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), DemoError> {
        if self.num_epochs == 0 {
            return Err(DemoError::InvalidConfig("num_epochs must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(DemoError::InvalidConfig("batch_size must be positive".into()));
        }
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return Err(DemoError::InvalidConfig(format!(
                "validation_split must be in (0, 1), got {}",
                self.validation_split
            )));
        }
        Ok(())
    }

    /// Number of leading samples used for fitting; the rest is validation data.
    fn split_point(&self, total: usize) -> Result<usize, DemoError> {
        let split_at = (total as f64 * (1.0 - self.validation_split)).floor() as usize;
        if split_at == 0 || split_at >= total {
            return Err(DemoError::InvalidConfig(format!(
                "a validation split of {} leaves an empty split out of {total} samples",
                self.validation_split
            )));
        }
        Ok(split_at)
    }
}

/// Metrics reported at the end of every epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
}

impl fmt::Display for EpochMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loss: {:.4}, acc: {:.4}, val_loss: {:.4}, val_acc: {:.4}",
            self.loss, self.accuracy, self.val_loss, self.val_accuracy
        )
    }
}

/// Receives the metrics of every finished epoch, in order.
pub trait EpochObserver {
    fn on_epoch_end(&mut self, epoch: usize, metrics: &EpochMetrics);
}

impl<F: FnMut(usize, &EpochMetrics)> EpochObserver for F {
    fn on_epoch_end(&mut self, epoch: usize, metrics: &EpochMetrics) {
        self(epoch, metrics)
    }
}

/// Logs each epoch at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl EpochObserver for LogProgress {
    fn on_epoch_end(&mut self, epoch: usize, metrics: &EpochMetrics) {
        log::info!("Data for epoch {epoch}: {metrics}");
    }
}

/// Trained model and the metrics of every epoch.
#[derive(Debug)]
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub model: Model<B>,
    pub history: Vec<EpochMetrics>,
}

/// Mean categorical cross-entropy between the softmax of `logits` and one-hot `targets`.
pub fn categorical_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let classes = targets.argmax(1).squeeze::<1>(1);

    CrossEntropyLossConfig::new()
        .init(&logits.device())
        .forward(logits, classes)
}

/// Fraction of rows where the highest score matches the one-hot target.
pub fn accuracy<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 2>) -> f32 {
    let num_predictions = output.dims()[0];
    let num_corrects = output
        .argmax(1)
        .equal(targets.argmax(1))
        .int()
        .sum()
        .into_scalar();

    num_corrects.elem::<f32>() / num_predictions as f32
}

fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let indices: Vec<i64> = indices.iter().map(|index| *index as i64).collect();
    let len = indices.len();

    Tensor::from_ints(TensorData::new(indices, [len]), device)
}

/// Sample-weighted running mean of loss and accuracy.
#[derive(Default)]
struct RunningMetrics {
    loss: f64,
    accuracy: f64,
    samples: usize,
}

impl RunningMetrics {
    fn update(&mut self, loss: f32, accuracy: f32, samples: usize) {
        self.loss += loss as f64 * samples as f64;
        self.accuracy += accuracy as f64 * samples as f64;
        self.samples += samples;
    }

    fn mean(&self) -> (f32, f32) {
        let samples = self.samples.max(1) as f64;
        ((self.loss / samples) as f32, (self.accuracy / samples) as f32)
    }
}

/// Fit `model` on `data` with Adam and categorical cross-entropy.
///
/// The trailing `validation_split` fraction of `data` is held out; the remaining samples are
/// reshuffled every epoch and fed in batches of `batch_size`. `data` is consumed and its
/// tensors are released before returning.
pub fn train<B: AutodiffBackend, O: EpochObserver + ?Sized>(
    config: &TrainingConfig,
    model: Model<B>,
    data: PreparedData<B>,
    observer: &mut O,
) -> Result<TrainingOutcome<B>, DemoError> {
    config.validate()?;
    let total = data.len();
    let split_at = config.split_point(total)?;
    let device = data.inputs.device();

    log::info!(
        "Training on {split_at} samples, validating on {} samples",
        total - split_at
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut optim = config.optimizer.init::<B, Model<B>>();
    let mut model = model;
    let mut train_indices: Vec<usize> = (0..split_at).collect();
    let valid_indices: Vec<usize> = (split_at..total).collect();
    let valid_inputs = data.inputs.clone().inner();
    let valid_targets = data.targets.clone().inner();
    let mut history = Vec::with_capacity(config.num_epochs);

    let now = Instant::now();
    for epoch in 0..config.num_epochs {
        train_indices.shuffle(&mut rng);

        let mut train_metrics = RunningMetrics::default();
        for batch in train_indices.chunks(config.batch_size) {
            let indices = index_tensor::<B>(batch, &device);
            let inputs = data.inputs.clone().select(0, indices.clone());
            let targets = data.targets.clone().select(0, indices);

            let logits = model.forward_logits(inputs);
            let loss = categorical_cross_entropy(logits.clone(), targets.clone());
            train_metrics.update(
                loss.clone().into_scalar().elem::<f32>(),
                accuracy(logits, targets),
                batch.len(),
            );

            // Gradients for the current backward pass
            let grads = loss.backward();
            // Gradients linked to each parameter of the model.
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(config.learning_rate, model, grads);
        }

        // Get the model without autodiff.
        let model_valid = model.valid();
        let mut valid_metrics = RunningMetrics::default();
        for batch in valid_indices.chunks(config.batch_size) {
            let indices = index_tensor::<B::InnerBackend>(batch, &device);
            let inputs = valid_inputs.clone().select(0, indices.clone());
            let targets = valid_targets.clone().select(0, indices);

            let logits = model_valid.forward_logits(inputs);
            let loss = categorical_cross_entropy(logits.clone(), targets.clone());
            valid_metrics.update(
                loss.into_scalar().elem::<f32>(),
                accuracy(logits, targets),
                batch.len(),
            );
        }

        let (loss, accuracy) = train_metrics.mean();
        let (val_loss, val_accuracy) = valid_metrics.mean();
        let metrics = EpochMetrics {
            loss,
            accuracy,
            val_loss,
            val_accuracy,
        };
        observer.on_epoch_end(epoch, &metrics);
        history.push(metrics);
    }

    let elapsed = now.elapsed().as_secs();
    log::info!("Training completed in {}m{}s", elapsed / 60, elapsed % 60);

    drop(valid_inputs);
    drop(valid_targets);
    drop(data);
    log::debug!("Released training tensors");

    Ok(TrainingOutcome { model, history })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{LabeledImages, IMAGE_PIXELS, NUM_CLASSES};
    use crate::preprocess::{one_hot, prepare};
    use crate::{TestAutodiffBackend, TestBackend};

    fn synthetic(samples: usize) -> LabeledImages {
        let inputs = (0..samples)
            .map(|i| {
                let mut pixels = [0u8; IMAGE_PIXELS];
                let label = i % NUM_CLASSES;
                // A bright stripe whose row encodes the label.
                for x in 0..28 {
                    pixels[(label * 2 + 4) * 28 + x] = 255;
                }
                pixels
            })
            .collect();
        let labels = (0..samples).map(|i| (i % NUM_CLASSES) as u8).collect();

        LabeledImages::new(inputs, labels).unwrap()
    }

    #[test]
    fn cross_entropy_is_small_for_confident_correct_predictions() {
        let device = Default::default();
        let targets = one_hot::<TestBackend>(&[3], NUM_CLASSES, &device).unwrap();
        let mut confident = vec![0.0f32; NUM_CLASSES];
        confident[3] = 20.0;
        let confident =
            Tensor::<TestBackend, 2>::from_floats(TensorData::new(confident, [1, 10]), &device);
        let uniform = Tensor::<TestBackend, 2>::zeros([1, NUM_CLASSES], &device);

        let low = categorical_cross_entropy(confident, targets.clone())
            .into_scalar()
            .elem::<f32>();
        let high = categorical_cross_entropy(uniform, targets)
            .into_scalar()
            .elem::<f32>();

        assert!(low < 1e-3);
        assert!((high - (NUM_CLASSES as f32).ln()).abs() < 1e-4);
    }

    #[test]
    fn accuracy_counts_matching_argmax() {
        let device = Default::default();
        let targets = one_hot::<TestBackend>(&[0, 1, 2, 3], NUM_CLASSES, &device).unwrap();
        // Rows 0 and 1 are right, rows 2 and 3 predict class 0.
        let output = one_hot::<TestBackend>(&[0, 1, 0, 0], NUM_CLASSES, &device).unwrap();

        assert_eq!(accuracy(output, targets), 0.5);
    }

    #[test]
    fn rejects_invalid_configs() {
        assert!(TrainingConfig::new().validate().is_ok());
        assert!(TrainingConfig::new().with_num_epochs(0).validate().is_err());
        assert!(TrainingConfig::new().with_batch_size(0).validate().is_err());
        assert!(TrainingConfig::new()
            .with_validation_split(1.0)
            .validate()
            .is_err());
        assert!(TrainingConfig::new()
            .with_validation_split(0.0)
            .validate()
            .is_err());
    }

    #[test]
    fn config_loads_back_from_a_file() {
        let path = std::env::temp_dir().join(format!("training-config-{}.json", std::process::id()));
        let config = TrainingConfig::new().with_num_epochs(4).with_seed(11);

        config.save(&path).unwrap();
        let loaded = TrainingConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.num_epochs, 4);
        assert_eq!(loaded.seed, 11);
        assert_eq!(loaded.batch_size, 256);
        assert_eq!(loaded.validation_split, 0.15);
    }

    #[test]
    fn holds_out_the_trailing_fraction() {
        let config = TrainingConfig::new();

        assert_eq!(config.split_point(100).unwrap(), 85);
        assert_eq!(config.split_point(7).unwrap(), 5);
        assert!(config.split_point(1).is_err());
    }

    #[test]
    fn reports_every_epoch_in_order() {
        let device = Default::default();
        TestAutodiffBackend::seed(3);
        let data = prepare::<TestAutodiffBackend>(&synthetic(40), &device).unwrap();
        let model = Model::new(&device);
        let config = TrainingConfig::new()
            .with_num_epochs(3)
            .with_batch_size(16);
        let mut seen = Vec::new();
        let mut observer = |epoch: usize, metrics: &EpochMetrics| seen.push((epoch, *metrics));

        let outcome = train(&config, model, data, &mut observer).unwrap();

        assert_eq!(outcome.history.len(), 3);
        assert_eq!(
            seen.iter().map(|(epoch, _)| *epoch).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        for (metrics, (_, observed)) in outcome.history.iter().zip(&seen) {
            assert_eq!(metrics, observed);
            assert!(metrics.loss.is_finite() && metrics.val_loss.is_finite());
            assert!((0.0..=1.0).contains(&metrics.accuracy));
            assert!((0.0..=1.0).contains(&metrics.val_accuracy));
        }
    }

    #[test]
    fn loss_decreases_on_a_learnable_set() {
        let device = Default::default();
        TestAutodiffBackend::seed(5);
        let data = prepare::<TestAutodiffBackend>(&synthetic(60), &device).unwrap();
        let config = TrainingConfig::new()
            .with_num_epochs(8)
            .with_batch_size(10);

        let outcome = train(&config, Model::new(&device), data, &mut LogProgress).unwrap();

        let first = outcome.history.first().unwrap().loss;
        let last = outcome.history.last().unwrap().loss;
        assert!(last < first, "loss went from {first} to {last}");
    }
}
