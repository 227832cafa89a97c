use burn::{module::AutodiffModule, prelude::*, tensor::backend::AutodiffBackend};
use rand::{Rng, SeedableRng};

use crate::control::DelayControl;
use crate::data::LabeledImages;
use crate::demo::{DemoLoop, DemoView};
use crate::error::DemoError;
use crate::inference::Predictor;
use crate::model::Model;
use crate::preprocess::{prepare, shuffle};
use crate::training::{train, EpochMetrics, EpochObserver, TrainingConfig};

/// Everything the demo needs once training is over.
///
/// Built once, then shared read-only by every demo cycle; only the delay changes.
pub struct AppContext<B: Backend> {
    dataset: LabeledImages,
    predictor: Predictor<B>,
    delay: DelayControl,
}

impl<B: Backend> AppContext<B> {
    pub fn new(dataset: LabeledImages, predictor: Predictor<B>, delay: DelayControl) -> Self {
        Self {
            dataset,
            predictor,
            delay,
        }
    }

    pub fn dataset(&self) -> &LabeledImages {
        &self.dataset
    }

    pub fn predictor(&self) -> &Predictor<B> {
        &self.predictor
    }

    pub fn delay(&self) -> &DelayControl {
        &self.delay
    }

    pub fn demo<V: DemoView, R: Rng>(&self, view: V, rng: R) -> DemoLoop<'_, B, V, R> {
        DemoLoop::new(self, view, rng)
    }
}

/// Shuffle `dataset`, fit a fresh model on it and keep the result for inference.
///
/// Returns the ready context together with the per-epoch history.
pub fn initialize<B: AutodiffBackend, O: EpochObserver + ?Sized>(
    mut dataset: LabeledImages,
    config: &TrainingConfig,
    delay: DelayControl,
    device: &B::Device,
    observer: &mut O,
) -> Result<(AppContext<B::InnerBackend>, Vec<EpochMetrics>), DemoError> {
    config.validate()?;
    B::seed(config.seed);

    let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
    let (inputs, labels) = dataset.parts_mut();
    shuffle(inputs, labels, &mut rng)?;

    let data = prepare::<B>(&dataset, device)?;
    let model = Model::<B>::new(device);
    log::info!("Model summary:\n{}", model.summary());

    let outcome = train(config, model, data, observer)?;
    let predictor = Predictor::new(outcome.model.valid(), device.clone());

    Ok((AppContext::new(dataset, predictor, delay), outcome.history))
}
