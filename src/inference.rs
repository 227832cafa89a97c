use burn::prelude::*;

use crate::data::{class_name, PixelRow, HEIGHT, WIDTH};
use crate::error::DemoError;
use crate::model::Model;
use crate::preprocess::{normalize, pixels_tensor, PIXEL_MAX, PIXEL_MIN};

/// Outcome of classifying one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Index of the highest probability.
    pub class: usize,
    /// Softmax output, one entry per class.
    pub probabilities: Vec<f32>,
}

impl Prediction {
    pub fn class_name(&self) -> &'static str {
        class_name(self.class)
    }
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (index, value)| match best {
            Some((_, max)) if *value <= max => best,
            _ => Some((index, *value)),
        })
        .map(|(index, _)| index)
}

/// Trained model ready to classify raw samples.
#[derive(Debug)]
pub struct Predictor<B: Backend> {
    model: Model<B>,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(model: Model<B>, device: B::Device) -> Self {
        Self { model, device }
    }

    /// Normalize one raw sample, run it through the model and pick the most likely class.
    ///
    /// Every tensor created here is owned by this call and dropped before it returns.
    pub fn predict(&self, pixels: &PixelRow) -> Result<Prediction, DemoError> {
        let input = pixels_tensor::<B>(std::slice::from_ref(pixels), &self.device);
        let input = normalize(input, PIXEL_MIN, PIXEL_MAX).reshape([1, 1, HEIGHT, WIDTH]);

        let output = self.model.forward(input);
        let probabilities = output
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|err| DemoError::TensorData(format!("{err:?}")))?;
        log::debug!("Output probabilities: {probabilities:?}");

        let class = argmax(&probabilities)
            .ok_or_else(|| DemoError::TensorData("model produced no output".into()))?;

        Ok(Prediction {
            class,
            probabilities,
        })
    }
}
