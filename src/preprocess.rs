use burn::prelude::*;
use rand::{seq::SliceRandom, Rng};

use crate::data::{LabeledImages, PixelRow, HEIGHT, IMAGE_PIXELS, NUM_CLASSES, WIDTH};
use crate::error::DemoError;

/// Smallest raw pixel intensity.
pub const PIXEL_MIN: f32 = 0.0;
/// Largest raw pixel intensity.
pub const PIXEL_MAX: f32 = 255.0;

/// Shuffle two index-aligned sequences in place with one shared permutation.
///
/// The pair at any index before the shuffle is still a pair afterwards.
pub fn shuffle<T: Clone, U: Clone, R: Rng + ?Sized>(
    inputs: &mut [T],
    labels: &mut [U],
    rng: &mut R,
) -> Result<(), DemoError> {
    if inputs.len() != labels.len() {
        return Err(DemoError::LengthMismatch {
            inputs: inputs.len(),
            labels: labels.len(),
        });
    }

    let mut order: Vec<usize> = (0..inputs.len()).collect();
    order.shuffle(rng);
    permute(inputs, &order);
    permute(labels, &order);

    Ok(())
}

fn permute<T: Clone>(values: &mut [T], order: &[usize]) {
    let permuted: Vec<T> = order.iter().map(|index| values[*index].clone()).collect();
    values.clone_from_slice(&permuted);
}

/// Rescale every value to `(x - min) / (max - min)`.
///
/// Works on a single sample or a whole batch alike. The input tensor is consumed by value, so
/// callers holding a clone keep their data untouched.
pub fn normalize<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    min: f32,
    max: f32,
) -> Tensor<B, D> {
    tensor.sub_scalar(min).div_scalar(max - min)
}

/// Inverse of [normalize].
pub fn denormalize<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    min: f32,
    max: f32,
) -> Tensor<B, D> {
    tensor.mul_scalar(max - min).add_scalar(min)
}

/// One-hot encode every label into a `[labels.len(), depth]` tensor.
pub fn one_hot<B: Backend>(
    labels: &[u8],
    depth: usize,
    device: &B::Device,
) -> Result<Tensor<B, 2>, DemoError> {
    if let Some(label) = labels.iter().find(|label| **label as usize >= depth) {
        return Err(DemoError::LabelOutOfRange {
            label: *label as usize,
            depth,
        });
    }

    let values: Vec<i64> = labels.iter().map(|label| *label as i64).collect();
    let labels = Tensor::<B, 1, Int>::from_ints(TensorData::new(values, [labels.len()]), device);

    Ok(labels.one_hot::<2>(depth).float())
}

/// Reinterpret flat pixel rows `[n, 784]` as single channel images `[n, 1, 28, 28]`.
pub fn reshape_images<B: Backend>(batch: Tensor<B, 2>) -> Result<Tensor<B, 4>, DemoError> {
    let [n, pixels] = batch.dims();
    if pixels != IMAGE_PIXELS {
        return Err(DemoError::ShapeMismatch {
            expected: IMAGE_PIXELS,
            actual: pixels,
        });
    }

    Ok(batch.reshape([n, 1, HEIGHT, WIDTH]))
}

/// Raw pixel rows as a `[rows.len(), 784]` float tensor.
pub fn pixels_tensor<B: Backend>(rows: &[PixelRow], device: &B::Device) -> Tensor<B, 2> {
    let values: Vec<f32> = rows
        .iter()
        .flat_map(|row| row.iter().map(|pixel| *pixel as f32))
        .collect();

    Tensor::from_floats(TensorData::new(values, [rows.len(), IMAGE_PIXELS]), device)
}

/// Tensors the model is fitted on.
#[derive(Debug, Clone)]
pub struct PreparedData<B: Backend> {
    /// Normalized images, `[n, 1, 28, 28]`.
    pub inputs: Tensor<B, 4>,
    /// One-hot targets, `[n, 10]`.
    pub targets: Tensor<B, 2>,
}

impl<B: Backend> PreparedData<B> {
    pub fn len(&self) -> usize {
        self.inputs.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Normalize, reshape and one-hot encode the whole dataset.
pub fn prepare<B: Backend>(
    dataset: &LabeledImages,
    device: &B::Device,
) -> Result<PreparedData<B>, DemoError> {
    if dataset.is_empty() {
        return Err(DemoError::EmptyDataset);
    }

    let normalized = normalize(
        pixels_tensor::<B>(dataset.inputs(), device),
        PIXEL_MIN,
        PIXEL_MAX,
    );
    let inputs = reshape_images(normalized)?;
    let targets = one_hot(dataset.labels(), NUM_CLASSES, device)?;

    Ok(PreparedData { inputs, targets })
}
