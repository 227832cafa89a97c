use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::activation::softmax,
};

use crate::data::{HEIGHT, NUM_CLASSES, WIDTH};

const CONV1_FILTERS: usize = 16;
const CONV2_FILTERS: usize = 32;
const KERNEL_SIZE: usize = 3;
const POOL_SIZE: usize = 2;
const HIDDEN_UNITS: usize = 128;

/// Spatial size after both 2x2 pools: 28 -> 14 -> 7.
const POOLED_HEIGHT: usize = HEIGHT / (POOL_SIZE * POOL_SIZE);
const POOLED_WIDTH: usize = WIDTH / (POOL_SIZE * POOL_SIZE);
const FLATTENED: usize = CONV2_FILTERS * POOLED_HEIGHT * POOLED_WIDTH;

/// Fixed convolutional classifier.
///
/// conv(16) -> pool -> conv(32) -> pool -> flatten -> dense(128) -> dense(10) -> softmax
#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: MaxPool2d,
    dense1: Linear<B>,
    dense2: Linear<B>,
    activation: Relu,
}

impl<B: Backend> Model<B> {
    pub fn new(device: &B::Device) -> Self {
        let conv = |channels: [usize; 2]| -> Conv2d<B> {
            Conv2dConfig::new(channels, [KERNEL_SIZE, KERNEL_SIZE])
                .with_stride([1, 1])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };

        Self {
            conv1: conv([1, CONV1_FILTERS]),
            conv2: conv([CONV1_FILTERS, CONV2_FILTERS]),
            pool: MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE])
                .with_strides([POOL_SIZE, POOL_SIZE])
                .init(),
            dense1: LinearConfig::new(FLATTENED, HIDDEN_UNITS).init(device),
            dense2: LinearConfig::new(HIDDEN_UNITS, NUM_CLASSES).init(device),
            activation: Relu::new(),
        }
    }

    /// Class scores before the softmax.
    ///
    /// # Shapes
    ///   - Images [batch_size, 1, 28, 28]
    ///   - Output [batch_size, 10]
    pub fn forward_logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool.forward(x);

        let x = x.flatten::<2>(1, 3);

        let x = self.dense1.forward(x);
        let x = self.activation.forward(x);

        self.dense2.forward(x)
    }

    /// Class probabilities, every row sums to one.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward_logits(images), 1)
    }

    /// Layer table with output shapes and parameter counts.
    pub fn summary(&self) -> String {
        let conv_params = |input: usize, filters: usize| {
            input * filters * KERNEL_SIZE * KERNEL_SIZE + filters
        };
        let rows = [
            (
                "conv2d_1 (Conv2D)",
                format!("[batch,{CONV1_FILTERS},{HEIGHT},{WIDTH}]"),
                conv_params(1, CONV1_FILTERS),
            ),
            (
                "max_pooling2d_1 (MaxPool2D)",
                format!("[batch,{CONV1_FILTERS},{},{}]", HEIGHT / 2, WIDTH / 2),
                0,
            ),
            (
                "conv2d_2 (Conv2D)",
                format!("[batch,{CONV2_FILTERS},{},{}]", HEIGHT / 2, WIDTH / 2),
                conv_params(CONV1_FILTERS, CONV2_FILTERS),
            ),
            (
                "max_pooling2d_2 (MaxPool2D)",
                format!("[batch,{CONV2_FILTERS},{POOLED_HEIGHT},{POOLED_WIDTH}]"),
                0,
            ),
            ("flatten (Flatten)", format!("[batch,{FLATTENED}]"), 0),
            (
                "dense_1 (Dense)",
                format!("[batch,{HIDDEN_UNITS}]"),
                FLATTENED * HIDDEN_UNITS + HIDDEN_UNITS,
            ),
            (
                "dense_2 (Dense)",
                format!("[batch,{NUM_CLASSES}]"),
                HIDDEN_UNITS * NUM_CLASSES + NUM_CLASSES,
            ),
        ];

        let mut summary = format!("{:<30}{:<22}{:>10}\n", "Layer (type)", "Output shape", "Param #");
        for (name, shape, params) in rows {
            summary.push_str(&format!("{name:<30}{shape:<22}{params:>10}\n"));
        }
        summary.push_str(&format!("Total params: {}", self.num_params()));

        summary
    }
}
