//! Train a small convolutional classifier on Fashion-MNIST, then watch it label random samples.
//!
//! The pipeline runs strictly forward: [data] loads the raw samples, [preprocess] shuffles,
//! normalizes and encodes them, [training] fits the [model], and [demo] keeps classifying
//! random samples at the pace set through [control].

pub mod app;
pub mod control;
pub mod data;
pub mod demo;
pub mod error;
pub mod inference;
pub mod logging;
pub mod model;
pub mod preprocess;
pub mod render;
pub mod training;

pub use error::DemoError;

#[cfg(test)]
pub(crate) type TestBackend = burn::backend::NdArray<f32>;

#[cfg(test)]
pub(crate) type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;
