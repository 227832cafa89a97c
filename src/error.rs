use thiserror::Error;

/// Everything that can go wrong between fetching the dataset and rendering a prediction.
#[derive(Error, Debug)]
pub enum DemoError {
    #[error("I/O error: `{0}`")]
    Io(#[from] std::io::Error),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Invalid IDX file `{name}`: {reason}")]
    InvalidIdx { name: String, reason: String },

    #[error("Dataset has {inputs} inputs but {labels} labels")]
    LengthMismatch { inputs: usize, labels: usize },

    #[error("Dataset is empty")]
    EmptyDataset,

    #[error("Label {label} is out of range for {depth} classes")]
    LabelOutOfRange { label: usize, depth: usize },

    #[error("Expected rows of {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),

    #[error("Tensor data error: {0}")]
    TensorData(String),

    #[error("Image error: `{0}`")]
    Image(#[from] image::ImageError),
}
