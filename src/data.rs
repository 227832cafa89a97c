use std::fs::create_dir_all;
use std::io::Read;
use std::path::{Path, PathBuf};

use burn::data::network::downloader::download_file_as_bytes;
use flate2::read::GzDecoder;

use crate::error::DemoError;

/// Zalando's public mirror of the Fashion-MNIST files.
pub const URL: &str = "http://fashion-mnist.s3-website.eu-central-1.amazonaws.com/";
const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;
pub const IMAGE_PIXELS: usize = WIDTH * HEIGHT;
pub const NUM_CLASSES: usize = 10;

/// Human readable name of every Fashion-MNIST label, indexed by label.
pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
    "T-shirt",
    "Trouser",
    "Pullover",
    "Dress",
    "Coat",
    "Sandal",
    "Shirt",
    "Sneaker",
    "Bag",
    "Ankle boot",
];

/// Raw pixel row of one sample, values in `0..=255`.
pub type PixelRow = [u8; IMAGE_PIXELS];

/// Name of the class at `index`, or `"unknown"` when out of range.
pub fn class_name(index: usize) -> &'static str {
    CLASS_NAMES.get(index).copied().unwrap_or("unknown")
}

/// Labeled images stored as two index-aligned sequences.
///
/// `inputs[i]` is always the image whose class is `labels[i]`; every mutation goes through
/// methods that keep both sequences the same length and permute them together.
#[derive(Debug, Clone, Default)]
pub struct LabeledImages {
    inputs: Vec<PixelRow>,
    labels: Vec<u8>,
}

impl LabeledImages {
    pub fn new(inputs: Vec<PixelRow>, labels: Vec<u8>) -> Result<Self, DemoError> {
        if inputs.len() != labels.len() {
            return Err(DemoError::LengthMismatch {
                inputs: inputs.len(),
                labels: labels.len(),
            });
        }

        Ok(Self { inputs, labels })
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn inputs(&self) -> &[PixelRow] {
        &self.inputs
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    /// Both sequences, mutably, for joint in-place permutation.
    pub fn parts_mut(&mut self) -> (&mut [PixelRow], &mut [u8]) {
        (&mut self.inputs, &mut self.labels)
    }

    pub fn sample(&self, index: usize) -> Option<(&PixelRow, u8)> {
        Some((self.inputs.get(index)?, *self.labels.get(index)?))
    }

    /// Keep only the first `limit` samples.
    pub fn truncate(&mut self, limit: usize) {
        self.inputs.truncate(limit);
        self.labels.truncate(limit);
    }

    /// Parse a pair of (decompressed) IDX files.
    pub fn from_idx(images: &[u8], labels: &[u8]) -> Result<Self, DemoError> {
        let inputs = read_images(images, TRAIN_IMAGES)?;
        let labels = read_labels(labels, TRAIN_LABELS)?;

        Self::new(inputs, labels)
    }
}

/// Where the Fashion-MNIST training split comes from.
#[derive(Debug, Clone)]
pub enum DataSource {
    /// Download from `base_url` and cache the decompressed files in `cache_dir`.
    Remote { base_url: String, cache_dir: PathBuf },
    /// Read already fetched files, raw or gzipped, from a directory.
    Local(PathBuf),
}

impl DataSource {
    /// Remote source backed by the user cache directory.
    pub fn remote() -> Result<Self, DemoError> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "could not determine the cache directory",
                )
            })?
            .join("fashion-mnist-demo");

        Ok(Self::Remote {
            base_url: URL.to_string(),
            cache_dir,
        })
    }
}

/// Load the Fashion-MNIST training split in memory.
///
/// Train images (u8): 28 * 28 * 60000 = 47.04Mb, small enough to keep around for the whole
/// demo.
pub fn load(source: &DataSource) -> Result<LabeledImages, DemoError> {
    let (images, labels) = match source {
        DataSource::Remote {
            base_url,
            cache_dir,
        } => {
            if !cache_dir.exists() {
                create_dir_all(cache_dir)?;
            }
            (
                fetch_cached(base_url, TRAIN_IMAGES, cache_dir)?,
                fetch_cached(base_url, TRAIN_LABELS, cache_dir)?,
            )
        }
        DataSource::Local(dir) => (read_local(dir, TRAIN_IMAGES)?, read_local(dir, TRAIN_LABELS)?),
    };

    let dataset = LabeledImages::from_idx(&images, &labels)?;
    log::info!("Loaded {} Fashion-MNIST samples", dataset.len());

    Ok(dataset)
}

/// Return the decompressed file, downloading it first when it is not cached yet.
fn fetch_cached(base_url: &str, name: &str, cache_dir: &Path) -> Result<Vec<u8>, DemoError> {
    let file_name = cache_dir.join(name);

    if !file_name.exists() {
        let bytes = download(&format!("{base_url}{name}.gz"), name)?;
        store_decompressed(&bytes, &file_name)?;
    }

    Ok(std::fs::read(file_name)?)
}

fn download(url: &str, name: &str) -> Result<Vec<u8>, DemoError> {
    log::info!("Downloading {url}");

    let bytes = download_file_as_bytes(url, name);
    if bytes.is_empty() {
        return Err(DemoError::Download(format!("{url} returned no data")));
    }

    Ok(bytes)
}

/// Decompress `compressed` and move it to `path` once it is complete.
///
/// A failure leaves nothing at `path`, so the next run downloads the file again.
fn store_decompressed(compressed: &[u8], path: &Path) -> Result<(), DemoError> {
    let mut bytes = Vec::new();
    GzDecoder::new(compressed).read_to_end(&mut bytes)?;

    let partial = path.with_extension("part");
    std::fs::write(&partial, &bytes)?;
    std::fs::rename(&partial, path)?;

    Ok(())
}

fn read_local(dir: &Path, name: &str) -> Result<Vec<u8>, DemoError> {
    let raw = dir.join(name);
    if raw.exists() {
        return Ok(std::fs::read(raw)?);
    }

    let compressed = std::fs::read(dir.join(format!("{name}.gz")))?;
    let mut bytes = Vec::new();
    GzDecoder::new(&compressed[..]).read_to_end(&mut bytes)?;

    Ok(bytes)
}

fn invalid(name: &str, reason: impl Into<String>) -> DemoError {
    DemoError::InvalidIdx {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn read_u32(bytes: &[u8], offset: usize, name: &str) -> Result<u32, DemoError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|slice| slice.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| invalid(name, "truncated header"))
}

/// Images: 16-byte header (magic, count, rows, cols) followed by `count * rows * cols` bytes.
fn read_images(bytes: &[u8], name: &str) -> Result<Vec<PixelRow>, DemoError> {
    let magic = read_u32(bytes, 0, name)?;
    if magic != IMAGES_MAGIC {
        return Err(invalid(name, format!("bad magic number {magic}")));
    }

    let size = read_u32(bytes, 4, name)? as usize;
    let rows = read_u32(bytes, 8, name)? as usize;
    let cols = read_u32(bytes, 12, name)? as usize;
    if rows != HEIGHT || cols != WIDTH {
        return Err(invalid(name, format!("expected 28x28 images, got {rows}x{cols}")));
    }

    let payload = &bytes[16..];
    if payload.len() != size * IMAGE_PIXELS {
        return Err(invalid(
            name,
            format!(
                "expected {} pixel bytes, got {}",
                size * IMAGE_PIXELS,
                payload.len()
            ),
        ));
    }

    payload
        .chunks_exact(IMAGE_PIXELS)
        .map(|chunk| PixelRow::try_from(chunk).map_err(|_| invalid(name, "incomplete image")))
        .collect()
}

/// Labels: 8-byte header (magic, count) followed by `count` bytes.
fn read_labels(bytes: &[u8], name: &str) -> Result<Vec<u8>, DemoError> {
    let magic = read_u32(bytes, 0, name)?;
    if magic != LABELS_MAGIC {
        return Err(invalid(name, format!("bad magic number {magic}")));
    }

    let size = read_u32(bytes, 4, name)? as usize;
    let labels = &bytes[8..];
    if labels.len() != size {
        return Err(invalid(
            name,
            format!("expected {size} labels, got {}", labels.len()),
        ));
    }
    if let Some(label) = labels.iter().find(|label| **label as usize >= NUM_CLASSES) {
        return Err(invalid(name, format!("label {label} is not a Fashion-MNIST class")));
    }

    Ok(labels.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx_images(images: &[PixelRow]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&IMAGES_MAGIC.to_be_bytes());
        bytes.extend_from_slice(&(images.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&(HEIGHT as u32).to_be_bytes());
        bytes.extend_from_slice(&(WIDTH as u32).to_be_bytes());
        for image in images {
            bytes.extend_from_slice(image);
        }
        bytes
    }

    fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&LABELS_MAGIC.to_be_bytes());
        bytes.extend_from_slice(&(labels.len() as u32).to_be_bytes());
        bytes.extend_from_slice(labels);
        bytes
    }

    fn filled(value: u8) -> PixelRow {
        [value; IMAGE_PIXELS]
    }

    #[test]
    fn parses_idx_pair() {
        let images = [filled(0), filled(128), filled(255)];
        let labels = [3, 7, 9];

        let dataset = LabeledImages::from_idx(&idx_images(&images), &idx_labels(&labels)).unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.labels(), &labels);
        assert_eq!(dataset.inputs()[1], filled(128));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = idx_images(&[filled(1)]);
        bytes[3] = 0;

        let err = LabeledImages::from_idx(&bytes, &idx_labels(&[1])).unwrap_err();

        assert!(matches!(err, DemoError::InvalidIdx { .. }));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut bytes = idx_images(&[filled(1), filled(2)]);
        bytes.truncate(bytes.len() - 10);

        let err = LabeledImages::from_idx(&bytes, &idx_labels(&[1, 2])).unwrap_err();

        assert!(matches!(err, DemoError::InvalidIdx { .. }));
    }

    #[test]
    fn rejects_out_of_range_label() {
        let err = LabeledImages::from_idx(&idx_images(&[filled(1)]), &idx_labels(&[10]))
            .unwrap_err();

        assert!(matches!(err, DemoError::InvalidIdx { .. }));
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let err = LabeledImages::new(vec![filled(1), filled(2)], vec![0]).unwrap_err();

        assert!(matches!(
            err,
            DemoError::LengthMismatch {
                inputs: 2,
                labels: 1
            }
        ));
    }

    #[test]
    fn reads_gzipped_local_files() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let dir = std::env::temp_dir().join(format!("fashion-mnist-local-{}", std::process::id()));
        create_dir_all(&dir).unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&idx_images(&[filled(9)])).unwrap();
        std::fs::write(dir.join(format!("{TRAIN_IMAGES}.gz")), encoder.finish().unwrap()).unwrap();
        std::fs::write(dir.join(TRAIN_LABELS), idx_labels(&[5])).unwrap();

        let dataset = load(&DataSource::Local(dir.clone())).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(dataset.labels(), &[5]);
        assert_eq!(dataset.inputs()[0], filled(9));
    }

    #[test]
    fn corrupt_download_leaves_no_cache_file() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let dir = std::env::temp_dir().join(format!("fashion-mnist-cache-{}", std::process::id()));
        create_dir_all(&dir).unwrap();
        let path = dir.join(TRAIN_LABELS);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&idx_labels(&[1; 4096])).unwrap();
        let mut compressed = encoder.finish().unwrap();
        let valid = compressed.clone();
        let middle = compressed.len() / 2;
        compressed.truncate(middle);
        compressed.extend_from_slice(&[0xff; 64]);

        assert!(store_decompressed(&compressed, &path).is_err());
        assert!(!path.exists());

        store_decompressed(&valid, &path).unwrap();
        let stored = std::fs::read(&path).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(stored, idx_labels(&[1; 4096]));
    }

    #[test]
    fn class_names_cover_every_label() {
        assert_eq!(class_name(0), "T-shirt");
        assert_eq!(class_name(9), "Ankle boot");
        assert_eq!(class_name(10), "unknown");
    }
}
