use std::fs;
use std::path::Path;

use image::{imageops::FilterType, GrayImage};

use crate::data::{PixelRow, HEIGHT, WIDTH};
use crate::error::DemoError;

/// Characters from darkest to brightest.
const SHADES: &[u8] = b" .:-=+*#%@";

/// The raw sample as a 28x28 grayscale image.
pub fn to_gray_image(pixels: &PixelRow) -> GrayImage {
    // A 28x28 buffer always fits 784 bytes.
    GrayImage::from_fn(WIDTH as u32, HEIGHT as u32, |x, y| {
        image::Luma([pixels[y as usize * WIDTH + x as usize]])
    })
}

/// Save the sample as a PNG, upscaled by `scale` with nearest neighbour filtering.
pub fn save_as_png(pixels: &PixelRow, scale: u32, path: &Path) -> Result<(), DemoError> {
    // Ensure the output directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let img = to_gray_image(pixels);
    let scale = scale.max(1);
    let img = image::imageops::resize(
        &img,
        WIDTH as u32 * scale,
        HEIGHT as u32 * scale,
        FilterType::Nearest,
    );
    img.save(path)?;

    Ok(())
}

/// Shade the sample with ASCII characters, two per pixel so it keeps its aspect ratio.
pub fn to_ascii(pixels: &PixelRow) -> String {
    let mut out = String::with_capacity(HEIGHT * (WIDTH * 2 + 1));

    for row in pixels.chunks(WIDTH) {
        for pixel in row {
            let shade = SHADES[*pixel as usize * (SHADES.len() - 1) / 255] as char;
            out.push(shade);
            out.push(shade);
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::IMAGE_PIXELS;

    fn gradient() -> PixelRow {
        let mut pixels = [0u8; IMAGE_PIXELS];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = (i % WIDTH * 255 / (WIDTH - 1)) as u8;
        }
        pixels
    }

    #[test]
    fn gray_image_keeps_row_major_layout() {
        let mut pixels = [0u8; IMAGE_PIXELS];
        pixels[3 * WIDTH + 5] = 77;

        let img = to_gray_image(&pixels);

        assert_eq!(img.dimensions(), (28, 28));
        assert_eq!(img.get_pixel(5, 3).0, [77]);
        assert_eq!(img.get_pixel(3, 5).0, [0]);
    }

    #[test]
    fn ascii_spans_the_full_shade_range() {
        let ascii = to_ascii(&gradient());
        let first_row = ascii.lines().next().unwrap();

        assert_eq!(ascii.lines().count(), HEIGHT);
        assert_eq!(first_row.len(), WIDTH * 2);
        assert!(first_row.starts_with("  "));
        assert!(first_row.ends_with("@@"));
    }

    #[test]
    fn png_is_written_scaled() {
        let path = std::env::temp_dir()
            .join(format!("fashion-mnist-render-{}", std::process::id()))
            .join("sample.png");

        save_as_png(&gradient(), 4, &path).unwrap();
        let img = image::open(&path).unwrap();
        fs::remove_dir_all(path.parent().unwrap()).unwrap();

        assert_eq!((img.width(), img.height()), (112, 112));
    }
}
