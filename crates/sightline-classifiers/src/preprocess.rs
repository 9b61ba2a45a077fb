//! Image decoding and input preparation

use crate::config::{PreprocessConfig, ScaleMode};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use sightline_core::{Error, Result};

/// Decode encoded image bytes (PNG, JPEG, ...) into pixels
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(Error::image_decode("empty image data"));
    }

    let image = image::load_from_memory(bytes).map_err(|e| Error::image_decode(e.to_string()))?;

    if image.width() == 0 || image.height() == 0 {
        return Err(Error::image_decode("image has no pixels"));
    }

    Ok(image)
}

/// Scale an image to a model's input size
pub fn prepare(image: &DynamicImage, (width, height): (u32, u32), mode: ScaleMode) -> RgbImage {
    match mode {
        ScaleMode::Fill => image.resize_exact(width, height, FilterType::Triangle).to_rgb8(),
        ScaleMode::CenterCrop => image
            .resize_to_fill(width, height, FilterType::Triangle)
            .to_rgb8(),
        ScaleMode::Fit => {
            let scaled = image.resize(width, height, FilterType::Triangle).to_rgb8();
            let mut canvas = RgbImage::new(width, height);
            let x = (width - scaled.width()) / 2;
            let y = (height - scaled.height()) / 2;
            imageops::overlay(&mut canvas, &scaled, i64::from(x), i64::from(y));
            canvas
        }
    }
}

/// Scale an image for a model, falling back to the configured default size
pub fn prepare_for(
    image: &DynamicImage,
    model_input: Option<(u32, u32)>,
    config: &PreprocessConfig,
) -> RgbImage {
    let size = model_input
        .filter(|(w, h)| *w > 0 && *h > 0)
        .unwrap_or((config.input_width, config.input_height));
    prepare(image, size, config.scale_mode)
}
