//! ImageNet-style preprocessing: shorter side to 256, center crop to 224,
//! scale to `[0, 1]`, then per-channel mean/std normalization in NCHW layout.

use image::{imageops, imageops::FilterType, ImageReader, RgbImage};
use ndarray::{Array, Ix4};
use std::path::Path;
use thiserror::Error;

pub const RESIZE_SHORTER_SIDE: u32 = 256;
pub const CROP_SIZE: u32 = 224;
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error decoding image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Image is too small to crop: {width}x{height}")]
    TooSmall { width: u32, height: u32 },
}

pub fn preprocess_image(path: &Path) -> Result<Array<f32, Ix4>, PreprocessError> {
    let img = load_rgb(path)?;
    let img = resize_shorter_side(&img, RESIZE_SHORTER_SIDE);
    let img = center_crop(&img, CROP_SIZE)?;

    Ok(to_normalized_tensor(&img))
}

/// Decodes by content rather than by extension and drops any alpha or palette.
pub fn load_rgb(path: &Path) -> Result<RgbImage, PreprocessError> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(img.to_rgb8())
}

pub fn resize_shorter_side(img: &RgbImage, size: u32) -> RgbImage {
    let (width, height) = img.dimensions();
    let (new_width, new_height) = if width <= height {
        (size, scale_longer_side(height, width, size))
    } else {
        (scale_longer_side(width, height, size), size)
    };

    if (new_width, new_height) == (width, height) {
        return img.clone();
    }

    imageops::resize(img, new_width, new_height, FilterType::Triangle)
}

fn scale_longer_side(longer: u32, shorter: u32, size: u32) -> u32 {
    let scaled = (size as u64 * longer as u64) / shorter.max(1) as u64;
    scaled.max(1) as u32
}

pub fn center_crop(img: &RgbImage, size: u32) -> Result<RgbImage, PreprocessError> {
    let (width, height) = img.dimensions();
    if width < size || height < size {
        return Err(PreprocessError::TooSmall { width, height });
    }

    let left = ((width - size) as f64 / 2.0).round_ties_even() as u32;
    let top = ((height - size) as f64 / 2.0).round_ties_even() as u32;

    Ok(imageops::crop_imm(img, left, top, size, size).to_image())
}

pub fn to_normalized_tensor(img: &RgbImage) -> Array<f32, Ix4> {
    let (width, height) = img.dimensions();
    let mut input = Array::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in img.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        for channel in 0..3 {
            let value = pixel.0[channel] as f32 / 255.;
            input[[0, channel, y, x]] = (value - MEAN[channel]) / STD[channel];
        }
    }

    input
}
