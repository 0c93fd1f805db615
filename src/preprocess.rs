use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageReader};
use ndarray::{Array, Ix4};
use std::io::Cursor;
use thiserror::Error;

pub const INPUT_WIDTH: u32 = 224;
pub const INPUT_HEIGHT: u32 = 224;

const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unable to read image bytes: {0}")]
    Unreadable(#[from] std::io::Error),
    #[error("Unsupported or corrupt image: {0}")]
    Undecodable(#[from] image::ImageError),
    #[error("Decoded image has zero width or height")]
    ZeroDimensions,
}

#[derive(Error, Debug)]
#[error("Resized image is {width}x{height}, expected 224x224")]
pub struct NormalizeError {
    width: u32,
    height: u32,
}

/// Decodes an encoded image (format sniffed from the bytes) into pixel data.
/// Alpha channels and palettes are dealt with later, when `normalize`
/// flattens to RGB.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let img = reader.decode()?;

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::ZeroDimensions);
    }

    Ok(img)
}

/// Converts a decoded image into the model's input layout: resized to
/// 224x224, scaled to [0,1], mean/std normalized per channel, and written
/// planar (channel, row, column) with a leading batch dimension.
///
/// Triangle (bilinear) resampling is the committed filter choice.
pub fn normalize(img: &DynamicImage) -> Result<Array<f32, Ix4>, NormalizeError> {
    let resized = img.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let (width, height) = rgb.dimensions();
    if (width, height) != (INPUT_WIDTH, INPUT_HEIGHT) {
        return Err(NormalizeError { width, height });
    }

    let mut input = Array::zeros((1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for channel in 0..3 {
            let scaled = pixel[channel] as f32 / 255.;
            input[[0, channel, y as usize, x as usize]] =
                (scaled - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel];
        }
    }

    Ok(input)
}
