use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;

/// Crop rectangle in source-image coordinates.
#[derive(Debug, Clone, Copy)]
pub struct CropRect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// Resource guards applied before any pixel work.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_bytes: u64,
    pub max_pixels: u64,
}

pub fn decode_image(data: &[u8]) -> Result<DynamicImage, ImageProcError> {
    image::load_from_memory(data).map_err(ImageProcError::Decode)
}

/// Guard against images that decode fine but blow the pixel budget.
pub fn validate_image(img: &DynamicImage, max_pixels: u64) -> Result<(), ImageProcError> {
    if max_pixels == 0 {
        return Ok(());
    }
    let pixels = u64::from(img.width()) * u64::from(img.height());
    if pixels > max_pixels {
        return Err(ImageProcError::TooManyPixels);
    }
    Ok(())
}

pub fn crop_image(img: &DynamicImage, rect: CropRect) -> Result<DynamicImage, ImageProcError> {
    if rect.width <= 0 || rect.height <= 0 || rect.x < 0 || rect.y < 0 {
        return Err(ImageProcError::InvalidCrop);
    }

    let (x, y) = (rect.x as u64, rect.y as u64);
    let (width, height) = (rect.width as u64, rect.height as u64);
    if x + width > u64::from(img.width()) || y + height > u64::from(img.height()) {
        return Err(ImageProcError::CropOutOfBounds);
    }

    Ok(img.crop_imm(x as u32, y as u32, width as u32, height as u32))
}

pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageProcError> {
    let quality = if quality == 0 || quality > 100 {
        90
    } else {
        quality
    };

    // JPEG has no alpha channel; flatten before encoding.
    let rgb = img.to_rgb8();
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    rgb.write_with_encoder(encoder)
        .map_err(ImageProcError::Encode)?;
    Ok(buf.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum ImageProcError {
    #[error("failed to decode image: {0}")]
    Decode(image::ImageError),

    #[error("image exceeds maximum pixel count")]
    TooManyPixels,

    #[error("crop rectangle is invalid")]
    InvalidCrop,

    #[error("crop rectangle exceeds image bounds")]
    CropOutOfBounds,

    #[error("failed to encode jpeg: {0}")]
    Encode(image::ImageError),
}
