use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::DynamicImage;

use crate::error::AppError;

/// Upper bound on a decoded upload; webcam frames are far smaller.
const MAX_IMAGE_BYTES: usize = 8 * 1024 * 1024;

/// Accepts raw base64 or a `data:image/...;base64,` URL.
pub fn decode_base64_image(input: &str) -> Result<Vec<u8>, AppError> {
    let payload = match input.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => input,
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(AppError::bad_request("Image required"));
    }

    let bytes = STANDARD
        .decode(payload)
        .map_err(|_| AppError::bad_request("Image is not valid base64"))?;
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(AppError::bad_request("Image too large"));
    }
    Ok(bytes)
}

pub fn load_image(bytes: &[u8]) -> Result<DynamicImage, AppError> {
    image::load_from_memory(bytes).map_err(|_| AppError::bad_request("Invalid image"))
}

/// Re-encodes as JPEG for storage, dropping any alpha channel.
pub fn to_jpeg(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buf, image::ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
pub fn tiny_png_base64() -> String {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([120, 120, 120]));
    let mut buf = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    STANDARD.encode(buf.into_inner())
}
