// src/services/image_codec.rs
use crate::errors::StudioError;
use crate::models::ImagePayload;
use base64::{Engine as _, engine::general_purpose};
use image::{GenericImageView, ImageFormat};

const MAX_DIMENSION: u32 = 4096;

/// Validate an uploaded file and wrap it as a base64 payload. The mime type
/// is sniffed from the bytes rather than trusted from the upload.
pub fn file_to_payload(data: &[u8]) -> Result<ImagePayload, StudioError> {
    let img = image::load_from_memory(data)
        .map_err(|e| StudioError::Codec(format!("Invalid image format: {}", e)))?;

    let (width, height) = img.dimensions();
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(StudioError::Codec(format!(
            "Image dimensions exceed {}x{}",
            MAX_DIMENSION, MAX_DIMENSION
        )));
    }

    let format = image::guess_format(data)
        .map_err(|e| StudioError::Codec(format!("Unrecognized image format: {}", e)))?;

    Ok(ImagePayload {
        base64: general_purpose::STANDARD.encode(data),
        mime_type: mime_for_format(format).to_string(),
    })
}

fn mime_for_format(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        _ => "application/octet-stream",
    }
}

pub fn to_data_url(payload: &ImagePayload) -> String {
    format!("data:{};base64,{}", payload.mime_type, payload.base64)
}

/// Split a `data:` URL back into its payload for round-tripping through
/// edit and animate calls.
pub fn from_data_url(url: &str) -> Result<ImagePayload, StudioError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| StudioError::Codec("Not a data URL".to_string()))?;
    let (mime_type, base64) = rest
        .split_once(";base64,")
        .ok_or_else(|| StudioError::Codec("Data URL is not base64-encoded".to_string()))?;

    Ok(ImagePayload {
        base64: base64.to_string(),
        mime_type: mime_type.to_string(),
    })
}

pub fn payload_bytes(payload: &ImagePayload) -> Result<Vec<u8>, StudioError> {
    general_purpose::STANDARD
        .decode(&payload.base64)
        .map_err(|e| StudioError::Codec(format!("Failed to decode image: {}", e)))
}
