//! Image encoding: page raster → base64 PNG wrapped in `ImageData`.
//!
//! Vision APIs take images as base64 payloads inside the JSON request body.
//! PNG is lossless; JPEG ringing around thin Devanagari strokes (matras,
//! halants) is enough to flip characters. Voter lists are printed in black
//! on white, so pages are converted to 8-bit grayscale first, which cuts the
//! payload to roughly a third without losing anything the model needs.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page for the vision API.
///
/// `detail: "high"` keeps providers from downscaling to a single low-res
/// tile, which would make the small print unreadable.
pub fn encode_page(img: &DynamicImage, grayscale: bool) -> Result<ImageData, image::ImageError> {
    let png = encode_png(img, grayscale)?;
    let b64 = STANDARD.encode(&png);
    debug!(
        "Encoded {}x{} page → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Raw PNG bytes, optionally reduced to 8-bit luma.
pub fn encode_png(img: &DynamicImage, grayscale: bool) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    if grayscale {
        DynamicImage::ImageLuma8(img.to_luma8())
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    } else {
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    }
    Ok(buf)
}
