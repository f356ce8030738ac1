//! Image encoding: prescription photo bytes → base64 `ImageData`.
//!
//! Vision models accept images as base64 data embedded in the JSON request
//! body. PNG and JPEG uploads are passed through untouched; anything else
//! the `image` crate can decode is re-encoded as lossless PNG so handwriting
//! strokes stay crisp.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Encode an uploaded image for a vision model.
///
/// `detail: "high"` asks tiling models for the full tile budget; small
/// dosage annotations are lost at low detail.
pub fn encode_image(bytes: &[u8]) -> Result<ImageData, image::ImageError> {
    match image::guess_format(bytes)? {
        ImageFormat::Png => Ok(wrap(STANDARD.encode(bytes), "image/png")),
        ImageFormat::Jpeg => Ok(wrap(STANDARD.encode(bytes), "image/jpeg")),
        _ => {
            let img = image::load_from_memory(bytes)?;
            encode_png(&img)
        }
    }
}

/// Encode a decoded image as a base64 PNG.
pub fn encode_png(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(wrap(STANDARD.encode(&buf), "image/png"))
}

fn wrap(b64: String, mime: &str) -> ImageData {
    debug!("Encoded image → {} bytes base64 ({})", b64.len(), mime);
    ImageData::new(b64, mime).with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn png_passes_through() {
        let bytes = png_bytes();
        let data = encode_image(&bytes).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(STANDARD.decode(&data.data).unwrap(), bytes);
    }

    #[test]
    fn decoded_image_encodes_as_png() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        let data = encode_png(&img).unwrap();
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(decoded.starts_with(b"\x89PNG"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(encode_image(b"not an image").is_err());
    }
}
