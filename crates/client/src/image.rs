// crates/client/src/image.rs
//! Upload validation and data-URL encoding for subject images.

use base64::{engine::general_purpose::STANDARD, Engine};
use noisescope_core::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
}

impl ImageFormat {
    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
        }
    }
}

/// Identify an image by its magic bytes. Anything else is rejected before a
/// subject is created.
pub fn sniff_image(bytes: &[u8]) -> Result<ImageFormat, ValidationError> {
    if bytes.is_empty() {
        return Err(ValidationError::EmptyImage);
    }
    let format = if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        ImageFormat::Png
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        ImageFormat::Jpeg
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        ImageFormat::Gif
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        ImageFormat::Webp
    } else if bytes.starts_with(b"BM") && bytes.len() > 14 {
        ImageFormat::Bmp
    } else {
        return Err(ValidationError::NotAnImage {
            reason: "unrecognized file signature".to_string(),
        });
    };
    Ok(format)
}

pub fn to_data_url(bytes: &[u8], format: ImageFormat) -> String {
    format!("data:{};base64,{}", format.mime(), STANDARD.encode(bytes))
}

/// Validate `bytes` as an image and encode it for the worker.
pub fn encode_subject_image(bytes: &[u8]) -> Result<String, ValidationError> {
    let format = sniff_image(bytes)?;
    Ok(to_data_url(bytes, format))
}

/// Decode the payload of a `data:...;base64,` URL (or bare base64).
pub fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let payload = match url.split_once(";base64,") {
        Some((_, payload)) => payload,
        None => url,
    };
    STANDARD.decode(payload.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[test]
    fn test_sniff_known_formats() {
        assert_eq!(sniff_image(PNG_HEADER), Ok(ImageFormat::Png));
        assert_eq!(sniff_image(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]), Ok(ImageFormat::Jpeg));
        assert_eq!(sniff_image(b"GIF89a\x01\x00"), Ok(ImageFormat::Gif));
        assert_eq!(sniff_image(b"RIFF\0\0\0\0WEBPVP8 "), Ok(ImageFormat::Webp));
    }

    #[test]
    fn test_sniff_rejects_non_images() {
        assert_eq!(sniff_image(b""), Err(ValidationError::EmptyImage));
        assert!(matches!(
            sniff_image(b"%PDF-1.7 hello"),
            Err(ValidationError::NotAnImage { .. })
        ));
    }

    #[test]
    fn test_data_url_round_trip() {
        let url = encode_subject_image(PNG_HEADER).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(decode_data_url(&url).unwrap(), PNG_HEADER);
    }
}
