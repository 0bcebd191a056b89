//! Vision tool: turns a medical image plus a prompt into free-form text.
//!
//! Three interchangeable backends behind `VisionAnalyzer`: a lazily loaded
//! local model, a remote annotation endpoint, and a mock for tests. The
//! local load is guarded so concurrent first calls block on a single
//! initialization, and a failed load stays failed for the process lifetime.

pub mod local;
pub mod remote;
pub mod mock;

pub use local::*;
pub use remote::*;
pub use mock::*;

use base64::Engine as _;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum VisionError {
    #[error("Vision model unavailable: {0}")]
    Unavailable(String),

    #[error("Vision request timed out after {0}s")]
    Timeout(u64),

    #[error("Malformed vision response: {0}")]
    Protocol(String),

    #[error("Unrecognized image: {0}")]
    InvalidImage(String),

    #[error("Vision internal error: {0}")]
    Internal(String),
}

/// A validated input image, kept as raw bytes with its detected format.
#[derive(Debug, Clone)]
pub struct VisionImage {
    bytes: Vec<u8>,
    format: image::ImageFormat,
}

impl VisionImage {
    /// Accept raw bytes of a recognized image format.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, VisionError> {
        let format = image::guess_format(&bytes)
            .map_err(|e| VisionError::InvalidImage(e.to_string()))?;
        Ok(Self { bytes, format })
    }

    /// Accept a base64-encoded image.
    pub fn from_base64(encoded: &str) -> Result<Self, VisionError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| VisionError::InvalidImage(format!("invalid base64: {e}")))?;
        Self::from_bytes(bytes)
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn format(&self) -> image::ImageFormat {
        self.format
    }
}

/// Backend abstraction for medical image analysis.
pub trait VisionAnalyzer: Send + Sync {
    /// Analyze the image, returning free-form medical text.
    fn analyze(&self, image: &VisionImage, prompt: &str) -> Result<String, VisionError>;

    /// Quick reachability probe for health reporting. Must not trigger a
    /// model load.
    fn probe(&self) -> bool;
}

#[cfg(test)]
pub(crate) fn png_fixture() -> VisionImage {
    // PNG magic + IHDR header is enough for format detection; the vision
    // backends ship bytes onward without decoding pixels.
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R']);
    bytes.extend_from_slice(&[0; 17]);
    VisionImage::from_bytes(bytes).expect("fixture must be a recognizable PNG")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_bytes_recognized() {
        let img = png_fixture();
        assert_eq!(img.format(), image::ImageFormat::Png);
        assert!(!img.is_empty());
    }

    #[test]
    fn garbage_bytes_rejected() {
        let result = VisionImage::from_bytes(vec![0x00, 0x01, 0x02, 0x03]);
        assert!(matches!(result, Err(VisionError::InvalidImage(_))));
    }

    #[test]
    fn base64_round_trip() {
        let img = png_fixture();
        let encoded = img.to_base64();
        let decoded = VisionImage::from_base64(&encoded).unwrap();
        assert_eq!(decoded.len(), img.len());
        assert_eq!(decoded.format(), image::ImageFormat::Png);
    }

    #[test]
    fn invalid_base64_rejected() {
        let result = VisionImage::from_base64("not-base64!!!");
        assert!(matches!(result, Err(VisionError::InvalidImage(_))));
    }
}
