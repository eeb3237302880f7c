//! Pluggable OCR engine interface for scanned pages and extracted images.
//!
//! `OcrProvider` is the seam the ingestion worker's OCR-capable parser and
//! image-model parser call through. The default implementation shells out to
//! a local Tesseract install via `rusty-tesseract` (feature `ocr-tesseract`,
//! on by default); disabling the feature leaves the trait usable but with no
//! concrete provider registered, so OCR-dependent parser steps simply fail
//! over to the next parser in the preference list.

use crate::models::OcrQualityMetrics;

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("no OCR provider available")]
    ProviderNotAvailable,
    #[error("unsupported image format")]
    UnsupportedImageFormat,
    #[error("invalid image data: {0}")]
    InvalidImageData(String),
    #[error("OCR processing failed: {0}")]
    ProcessingFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of OCR-ing a single image: the recognized text plus whatever
/// quality signal the engine reports.
pub struct OcrOutput {
    pub text: String,
    pub metrics: OcrQualityMetrics,
}

pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;
    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrOutput, OcrError>;
}

/// No-op provider used when the `ocr-tesseract` feature is disabled or no
/// Tesseract binary is reachable. Always reports unavailable so callers fall
/// back to the next parser in the preference list rather than erroring hard.
pub struct UnavailableProvider;

impl OcrProvider for UnavailableProvider {
    fn name(&self) -> &str {
        "unavailable"
    }
    fn ocr_image(&self, _image_bytes: &[u8]) -> Result<OcrOutput, OcrError> {
        Err(OcrError::ProviderNotAvailable)
    }
}

#[cfg(feature = "ocr-tesseract")]
pub struct TesseractProvider {
    pub lang: String,
}

#[cfg(feature = "ocr-tesseract")]
impl Default for TesseractProvider {
    fn default() -> Self {
        Self {
            lang: "eng".to_string(),
        }
    }
}

#[cfg(feature = "ocr-tesseract")]
impl OcrProvider for TesseractProvider {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrOutput, OcrError> {
        let img = image::load_from_memory(image_bytes)
            .map_err(|e| OcrError::InvalidImageData(e.to_string()))?;

        let tmp = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .map_err(OcrError::Io)?;
        img.save_with_format(tmp.path(), image::ImageFormat::Png)
            .map_err(|e| OcrError::InvalidImageData(e.to_string()))?;

        let image_data = rusty_tesseract::Image::from_path(tmp.path())
            .map_err(|e| OcrError::ProcessingFailed(e.to_string()))?;
        let args = rusty_tesseract::Args {
            lang: self.lang.clone(),
            ..Default::default()
        };

        let text = rusty_tesseract::image_to_string(&image_data, &args)
            .map_err(|e| OcrError::ProcessingFailed(e.to_string()))?;

        let char_count = text.chars().count();
        let word_count = text.split_whitespace().count();

        Ok(OcrOutput {
            text,
            metrics: OcrQualityMetrics {
                char_count,
                word_count,
                confidence: None,
            },
        })
    }
}

/// Build the default provider for the configured feature set: Tesseract when
/// compiled in, otherwise a provider that always reports unavailable.
pub fn default_provider() -> Box<dyn OcrProvider> {
    #[cfg(feature = "ocr-tesseract")]
    {
        Box::new(TesseractProvider::default())
    }
    #[cfg(not(feature = "ocr-tesseract"))]
    {
        Box::new(UnavailableProvider)
    }
}

/// When a parser reports that images exist but extracts none, insert
/// `max(1, text_length / divisor)` placeholder markers. A workaround for
/// parsers that under-report images, not a principle to design further
/// around.
pub fn estimate_placeholder_image_count(total_text_length: usize, divisor: usize) -> usize {
    (total_text_length / divisor.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_heuristic_floors_at_one() {
        assert_eq!(estimate_placeholder_image_count(0, 5000), 1);
        assert_eq!(estimate_placeholder_image_count(4999, 5000), 1);
        assert_eq!(estimate_placeholder_image_count(12000, 5000), 2);
    }

    #[test]
    fn unavailable_provider_always_errs() {
        let p = UnavailableProvider;
        assert!(matches!(
            p.ocr_image(b"whatever"),
            Err(OcrError::ProviderNotAvailable)
        ));
    }
}
