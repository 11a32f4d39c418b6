//! OCR backends for the [`OcrPort`] trait.

use anyhow::{bail, Result};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use trove_core::ocr::{NoOcr, OcrPort};

use crate::config::OcrConfig;

/// Runs the `tesseract` CLI and reads the text from stdout.
pub struct TesseractOcr {
    binary: String,
    language: String,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            language: config.language.clone(),
        }
    }
}

impl OcrPort for TesseractOcr {
    fn extract_text(&self, image: &Path) -> String {
        let output = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output();

        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_string(),
            Ok(out) => {
                tracing::debug!(
                    path = %image.display(),
                    status = %out.status,
                    "tesseract failed"
                );
                String::new()
            }
            Err(e) => {
                tracing::debug!(path = %image.display(), error = %e, "tesseract not runnable");
                String::new()
            }
        }
    }
}

/// Create the configured OCR backend.
pub fn create_ocr(config: &OcrConfig) -> Result<Arc<dyn OcrPort>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(NoOcr)),
        "tesseract" => Ok(Arc::new(TesseractOcr::new(config))),
        other => bail!("Unknown OCR provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_yields_empty_text() {
        let ocr = TesseractOcr {
            binary: "definitely-not-a-real-tesseract".into(),
            language: "eng".into(),
        };
        assert_eq!(ocr.extract_text(Path::new("/tmp/none.png")), "");
    }

    #[test]
    fn test_disabled_ocr() {
        let ocr = create_ocr(&OcrConfig::default()).unwrap();
        assert_eq!(ocr.extract_text(Path::new("x.png")), "");
    }
}
