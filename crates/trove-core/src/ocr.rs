//! OCR port.

use std::path::Path;

/// Extracts text from an image.
///
/// Implementations never fail: an unreadable image, a missing engine or a
/// blank page all yield an empty string. Calls are synchronous because
/// they run on parse worker threads.
pub trait OcrPort: Send + Sync {
    fn extract_text(&self, image: &Path) -> String;
}

/// OCR backend used when OCR is disabled.
pub struct NoOcr;

impl OcrPort for NoOcr {
    fn extract_text(&self, _image: &Path) -> String {
        String::new()
    }
}
