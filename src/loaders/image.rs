use std::path::Path;

use trove_core::models::{Document, DocumentContent, DocumentKind};

use super::{LoadError, WorkerContext};

/// One document per image, with OCR run here on the worker thread.
pub fn load(path: &Path, ctx: &WorkerContext) -> Result<Vec<Document>, LoadError> {
    let ocr_text = ctx.ocr.extract_text(path);
    Ok(vec![Document::new(
        path,
        DocumentKind::Image,
        DocumentContent::Image {
            path: path.to_path_buf(),
            ocr_text,
        },
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loaders::LoaderSettings;
    use std::sync::Arc;
    use trove_core::ocr::OcrPort;

    struct FixedOcr;

    impl OcrPort for FixedOcr {
        fn extract_text(&self, _image: &Path) -> String {
            "MAGURO 450 YEN".into()
        }
    }

    #[test]
    fn test_ocr_text_attached() {
        let ctx = WorkerContext {
            ocr: Arc::new(FixedOcr),
            settings: LoaderSettings::default(),
        };
        let docs = load(Path::new("sushi/tuna.jpg"), &ctx).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].ocr_text(), Some("MAGURO 450 YEN"));
        assert_eq!(docs[0].image_path(), Some(Path::new("sushi/tuna.jpg")));
    }
}
