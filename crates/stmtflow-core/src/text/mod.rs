//! Format-aware text extraction with OCR fallback for scanned PDFs.

mod docx;

pub use docx::docx_text;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::models::config::DetectionConfig;
use crate::ocr::OcrBackend;
use crate::pdf::{PdfExtractor, PdfProcessor};

/// Document formats with a content extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Word,
    Csv,
    Other,
}

impl DocumentFormat {
    /// Format implied by a file name's suffix (case-insensitive).
    pub fn from_filename(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.ends_with(".pdf") {
            DocumentFormat::Pdf
        } else if lower.ends_with(".doc") || lower.ends_with(".docx") {
            DocumentFormat::Word
        } else if lower.ends_with(".csv") {
            DocumentFormat::Csv
        } else {
            DocumentFormat::Other
        }
    }
}

/// Extracts plain text from attachment bytes. Text keeps its original case.
#[derive(Clone)]
pub struct TextExtractor {
    config: DetectionConfig,
    ocr: Option<Arc<dyn OcrBackend>>,
}

impl TextExtractor {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config, ocr: None }
    }

    pub fn with_ocr(mut self, ocr: Option<Arc<dyn OcrBackend>>) -> Self {
        self.ocr = ocr;
        self
    }

    pub fn has_ocr(&self) -> bool {
        self.ocr.is_some()
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Text of a document, or `None` when nothing could be read.
    pub fn extract(&self, bytes: &[u8], filename: &str) -> Option<String> {
        match DocumentFormat::from_filename(filename) {
            DocumentFormat::Pdf => self.pdf_text(bytes),
            DocumentFormat::Word => match docx_text(bytes) {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!("Word extraction failed for {}: {}", filename, e);
                    None
                }
            },
            DocumentFormat::Csv => csv_text(bytes),
            DocumentFormat::Other => {
                info!("File type not supported for content extraction: {}", filename);
                None
            }
        }
    }

    /// Text layer of the leading pages; OCR when the layer is too short.
    ///
    /// If OCR is unavailable or finds nothing, a short but non-empty text
    /// layer is still returned.
    pub fn pdf_text(&self, bytes: &[u8]) -> Option<String> {
        let pdf = match PdfExtractor::from_bytes(bytes) {
            Ok(pdf) => pdf,
            Err(e) => {
                warn!("PDF unreadable (corrupt, encrypted or malformed): {}", e);
                return None;
            }
        };

        let layer = pdf
            .extract_leading_text(self.config.max_pdf_pages)
            .unwrap_or_else(|e| {
                debug!("Text layer extraction failed: {}", e);
                String::new()
            });

        if layer.trim().chars().count() > self.config.min_text_length {
            debug!("Extracted {} characters from the text layer", layer.len());
            return Some(layer);
        }

        info!("Minimal or no text layer, trying OCR");
        if let Some(ocr_text) = self.ocr_pdf(&pdf, self.config.ocr_pages) {
            return Some(ocr_text);
        }

        if layer.trim().is_empty() { None } else { Some(layer) }
    }

    /// Text layer of page one only.
    pub fn first_page_text(&self, bytes: &[u8]) -> Option<String> {
        let pdf = PdfExtractor::from_bytes(bytes).ok()?;
        pdf.extract_page_text(1).ok()
    }

    /// OCR of page one only.
    pub fn first_page_ocr(&self, bytes: &[u8]) -> Option<String> {
        let pdf = PdfExtractor::from_bytes(bytes).ok()?;
        self.ocr_pdf(&pdf, 1)
    }

    fn ocr_pdf(&self, pdf: &PdfExtractor, pages: u32) -> Option<String> {
        let Some(ocr) = self.ocr.as_ref() else {
            debug!("No OCR backend configured");
            return None;
        };

        let last = pdf.page_count().min(pages);
        let mut text = String::new();
        for page in 1..=last {
            let image = match pdf.render_page(page) {
                Ok(image) => image,
                Err(e) => {
                    debug!("Page {} has no image to OCR: {}", page, e);
                    continue;
                }
            };
            match ocr.recognize(&image) {
                Ok(page_text) => {
                    debug!("OCR page {}/{}: {} chars", page, last, page_text.len());
                    text.push_str(&page_text);
                    text.push('\n');
                }
                Err(e) => warn!("OCR failed on page {}: {}", page, e),
            }
        }

        if text.trim().is_empty() {
            warn!("OCR completed but no text extracted");
            None
        } else {
            info!("OCR extracted {} characters", text.len());
            Some(text)
        }
    }
}

/// All cells of a UTF-8 CSV joined by spaces.
fn csv_text(bytes: &[u8]) -> Option<String> {
    let content = match std::str::from_utf8(bytes) {
        Ok(c) => c,
        Err(e) => {
            warn!("CSV is not valid UTF-8: {}", e);
            return None;
        }
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        match record {
            Ok(record) => rows.push(record.iter().collect::<Vec<_>>().join(" ")),
            Err(e) => {
                warn!("CSV extraction failed: {}", e);
                return None;
            }
        }
    }
    Some(rows.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OcrError;
    use crate::pdf::TextPdfWriter;
    use image::DynamicImage;
    use pretty_assertions::assert_eq;

    struct FixedOcr(&'static str);

    impl OcrBackend for FixedOcr {
        fn recognize(&self, _image: &DynamicImage) -> Result<String, OcrError> {
            Ok(self.0.to_string())
        }
    }

    fn pdf_with(lines: &[&str]) -> Vec<u8> {
        let mut writer = TextPdfWriter::new();
        for line in lines {
            writer.push_line(line);
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_format_from_filename() {
        assert_eq!(DocumentFormat::from_filename("A.PDF"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_filename("x.docx"), DocumentFormat::Word);
        assert_eq!(DocumentFormat::from_filename("x.doc"), DocumentFormat::Word);
        assert_eq!(DocumentFormat::from_filename("x.csv"), DocumentFormat::Csv);
        assert_eq!(DocumentFormat::from_filename("x.xlsx"), DocumentFormat::Other);
    }

    #[test]
    fn test_csv_cells_joined() {
        let text = csv_text(b"Date,Detail,Balance\n2024-01-02,\"Opening, carried\",100\n").unwrap();
        assert_eq!(text, "Date Detail Balance 2024-01-02 Opening, carried 100");
    }

    #[test]
    fn test_csv_rejects_invalid_utf8() {
        assert_eq!(csv_text(&[0xff, 0xfe, b'a']), None);
    }

    #[test]
    fn test_pdf_text_layer_is_used_when_long_enough() {
        let long_line = "Beginning Balance 1,000.00 Ending Balance 2,000.00 Account Summary for January";
        let bytes = pdf_with(&[long_line, long_line]);
        let extractor = TextExtractor::new(DetectionConfig::default())
            .with_ocr(Some(Arc::new(FixedOcr("from ocr"))));

        let text = extractor.extract(&bytes, "statement.pdf").unwrap();
        assert!(text.contains("Ending Balance"));
        assert!(!text.contains("from ocr"));
    }

    #[test]
    fn test_short_text_layer_falls_back_to_ocr() {
        let bytes = crate::pdf::fixtures::scanned_page(&["Scan 01"], 8, 8);
        let extractor = TextExtractor::new(DetectionConfig::default())
            .with_ocr(Some(Arc::new(FixedOcr("ACME CORP monthly statement"))));

        let text = extractor.pdf_text(&bytes).unwrap();
        assert_eq!(text.trim(), "ACME CORP monthly statement");
        assert_eq!(
            extractor.first_page_ocr(&bytes).as_deref().map(str::trim),
            Some("ACME CORP monthly statement")
        );
    }

    #[test]
    fn test_has_ocr_reflects_backend() {
        let config = DetectionConfig::default();
        assert!(!TextExtractor::new(config.clone()).has_ocr());
        assert!(TextExtractor::new(config)
            .with_ocr(Some(Arc::new(FixedOcr("x"))))
            .has_ocr());
    }

    #[test]
    fn test_image_only_pdf_without_ocr_yields_none() {
        let bytes = crate::pdf::fixtures::scanned_page(&[], 8, 8);
        let extractor = TextExtractor::new(DetectionConfig::default());
        assert_eq!(extractor.pdf_text(&bytes), None);
    }

    #[test]
    fn test_short_pdf_keeps_text_layer_without_ocr() {
        let bytes = pdf_with(&["Short page"]);
        let extractor = TextExtractor::new(DetectionConfig::default());
        let text = extractor.extract(&bytes, "scan.pdf").unwrap();
        assert!(text.contains("Short page"));
    }

    #[test]
    fn test_unreadable_pdf_yields_none() {
        let extractor = TextExtractor::new(DetectionConfig::default());
        assert_eq!(extractor.extract(b"garbage", "broken.pdf"), None);
    }

    #[test]
    fn test_unsupported_format_yields_none() {
        let extractor = TextExtractor::new(DetectionConfig::default());
        assert_eq!(extractor.extract(b"PK\x03\x04", "sheet.xlsx"), None);
    }

    #[test]
    fn test_first_page_text() {
        let bytes = pdf_with(&["ACME CORP LLC", "Account Statement"]);
        let extractor = TextExtractor::new(DetectionConfig::default());
        let text = extractor.first_page_text(&bytes).unwrap();
        assert!(text.contains("ACME CORP LLC"));
    }
}
