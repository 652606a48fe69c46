//! PDF access: page-limited text layer and page images for OCR.

mod extractor;
mod writer;

pub use extractor::PdfExtractor;
pub use writer::TextPdfWriter;

use crate::error::PdfError;
use image::DynamicImage;

/// Kind of content a PDF carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfType {
    /// Contains extractable text.
    Text,
    /// Contains only images (scanned document).
    Image,
    /// Contains both text and images.
    Hybrid,
    /// Empty or unreadable.
    Empty,
}

/// Result type for PDF operations.
pub type Result<T> = std::result::Result<T, PdfError>;

/// Read access to a loaded PDF.
pub trait PdfProcessor {
    /// Load a PDF from bytes.
    fn load(&mut self, data: &[u8]) -> Result<()>;

    /// Number of pages in the PDF.
    fn page_count(&self) -> u32;

    /// Classify the document by the content it carries.
    fn analyze(&self) -> PdfType;

    /// Text layer of one page (1-indexed).
    fn extract_page_text(&self, page: u32) -> Result<String>;

    /// Text layer of the first `max_pages` pages, pages separated by newlines.
    fn extract_leading_text(&self, max_pages: u32) -> Result<String>;

    /// Best available image of a page, for OCR.
    fn render_page(&self, page: u32) -> Result<DynamicImage>;
}

/// One-page PDF fixtures shaped like scanner output.
#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// A page painted by an 8-bit DeviceGray image of `width`x`height`, with
    /// `lines` as a thin text layer on top.
    pub fn scanned_page(lines: &[&str], width: i64, height: i64) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let pixels = vec![200u8; (width * height).max(0) as usize];
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8i64,
            },
            pixels,
        ));

        let mut operations = vec![
            Operation::new("q", vec![]),
            Operation::new("cm", vec![595i64.into(), 0i64.into(), 0i64.into(), 842i64.into(), 0i64.into(), 0i64.into()]),
            Operation::new("Do", vec!["Im1".into()]),
            Operation::new("Q", vec![]),
        ];
        for (row, line) in lines.iter().enumerate() {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 10i64.into()]));
            operations.push(Operation::new("Td", vec![50i64.into(), (790 - 14 * row as i64).into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations }.encode().unwrap();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
                "XObject" => dictionary! { "Im1" => image_id },
            },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::from(page_id)],
                "Count" => 1i64,
                "MediaBox" => vec![0i64.into(), 0i64.into(), 595i64.into(), 842i64.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }
}
