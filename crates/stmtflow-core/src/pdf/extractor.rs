//! PDF text and image extraction using lopdf and pdf-extract.

use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, trace};

use super::{PdfProcessor, PdfType, Result};
use crate::error::PdfError;

/// Guards against cyclic `Parent` chains in malformed page trees.
const MAX_TREE_DEPTH: usize = 32;

/// PDF content extractor using lopdf.
pub struct PdfExtractor {
    document: Option<Document>,
    raw_data: Vec<u8>,
}

impl PdfExtractor {
    /// Create a new PDF extractor.
    pub fn new() -> Self {
        Self {
            document: None,
            raw_data: Vec::new(),
        }
    }

    /// Load a PDF in one step.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut extractor = Self::new();
        extractor.load(data)?;
        Ok(extractor)
    }

    fn document(&self) -> Result<&Document> {
        self.document
            .as_ref()
            .ok_or_else(|| PdfError::Parse("No document loaded".to_string()))
    }

    /// Full text through pdf-extract; handles fonts lopdf cannot decode.
    fn extract_full_text(&self) -> Result<String> {
        pdf_extract::extract_text_from_mem(&self.raw_data)
            .map_err(|e| PdfError::TextExtraction(e.to_string()))
    }

    /// Image XObjects referenced by a page, following inherited resources.
    fn page_images(&self, doc: &Document, page_id: ObjectId) -> Vec<DynamicImage> {
        let Some(resources) = inherited_resources(doc, page_id) else {
            return Vec::new();
        };
        let Ok(xobjects) = resources.get(b"XObject") else {
            return Vec::new();
        };
        let Ok((_, Object::Dictionary(xobjects))) = doc.dereference(xobjects) else {
            return Vec::new();
        };

        xobjects
            .iter()
            .filter_map(|(_, reference)| doc.dereference(reference).ok())
            .filter_map(|(_, obj)| decode_image(doc, obj))
            .collect()
    }

    /// Every image in the document, in object order.
    fn document_images(&self, doc: &Document) -> Vec<DynamicImage> {
        doc.objects
            .values()
            .filter_map(|obj| decode_image(doc, obj))
            .collect()
    }
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfProcessor for PdfExtractor {
    fn load(&mut self, data: &[u8]) -> Result<()> {
        let mut doc = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

        if doc.is_encrypted() {
            if doc.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("Decrypted PDF with empty password");

            let mut decrypted = Vec::new();
            doc.save_to(&mut decrypted)
                .map_err(|e| PdfError::Parse(format!("Failed to save decrypted PDF: {}", e)))?;
            self.raw_data = decrypted;
        } else {
            self.raw_data = data.to_vec();
        }

        let page_count = doc.get_pages().len();
        if page_count == 0 {
            return Err(PdfError::NoPages);
        }

        debug!("Loaded PDF with {} pages", page_count);
        self.document = Some(doc);
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.document
            .as_ref()
            .map(|doc| doc.get_pages().len() as u32)
            .unwrap_or(0)
    }

    fn analyze(&self) -> PdfType {
        let Ok(doc) = self.document() else {
            return PdfType::Empty;
        };
        let text_len = self
            .extract_leading_text(self.page_count())
            .map(|t| t.trim().len())
            .unwrap_or(0);
        let has_text = text_len > 50;
        let has_images = doc.objects.values().any(|obj| is_image(obj));

        let pdf_type = match (has_text, has_images) {
            (true, false) => PdfType::Text,
            (false, true) => PdfType::Image,
            (true, true) => PdfType::Hybrid,
            (false, false) => PdfType::Empty,
        };
        debug!("PDF analysis: {} chars, images={} -> {:?}", text_len, has_images, pdf_type);
        pdf_type
    }

    fn extract_page_text(&self, page: u32) -> Result<String> {
        let doc = self.document()?;
        if !doc.get_pages().contains_key(&page) {
            return Err(PdfError::InvalidPage(page));
        }
        doc.extract_text(&[page])
            .map_err(|e| PdfError::TextExtraction(e.to_string()))
    }

    fn extract_leading_text(&self, max_pages: u32) -> Result<String> {
        let last = self.page_count().min(max_pages);
        let mut text = String::new();
        let mut failures = 0;

        for page in 1..=last {
            match self.extract_page_text(page) {
                Ok(page_text) => {
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push_str(&page_text);
                }
                Err(e) => {
                    trace!("Page {} text layer unavailable: {}", page, e);
                    failures += 1;
                }
            }
        }

        // lopdf cannot decode every font; pdf-extract covers the rest but
        // only works on the whole document.
        if failures > 0 && text.trim().is_empty() {
            debug!("Falling back to pdf-extract for the text layer");
            return self.extract_full_text();
        }
        Ok(text)
    }

    fn render_page(&self, page: u32) -> Result<DynamicImage> {
        let doc = self.document()?;
        let pages = doc.get_pages();
        let page_id = pages.get(&page).ok_or(PdfError::InvalidPage(page))?;

        if let Some(image) = self.page_images(doc, *page_id).into_iter().next() {
            return Ok(image);
        }

        // Scanners sometimes store page images outside the page resources.
        let mut all = self.document_images(doc);
        let index = (page - 1) as usize;
        if index < all.len() {
            return Ok(all.swap_remove(index));
        }

        Err(PdfError::ImageExtraction(format!("no image found for page {}", page)))
    }
}

fn is_image(obj: &Object) -> bool {
    match obj {
        Object::Stream(stream) => stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|name| name == b"Image")
            .unwrap_or(false),
        _ => false,
    }
}

/// Resources dictionary of a page, walking up the page tree if needed.
fn inherited_resources(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
    let mut node_id = page_id;
    for _ in 0..MAX_TREE_DEPTH {
        let Ok(Object::Dictionary(node)) = doc.get_object(node_id) else {
            return None;
        };
        if let Ok(resources) = node.get(b"Resources") {
            if let Ok((_, Object::Dictionary(dict))) = doc.dereference(resources) {
                return Some(dict.clone());
            }
        }
        match node.get(b"Parent") {
            Ok(Object::Reference(parent)) => node_id = *parent,
            _ => return None,
        }
    }
    None
}

/// Decode an image XObject: JPEG streams directly, raw 8-bit RGB/gray pixels.
fn decode_image(doc: &Document, obj: &Object) -> Option<DynamicImage> {
    if !is_image(obj) {
        return None;
    }
    let Object::Stream(stream) = obj else {
        return None;
    };
    let dict = &stream.dict;

    let width = u32::try_from(dict.get(b"Width").ok()?.as_i64().ok()?).ok()?;
    let height = u32::try_from(dict.get(b"Height").ok()?.as_i64().ok()?).ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    trace!("Image object: {}x{}", width, height);

    let filter = dict.get(b"Filter").ok().and_then(|f| match f {
        Object::Name(name) => Some(name.as_slice()),
        Object::Array(items) => items.first().and_then(|o| o.as_name().ok()),
        _ => None,
    });
    match filter {
        Some(b"DCTDecode") => {
            return image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg)
                .ok();
        }
        Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
            trace!("Unsupported image filter");
            return None;
        }
        _ => {}
    }

    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);
    if bits != 8 {
        return None;
    }

    let color_space = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|o| match o {
            Object::Name(name) => Some(name.clone()),
            Object::Array(items) => items.first().and_then(|o| o.as_name().ok()).map(<[u8]>::to_vec),
            Object::Reference(r) => doc
                .get_object(*r)
                .ok()
                .and_then(|o| o.as_name().ok())
                .map(<[u8]>::to_vec),
            _ => None,
        })
        .unwrap_or_else(|| b"DeviceRGB".to_vec());

    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    let pixels = (width as usize).checked_mul(height as usize)?;

    match color_space.as_slice() {
        b"DeviceRGB" | b"RGB" => {
            let len = pixels.checked_mul(3).filter(|len| data.len() >= *len)?;
            RgbImage::from_raw(width, height, data[..len].to_vec()).map(DynamicImage::ImageRgb8)
        }
        b"DeviceGray" | b"G" if data.len() >= pixels => {
            GrayImage::from_raw(width, height, data[..pixels].to_vec()).map(DynamicImage::ImageLuma8)
        }
        _ => {
            trace!("Could not decode image: {} bytes for {} pixels", data.len(), pixels);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::TextPdfWriter;

    #[test]
    fn test_pdf_extractor_new() {
        let extractor = PdfExtractor::new();
        assert!(extractor.document.is_none());
        assert_eq!(extractor.page_count(), 0);
        assert_eq!(extractor.analyze(), PdfType::Empty);
    }

    #[test]
    fn test_rejects_non_pdf() {
        assert!(matches!(
            PdfExtractor::from_bytes(b"hello"),
            Err(PdfError::Parse(_))
        ));
    }

    #[test]
    fn test_leading_text_is_page_limited() {
        let mut writer = TextPdfWriter::new().with_lines_per_page(2);
        for line in ["page one a", "page one b", "page two a", "page two b", "page three"] {
            writer.push_line(line);
        }
        let bytes = writer.finish().unwrap();

        let extractor = PdfExtractor::from_bytes(&bytes).unwrap();
        assert_eq!(extractor.page_count(), 3);

        let text = extractor.extract_leading_text(2).unwrap();
        assert!(text.contains("page one a"));
        assert!(text.contains("page two b"));
        assert!(!text.contains("page three"));
    }

    #[test]
    fn test_render_page_decodes_gray_image() {
        let bytes = crate::pdf::fixtures::scanned_page(&[], 4, 3);
        let extractor = PdfExtractor::from_bytes(&bytes).unwrap();
        let image = extractor.render_page(1).unwrap();
        assert_eq!((image.width(), image.height()), (4, 3));
    }

    #[test]
    fn test_malformed_image_sizes_are_rejected() {
        for (width, height) in [(-4, 3), (0, 3), (4, 0), (i64::from(u32::MAX), i64::from(u32::MAX))] {
            let bytes = crate::pdf::fixtures::scanned_page(&[], 4, 3);
            let mut doc = Document::load_mem(&bytes).unwrap();
            for obj in doc.objects.values_mut() {
                if let Object::Stream(stream) = obj {
                    if stream.dict.has(b"Width") {
                        stream.dict.set("Width", width);
                        stream.dict.set("Height", height);
                    }
                }
            }
            let image = doc.objects.values().find(|o| is_image(o)).unwrap();
            assert!(decode_image(&doc, image).is_none(), "{}x{}", width, height);
        }
    }

    #[test]
    fn test_render_page_without_images_fails() {
        let mut writer = TextPdfWriter::new();
        writer.push_line("text only");
        let extractor = PdfExtractor::from_bytes(&writer.finish().unwrap()).unwrap();
        assert!(matches!(
            extractor.render_page(1),
            Err(PdfError::ImageExtraction(_))
        ));
        assert!(matches!(extractor.render_page(9), Err(PdfError::InvalidPage(9))));
    }
}
