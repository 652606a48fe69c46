//! Minimal text-only PDF generation with lopdf.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use super::Result;
use crate::error::PdfError;

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;

/// Lays out plain lines of text on A4 pages, one text object per line.
#[derive(Debug, Clone)]
pub struct TextPdfWriter {
    lines: Vec<String>,
    lines_per_page: usize,
    font_size: i64,
    wrap_width: usize,
}

impl TextPdfWriter {
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            lines_per_page: 60,
            font_size: 10,
            wrap_width: 90,
        }
    }

    pub fn with_lines_per_page(mut self, lines: usize) -> Self {
        self.lines_per_page = lines.max(1);
        self
    }

    pub fn with_wrap_width(mut self, columns: usize) -> Self {
        self.wrap_width = columns.max(10);
        self
    }

    /// Append one line, soft-wrapped at the configured width.
    pub fn push_line(&mut self, line: impl AsRef<str>) {
        let clean = sanitize(line.as_ref());
        if clean.is_empty() {
            self.lines.push(String::new());
            return;
        }
        let mut current = String::new();
        for word in clean.split(' ') {
            if !current.is_empty() && current.len() + 1 + word.len() > self.wrap_width {
                self.lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        self.lines.push(current);
    }

    /// Append every line of a multi-line text.
    pub fn push_text(&mut self, text: &str) {
        for line in text.lines() {
            self.push_line(line);
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Render the document to bytes.
    pub fn finish(self) -> Result<Vec<u8>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let leading = self.font_size + 3;
        let mut chunks: Vec<&[String]> = self.lines.chunks(self.lines_per_page).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }

        let mut kids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let mut operations = Vec::with_capacity(chunk.len() * 5);
            for (row, line) in chunk.iter().enumerate() {
                if line.is_empty() {
                    continue;
                }
                let y = PAGE_HEIGHT - MARGIN - (row as i64) * leading;
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new("Tf", vec!["F1".into(), self.font_size.into()]));
                operations.push(Operation::new("Td", vec![MARGIN.into(), y.into()]));
                operations.push(Operation::new("Tj", vec![Object::string_literal(line.as_str())]));
                operations.push(Operation::new("ET", vec![]));
            }

            let content = Content { operations }
                .encode()
                .map_err(|e| PdfError::Write(e.to_string()))?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(Object::from(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| PdfError::Write(e.to_string()))?;
        Ok(bytes)
    }
}

impl Default for TextPdfWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard Type1 fonts only cover printable ASCII reliably.
fn sanitize(line: &str) -> String {
    line.chars()
        .map(|c| match c {
            '\t' => ' ',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '?',
        })
        .collect::<String>()
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wraps_long_lines() {
        let mut writer = TextPdfWriter::new().with_wrap_width(10);
        writer.push_line("alpha beta gamma delta");
        assert_eq!(writer.lines, vec!["alpha beta", "gamma", "delta"]);
    }

    #[test]
    fn test_replaces_non_ascii() {
        let mut writer = TextPdfWriter::new();
        writer.push_line("Zażółć\tok  ");
        assert_eq!(writer.lines, vec!["Za???? ok"]);
    }

    #[test]
    fn test_empty_document_has_one_page() {
        let bytes = TextPdfWriter::new().finish().unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }
}
