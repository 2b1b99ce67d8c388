use super::loader::{extension, Loader};
use crate::error::{PipelineError, Result};
use lopdf::content::Content;
use lopdf::{Object, ObjectId};
use std::path::Path;

/// PDF loader: one text entry per page, in page order
#[derive(Debug, Default)]
pub struct PdfLoader;

impl PdfLoader {
    pub fn new() -> Self {
        Self
    }

    /// Walk the page content stream and collect text-showing operands.
    /// Used when lopdf's own extraction fails on a page.
    fn extract_page_operators(doc: &lopdf::Document, page_id: ObjectId) -> Option<String> {
        let content_bytes = doc.get_page_content(page_id).ok()?;
        let content = Content::decode(&content_bytes).ok()?;
        let mut text = String::new();

        for operation in &content.operations {
            match operation.operator.as_str() {
                "Tj" | "TJ" | "'" | "\"" => {
                    for operand in &operation.operands {
                        if let Some(s) = string_from_object(operand) {
                            text.push_str(&s);
                        }
                    }
                }
                "Td" | "TD" | "T*" | "ET" => {
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                }
                _ => {}
            }
        }

        Some(text)
    }
}

impl Loader for PdfLoader {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let doc = lopdf::Document::load_mem(bytes)
            .map_err(|e| PipelineError::unreadable("pdf", format!("failed to parse PDF: {e}")))?;

        if doc.is_encrypted() {
            return Err(PipelineError::unreadable(
                "pdf",
                "PDF is encrypted and could not be decrypted",
            ));
        }

        let pages = doc.get_pages();
        if pages.is_empty() {
            return Err(PipelineError::unreadable("pdf", "PDF has no pages"));
        }

        let mut page_texts = Vec::with_capacity(pages.len());
        for (page_number, page_id) in pages {
            let text = match doc.extract_text(&[page_number]) {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(page = page_number, error = %e, "falling back to content stream walk");
                    Self::extract_page_operators(&doc, page_id).unwrap_or_default()
                }
            };
            page_texts.push(text);
        }

        Ok(page_texts)
    }

    fn name(&self) -> &str {
        "pdf"
    }

    fn supports_file_type(&self, path: &Path) -> bool {
        extension(path).as_deref() == Some("pdf")
    }
}

/// Decode a PDF string operand (UTF-16BE with BOM, else PDFDocEncoding as Latin-1)
fn string_from_object(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => {
            if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
                let utf16: Vec<u16> = bytes[2..]
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&utf16).ok()
            } else {
                Some(bytes.iter().map(|&b| b as char).collect())
            }
        }
        Object::Array(items) => {
            let joined: String = items.iter().filter_map(string_from_object).collect();
            if joined.is_empty() {
                None
            } else {
                Some(joined)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_pdf_is_unreadable() {
        let err = PdfLoader::new()
            .load_bytes("rfp.pdf", b"%PDF-1.7 this is not really a pdf")
            .unwrap_err();
        match err {
            PipelineError::UnreadableDocument { path, .. } => assert_eq!(path, "rfp.pdf"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_string_operand_decoding() {
        let latin = Object::String(b"SHALL".to_vec(), lopdf::StringFormat::Literal);
        assert_eq!(string_from_object(&latin).as_deref(), Some("SHALL"));

        let utf16 = Object::String(
            vec![0xFE, 0xFF, 0x00, 0x4D, 0x00, 0x55, 0x00, 0x53, 0x00, 0x54],
            lopdf::StringFormat::Hexadecimal,
        );
        assert_eq!(string_from_object(&utf16).as_deref(), Some("MUST"));

        let array = Object::Array(vec![
            Object::String(b"due ".to_vec(), lopdf::StringFormat::Literal),
            Object::Integer(-120),
            Object::String(b"date".to_vec(), lopdf::StringFormat::Literal),
        ]);
        assert_eq!(string_from_object(&array).as_deref(), Some("due date"));
    }

    #[test]
    fn test_supports_pdf_only() {
        let loader = PdfLoader::new();
        assert!(loader.supports_file_type(Path::new("solicitation.PDF")));
        assert!(!loader.supports_file_type(Path::new("solicitation.docx")));
    }
}
