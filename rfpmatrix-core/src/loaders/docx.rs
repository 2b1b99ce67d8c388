use super::loader::{extension, Loader};
use crate::error::{PipelineError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{Cursor, Read};
use std::path::Path;

const DOCUMENT_PART: &str = "word/document.xml";

/// Word (DOCX) loader.
///
/// Paragraphs become lines, table rows become `cell | cell` lines and explicit
/// or last-rendered page breaks start a new page.
#[derive(Debug, Default)]
pub struct DocxLoader;

impl DocxLoader {
    pub fn new() -> Self {
        Self
    }

    fn read_document_part(bytes: &[u8]) -> Result<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| PipelineError::unreadable("docx", format!("not a DOCX container: {e}")))?;
        let mut part = archive
            .by_name(DOCUMENT_PART)
            .map_err(|e| PipelineError::unreadable("docx", format!("missing {DOCUMENT_PART}: {e}")))?;
        let mut xml = String::new();
        part.read_to_string(&mut xml)
            .map_err(|e| PipelineError::unreadable("docx", format!("failed to read {DOCUMENT_PART}: {e}")))?;
        Ok(xml)
    }
}

/// Accumulates WordprocessingML text into pages
#[derive(Default)]
struct PageBuilder {
    pages: Vec<String>,
    current: String,
    line: String,
    cell: Option<String>,
    row: Option<Vec<String>>,
}

impl PageBuilder {
    fn push_text(&mut self, text: &str) {
        match self.cell.as_mut() {
            Some(cell) => cell.push_str(text),
            None => self.line.push_str(text),
        }
    }

    fn end_paragraph(&mut self) {
        if let Some(cell) = self.cell.as_mut() {
            if !cell.is_empty() && !cell.ends_with(' ') {
                cell.push(' ');
            }
            return;
        }
        let line = std::mem::take(&mut self.line);
        if self.current.is_empty() && line.trim().is_empty() {
            return;
        }
        self.current.push_str(line.trim_end());
        self.current.push('\n');
    }

    fn start_row(&mut self) {
        self.row = Some(Vec::new());
    }

    fn start_cell(&mut self) {
        self.cell = Some(String::new());
    }

    fn end_cell(&mut self) {
        if let (Some(cell), Some(row)) = (self.cell.take(), self.row.as_mut()) {
            row.push(cell.trim().to_string());
        }
    }

    fn end_row(&mut self) {
        if let Some(row) = self.row.take() {
            let cells: Vec<&str> = row.iter().map(String::as_str).filter(|c| !c.is_empty()).collect();
            if !cells.is_empty() {
                self.current.push_str(&cells.join(" | "));
                self.current.push('\n');
            }
        }
    }

    /// Start a new page unless nothing has been written since the last break
    fn page_break(&mut self) {
        if self.current.trim().is_empty() && self.line.trim().is_empty() {
            return;
        }
        if !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            self.current.push_str(&line);
            self.current.push('\n');
        }
        self.pages.push(std::mem::take(&mut self.current));
    }

    fn finish(mut self) -> Vec<String> {
        if !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            self.current.push_str(&line);
        }
        if !self.current.trim().is_empty() || self.pages.is_empty() {
            self.pages.push(self.current);
        }
        self.pages
    }
}

fn is_page_break(e: &BytesStart) -> bool {
    matches!(
        e.try_get_attribute("w:type"),
        Ok(Some(attr)) if attr.value.as_ref() == b"page"
    )
}

pub(crate) fn pages_from_document_xml(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut builder = PageBuilder::default();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:t" => in_text = true,
                b"w:tr" => builder.start_row(),
                b"w:tc" => builder.start_cell(),
                b"w:br" if is_page_break(&e) => builder.page_break(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => builder.push_text("\t"),
                b"w:cr" => builder.push_text(" "),
                b"w:br" if is_page_break(&e) => builder.page_break(),
                b"w:br" => builder.push_text(" "),
                b"w:lastRenderedPageBreak" => builder.page_break(),
                b"w:p" => builder.end_paragraph(),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| {
                    PipelineError::unreadable("docx", format!("bad text escape: {e}"))
                })?;
                builder.push_text(&text);
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => builder.end_paragraph(),
                b"w:tc" => builder.end_cell(),
                b"w:tr" => builder.end_row(),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PipelineError::unreadable(
                    "docx",
                    format!("malformed XML at position {}: {e}", reader.buffer_position()),
                ))
            }
            _ => {}
        }
    }

    Ok(builder.finish())
}

impl Loader for DocxLoader {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let xml = Self::read_document_part(bytes)?;
        pages_from_document_xml(&xml)
    }

    fn name(&self) -> &str {
        "docx"
    }

    fn supports_file_type(&self, path: &Path) -> bool {
        extension(path).as_deref() == Some("docx")
    }
}
