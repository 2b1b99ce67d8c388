use super::loader::{extension, Loader};
use crate::error::{PipelineError, Result};
use std::path::Path;

/// Plain text and markdown; form feed characters separate pages
#[derive(Debug, Default)]
pub struct TextLoader;

impl TextLoader {
    pub fn new() -> Self {
        Self
    }
}

impl Loader for TextLoader {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| PipelineError::unreadable("text", format!("invalid UTF-8: {e}")))?;
        let text = text.replace("\r\n", "\n");
        Ok(text.split('\x0c').map(|page| page.to_string()).collect())
    }

    fn name(&self) -> &str {
        "text"
    }

    fn supports_file_type(&self, path: &Path) -> bool {
        matches!(extension(path).as_deref(), Some("txt" | "md" | "text"))
    }
}
