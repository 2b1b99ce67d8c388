// Loader abstraction
//
// Loaders are the boundary between file formats and the extraction core.
// Everything after this point works with `Document` and is format-agnostic.

use crate::error::{PipelineError, Result};
use crate::storage::calculate_content_hash;
use crate::types::{Document, DocumentSource};
use std::path::Path;

/// Converts a source file into per-page text.
///
/// Implementations must fail with `PipelineError::UnreadableDocument` on
/// corrupt or unsupported input rather than returning empty text.
pub trait Loader: Send + Sync {
    /// Extract the text of each page, in page order
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>>;

    /// Load a document from raw bytes under the given display name
    fn load_bytes(&self, name: &str, bytes: &[u8]) -> Result<Document> {
        let pages = self
            .extract_pages(bytes)
            .map_err(|e| match e {
                PipelineError::UnreadableDocument { reason, .. } => {
                    PipelineError::unreadable(name, reason)
                }
                other => other,
            })?;

        if pages.iter().all(|page| page.trim().is_empty()) {
            return Err(PipelineError::unreadable(name, "no extractable text"));
        }

        let source = DocumentSource::named(name, calculate_content_hash(bytes));
        Ok(Document::from_pages(source, pages))
    }

    /// Load a document from a file path
    fn load(&self, path: &Path) -> Result<Document> {
        let bytes = std::fs::read(path)
            .map_err(|e| PipelineError::unreadable(path.display(), e))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document");
        let mut document = self.load_bytes(name, &bytes)?;
        document.source.path = Some(path.to_path_buf());
        Ok(document)
    }

    /// Loader name for logging
    fn name(&self) -> &str;

    /// Check if the loader supports the given file type
    fn supports_file_type(&self, path: &Path) -> bool;
}

/// Lower-cased file extension, if any
pub(crate) fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Routes each path to the first loader that supports it
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn Loader>>,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new(vec![
            Box::new(super::PdfLoader::new()),
            Box::new(super::DocxLoader::new()),
            Box::new(super::TextLoader::new()),
        ])
    }
}

impl LoaderRegistry {
    pub fn new(loaders: Vec<Box<dyn Loader>>) -> Self {
        Self { loaders }
    }

    pub fn loader_for(&self, path: &Path) -> Option<&dyn Loader> {
        self.loaders
            .iter()
            .find(|loader| loader.supports_file_type(path))
            .map(|loader| loader.as_ref())
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.loader_for(path).is_some()
    }

    pub fn load(&self, path: &Path) -> Result<Document> {
        let loader = self.loader_for(path).ok_or_else(|| {
            PipelineError::unreadable(path.display(), "unsupported file type")
        })?;
        tracing::debug!(loader = loader.name(), path = %path.display(), "loading document");
        loader.load(path)
    }

    /// Load bytes already read from `path`, routed by the path's extension
    pub fn load_bytes(&self, path: &Path, bytes: &[u8]) -> Result<Document> {
        let loader = self.loader_for(path).ok_or_else(|| {
            PipelineError::unreadable(path.display(), "unsupported file type")
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document");
        let mut document = loader.load_bytes(name, bytes)?;
        document.source.path = Some(path.to_path_buf());
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_routes_by_extension() {
        let registry = LoaderRegistry::default();
        assert_eq!(registry.loader_for(Path::new("a.PDF")).map(|l| l.name()), Some("pdf"));
        assert_eq!(registry.loader_for(Path::new("b.docx")).map(|l| l.name()), Some("docx"));
        assert_eq!(registry.loader_for(Path::new("c.md")).map(|l| l.name()), Some("text"));
        assert!(registry.loader_for(Path::new("d.xlsx")).is_none());
    }

    #[test]
    fn test_unsupported_type_is_unreadable() {
        let registry = LoaderRegistry::default();
        let err = registry.load(Path::new("budget.xlsx")).unwrap_err();
        assert!(matches!(err, PipelineError::UnreadableDocument { .. }));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let registry = LoaderRegistry::default();
        let err = registry.load(Path::new("/nonexistent/rfp.txt")).unwrap_err();
        assert!(matches!(err, PipelineError::UnreadableDocument { .. }));
    }

    #[test]
    fn test_blank_document_is_unreadable() {
        let err = super::super::TextLoader::new()
            .load_bytes("blank.txt", b"   \n\x0c  ")
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnreadableDocument { .. }));
    }
}
