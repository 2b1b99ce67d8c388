//! Document Loaders
//!
//! This module converts source files into a `Document`: plain text plus an
//! ordered page map that every later stage uses to resolve offsets to pages.
//!
//! ## Architecture
//!
//! ```text
//! Source file (PDF, DOCX, TXT, MD)
//!     ↓
//! [LoaderRegistry] routes by extension
//!     ↓
//! [Format-specific Loader] → per-page text
//!     ↓
//! Document (text + page anchors)
//! ```
//!
//! ## Available Loaders
//!
//! - `PdfLoader` - PDF documents via lopdf, one entry per page
//! - `DocxLoader` - Word documents, pages split on explicit page breaks
//! - `TextLoader` - Plain text and markdown, pages split on form feeds

pub mod docx;
pub mod loader;
pub mod pdf;
pub mod text;

pub use docx::DocxLoader;
pub use loader::{Loader, LoaderRegistry};
pub use pdf::PdfLoader;
pub use text::TextLoader;
