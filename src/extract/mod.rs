//! Text extraction boundary: file bytes in, raw text plus warnings out.
//!
//! Format-specific extractors live behind a registry keyed by extension.
//! Page-oriented collaborators (PDF and friends) are expected to join page
//! texts with the `pdf_pages` sentinel before handing text to the pipeline.

pub mod text;

use std::path::Path;

use crate::error::{FolioError, Result};

pub use text::PlainTextExtractor;

/// Output of any extractor: raw text plus non-fatal warnings that get
/// recorded on the IngestRun.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub text: String,
    pub warnings: Vec<String>,
}

/// Trait for file-format-specific text extraction
pub trait Extractor: Send + Sync {
    /// Check if this extractor can handle the given file extension
    fn can_extract(&self, extension: &str) -> bool;

    /// Extract raw text from the file at `path`
    fn extract(&self, path: &Path) -> Result<Extracted>;
}

/// Extractor registry that selects the appropriate extractor by extension
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// Create a new registry with all built-in extractors
    pub fn new() -> Self {
        let mut registry = Self {
            extractors: Vec::new(),
        };
        registry.register(Box::new(PlainTextExtractor));
        registry
    }

    /// Register an extractor
    pub fn register(&mut self, extractor: Box<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    /// Find an extractor that can handle the given extension
    pub fn find_extractor(&self, extension: &str) -> Option<&dyn Extractor> {
        self.extractors
            .iter()
            .find(|e| e.can_extract(extension))
            .map(|e| e.as_ref())
    }

    /// Extract text from `path` using the extractor for its extension.
    pub fn extract(&self, path: &Path) -> Result<Extracted> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let extractor = self
            .find_extractor(&extension)
            .ok_or_else(|| FolioError::UnsupportedType(format!(".{extension}")))?;
        extractor.extract(path)
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
