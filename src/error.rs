use thiserror::Error;

/// Main error type for Folio
#[derive(Error, Debug)]
pub enum FolioError {
    /// No extractor registered for the file extension
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    /// Format-specific extraction failure
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Source bytes could not be decoded to text
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Canonical store errors
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Work does not exist
    #[error("Work not found: {0}")]
    NotFound(String),

    /// Another ingest/resegment run is in flight for the same work
    #[error("Conflicting run for work: {0}")]
    ConflictingRun(String),

    /// Slice bounds outside [0, char_count] or inverted
    #[error("Range out of bounds: {start}..{end} (char_count {char_count})")]
    RangeOutOfBounds {
        start: usize,
        end: usize,
        char_count: usize,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FolioError {
    /// Whether the watcher (or a workflow caller) may retry this failure.
    ///
    /// Store and I/O failures are assumed transient; pipeline idempotency
    /// makes redelivery safe. Everything else is terminal on first sight.
    pub fn is_transient(&self) -> bool {
        matches!(self, FolioError::Store(_) | FolioError::Io(_))
    }

    /// Pipeline stage tag used in failure events and `.err.json` records.
    pub fn stage(&self) -> &'static str {
        match self {
            FolioError::UnsupportedType(_) => "admission",
            FolioError::Extraction(_) => "extract",
            FolioError::Encoding(_) => "normalize",
            FolioError::Store(_) => "persist",
            FolioError::Io(_) => "io",
            FolioError::NotFound(_) | FolioError::ConflictingRun(_) => "coordinate",
            FolioError::RangeOutOfBounds { .. } => "slice",
            FolioError::Config(_) => "config",
        }
    }
}

/// Convenient Result type using FolioError
pub type Result<T> = std::result::Result<T, FolioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FolioError::UnsupportedType(".exe".to_string());
        assert!(err.to_string().contains("Unsupported file type"));
        assert!(err.to_string().contains(".exe"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: FolioError = rusqlite_err.into();
        assert!(matches!(err, FolioError::Store(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FolioError = io_err.into();
        assert!(matches!(err, FolioError::Io(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_terminal_kinds_are_not_transient() {
        let terminal = [
            FolioError::UnsupportedType(".bin".into()),
            FolioError::Extraction("bad page".into()),
            FolioError::Encoding("binary data".into()),
            FolioError::NotFound("w1".into()),
            FolioError::ConflictingRun("w1".into()),
            FolioError::RangeOutOfBounds {
                start: 5,
                end: 2,
                char_count: 10,
            },
            FolioError::Config("stride > window".into()),
        ];
        for err in terminal {
            assert!(!err.is_transient(), "{err} should be terminal");
        }
    }

    #[test]
    fn test_stage_tags() {
        assert_eq!(FolioError::UnsupportedType(".x".into()).stage(), "admission");
        assert_eq!(FolioError::Encoding("x".into()).stage(), "normalize");
        assert_eq!(
            FolioError::RangeOutOfBounds {
                start: 0,
                end: 1,
                char_count: 0
            }
            .stage(),
            "slice"
        );
    }
}
