//! Error taxonomy for block rendering
//!
//! Every error here is scoped to a single block instance. Nothing is fatal to
//! the host or to sibling blocks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Malformed block text
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid `{key}`: {reason}")]
pub struct ParseError {
    /// Offending key (`file`, `page`, ...)
    pub key: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Source content could not be read.
///
/// Cloneable so that every caller of a coalesced fetch observes the same failure.
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot read {}: {detail}", path.display())]
pub struct FetchError {
    pub path: PathBuf,
    pub detail: String,
    #[source]
    pub source: Option<Arc<std::io::Error>>,
}

impl FetchError {
    pub fn io(path: &Path, err: std::io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            detail: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }

    pub fn generic(path: &Path, detail: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            detail: detail.into(),
            source: None,
        }
    }
}

/// Failures reported by the decode engine
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("not a valid document: {0}")]
    InvalidDocument(String),

    #[error("page {page} is out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },

    #[error("document handle already released")]
    Released,

    #[error("{detail}")]
    Engine { detail: String },
}

impl DecodeError {
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine { detail: msg.into() }
    }
}

#[cfg(feature = "pdf")]
impl From<mupdf::error::Error> for DecodeError {
    fn from(err: mupdf::error::Error) -> Self {
        Self::engine(format!("PDF engine: {err}"))
    }
}

/// Viewport computation rejected the request
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ViewportError {
    #[error("crop region collapses to {width}x{height} pixels")]
    Degenerate { width: i64, height: i64 },

    #[error("{width}x{height} pixel raster exceeds the {limit} pixel limit")]
    TooLarge { width: f32, height: f32, limit: u64 },

    #[error("page has no usable size ({width}x{height})")]
    EmptyPage { width: f32, height: f32 },
}

/// Annotation script failed; the raster underneath stays visible
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AnnotationError {
    #[error("annotation syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("annotation failed at statement {statement}: {message}")]
    Runtime { statement: usize, message: String },
}

/// Umbrella error for a single block render
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Viewport(#[from] ViewportError),

    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error("{detail}")]
    Generic { detail: String },
}

impl RenderError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }

    /// Message shown in place of the block
    #[must_use]
    pub fn display_message(&self) -> String {
        format!("[SlideNote] Render Error: {self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_key() {
        let err = ParseError::new("dpi", "must be positive");
        assert_eq!(err.to_string(), "invalid `dpi`: must be positive");
    }

    #[test]
    fn render_error_display_is_prefixed() {
        let err: RenderError = DecodeError::PageOutOfRange { page: 9, count: 3 }.into();
        assert_eq!(
            err.display_message(),
            "[SlideNote] Render Error: page 9 is out of range (document has 3 pages)"
        );
    }

    #[test]
    fn fetch_error_is_cloneable_with_source() {
        let err = FetchError::io(
            Path::new("slides.pdf"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let copy = err.clone();
        assert!(copy.source.is_some());
        assert!(copy.to_string().contains("slides.pdf"));
    }
}
