//! Error types for folio operations.

use thiserror::Error;

/// Boxed error produced by caller-supplied transforms, replacements and visitors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while reading, transforming or writing back items.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no such item: {0}")]
    ItemNotFound(String),

    #[error("transform failed: {0}")]
    TransformFailed(#[source] BoxError),

    #[error("failed to parse {id}: {reason}")]
    ParseFailed { id: String, reason: String },

    #[error("failed to serialize {id}: {reason}")]
    SerializeFailed { id: String, reason: String },

    #[error("cannot adapt predicate: {0}")]
    PredicateAdaptationFailed(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Invalid EPUB: {0}")]
    InvalidEpub(String),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl Error {
    /// Wrap an error raised by caller code.
    pub fn transform(err: impl Into<BoxError>) -> Self {
        Error::TransformFailed(err.into())
    }

    /// Missing items indicate a caller mistake and are never absorbed by an error policy.
    pub fn is_item_not_found(&self) -> bool {
        matches!(self, Error::ItemNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
