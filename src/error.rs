//! Error types for EPUB editing operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading, editing, or saving an EPUB.
#[derive(Error, Debug)]
pub enum Error {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid EPUB container: {0}")]
    InvalidContainer(String),

    #[error("malformed XML in {path}: {source}")]
    MalformedXml {
        path: String,
        source: quick_xml::Error,
    },

    #[error("invalid search pattern: {0}")]
    InvalidQuery(#[from] regex::Error),

    #[error("failed to save EPUB: {0}")]
    Save(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
