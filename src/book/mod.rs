//! In-memory document model for an EPUB publication.

use std::collections::HashMap;
use std::path::PathBuf;

pub mod content;

pub use content::ContentManager;

/// Package metadata from the OPF document (Dublin Core scalars plus the
/// full multi-valued element map).
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: Option<String>,
    pub creator: Option<String>,
    pub language: Option<String>,
    pub identifier: Option<String>,
    pub publisher: Option<String>,
    pub date: Option<String>,
    pub rights: Option<String>,
    /// Every non-empty metadata element, keyed by unqualified tag name.
    /// Duplicate tags accumulate; source order is not preserved.
    pub all: HashMap<String, Vec<String>>,
}

/// A resource declared in the package manifest.
///
/// `href` is kept exactly as written in the OPF (possibly percent-encoded)
/// and is resolved relative to the OPF's directory, not the archive root.
#[derive(Debug, Clone)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}

/// An entry in the reading order.
///
/// `idref` should name a manifest item; dangling references are tolerated
/// at parse time and only fail when resolved.
#[derive(Debug, Clone)]
pub struct SpineItem {
    pub idref: String,
    pub linear: bool,
}

/// A table of contents entry (hierarchical, from the NCX navMap).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub title: String,
    pub href: String,
    pub children: Vec<TocEntry>,
}

impl TocEntry {
    pub fn new(title: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            href: href.into(),
            children: Vec::new(),
        }
    }
}

/// A loaded EPUB publication.
///
/// Owns the parsed package structure and the [`ContentManager`] that
/// mediates all resource reads and writes. Not safe for concurrent
/// mutation: callers must serialize search/replace/save against a given
/// `Book`.
#[derive(Debug)]
pub struct Book {
    pub metadata: Metadata,
    /// Manifest items in document order. `id` is unique within the manifest.
    pub manifest: Vec<ManifestItem>,
    pub spine: Vec<SpineItem>,
    pub toc: Vec<TocEntry>,
    /// Path of the source archive on disk.
    pub path: PathBuf,
    pub content: ContentManager,
}

impl Book {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let content = ContentManager::new(path.clone());
        Self {
            metadata: Metadata::default(),
            manifest: Vec::new(),
            spine: Vec::new(),
            toc: Vec::new(),
            path,
            content,
        }
    }

    /// Look up a manifest item by id.
    pub fn manifest_item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }

    /// Whether any resource has unsaved modifications.
    pub fn is_modified(&self) -> bool {
        self.content.is_dirty()
    }
}
