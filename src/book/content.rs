//! Resource content access with dirty tracking.
//!
//! Each manifest resource is in one of two states: `Unmodified`, where
//! reads go straight through to the source archive, or `Modified`, where
//! the in-memory bytes are authoritative over the archive's copy. The set
//! of `Modified` entries is exactly the dirty set the saver persists.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use tracing::debug;
use zip::ZipArchive;

use crate::error::Result;

#[derive(Debug)]
enum ResourceState {
    Unmodified,
    Modified(Vec<u8>),
}

#[derive(Debug)]
struct Resource {
    /// Entry path inside the archive, resolved once at load time.
    /// `None` for resources with no backing entry (missing from the
    /// archive, or never saved).
    archive_path: Option<String>,
    state: ResourceState,
}

/// Mediates all reads and writes of resource bytes for one [`Book`].
///
/// Keyed by the manifest href exactly as written in the OPF.
///
/// [`Book`]: crate::Book
#[derive(Debug)]
pub struct ContentManager {
    source: PathBuf,
    entries: HashMap<String, Resource>,
    archive: Option<ZipArchive<File>>,
}

impl ContentManager {
    pub(crate) fn new(source: PathBuf) -> Self {
        Self {
            source,
            entries: HashMap::new(),
            archive: None,
        }
    }

    /// Record a resource and its resolved archive entry path. Called by the
    /// loader for every manifest item found in the archive.
    pub(crate) fn register(&mut self, href: String, archive_path: String) {
        self.entries.insert(
            href,
            Resource {
                archive_path: Some(archive_path),
                state: ResourceState::Unmodified,
            },
        );
    }

    /// Current bytes of a resource: the modified copy if one exists,
    /// otherwise a read-through to the source archive.
    pub fn get(&mut self, href: &str) -> Result<Vec<u8>> {
        let Some(resource) = self.entries.get(href) else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such resource: {href}"),
            )
            .into());
        };

        match &resource.state {
            ResourceState::Modified(bytes) => Ok(bytes.clone()),
            ResourceState::Unmodified => {
                let Some(path) = resource.archive_path.clone() else {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("resource has no archive entry: {href}"),
                    )
                    .into());
                };
                let archive = self.archive()?;
                let mut entry = archive.by_name(&path)?;
                let mut bytes = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }

    /// Replace a resource's bytes, marking it dirty. An href the loader
    /// never registered becomes a new entry with no backing archive path.
    pub fn update(&mut self, href: &str, bytes: Vec<u8>) {
        match self.entries.get_mut(href) {
            Some(resource) => resource.state = ResourceState::Modified(bytes),
            None => {
                self.entries.insert(
                    href.to_string(),
                    Resource {
                        archive_path: None,
                        state: ResourceState::Modified(bytes),
                    },
                );
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.entries
            .values()
            .any(|r| matches!(r.state, ResourceState::Modified(_)))
    }

    /// Dirty resources as (href, recorded archive path, bytes).
    pub(crate) fn dirty_entries(&self) -> Vec<(&str, Option<&str>, &[u8])> {
        self.entries
            .iter()
            .filter_map(|(href, resource)| match &resource.state {
                ResourceState::Modified(bytes) => Some((
                    href.as_str(),
                    resource.archive_path.as_deref(),
                    bytes.as_slice(),
                )),
                ResourceState::Unmodified => None,
            })
            .collect()
    }

    /// Reset every resource to `Unmodified` after a successful save.
    /// Newly written resources adopt the path they were saved under, and
    /// the stale archive handle is dropped so the next read reopens the
    /// replaced file.
    pub(crate) fn mark_saved(&mut self) {
        for (href, resource) in &mut self.entries {
            if matches!(resource.state, ResourceState::Modified(_)) {
                if resource.archive_path.is_none() {
                    resource.archive_path = Some(href.clone());
                }
                resource.state = ResourceState::Unmodified;
            }
        }
        self.archive = None;
    }

    /// Drop the cached archive handle (before the file is renamed away).
    pub(crate) fn close(&mut self) {
        self.archive = None;
    }

    fn archive(&mut self) -> Result<&mut ZipArchive<File>> {
        match self.archive {
            Some(ref mut archive) => Ok(archive),
            None => {
                debug!(path = %self.source.display(), "opening source archive");
                let file = File::open(&self.source)?;
                Ok(self.archive.insert(ZipArchive::new(file)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_marks_dirty() {
        let mut content = ContentManager::new(PathBuf::from("missing.epub"));
        assert!(!content.is_dirty());

        content.update("ch1.xhtml", b"<html/>".to_vec());
        assert!(content.is_dirty());
        assert_eq!(content.get("ch1.xhtml").unwrap(), b"<html/>");
    }

    #[test]
    fn test_get_unknown_href_fails() {
        let mut content = ContentManager::new(PathBuf::from("missing.epub"));
        assert!(content.get("nope.xhtml").is_err());
    }

    #[test]
    fn test_modified_bytes_shadow_archive() {
        let mut content = ContentManager::new(PathBuf::from("missing.epub"));
        content.register("ch1.xhtml".to_string(), "OEBPS/ch1.xhtml".to_string());

        // Unmodified read would hit the (nonexistent) archive.
        assert!(content.get("ch1.xhtml").is_err());

        content.update("ch1.xhtml", b"new".to_vec());
        assert_eq!(content.get("ch1.xhtml").unwrap(), b"new");
    }

    #[test]
    fn test_mark_saved_clears_dirty_set() {
        let mut content = ContentManager::new(PathBuf::from("missing.epub"));
        content.update("added.xhtml", b"x".to_vec());
        assert!(content.is_dirty());

        content.mark_saved();
        assert!(!content.is_dirty());

        // The new resource now claims its own href as archive path.
        let (_, path, _) = {
            content.update("added.xhtml", b"y".to_vec());
            content.dirty_entries()[0]
        };
        assert_eq!(path, Some("added.xhtml"));
    }
}
