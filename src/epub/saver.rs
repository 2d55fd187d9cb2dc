//! Byte-preserving repackaging of a modified book.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::book::Book;
use crate::error::{Error, Result};

/// Persist a modified book back to its source path.
///
/// Untouched archive entries are copied verbatim (same bytes, same
/// compression); dirty resources are rewritten under their recorded
/// archive paths. The new archive is assembled in a `.tmp` sibling and
/// atomically renamed over the original, so a failure leaves either the
/// fully-old or fully-new file on disk, never a half-written one. With
/// `backup`, the original is first renamed to a `.bak` sibling.
///
/// A no-op when the book has no unsaved modifications. Any write-phase
/// failure removes the temporary file and returns [`Error::Save`].
pub fn save_epub(book: &mut Book, backup: bool) -> Result<()> {
    if !book.is_modified() {
        return Ok(());
    }

    let original = book.path.clone();
    let temp = sibling(&original, ".tmp");

    // The content manager's read handle points at the file we are about
    // to replace.
    book.content.close();

    if let Err(e) = write_archive(book, &original, &temp) {
        let _ = fs::remove_file(&temp);
        return Err(Error::Save(e.to_string()));
    }

    if backup && original.exists() {
        let bak = sibling(&original, ".bak");
        if let Err(e) = fs::rename(&original, &bak) {
            let _ = fs::remove_file(&temp);
            return Err(Error::Save(format!("could not create backup: {e}")));
        }
    }
    if let Err(e) = fs::rename(&temp, &original) {
        let _ = fs::remove_file(&temp);
        return Err(Error::Save(format!("could not replace original: {e}")));
    }

    book.content.mark_saved();
    debug!(path = %original.display(), "saved EPUB");
    Ok(())
}

/// Assemble the new archive at `temp` from the source archive plus the
/// dirty set.
fn write_archive(book: &Book, original: &Path, temp: &Path) -> Result<()> {
    let source = File::open(original)?;
    let mut archive = ZipArchive::new(source)?;
    let mut writer = ZipWriter::new(File::create(temp)?);

    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    // mimetype first, original bytes, never compressed.
    let mut mimetype = Vec::new();
    archive.by_name("mimetype")?.read_to_end(&mut mimetype)?;
    writer.start_file("mimetype", stored)?;
    writer.write_all(&mimetype)?;

    let dirty = book.content.dirty_entries();
    let replaced: HashSet<&str> = dirty.iter().filter_map(|(_, path, _)| *path).collect();

    // Untouched entries survive bit-identical: raw copy keeps the original
    // compressed stream and metadata.
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        if entry.name() == "mimetype" || replaced.contains(entry.name()) {
            continue;
        }
        writer.raw_copy_file(entry)?;
    }

    // Dirty resources go under their recorded archive paths; a resource
    // that never had one is written under its href.
    for (href, archive_path, bytes) in dirty {
        let name = archive_path.unwrap_or(href);
        writer.start_file(name, deflated)?;
        writer.write_all(bytes)?;
    }

    writer.finish()?;
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
