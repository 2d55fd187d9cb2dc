//! EPUB archive validation and package parsing.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, warn};
use zip::{CompressionMethod, ZipArchive};

use crate::book::{Book, ManifestItem, Metadata, SpineItem, TocEntry};
use crate::error::{Error, Result};
use crate::text::{local_name, resolve_entity, strip_bom};

const MIMETYPE: &str = "application/epub+zip";
const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Parsed OPF package data.
struct OpfData {
    metadata: Metadata,
    manifest: Vec<ManifestItem>,
    spine: Vec<SpineItem>,
    /// Manifest id of the NCX, from the spine's `toc` attribute.
    toc_id: Option<String>,
}

/// Open an EPUB file from disk into a [`Book`].
///
/// Validates the container structure (mimetype entry, container.xml,
/// rootfile), parses the package document, and registers every manifest
/// resource with the book's content manager. Resource bytes are read on
/// demand, not up front.
///
/// # Errors
///
/// [`Error::NotFound`] if `path` is not a regular file,
/// [`Error::InvalidContainer`] for structural violations, and
/// [`Error::MalformedXml`] when the container or package XML does not
/// parse. A manifest resource missing from the archive is logged and
/// skipped, never a load failure.
pub fn open_epub<P: AsRef<Path>>(path: P) -> Result<Book> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::NotFound(path.to_path_buf()));
    }

    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| Error::InvalidContainer(format!("not a valid ZIP archive: {e}")))?;

    validate_container(&mut archive)?;

    let opf_path = find_opf_path(&mut archive)?;
    let opf_dir = Path::new(&opf_path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    let opf_content = read_archive_file(&mut archive, &opf_path).map_err(|_| {
        Error::InvalidContainer(format!("package document '{opf_path}' not found in archive"))
    })?;
    let OpfData {
        metadata,
        manifest,
        spine,
        toc_id,
    } = parse_opf(&opf_content, &opf_path)?;

    let mut book = Book::new(path);
    book.metadata = metadata;
    book.spine = spine;

    // Register every manifest resource under its original, undecoded href.
    for item in &manifest {
        match locate_entry(&mut archive, &opf_dir, &item.href) {
            Some(entry_path) => book.content.register(item.href.clone(), entry_path),
            None => warn!(href = %item.href, "manifest item not found in archive"),
        }
    }

    if let Some(toc_id) = toc_id
        && let Some(ncx_item) = manifest.iter().find(|item| item.id == toc_id)
        && let Some(ncx_path) = locate_entry(&mut archive, &opf_dir, &ncx_item.href)
    {
        match read_archive_file(&mut archive, &ncx_path) {
            Ok(ncx_content) => match parse_ncx(&ncx_content) {
                Ok(toc) => book.toc = toc,
                Err(e) => warn!(path = %ncx_path, error = %e, "skipping unparseable NCX"),
            },
            Err(e) => warn!(path = %ncx_path, error = %e, "could not read NCX"),
        }
    }

    book.manifest = manifest;
    debug!(
        items = book.manifest.len(),
        spine = book.spine.len(),
        "loaded EPUB"
    );
    Ok(book)
}

/// Structural preconditions that must hold before package parsing begins.
fn validate_container(archive: &mut ZipArchive<File>) -> Result<()> {
    {
        let mut mimetype = archive
            .by_index(0)
            .map_err(|_| Error::InvalidContainer("archive has no entries".to_string()))?;
        if mimetype.name() != "mimetype" {
            return Err(Error::InvalidContainer(
                "'mimetype' must be the first entry in the archive".to_string(),
            ));
        }
        if mimetype.compression() != CompressionMethod::Stored {
            return Err(Error::InvalidContainer(
                "'mimetype' entry must be stored without compression".to_string(),
            ));
        }
        let mut content = Vec::new();
        mimetype.read_to_end(&mut content)?;
        if !content.is_ascii() {
            return Err(Error::InvalidContainer(
                "'mimetype' content is not ASCII".to_string(),
            ));
        }
        let content = String::from_utf8_lossy(&content);
        if content.trim() != MIMETYPE {
            return Err(Error::InvalidContainer(format!(
                "'mimetype' content must be '{MIMETYPE}'"
            )));
        }
    }

    if archive.index_for_name(CONTAINER_PATH).is_none() {
        return Err(Error::InvalidContainer(format!(
            "required '{CONTAINER_PATH}' entry not found"
        )));
    }
    Ok(())
}

/// Parse META-INF/container.xml to find the package document path.
fn find_opf_path(archive: &mut ZipArchive<File>) -> Result<String> {
    let container = read_archive_file(archive, CONTAINER_PATH)?;

    let mut reader = Reader::from_str(&container);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e))
                if local_name(e.name().as_ref()) == b"rootfile" =>
            {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        return Ok(String::from_utf8_lossy(&attr.value).to_string());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::MalformedXml {
                    path: CONTAINER_PATH.to_string(),
                    source: e,
                });
            }
            _ => {}
        }
    }

    Err(Error::InvalidContainer(
        "no rootfile with a 'full-path' attribute in container.xml".to_string(),
    ))
}

/// Parse the OPF package document. `metadata`, `manifest`, and `spine`
/// must all be present.
fn parse_opf(content: &str, opf_path: &str) -> Result<OpfData> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut metadata = Metadata::default();
    let mut manifest: Vec<ManifestItem> = Vec::new();
    let mut spine: Vec<SpineItem> = Vec::new();
    let mut toc_id: Option<String> = None;

    let mut saw_metadata = false;
    let mut saw_manifest = false;
    let mut saw_spine = false;
    let mut in_metadata = false;
    let mut current_element: Option<String> = None;
    let mut buf_text = String::new();

    loop {
        let event = reader.read_event().map_err(|e| Error::MalformedXml {
            path: opf_path.to_string(),
            source: e,
        })?;
        match event {
            Event::Start(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                match local {
                    b"metadata" => {
                        saw_metadata = true;
                        in_metadata = true;
                    }
                    b"manifest" => saw_manifest = true,
                    b"spine" => {
                        saw_spine = true;
                        toc_id = spine_toc_attr(&e).or(toc_id);
                    }
                    b"item" => push_manifest_item(&e, &mut manifest),
                    b"itemref" => push_spine_item(&e, &mut spine),
                    _ if in_metadata => {
                        current_element = Some(String::from_utf8_lossy(local).to_string());
                        buf_text.clear();
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                match local {
                    b"metadata" => saw_metadata = true,
                    b"manifest" => saw_manifest = true,
                    b"spine" => saw_spine = true,
                    b"item" => push_manifest_item(&e, &mut manifest),
                    b"itemref" => push_spine_item(&e, &mut spine),
                    _ => {}
                }
            }
            Event::Text(e) => {
                if current_element.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if current_element.is_some() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    if let Some(resolved) = resolve_entity(&entity) {
                        buf_text.push_str(&resolved);
                    }
                }
            }
            Event::End(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                if local == b"metadata" {
                    in_metadata = false;
                }

                if let Some(elem) = current_element.take() {
                    if !buf_text.is_empty() {
                        let text = buf_text.clone();
                        match elem.as_str() {
                            "title" => metadata.title = Some(text.clone()),
                            "creator" => metadata.creator = Some(text.clone()),
                            "language" => metadata.language = Some(text.clone()),
                            "identifier" => metadata.identifier = Some(text.clone()),
                            "publisher" => metadata.publisher = Some(text.clone()),
                            "date" => metadata.date = Some(text.clone()),
                            "rights" => metadata.rights = Some(text.clone()),
                            _ => {}
                        }
                        metadata.all.entry(elem).or_default().push(text);
                    }
                    buf_text.clear();
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_metadata || !saw_manifest || !saw_spine {
        return Err(Error::InvalidContainer(
            "package document is missing one or more required elements: \
             metadata, manifest, spine"
                .to_string(),
        ));
    }

    Ok(OpfData {
        metadata,
        manifest,
        spine,
        toc_id,
    })
}

fn spine_toc_attr(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"toc")
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
}

/// Harvest a manifest `item` element. `id`, `href`, and `media-type` are
/// all required; items missing one, or reusing an id, are logged and
/// skipped.
fn push_manifest_item(e: &BytesStart<'_>, manifest: &mut Vec<ManifestItem>) {
    let mut id = String::new();
    let mut href = String::new();
    let mut media_type = String::new();
    let mut properties: Option<String> = None;

    for attr in e.attributes().flatten() {
        let value = String::from_utf8_lossy(&attr.value).to_string();
        match attr.key.as_ref() {
            b"id" => id = value,
            b"href" => href = value,
            b"media-type" => media_type = value,
            b"properties" => properties = Some(value),
            _ => {}
        }
    }

    if id.is_empty() || href.is_empty() || media_type.is_empty() {
        warn!(%id, %href, "skipping manifest item with missing attributes");
    } else if manifest.iter().any(|item| item.id == id) {
        warn!(%id, "skipping manifest item with duplicate id");
    } else {
        manifest.push(ManifestItem {
            id,
            href,
            media_type,
            properties,
        });
    }
}

/// Harvest a spine `itemref`. `linear` defaults to true; only the literal
/// value "yes" re-asserts it.
fn push_spine_item(e: &BytesStart<'_>, spine: &mut Vec<SpineItem>) {
    let mut idref = String::new();
    let mut linear = true;

    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"idref" => idref = String::from_utf8_lossy(&attr.value).to_string(),
            b"linear" => linear = attr.value.as_ref() == b"yes",
            _ => {}
        }
    }

    if !idref.is_empty() {
        spine.push(SpineItem { idref, linear });
    }
}

/// Parse an NCX table of contents into nested [`TocEntry`] values.
fn parse_ncx(content: &str) -> Result<Vec<TocEntry>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    struct NavPoint {
        children: Vec<TocEntry>,
        text: Option<String>,
        src: Option<String>,
    }

    let mut stack: Vec<NavPoint> = vec![NavPoint {
        children: Vec::new(),
        text: None,
        src: None,
    }];
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match local_name(e.name().as_ref()) {
                b"navPoint" => stack.push(NavPoint {
                    children: Vec::new(),
                    text: None,
                    src: None,
                }),
                b"text" => in_text = true,
                _ => {}
            },
            Event::Empty(e) => {
                if local_name(e.name().as_ref()) == b"content" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"src"
                            && let Some(state) = stack.last_mut()
                        {
                            state.src = Some(String::from_utf8_lossy(&attr.value).to_string());
                        }
                    }
                }
            }
            Event::Text(e) => {
                if in_text && let Some(state) = stack.last_mut() {
                    let raw = String::from_utf8_lossy(e.as_ref());
                    match &mut state.text {
                        Some(existing) => existing.push_str(&raw),
                        None => state.text = Some(raw.into_owned()),
                    }
                }
            }
            Event::GeneralRef(e) => {
                if in_text
                    && let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                    && let Some(state) = stack.last_mut()
                {
                    match &mut state.text {
                        Some(existing) => existing.push_str(&resolved),
                        None => state.text = Some(resolved),
                    }
                }
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"text" => in_text = false,
                b"navPoint" => {
                    if let Some(state) = stack.pop()
                        && let (Some(text), Some(src)) = (state.text, state.src)
                    {
                        let mut entry = TocEntry::new(text, src);
                        entry.children = state.children;
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(entry);
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(stack.pop().map(|s| s.children).unwrap_or_default())
}

/// Find the archive entry backing a manifest href, resolved against the
/// OPF directory. Hrefs may carry percent-escapes; entries are looked up
/// decoded first, then as written.
fn locate_entry(archive: &mut ZipArchive<File>, opf_dir: &str, href: &str) -> Option<String> {
    let decoded = percent_encoding::percent_decode_str(href).decode_utf8_lossy();
    let candidates = [
        resolve_path(opf_dir, &decoded),
        resolve_path(opf_dir, href),
    ];
    candidates
        .into_iter()
        .find(|path| archive.index_for_name(path).is_some())
}

fn resolve_path(base: &str, href: &str) -> String {
    let joined = if base.is_empty() {
        href.to_string()
    } else {
        format!("{base}/{href}")
    };
    normalize_path(&joined)
}

/// Collapse `.` and `..` segments; archive entry names never start with `/`.
fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(segment),
        }
    }
    parts.join("/")
}

fn read_archive_file(archive: &mut ZipArchive<File>, path: &str) -> Result<String> {
    let mut entry = archive.by_name(path)?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(strip_bom(&bytes)).to_string())
}
