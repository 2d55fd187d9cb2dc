//! Markup text utilities shared by the search and replace engines.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesText, Event};

use crate::error::Result;

/// Strip UTF-8 BOM if present.
pub(crate) fn strip_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    }
}

/// Extract local name from namespaced XML name (e.g., "dc:title" -> "title").
pub(crate) fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Resolve XML entity references.
pub(crate) fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {}
    }

    if let Some(hex) = entity.strip_prefix("#x") {
        if let Ok(code) = u32::from_str_radix(hex, 16)
            && let Some(c) = char::from_u32(code)
        {
            return Some(c.to_string());
        }
    } else if let Some(dec) = entity.strip_prefix('#')
        && let Ok(code) = dec.parse::<u32>()
        && let Some(c) = char::from_u32(code)
    {
        return Some(c.to_string());
    }

    None
}

/// Strip markup from an HTML-class document, concatenating text nodes
/// verbatim so line breaks in the source text survive.
///
/// Tolerant of broken markup: extraction stops at the first parse error and
/// returns whatever was collected up to that point.
pub(crate) fn extract_text(content: &[u8]) -> String {
    let source = String::from_utf8_lossy(strip_bom(content));
    let mut reader = Reader::from_str(&source);

    let mut text = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => text.push_str(&String::from_utf8_lossy(e.as_ref())),
            Ok(Event::CData(e)) => text.push_str(&String::from_utf8_lossy(e.as_ref())),
            Ok(Event::GeneralRef(e)) => {
                let entity = String::from_utf8_lossy(e.as_ref());
                if let Some(resolved) = resolve_entity(&entity) {
                    text.push_str(&resolved);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }
    text
}

/// Stream a document through unchanged except for its text nodes, which
/// are offered to `rewrite`. A `Some` return substitutes the node's text.
/// Text directly inside `style` or `script` elements is never offered.
///
/// Returns `Some(bytes)` with the re-serialized document if any node was
/// rewritten, `None` if the document is unchanged.
pub(crate) fn rewrite_text_nodes<F>(content: &[u8], mut rewrite: F) -> Result<Option<Vec<u8>>>
where
    F: FnMut(&str) -> Option<String>,
{
    let source = String::from_utf8_lossy(strip_bom(content));
    let mut reader = Reader::from_str(&source);
    let mut writer = Writer::new(Vec::new());

    let mut parents: Vec<String> = Vec::new();
    let mut changed = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(local_name(e.name().as_ref())).to_lowercase();
                parents.push(name);
                writer.write_event(Event::Start(e))?;
            }
            Event::End(e) => {
                parents.pop();
                writer.write_event(Event::End(e))?;
            }
            Event::Text(e) => {
                let parent = parents.last().map(String::as_str).unwrap_or("");
                if parent == "style" || parent == "script" {
                    writer.write_event(Event::Text(e))?;
                    continue;
                }
                let text = String::from_utf8_lossy(e.as_ref());
                match rewrite(&text) {
                    Some(new_text) => {
                        changed = true;
                        writer.write_event(Event::Text(BytesText::new(&new_text)))?;
                    }
                    None => writer.write_event(Event::Text(e))?,
                }
            }
            Event::Eof => break,
            event => writer.write_event(event)?,
        }
    }

    if changed {
        Ok(Some(writer.into_inner()))
    } else {
        Ok(None)
    }
}
