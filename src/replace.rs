//! Find-and-replace mutation of book content.

use regex::{NoExpand, Regex};
use tracing::{debug, warn};

use crate::book::Book;
use crate::error::Result;
use crate::search::{SearchOptions, SearchResult, compile_pattern, html_item_hrefs};
use crate::text::rewrite_text_nodes;

/// Replace every match of `find` across the book's HTML-class resources,
/// returning the total number of substitutions.
///
/// The query is compiled exactly as in [`search`]; an uncompilable pattern
/// fails with [`Error::InvalidQuery`] before any mutation. Only resources
/// with at least one substitution are rewritten and marked dirty. In
/// literal mode the replacement is inserted verbatim; in regex mode `$n`
/// group references expand.
///
/// [`search`]: crate::search::search
/// [`Error::InvalidQuery`]: crate::Error::InvalidQuery
pub fn replace_all(
    book: &mut Book,
    find: &str,
    replace: &str,
    options: &SearchOptions,
) -> Result<usize> {
    let pattern = compile_pattern(find, options)?;

    let mut total = 0;
    for href in html_item_hrefs(book) {
        total += replace_in_resource(book, &href, &pattern, replace, options.regex);
    }
    debug!(total, find, "replace_all finished");
    Ok(total)
}

/// Substitute all matches in one resource's text nodes. Text inside style
/// and script containers is left alone. Returns the substitution count;
/// unreadable or unparseable resources count as zero.
fn replace_in_resource(
    book: &mut Book,
    href: &str,
    pattern: &Regex,
    replacement: &str,
    expand_groups: bool,
) -> usize {
    let Ok(content) = book.content.get(href) else {
        return 0;
    };

    let mut count = 0;
    let rewritten = rewrite_text_nodes(&content, |text| {
        let matches = pattern.find_iter(text).count();
        if matches == 0 {
            return None;
        }
        count += matches;
        let new_text = if expand_groups {
            pattern.replace_all(text, replacement)
        } else {
            pattern.replace_all(text, NoExpand(replacement))
        };
        Some(new_text.into_owned())
    });

    match rewritten {
        Ok(Some(bytes)) => {
            book.content.update(href, bytes);
            count
        }
        Ok(None) => 0,
        Err(e) => {
            warn!(href, error = %e, "skipping unparseable resource");
            0
        }
    }
}

/// Replace the first literal occurrence of a previously found match on its
/// line, rewriting the resource only if the line actually changed.
///
/// Operates on raw content lines with terminators preserved; the result's
/// 1-based line number selects the line. Returns false when the line is
/// out of range, the match text no longer occurs on it, or the resource
/// cannot be read. The original query flags are irrelevant here: only the
/// exact matched text matters.
pub fn replace_one(book: &mut Book, result: &SearchResult, replace_text: &str) -> bool {
    let Ok(content) = book.content.get(&result.item_href) else {
        return false;
    };
    let Some(index) = result.line_number.checked_sub(1) else {
        return false;
    };

    let text = String::from_utf8_lossy(&content);
    let mut output = String::with_capacity(text.len());
    let mut changed = false;

    for (i, line) in text.split_inclusive('\n').enumerate() {
        if i == index {
            let new_line = line.replacen(&result.match_text, replace_text, 1);
            if new_line != line {
                changed = true;
            }
            output.push_str(&new_line);
        } else {
            output.push_str(line);
        }
    }

    if !changed {
        return false;
    }
    book.content.update(&result.item_href, output.into_bytes());
    true
}

/// Apply an ordered sequence of (find, replace) pairs under one shared
/// flag configuration, returning the summed substitution count.
///
/// Every find pattern is validated up front, so an invalid pattern
/// anywhere in the batch fails the whole call before any mutation. Pairs
/// then apply strictly in sequence: a later pair sees the effects of
/// earlier ones.
pub fn batch_replace_all(
    book: &mut Book,
    operations: &[(String, String)],
    options: &SearchOptions,
) -> Result<usize> {
    for (find, _) in operations {
        compile_pattern(find, options)?;
    }

    let mut total = 0;
    for (find, replace) in operations {
        total += replace_all(book, find, replace, options)?;
    }
    Ok(total)
}
