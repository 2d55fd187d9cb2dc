//! Text search across the HTML-class resources of a book.

use std::collections::VecDeque;

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::book::Book;
use crate::error::Result;
use crate::text::extract_text;

/// Query flags shared by search and replace. Both engines compile the
/// query through [`compile_pattern`], so their match semantics are
/// identical by construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    pub whole_word: bool,
    pub regex: bool,
}

/// A single match within a resource's extracted plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub file_path: String,
    /// 1-based line number within the extracted plain text (not the raw
    /// markup).
    pub line_number: usize,
    pub match_text: String,
    pub context_before: String,
    pub context_after: String,
    /// Href of the owning manifest item, for downstream identification.
    pub item_href: String,
}

/// Compile a query into a matcher. Literal queries are escaped first, then
/// word boundaries are wrapped around the (possibly escaped) pattern.
pub(crate) fn compile_pattern(query: &str, options: &SearchOptions) -> Result<Regex> {
    let mut pattern = if options.regex {
        query.to_string()
    } else {
        regex::escape(query)
    };
    if options.whole_word {
        pattern = format!(r"\b{pattern}\b");
    }
    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(!options.case_sensitive)
        .build()?;
    Ok(regex)
}

/// Hrefs of manifest items whose media type marks them as HTML-class
/// content, in manifest order.
pub(crate) fn html_item_hrefs(book: &Book) -> Vec<String> {
    book.manifest
        .iter()
        .filter(|item| item.media_type.contains("html"))
        .map(|item| item.href.clone())
        .collect()
}

/// Search the book's HTML-class resources.
///
/// Returns a lazy iterator over matches in manifest order; re-invoking
/// re-scans. Fails with [`Error::InvalidQuery`] if `options.regex` is set
/// and the query does not compile. Resources with missing or unreadable
/// content are skipped silently.
///
/// [`Error::InvalidQuery`]: crate::Error::InvalidQuery
pub fn search<'a>(book: &'a mut Book, query: &str, options: &SearchOptions) -> Result<Search<'a>> {
    let pattern = compile_pattern(query, options)?;
    let items = html_item_hrefs(book);
    debug!(items = items.len(), %pattern, "starting search");
    Ok(Search {
        book,
        pattern,
        items,
        next_item: 0,
        pending: VecDeque::new(),
    })
}

/// Lazy search iterator returned by [`search`]. Resources are scanned one
/// at a time as results are consumed.
pub struct Search<'a> {
    book: &'a mut Book,
    pattern: Regex,
    items: Vec<String>,
    next_item: usize,
    pending: VecDeque<SearchResult>,
}

impl Iterator for Search<'_> {
    type Item = SearchResult;

    fn next(&mut self) -> Option<SearchResult> {
        loop {
            if let Some(result) = self.pending.pop_front() {
                return Some(result);
            }

            let href = self.items.get(self.next_item)?.clone();
            self.next_item += 1;

            let Ok(content) = self.book.content.get(&href) else {
                continue;
            };
            let text = extract_text(&content);

            for (i, line) in text.lines().enumerate() {
                for m in self.pattern.find_iter(line) {
                    self.pending.push_back(SearchResult {
                        file_path: href.clone(),
                        line_number: i + 1,
                        match_text: m.as_str().to_string(),
                        context_before: line[..m.start()].to_string(),
                        context_after: line[m.end()..].to_string(),
                        item_href: href.clone(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::ManifestItem;

    fn test_book(pages: &[(&str, &str)]) -> Book {
        let mut book = Book::new("test.epub");
        for (i, (href, html)) in pages.iter().enumerate() {
            book.manifest.push(ManifestItem {
                id: format!("item{i}"),
                href: href.to_string(),
                media_type: "application/xhtml+xml".to_string(),
                properties: None,
            });
            book.content.update(href, html.as_bytes().to_vec());
        }
        book
    }

    #[test]
    fn test_literal_search() {
        let mut book = test_book(&[(
            "ch1.xhtml",
            "<html><body><p>the cat sat\non the mat</p></body></html>",
        )]);
        let options = SearchOptions::default();
        let results: Vec<_> = search(&mut book, "cat", &options).unwrap().collect();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].line_number, 1);
        assert_eq!(results[0].match_text, "cat");
        assert_eq!(results[0].context_before, "the ");
        assert_eq!(results[0].context_after, " sat");
        assert_eq!(results[0].item_href, "ch1.xhtml");
    }

    #[test]
    fn test_whole_word_excludes_substrings() {
        let mut book = test_book(&[(
            "ch1.xhtml",
            "<html><body><p>the cat sat</p><p>category</p></body></html>",
        )]);
        let options = SearchOptions {
            whole_word: true,
            ..Default::default()
        };
        let results: Vec<_> = search(&mut book, "cat", &options).unwrap().collect();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].context_after, " sat");
    }

    #[test]
    fn test_case_sensitivity() {
        let mut book = test_book(&[("ch1.xhtml", "<p>Cat cat CAT</p>")]);

        let insensitive: Vec<_> =
            search(&mut book, "cat", &SearchOptions::default()).unwrap().collect();
        assert_eq!(insensitive.len(), 3);

        let options = SearchOptions {
            case_sensitive: true,
            ..Default::default()
        };
        let sensitive: Vec<_> = search(&mut book, "cat", &options).unwrap().collect();
        assert_eq!(sensitive.len(), 1);
    }

    #[test]
    fn test_literal_query_escapes_metacharacters() {
        let mut book = test_book(&[("ch1.xhtml", "<p>1+1 and 111</p>")]);
        let results: Vec<_> =
            search(&mut book, "1+1", &SearchOptions::default()).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_text, "1+1");
    }

    #[test]
    fn test_regex_search() {
        let mut book = test_book(&[("ch1.xhtml", "<p>cat cot cut</p>")]);
        let options = SearchOptions {
            regex: true,
            ..Default::default()
        };
        let results: Vec<_> = search(&mut book, "c.t", &options).unwrap().collect();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let mut book = test_book(&[("ch1.xhtml", "<p>text</p>")]);
        let options = SearchOptions {
            regex: true,
            ..Default::default()
        };
        let err = search(&mut book, "(unbalanced", &options).err().unwrap();
        assert!(matches!(err, crate::Error::InvalidQuery(_)));
    }

    #[test]
    fn test_non_html_items_are_not_scanned() {
        let mut book = test_book(&[("ch1.xhtml", "<p>needle</p>")]);
        book.manifest.push(ManifestItem {
            id: "css".to_string(),
            href: "style.css".to_string(),
            media_type: "text/css".to_string(),
            properties: None,
        });
        book.content.update("style.css", b"/* needle */".to_vec());

        let results: Vec<_> =
            search(&mut book, "needle", &SearchOptions::default()).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item_href, "ch1.xhtml");
    }

    #[test]
    fn test_missing_content_is_skipped() {
        let mut book = test_book(&[("ch1.xhtml", "<p>needle</p>")]);
        // Manifest entry with no readable content.
        book.manifest.push(ManifestItem {
            id: "ghost".to_string(),
            href: "ghost.xhtml".to_string(),
            media_type: "application/xhtml+xml".to_string(),
            properties: None,
        });

        let results: Vec<_> =
            search(&mut book, "needle", &SearchOptions::default()).unwrap().collect();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_search_is_restartable() {
        let mut book = test_book(&[("ch1.xhtml", "<p>one needle</p>")]);
        let options = SearchOptions::default();
        let first: Vec<_> = search(&mut book, "needle", &options).unwrap().collect();
        let second: Vec<_> = search(&mut book, "needle", &options).unwrap().collect();
        assert_eq!(first, second);
    }
}
