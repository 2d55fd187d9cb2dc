//! # epubedit
//!
//! An EPUB editing engine: load a publication, search its text, apply
//! find-and-replace operations, and save it back with every untouched
//! archive entry preserved byte-for-byte.
//!
//! ## Quick Start
//!
//! ```no_run
//! use epubedit::{open_epub, replace_all, save_epub, SearchOptions};
//!
//! let mut book = open_epub("book.epub")?;
//! let count = replace_all(&mut book, "teh", "the", &SearchOptions::default())?;
//! if count > 0 {
//!     save_epub(&mut book, true)?;
//! }
//! # Ok::<(), epubedit::Error>(())
//! ```
//!
//! ## Searching
//!
//! [`search`] yields matches lazily, in manifest order, with line context:
//!
//! ```no_run
//! use epubedit::{open_epub, search, SearchOptions};
//!
//! let mut book = open_epub("book.epub")?;
//! let options = SearchOptions { whole_word: true, ..Default::default() };
//! for result in search(&mut book, "cat", &options)? {
//!     println!("{}:{}: {}", result.item_href, result.line_number, result.match_text);
//! }
//! # Ok::<(), epubedit::Error>(())
//! ```
//!
//! All operations are synchronous; a [`Book`] must not be mutated from
//! more than one thread at a time.

pub mod book;
pub mod epub;
pub mod error;
pub mod replace;
pub mod search;
pub(crate) mod text;

pub use book::{Book, ContentManager, ManifestItem, Metadata, SpineItem, TocEntry};
pub use epub::{open_epub, save_epub};
pub use error::{Error, Result};
pub use replace::{batch_replace_all, replace_all, replace_one};
pub use search::{Search, SearchOptions, SearchResult, search};
