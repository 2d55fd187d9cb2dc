//! EPUB container loading and saving.

mod loader;
mod saver;

pub use loader::open_epub;
pub use saver::save_epub;
