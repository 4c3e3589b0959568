//! Book structure, content parsing, and loader contracts for paginated readers.
//!
//! A [`Book`] is a tree of optional volumes over globally numbered chapters.
//! Chapter content is fetched lazily through a [`Loader`] and turned into a
//! block sequence by a [`ContentParser`]; layout and the reading session live
//! in `pageturn-render`.
//!
//! ```rust
//! use pageturn::{Book, BookChild, Volume, VolumeMode};
//!
//! # fn example() -> Result<(), pageturn::BookError> {
//! let mut book = Book::new("Collected Stories", "Anonymous", VolumeMode::MultiVolume);
//! let mut first = Volume::new("Part One", book.next_chapter_index());
//! first.push_chapter(Some("Opening"));
//! first.push_chapter(Some("Departure"));
//! book.add_child(BookChild::Volume(first))?;
//!
//! let chapter = book.resolve(2)?;
//! assert_eq!(chapter.title(), Some("Departure"));
//! # Ok(())
//! # }
//! ```

#![cfg_attr(
    not(test),
    deny(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::todo,
        clippy::unimplemented
    )
)]

pub mod book;
pub mod error;
pub mod loader;
pub mod parser;

pub use book::{Book, BookChild, Chapter, ChapterOwner, ChapterRange, Volume, VolumeMode};
pub use error::{BookError, FetchError, IndexKind, ParseError};
pub use loader::{DirectoryLoader, Loader, SimpleTextLoader};
pub use parser::{BlockRole, ContentBlock, ContentParser, DefaultContentParser, StructuredChapter};
