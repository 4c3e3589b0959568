//! Loader contract and built-in loaders.
//!
//! A loader builds the table of contents once and fetches chapter content on
//! demand. Fetching may be slow (network or disk) and may fail; callers treat
//! failures as transient.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::book::{Book, BookChild, Chapter, Volume, VolumeMode};
use crate::error::{BookError, FetchError};

/// Title given to the single chapter of a [`SimpleTextLoader`] book.
pub const UNTITLED_CHAPTER: &str = "Untitled";

/// Source of book structure and chapter content.
pub trait Loader: Send + Sync {
    /// Build the full book structure, including chapter titles but not
    /// necessarily content.
    fn init_table_of_contents(&self) -> Result<Book, BookError>;

    /// Fetch raw content for one chapter.
    fn fetch_content(&self, chapter: &Chapter) -> Result<String, FetchError>;
}

/// Presents a single string as a one-chapter book.
#[derive(Clone, Debug)]
pub struct SimpleTextLoader {
    text: String,
}

impl SimpleTextLoader {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Loader for SimpleTextLoader {
    fn init_table_of_contents(&self) -> Result<Book, BookError> {
        let mut book = Book::new(UNTITLED_CHAPTER, "", VolumeMode::SingleVolume);
        book.add_child(BookChild::Chapter(Chapter::with_content(
            1,
            Some(UNTITLED_CHAPTER),
            self.text.clone(),
        )))?;
        Ok(book)
    }

    fn fetch_content(&self, _chapter: &Chapter) -> Result<String, FetchError> {
        Ok(self.text.clone())
    }
}

/// Reads a book laid out as plain-text files on disk.
///
/// A directory of `.txt` files is a single-volume book with one chapter per
/// file, in file-name order. A directory of subdirectories is a multi-volume
/// book with one volume per subdirectory. Leading ordering prefixes such as
/// `01-` or `003_` are stripped from titles. Content is read on fetch.
#[derive(Debug)]
pub struct DirectoryLoader {
    root: PathBuf,
    chapter_paths: Mutex<Vec<PathBuf>>,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chapter_paths: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Loader for DirectoryLoader {
    fn init_table_of_contents(&self) -> Result<Book, BookError> {
        let title = self
            .root
            .file_name()
            .and_then(|name| name.to_str())
            .map(strip_order_prefix)
            .unwrap_or_default();
        let (dirs, files) = list_entries(&self.root)?;
        let mut paths = Vec::with_capacity(files.len());

        let book = if dirs.is_empty() {
            let mut book = Book::new(title, "", VolumeMode::SingleVolume);
            for path in files {
                book.push_chapter(Some(title_of(&path).as_str()))?;
                paths.push(path);
            }
            book
        } else {
            if !files.is_empty() {
                log::warn!(
                    "ignoring {} loose chapter files next to volume directories in {}",
                    files.len(),
                    self.root.display()
                );
            }
            let mut book = Book::new(title, "", VolumeMode::MultiVolume);
            for dir in dirs {
                let mut volume = Volume::new(title_of(&dir), book.next_chapter_index());
                let (_, chapter_files) = list_entries(&dir)?;
                for path in chapter_files {
                    volume.push_chapter(Some(title_of(&path).as_str()));
                    paths.push(path);
                }
                book.add_child(BookChild::Volume(volume))?;
            }
            book
        };

        log::debug!(
            "directory book {} has {} chapters",
            self.root.display(),
            book.chapter_count()
        );
        *self
            .chapter_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = paths;
        Ok(book)
    }

    fn fetch_content(&self, chapter: &Chapter) -> Result<String, FetchError> {
        let path = {
            let paths = self
                .chapter_paths
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            chapter
                .index()
                .checked_sub(1)
                .and_then(|idx| paths.get(idx))
                .cloned()
        };
        let path = path.ok_or_else(|| {
            FetchError::new(chapter.index(), "chapter is not part of this directory")
        })?;
        fs::read_to_string(&path).map_err(|err| {
            FetchError::new(chapter.index(), format!("read {}", path.display())).with_source(err)
        })
    }
}

fn list_entries(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>), BookError> {
    let entries = fs::read_dir(dir).map_err(|err| {
        FetchError::table_of_contents(format!("list {}", dir.display())).with_source(err)
    })?;
    let mut dirs = Vec::with_capacity(8);
    let mut files = Vec::with_capacity(32);
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"))
        {
            files.push(path);
        }
    }
    dirs.sort();
    files.sort();
    Ok((dirs, files))
}

fn title_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(strip_order_prefix)
        .unwrap_or_default()
}

fn strip_order_prefix(name: &str) -> String {
    let rest = name.trim_start_matches(|c: char| c.is_ascii_digit());
    if rest.len() == name.len() {
        return name.trim().to_string();
    }
    let rest = rest.trim_start_matches(['-', '_', '.', ' ']);
    if rest.is_empty() {
        name.trim().to_string()
    } else {
        rest.trim().to_string()
    }
}
