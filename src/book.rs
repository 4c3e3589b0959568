//! Book structure and global chapter numbering.
//!
//! A book holds either chapters directly or volumes of chapters, never both.
//! Chapters are numbered `1..=chapter_count` across the whole book; a volume
//! owns the half-open range of global numbers `[from, to)`. Structure is fixed
//! once the table of contents is built; only chapter content is filled in
//! later, exactly once.

use std::sync::OnceLock;

use crate::error::{BookError, IndexKind};

/// Half-open range `[from, to)` of global chapter numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChapterRange {
    pub from: usize,
    pub to: usize,
}

impl ChapterRange {
    pub fn new(from: usize, to: usize) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.from && index < self.to
    }

    pub fn len(&self) -> usize {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Non-owning back-reference from a chapter to its container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChapterOwner {
    /// Chapter is a direct child of a single-volume book.
    #[default]
    Book,
    /// Chapter belongs to the volume with this 1-based number.
    Volume(usize),
}

/// One chapter of a book.
#[derive(Clone, Debug)]
pub struct Chapter {
    index: usize,
    title: Option<String>,
    content: OnceLock<String>,
    owner: ChapterOwner,
}

impl Chapter {
    /// Create a chapter with its global number. Content starts unfetched.
    pub fn new(index: usize, title: Option<&str>) -> Self {
        Self {
            index,
            title: title.map(str::to_string),
            content: OnceLock::new(),
            owner: ChapterOwner::Book,
        }
    }

    /// Create a chapter whose content is already known.
    pub fn with_content(index: usize, title: Option<&str>, content: impl Into<String>) -> Self {
        let chapter = Self::new(index, title);
        let _ = chapter.content.set(content.into());
        chapter
    }

    /// Global 1-based chapter number.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn owner(&self) -> ChapterOwner {
        self.owner
    }

    /// Raw content, once fetched.
    pub fn content(&self) -> Option<&str> {
        self.content.get().map(String::as_str)
    }

    pub fn has_content(&self) -> bool {
        self.content.get().is_some()
    }

    /// Publish fetched content. Returns `false` if content was already set,
    /// in which case the existing content is kept.
    pub fn publish_content(&self, content: String) -> bool {
        self.content.set(content).is_ok()
    }
}

/// A volume: a titled group of consecutively numbered chapters.
#[derive(Clone, Debug)]
pub struct Volume {
    number: usize,
    title: String,
    range: ChapterRange,
    chapters: Vec<Chapter>,
}

impl Volume {
    /// Create an empty volume whose first chapter will get global number
    /// `first_chapter`. Use [`Book::next_chapter_index`] to obtain it.
    pub fn new(title: impl Into<String>, first_chapter: usize) -> Self {
        Self {
            number: 0,
            title: title.into(),
            range: ChapterRange::new(first_chapter, first_chapter),
            chapters: Vec::with_capacity(8),
        }
    }

    /// Append a chapter and return its global number.
    pub fn push_chapter(&mut self, title: Option<&str>) -> usize {
        let index = self.range.to;
        let mut chapter = Chapter::new(index, title);
        chapter.owner = ChapterOwner::Volume(self.number);
        self.chapters.push(chapter);
        self.range.to += 1;
        index
    }

    /// Append a chapter with known content and return its global number.
    pub fn push_chapter_with_content(
        &mut self,
        title: Option<&str>,
        content: impl Into<String>,
    ) -> usize {
        let index = self.push_chapter(title);
        if let Some(chapter) = self.chapters.last() {
            chapter.publish_content(content.into());
        }
        index
    }

    /// 1-based volume number, or `0` while detached from a book.
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Global chapter numbers owned by this volume.
    pub fn range(&self) -> ChapterRange {
        self.range
    }

    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    /// Direct lookup by 1-based local chapter number.
    pub fn chapter(&self, local: usize) -> Result<&Chapter, BookError> {
        local
            .checked_sub(1)
            .and_then(|idx| self.chapters.get(idx))
            .ok_or_else(|| BookError::out_of_range(IndexKind::LocalChapter, local, self.chapters.len()))
    }

    /// Translate a global chapter number into this volume's local numbering.
    pub fn local_index(&self, global: usize) -> Option<usize> {
        self.range
            .contains(global)
            .then(|| global - self.range.from + 1)
    }

    fn attach(&mut self, number: usize) {
        self.number = number;
        for chapter in &mut self.chapters {
            chapter.owner = ChapterOwner::Volume(number);
        }
    }
}

/// Whether a book groups its chapters into volumes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum VolumeMode {
    #[default]
    SingleVolume,
    MultiVolume,
}

/// Direct child of a [`Book`].
#[derive(Clone, Debug)]
pub enum BookChild {
    Chapter(Chapter),
    Volume(Volume),
}

/// A book and its chapter index.
#[derive(Clone, Debug)]
pub struct Book {
    title: String,
    author: String,
    mode: VolumeMode,
    children: Vec<BookChild>,
    chapter_count: usize,
}

impl Book {
    pub fn new(title: impl Into<String>, author: impl Into<String>, mode: VolumeMode) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            mode,
            children: Vec::with_capacity(8),
            chapter_count: 0,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn mode(&self) -> VolumeMode {
        self.mode
    }

    pub fn is_multi_volume(&self) -> bool {
        self.mode == VolumeMode::MultiVolume
    }

    /// Number of direct children: chapters, or volumes in multi-volume mode.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Total number of chapters across the whole book.
    pub fn chapter_count(&self) -> usize {
        self.chapter_count
    }

    /// Global number the next appended chapter must carry.
    pub fn next_chapter_index(&self) -> usize {
        self.chapter_count + 1
    }

    /// Append a child, enforcing the book's volume mode and contiguous
    /// chapter numbering.
    pub fn add_child(&mut self, child: BookChild) -> Result<(), BookError> {
        match (self.mode, child) {
            (VolumeMode::SingleVolume, BookChild::Chapter(mut chapter)) => {
                if chapter.index != self.next_chapter_index() {
                    return Err(BookError::InvalidStructure {
                        reason: "chapter number does not continue global numbering",
                    });
                }
                chapter.owner = ChapterOwner::Book;
                self.children.push(BookChild::Chapter(chapter));
                self.chapter_count += 1;
                Ok(())
            }
            (VolumeMode::MultiVolume, BookChild::Volume(mut volume)) => {
                if volume.range.from != self.next_chapter_index() {
                    return Err(BookError::InvalidStructure {
                        reason: "volume range does not continue global numbering",
                    });
                }
                volume.attach(self.children.len() + 1);
                self.chapter_count += volume.chapter_count();
                self.children.push(BookChild::Volume(volume));
                Ok(())
            }
            (VolumeMode::SingleVolume, BookChild::Volume(_)) => Err(BookError::InvalidStructure {
                reason: "single-volume book accepts only chapters",
            }),
            (VolumeMode::MultiVolume, BookChild::Chapter(_)) => Err(BookError::InvalidStructure {
                reason: "multi-volume book accepts only volumes",
            }),
        }
    }

    /// Append a chapter to a single-volume book and return its number.
    pub fn push_chapter(&mut self, title: Option<&str>) -> Result<usize, BookError> {
        let index = self.next_chapter_index();
        self.add_child(BookChild::Chapter(Chapter::new(index, title)))?;
        Ok(index)
    }

    /// 1-based direct child lookup.
    pub fn child(&self, number: usize) -> Result<&BookChild, BookError> {
        let kind = if self.is_multi_volume() {
            IndexKind::Volume
        } else {
            IndexKind::Chapter
        };
        number
            .checked_sub(1)
            .and_then(|idx| self.children.get(idx))
            .ok_or_else(|| BookError::out_of_range(kind, number, self.children.len()))
    }

    /// Iterate volumes in order. Empty for single-volume books.
    pub fn volumes(&self) -> impl Iterator<Item = &Volume> + '_ {
        self.children.iter().filter_map(|child| match child {
            BookChild::Volume(volume) => Some(volume),
            BookChild::Chapter(_) => None,
        })
    }

    /// 1-based volume lookup.
    pub fn volume(&self, number: usize) -> Result<&Volume, BookError> {
        match self.child(number) {
            Ok(BookChild::Volume(volume)) => Ok(volume),
            _ => Err(BookError::out_of_range(
                IndexKind::Volume,
                number,
                self.volumes().count(),
            )),
        }
    }

    /// Iterate every chapter in global order.
    pub fn chapters(&self) -> impl Iterator<Item = &Chapter> + '_ {
        self.children.iter().flat_map(|child| match child {
            BookChild::Chapter(chapter) => core::slice::from_ref(chapter).iter(),
            BookChild::Volume(volume) => volume.chapters.iter(),
        })
    }

    /// Resolve a global chapter number to its chapter.
    ///
    /// Single-volume books index directly; multi-volume books binary-search
    /// the volume ranges and then index into the owning volume.
    pub fn resolve(&self, index: usize) -> Result<&Chapter, BookError> {
        self.check_chapter_index(index)?;
        match self.mode {
            VolumeMode::SingleVolume => match self.children.get(index - 1) {
                Some(BookChild::Chapter(chapter)) => Ok(chapter),
                _ => Err(BookError::out_of_range(
                    IndexKind::Chapter,
                    index,
                    self.chapter_count,
                )),
            },
            VolumeMode::MultiVolume => {
                let volume = self.find_volume(index).ok_or_else(|| {
                    BookError::out_of_range(IndexKind::Chapter, index, self.chapter_count)
                })?;
                volume.chapter(index - volume.range.from + 1)
            }
        }
    }

    /// Volume owning a global chapter number; `None` for single-volume books.
    pub fn volume_of(&self, index: usize) -> Result<Option<&Volume>, BookError> {
        self.check_chapter_index(index)?;
        match self.mode {
            VolumeMode::SingleVolume => Ok(None),
            VolumeMode::MultiVolume => Ok(self.find_volume(index)),
        }
    }

    fn check_chapter_index(&self, index: usize) -> Result<(), BookError> {
        if index == 0 || index > self.chapter_count {
            return Err(BookError::out_of_range(
                IndexKind::Chapter,
                index,
                self.chapter_count,
            ));
        }
        Ok(())
    }

    fn find_volume(&self, index: usize) -> Option<&Volume> {
        let mut low = 0usize;
        let mut high = self.children.len();
        while low < high {
            let mid = low + (high - low) / 2;
            let BookChild::Volume(volume) = &self.children[mid] else {
                return None;
            };
            if index < volume.range.from {
                high = mid;
            } else if index >= volume.range.to {
                low = mid + 1;
            } else {
                return Some(volume);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume_book(sizes: &[usize]) -> Book {
        let mut book = Book::new("Saga", "Anon", VolumeMode::MultiVolume);
        for (vol_idx, size) in sizes.iter().enumerate() {
            let mut volume = Volume::new(format!("Volume {}", vol_idx + 1), book.next_chapter_index());
            for ch in 0..*size {
                volume.push_chapter(Some(format!("v{}c{}", vol_idx + 1, ch + 1).as_str()));
            }
            book.add_child(BookChild::Volume(volume)).expect("add volume");
        }
        book
    }

    #[test]
    fn two_volume_book_resolves_global_numbers() {
        let book = volume_book(&[3, 3]);
        assert_eq!(book.chapter_count(), 6);
        assert_eq!(book.child_count(), 2);

        let first = book.resolve(1).expect("chapter 1");
        assert_eq!(first.title(), Some("v1c1"));
        assert_eq!(first.owner(), ChapterOwner::Volume(1));

        let fourth = book.resolve(4).expect("chapter 4");
        assert_eq!(fourth.title(), Some("v2c1"));
        assert_eq!(fourth.owner(), ChapterOwner::Volume(2));

        let sixth = book.resolve(6).expect("chapter 6");
        assert_eq!(sixth.title(), Some("v2c3"));
        assert_eq!(book.volume_of(6).expect("volume of 6").map(Volume::number), Some(2));

        assert!(matches!(
            book.resolve(7),
            Err(BookError::IndexOutOfRange {
                kind: IndexKind::Chapter,
                index: 7,
                len: 6
            })
        ));
        assert!(matches!(book.resolve(0), Err(BookError::IndexOutOfRange { .. })));
    }

    #[test]
    fn resolve_matches_owning_range_for_every_chapter() {
        let book = volume_book(&[1, 4, 2, 7, 3, 1, 5]);
        for n in 1..=book.chapter_count() {
            let chapter = book.resolve(n).expect("resolve");
            assert_eq!(chapter.index(), n);
            let volume = book.volume_of(n).expect("volume").expect("multi-volume");
            assert!(volume.range().contains(n));
            assert_eq!(volume.local_index(n).map(|local| volume.range().from + local - 1), Some(n));
            assert_eq!(book.resolve(chapter.index()).expect("again").index(), n);
        }
    }

    #[test]
    fn volume_ranges_partition_chapters() {
        let book = volume_book(&[2, 5, 1, 3]);
        let ranges: Vec<ChapterRange> = book.volumes().map(Volume::range).collect();
        assert_eq!(ranges[0].from, 1);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
        assert_eq!(ranges.last().map(|r| r.to), Some(book.chapter_count() + 1));
    }

    #[test]
    fn empty_volume_is_skipped_by_search() {
        let book = volume_book(&[2, 0, 2]);
        assert_eq!(book.chapter_count(), 4);
        assert_eq!(book.resolve(3).expect("chapter 3").owner(), ChapterOwner::Volume(3));
        assert_eq!(book.resolve(2).expect("chapter 2").owner(), ChapterOwner::Volume(1));
    }

    #[test]
    fn single_volume_book_indexes_directly() {
        let mut book = Book::new("Short", "Anon", VolumeMode::SingleVolume);
        for title in ["a", "b", "c"] {
            book.push_chapter(Some(title)).expect("push");
        }
        assert_eq!(book.chapter_count(), 3);
        assert_eq!(book.resolve(2).expect("chapter 2").title(), Some("b"));
        assert_eq!(book.resolve(3).expect("chapter 3").owner(), ChapterOwner::Book);
        assert!(book.volume_of(2).expect("in range").is_none());
        assert!(book.volume_of(4).is_err());
    }

    #[test]
    fn mismatched_children_are_rejected() {
        let mut single = Book::new("s", "a", VolumeMode::SingleVolume);
        let err = single
            .add_child(BookChild::Volume(Volume::new("v", 1)))
            .expect_err("volume in single-volume book");
        assert!(matches!(err, BookError::InvalidStructure { .. }));

        let mut multi = Book::new("m", "a", VolumeMode::MultiVolume);
        let err = multi
            .add_child(BookChild::Chapter(Chapter::new(1, None)))
            .expect_err("chapter in multi-volume book");
        assert!(matches!(err, BookError::InvalidStructure { .. }));
        assert!(multi.push_chapter(Some("x")).is_err());
    }

    #[test]
    fn gaps_in_numbering_are_rejected() {
        let mut single = Book::new("s", "a", VolumeMode::SingleVolume);
        let err = single
            .add_child(BookChild::Chapter(Chapter::new(2, None)))
            .expect_err("chapter 2 before chapter 1");
        assert!(matches!(err, BookError::InvalidStructure { .. }));

        let mut multi = Book::new("m", "a", VolumeMode::MultiVolume);
        let mut volume = Volume::new("v", 3);
        volume.push_chapter(None);
        assert!(multi.add_child(BookChild::Volume(volume)).is_err());
    }

    #[test]
    fn content_is_published_once() {
        let chapter = Chapter::new(1, Some("t"));
        assert!(!chapter.has_content());
        assert!(chapter.publish_content("first".to_string()));
        assert!(!chapter.publish_content("second".to_string()));
        assert_eq!(chapter.content(), Some("first"));
    }

    #[test]
    fn chapters_iterates_in_global_order() {
        let book = volume_book(&[2, 3]);
        let numbers: Vec<usize> = book.chapters().map(Chapter::index).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert!(book.volume(3).is_err());
        assert_eq!(book.volume(2).expect("volume 2").chapter_count(), 3);
    }
}
