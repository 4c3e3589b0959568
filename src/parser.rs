//! Chapter content parsing into title/paragraph blocks.

use serde::{Deserialize, Serialize};

use crate::book::Chapter;
use crate::error::ParseError;

/// Role of a content block, used by layout to pick font size and spacing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockRole {
    Title,
    #[default]
    Paragraph,
}

/// One block of chapter content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub role: BlockRole,
    pub text: String,
}

impl ContentBlock {
    pub fn title(text: impl Into<String>) -> Self {
        Self {
            role: BlockRole::Title,
            text: text.into(),
        }
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Self {
            role: BlockRole::Paragraph,
            text: text.into(),
        }
    }
}

/// Parsed chapter: its number and ordered blocks, before pagination.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredChapter {
    pub chapter_index: usize,
    pub blocks: Vec<ContentBlock>,
}

impl StructuredChapter {
    pub fn new(chapter_index: usize) -> Self {
        Self {
            chapter_index,
            blocks: Vec::with_capacity(16),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Turns fetched chapter content into a block sequence.
///
/// Implementations must be deterministic for identical input.
pub trait ContentParser: Send + Sync {
    fn parse(&self, chapter: &Chapter) -> Result<StructuredChapter, ParseError>;
}

/// Line-per-paragraph parser.
///
/// Emits the chapter title (if any) as a title block, then one paragraph per
/// non-blank line of content, trimmed.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultContentParser;

impl ContentParser for DefaultContentParser {
    fn parse(&self, chapter: &Chapter) -> Result<StructuredChapter, ParseError> {
        let content = chapter.content().ok_or(ParseError::ContentMissing {
            chapter: chapter.index(),
        })?;
        let mut out = StructuredChapter::new(chapter.index());
        if let Some(title) = chapter.title() {
            out.blocks.push(ContentBlock::title(title));
        }
        out.blocks.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ContentBlock::paragraph),
        );
        Ok(out)
    }
}
