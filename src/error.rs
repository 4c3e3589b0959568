//! Error types shared by the book model, loaders, and parsers.

use core::fmt;

/// What kind of number an [`BookError::IndexOutOfRange`] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Global (book-wide) chapter number.
    Chapter,
    /// Chapter number local to one volume.
    LocalChapter,
    /// Volume number.
    Volume,
    /// Page number within a chapter.
    Page,
}

impl IndexKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chapter => "chapter",
            Self::LocalChapter => "local chapter",
            Self::Volume => "volume",
            Self::Page => "page",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content retrieval failure reported by a [`Loader`](crate::Loader).
///
/// Fetch failures are transient: the chapter stays unloaded and the fetch can
/// be retried.
#[derive(Debug)]
pub struct FetchError {
    /// Global chapter number that failed to load; `0` for the table of contents.
    pub chapter: usize,
    /// Human-readable reason.
    pub message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl FetchError {
    /// Create a fetch error without an underlying cause.
    pub fn new(chapter: usize, message: impl Into<String>) -> Self {
        Self {
            chapter,
            message: message.into(),
            source: None,
        }
    }

    /// Failure while building the table of contents.
    pub fn table_of_contents(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    /// Attach the underlying I/O or transport error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Copy handed to callers that waited on the same failed fetch. The
    /// source chain is folded into the message.
    pub fn detached(&self) -> Self {
        let message = match &self.source {
            Some(source) => format!("{} ({})", self.message, source),
            None => self.message.clone(),
        };
        Self::new(self.chapter, message)
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.chapter == 0 {
            write!(f, "table of contents fetch failed: {}", self.message)?;
        } else {
            write!(f, "fetch failed for chapter {}: {}", self.chapter, self.message)?;
        }
        if let Some(source) = &self.source {
            write!(f, " ({})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

/// Failure turning chapter content into blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Parser was handed a chapter whose content was never fetched.
    ContentMissing { chapter: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentMissing { chapter } => {
                write!(f, "chapter {} has no content to parse", chapter)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Book model error.
#[derive(Debug)]
pub enum BookError {
    /// A chapter, volume, or page number outside its valid bounds.
    IndexOutOfRange {
        kind: IndexKind,
        index: usize,
        len: usize,
    },
    /// A child of the wrong kind, or a child that would break contiguous
    /// chapter numbering.
    InvalidStructure { reason: &'static str },
    /// Content retrieval failed.
    Fetch(FetchError),
    /// Content parsing failed.
    Parse(ParseError),
}

impl BookError {
    pub(crate) fn out_of_range(kind: IndexKind, index: usize, len: usize) -> Self {
        Self::IndexOutOfRange { kind, index, len }
    }

    /// True for errors that a retry may fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }
}

impl fmt::Display for BookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexOutOfRange { kind, index, len } => {
                write!(f, "{} {} out of range (valid: 1..={})", kind, index, len)
            }
            Self::InvalidStructure { reason } => write!(f, "invalid book structure: {}", reason),
            Self::Fetch(err) => write!(f, "{}", err),
            Self::Parse(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for BookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fetch(err) => Some(err),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FetchError> for BookError {
    fn from(value: FetchError) -> Self {
        Self::Fetch(value)
    }
}

impl From<ParseError> for BookError {
    fn from(value: ParseError) -> Self {
        Self::Parse(value)
    }
}
