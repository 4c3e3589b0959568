use core::fmt;
use pageturn::{BlockRole, ContentBlock};
use serde::{Deserialize, Serialize};

/// Packed `0xAARRGGBB` glyph color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub u32);

impl Color {
    pub const BLACK: Self = Self(0xFF00_0000);
    /// Default body text color, a soft near-black.
    pub const CHARCOAL: Self = Self(0xFF2B_2B2B);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self(0xFF00_0000 | ((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    /// Parse `#RRGGBB` or `#AARRGGBB`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        let value = u32::from_str_radix(digits, 16).ok()?;
        match digits.len() {
            6 => Some(Self(0xFF00_0000 | value)),
            8 => Some(Self(value)),
            _ => None,
        }
    }

    pub fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08X}", self.0)
    }
}

/// One positioned character.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Glyph {
    pub ch: char,
    /// Measured horizontal advance, excluding character spacing.
    pub advance: f32,
    pub color: Color,
}

/// A laid-out line of glyphs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    /// Baseline y coordinate on the display.
    pub baseline_y: f32,
    /// Left x coordinate of the first glyph.
    pub left_x: f32,
    /// Title lines are drawn with the title style.
    pub is_title: bool,
    pub font_size: f32,
    pub glyphs: Vec<Glyph>,
}

impl TextLine {
    pub fn new(font_size: f32, is_title: bool) -> Self {
        Self {
            font_size,
            is_title,
            glyphs: Vec::with_capacity(32),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// Plain text of the line.
    pub fn text(&self) -> String {
        self.glyphs.iter().map(|glyph| glyph.ch).collect()
    }

    /// Horizontal extent with `char_spacing` between glyphs.
    pub fn width(&self, char_spacing: f32) -> f32 {
        let advances: f32 = self.glyphs.iter().map(|glyph| glyph.advance).sum();
        let gaps = self.glyphs.len().saturating_sub(1) as f32;
        advances + gaps * char_spacing
    }

    /// Glyphs paired with their x position, for rendering sinks.
    pub fn positioned_glyphs(&self, char_spacing: f32) -> impl Iterator<Item = (f32, &Glyph)> + '_ {
        let mut x = self.left_x;
        self.glyphs.iter().map(move |glyph| {
            let at = x;
            x += glyph.advance + char_spacing;
            (at, glyph)
        })
    }
}

/// One display page of a chapter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderPage {
    /// 1-based page number within the chapter.
    pub page_number: usize,
    pub lines: Vec<TextLine>,
}

impl RenderPage {
    /// Create an empty page.
    pub fn new(page_number: usize) -> Self {
        Self {
            page_number,
            // Keep empty trailing pages allocation-free.
            lines: Vec::with_capacity(0),
        }
    }

    pub fn push_line(&mut self, line: TextLine) {
        if self.lines.capacity() == 0 {
            self.lines.reserve(16);
        }
        self.lines.push(line);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Page text with one line per laid-out line.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for (idx, line) in self.lines.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            out.push_str(&line.text());
        }
        out
    }
}

/// A chapter's blocks and, once paginated, its pages.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LaidOutChapter {
    pub chapter_index: usize,
    pub blocks: Vec<ContentBlock>,
    pub pages: Vec<RenderPage>,
}

impl LaidOutChapter {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// 1-based page lookup.
    pub fn page(&self, page_number: usize) -> Option<&RenderPage> {
        page_number
            .checked_sub(1)
            .and_then(|idx| self.pages.get(idx))
    }
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;

fn fnv64(seed: u64, payload: &[u8]) -> u64 {
    let mut hash = seed;
    for b in payload {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Stable fingerprint of every layout-affecting setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PaginationProfileId(pub [u8; 32]);

impl PaginationProfileId {
    /// Build a deterministic profile id from arbitrary payload bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut out = [0u8; 32];
        let seeds = [
            FNV_OFFSET,
            0x9e3779b97f4a7c15,
            0xd6e8feb86659fd93,
            0xa0761d6478bd642f,
        ];
        for (chunk, seed) in out.chunks_exact_mut(8).zip(seeds) {
            chunk.copy_from_slice(&fnv64(seed, bytes).to_le_bytes());
        }
        Self(out)
    }

    /// Lowercase hex form, used for cache directory names.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in self.0 {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

/// Fingerprint of a chapter's parsed blocks.
///
/// Pages laid out from one block sequence are only valid for that sequence,
/// so persisted pages are keyed by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(pub u64);

impl ContentDigest {
    pub fn of_blocks(blocks: &[ContentBlock]) -> Self {
        let mut hash = FNV_OFFSET;
        for block in blocks {
            let role = match block.role {
                BlockRole::Title => b'T',
                BlockRole::Paragraph => b'P',
            };
            hash = fnv64(hash, &[role]);
            hash = fnv64(hash, &(block.text.len() as u64).to_le_bytes());
            hash = fnv64(hash, block.text.as_bytes());
        }
        Self(hash)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
