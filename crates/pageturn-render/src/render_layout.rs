use core::fmt;
use pageturn::{BlockRole, ContentBlock, StructuredChapter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::render_ir::{Color, Glyph, PaginationProfileId, RenderPage, TextLine};

/// Glyph width measurement backend.
///
/// Implementations must be pure: identical `(text, font_size)` inputs return
/// identical widths for the lifetime of a layout pass.
pub trait TextMeasurer: Send + Sync {
    /// Measure rendered text width at the given font size.
    fn measure_text(&self, text: &str, font_size: f32) -> f32;

    /// Measure a single character. Defaults to `measure_text`.
    fn measure_char(&self, ch: char, font_size: f32) -> f32 {
        let mut buf = [0u8; 4];
        self.measure_text(ch.encode_utf8(&mut buf), font_size)
    }

    /// Identity folded into the pagination profile so cached pages from a
    /// different measurer are never reused.
    fn profile_key(&self) -> String {
        core::any::type_name::<Self>().to_string()
    }
}

/// Width model based on per-glyph em classes.
///
/// CJK and other wide glyphs take one em; Latin glyphs use proportional
/// class widths.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeuristicMeasurer;

impl TextMeasurer for HeuristicMeasurer {
    fn measure_text(&self, text: &str, font_size: f32) -> f32 {
        text.chars()
            .map(|ch| glyph_em_width(ch) * font_size)
            .sum()
    }

    fn measure_char(&self, ch: char, font_size: f32) -> f32 {
        glyph_em_width(ch) * font_size
    }
}

/// Every glyph has the same advance regardless of font size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedAdvanceMeasurer {
    pub advance: f32,
}

impl FixedAdvanceMeasurer {
    pub fn new(advance: f32) -> Self {
        Self { advance }
    }
}

impl TextMeasurer for FixedAdvanceMeasurer {
    fn measure_text(&self, text: &str, _font_size: f32) -> f32 {
        text.chars().count() as f32 * self.advance
    }

    fn measure_char(&self, _ch: char, _font_size: f32) -> f32 {
        self.advance
    }

    fn profile_key(&self) -> String {
        format!("fixed-advance:{}", self.advance)
    }
}

/// Layout configuration for page construction.
///
/// All lengths are display pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Content box width.
    pub display_width: f32,
    /// Content box height.
    pub display_height: f32,
    pub padding_left: f32,
    pub padding_right: f32,
    pub padding_top: f32,
    pub padding_bottom: f32,
    pub title_font_size: f32,
    pub content_font_size: f32,
    /// Extra space after every glyph.
    pub char_spacing: f32,
    /// Extra space after every line.
    pub line_spacing: f32,
    /// Gap between a title block and what follows.
    pub title_gap: f32,
    /// Gap between paragraphs.
    pub paragraph_gap: f32,
    /// First-line paragraph indent.
    pub first_line_indent: f32,
    pub title_color: Color,
    pub content_color: Color,
}

impl LayoutConfig {
    /// Convenience for a display size with default typography.
    pub fn for_display(width: f32, height: f32) -> Self {
        Self {
            display_width: width,
            display_height: height,
            ..Self::default()
        }
    }

    /// Width available to a line.
    pub fn content_width(&self) -> f32 {
        self.display_width - self.padding_left - self.padding_right
    }

    /// Height available to lines on one page.
    pub fn content_height(&self) -> f32 {
        self.display_height - self.padding_top - self.padding_bottom
    }

    fn content_bottom(&self) -> f32 {
        self.display_height - self.padding_bottom
    }

    /// Fail if a single title or content line cannot fit on a page.
    pub fn validate(&self) -> Result<(), LayoutError> {
        let available = self.content_height();
        for (what, size) in [
            ("content font size", self.content_font_size),
            ("title font size", self.title_font_size),
        ] {
            if size > available {
                return Err(LayoutError::Infeasible {
                    what,
                    required: size,
                    available,
                });
            }
        }
        let width = self.content_width();
        if width <= 0.0 {
            return Err(LayoutError::Infeasible {
                what: "content width",
                required: 1.0,
                available: width,
            });
        }
        Ok(())
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            display_width: 1080.0,
            display_height: 2160.0,
            padding_left: 60.0,
            padding_right: 60.0,
            padding_top: 20.0,
            padding_bottom: 20.0,
            title_font_size: 72.0,
            content_font_size: 56.0,
            char_spacing: 0.0,
            line_spacing: 30.0,
            title_gap: 160.0,
            paragraph_gap: 50.0,
            first_line_indent: 112.0,
            title_color: Color::BLACK,
            content_color: Color::CHARCOAL,
        }
    }
}

/// Layout failure caused by configuration.
#[derive(Clone, Debug, PartialEq)]
pub enum LayoutError {
    /// A line of the given kind cannot fit in the content box.
    Infeasible {
        what: &'static str,
        required: f32,
        available: f32,
    },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infeasible {
                what,
                required,
                available,
            } => write!(
                f,
                "layout infeasible: {} needs {} but only {} is available",
                what, required, available
            ),
        }
    }
}

impl std::error::Error for LayoutError {}

/// Deterministic greedy line/page breaker.
#[derive(Clone)]
pub struct LayoutEngine {
    cfg: LayoutConfig,
    text_measurer: Arc<dyn TextMeasurer>,
}

impl fmt::Debug for LayoutEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutEngine")
            .field("cfg", &self.cfg)
            .field("text_measurer", &self.text_measurer.profile_key())
            .finish()
    }
}

impl LayoutEngine {
    /// Create a layout engine using [`HeuristicMeasurer`].
    pub fn new(cfg: LayoutConfig) -> Self {
        Self {
            cfg,
            text_measurer: Arc::new(HeuristicMeasurer),
        }
    }

    /// Install a shared text measurer.
    pub fn with_text_measurer(mut self, measurer: Arc<dyn TextMeasurer>) -> Self {
        self.text_measurer = measurer;
        self
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.cfg
    }

    pub fn text_measurer(&self) -> &Arc<dyn TextMeasurer> {
        &self.text_measurer
    }

    /// Stable fingerprint of config and measurer.
    pub fn pagination_profile_id(&self) -> PaginationProfileId {
        let payload = format!("{:?}|{}", self.cfg, self.text_measurer.profile_key());
        PaginationProfileId::from_bytes(payload.as_bytes())
    }

    /// Lay out a structured chapter into 1-indexed pages.
    ///
    /// A chapter without blocks yields exactly one empty page.
    pub fn layout(&self, chapter: &StructuredChapter) -> Result<Vec<RenderPage>, LayoutError> {
        self.layout_blocks(&chapter.blocks)
    }

    /// Lay out an ordered block sequence.
    pub fn layout_blocks(&self, blocks: &[ContentBlock]) -> Result<Vec<RenderPage>, LayoutError> {
        self.cfg.validate()?;
        let mut st = LayoutState::new(&self.cfg, self.text_measurer.as_ref());
        for block in blocks {
            match block.role {
                BlockRole::Title => st.place_block(
                    &block.text,
                    BlockStyle {
                        font_size: self.cfg.title_font_size,
                        first_line_indent: 0.0,
                        is_title: true,
                        color: self.cfg.title_color,
                        gap_after: self.cfg.title_gap,
                    },
                ),
                BlockRole::Paragraph => st.place_block(
                    &block.text,
                    BlockStyle {
                        font_size: self.cfg.content_font_size,
                        first_line_indent: self.cfg.first_line_indent,
                        is_title: false,
                        color: self.cfg.content_color,
                        gap_after: self.cfg.paragraph_gap,
                    },
                ),
            }
        }
        Ok(st.into_pages())
    }

    /// Break one block of text into unpositioned lines.
    ///
    /// The first line is `first_line_indent` narrower than the rest.
    pub fn break_lines(
        &self,
        text: &str,
        font_size: f32,
        first_line_indent: f32,
        is_title: bool,
    ) -> Vec<TextLine> {
        let color = if is_title {
            self.cfg.title_color
        } else {
            self.cfg.content_color
        };
        let mut st = LayoutState::new(&self.cfg, self.text_measurer.as_ref());
        st.break_lines(
            text,
            &BlockStyle {
                font_size,
                first_line_indent,
                is_title,
                color,
                gap_after: 0.0,
            },
        )
    }
}

struct BlockStyle {
    font_size: f32,
    first_line_indent: f32,
    is_title: bool,
    color: Color,
    gap_after: f32,
}

struct LayoutState<'a> {
    cfg: &'a LayoutConfig,
    measurer: &'a dyn TextMeasurer,
    advances: HashMap<(char, u32), f32>,
    page_no: usize,
    page: RenderPage,
    cursor_y: f32,
    emitted: Vec<RenderPage>,
}

impl<'a> LayoutState<'a> {
    fn new(cfg: &'a LayoutConfig, measurer: &'a dyn TextMeasurer) -> Self {
        Self {
            cfg,
            measurer,
            advances: HashMap::with_capacity(128),
            page_no: 1,
            page: RenderPage::new(1),
            cursor_y: cfg.padding_top,
            emitted: Vec::with_capacity(8),
        }
    }

    fn advance(&mut self, ch: char, font_size: f32) -> f32 {
        let measurer = self.measurer;
        *self
            .advances
            .entry((ch, font_size.to_bits()))
            .or_insert_with(|| measurer.measure_char(ch, font_size))
    }

    fn remaining_height(&self) -> f32 {
        self.cfg.content_bottom() - self.cursor_y
    }

    fn break_lines(&mut self, text: &str, style: &BlockStyle) -> Vec<TextLine> {
        let width = self.cfg.content_width();
        let spacing = self.cfg.char_spacing;
        let mut lines = Vec::with_capacity(8);
        let mut line = TextLine::new(style.font_size, style.is_title);
        let mut remaining = width - style.first_line_indent;
        for ch in text.chars() {
            let advance = self.advance(ch, style.font_size);
            if remaining < advance && !line.is_empty() {
                let full = core::mem::replace(&mut line, TextLine::new(style.font_size, style.is_title));
                lines.push(full);
                remaining = width;
            }
            remaining -= advance + spacing;
            line.glyphs.push(Glyph {
                ch,
                advance,
                color: style.color,
            });
        }
        if !line.is_empty() {
            lines.push(line);
        }
        lines
    }

    fn place_block(&mut self, text: &str, style: BlockStyle) {
        let lines = self.break_lines(text, &style);
        if lines.is_empty() {
            return;
        }
        for (idx, mut line) in lines.into_iter().enumerate() {
            if self.remaining_height() < style.font_size {
                self.start_next_page();
            }
            self.cursor_y += style.font_size;
            line.baseline_y = self.cursor_y;
            line.left_x = self.cfg.padding_left;
            if idx == 0 {
                line.left_x += style.first_line_indent;
            }
            self.page.push_line(line);
            self.cursor_y += self.cfg.line_spacing;
        }
        // The trailing line spacing already counts toward the block gap.
        self.cursor_y += (style.gap_after - self.cfg.line_spacing).max(0.0);
    }

    fn start_next_page(&mut self) {
        self.page_no += 1;
        let page = core::mem::replace(&mut self.page, RenderPage::new(self.page_no));
        self.emitted.push(page);
        self.cursor_y = self.cfg.padding_top;
    }

    fn into_pages(mut self) -> Vec<RenderPage> {
        self.emitted.push(self.page);
        self.emitted
    }
}

fn glyph_em_width(ch: char) -> f32 {
    if is_wide_glyph(ch) {
        return 1.0;
    }
    match ch {
        ' ' => 0.32,
        '\t' => 1.28,
        '\u{00A0}' => 0.32,
        'i' | 'l' | 'I' | '|' | '!' => 0.24,
        '.' | ',' | ':' | ';' | '\'' | '"' | '`' => 0.23,
        '-' | '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' => 0.34,
        '(' | ')' | '[' | ']' | '{' | '}' => 0.30,
        'f' | 't' | 'j' | 'r' => 0.34,
        'm' | 'w' | 'M' | 'W' | '@' | '%' | '&' | '#' => 0.74,
        c if c.is_ascii_digit() => 0.52,
        c if c.is_ascii_uppercase() => 0.64,
        c if c.is_ascii_lowercase() => 0.52,
        c if c.is_whitespace() => 0.32,
        c if c.is_ascii_punctuation() => 0.42,
        _ => 0.56,
    }
}

fn is_wide_glyph(ch: char) -> bool {
    matches!(
        ch as u32,
        0x1100..=0x115F
            | 0x2E80..=0x303E
            | 0x3041..=0x33FF
            | 0x3400..=0x4DBF
            | 0x4E00..=0x9FFF
            | 0xA000..=0xA4CF
            | 0xAC00..=0xD7A3
            | 0xF900..=0xFAFF
            | 0xFE30..=0xFE4F
            | 0xFF00..=0xFF60
            | 0xFFE0..=0xFFE6
            | 0x20000..=0x3FFFD
    )
}
