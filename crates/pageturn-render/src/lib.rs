//! Page layout and reading-session orchestration for `pageturn`.

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

mod preload_worker;
mod render_engine;
mod render_ir;
mod render_layout;

pub use pageturn::BlockRole;
pub use preload_worker::{Completion, PreloadWorker};
pub use render_engine::{
    Advance, ChapterState, Cursor, Direction, FileRenderCacheStore, PageCacheKey, PreloadReport,
    ReadingSession, RenderCacheStore, RenderDiagnostic, RenderEngineError, SessionOptions,
};
pub use render_ir::{
    Color, ContentDigest, Glyph, LaidOutChapter, PaginationProfileId, RenderPage, TextLine,
};
pub use render_layout::{
    FixedAdvanceMeasurer, HeuristicMeasurer, LayoutConfig, LayoutEngine, LayoutError,
    TextMeasurer,
};
