mod cli;

use std::fs;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use pageturn::{Book, DefaultContentParser, DirectoryLoader, Loader, SimpleTextLoader};
use pageturn_render::{
    ChapterState, FileRenderCacheStore, LayoutConfig, LayoutEngine, ReadingSession, RenderPage,
    SessionOptions,
};
use serde::Serialize;

use crate::cli::Cli;

#[derive(Serialize)]
struct PageOutput<'a> {
    chapter: usize,
    title: Option<&'a str>,
    page_count: usize,
    page: &'a RenderPage,
}

#[derive(Serialize)]
struct TocEntry<'a> {
    chapter: usize,
    volume: Option<&'a str>,
    title: Option<&'a str>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    run(&cli)
}

fn run(cli: &Cli) -> Result<()> {
    let session = open_session(cli)?;
    let book = session.init_table_of_contents()?;
    if cli.toc {
        return print_toc(&book, cli.json);
    }

    let chapter = cli.chapter;
    let title = book.resolve(chapter)?.title();
    session.set_cursor(chapter, 1)?;
    let options = session.options();
    let report = session.preload(chapter, options.preload_before, options.preload_behind)?;
    if !report.succeeded() {
        log::warn!("{} chapters failed to preload", report.failures);
    }
    if session.state(chapter)? != ChapterState::Paginated {
        bail!("chapter {} could not be loaded", chapter);
    }
    session.set_cursor(chapter, cli.page)?;

    let pages = if cli.all {
        session
            .laid_out_chapter(chapter)?
            .map(|laid_out| laid_out.pages.clone())
            .unwrap_or_default()
    } else {
        vec![session.current_page()?]
    };
    let page_count = session.page_count(chapter)?.unwrap_or(pages.len());

    for page in &pages {
        if cli.json {
            let out = PageOutput {
                chapter,
                title,
                page_count,
                page,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            println!(
                "== {} [{}/{}] ==",
                title.unwrap_or("Untitled"),
                page.page_number,
                page_count
            );
            println!("{}", page.text());
        }
    }
    Ok(())
}

fn open_session(cli: &Cli) -> Result<ReadingSession> {
    let mut cfg = match &cli.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading layout config {}", path.display()))?;
            serde_json::from_str::<LayoutConfig>(&raw)
                .with_context(|| format!("parsing layout config {}", path.display()))?
        }
        None => LayoutConfig::default(),
    };
    if let Some(width) = cli.width {
        cfg.display_width = width;
    }
    if let Some(height) = cli.height {
        cfg.display_height = height;
    }
    cfg.validate()?;

    let loader: Arc<dyn Loader> = if cli.input.is_dir() {
        Arc::new(DirectoryLoader::new(&cli.input))
    } else {
        let text = fs::read_to_string(&cli.input)
            .with_context(|| format!("reading {}", cli.input.display()))?;
        Arc::new(SimpleTextLoader::new(text))
    };

    let session = ReadingSession::new(
        loader,
        Arc::new(DefaultContentParser),
        LayoutEngine::new(cfg),
        SessionOptions::default(),
    );
    Ok(match &cli.cache_dir {
        Some(dir) => session.with_cache_store(Arc::new(FileRenderCacheStore::new(dir))),
        None => session,
    })
}

fn print_toc(book: &Book, json: bool) -> Result<()> {
    let entries: Vec<TocEntry<'_>> = book
        .chapters()
        .map(|chapter| {
            let volume = book
                .volume_of(chapter.index())
                .ok()
                .flatten()
                .map(|volume| volume.title());
            TocEntry {
                chapter: chapter.index(),
                volume,
                title: chapter.title(),
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    println!("{} ({} chapters)", book.title(), book.chapter_count());
    let mut current_volume = None;
    for entry in &entries {
        if entry.volume.is_some() && entry.volume != current_volume {
            println!("{}", entry.volume.unwrap_or_default());
            current_volume = entry.volume;
        }
        let indent = if entry.volume.is_some() { "  " } else { "" };
        println!(
            "{}{:>4}  {}",
            indent,
            entry.chapter,
            entry.title.unwrap_or("Untitled")
        );
    }
    Ok(())
}
