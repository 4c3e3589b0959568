use clap::Parser;
use std::path::PathBuf;

/// Paginate a plain-text book and print pages
#[derive(Parser, Debug)]
#[command(name = "pageturn", version, about)]
pub struct Cli {
    /// A `.txt` file, or a directory of chapter files (subdirectories become volumes)
    pub input: PathBuf,

    /// Global chapter number, starting at 1
    #[arg(short, long, default_value_t = 1)]
    pub chapter: usize,

    /// Page within the chapter, starting at 1
    #[arg(short, long, default_value_t = 1)]
    pub page: usize,

    /// Display width in pixels (overrides the config file)
    #[arg(long)]
    pub width: Option<f32>,

    /// Display height in pixels (overrides the config file)
    #[arg(long)]
    pub height: Option<f32>,

    /// JSON layout configuration; missing fields use defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for persisted page caches
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Print every page of the chapter instead of one
    #[arg(short, long, default_value_t = false)]
    pub all: bool,

    /// Print the table of contents and exit
    #[arg(long, default_value_t = false)]
    pub toc: bool,

    /// Emit JSON instead of plain text
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
