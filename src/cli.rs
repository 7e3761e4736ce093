use clap::{Parser, Subcommand};
use inkfetch::locator::ChapterSelection;
use inkfetch::model::DownloadFormat;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "inkfetch")]
#[command(about = "Download illustrated works chapter by chapter", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: config/inkfetch.toml or $INKFETCH_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show a work and its chapter list
    Fetch(FetchArgs),
    /// Download chapters of a work
    Download(DownloadArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    /// Work manifest: a JSON file path or an http(s) URL
    pub manifest: String,
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    /// Work manifest: a JSON file path or an http(s) URL
    pub manifest: String,

    /// Chapters to download: `all`, `5`, `1-10` or a comma-separated mix
    #[arg(short = 'c', long, default_value = "all")]
    pub chapters: ChapterSelection,

    /// Output format: images, pdf or cbz
    #[arg(short, long)]
    pub format: Option<DownloadFormat>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Chapters downloaded at the same time
    #[arg(long)]
    pub max_chapters: Option<usize>,

    /// Pages fetched at the same time within one chapter
    #[arg(long)]
    pub max_images: Option<usize>,

    /// Delete page images after packaging into pdf/cbz
    #[arg(long)]
    pub discard_images: bool,

    /// Enable log output on stderr
    #[arg(short, long)]
    pub verbose: bool,
}
