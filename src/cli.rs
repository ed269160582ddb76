use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Expand a title and notes into a short synopsis.
    Plot(PlotArgs),
    /// Draft the pages of a story as JSON.
    Draft(DraftArgs),
    /// Generate a picture for one page of a pages file.
    Illustrate(IllustrateArgs),
    /// Render a pages file to PDF.
    Render(RenderArgs),
}

#[derive(Debug, Args)]
pub struct PlotArgs {
    /// Book title.
    #[arg(long)]
    pub title: String,

    /// Hero of the story (display name).
    #[arg(long)]
    pub character: String,

    /// Author's notes to expand.
    #[arg(long, default_value = "")]
    pub notes: String,
}

#[derive(Debug, Args)]
pub struct DraftArgs {
    /// Hero of the story (display name).
    #[arg(long)]
    pub character: String,

    /// Synopsis to turn into pages.
    #[arg(long)]
    pub synopsis: String,

    /// Output file path for the pages JSON.
    #[arg(long)]
    pub out: String,
}

#[derive(Debug, Args)]
pub struct IllustrateArgs {
    /// Pages JSON file (created by `draft`); updated in place.
    #[arg(long)]
    pub pages: String,

    /// Hero of the story (display name).
    #[arg(long)]
    pub character: String,

    /// 1-based page number to illustrate.
    #[arg(long)]
    pub page: usize,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Pages JSON file.
    #[arg(long)]
    pub pages: String,

    /// Book title (also names the PDF).
    #[arg(long)]
    pub title: String,

    /// Author name printed under the title.
    #[arg(long)]
    pub author: String,

    /// Output directory for the PDF.
    #[arg(long)]
    pub out: String,
}
