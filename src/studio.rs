//! Offline authoring commands: the same generation and rendering steps the
//! server runs, driven from files on disk.

use std::path::Path;

use anyhow::Context as _;

use crate::app::library::{self, StoryForm};
use crate::app::publish::{self, DraftingBook};
use crate::cli::{DraftArgs, IllustrateArgs, PlotArgs, RenderArgs};
use crate::config::AppConfig;
use crate::model::{BookRequest, BookStatus, Character, Page, preset_characters};
use crate::pdf;

pub async fn plot(args: PlotArgs) -> anyhow::Result<()> {
    let genai = AppConfig::from_env()?.genai_client()?;
    let form = StoryForm {
        character: Some(character_named(&args.character)),
        title: args.title,
        synopsis: args.notes,
    };
    match library::suggest_plot(&genai, &form).await? {
        Some(synopsis) => println!("{}", synopsis.trim()),
        None => anyhow::bail!("no synopsis returned"),
    }
    Ok(())
}

pub async fn draft(args: DraftArgs) -> anyhow::Result<()> {
    let genai = AppConfig::from_env()?.genai_client()?;
    let request = scratch_request(&args.character, args.synopsis);
    let drafted = publish::start_drafting(&genai, &request).await?;
    write_pages(Path::new(&args.out), &drafted.pages)?;
    tracing::info!(out = %args.out, pages = drafted.pages.len(), "draft written");
    Ok(())
}

pub async fn illustrate(args: IllustrateArgs) -> anyhow::Result<()> {
    let idx = args
        .page
        .checked_sub(1)
        .context("page numbers start at 1")?;
    let pages_path = Path::new(&args.pages);
    let pages = read_pages(pages_path)?;
    anyhow::ensure!(
        idx < pages.len(),
        "page {} is out of range (book has {} pages)",
        args.page,
        pages.len()
    );

    let genai = AppConfig::from_env()?.genai_client()?;
    let mut drafting = DraftingBook::resume(scratch_request(&args.character, String::new()), pages)?;
    if !publish::illustrate_page(&genai, &mut drafting, idx).await {
        anyhow::bail!("no image generated for page {}", args.page);
    }
    write_pages(pages_path, &drafting.pages)?;
    tracing::info!(pages = %args.pages, page = args.page, "page illustrated");
    Ok(())
}

pub async fn render(args: RenderArgs) -> anyhow::Result<()> {
    let pages = read_pages(Path::new(&args.pages))?;
    let (title, author) = (args.title.clone(), args.author.clone());
    let artifact = tokio::task::spawn_blocking(move || pdf::render_book(&title, &author, &pages))
        .await
        .context("join render task")??;

    let out_dir = Path::new(&args.out);
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("create output dir: {}", out_dir.display()))?;
    let out = out_dir.join(&artifact.filename);
    std::fs::write(&out, &artifact.bytes)
        .with_context(|| format!("write pdf: {}", out.display()))?;
    println!("{}", out.display());
    Ok(())
}

/// Presets match by id or name; anything else becomes an unsaved custom hero.
pub fn character_named(name: &str) -> Character {
    let name = name.trim();
    preset_characters()
        .into_iter()
        .find(|c| c.id.eq_ignore_ascii_case(name) || c.name.eq_ignore_ascii_case(name))
        .unwrap_or_else(|| Character {
            id: String::new(),
            name: name.to_string(),
            icon: library::CUSTOM_CHARACTER_ICON.to_string(),
            image_url: None,
            color: None,
            is_preset: false,
            created_at: None,
        })
}

fn scratch_request(character: &str, synopsis: String) -> BookRequest {
    BookRequest {
        id: "local".to_string(),
        author_name: String::new(),
        user_id: None,
        character: Some(character_named(character)),
        title: String::new(),
        synopsis,
        pages: Vec::new(),
        status: BookStatus::Pending,
        created_at: None,
        published_at: None,
    }
}

fn read_pages(path: &Path) -> anyhow::Result<Vec<Page>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read pages: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse pages: {}", path.display()))
}

fn write_pages(path: &Path, pages: &[Page]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create pages dir: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(pages).context("serialize pages")?;
    std::fs::write(path, json).with_context(|| format!("write pages: {}", path.display()))
}
