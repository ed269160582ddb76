use chrono::Utc;
use serde::Deserialize;

use crate::app::notice::Notice;
use crate::genai::GenAiClient;
use crate::model::{BookRequest, BookStatus, Page, encode_pages, status_value};
use crate::pdf::{self, BookArtifact};
use crate::store::{CollectionPath, DocumentStore, Fields};

/// A request being turned into a book. Pages live here until publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftingBook {
    pub request: BookRequest,
    pub pages: Vec<Page>,
}

impl DraftingBook {
    /// Reopens a pending request with pages supplied by the editor.
    pub fn resume(request: BookRequest, pages: Vec<Page>) -> Result<Self, Notice> {
        if request.is_ready() {
            return Err(Notice::AlreadyPublished);
        }
        Ok(Self { request, pages })
    }

    pub fn set_page_text(&mut self, idx: usize, text: impl Into<String>) -> bool {
        match self.pages.get_mut(idx) {
            Some(page) => {
                page.text = text.into();
                true
            }
            None => false,
        }
    }

    /// Replaces the picture with an upload or a generated image.
    pub fn set_page_image(&mut self, idx: usize, image_url: Option<String>) -> bool {
        match self.pages.get_mut(idx) {
            Some(page) => {
                page.image_url = image_url;
                true
            }
            None => false,
        }
    }

    pub fn add_page(&mut self) -> usize {
        self.pages.push(Page::default());
        self.pages.len() - 1
    }

    pub fn remove_page(&mut self, idx: usize) -> Option<Page> {
        (idx < self.pages.len()).then(|| self.pages.remove(idx))
    }
}

pub fn draft_prompt(character_name: &str, synopsis: &str) -> String {
    format!(
        "Story for {character_name}: \"{synopsis}\". Return JSON: [{{\"text\": \"sentence\"}}]. 4 pages."
    )
}

/// Pages come back text only; pictures are added while editing.
pub fn parse_draft_pages(raw: &str) -> anyhow::Result<Vec<Page>> {
    #[derive(Deserialize)]
    struct DraftPage {
        text: String,
    }

    let drafted: Vec<DraftPage> = serde_json::from_str(raw.trim())?;
    Ok(drafted
        .into_iter()
        .map(|p| Page {
            text: p.text,
            image_url: None,
        })
        .collect())
}

/// Asks the text model for the pages of a pending request.
pub async fn start_drafting(
    genai: &GenAiClient,
    request: &BookRequest,
) -> Result<DraftingBook, Notice> {
    if request.is_ready() {
        return Err(Notice::AlreadyPublished);
    }
    let prompt = draft_prompt(request.character_name(), &request.synopsis);

    let raw = match genai.generate_json_text(&prompt).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            tracing::warn!(request_id = %request.id, "draft response had no text");
            return Err(Notice::DraftingFailed);
        }
        Err(err) => {
            tracing::error!(request_id = %request.id, error = %format!("{err:#}"), "drafting failed");
            return Err(Notice::DraftingFailed);
        }
    };
    let pages = parse_draft_pages(&raw).map_err(|err| {
        tracing::warn!(request_id = %request.id, error = %err, "draft is not a page list");
        Notice::DraftingFailed
    })?;

    tracing::info!(request_id = %request.id, pages = pages.len(), "draft ready");
    Ok(DraftingBook {
        request: request.clone(),
        pages,
    })
}

pub fn illustration_prompt(character_name: &str, scene: &str) -> String {
    format!("Children's book art for {character_name}. Scene: {scene}. Whimsical, soft colors, no text.")
}

/// Generates a picture for one page. The page is left untouched when no
/// image comes back.
pub async fn illustrate_page(genai: &GenAiClient, draft: &mut DraftingBook, idx: usize) -> bool {
    let Some(page) = draft.pages.get(idx) else {
        return false;
    };
    let prompt = illustration_prompt(draft.request.character_name(), &page.text);

    match genai.generate_image(&prompt).await {
        Ok(Some(image)) => draft.set_page_image(idx, Some(image)),
        Ok(None) => {
            tracing::warn!(request_id = %draft.request.id, page = idx + 1, "no image returned");
            false
        }
        Err(err) => {
            tracing::error!(
                request_id = %draft.request.id,
                page = idx + 1,
                error = %format!("{err:#}"),
                "illustration failed"
            );
            false
        }
    }
}

#[derive(Debug, Clone)]
pub enum PublishOutcome {
    /// Stored in the gallery. `artifact` is `None` only when rendering failed.
    Published { artifact: Option<BookArtifact> },
    /// The write was refused for size; the artifact is still produced.
    PartiallyPublished {
        notice: Notice,
        artifact: Option<BookArtifact>,
    },
    Failed { notice: Notice },
}

impl PublishOutcome {
    pub fn notice(&self) -> Option<Notice> {
        match self {
            Self::Published { .. } => None,
            Self::PartiallyPublished { notice, .. } | Self::Failed { notice } => Some(*notice),
        }
    }

    pub fn artifact(&self) -> Option<&BookArtifact> {
        match self {
            Self::Published { artifact } | Self::PartiallyPublished { artifact, .. } => {
                artifact.as_ref()
            }
            Self::Failed { .. } => None,
        }
    }
}

/// Marks the request ready with its final pages in a single write, then
/// renders the book.
pub async fn publish(store: &dyn DocumentStore, draft: &DraftingBook) -> PublishOutcome {
    if draft.pages.is_empty() {
        return PublishOutcome::Failed {
            notice: Notice::NothingToPublish,
        };
    }

    let mut fields = Fields::new();
    fields.insert("status".into(), status_value(BookStatus::Ready));
    fields.insert("pages".into(), encode_pages(&draft.pages).into());
    fields.insert("publishedAt".into(), Utc::now().to_rfc3339().into());

    let request_id = draft.request.id.as_str();
    match store
        .update(&CollectionPath::book_requests(), request_id, fields)
        .await
    {
        Ok(()) => {
            tracing::info!(request_id, pages = draft.pages.len(), "book published");
            PublishOutcome::Published {
                artifact: render_artifact(draft).await,
            }
        }
        Err(err) if err.is_size_limit() => {
            tracing::warn!(request_id, error = %err, "book too large for the gallery");
            PublishOutcome::PartiallyPublished {
                notice: Notice::TooLargeForGallery,
                artifact: render_artifact(draft).await,
            }
        }
        Err(err) => {
            tracing::error!(request_id, error = %err, "publish failed");
            PublishOutcome::Failed {
                notice: Notice::PublishFailed,
            }
        }
    }
}

/// Rendering failures are logged and yield no artifact.
pub async fn render_artifact(draft: &DraftingBook) -> Option<BookArtifact> {
    let title = draft.request.title.clone();
    let author = draft.request.author_name.clone();
    let pages = draft.pages.clone();
    let rendered =
        tokio::task::spawn_blocking(move || pdf::render_book(&title, &author, &pages)).await;
    match rendered {
        Ok(Ok(artifact)) => Some(artifact),
        Ok(Err(err)) => {
            tracing::error!(request_id = %draft.request.id, error = %format!("{err:#}"), "render pdf failed");
            None
        }
        Err(err) => {
            tracing::error!(request_id = %draft.request.id, error = %err, "render task failed");
            None
        }
    }
}
