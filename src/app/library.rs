use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::app::notice::Notice;
use crate::genai::GenAiClient;
use crate::identity::Identity;
use crate::model::{AuthorId, BookRequest, BookStatus, Character};
use crate::store::{CollectionPath, DocumentStore};

pub const PLOT_INSTRUCTION: &str = "You are Meera. You strictly follow and expand author's notes.";
pub const CUSTOM_CHARACTER_ICON: &str = "🎨";

/// What an author fills in before sending a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryForm {
    #[serde(default)]
    pub character: Option<Character>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub synopsis: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCharacter {
    #[serde(default)]
    pub name: String,
    /// Uploaded picture as a data URI.
    #[serde(default)]
    pub image: Option<String>,
}

/// Stores a new pending request with an empty page list and returns its id.
pub async fn submit_request(
    store: &dyn DocumentStore,
    identity: &Identity,
    author_name: &str,
    form: StoryForm,
) -> Result<String, Notice> {
    let author_name = author_name.trim();
    if author_name.is_empty() {
        return Err(Notice::NotSignedIn);
    }
    let title = form.title.trim();
    if title.is_empty() || form.character.is_none() {
        return Err(Notice::MissingStoryDetails);
    }

    let request = BookRequest {
        id: String::new(),
        author_name: author_name.to_string(),
        user_id: Some(identity.uid().to_string()),
        character: form.character,
        title: title.to_string(),
        synopsis: form.synopsis,
        pages: Vec::new(),
        status: BookStatus::Pending,
        created_at: Some(Utc::now()),
        published_at: None,
    };

    match store
        .add(&CollectionPath::book_requests(), request.to_fields())
        .await
    {
        Ok(id) => {
            tracing::info!(request_id = %id, author = author_name, "book request sent");
            Ok(id)
        }
        Err(err) => {
            tracing::error!(author = author_name, error = %err, "send book request failed");
            Err(Notice::RequestNotSent)
        }
    }
}

pub fn plot_prompt(title: &str, character_name: &str, notes: &str) -> String {
    let notes = notes.trim();
    let notes = if notes.is_empty() { "None" } else { notes };
    format!(
        "BOOK TITLE: \"{title}\", CHARACTER: {character_name}, NOTES: \"{notes}\". \
Expand into 3 whimsical story sentences. USE THE AUTHOR'S NOTES."
    )
}

/// Expands the author's notes into a short synopsis. `Ok(None)` keeps the
/// current synopsis.
pub async fn suggest_plot(genai: &GenAiClient, form: &StoryForm) -> Result<Option<String>, Notice> {
    if form.title.trim().is_empty() {
        return Err(Notice::MissingStoryDetails);
    }
    let character_name = form
        .character
        .as_ref()
        .map(|c| c.name.as_str())
        .unwrap_or("a mystery friend");
    let prompt = plot_prompt(form.title.trim(), character_name, &form.synopsis);

    genai
        .generate_text(&prompt, PLOT_INSTRUCTION)
        .await
        .map_err(|err| {
            tracing::error!(error = %format!("{err:#}"), "plot suggestion failed");
            Notice::QuillRanDry
        })
}

pub async fn save_character(
    store: &dyn DocumentStore,
    author: &AuthorId,
    new: NewCharacter,
) -> Result<String, Notice> {
    let name = new.name.trim();
    let Some(image) = new.image.filter(|image| !image.trim().is_empty()) else {
        return Err(Notice::CharacterIncomplete);
    };
    if name.is_empty() {
        return Err(Notice::CharacterIncomplete);
    }

    let character = Character {
        id: String::new(),
        name: name.to_string(),
        icon: CUSTOM_CHARACTER_ICON.to_string(),
        image_url: Some(image),
        color: None,
        is_preset: false,
        created_at: Some(Utc::now()),
    };
    store
        .add(&CollectionPath::characters(author), character.to_fields())
        .await
        .map_err(|err| {
            tracing::error!(%author, error = %err, "save character failed");
            Notice::CharacterNotSaved
        })
}

pub async fn delete_character(
    store: &dyn DocumentStore,
    author: &AuthorId,
    character_id: &str,
) -> Result<(), Notice> {
    store
        .delete(&CollectionPath::characters(author), character_id)
        .await
        .map_err(|err| {
            tracing::error!(%author, character_id, error = %err, "delete character failed");
            Notice::CharacterNotDeleted
        })
}
