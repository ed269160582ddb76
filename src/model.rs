use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{Document, Fields};

/// Stable account key derived from a display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(String);

impl AuthorId {
    /// Trims, lowercases and collapses every whitespace run to a single `-`.
    pub fn from_display_name(display_name: &str) -> Self {
        let lowered = display_name.trim().to_lowercase();
        Self(lowered.split_whitespace().collect::<Vec<_>>().join("-"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    #[default]
    Pending,
    Ready,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub text: String,
    /// Data URI or external URL.
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub is_preset: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Character {
    fn preset(id: &str, name: &str, icon: &str, color: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            icon: icon.to_string(),
            image_url: None,
            color: Some(color.to_string()),
            is_preset: true,
            created_at: None,
        }
    }

    pub fn from_document(doc: &Document) -> Option<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Stored {
            #[serde(default)]
            name: String,
            #[serde(default)]
            icon: String,
            #[serde(default)]
            image_url: Option<String>,
            #[serde(default)]
            created_at: Option<DateTime<Utc>>,
        }

        let stored: Stored = decode_fields(doc)?;
        Some(Self {
            id: doc.id.clone(),
            name: stored.name,
            icon: stored.icon,
            image_url: stored.image_url,
            color: None,
            is_preset: false,
            created_at: stored.created_at,
        })
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("name".into(), self.name.clone().into());
        fields.insert("icon".into(), self.icon.clone().into());
        if let Some(image_url) = &self.image_url {
            fields.insert("imageUrl".into(), image_url.clone().into());
        }
        if let Some(created_at) = self.created_at {
            fields.insert("createdAt".into(), created_at.to_rfc3339().into());
        }
        fields
    }
}

/// The bundled heroes every author can pick.
pub fn preset_characters() -> Vec<Character> {
    vec![
        Character::preset("nessie", "Nessie the Friendly Monster", "🦕", "bg-emerald-100"),
        Character::preset("bigfoot", "Barnaby Bigfoot", "👣", "bg-orange-100"),
        Character::preset("dragon", "Sparkle the Dragon", "🐲", "bg-purple-100"),
        Character::preset("unicorn", "Crystal Unicorn", "🦄", "bg-pink-100"),
        Character::preset("owl", "Ollie the Wise Owl", "🦉", "bg-amber-100"),
        Character::preset("mothman", "Mothie the Night Moth", "🦋", "bg-indigo-100"),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: AuthorId,
    pub display_name: String,
    pub magic_word: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Author {
    pub fn from_document(doc: &Document) -> Option<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Stored {
            #[serde(default)]
            display_name: String,
            #[serde(default)]
            magic_word: String,
            #[serde(default)]
            created_at: Option<DateTime<Utc>>,
        }

        let stored: Stored = decode_fields(doc)?;
        Some(Self {
            id: AuthorId(doc.id.clone()),
            display_name: stored.display_name,
            magic_word: stored.magic_word,
            created_at: stored.created_at,
        })
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("displayName".into(), self.display_name.clone().into());
        fields.insert("magicWord".into(), self.magic_word.clone().into());
        if let Some(created_at) = self.created_at {
            fields.insert("createdAt".into(), created_at.to_rfc3339().into());
        }
        fields
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookRequest {
    pub id: String,
    pub author_name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub character: Option<Character>,
    pub title: String,
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub pages: Vec<Page>,
    pub status: BookStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl BookRequest {
    /// Rebuilds a request from its flat stored form. The `pages` and
    /// `character` blobs never cause the record to be dropped: an unreadable
    /// blob becomes an empty page list or no character.
    pub fn from_document(doc: &Document) -> Option<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Stored {
            #[serde(default)]
            author_name: String,
            #[serde(default)]
            user_id: Option<String>,
            #[serde(default)]
            character: Option<serde_json::Value>,
            #[serde(default)]
            title: String,
            #[serde(default)]
            synopsis: String,
            #[serde(default)]
            pages: Option<serde_json::Value>,
            #[serde(default)]
            status: BookStatus,
            #[serde(default)]
            created_at: Option<DateTime<Utc>>,
            #[serde(default)]
            published_at: Option<DateTime<Utc>>,
        }

        let stored: Stored = decode_fields(doc)?;
        let pages = match stored.pages {
            Some(serde_json::Value::String(raw)) => decode_pages(&raw),
            Some(value @ serde_json::Value::Array(_)) => {
                serde_json::from_value(value).unwrap_or_default()
            }
            _ => Vec::new(),
        };
        let character = match stored.character {
            Some(serde_json::Value::String(raw)) => serde_json::from_str(&raw).ok(),
            Some(value @ serde_json::Value::Object(_)) => serde_json::from_value(value).ok(),
            _ => None,
        };

        Some(Self {
            id: doc.id.clone(),
            author_name: stored.author_name,
            user_id: stored.user_id,
            character,
            title: stored.title,
            synopsis: stored.synopsis,
            pages,
            status: stored.status,
            created_at: stored.created_at,
            published_at: stored.published_at,
        })
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("authorName".into(), self.author_name.clone().into());
        if let Some(user_id) = &self.user_id {
            fields.insert("userId".into(), user_id.clone().into());
        }
        if let Some(character) = &self.character {
            fields.insert("character".into(), encode_character(character).into());
        }
        fields.insert("title".into(), self.title.clone().into());
        fields.insert("synopsis".into(), self.synopsis.clone().into());
        fields.insert("pages".into(), encode_pages(&self.pages).into());
        fields.insert("status".into(), status_value(self.status));
        if let Some(created_at) = self.created_at {
            fields.insert("createdAt".into(), created_at.to_rfc3339().into());
        }
        if let Some(published_at) = self.published_at {
            fields.insert("publishedAt".into(), published_at.to_rfc3339().into());
        }
        fields
    }

    pub fn is_ready(&self) -> bool {
        self.status == BookStatus::Ready
    }

    pub fn character_name(&self) -> &str {
        self.character
            .as_ref()
            .map(|c| c.name.as_str())
            .unwrap_or("a mystery friend")
    }
}

pub fn status_value(status: BookStatus) -> serde_json::Value {
    serde_json::to_value(status).unwrap_or(serde_json::Value::Null)
}

pub fn encode_pages(pages: &[Page]) -> String {
    serde_json::to_string(pages).unwrap_or_else(|_| "[]".to_string())
}

/// Anything that is not a JSON array of pages decodes to no pages.
pub fn decode_pages(raw: &str) -> Vec<Page> {
    match serde_json::from_str::<Vec<Page>>(raw) {
        Ok(pages) => pages,
        Err(err) => {
            tracing::debug!(error = %err, "stored pages are unreadable; using no pages");
            Vec::new()
        }
    }
}

fn encode_character(character: &Character) -> String {
    serde_json::to_string(character).unwrap_or_default()
}

fn decode_fields<T: serde::de::DeserializeOwned>(doc: &Document) -> Option<T> {
    match serde_json::from_value(serde_json::Value::Object(doc.fields.clone())) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(id = %doc.id, error = %err, "skipping unreadable record");
            None
        }
    }
}
