use chrono::Utc;

use crate::app::notice::Notice;
use crate::model::{Author, AuthorId};
use crate::store::{CollectionPath, Document, DocumentStore, StoreError};

pub const MIN_MAGIC_WORD_CHARS: usize = 4;

fn validate<'a>(display_name: &'a str, magic_word: &str) -> Result<&'a str, Notice> {
    let display_name = display_name.trim();
    if display_name.is_empty() || magic_word.chars().count() < MIN_MAGIC_WORD_CHARS {
        return Err(Notice::FieldsTooShort);
    }
    Ok(display_name)
}

/// Creates an account keyed by the normalized display name. Names that
/// normalize to an existing key are taken.
pub async fn register(
    store: &dyn DocumentStore,
    display_name: &str,
    magic_word: &str,
) -> Result<Author, Notice> {
    let display_name = validate(display_name, magic_word)?;
    let author = Author {
        id: AuthorId::from_display_name(display_name),
        display_name: display_name.to_string(),
        magic_word: magic_word.to_string(),
        created_at: Some(Utc::now()),
    };

    match store
        .create(
            &CollectionPath::authors(),
            author.id.as_str(),
            author.to_fields(),
        )
        .await
    {
        Ok(()) => {
            tracing::info!(author = %author.id, "author registered");
            Ok(author)
        }
        Err(StoreError::AlreadyExists { .. }) => Err(Notice::NameTaken),
        Err(err) => {
            tracing::error!(author = %author.id, error = %err, "register failed");
            Err(Notice::DoorStuck)
        }
    }
}

/// Returns the stored account when the magic word matches.
pub async fn login(
    store: &dyn DocumentStore,
    display_name: &str,
    magic_word: &str,
) -> Result<Author, Notice> {
    let display_name = validate(display_name, magic_word)?;
    let author_id = AuthorId::from_display_name(display_name);

    let fields = match store.get(&CollectionPath::authors(), author_id.as_str()).await {
        Ok(Some(fields)) => fields,
        Ok(None) => return Err(Notice::IncorrectLogin),
        Err(err) => {
            tracing::error!(author = %author_id, error = %err, "login lookup failed");
            return Err(Notice::DoorStuck);
        }
    };

    let author = Author::from_document(&Document {
        id: author_id.as_str().to_string(),
        fields,
    })
    .ok_or(Notice::DoorStuck)?;
    if author.magic_word != magic_word {
        tracing::info!(author = %author_id, "wrong magic word");
        return Err(Notice::IncorrectLogin);
    }
    Ok(author)
}
