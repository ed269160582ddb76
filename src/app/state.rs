use serde::Serialize;

use crate::app::notice::Notice;
use crate::model::{Author, AuthorId, BookRequest, Character, preset_characters};
use crate::store::CollectionPath;

/// Everything the views read. Only [`update`] mutates it.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub active_author: Option<String>,
    pub book_requests: Vec<BookRequest>,
    pub authors: Vec<Author>,
    pub custom_characters: Vec<Character>,
    pub notice: Option<Notice>,
}

#[derive(Debug, Clone)]
pub enum Message {
    BookRequests(Vec<BookRequest>),
    Authors(Vec<Author>),
    Characters {
        author: AuthorId,
        characters: Vec<Character>,
    },
    AuthorChanged(Option<String>),
    SubscriptionFailed {
        collection: CollectionPath,
    },
    Notify(Notice),
    DismissNotice,
}

impl AppState {
    pub fn active_author_id(&self) -> Option<AuthorId> {
        self.active_author
            .as_deref()
            .map(AuthorId::from_display_name)
    }

    pub fn published_books(&self) -> impl Iterator<Item = &BookRequest> {
        self.book_requests.iter().filter(|r| r.is_ready())
    }

    pub fn user_requests(&self) -> impl Iterator<Item = &BookRequest> {
        let author = self.active_author.as_deref();
        self.book_requests
            .iter()
            .filter(move |r| author.is_some_and(|a| r.author_name == a))
    }

    /// Presets first, then the active author's own creations.
    pub fn available_characters(&self) -> Vec<Character> {
        let mut characters = preset_characters();
        characters.extend(self.custom_characters.iter().cloned());
        characters
    }
}

pub fn update(state: &mut AppState, message: Message) {
    match message {
        Message::BookRequests(requests) => {
            state.book_requests = requests;
        }
        Message::Authors(authors) => {
            state.authors = authors;
        }
        Message::Characters { author, characters } => {
            if state.active_author_id().as_ref() != Some(&author) {
                tracing::debug!(%author, "dropping characters of an inactive author");
                return;
            }
            state.custom_characters = characters;
        }
        Message::AuthorChanged(author) => {
            state.active_author = author;
            state.custom_characters.clear();
        }
        Message::SubscriptionFailed { collection } => {
            tracing::warn!(%collection, "live collection lost");
            state.notice = Some(Notice::ConnectionInterrupted);
        }
        Message::Notify(notice) => {
            state.notice = Some(notice);
        }
        Message::DismissNotice => {
            state.notice = None;
        }
    }
}
